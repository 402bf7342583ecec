//! NeXus persistence container.
//!
//! Layout:
//!
//! ```text
//! /entry                      NXentry, @Site, @Version
//!     data/                   NXdata: data and axis datasets
//!     mask/                   NXdata: int8 masks
//!     roi/                    NXdata: int32 placeholders with @JSON
//!     function/               NXdata: int32 placeholders with @JSON
//!     history/                NXdata: earlier processing results
//!     diffraction_metadata/   NXdetector: detector geometry and beam
//! ```
//!
//! From version 2 masks are stored inverted (non-zero marks excluded pixels).

use crate::hdf5::{self as h5, NX_DATA, NX_DETECTOR, NX_ENTRY, NX_SDS};
use crate::json;
use crate::loader::{Hdf5Loader, ReleaseFlag};
use crate::{Error, Result};
use hdf5::Group;
use log::{debug, warn};
use ndarray::arr1;
use nxstack_core::{Data, Dataset, Function, LazyDataset, Roi};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SITE_ENV: &str = "NXSTACK_SITE";
pub const DEFAULT_SITE: &str = "Diamond Light Source";
pub const CURRENT_VERSION: &str = "2.0";

pub const ENTRY: &str = "/entry";
pub const DATA_ENTRY: &str = "/entry/data";
pub const MASK_ENTRY: &str = "/entry/mask";
pub const ROI_ENTRY: &str = "/entry/roi";
pub const FUNCTION_ENTRY: &str = "/entry/function";
pub const HISTORY_ENTRY: &str = "/entry/history";
pub const DIFFRACTION_METADATA_ENTRY: &str = "/entry/diffraction_metadata";

const JSON_ATTR: &str = "JSON";
const SITE_ATTR: &str = "Site";
const VERSION_ATTR: &str = "Version";

/// Header values recorded on `/entry` when a container is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub site: String,
    pub version: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            site: DEFAULT_SITE.to_string(),
            version: CURRENT_VERSION.to_string(),
        }
    }
}

impl PersistenceConfig {
    /// Default configuration with the site taken from `NXSTACK_SITE` when set.
    #[must_use]
    pub fn from_env() -> Self {
        let site = std::env::var(SITE_ENV).unwrap_or_else(|_| {
            debug!("{SITE_ENV} is not set, recording site as '{DEFAULT_SITE}'");
            DEFAULT_SITE.to_string()
        });
        Self::default().with_site(site)
    }

    #[must_use]
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = site.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Site and version parsed from `/entry` when the file is first opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub site: Option<String>,
    pub version: Option<f64>,
}

impl Header {
    fn read(file: &hdf5::File) -> Result<Self> {
        let Some(entry) = h5::group_opt(file, ENTRY) else {
            return Ok(Self::default());
        };
        let site = h5::read_attr_rendered(&entry, SITE_ATTR)?.map(|s| json::strip_brackets(&s).to_string());
        let version = h5::read_attr_rendered(&entry, VERSION_ATTR)?
            .map(|v| parse_version(&v))
            .transpose()?;
        Ok(Self { site, version })
    }

    /// Whether masks are stored as excluded-pixel maps.
    fn inverts_masks(&self, file: &Path) -> Result<bool> {
        let version = self
            .version
            .ok_or_else(|| Error::read(format!("{ENTRY}@{VERSION_ATTR}"), file))?;
        Ok(version > 1.0)
    }
}

fn parse_version(raw: &str) -> Result<f64> {
    let trimmed = json::strip_brackets(raw).trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| Error::InvalidFormat(format!("version '{trimmed}' is not a number")))
}

/// Detector geometry and beam settings of a diffraction image.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffractionMetadata {
    pub x_pixel_number: i32,
    pub y_pixel_number: i32,
    /// Pixel width in mm.
    pub x_pixel_size: f64,
    /// Pixel height in mm.
    pub y_pixel_size: f64,
    pub beam_vector: [f64; 3],
    /// Beam centre in pixels.
    pub beam_centre: [f64; 2],
    /// Sample to detector distance in mm.
    pub distance: f64,
    /// Row-major 3x3 orientation matrix.
    pub detector_orientation: [f64; 9],
    /// Wavelength in Angstrom, stored under `energy`.
    pub wavelength: f64,
    /// Exposure time in seconds.
    pub count_time: f64,
    pub phi_start: f64,
    pub phi_range: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug)]
struct Handle {
    file: hdf5::File,
    mode: Mode,
}

/// A NeXus file holding data, masks, regions, functions, history and
/// diffraction metadata.
///
/// The file is opened lazily: reads open it read-only, the first write
/// reopens it read/write. `close` releases the handle and invalidates lazy
/// datasets handed out so far; it also runs on drop.
#[derive(Debug)]
pub struct PersistentContainer {
    path: PathBuf,
    handle: Option<Handle>,
    header: Header,
    config: PersistenceConfig,
    released: ReleaseFlag,
}

impl PersistentContainer {
    /// Creates (or truncates) a container and records Site and Version.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn create<P: AsRef<Path>>(path: P, config: PersistenceConfig) -> Result<Self> {
        let file = hdf5::File::create(path.as_ref())?;
        let mut container = Self {
            path: path.as_ref().to_path_buf(),
            handle: Some(Handle {
                file: file.clone(),
                mode: Mode::Write,
            }),
            header: Header::default(),
            config,
            released: ReleaseFlag::new(),
        };
        container.write_header(&file)?;
        Ok(container)
    }

    /// Binds a container to `path` without touching the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            handle: None,
            header: Header::default(),
            config: PersistenceConfig::from_env(),
            released: ReleaseFlag::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header parsed when the file was opened.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    fn reader(&mut self) -> Result<hdf5::File> {
        if let Some(handle) = &self.handle {
            return Ok(handle.file.clone());
        }
        let file = hdf5::File::open(&self.path)?;
        self.header = Header::read(&file)?;
        self.handle = Some(Handle {
            file: file.clone(),
            mode: Mode::Read,
        });
        Ok(file)
    }

    fn writer(&mut self) -> Result<hdf5::File> {
        if let Some(handle) = &self.handle {
            if handle.mode == Mode::Write {
                return Ok(handle.file.clone());
            }
        }
        self.close_handle();
        let file = hdf5::File::append(&self.path)?;
        self.header = Header::read(&file)?;
        self.handle = Some(Handle {
            file: file.clone(),
            mode: Mode::Write,
        });
        if self.header.version.is_none() {
            self.write_header(&file)?;
        }
        Ok(file)
    }

    fn write_header(&mut self, file: &hdf5::File) -> Result<()> {
        let entry = h5::ensure_group_path(file, ENTRY, NX_ENTRY, NX_ENTRY)?;
        h5::set_attr_str_array(&entry, SITE_ATTR, &self.config.site)?;
        h5::set_attr_str_array(&entry, VERSION_ATTR, &self.config.version)?;
        self.header = Header {
            site: Some(self.config.site.clone()),
            version: Some(parse_version(&self.config.version)?),
        };
        Ok(())
    }

    fn write_parent(&mut self, path: &str, class: &str) -> Result<Group> {
        let file = self.writer()?;
        h5::ensure_group_path(&file, path, NX_ENTRY, class)
    }

    fn read_parent(&mut self, path: &str) -> Result<Group> {
        let file = self.reader()?;
        h5::group_opt(&file, path).ok_or_else(|| Error::read(path, &self.path))
    }

    // ---- site and version ----

    /// Records the site on `/entry`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_site(&mut self, site: &str) -> Result<()> {
        let entry = self.write_parent(ENTRY, NX_ENTRY)?;
        h5::set_attr_str_array(&entry, SITE_ATTR, site)?;
        self.header.site = Some(site.to_string());
        Ok(())
    }

    /// Records the version on `/entry`. Mask polarity follows the new value.
    ///
    /// # Errors
    /// Returns an error if the version is not a number or the write fails.
    pub fn set_version(&mut self, version: &str) -> Result<()> {
        let parsed = parse_version(version)?;
        let entry = self.write_parent(ENTRY, NX_ENTRY)?;
        h5::set_attr_str_array(&entry, VERSION_ATTR, version)?;
        self.header.version = Some(parsed);
        Ok(())
    }

    /// Site recorded on `/entry`.
    ///
    /// # Errors
    /// Returns `Read` if the attribute is absent.
    pub fn site(&mut self) -> Result<String> {
        self.entry_attr(SITE_ATTR)
    }

    /// Version recorded on `/entry`, without brackets.
    ///
    /// # Errors
    /// Returns `Read` if the attribute is absent.
    pub fn version(&mut self) -> Result<String> {
        self.entry_attr(VERSION_ATTR)
    }

    fn entry_attr(&mut self, name: &str) -> Result<String> {
        let file = self.reader()?;
        let missing = || Error::read(format!("{ENTRY}@{name}"), &self.path);
        let entry = h5::group_opt(&file, ENTRY).ok_or_else(missing)?;
        let value = h5::read_attr_rendered(&entry, name)?.ok_or_else(missing)?;
        Ok(json::strip_brackets(&value).to_string())
    }

    // ---- data, axes and history ----

    /// Writes `data` under `/entry/data`, named `data` if its name is empty.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_data(&mut self, data: &Dataset) -> Result<()> {
        let parent = self.write_parent(DATA_ENTRY, NX_DATA)?;
        write_sds(&parent, name_or(data.name(), "data"), data.data())
    }

    /// Writes up to two axes next to the data, defaulting their names to
    /// `X Axis` and `Y Axis`.
    ///
    /// # Errors
    /// Returns an error for more than two axes or if the write fails.
    pub fn set_axes(&mut self, axes: &[Dataset]) -> Result<()> {
        if axes.len() > 2 {
            return Err(Error::InvalidArgument(format!(
                "expected at most 2 axes, got {}",
                axes.len()
            )));
        }
        let parent = self.write_parent(DATA_ENTRY, NX_DATA)?;
        for (axis, default) in axes.iter().zip(["X Axis", "Y Axis"]) {
            write_sds(&parent, name_or(axis.name(), default), axis.data())?;
        }
        Ok(())
    }

    /// Writes history datasets; unnamed ones become `history1`, `history2`, ...
    /// by position.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_history(&mut self, sets: &[Dataset]) -> Result<()> {
        let parent = self.write_parent(HISTORY_ENTRY, NX_DATA)?;
        for (index, set) in sets.iter().enumerate() {
            let fallback = format!("history{}", index + 1);
            write_sds(&parent, name_or(set.name(), &fallback), set.data())?;
        }
        Ok(())
    }

    /// Lazy view of a data dataset; an empty name means `data`.
    ///
    /// # Errors
    /// Returns `Read` if the dataset is absent.
    pub fn data(&mut self, name: &str) -> Result<LazyDataset> {
        self.lazy(DATA_ENTRY, name_or(name, "data"))
    }

    /// Lazy views of the X and Y axes; empty names mean `X Axis` and `Y Axis`.
    ///
    /// # Errors
    /// Returns `Read` if either axis is absent.
    pub fn axes(&mut self, x_name: &str, y_name: &str) -> Result<Vec<LazyDataset>> {
        Ok(vec![
            self.lazy(DATA_ENTRY, name_or(x_name, "X Axis"))?,
            self.lazy(DATA_ENTRY, name_or(y_name, "Y Axis"))?,
        ])
    }

    /// Lazy views of every history dataset, by name.
    ///
    /// # Errors
    /// Returns `Read` if the history group is absent.
    pub fn history(&mut self) -> Result<BTreeMap<String, LazyDataset>> {
        let mut sets = BTreeMap::new();
        for name in self.history_names()? {
            let lazy = self.lazy(HISTORY_ENTRY, &name)?;
            sets.insert(name, lazy);
        }
        Ok(sets)
    }

    fn lazy(&mut self, parent: &str, name: &str) -> Result<LazyDataset> {
        let full = format!("{parent}/{name}");
        let file = self.reader()?;
        let dataset = file.dataset(&full).map_err(|_| Error::read(&full, &self.path))?;
        Ok(LazyDataset::new(
            name,
            h5::element_type(&dataset)?,
            dataset.shape(),
            Arc::new(Hdf5Loader::new(&self.path, full, self.released.clone())),
        ))
    }

    // ---- masks ----

    /// Writes several masks.
    ///
    /// # Errors
    /// Returns an error if a mask is not numeric/boolean or the write fails.
    pub fn set_masks(&mut self, masks: &BTreeMap<String, Dataset>) -> Result<()> {
        for (name, mask) in masks {
            self.add_mask(name, mask)?;
        }
        Ok(())
    }

    /// Writes one mask as int8, inverted when the container version is 2 or later.
    ///
    /// # Errors
    /// Returns an error if the mask is not numeric/boolean or the write fails.
    pub fn add_mask(&mut self, name: &str, mask: &Dataset) -> Result<()> {
        let parent = self.write_parent(MASK_ENTRY, NX_DATA)?;
        let encoded = encode_mask(mask, &self.header, &self.path)?;
        write_sds(&parent, name, encoded.data())
    }

    /// Reads one mask as booleans (true keeps a pixel).
    ///
    /// # Errors
    /// Returns `Read` if the mask or the version attribute is absent.
    pub fn mask(&mut self, name: &str) -> Result<Dataset> {
        let parent = self.read_parent(MASK_ENTRY)?;
        if !parent.link_exists(name) {
            return Err(Error::read(format!("{MASK_ENTRY}/{name}"), &self.path));
        }
        let raw = Dataset::new(name, h5::read_data(&parent.dataset(name)?)?);
        decode_mask(&raw, &self.header, &self.path)
    }

    /// Reads every mask.
    ///
    /// # Errors
    /// Returns `Read` if the mask group or the version attribute is absent.
    pub fn masks(&mut self) -> Result<BTreeMap<String, Dataset>> {
        let mut masks = BTreeMap::new();
        for name in self.mask_names()? {
            let mask = self.mask(&name)?;
            masks.insert(name, mask);
        }
        Ok(masks)
    }

    // ---- regions ----

    /// Writes every region with a JSON form; others are skipped.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn set_rois(&mut self, rois: &BTreeMap<String, Roi>) -> Result<()> {
        let parent = self.write_parent(ROI_ENTRY, NX_DATA)?;
        for (name, roi) in rois {
            if !json::is_roi_supported(roi) {
                debug!("skipping region {name}: {:?} has no JSON form", roi.kind());
                continue;
            }
            write_json_node(&parent, name, &json::marshal_roi(roi)?)?;
        }
        Ok(())
    }

    /// Writes one region.
    ///
    /// # Errors
    /// Returns `UnsupportedVariant` if the region has no JSON form.
    pub fn add_roi(&mut self, name: &str, roi: &Roi) -> Result<()> {
        let json = json::marshal_roi(roi)?;
        let parent = self.write_parent(ROI_ENTRY, NX_DATA)?;
        write_json_node(&parent, name, &json)
    }

    #[must_use]
    pub fn is_region_supported(&self, roi: &Roi) -> bool {
        json::is_roi_supported(roi)
    }

    /// Sets an extra attribute on a stored region. `JSON` is reserved.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for `JSON` and `Read` if the region is absent.
    pub fn set_region_attribute(&mut self, region: &str, name: &str, value: &str) -> Result<()> {
        if name == JSON_ATTR {
            return Err(Error::InvalidArgument(
                "cannot override the JSON attribute".to_string(),
            ));
        }
        let file = self.writer()?;
        let path = format!("{ROI_ENTRY}/{region}");
        let node = file.dataset(&path).map_err(|_| Error::read(&path, &self.path))?;
        h5::set_attr_str_array(&node, name, value)
    }

    /// Reads an attribute of a stored region, or `None` if it is not set.
    ///
    /// # Errors
    /// Returns `Read` if the region is absent.
    pub fn region_attribute(&mut self, region: &str, name: &str) -> Result<Option<String>> {
        let file = self.reader()?;
        let path = format!("{ROI_ENTRY}/{region}");
        let node = file.dataset(&path).map_err(|_| Error::read(&path, &self.path))?;
        Ok(h5::read_attr_rendered(&node, name)?.map(|v| json::strip_brackets(&v).to_string()))
    }

    /// Reads one region.
    ///
    /// # Errors
    /// Returns `Read` if the region is absent, or a decode error.
    pub fn roi(&mut self, name: &str) -> Result<Roi> {
        json::unmarshal_roi(&self.json_node(ROI_ENTRY, name)?)
    }

    /// Reads every region.
    ///
    /// # Errors
    /// Returns `Read` if the region group is absent, or a decode error.
    pub fn rois(&mut self) -> Result<BTreeMap<String, Roi>> {
        let mut rois = BTreeMap::new();
        for name in self.roi_names()? {
            let roi = self.roi(&name)?;
            rois.insert(name, roi);
        }
        Ok(rois)
    }

    // ---- functions ----

    /// Writes several functions.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn set_functions(&mut self, functions: &BTreeMap<String, Function>) -> Result<()> {
        let parent = self.write_parent(FUNCTION_ENTRY, NX_DATA)?;
        for (name, function) in functions {
            write_json_node(&parent, name, &json::marshal_function(function)?)?;
        }
        Ok(())
    }

    /// Writes one function.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn add_function(&mut self, name: &str, function: &Function) -> Result<()> {
        let json = json::marshal_function(function)?;
        let parent = self.write_parent(FUNCTION_ENTRY, NX_DATA)?;
        write_json_node(&parent, name, &json)
    }

    /// Reads one function.
    ///
    /// # Errors
    /// Returns `Read` if the function is absent, or a decode error.
    pub fn function(&mut self, name: &str) -> Result<Function> {
        json::unmarshal_function(&self.json_node(FUNCTION_ENTRY, name)?)
    }

    /// Reads every function.
    ///
    /// # Errors
    /// Returns `Read` if the function group is absent, or a decode error.
    pub fn functions(&mut self) -> Result<BTreeMap<String, Function>> {
        let mut functions = BTreeMap::new();
        for name in self.function_names()? {
            let function = self.function(&name)?;
            functions.insert(name, function);
        }
        Ok(functions)
    }

    fn json_node(&mut self, parent: &str, name: &str) -> Result<String> {
        let file = self.reader()?;
        let node = file
            .dataset(&format!("{parent}/{name}"))
            .map_err(|_| Error::read(parent, &self.path))?;
        let raw = h5::read_attr_rendered(&node, JSON_ATTR)?
            .ok_or_else(|| Error::read(format!("{parent}/{name}@{JSON_ATTR}"), &self.path))?;
        Ok(json::strip_brackets(&raw).to_string())
    }

    // ---- diffraction metadata ----

    /// Writes detector and beam settings, each child with a `units` attribute.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn set_diffraction_metadata(&mut self, meta: &DiffractionMetadata) -> Result<()> {
        let parent = self.write_parent(DIFFRACTION_METADATA_ENTRY, NX_DETECTOR)?;
        let int = |v: i32| Data::Int32(arr1(&[v]).into_dyn());
        let float = |v: &[f64]| Data::Float64(arr1(v).into_dyn());
        let fields: [(&str, Data, &str); 12] = [
            ("x_pixel_number", int(meta.x_pixel_number), "pixels"),
            ("y_pixel_number", int(meta.y_pixel_number), "pixels"),
            ("x_pixel_size", float(&[meta.x_pixel_size]), "mm"),
            ("y_pixel_size", float(&[meta.y_pixel_size]), "mm"),
            ("beam_vector", float(&meta.beam_vector[..]), "dimensionless"),
            ("beam_centre", float(&meta.beam_centre[..]), "pixels"),
            ("distance", float(&[meta.distance]), "mm"),
            ("detector_orientation", float(&meta.detector_orientation[..]), "dimensionless"),
            ("energy", float(&[meta.wavelength]), "Angstrom"),
            ("count_time", float(&[meta.count_time]), "s"),
            ("phi_start", float(&[meta.phi_start]), "degrees"),
            ("phi_range", float(&[meta.phi_range]), "degrees"),
        ];
        for (name, data, units) in &fields {
            let dataset = h5::replace_dataset(&parent, name, data)?;
            h5::set_units(&dataset, units)?;
        }
        Ok(())
    }

    /// Reads detector and beam settings.
    ///
    /// # Errors
    /// Returns `Read` if the group or a child is absent.
    pub fn diffraction_metadata(&mut self) -> Result<DiffractionMetadata> {
        let parent = self.read_parent(DIFFRACTION_METADATA_ENTRY)?;
        let path = self.path.clone();
        let values = |name: &str| -> Result<Vec<f64>> {
            let missing = || Error::read(format!("{DIFFRACTION_METADATA_ENTRY}/{name}"), &path);
            let dataset = parent.dataset(name).map_err(|_| missing())?;
            h5::read_data(&dataset)?.to_f64_vec().ok_or_else(missing)
        };

        Ok(DiffractionMetadata {
            x_pixel_number: first_i32(&parent, "x_pixel_number", &path)?,
            y_pixel_number: first_i32(&parent, "y_pixel_number", &path)?,
            x_pixel_size: first(&values("x_pixel_size")?),
            y_pixel_size: first(&values("y_pixel_size")?),
            beam_vector: to_array(&values("beam_vector")?)?,
            beam_centre: to_array(&values("beam_centre")?)?,
            distance: first(&values("distance")?),
            detector_orientation: to_array(&values("detector_orientation")?)?,
            wavelength: first(&values("energy")?),
            count_time: first(&values("count_time")?),
            phi_start: first(&values("phi_start")?),
            phi_range: first(&values("phi_range")?),
        })
    }

    // ---- listings ----

    /// # Errors
    /// Returns `Read` if `/entry/data` is absent.
    pub fn data_names(&mut self) -> Result<Vec<String>> {
        self.names(DATA_ENTRY)
    }

    /// # Errors
    /// Returns `Read` if `/entry/mask` is absent.
    pub fn mask_names(&mut self) -> Result<Vec<String>> {
        self.names(MASK_ENTRY)
    }

    /// # Errors
    /// Returns `Read` if `/entry/roi` is absent.
    pub fn roi_names(&mut self) -> Result<Vec<String>> {
        self.names(ROI_ENTRY)
    }

    /// # Errors
    /// Returns `Read` if `/entry/function` is absent.
    pub fn function_names(&mut self) -> Result<Vec<String>> {
        self.names(FUNCTION_ENTRY)
    }

    /// # Errors
    /// Returns `Read` if `/entry/history` is absent.
    pub fn history_names(&mut self) -> Result<Vec<String>> {
        self.names(HISTORY_ENTRY)
    }

    fn names(&mut self, path: &str) -> Result<Vec<String>> {
        let group = self.read_parent(path)?;
        h5::member_names(&group)
    }

    pub fn contains_data(&mut self) -> bool {
        self.contains(DATA_ENTRY)
    }

    pub fn contains_mask(&mut self) -> bool {
        self.contains(MASK_ENTRY)
    }

    pub fn contains_region(&mut self) -> bool {
        self.contains(ROI_ENTRY)
    }

    pub fn contains_function(&mut self) -> bool {
        self.contains(FUNCTION_ENTRY)
    }

    pub fn contains_diffraction_metadata(&mut self) -> bool {
        self.contains(DIFFRACTION_METADATA_ENTRY)
    }

    pub fn contains_history(&mut self) -> bool {
        self.contains(HISTORY_ENTRY)
    }

    fn contains(&mut self, path: &str) -> bool {
        match self.reader() {
            Ok(file) => h5::group_opt(&file, path).is_some(),
            Err(e) => {
                debug!("cannot read {}: {e}", self.path.display());
                false
            }
        }
    }

    // ---- release ----

    /// Releases the file handle and invalidates lazy datasets obtained so
    /// far. Never fails; close errors are logged. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.close_handle();
        self.released.release();
        self.released = ReleaseFlag::new();
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.file.close() {
                warn!("cannot close {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for PersistentContainer {
    fn drop(&mut self) {
        self.close();
    }
}

fn name_or<'a>(name: &'a str, default: &'a str) -> &'a str {
    if name.is_empty() {
        default
    } else {
        name
    }
}

fn write_sds(parent: &Group, name: &str, data: &Data) -> Result<()> {
    let dataset = h5::replace_dataset(parent, name, data)?;
    h5::set_nx_class(&dataset, NX_SDS)
}

fn write_json_node(parent: &Group, name: &str, json: &str) -> Result<()> {
    let placeholder = Data::Int32(arr1(&[0]).into_dyn());
    let dataset = h5::replace_dataset(parent, name, &placeholder)?;
    h5::set_attr_str_array(&dataset, JSON_ATTR, json)
}

fn encode_mask(mask: &Dataset, header: &Header, file: &Path) -> Result<Dataset> {
    let keep = mask.to_bool()?;
    let stored = if header.inverts_masks(file)? {
        keep.logical_not()?
    } else {
        keep
    };
    Ok(stored.bool_to_int8()?)
}

fn decode_mask(raw: &Dataset, header: &Header, file: &Path) -> Result<Dataset> {
    let stored = raw.to_bool()?;
    if header.inverts_masks(file)? {
        Ok(stored.logical_not()?)
    } else {
        Ok(stored)
    }
}

fn first_i32(parent: &Group, name: &str, file: &Path) -> Result<i32> {
    let missing = || Error::read(format!("{DIFFRACTION_METADATA_ENTRY}/{name}"), file);
    let dataset = parent.dataset(name).map_err(|_| missing())?;
    match h5::read_data(&dataset)? {
        Data::Int32(a) => a.iter().next().copied().ok_or_else(missing),
        Data::Int8(a) => a.iter().next().map(|&v| i32::from(v)).ok_or_else(missing),
        other => Err(Error::InvalidFormat(format!(
            "{name} holds {} values, expected int32",
            other.element_type()
        ))),
    }
}

fn first(values: &[f64]) -> f64 {
    values.first().copied().unwrap_or(f64::NAN)
}

fn to_array<const N: usize>(values: &[f64]) -> Result<[f64; N]> {
    <[f64; N]>::try_from(values)
        .map_err(|_| Error::InvalidFormat(format!("expected {N} values, found {}", values.len())))
}

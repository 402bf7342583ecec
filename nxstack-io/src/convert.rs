//! Conversion of many source files into one stacked NeXus file.
//!
//! Sources are HDF5/NeXus files or SPEC text files. Datasets are selected by
//! anchored regular expressions over their paths, then either collected into
//! 2-D/3-D stacks ([`ConversionScheme::H5From1D`]) or streamed one slice per
//! source into shape-reconciled stacks ([`ConversionScheme::Compare`]).

use crate::hdf5::{self as h5, NX_DATA, NX_SDS};
use crate::loader::{open_hdf5_lazy, ReleaseFlag};
use crate::spec::SpecFile;
use crate::stack::{parent_group, PartFile, ScanGrid, StackAggregator, StackedDataset};
use crate::worker::CancelToken;
use crate::{Error, Result};
use hdf5::Group;
use log::{debug, warn};
use nxstack_core::{LazyDataset, ShapeReconciler, ShapeRecord};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How sources are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionScheme {
    /// Stack same-shape datasets from every source, optionally on a scan grid.
    #[default]
    H5From1D,
    /// Append one reconciled slice per source to a growing stack.
    Compare,
}

impl fmt::Display for ConversionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionScheme::H5From1D => f.write_str("h5-from-1d"),
            ConversionScheme::Compare => f.write_str("compare"),
        }
    }
}

impl FromStr for ConversionScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "h5-from-1d" | "h5_from_1d" => Ok(ConversionScheme::H5From1D),
            "compare" => Ok(ConversionScheme::Compare),
            other => Err(Error::InvalidArgument(format!(
                "unknown conversion scheme '{other}'"
            ))),
        }
    }
}

/// Everything a conversion needs.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub sources: Vec<PathBuf>,
    pub dataset_patterns: Vec<String>,
    pub axis_dataset: Option<String>,
    pub output: PathBuf,
    pub scheme: ConversionScheme,
    pub grid: Option<ScanGrid>,
    pub required_shapes: ShapeRecord,
}

impl ConversionContext {
    #[must_use]
    pub fn new(sources: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            dataset_patterns: Vec::new(),
            axis_dataset: None,
            output: output.into(),
            scheme: ConversionScheme::default(),
            grid: None,
            required_shapes: ShapeRecord::new(),
        }
    }

    /// Adds a dataset path pattern. Patterns must match the whole path.
    #[must_use]
    pub fn with_dataset_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.dataset_patterns.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_axis_dataset(mut self, name: impl Into<String>) -> Self {
        self.axis_dataset = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: ConversionScheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_grid(mut self, grid: ScanGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Forces every slice of `path` to `shape` in the compare scheme.
    #[must_use]
    pub fn with_required_shape(mut self, path: impl Into<String>, shape: Vec<usize>) -> Self {
        self.required_shapes.configure(path, shape);
        self
    }
}

/// What a conversion wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub scheme: ConversionScheme,
    pub sources: usize,
    pub datasets: Vec<StackedDataset>,
}

/// A file datasets can be read from.
pub trait DataSource: fmt::Debug {
    fn path(&self) -> &Path;

    /// Every dataset path in the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be listed.
    fn dataset_names(&self) -> Result<Vec<String>>;

    /// Opens one dataset lazily.
    ///
    /// # Errors
    /// Returns `Read` if `name` is not in the file.
    fn lazy(&self, name: &str) -> Result<LazyDataset>;
}

/// HDF5 or NeXus file.
#[derive(Debug, Clone)]
pub struct Hdf5Source {
    path: PathBuf,
}

impl Hdf5Source {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for Hdf5Source {
    fn path(&self) -> &Path {
        &self.path
    }

    fn dataset_names(&self) -> Result<Vec<String>> {
        let file = hdf5::File::open(&self.path)?;
        let mut names = Vec::new();
        collect_datasets(&file, &mut names)?;
        names.sort();
        Ok(names)
    }

    fn lazy(&self, name: &str) -> Result<LazyDataset> {
        open_hdf5_lazy(&self.path, name, ReleaseFlag::new())
    }
}

fn collect_datasets(group: &Group, names: &mut Vec<String>) -> Result<()> {
    for dataset in group.datasets()? {
        names.push(dataset.name());
    }
    for child in group.groups()? {
        collect_datasets(&child, names)?;
    }
    Ok(())
}

/// SPEC text file, parsed into memory when opened.
///
/// Columns of named scans are addressed as `Scan N/<label>`, columns of
/// headerless data by their bare `dataset_<i>` label.
#[derive(Debug, Clone)]
pub struct SpecSource {
    path: PathBuf,
    file: SpecFile,
}

impl SpecSource {
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = SpecFile::open(&path)?;
        Ok(Self { path, file })
    }
}

impl DataSource for SpecSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn dataset_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for scan in self.file.scans() {
            for label in scan.labels() {
                match scan.name() {
                    Some(scan_name) => names.push(format!("{scan_name}/{label}")),
                    None => names.push(label.clone()),
                }
            }
        }
        Ok(names)
    }

    fn lazy(&self, name: &str) -> Result<LazyDataset> {
        let column = match name.rsplit_once('/') {
            Some((scan, label)) => self
                .file
                .scan(scan.trim_start_matches('/'))
                .and_then(|s| s.column(label)),
            None => self.file.unnamed_scan().and_then(|s| s.column(name)),
        };
        column
            .map(LazyDataset::from_dataset)
            .ok_or_else(|| Error::read(name, &self.path))
    }
}

/// Opens `path` as a SPEC source for `.dat`, `.spec` and `.txt` files and as
/// an HDF5 source otherwise.
///
/// # Errors
/// Returns an error if a SPEC file cannot be parsed.
pub fn open_source(path: &Path) -> Result<Box<dyn DataSource>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("dat" | "spec" | "txt") => Ok(Box::new(SpecSource::open(path)?)),
        _ => Ok(Box::new(Hdf5Source::new(path))),
    }
}

/// Anchored dataset path patterns.
#[derive(Debug, Clone)]
pub struct DatasetSelector {
    patterns: Vec<Regex>,
}

impl DatasetSelector {
    /// # Errors
    /// Returns `Regex` for an invalid pattern and `InvalidArgument` if there
    /// are no patterns.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            return Err(Error::InvalidArgument("no dataset pattern given".to_string()));
        }
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p.as_ref())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }
}

/// Runs a conversion.
///
/// Any existing output is removed once writing starts. The new output only
/// appears once the conversion has succeeded.
///
/// # Errors
/// Returns `Cancelled` if `cancel` fires, `InvalidArgument` when there are
/// no sources or nothing matches, or the first read or write error.
pub fn convert(context: &ConversionContext, cancel: &CancelToken) -> Result<ConversionReport> {
    if context.sources.is_empty() {
        return Err(Error::InvalidArgument("no source files".to_string()));
    }
    let selector = DatasetSelector::new(&context.dataset_patterns)?;
    let sources = context
        .sources
        .iter()
        .map(|p| open_source(p))
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "converting {} sources to {} ({})",
        sources.len(),
        context.output.display(),
        context.scheme
    );

    let datasets = match context.scheme {
        ConversionScheme::H5From1D => stack_sources(context, &sources, &selector, cancel)?,
        ConversionScheme::Compare => compare_sources(context, &sources, &selector, cancel)?,
    };
    Ok(ConversionReport {
        output: context.output.clone(),
        scheme: context.scheme,
        sources: sources.len(),
        datasets,
    })
}

fn matching_names(
    source: &dyn DataSource,
    selector: &DatasetSelector,
    axis: Option<&str>,
) -> Result<Vec<String>> {
    Ok(source
        .dataset_names()?
        .into_iter()
        .filter(|name| Some(name.as_str()) != axis && selector.matches(name))
        .collect())
}

fn stack_sources(
    context: &ConversionContext,
    sources: &[Box<dyn DataSource>],
    selector: &DatasetSelector,
    cancel: &CancelToken,
) -> Result<Vec<StackedDataset>> {
    let axis = context.axis_dataset.as_deref();
    let mut aggregator = StackAggregator::new().with_grid(context.grid);
    for source in sources {
        cancel.check()?;
        for name in matching_names(source.as_ref(), selector, axis)? {
            aggregator.add(name.clone(), source.lazy(&name)?.squeeze());
        }
    }
    if aggregator.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no dataset matches {:?}",
            context.dataset_patterns
        )));
    }
    if let (Some(axis), Some(first)) = (axis, sources.first()) {
        aggregator.set_axis(axis, first.lazy(axis)?.squeeze());
    }
    aggregator.finish(&context.output, cancel)
}

fn compare_sources(
    context: &ConversionContext,
    sources: &[Box<dyn DataSource>],
    selector: &DatasetSelector,
    cancel: &CancelToken,
) -> Result<Vec<StackedDataset>> {
    let part = PartFile::create(&context.output)?;
    let written = {
        let file = hdf5::File::create(part.path())?;
        let result = CompareWriter::new(&file, context.required_shapes.clone())
            .write(sources, selector, cancel);
        if let Err(e) = file.close() {
            warn!("cannot close {}: {e}", part.path().display());
        }
        result?
    };
    if written.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no dataset matches {:?}",
            context.dataset_patterns
        )));
    }
    part.commit()?;
    Ok(written)
}

struct CompareWriter<'f> {
    file: &'f hdf5::File,
    reconciler: ShapeReconciler,
    order: Vec<String>,
    stacks: HashMap<String, hdf5::Dataset>,
}

impl<'f> CompareWriter<'f> {
    fn new(file: &'f hdf5::File, record: ShapeRecord) -> Self {
        Self {
            file,
            reconciler: ShapeReconciler::new(record),
            order: Vec::new(),
            stacks: HashMap::new(),
        }
    }

    fn write(
        mut self,
        sources: &[Box<dyn DataSource>],
        selector: &DatasetSelector,
        cancel: &CancelToken,
    ) -> Result<Vec<StackedDataset>> {
        for source in sources {
            for name in matching_names(source.as_ref(), selector, None)? {
                cancel.check()?;
                let slice = source.lazy(&name)?.get_complete_data()?;
                self.append(&name, slice)?;
            }
        }
        Ok(self
            .order
            .iter()
            .filter_map(|key| {
                self.stacks.get(key).map(|ds| StackedDataset {
                    key: key.clone(),
                    shape: ds.shape(),
                    signal: false,
                })
            })
            .collect())
    }

    fn append(&mut self, path: &str, slice: nxstack_core::Dataset) -> Result<()> {
        let slice = self.reconciler.reconcile(path, slice);
        if !self.stacks.contains_key(path) {
            let (group, name) = parent_group(self.file, path, NX_DATA)?;
            let stack = h5::create_stack_dataset(&group, name, slice.element_type(), slice.shape())?;
            h5::set_nx_class(&stack, NX_SDS)?;
            h5::set_attr_str(&stack, "original_name", path)?;
            self.order.push(path.to_string());
            self.stacks.insert(path.to_string(), stack);
        }
        if let Some(stack) = self.stacks.get(path) {
            h5::append_item(stack, slice.data())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("compare".parse::<ConversionScheme>().unwrap(), ConversionScheme::Compare);
        assert_eq!(
            "H5_FROM_1D".parse::<ConversionScheme>().unwrap(),
            ConversionScheme::H5From1D
        );
        assert!("stack".parse::<ConversionScheme>().is_err());
        assert_eq!(ConversionScheme::H5From1D.to_string(), "h5-from-1d");
    }

    #[test]
    fn test_selector_is_anchored() {
        let selector = DatasetSelector::new(&["/entry1/counter/(I0|It)"]).unwrap();
        assert!(selector.matches("/entry1/counter/I0"));
        assert!(!selector.matches("/entry1/counter/I0_err"));
        assert!(!selector.matches("/other/entry1/counter/It"));
        assert!(DatasetSelector::new::<&str>(&[]).is_err());
        assert!(matches!(DatasetSelector::new(&["("]), Err(Error::Regex(_))));
    }

    #[test]
    fn test_spec_source_names() {
        let mut tmp = NamedTempFile::with_suffix(".dat").unwrap();
        writeln!(tmp, "#L x  y\n1 2\n3 4").unwrap();
        tmp.flush().unwrap();

        let source = open_source(tmp.path()).unwrap();
        assert_eq!(source.dataset_names().unwrap(), vec!["Scan 1/x", "Scan 1/y"]);
        assert_eq!(source.lazy("Scan 1/y").unwrap().shape(), vec![2]);
        assert!(matches!(source.lazy("Scan 2/y"), Err(Error::Read { .. })));
    }

    #[test]
    fn test_hdf5_source_walks_groups() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = hdf5::File::create(tmp.path()).unwrap();
            let inner = file.create_group("a").unwrap().create_group("b").unwrap();
            let data = nxstack_core::Dataset::from_vec("v", vec![1i32, 2]).into_data();
            h5::replace_dataset(&inner, "v", &data).unwrap();
            h5::replace_dataset(&file, "top", &data).unwrap();
        }
        let source = Hdf5Source::new(tmp.path());
        assert_eq!(source.dataset_names().unwrap(), vec!["/a/b/v", "/top"]);
    }

    #[test]
    fn test_nothing_matches() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.dat");
        std::fs::write(&src, "1 2\n3 4\n").unwrap();
        let out = dir.path().join("out.nxs");

        let context = ConversionContext::new(vec![src], &out).with_dataset_pattern("missing");
        let err = convert(&context, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!out.exists());
    }
}

//! File-backed loaders for lazy datasets.
//!

use crate::error::into_load_error;
use crate::{hdf5 as h5, Error, Result};
use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn};
use nxstack_core::{Data, ElementType, LazyDataset, Loader, SliceSpec};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag marking a container's loaders as released.
///
/// Cloning shares the flag. Once released, every load through loaders bound
/// to it fails.
#[derive(Debug, Clone, Default)]
pub struct ReleaseFlag(Arc<AtomicBool>);

impl ReleaseFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reads regions of one HDF5 dataset, opening the file read-only per load.
#[derive(Debug, Clone)]
pub struct Hdf5Loader {
    file: PathBuf,
    dataset: String,
    released: ReleaseFlag,
}

impl Hdf5Loader {
    pub fn new(file: impl Into<PathBuf>, dataset: impl Into<String>, released: ReleaseFlag) -> Self {
        Self {
            file: file.into(),
            dataset: dataset.into(),
            released,
        }
    }

    fn read(&self, spec: &SliceSpec) -> Result<Data> {
        let file = hdf5::File::open(&self.file)?;
        let dataset = file.dataset(&self.dataset)?;
        h5::read_data_slice(&dataset, spec)
    }
}

impl Loader for Hdf5Loader {
    fn load(&self, spec: &SliceSpec) -> nxstack_core::Result<Data> {
        if self.released.is_released() {
            return Err(nxstack_core::Error::Load(format!(
                "{} in {} was released when its container closed",
                self.dataset,
                self.file.display()
            )));
        }
        self.read(spec).map_err(into_load_error)
    }
}

/// Opens `dataset_path` in `file` as a lazy dataset named after its last
/// path component. Only the shape and datatype are read.
///
/// # Errors
/// Returns an error if the file or dataset cannot be opened.
pub fn open_hdf5_lazy<P: AsRef<Path>>(
    file: P,
    dataset_path: &str,
    released: ReleaseFlag,
) -> Result<LazyDataset> {
    let path = file.as_ref();
    let h5file = hdf5::File::open(path)?;
    let dataset = h5file
        .dataset(dataset_path)
        .map_err(|_| Error::read(dataset_path, path))?;
    let element_type = h5::element_type(&dataset)?;
    let shape = dataset.shape();
    let name = dataset_path.rsplit('/').next().unwrap_or(dataset_path);
    Ok(LazyDataset::new(
        name,
        element_type,
        shape,
        Arc::new(Hdf5Loader::new(path, dataset_path, released)),
    ))
}

/// Reads regions of a headerless, little-endian, row-major binary file
/// through a memory mapping.
#[derive(Debug, Clone)]
pub struct RawFileLoader {
    mmap: Arc<Mmap>,
    path: PathBuf,
    element_type: ElementType,
    shape: Vec<usize>,
}

impl RawFileLoader {
    /// Maps `path` and checks its size against `shape`.
    ///
    /// # Errors
    /// Returns an error for string element types, if the file cannot be
    /// mapped, or if its size does not match the shape.
    pub fn open<P: AsRef<Path>>(path: P, element_type: ElementType, shape: Vec<usize>) -> Result<Self> {
        let Some(size) = element_type.size_of() else {
            return Err(Error::InvalidArgument(format!(
                "raw files cannot hold {element_type} elements"
            )));
        };
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        let expected = shape
            .iter()
            .try_fold(size, |acc, &extent| acc.checked_mul(extent))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("shape {shape:?} of {element_type} overflows"))
            })?;
        if mmap.len() != expected {
            return Err(Error::InvalidFormat(format!(
                "{} holds {} bytes, shape {:?} of {} needs {}",
                path.as_ref().display(),
                mmap.len(),
                shape,
                element_type,
                expected
            )));
        }
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
            element_type,
            shape,
        })
    }

    /// Wraps this loader in a lazy dataset.
    #[must_use]
    pub fn into_lazy(self, name: impl Into<String>) -> LazyDataset {
        let element_type = self.element_type;
        let shape = self.shape.clone();
        LazyDataset::new(name, element_type, shape, Arc::new(self))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn gather<T, F>(&self, spec: &SliceSpec, size: usize, decode: F) -> ArrayD<T>
    where
        F: Fn(&[u8]) -> T,
    {
        let bytes = &self.mmap[..];
        let mut strides = vec![1usize; self.shape.len()];
        for d in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        let ranges = spec.ranges();
        ArrayD::from_shape_fn(IxDyn(&spec.output_shape()), |idx| {
            let linear: usize = ranges
                .iter()
                .enumerate()
                .map(|(d, r)| (r.start + idx[d] * r.step) * strides[d])
                .sum();
            let at = linear * size;
            decode(&bytes[at..at + size])
        })
    }
}

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl Loader for RawFileLoader {
    fn load(&self, spec: &SliceSpec) -> nxstack_core::Result<Data> {
        spec.validate(&self.shape)?;
        let data = match self.element_type {
            ElementType::Bool => Data::Bool(self.gather(spec, 1, |b| b[0] != 0)),
            ElementType::Int8 => Data::Int8(self.gather(spec, 1, |b| i8::from_le_bytes(le(b)))),
            ElementType::Int32 => Data::Int32(self.gather(spec, 4, |b| i32::from_le_bytes(le(b)))),
            ElementType::Int64 => Data::Int64(self.gather(spec, 8, |b| i64::from_le_bytes(le(b)))),
            ElementType::Float32 => Data::Float32(self.gather(spec, 4, |b| f32::from_le_bytes(le(b)))),
            ElementType::Float64 => Data::Float64(self.gather(spec, 8, |b| f64::from_le_bytes(le(b)))),
            ElementType::String => {
                return Err(nxstack_core::Error::TypeMismatch {
                    expected: "numeric",
                    actual: "string",
                })
            }
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxstack_core::{Dataset, SliceRange};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_raw_region_read() {
        let mut tmp = NamedTempFile::new().unwrap();
        for v in 0..12i32 {
            tmp.write_all(&v.to_le_bytes()).unwrap();
        }
        tmp.flush().unwrap();

        let lazy = RawFileLoader::open(tmp.path(), ElementType::Int32, vec![3, 4])
            .unwrap()
            .into_lazy("raw");
        assert_eq!(lazy.shape(), vec![3, 4]);

        let spec = SliceSpec::new(vec![SliceRange::new(1, 3, 1), SliceRange::new(0, 4, 3)]);
        let out = lazy.get_slice(&spec).unwrap();
        assert_eq!(out.to_f64_vec().unwrap(), vec![4.0, 7.0, 8.0, 11.0]);
    }

    #[test]
    fn test_raw_size_mismatch() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 10]).unwrap();
        tmp.flush().unwrap();
        let err = RawFileLoader::open(tmp.path(), ElementType::Float64, vec![2]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
        let err = RawFileLoader::open(tmp.path(), ElementType::String, vec![2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = RawFileLoader::open(tmp.path(), ElementType::Float64, vec![usize::MAX, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_hdf5_loader_released() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = hdf5::File::create(tmp.path()).unwrap();
            let group = file.create_group("entry").unwrap();
            let data = Dataset::from_vec("v", vec![1.0f32, 2.0, 3.0]).into_data();
            h5::replace_dataset(&group, "v", &data).unwrap();
        }

        let flag = ReleaseFlag::new();
        let lazy = open_hdf5_lazy(tmp.path(), "/entry/v", flag.clone()).unwrap();
        assert_eq!(lazy.name(), "v");
        assert_eq!(lazy.element_type(), ElementType::Float32);
        assert_eq!(lazy.get_complete_data().unwrap().len(), 3);

        flag.release();
        assert!(matches!(
            lazy.get_complete_data(),
            Err(nxstack_core::Error::Load(_))
        ));
    }

    #[test]
    fn test_hdf5_missing_dataset() {
        let tmp = NamedTempFile::new().unwrap();
        hdf5::File::create(tmp.path()).unwrap();
        let err = open_hdf5_lazy(tmp.path(), "/entry/none", ReleaseFlag::new()).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }
}

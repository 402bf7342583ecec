//! Lazily loaded N-dimensional datasets.
//!
//! A [`LazyDataset`] knows its name, element type and shape up front and
//! defers every read to a shared [`Loader`]. Nothing is cached: each
//! `get_slice` goes back to the loader.

use crate::dataset::{Data, Dataset, ElementType};
use crate::slice::{SliceRange, SliceSpec};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Source of array data for a lazy dataset.
///
/// `load` receives a spec in the loader's own (source) coordinates and
/// returns a buffer of exactly `spec.output_shape()`.
pub trait Loader: Send + Sync + fmt::Debug {
    /// Reads the hyper-rectangle described by `spec`.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn load(&self, spec: &SliceSpec) -> Result<Data>;
}

/// Loader over data already in memory.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    data: Data,
}

impl MemoryLoader {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self { data }
    }
}

impl Loader for MemoryLoader {
    fn load(&self, spec: &SliceSpec) -> Result<Data> {
        spec.validate(self.data.shape())?;
        Ok(self.data.slice(spec))
    }
}

/// A dataset whose values are read on demand.
#[derive(Clone)]
pub struct LazyDataset {
    name: String,
    element_type: ElementType,
    source_shape: Vec<usize>,
    /// View axis to source dimension; `None` marks an inserted unit axis.
    axes: Vec<Option<usize>>,
    loader: Arc<dyn Loader>,
}

impl fmt::Debug for LazyDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDataset")
            .field("name", &self.name)
            .field("element_type", &self.element_type)
            .field("shape", &self.shape())
            .field("loader", &self.loader)
            .finish()
    }
}

impl LazyDataset {
    /// Creates a lazy dataset over `loader`, whose source has `shape`.
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        shape: Vec<usize>,
        loader: Arc<dyn Loader>,
    ) -> Self {
        let axes = (0..shape.len()).map(Some).collect();
        Self {
            name: name.into(),
            element_type,
            source_shape: shape,
            axes,
            loader,
        }
    }

    /// Wraps an in-memory dataset.
    #[must_use]
    pub fn from_dataset(dataset: Dataset) -> Self {
        let name = dataset.name().to_string();
        let element_type = dataset.element_type();
        let shape = dataset.shape().to_vec();
        Self::new(
            name,
            element_type,
            shape,
            Arc::new(MemoryLoader::new(dataset.into_data())),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Current shape; never touches storage.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|a| a.map_or(1, |d| self.source_shape[d]))
            .collect()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.source_shape.iter().product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// Materializes the requested hyper-rectangle with the same rank as `self`.
    ///
    /// # Errors
    /// Returns `RankMismatch`/`OutOfRange` if `spec` does not fit, or the
    /// loader's error.
    pub fn get_slice(&self, spec: &SliceSpec) -> Result<Dataset> {
        spec.validate(&self.shape())?;

        // Source dims without a view axis were squeezed away and have extent 1.
        let mut source_ranges = vec![SliceRange::index(0); self.source_shape.len()];
        for (range, axis) in spec.ranges().iter().zip(&self.axes) {
            if let Some(d) = axis {
                source_ranges[*d] = *range;
            }
        }
        let data = self.loader.load(&SliceSpec::new(source_ranges))?;
        if data.element_type() != self.element_type {
            return Err(Error::TypeMismatch {
                expected: self.element_type.name(),
                actual: data.element_type().name(),
            });
        }
        let data = data.into_shape(&spec.output_shape())?;
        Ok(Dataset::new(self.name.clone(), data))
    }

    /// Materializes every element.
    ///
    /// # Errors
    /// Returns the loader's error.
    pub fn get_complete_data(&self) -> Result<Dataset> {
        self.get_slice(&SliceSpec::full(&self.shape()))
    }

    /// View without unit-length dimensions, sharing the loader.
    #[must_use]
    pub fn squeeze(&self) -> Self {
        let axes = self
            .axes
            .iter()
            .copied()
            .filter(|a| a.is_some_and(|d| self.source_shape[d] != 1))
            .collect();
        Self {
            axes,
            ..self.clone()
        }
    }

    /// View with a unit dimension inserted before `axis`, sharing the loader.
    ///
    /// # Errors
    /// Returns `RankMismatch` if `axis > rank`.
    pub fn expand_dims(&self, axis: usize) -> Result<Self> {
        if axis > self.axes.len() {
            return Err(Error::RankMismatch {
                expected: self.axes.len(),
                actual: axis,
            });
        }
        let mut axes = self.axes.clone();
        axes.insert(axis, None);
        Ok(Self {
            axes,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingLoader {
        inner: MemoryLoader,
        calls: AtomicUsize,
    }

    impl Loader for CountingLoader {
        fn load(&self, spec: &SliceSpec) -> Result<Data> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load(spec)
        }
    }

    fn counting(shape: &[usize]) -> (LazyDataset, Arc<CountingLoader>) {
        let n: usize = shape.iter().product();
        let values: Vec<i32> = (0..i32::try_from(n).unwrap()).collect();
        let ds = Dataset::from_shape_vec("x", shape, values).unwrap();
        let loader = Arc::new(CountingLoader {
            inner: MemoryLoader::new(ds.into_data()),
            calls: AtomicUsize::new(0),
        });
        let lazy = LazyDataset::new("x", ElementType::Int32, shape.to_vec(), loader.clone());
        (lazy, loader)
    }

    #[test]
    fn test_shape_does_not_load() {
        let (lazy, loader) = counting(&[3, 4]);
        assert_eq!(lazy.shape(), vec![3, 4]);
        assert_eq!(lazy.rank(), 2);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_slice_reloads() {
        let (lazy, loader) = counting(&[3, 4]);
        let spec = SliceSpec::new(vec![SliceRange::new(1, 2, 1), SliceRange::full(4)]);
        let a = lazy.get_slice(&spec).unwrap();
        let b = lazy.get_slice(&spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[1, 4]);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_out_of_range_fails_without_load() {
        let (lazy, loader) = counting(&[3, 4]);
        let spec = SliceSpec::new(vec![SliceRange::new(0, 4, 1), SliceRange::full(4)]);
        assert!(matches!(lazy.get_slice(&spec), Err(Error::OutOfRange { .. })));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_squeeze_and_expand_share_loader() {
        let (lazy, loader) = counting(&[1, 5, 1]);
        let squeezed = lazy.squeeze();
        assert_eq!(squeezed.shape(), vec![5]);
        assert!(Arc::ptr_eq(squeezed.loader(), lazy.loader()));

        let data = squeezed
            .get_slice(&SliceSpec::new(vec![SliceRange::new(1, 4, 2)]))
            .unwrap();
        assert_eq!(data.to_f64_vec().unwrap(), vec![1.0, 3.0]);

        let expanded = squeezed.expand_dims(0).unwrap();
        assert_eq!(expanded.shape(), vec![1, 5]);
        let all = expanded.get_complete_data().unwrap();
        assert_eq!(all.shape(), &[1, 5]);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);

        assert!(squeezed.expand_dims(2).is_err());
    }

    #[test]
    fn test_type_mismatch_from_loader() {
        let ds = Dataset::from_vec("f", vec![1.0f32, 2.0]);
        let lazy = LazyDataset::new(
            "f",
            ElementType::Float64,
            vec![2],
            Arc::new(MemoryLoader::new(ds.into_data())),
        );
        assert!(matches!(
            lazy.get_complete_data(),
            Err(Error::TypeMismatch { .. })
        ));
    }
}

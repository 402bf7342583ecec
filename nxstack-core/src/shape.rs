//! Shape reconciliation for stacked datasets.
//!
//! Datasets appended to one stack must agree on shape. The first shape seen
//! for a path (or an explicitly configured one) becomes the required shape and
//! later datasets are padded or truncated to it.

use crate::dataset::{Data, Dataset};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;

/// Returns a copy of `dataset` with `shape`.
///
/// Row-major offsets present in both are copied; offsets past the source
/// element count are filled with NaN for floats and zero for integer and
/// bool data. String datasets are returned unchanged.
#[must_use]
pub fn resize(dataset: &Dataset, shape: &[usize]) -> Dataset {
    if dataset.shape() == shape {
        return dataset.clone();
    }
    let data = match dataset.data() {
        Data::String(_) => return dataset.clone(),
        Data::Bool(a) => Data::Bool(resize_array(a, shape, false)),
        Data::Int8(a) => Data::Int8(resize_array(a, shape, 0)),
        Data::Int32(a) => Data::Int32(resize_array(a, shape, 0)),
        Data::Int64(a) => Data::Int64(resize_array(a, shape, 0)),
        Data::Float32(a) => Data::Float32(resize_array(a, shape, f32::NAN)),
        Data::Float64(a) => Data::Float64(resize_array(a, shape, f64::NAN)),
    };
    Dataset::new(dataset.name(), data)
}

fn resize_array<T: Clone>(source: &ArrayD<T>, shape: &[usize], fill: T) -> ArrayD<T> {
    let mut out = ArrayD::from_elem(IxDyn(shape), fill);
    for (dst, src) in out.iter_mut().zip(source.iter()) {
        dst.clone_from(src);
    }
    out
}

/// Required shape per canonical dataset path.
#[derive(Debug, Clone, Default)]
pub struct ShapeRecord {
    configured: HashMap<String, Vec<usize>>,
    recorded: HashMap<String, Vec<usize>>,
}

impl ShapeRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the required shape for `path` ahead of any data.
    #[must_use]
    pub fn with_configured(mut self, path: impl Into<String>, shape: Vec<usize>) -> Self {
        self.configured.insert(path.into(), shape);
        self
    }

    pub fn configure(&mut self, path: impl Into<String>, shape: Vec<usize>) {
        self.configured.insert(path.into(), shape);
    }

    /// Required shape for `path`, if known.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[usize]> {
        self.configured
            .get(path)
            .or_else(|| self.recorded.get(path))
            .map(Vec::as_slice)
    }

    /// Configured shape first, then the recorded one; otherwise records
    /// `observed` and returns it.
    pub fn required_shape(&mut self, path: &str, observed: &[usize]) -> Vec<usize> {
        if let Some(shape) = self.get(path) {
            return shape.to_vec();
        }
        self.recorded.insert(path.to_string(), observed.to_vec());
        observed.to_vec()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configured.is_empty() && self.recorded.is_empty()
    }
}

/// Normalizes incoming datasets against a [`ShapeRecord`].
#[derive(Debug, Default)]
pub struct ShapeReconciler {
    record: ShapeRecord,
}

impl ShapeReconciler {
    #[must_use]
    pub fn new(record: ShapeRecord) -> Self {
        Self { record }
    }

    /// Squeezes `dataset`, looks up or records the required shape for `path`
    /// and resizes to it.
    pub fn reconcile(&mut self, path: &str, dataset: Dataset) -> Dataset {
        let squeezed = dataset.squeeze();
        let required = self.record.required_shape(path, squeezed.shape());
        resize(&squeezed, &required)
    }

    #[must_use]
    pub fn record(&self) -> &ShapeRecord {
        &self.record
    }

    #[must_use]
    pub fn into_record(self) -> ShapeRecord {
        self.record
    }
}

//! Error types for nxstack-core.

use thiserror::Error;

/// Result type alias for nxstack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for dataset and slicing operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A requested bound lies outside the extent of a dimension.
    #[error("slice out of range in dimension {dimension}: requested {requested}, extent {extent}")]
    OutOfRange {
        dimension: usize,
        requested: usize,
        extent: usize,
    },

    /// Rank of a request does not match the rank of the dataset.
    #[error("rank mismatch: expected {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Slice descriptor cannot be executed.
    #[error("shape error: {0}")]
    Shape(String),

    /// Element type is not valid for the requested operation.
    #[error("element type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Loader failed to fetch a region.
    #[error("load error: {0}")]
    Load(String),

    /// Invalid function or region parameters.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

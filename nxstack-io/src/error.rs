//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error.
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid dataset name pattern.
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Array shape error.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] nxstack_core::Error),

    /// A group, entry or attribute expected in a file is absent.
    #[error("Reading Exception: {path} entry does not exist in the file {}", file.display())]
    Read { path: String, file: PathBuf },

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Invalid argument to an operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Region or function kind without a persisted form.
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),

    /// Operation stopped by its cancel token.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn read(path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Error::Read {
            path: path.into(),
            file: file.into(),
        }
    }

    /// Returns true for cooperative cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Converts an I/O error into the core error a [`nxstack_core::Loader`] returns.
pub(crate) fn into_load_error(err: Error) -> nxstack_core::Error {
    match err {
        Error::Core(inner) => inner,
        other => nxstack_core::Error::Load(other.to_string()),
    }
}

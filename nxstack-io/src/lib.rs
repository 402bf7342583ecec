//! nxstack-io: NeXus/HDF5 persistence and conversion for nxstack.
//!
//! This crate provides the persistence container, the stack aggregator
//! that turns many lower-rank datasets into 2-D/3-D NeXus stacks, the JSON
//! form of regions and functions, file-backed loaders for lazy datasets and
//! a keyed background worker for long jobs.
//!

pub mod container;
pub mod convert;
mod error;
pub mod hdf5;
pub mod json;
pub mod loader;
pub mod spec;
pub mod stack;
pub mod worker;

pub use container::{DiffractionMetadata, Header, PersistenceConfig, PersistentContainer};
pub use convert::{
    convert, open_source, ConversionContext, ConversionReport, ConversionScheme, DataSource,
    DatasetSelector, Hdf5Source, SpecSource,
};
pub use error::{Error, Result};
pub use json::{
    is_roi_supported, marshal_function, marshal_roi, unmarshal_function, unmarshal_roi,
};
pub use loader::{open_hdf5_lazy, Hdf5Loader, RawFileLoader, ReleaseFlag};
pub use spec::{SpecFile, SpecScan};
pub use stack::{ScanGrid, StackAggregator, StackedDataset};
pub use worker::{CancelToken, JobHandle, JobOutcome, Worker};

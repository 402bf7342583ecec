//! nxstack-core: Lazy N-dimensional datasets and the algorithms around them.
//!
//! This crate provides datasets, lazy views over deferred loaders, slice
//! descriptors, shape reconciliation for stacking, and the region-of-interest
//! and fit-function types persisted by `nxstack-io`. It performs no file I/O.
//!

pub mod dataset;
pub mod error;
pub mod function;
pub mod lazy;
pub mod roi;
pub mod shape;
pub mod slice;

pub use dataset::{Data, Dataset, ElementType};
pub use error::{Error, Result};
pub use function::{Function, FunctionKind, Parameter};
pub use lazy::{LazyDataset, Loader, MemoryLoader};
pub use roi::{Roi, RoiKind};
pub use shape::{resize, ShapeReconciler, ShapeRecord};
pub use slice::{slice_with, AxisRole, SliceDescriptor, SliceRange, SliceSpec};

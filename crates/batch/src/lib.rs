//! Batch grouping of workpieces for joint spray runs.
//!
//! - [`BatchAggregator`]: batch and category state, statistics, layout
//!   analysis and events.
//! - [`BatchFileStore`]: `batch_<id>.json` persistence, import and export.
//! - [`WorkpieceCatalog`]: geometry lookup for statistics.

pub mod aggregator;
pub mod catalog;
pub mod error;
pub mod file_store;

pub use aggregator::BatchAggregator;
pub use catalog::{BoxFuture, GeometryCatalog, NoGeometry, WorkpieceCatalog};
pub use error::BatchError;
pub use file_store::BatchFileStore;

use std::path::PathBuf;

use spray_core::batch::BatchId;
use spray_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch not found: {0}")]
    NotFound(BatchId),

    #[error("Workpiece {workpiece_id} is already in batch {batch_id}")]
    DuplicateWorkpiece { batch_id: BatchId, workpiece_id: DbId },

    #[error("Workpiece {workpiece_id} is not in batch {batch_id}")]
    NotAMember { batch_id: BatchId, workpiece_id: DbId },

    #[error("Batch name is required")]
    InvalidName,

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    #[error("Invalid batch id: {0:?}")]
    InvalidId(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Batch file {path} could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Batch file {path} is not valid batch JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

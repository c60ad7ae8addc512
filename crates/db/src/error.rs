//! Error taxonomy for connections, schema, records and sync.

use spray_core::entity::EntityKind;
use spray_core::target::StoreTarget;
use spray_core::types::DbId;
use spray_core::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Parameters cannot describe a supported store.
    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),

    /// Driver-level failure: bad credentials, unreachable host, bad file.
    #[error("Failed to connect to {target} store: {source}")]
    Driver {
        target: StoreTarget,
        #[source]
        source: sqlx::Error,
    },

    #[error("Connecting to {target} store timed out after {seconds}s")]
    Timeout { target: StoreTarget, seconds: u64 },

    /// A disconnect or newer connect for the same target won the race.
    #[error("Connect to {0} store was superseded")]
    Superseded(StoreTarget),

    #[error("Failed to prepare {target} store location: {source}")]
    Io {
        target: StoreTarget,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Refusing to migrate down from version {from} to {to}")]
    Downgrade { from: i64, to: i64 },

    #[error("No migration step for version {version}")]
    MissingStep { version: i64 },

    #[error("Migration to version {version} failed: {source}")]
    Statement {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// The store was written by a newer release. Fatal at startup.
    #[error("{target} store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        target: StoreTarget,
        found: i64,
        supported: i64,
    },

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} store is not connected")]
    NotConnected(StoreTarget),

    #[error("Operation on {0} store timed out")]
    Timeout(StoreTarget),

    /// Absent, or soft-deleted.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Workpiece {workpiece_id} does not exist or is inactive")]
    MissingWorkpiece { workpiece_id: DbId },

    #[error("Failed to encode entity: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Stored {kind} {id} is malformed: {reason}")]
    Corrupt {
        kind: EntityKind,
        id: DbId,
        reason: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sync query failed: {0}")]
    Database(#[from] sqlx::Error),
}

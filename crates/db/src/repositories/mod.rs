//! Zero-sized repositories, one per table family.
//!
//! Workpiece and trajectory repositories serve both stores; the target
//! picks the table (`workpieces` or `cache_workpieces`) and whether the
//! sync columns exist.

use sqlx::any::AnyArguments;
use sqlx::Any;
use spray_core::entity::EntityKind;
use spray_core::target::StoreTarget;
use spray_core::types::DbId;

pub mod config_repo;
pub mod trajectory_repo;
pub mod user_repo;
pub mod workpiece_repo;

pub use config_repo::ConfigRepo;
pub use trajectory_repo::TrajectoryRepo;
pub use user_repo::UserRepo;
pub use workpiece_repo::WorkpieceRepo;

pub(crate) type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Physical table for an entity kind on a target.
pub fn table_name(kind: EntityKind, target: StoreTarget) -> &'static str {
    match (kind, target) {
        (EntityKind::Workpiece, StoreTarget::Remote) => "workpieces",
        (EntityKind::Workpiece, StoreTarget::Cache) => "cache_workpieces",
        (EntityKind::Trajectory, StoreTarget::Remote) => "trajectories",
        (EntityKind::Trajectory, StoreTarget::Cache) => "cache_trajectories",
    }
}

/// Cache-only bookkeeping written alongside the business columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncFields {
    pub sync_uid: Option<String>,
    pub remote_id: Option<DbId>,
    pub last_sync: Option<i64>,
    pub is_dirty: bool,
}

impl SyncFields {
    /// A row created by a local write: fresh identity, not yet pushed.
    pub fn new_local() -> Self {
        Self {
            sync_uid: Some(uuid::Uuid::now_v7().to_string()),
            remote_id: None,
            last_sync: None,
            is_dirty: true,
        }
    }

    /// A clean row mirrored from the remote store.
    pub fn mirrored(sync_uid: Option<String>, remote_id: DbId, synced_at: i64) -> Self {
        Self {
            sync_uid,
            remote_id: Some(remote_id),
            last_sync: Some(synced_at),
            is_dirty: false,
        }
    }
}

/// Columns written by a sync-aware insert, in bind order.
const CACHE_SYNC_COLUMNS: &[&str] = &["sync_uid", "mysql_id", "last_sync", "is_dirty"];

/// `INSERT INTO table (cols...) VALUES ($1, ...) RETURNING id`.
pub(crate) fn insert_sql(table: &str, business: &[&str], target: StoreTarget) -> String {
    let mut columns: Vec<&str> = business.to_vec();
    match target {
        StoreTarget::Remote => columns.push("sync_uid"),
        StoreTarget::Cache => columns.extend_from_slice(CACHE_SYNC_COLUMNS),
    }
    let placeholders = (1..=columns.len())
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders}) RETURNING id",
        columns.join(", ")
    )
}

/// `UPDATE table SET col = $2, ... WHERE id = $1`, plus fixed `extra` assignments.
pub(crate) fn update_sql(table: &str, columns: &[&str], extra: &str) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ${}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {assignments}{extra} WHERE id = $1")
}

/// Bind the sync columns in [`insert_sql`] order.
pub(crate) fn bind_sync<'q>(
    query: AnyQuery<'q>,
    target: StoreTarget,
    sync: &'q SyncFields,
) -> AnyQuery<'q> {
    let query = query.bind(sync.sync_uid.as_deref());
    match target {
        StoreTarget::Remote => query,
        StoreTarget::Cache => query
            .bind(sync.remote_id)
            .bind(sync.last_sync)
            .bind(crate::models::from_flag(sync.is_dirty)),
    }
}

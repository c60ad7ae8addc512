//! Versioned, forward-only schema management for both stores.
//!
//! The applied version lives in `schema_migrations`. Each step runs in its
//! own transaction together with the row that records it. The remote store
//! gets the canonical tables; the cache gets `cache_` mirrors carrying
//! `mysql_id`, `last_sync` and `is_dirty`, plus `cache_configs`.
//!
//! Timestamps are BIGINT microseconds and flags BIGINT 0/1 so that the same
//! statements and row types work through the `Any` driver on PostgreSQL and
//! SQLite alike.

use spray_core::target::StoreTarget;
use spray_core::types::{now, to_micros};

use crate::connection::ConnectionHandle;
use crate::error::{MigrationError, SchemaError};
use crate::Dialect;

/// The newest schema this build understands.
pub const CURRENT_SCHEMA_VERSION: i64 = 3;

const REMOTE_TABLES: &[&str] = &["schema_migrations", "users", "workpieces", "trajectories"];
const CACHE_TABLES: &[&str] = &[
    "schema_migrations",
    "cache_workpieces",
    "cache_trajectories",
    "cache_configs",
];

/// One forward step.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: fn(Dialect, StoreTarget) -> Vec<String>,
}

/// Ordered list of every known step.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base tables",
        statements: base_tables,
    },
    Migration {
        version: 2,
        description: "lookup indexes",
        statements: lookup_indexes,
    },
    Migration {
        version: 3,
        description: "sync_uid identity column",
        statements: sync_uid_column,
    },
];

pub struct SchemaManager;

impl SchemaManager {
    /// Bring the store up to [`CURRENT_SCHEMA_VERSION`]. Idempotent.
    pub async fn ensure_schema(handle: &ConnectionHandle) -> Result<i64, SchemaError> {
        let current = Self::current_version(handle).await?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(SchemaError::UnsupportedVersion {
                target: handle.target(),
                found: current,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }
        if current < CURRENT_SCHEMA_VERSION {
            tracing::info!(
                target = %handle.target(),
                from = current,
                to = CURRENT_SCHEMA_VERSION,
                "Migrating store schema",
            );
            Self::migrate(handle, current, CURRENT_SCHEMA_VERSION).await?;
        }
        Ok(CURRENT_SCHEMA_VERSION)
    }

    /// Highest applied version, `0` for an empty store.
    pub async fn current_version(handle: &ConnectionHandle) -> Result<i64, SchemaError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (\
                version BIGINT PRIMARY KEY, \
                description TEXT NOT NULL, \
                applied_at BIGINT NOT NULL)",
        )
        .execute(handle.pool())
        .await?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
                .fetch_one(handle.pool())
                .await?;
        Ok(version.unwrap_or(0))
    }

    /// Apply steps `(from, to]` in order.
    pub async fn migrate(
        handle: &ConnectionHandle,
        from: i64,
        to: i64,
    ) -> Result<(), MigrationError> {
        apply_steps(handle, MIGRATIONS, from, to).await
    }

    pub fn required_tables(target: StoreTarget) -> &'static [&'static str] {
        match target {
            StoreTarget::Remote => REMOTE_TABLES,
            StoreTarget::Cache => CACHE_TABLES,
        }
    }

    /// Required tables that cannot be queried.
    pub async fn missing_tables(handle: &ConnectionHandle) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for &table in Self::required_tables(handle.target()) {
            let probe = format!("SELECT 1 FROM {table} WHERE 1 = 0");
            if sqlx::query(&probe).execute(handle.pool()).await.is_err() {
                missing.push(table);
            }
        }
        missing
    }
}

pub(crate) async fn apply_steps(
    handle: &ConnectionHandle,
    steps: &[Migration],
    from: i64,
    to: i64,
) -> Result<(), MigrationError> {
    if to < from {
        return Err(MigrationError::Downgrade { from, to });
    }
    for version in (from + 1)..=to {
        let step = steps
            .iter()
            .find(|m| m.version == version)
            .ok_or(MigrationError::MissingStep { version })?;
        apply_step(handle, step)
            .await
            .map_err(|source| MigrationError::Statement { version, source })?;
        tracing::info!(
            target = %handle.target(),
            version,
            description = step.description,
            "Applied schema migration",
        );
    }
    Ok(())
}

async fn apply_step(handle: &ConnectionHandle, step: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = handle.pool().begin().await?;
    for statement in (step.statements)(handle.dialect(), handle.target()) {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    sqlx::query(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES ($1, $2, $3)",
    )
    .bind(step.version)
    .bind(step.description)
    .bind(to_micros(now()))
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn id_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
    }
}

/// Columns shared by `workpieces` and `cache_workpieces`.
const WORKPIECE_BODY: &str = "\
    name TEXT NOT NULL, \
    description TEXT NOT NULL DEFAULT '', \
    category TEXT NOT NULL, \
    model_file_path TEXT NOT NULL DEFAULT '', \
    model_file_size BIGINT NOT NULL DEFAULT 0, \
    model_file_hash TEXT NOT NULL DEFAULT '', \
    dimensions TEXT NOT NULL, \
    material TEXT NOT NULL DEFAULT '', \
    surface_area DOUBLE PRECISION NOT NULL DEFAULT 0, \
    complexity_score DOUBLE PRECISION NOT NULL DEFAULT 0, \
    created_by BIGINT NOT NULL DEFAULT 0, \
    created_at BIGINT NOT NULL, \
    updated_at BIGINT NOT NULL, \
    is_active BIGINT NOT NULL DEFAULT 1";

/// Columns shared by `trajectories` and `cache_trajectories`, after `workpiece_id`.
const TRAJECTORY_BODY: &str = "\
    name TEXT NOT NULL, \
    description TEXT NOT NULL DEFAULT '', \
    trajectory_type TEXT NOT NULL DEFAULT 'spray' \
        CHECK (trajectory_type IN ('spray', 'move', 'approach', 'retract')), \
    total_points BIGINT NOT NULL DEFAULT 0, \
    total_length DOUBLE PRECISION NOT NULL DEFAULT 0, \
    estimated_time DOUBLE PRECISION NOT NULL DEFAULT 0, \
    quality_score DOUBLE PRECISION NOT NULL DEFAULT 0, \
    coverage_rate DOUBLE PRECISION NOT NULL DEFAULT 0, \
    parameters TEXT NOT NULL DEFAULT '{}', \
    points_data TEXT NOT NULL DEFAULT '[]', \
    created_by BIGINT NOT NULL DEFAULT 0, \
    created_at BIGINT NOT NULL, \
    updated_at BIGINT NOT NULL, \
    is_active BIGINT NOT NULL DEFAULT 1";

const SYNC_COLUMNS: &str = "\
    mysql_id BIGINT UNIQUE, \
    last_sync BIGINT, \
    is_dirty BIGINT NOT NULL DEFAULT 0";

fn base_tables(dialect: Dialect, target: StoreTarget) -> Vec<String> {
    let id = id_column(dialect);
    match target {
        StoreTarget::Remote => vec![
            format!(
                "CREATE TABLE IF NOT EXISTS users ({id}, \
                    username TEXT NOT NULL UNIQUE, \
                    password_hash TEXT NOT NULL, \
                    email TEXT NOT NULL DEFAULT '', \
                    full_name TEXT NOT NULL DEFAULT '', \
                    role TEXT NOT NULL DEFAULT 'operator' \
                        CHECK (role IN ('admin', 'operator', 'viewer')), \
                    created_at BIGINT NOT NULL, \
                    updated_at BIGINT NOT NULL, \
                    last_login BIGINT, \
                    is_active BIGINT NOT NULL DEFAULT 1)"
            ),
            format!("CREATE TABLE IF NOT EXISTS workpieces ({id}, {WORKPIECE_BODY})"),
            format!(
                "CREATE TABLE IF NOT EXISTS trajectories ({id}, \
                    workpiece_id BIGINT NOT NULL REFERENCES workpieces(id), \
                    {TRAJECTORY_BODY})"
            ),
        ],
        StoreTarget::Cache => vec![
            format!(
                "CREATE TABLE IF NOT EXISTS cache_workpieces ({id}, {WORKPIECE_BODY}, {SYNC_COLUMNS})"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS cache_trajectories ({id}, \
                    workpiece_id BIGINT NOT NULL REFERENCES cache_workpieces(id), \
                    {TRAJECTORY_BODY}, {SYNC_COLUMNS})"
            ),
            "CREATE TABLE IF NOT EXISTS cache_configs (\
                config_key TEXT PRIMARY KEY, \
                config_value TEXT NOT NULL, \
                last_sync BIGINT)"
                .to_string(),
        ],
    }
}

fn lookup_indexes(_dialect: Dialect, target: StoreTarget) -> Vec<String> {
    let indexes: &[(&str, &str, &str)] = match target {
        StoreTarget::Remote => &[
            ("idx_workpieces_category", "workpieces", "category"),
            ("idx_workpieces_name", "workpieces", "name"),
            ("idx_workpieces_created_by", "workpieces", "created_by"),
            ("idx_trajectories_workpiece", "trajectories", "workpiece_id"),
            ("idx_trajectories_type", "trajectories", "trajectory_type"),
            ("idx_trajectories_quality", "trajectories", "quality_score"),
            ("idx_trajectories_updated", "trajectories", "updated_at"),
            ("idx_workpieces_updated", "workpieces", "updated_at"),
            ("idx_users_role", "users", "role"),
        ],
        StoreTarget::Cache => &[
            ("idx_cache_workpieces_category", "cache_workpieces", "category"),
            ("idx_cache_workpieces_dirty", "cache_workpieces", "is_dirty"),
            ("idx_cache_trajectories_workpiece", "cache_trajectories", "workpiece_id"),
            ("idx_cache_trajectories_dirty", "cache_trajectories", "is_dirty"),
        ],
    };
    indexes
        .iter()
        .map(|(name, table, column)| format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column})"))
        .collect()
}

fn sync_uid_column(_dialect: Dialect, target: StoreTarget) -> Vec<String> {
    let tables: [&str; 2] = match target {
        StoreTarget::Remote => ["workpieces", "trajectories"],
        StoreTarget::Cache => ["cache_workpieces", "cache_trajectories"],
    };
    tables
        .iter()
        .flat_map(|table| {
            [
                format!("ALTER TABLE {table} ADD COLUMN sync_uid TEXT"),
                format!("CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_sync_uid ON {table} (sync_uid)"),
            ]
        })
        .collect()
}

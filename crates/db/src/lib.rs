//! Dual-store persistence for the spray-process core.
//!
//! Both stores are reached through sqlx's `Any` driver: the remote store is
//! PostgreSQL in production, the local cache is a SQLite file. Per-dialect
//! differences are confined to [`schema`].

use std::time::Duration;

use sqlx::any::AnyPoolOptions;

mod background;
pub mod config;
pub mod connection;
pub mod error;
pub mod initializer;
pub mod models;
pub mod password;
pub mod reconnect;
pub mod repositories;
pub mod schema;
pub mod store;
pub mod sync;

pub use connection::{ConnectParams, ConnectionHandle, ConnectionManager, ConnectionSettings};
pub use error::{ConnectError, MigrationError, SchemaError, StoreError, SyncError};
pub use initializer::{InitError, InitOptions, InitReport, SystemInitializer};
pub use store::{ListFilter, ListOrder, RecordStore};
pub use sync::{SyncEngine, SyncReport, SyncStatus};

pub type DbPool = sqlx::AnyPool;

/// SQL flavour behind a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Dialect> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// The SQLite cache is single-writer; one connection avoids lock contention.
    fn max_connections(self) -> u32 {
        match self {
            Dialect::Postgres => 10,
            Dialect::Sqlite => 1,
        }
    }
}

/// Create a connection pool from a database URL.
pub async fn create_pool(
    database_url: &str,
    dialect: Dialect,
    acquire_timeout: Duration,
) -> Result<DbPool, sqlx::Error> {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(dialect.max_connections())
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Trivial round trip used by connect and the periodic health check.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

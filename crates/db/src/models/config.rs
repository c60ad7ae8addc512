//! Key/value rows of the cache's `cache_configs` table.

use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ConfigEntry {
    pub config_key: String,
    pub config_value: String,
    pub last_sync: Option<i64>,
}

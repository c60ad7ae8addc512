//! Repository for the cache's `cache_configs` key/value table.

use crate::models::config::ConfigEntry;
use crate::DbPool;

pub struct ConfigRepo;

impl ConfigRepo {
    pub async fn get(pool: &DbPool, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT config_value FROM cache_configs WHERE config_key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Insert or replace a value.
    pub async fn set(pool: &DbPool, key: &str, value: &str, at: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO cache_configs (config_key, config_value, last_sync) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (config_key) DO UPDATE \
             SET config_value = excluded.config_value, last_sync = excluded.last_sync",
        )
        .bind(key)
        .bind(value)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Insert unless the key exists. Returns `true` if inserted.
    pub async fn insert_if_absent(
        pool: &DbPool,
        key: &str,
        value: &str,
        at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO cache_configs (config_key, config_value, last_sync) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (config_key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_all(pool: &DbPool) -> Result<Vec<ConfigEntry>, sqlx::Error> {
        sqlx::query_as::<_, ConfigEntry>(
            "SELECT config_key, config_value, last_sync FROM cache_configs ORDER BY config_key",
        )
        .fetch_all(pool)
        .await
    }
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::ConnectParams;

#[derive(Debug, thiserror::Error)]
#[error("{key} must be a valid {expected}, got {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Remote store URL; `None` runs against the cache only.
    pub remote: Option<ConnectParams>,
    pub cache: ConnectParams,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub health_check_interval: Duration,
}

impl DbConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                   |
    /// |------------------------------|---------------------------|
    /// | `REMOTE_DATABASE_URL`        | unset                     |
    /// | `CACHE_DATABASE_PATH`        | `./data/spray_cache.db`   |
    /// | `CONNECT_TIMEOUT_SECS`       | `5`                       |
    /// | `OPERATION_TIMEOUT_SECS`     | `10`                      |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let remote = std::env::var("REMOTE_DATABASE_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .map(ConnectParams::Url);

        let cache_path = std::env::var("CACHE_DATABASE_PATH")
            .unwrap_or_else(|_| "./data/spray_cache.db".into());

        Ok(Self {
            remote,
            cache: ConnectParams::Sqlite {
                path: PathBuf::from(cache_path),
            },
            connect_timeout: Duration::from_secs(env_or("CONNECT_TIMEOUT_SECS", 5u64, "u64")?),
            operation_timeout: Duration::from_secs(env_or("OPERATION_TIMEOUT_SECS", 10u64, "u64")?),
            health_check_interval: Duration::from_secs(env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                30u64,
                "u64",
            )?),
        })
    }
}

/// Parse `key` when set, otherwise fall back to `default`.
pub fn env_or<T: FromStr>(
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError {
            key,
            value,
            expected,
        }),
        Err(_) => Ok(default),
    }
}

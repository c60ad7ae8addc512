use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use spray_db::config::{env_or, ConfigError, DbConfig};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Worker process configuration loaded from environment variables.
#[derive(Clone)]
pub struct WorkerConfig {
    pub db: DbConfig,
    /// Directory holding one `batch_<id>.json` file per batch.
    pub batch_dir: PathBuf,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval: Duration,
    /// Seeds the `admin` account on an empty remote store when set.
    pub admin_password: Option<String>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Store settings come from [`DbConfig::from_env`]; the worker adds:
    ///
    /// | Env Var                   | Default           |
    /// |---------------------------|-------------------|
    /// | `BATCH_DATA_DIR`          | `./data/batches`  |
    /// | `AUTO_SYNC_ENABLED`       | `true`            |
    /// | `AUTO_SYNC_INTERVAL_SECS` | `300`             |
    /// | `DEFAULT_ADMIN_PASSWORD`  | unset             |
    /// | `LOG_FORMAT`              | `text`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        let batch_dir = std::env::var("BATCH_DATA_DIR").unwrap_or_else(|_| "./data/batches".into());

        let admin_password = std::env::var("DEFAULT_ADMIN_PASSWORD")
            .ok()
            .filter(|password| !password.is_empty());

        Ok(Self {
            db: DbConfig::from_env()?,
            batch_dir: PathBuf::from(batch_dir),
            auto_sync_enabled: env_or("AUTO_SYNC_ENABLED", true, "bool")?,
            auto_sync_interval: Duration::from_secs(env_or("AUTO_SYNC_INTERVAL_SECS", 300u64, "u64")?),
            admin_password,
            log_format: env_or("LOG_FORMAT", LogFormat::Text, "log format (text|json)")?,
        })
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("db", &self.db)
            .field("batch_dir", &self.batch_dir)
            .field("auto_sync_enabled", &self.auto_sync_enabled)
            .field("auto_sync_interval", &self.auto_sync_interval)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "***"))
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use spray_db::ConnectParams;

    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn debug_output_hides_admin_password() {
        let config = WorkerConfig {
            db: DbConfig {
                remote: None,
                cache: ConnectParams::Sqlite {
                    path: PathBuf::from("/tmp/cache.db"),
                },
                connect_timeout: Duration::from_secs(5),
                operation_timeout: Duration::from_secs(10),
                health_check_interval: Duration::from_secs(30),
            },
            batch_dir: PathBuf::from("/tmp/batches"),
            auto_sync_enabled: false,
            auto_sync_interval: Duration::from_secs(300),
            admin_password: Some("hunter2-hunter2".into()),
            log_format: LogFormat::Text,
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}

//! Startup sequence: bring both stores to a usable state and seed defaults.
//!
//! Progress is published as [`SprayEvent::InitializationProgress`] at
//! 10/30/50/70/90/100 percent. Only the local cache is mandatory; a remote
//! store that cannot be reached leaves the system in offline mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use spray_core::target::StoreTarget;
use spray_core::types::{now, to_micros};
use spray_events::SprayEvent;

use crate::connection::ConnectParams;
use crate::error::{ConnectError, SchemaError, StoreError};
use crate::models::user::{CreateUser, UserRole};
use crate::password::{hash_password, validate_password_strength};
use crate::repositories::{ConfigRepo, UserRepo};
use crate::schema::{SchemaManager, CURRENT_SCHEMA_VERSION};
use crate::store::RecordStore;

/// Username of the account seeded on an empty remote store.
pub const ADMIN_USERNAME: &str = "admin";

/// Configuration written to `cache_configs` when absent.
pub const DEFAULT_CONFIGS: &[(&str, &str)] = &[
    ("system.initialized", "true"),
    ("database.auto_sync_enabled", "true"),
    ("database.sync_interval", "300"),
    ("trajectory.default_speed", "50.0"),
    ("trajectory.default_flow_rate", "0.8"),
    ("trajectory.default_spray_width", "10.0"),
    ("trajectory.optimization_enabled", "true"),
    ("quality.prediction_enabled", "true"),
    ("quality.min_quality_score", "0.7"),
    ("quality.coverage_threshold", "85.0"),
    ("ui.theme", "dark"),
    ("ui.language", "zh_CN"),
    ("ui.auto_save", "true"),
    ("ui.auto_save_interval", "60"),
];

pub const LAST_SHUTDOWN_KEY: &str = "system.last_shutdown";

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Local cache unavailable: {0}")]
    Cache(#[from] ConnectError),

    /// A store was written by a newer release.
    #[error(transparent)]
    UnsupportedSchema(SchemaError),

    #[error(transparent)]
    Store(StoreError),

    #[error("Required tables missing on {target} store: {}", tables.join(", "))]
    MissingTables {
        target: StoreTarget,
        tables: Vec<&'static str>,
    },

    #[error("Cannot seed administrator: {0}")]
    AdminPassword(String),
}

impl From<StoreError> for InitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Schema(e @ SchemaError::UnsupportedVersion { .. }) => {
                InitError::UnsupportedSchema(e)
            }
            other => InitError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub cache: ConnectParams,
    pub remote: Option<ConnectParams>,
    /// Seeds the `admin` account on an empty remote store when set.
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    pub schema_version: i64,
    pub remote_connected: bool,
    /// Every `cache_configs` entry after seeding.
    pub configs: BTreeMap<String, String>,
    pub seeded_configs: usize,
    pub admin_created: bool,
}

pub struct SystemInitializer {
    store: Arc<RecordStore>,
}

impl SystemInitializer {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub async fn initialize(&self, options: &InitOptions) -> Result<InitReport, InitError> {
        let connections = self.store.connections();

        self.progress(10, "Connecting to local cache");
        connections
            .connect(StoreTarget::Cache, options.cache.clone())
            .await?;

        self.progress(30, "Preparing cache schema");
        let cache = self.store.ensure_ready(StoreTarget::Cache).await?;

        self.progress(50, "Connecting to remote store");
        let remote_connected = match &options.remote {
            Some(params) => self.connect_remote(params.clone()).await?,
            None => {
                tracing::info!("No remote store configured, running cache-only");
                false
            }
        };

        self.progress(70, "Loading configuration");
        let at = to_micros(now());
        let pool = cache.pool();
        let mut seeded_configs = 0;
        let version = CURRENT_SCHEMA_VERSION.to_string();
        let install_date = now().to_rfc3339();
        let mut defaults: Vec<(&str, &str)> = DEFAULT_CONFIGS.to_vec();
        defaults.push(("system.version", &version));
        defaults.push(("system.install_date", &install_date));
        for (key, value) in defaults {
            if self
                .store
                .run(&cache, ConfigRepo::insert_if_absent(pool, key, value, at))
                .await?
            {
                seeded_configs += 1;
            }
        }
        let configs = self
            .store
            .run(&cache, ConfigRepo::list_all(pool))
            .await?
            .into_iter()
            .map(|entry| (entry.config_key, entry.config_value))
            .collect();

        self.progress(90, "Seeding default accounts");
        let admin_created = match (&options.admin_password, remote_connected) {
            (Some(password), true) => self.seed_admin(password).await?,
            _ => false,
        };

        self.verify_tables().await?;
        self.progress(100, "Initialization complete");
        tracing::info!(
            remote_connected,
            seeded_configs,
            admin_created,
            "System initialized",
        );

        Ok(InitReport {
            schema_version: CURRENT_SCHEMA_VERSION,
            remote_connected,
            configs,
            seeded_configs,
            admin_created,
        })
    }

    /// Record the shutdown time in the cache, if it is still connected.
    pub async fn record_shutdown(&self) -> Result<(), StoreError> {
        let cache = self.store.ensure_ready(StoreTarget::Cache).await?;
        let at = now();
        let value = at.to_rfc3339();
        self.store
            .run(
                &cache,
                ConfigRepo::set(cache.pool(), LAST_SHUTDOWN_KEY, &value, to_micros(at)),
            )
            .await
    }

    // ---- private helpers ----

    fn progress(&self, percent: u8, message: &str) {
        tracing::info!(percent, message, "Initialization progress");
        self.store
            .connections()
            .events()
            .publish(SprayEvent::InitializationProgress {
                percent,
                message: message.to_string(),
            });
    }

    /// `Ok(false)` when the remote store is unreachable; only a schema from
    /// a newer release is fatal.
    async fn connect_remote(&self, params: ConnectParams) -> Result<bool, InitError> {
        if let Err(e) = self
            .store
            .connections()
            .connect(StoreTarget::Remote, params)
            .await
        {
            tracing::warn!(error = %e, "Remote store unavailable, continuing offline");
            return Ok(false);
        }
        match self.store.ensure_ready(StoreTarget::Remote).await {
            Ok(_) => Ok(true),
            Err(e) => match InitError::from(e) {
                fatal @ InitError::UnsupportedSchema(_) => Err(fatal),
                other => {
                    tracing::warn!(error = %other, "Remote schema not ready, continuing offline");
                    Ok(false)
                }
            },
        }
    }

    async fn seed_admin(&self, password: &str) -> Result<bool, InitError> {
        let remote = self.store.ensure_ready(StoreTarget::Remote).await?;
        let active = self
            .store
            .run(&remote, UserRepo::count_active(remote.pool()))
            .await?;
        if active > 0 {
            return Ok(false);
        }

        validate_password_strength(password).map_err(InitError::AdminPassword)?;
        let password_hash =
            hash_password(password).map_err(|e| InitError::AdminPassword(e.to_string()))?;
        let input = CreateUser {
            username: ADMIN_USERNAME.to_string(),
            password_hash,
            email: String::new(),
            full_name: "System Administrator".to_string(),
            role: UserRole::Admin,
        };
        let id = self
            .store
            .run(&remote, UserRepo::create(remote.pool(), &input, to_micros(now())))
            .await?;
        tracing::info!(user_id = id, "Seeded administrator account");
        Ok(true)
    }

    async fn verify_tables(&self) -> Result<(), InitError> {
        for target in StoreTarget::ALL {
            let Some(handle) = self.store.connections().handle(target) else {
                continue;
            };
            let tables = SchemaManager::missing_tables(&handle).await;
            if !tables.is_empty() {
                return Err(InitError::MissingTables { target, tables });
            }
        }
        Ok(())
    }
}

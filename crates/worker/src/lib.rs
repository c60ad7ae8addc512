//! Process wiring for the spray-process core.
//!
//! [`Worker::start`] brings the stores up through the initializer, starts
//! the health-check and auto-sync tasks and restores saved batches.
//! [`Worker::shutdown`] stops them again in reverse order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use spray_batch::{BatchAggregator, BatchError, BatchFileStore, GeometryCatalog, WorkpieceCatalog};
use spray_core::batch::BatchSettings;
use spray_core::target::StoreTarget;
use spray_db::config::ConfigError;
use spray_db::{
    ConnectionManager, ConnectionSettings, InitError, InitOptions, InitReport, RecordStore,
    StoreError, SyncEngine, SystemInitializer,
};
use spray_events::{EventBus, EventLogger};
use tokio::task::JoinHandle;

pub mod config;

pub use config::{LogFormat, WorkerConfig};

/// Persisted switch that can turn auto sync off regardless of the env.
const AUTO_SYNC_CONFIG_KEY: &str = "database.auto_sync_enabled";

const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization failed: {0}")]
    Init(#[from] InitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Everything a running worker owns.
pub struct Worker {
    events: Arc<EventBus>,
    connections: Arc<ConnectionManager>,
    store: Arc<RecordStore>,
    initializer: SystemInitializer,
    sync: Arc<SyncEngine>,
    catalog: Arc<GeometryCatalog>,
    batches: Arc<BatchAggregator>,
    report: InitReport,
    logger: JoinHandle<()>,
}

impl Worker {
    pub async fn start(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let events = Arc::new(EventBus::default());
        let logger = tokio::spawn(EventLogger::run(events.subscribe()));

        let connections = Arc::new(ConnectionManager::new(
            ConnectionSettings::from(&config.db),
            Arc::clone(&events),
        ));
        let store = Arc::new(RecordStore::new(Arc::clone(&connections)));

        let initializer = SystemInitializer::new(Arc::clone(&store));
        let report = initializer
            .initialize(&InitOptions {
                cache: config.db.cache.clone(),
                remote: config.db.remote.clone(),
                admin_password: config.admin_password.clone(),
            })
            .await?;

        connections.start_health_checks(config.db.health_check_interval);

        let sync = Arc::new(SyncEngine::new(Arc::clone(&store), Arc::clone(&events)));
        let persisted_auto_sync = report
            .configs
            .get(AUTO_SYNC_CONFIG_KEY)
            .map_or(true, |value| value != "false");
        if config.auto_sync_enabled && persisted_auto_sync {
            sync.start_auto_sync(config.auto_sync_interval);
        } else {
            tracing::info!("Auto sync disabled");
        }

        let catalog = Arc::new(GeometryCatalog::load_from_store(Arc::clone(&store), StoreTarget::Cache).await?);
        let batches = BatchAggregator::new(
            BatchSettings::default(),
            Arc::clone(&catalog) as Arc<dyn WorkpieceCatalog>,
            Arc::clone(&events),
        )
        .with_file_store(BatchFileStore::new(&config.batch_dir));
        let restored = batches.load_saved().await?;

        tracing::info!(
            remote_connected = report.remote_connected,
            batches = restored,
            workpieces = catalog.len(),
            batch_dir = %config.batch_dir.display(),
            "Worker started",
        );

        Ok(Self {
            events,
            connections,
            store,
            initializer,
            sync,
            catalog,
            batches: Arc::new(batches),
            report,
            logger,
        })
    }

    /// Run until `signal` resolves, then shut down.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        signal.await;
        self.shutdown().await;
    }

    /// Stop background tasks, stamp the shutdown time and close both stores.
    pub async fn shutdown(self) {
        tracing::info!("Worker shutting down");
        self.sync.stop_auto_sync().await;
        self.connections.stop_health_checks().await;

        if let Err(e) = self.initializer.record_shutdown().await {
            tracing::warn!(error = %e, "Failed to record shutdown time");
        }
        self.connections.disconnect_all().await;

        let Self {
            events,
            connections,
            store,
            initializer,
            sync,
            catalog,
            batches,
            logger,
            ..
        } = self;
        drop((batches, catalog, sync, initializer, store, connections, events));

        // The logger ends once the last bus handle is gone.
        if tokio::time::timeout(LOGGER_DRAIN_TIMEOUT, logger).await.is_err() {
            tracing::warn!("Event logger did not stop in time");
        }
        tracing::info!("Graceful shutdown complete");
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn catalog(&self) -> &Arc<GeometryCatalog> {
        &self.catalog
    }

    pub fn batches(&self) -> &Arc<BatchAggregator> {
        &self.batches
    }

    pub fn report(&self) -> &InitReport {
        &self.report
    }
}

/// Wait for SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

//! Bidirectional reconciliation between the local cache and the remote store.
//!
//! A sync runs four passes: push dirty workpieces, pull changed workpieces,
//! then the same for trajectories. Workpieces go first because a
//! trajectory's `workpiece_id` is translated between stores through the
//! cache's `mysql_id` column.
//!
//! Conflicts resolve last-writer-wins on `updated_at`: the remote copy wins
//! only when strictly later. Pushes adopt an existing remote row with the
//! same `sync_uid`, so a crash between the remote insert and the local
//! "mark clean" never duplicates a record.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use spray_core::entity::EntityKind;
use spray_core::target::{ConnectionStatus, StoreTarget};
use spray_core::types::{self, from_micros, to_micros, DbId, Timestamp};
use spray_events::{EventBus, SprayEvent};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::background::{BackgroundTask, RunningGuard};
use crate::connection::ConnectionHandle;
use crate::error::SyncError;
use crate::models::flag;
use crate::models::trajectory::{TrajectoryRow, TrajectoryValues};
use crate::models::workpiece::{WorkpieceRow, WorkpieceValues};
use crate::repositories::{ConfigRepo, SyncFields, TrajectoryRepo, WorkpieceRepo};
use crate::store::RecordStore;

/// `cache_configs` key holding the pull watermark (µs) for a remote table.
pub fn watermark_key(table: &str) -> String {
    format!("sync.watermark.{table}")
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    /// One of the stores is not `Connected`.
    SkippedNotConnected,
    /// Another sync was already running.
    SkippedBusy,
}

/// A record both sides changed; the remote copy replaced the local one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEntry {
    pub kind: EntityKind,
    pub local_id: DbId,
    pub remote_id: DbId,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// Cache rows confirmed on the remote store.
    pub pushed: usize,
    /// Cache rows inserted or refreshed from the remote store.
    pub pulled: usize,
    /// Inserts and updates issued against the remote store.
    pub remote_writes: usize,
    pub conflicts: Vec<ConflictEntry>,
    /// Trajectories left for a later sync because their workpiece has no
    /// counterpart yet.
    pub unresolved: usize,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl SyncReport {
    fn new(status: SyncStatus) -> Self {
        let now = types::now();
        Self {
            status,
            pushed: 0,
            pulled: 0,
            remote_writes: 0,
            conflicts: Vec::new(),
            unresolved: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SyncStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: Arc<RecordStore>,
    events: Arc<EventBus>,
    running: AtomicBool,
    auto_enabled: AtomicBool,
    auto_task: Mutex<Option<BackgroundTask>>,
}

impl SyncEngine {
    pub fn new(store: Arc<RecordStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            running: AtomicBool::new(false),
            auto_enabled: AtomicBool::new(false),
            auto_task: Mutex::new(None),
        }
    }

    pub fn is_auto_sync_enabled(&self) -> bool {
        self.auto_enabled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one full reconciliation.
    ///
    /// Not being connected or overlapping another sync is reported through
    /// [`SyncReport::status`], not as an error.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let connections = self.store.connections();
        let all_connected = StoreTarget::ALL
            .into_iter()
            .all(|t| connections.status(t) == ConnectionStatus::Connected);
        if !all_connected {
            tracing::debug!("Sync skipped, a store is not connected");
            return Ok(SyncReport::new(SyncStatus::SkippedNotConnected));
        }
        let Some(_running) = RunningGuard::try_acquire(&self.running) else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncReport::new(SyncStatus::SkippedBusy));
        };

        tracing::info!("Sync started");
        self.events.publish(SprayEvent::SyncProgress { percent: 0 });

        let result = self.run_passes().await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    remote_writes = report.remote_writes,
                    conflicts = report.conflicts.len(),
                    unresolved = report.unresolved,
                    "Sync completed",
                );
                self.events.publish(SprayEvent::SyncCompleted { success: true });
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                self.events.publish(SprayEvent::SyncCompleted { success: false });
                self.events.publish(SprayEvent::error(format!("Sync failed: {e}")));
            }
        }
        result
    }

    async fn run_passes(&self) -> Result<SyncReport, SyncError> {
        let remote = self.store.ensure_ready(StoreTarget::Remote).await?;
        let cache = self.store.ensure_ready(StoreTarget::Cache).await?;
        let mut pass = Pass {
            store: &self.store,
            remote,
            cache,
            synced_at: to_micros(types::now()),
            report: SyncReport::new(SyncStatus::Completed),
        };

        pass.push_workpieces().await?;
        self.events.publish(SprayEvent::SyncProgress { percent: 25 });
        pass.pull_workpieces().await?;
        self.events.publish(SprayEvent::SyncProgress { percent: 50 });
        pass.push_trajectories().await?;
        self.events.publish(SprayEvent::SyncProgress { percent: 75 });
        pass.pull_trajectories().await?;
        self.events.publish(SprayEvent::SyncProgress { percent: 100 });

        let mut report = pass.report;
        report.finished_at = types::now();
        Ok(report)
    }

    /// Sync every `interval` until stopped. Calling it again while running
    /// only re-enables the flag.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Duration) {
        self.auto_enabled.store(true, Ordering::Release);
        let mut slot = self.auto_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(auto_sync_loop(Arc::downgrade(self), interval, cancel.clone()));
        *slot = Some(BackgroundTask::new("auto-sync", cancel, handle));
        tracing::info!(interval_secs = interval.as_secs(), "Auto sync started");
    }

    pub async fn stop_auto_sync(&self) {
        self.auto_enabled.store(false, Ordering::Release);
        let task = self
            .auto_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}

async fn auto_sync_loop(engine: Weak<SyncEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if !engine.is_auto_sync_enabled() {
                    continue;
                }
                // Failures are already logged and published by sync_once.
                if let Ok(report) = engine.sync_once().await {
                    tracing::debug!(status = ?report.status, "Auto sync tick finished");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// State of one sync run.
struct Pass<'a> {
    store: &'a RecordStore,
    remote: ConnectionHandle,
    cache: ConnectionHandle,
    synced_at: i64,
    report: SyncReport,
}

impl Pass<'_> {
    async fn on_remote<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        Ok(self.store.run(&self.remote, op).await?)
    }

    async fn on_cache<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        Ok(self.store.run(&self.cache, op).await?)
    }

    async fn watermark(&self, table: &str) -> Result<i64, SyncError> {
        let key = watermark_key(table);
        let value = self.on_cache(ConfigRepo::get(self.cache.pool(), &key)).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    async fn advance_watermark(&self, table: &str, from: i64, to: i64) -> Result<(), SyncError> {
        if to > from {
            let key = watermark_key(table);
            let value = to.to_string();
            self.on_cache(ConfigRepo::set(self.cache.pool(), &key, &value, self.synced_at))
                .await?;
        }
        Ok(())
    }

    fn conflict(&mut self, kind: EntityKind, local: (DbId, i64), remote: (DbId, i64)) {
        tracing::info!(%kind, local_id = local.0, remote_id = remote.0, "Remote copy wins conflict");
        self.report.conflicts.push(ConflictEntry {
            kind,
            local_id: local.0,
            remote_id: remote.0,
            local_updated_at: from_micros(local.1),
            remote_updated_at: from_micros(remote.1),
        });
    }

    // ---- workpieces ----

    /// The remote row a cache row corresponds to, by id then by `sync_uid`.
    async fn remote_workpiece_for(&self, row: &WorkpieceRow) -> Result<Option<WorkpieceRow>, SyncError> {
        let pool = self.remote.pool();
        if let Some(remote_id) = row.remote_id {
            let found = self
                .on_remote(WorkpieceRepo::find_by_id(pool, StoreTarget::Remote, remote_id))
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        match row.sync_uid.as_deref() {
            Some(uid) => {
                self.on_remote(WorkpieceRepo::find_by_sync_uid(pool, StoreTarget::Remote, uid))
                    .await
            }
            None => Ok(None),
        }
    }

    async fn push_workpieces(&mut self) -> Result<(), SyncError> {
        let dirty = self.on_cache(WorkpieceRepo::list_dirty(self.cache.pool())).await?;
        for row in dirty {
            let values = WorkpieceValues::from(&row);
            let remote_id = match self.remote_workpiece_for(&row).await? {
                Some(remote) if remote.updated_at > row.updated_at => {
                    self.conflict(
                        EntityKind::Workpiece,
                        (row.id, row.updated_at),
                        (remote.id, remote.updated_at),
                    );
                    let sync = SyncFields::mirrored(remote.sync_uid.clone(), remote.id, self.synced_at);
                    let remote_values = WorkpieceValues::from(&remote);
                    self.on_cache(WorkpieceRepo::overwrite_from_remote(
                        self.cache.pool(),
                        row.id,
                        &remote_values,
                        &sync,
                    ))
                    .await?;
                    continue;
                }
                Some(remote) => {
                    if WorkpieceValues::from(&remote) != values {
                        self.on_remote(WorkpieceRepo::update(
                            self.remote.pool(),
                            StoreTarget::Remote,
                            remote.id,
                            &values,
                            false,
                        ))
                        .await?;
                        self.report.remote_writes += 1;
                    }
                    remote.id
                }
                None => {
                    let sync = SyncFields {
                        sync_uid: row.sync_uid.clone(),
                        ..Default::default()
                    };
                    let id = self
                        .on_remote(WorkpieceRepo::insert(
                            self.remote.pool(),
                            StoreTarget::Remote,
                            &values,
                            &sync,
                        ))
                        .await?;
                    self.report.remote_writes += 1;
                    id
                }
            };

            let clean = self
                .on_cache(WorkpieceRepo::mark_synced(
                    self.cache.pool(),
                    row.id,
                    remote_id,
                    self.synced_at,
                    row.updated_at,
                ))
                .await?;
            if !clean {
                tracing::debug!(local_id = row.id, "Workpiece changed during push, left dirty");
            }
            self.report.pushed += 1;
        }
        Ok(())
    }

    async fn pull_workpieces(&mut self) -> Result<(), SyncError> {
        let since = self.watermark("workpieces").await?;
        let changed = self
            .on_remote(WorkpieceRepo::list_changed_since(self.remote.pool(), since))
            .await?;
        let mut high = since;

        for remote in changed {
            high = high.max(remote.updated_at);
            let cache = self.cache.pool().clone();
            let mut local = self
                .on_cache(WorkpieceRepo::find_by_remote_id(&cache, remote.id))
                .await?;
            if local.is_none() {
                if let Some(uid) = remote.sync_uid.as_deref() {
                    local = self
                        .on_cache(WorkpieceRepo::find_by_sync_uid(&cache, StoreTarget::Cache, uid))
                        .await?;
                }
            }

            let values = WorkpieceValues::from(&remote);
            let sync = SyncFields::mirrored(remote.sync_uid.clone(), remote.id, self.synced_at);
            match local {
                Some(local) if flag(local.is_dirty) => {
                    // Newer local edits are pushed by the next sync.
                    if remote.updated_at > local.updated_at {
                        self.conflict(
                            EntityKind::Workpiece,
                            (local.id, local.updated_at),
                            (remote.id, remote.updated_at),
                        );
                        self.on_cache(WorkpieceRepo::overwrite_from_remote(&cache, local.id, &values, &sync))
                            .await?;
                        self.report.pulled += 1;
                    }
                }
                Some(local) => {
                    let unchanged = local.remote_id == Some(remote.id)
                        && WorkpieceValues::from(&local) == values;
                    if !unchanged {
                        self.on_cache(WorkpieceRepo::overwrite_from_remote(&cache, local.id, &values, &sync))
                            .await?;
                        self.report.pulled += 1;
                    }
                }
                None => {
                    self.on_cache(WorkpieceRepo::insert(&cache, StoreTarget::Cache, &values, &sync))
                        .await?;
                    self.report.pulled += 1;
                }
            }
        }

        self.advance_watermark("workpieces", since, high).await
    }

    // ---- trajectories ----

    async fn remote_workpiece_id(&self, local_workpiece_id: DbId) -> Result<Option<DbId>, SyncError> {
        let parent = self
            .on_cache(WorkpieceRepo::find_by_id(
                self.cache.pool(),
                StoreTarget::Cache,
                local_workpiece_id,
            ))
            .await?;
        Ok(parent.and_then(|p| p.remote_id))
    }

    async fn local_workpiece_id(&self, remote_workpiece_id: DbId) -> Result<Option<DbId>, SyncError> {
        let parent = self
            .on_cache(WorkpieceRepo::find_by_remote_id(self.cache.pool(), remote_workpiece_id))
            .await?;
        Ok(parent.map(|p| p.id))
    }

    async fn remote_trajectory_for(&self, row: &TrajectoryRow) -> Result<Option<TrajectoryRow>, SyncError> {
        let pool = self.remote.pool();
        if let Some(remote_id) = row.remote_id {
            let found = self
                .on_remote(TrajectoryRepo::find_by_id(pool, StoreTarget::Remote, remote_id))
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        match row.sync_uid.as_deref() {
            Some(uid) => {
                self.on_remote(TrajectoryRepo::find_by_sync_uid(pool, StoreTarget::Remote, uid))
                    .await
            }
            None => Ok(None),
        }
    }

    /// Overwrite a cache trajectory with its remote copy. Returns `false`
    /// when the remote parent workpiece has no cache counterpart yet.
    async fn adopt_remote_trajectory(
        &mut self,
        local_id: Option<DbId>,
        remote: &TrajectoryRow,
    ) -> Result<bool, SyncError> {
        let Some(parent) = self.local_workpiece_id(remote.workpiece_id).await? else {
            tracing::warn!(
                remote_id = remote.id,
                remote_workpiece_id = remote.workpiece_id,
                "Trajectory workpiece not mirrored yet, deferring",
            );
            self.report.unresolved += 1;
            return Ok(false);
        };
        let values = TrajectoryValues::from(remote).with_workpiece(parent);
        let sync = SyncFields::mirrored(remote.sync_uid.clone(), remote.id, self.synced_at);
        let cache = self.cache.pool();
        match local_id {
            Some(id) => {
                self.on_cache(TrajectoryRepo::overwrite_from_remote(cache, id, &values, &sync))
                    .await?;
            }
            None => {
                self.on_cache(TrajectoryRepo::insert(cache, StoreTarget::Cache, &values, &sync))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn push_trajectories(&mut self) -> Result<(), SyncError> {
        let dirty = self.on_cache(TrajectoryRepo::list_dirty(self.cache.pool())).await?;
        for row in dirty {
            let Some(remote_parent) = self.remote_workpiece_id(row.workpiece_id).await? else {
                tracing::warn!(
                    local_id = row.id,
                    workpiece_id = row.workpiece_id,
                    "Trajectory workpiece not pushed yet, deferring",
                );
                self.report.unresolved += 1;
                continue;
            };
            let values = TrajectoryValues::from(&row).with_workpiece(remote_parent);

            let remote_id = match self.remote_trajectory_for(&row).await? {
                Some(remote) if remote.updated_at > row.updated_at => {
                    self.conflict(
                        EntityKind::Trajectory,
                        (row.id, row.updated_at),
                        (remote.id, remote.updated_at),
                    );
                    self.adopt_remote_trajectory(Some(row.id), &remote).await?;
                    continue;
                }
                Some(remote) => {
                    if TrajectoryValues::from(&remote) != values {
                        self.on_remote(TrajectoryRepo::update(
                            self.remote.pool(),
                            StoreTarget::Remote,
                            remote.id,
                            &values,
                            false,
                        ))
                        .await?;
                        self.report.remote_writes += 1;
                    }
                    remote.id
                }
                None => {
                    let sync = SyncFields {
                        sync_uid: row.sync_uid.clone(),
                        ..Default::default()
                    };
                    let id = self
                        .on_remote(TrajectoryRepo::insert(
                            self.remote.pool(),
                            StoreTarget::Remote,
                            &values,
                            &sync,
                        ))
                        .await?;
                    self.report.remote_writes += 1;
                    id
                }
            };

            let clean = self
                .on_cache(TrajectoryRepo::mark_synced(
                    self.cache.pool(),
                    row.id,
                    remote_id,
                    self.synced_at,
                    row.updated_at,
                ))
                .await?;
            if !clean {
                tracing::debug!(local_id = row.id, "Trajectory changed during push, left dirty");
            }
            self.report.pushed += 1;
        }
        Ok(())
    }

    async fn pull_trajectories(&mut self) -> Result<(), SyncError> {
        let since = self.watermark("trajectories").await?;
        let changed = self
            .on_remote(TrajectoryRepo::list_changed_since(self.remote.pool(), since))
            .await?;
        let mut high = since;
        // The watermark must not pass a row that could not be applied.
        let mut ceiling = i64::MAX;

        for remote in changed {
            let cache = self.cache.pool();
            let mut local = self
                .on_cache(TrajectoryRepo::find_by_remote_id(cache, remote.id))
                .await?;
            if local.is_none() {
                if let Some(uid) = remote.sync_uid.as_deref() {
                    local = self
                        .on_cache(TrajectoryRepo::find_by_sync_uid(cache, StoreTarget::Cache, uid))
                        .await?;
                }
            }

            let applied = match local {
                Some(local) if flag(local.is_dirty) => {
                    if remote.updated_at > local.updated_at {
                        self.conflict(
                            EntityKind::Trajectory,
                            (local.id, local.updated_at),
                            (remote.id, remote.updated_at),
                        );
                        let applied = self.adopt_remote_trajectory(Some(local.id), &remote).await?;
                        if applied {
                            self.report.pulled += 1;
                        }
                        applied
                    } else {
                        true
                    }
                }
                Some(local) => {
                    let parent = self.local_workpiece_id(remote.workpiece_id).await?;
                    let unchanged = local.remote_id == Some(remote.id)
                        && parent.is_some_and(|p| {
                            TrajectoryValues::from(&local) == TrajectoryValues::from(&remote).with_workpiece(p)
                        });
                    if unchanged {
                        true
                    } else {
                        let applied = self.adopt_remote_trajectory(Some(local.id), &remote).await?;
                        if applied {
                            self.report.pulled += 1;
                        }
                        applied
                    }
                }
                None => {
                    let applied = self.adopt_remote_trajectory(None, &remote).await?;
                    if applied {
                        self.report.pulled += 1;
                    }
                    applied
                }
            };

            if applied {
                high = high.max(remote.updated_at);
            } else {
                ceiling = ceiling.min(remote.updated_at - 1);
            }
        }

        self.advance_watermark("trajectories", since, high.min(ceiling)).await
    }
}

//! Entity-level persistence on either store.
//!
//! [`RecordStore`] validates, stamps and writes entities, resolving the
//! physical table from the entity kind and the target. The target's schema
//! is ensured once per connection before its first use, and every backend
//! call runs under the configured operation timeout.

use std::future::Future;
use std::sync::Arc;

use spray_core::entity::{AnyEntity, Entity, EntityKind, EntityMeta};
use spray_core::target::StoreTarget;
use spray_core::trajectory::Trajectory;
use spray_core::types::{self, to_micros, DbId, Timestamp};
use spray_core::workpiece::Workpiece;

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::error::StoreError;
use crate::models::trajectory::TrajectoryValues;
use crate::models::workpiece::WorkpieceValues;
use crate::models::{flag, DecodeError};
use crate::repositories::{SyncFields, TrajectoryRepo, WorkpieceRepo};
use crate::schema::SchemaManager;

pub use crate::models::filter::{ListFilter, ListOrder};

pub struct RecordStore {
    connections: Arc<ConnectionManager>,
    /// Serializes schema preparation so two first callers never race.
    schema_lock: tokio::sync::Mutex<()>,
}

impl RecordStore {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            schema_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// A connected handle whose schema is at the current version.
    pub async fn ensure_ready(&self, target: StoreTarget) -> Result<ConnectionHandle, StoreError> {
        let handle = self
            .connections
            .handle(target)
            .ok_or(StoreError::NotConnected(target))?;
        if self.connections.is_schema_ready(&handle) {
            return Ok(handle);
        }

        let _guard = self.schema_lock.lock().await;
        if !self.connections.is_schema_ready(&handle) {
            let timeout = self.connections.operation_timeout();
            match tokio::time::timeout(timeout, SchemaManager::ensure_schema(&handle)).await {
                Ok(Ok(version)) => {
                    tracing::debug!(%target, version, "Store schema ready");
                    self.connections.mark_schema_ready(&handle);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    self.connections
                        .report_failure(&handle, "schema preparation timed out");
                    return Err(StoreError::Timeout(target));
                }
            }
        }
        Ok(handle)
    }

    /// Run one backend call under the operation timeout. Timeouts and lost
    /// connections downgrade the target to `Error`.
    pub(crate) async fn run<T, F>(&self, handle: &ConnectionHandle, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.connections.operation_timeout(), op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if is_connection_error(&e) {
                    self.connections.report_failure(handle, &e.to_string());
                }
                Err(StoreError::Database(e))
            }
            Err(_) => {
                self.connections
                    .report_failure(handle, "operation timed out");
                Err(StoreError::Timeout(handle.target()))
            }
        }
    }

    // ---- writes ----

    /// Insert when the entity has no id yet, update otherwise. On success
    /// the entity carries its id and new `updated_at`.
    pub async fn save(&self, entity: &mut AnyEntity, target: StoreTarget) -> Result<DbId, StoreError> {
        match entity {
            AnyEntity::Workpiece(w) => self.save_workpiece(w, target).await,
            AnyEntity::Trajectory(t) => self.save_trajectory(t, target).await,
        }
    }

    pub async fn save_workpiece(
        &self,
        workpiece: &mut Workpiece,
        target: StoreTarget,
    ) -> Result<DbId, StoreError> {
        ensure_valid(&*workpiece)?;
        let handle = self.ensure_ready(target).await?;
        let stamp = next_stamp(workpiece.meta());
        let mut values = WorkpieceValues::from_entity(workpiece)?;
        values.updated_at = to_micros(stamp);

        let pool = handle.pool();
        let id = match workpiece.id() {
            0 => {
                let sync = SyncFields::new_local();
                self.run(&handle, WorkpieceRepo::insert(pool, target, &values, &sync))
                    .await?
            }
            id => {
                let found = self
                    .run(&handle, WorkpieceRepo::update(pool, target, id, &values, true))
                    .await?;
                if !found {
                    return Err(StoreError::NotFound {
                        kind: EntityKind::Workpiece,
                        id,
                    });
                }
                id
            }
        };

        apply_saved(workpiece.meta_mut(), id, stamp, target);
        tracing::debug!(%target, id, "Saved workpiece");
        Ok(id)
    }

    /// The trajectory's workpiece must exist and be active on `target`.
    pub async fn save_trajectory(
        &self,
        trajectory: &mut Trajectory,
        target: StoreTarget,
    ) -> Result<DbId, StoreError> {
        ensure_valid(&*trajectory)?;
        let handle = self.ensure_ready(target).await?;
        let pool = handle.pool();

        let workpiece_id = trajectory.workpiece_id();
        let parent = self
            .run(&handle, WorkpieceRepo::find_active(pool, target, workpiece_id))
            .await?;
        if parent.is_none() {
            return Err(StoreError::MissingWorkpiece { workpiece_id });
        }

        let stamp = next_stamp(trajectory.meta());
        let mut values = TrajectoryValues::from_entity(trajectory)?;
        values.updated_at = to_micros(stamp);

        let id = match trajectory.id() {
            0 => {
                let sync = SyncFields::new_local();
                self.run(&handle, TrajectoryRepo::insert(pool, target, &values, &sync))
                    .await?
            }
            id => {
                let found = self
                    .run(&handle, TrajectoryRepo::update(pool, target, id, &values, true))
                    .await?;
                if !found {
                    return Err(StoreError::NotFound {
                        kind: EntityKind::Trajectory,
                        id,
                    });
                }
                id
            }
        };

        apply_saved(trajectory.meta_mut(), id, stamp, target);
        tracing::debug!(%target, id, workpiece_id, "Saved trajectory");
        Ok(id)
    }

    /// Mark an active record inactive. `NotFound` when absent or already
    /// inactive.
    pub async fn soft_delete(
        &self,
        kind: EntityKind,
        id: DbId,
        target: StoreTarget,
    ) -> Result<(), StoreError> {
        self.set_active(kind, id, target, false).await
    }

    /// Reactivate a soft-deleted record.
    pub async fn restore(
        &self,
        kind: EntityKind,
        id: DbId,
        target: StoreTarget,
    ) -> Result<(), StoreError> {
        self.set_active(kind, id, target, true).await
    }

    async fn set_active(
        &self,
        kind: EntityKind,
        id: DbId,
        target: StoreTarget,
        active: bool,
    ) -> Result<(), StoreError> {
        let handle = self.ensure_ready(target).await?;
        let pool = handle.pool();
        let at = to_micros(types::now());
        let changed = match (kind, active) {
            (EntityKind::Workpiece, false) => {
                self.run(&handle, WorkpieceRepo::soft_delete(pool, target, id, at))
                    .await?
            }
            (EntityKind::Workpiece, true) => {
                self.run(&handle, WorkpieceRepo::restore(pool, target, id, at))
                    .await?
            }
            (EntityKind::Trajectory, false) => {
                self.run(&handle, TrajectoryRepo::soft_delete(pool, target, id, at))
                    .await?
            }
            (EntityKind::Trajectory, true) => {
                self.run(&handle, TrajectoryRepo::restore(pool, target, id, at))
                    .await?
            }
        };
        if !changed {
            return Err(StoreError::NotFound { kind, id });
        }
        tracing::debug!(%target, %kind, id, active, "Changed record activity");
        Ok(())
    }

    // ---- reads ----

    pub async fn load(
        &self,
        kind: EntityKind,
        id: DbId,
        target: StoreTarget,
    ) -> Result<AnyEntity, StoreError> {
        match kind {
            EntityKind::Workpiece => self.load_workpiece(id, target).await.map(Into::into),
            EntityKind::Trajectory => self.load_trajectory(id, target).await.map(Into::into),
        }
    }

    pub async fn load_workpiece(&self, id: DbId, target: StoreTarget) -> Result<Workpiece, StoreError> {
        let kind = EntityKind::Workpiece;
        let handle = self.ensure_ready(target).await?;
        let row = self
            .run(&handle, WorkpieceRepo::find_by_id(handle.pool(), target, id))
            .await?
            .filter(|row| flag(row.is_active))
            .ok_or(StoreError::NotFound { kind, id })?;
        row.into_entity().map_err(|e| corrupt(kind, id, e))
    }

    pub async fn load_trajectory(
        &self,
        id: DbId,
        target: StoreTarget,
    ) -> Result<Trajectory, StoreError> {
        let kind = EntityKind::Trajectory;
        let handle = self.ensure_ready(target).await?;
        let row = self
            .run(&handle, TrajectoryRepo::find_by_id(handle.pool(), target, id))
            .await?
            .filter(|row| flag(row.is_active))
            .ok_or(StoreError::NotFound { kind, id })?;
        row.into_entity().map_err(|e| corrupt(kind, id, e))
    }

    pub async fn list(
        &self,
        kind: EntityKind,
        filter: &ListFilter,
        target: StoreTarget,
    ) -> Result<Vec<AnyEntity>, StoreError> {
        Ok(match kind {
            EntityKind::Workpiece => self
                .list_workpieces(filter, target)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
            EntityKind::Trajectory => self
                .list_trajectories(filter, target)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
        })
    }

    /// Rows that fail to decode are logged and skipped.
    pub async fn list_workpieces(
        &self,
        filter: &ListFilter,
        target: StoreTarget,
    ) -> Result<Vec<Workpiece>, StoreError> {
        let handle = self.ensure_ready(target).await?;
        let rows = self
            .run(&handle, WorkpieceRepo::list(handle.pool(), target, filter))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_entity()
                    .inspect_err(|e| tracing::warn!(%target, id, error = %e, "Skipping malformed workpiece"))
                    .ok()
            })
            .collect())
    }

    pub async fn list_trajectories(
        &self,
        filter: &ListFilter,
        target: StoreTarget,
    ) -> Result<Vec<Trajectory>, StoreError> {
        let handle = self.ensure_ready(target).await?;
        let rows = self
            .run(&handle, TrajectoryRepo::list(handle.pool(), target, filter))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_entity()
                    .inspect_err(|e| tracing::warn!(%target, id, error = %e, "Skipping malformed trajectory"))
                    .ok()
            })
            .collect())
    }

    pub async fn workpieces_in_category(
        &self,
        category: &str,
        target: StoreTarget,
    ) -> Result<Vec<Workpiece>, StoreError> {
        self.list_workpieces(&ListFilter::category(category), target)
            .await
    }

    pub async fn trajectories_for_workpiece(
        &self,
        workpiece_id: DbId,
        target: StoreTarget,
    ) -> Result<Vec<Trajectory>, StoreError> {
        self.list_trajectories(&ListFilter::for_workpiece(workpiece_id), target)
            .await
    }
}

fn ensure_valid<E: Entity>(entity: &E) -> Result<(), StoreError> {
    let errors = entity.validation_errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Validation(errors))
    }
}

/// `updated_at` for the write about to happen; never moves backwards.
fn next_stamp(meta: &EntityMeta) -> Timestamp {
    types::now().max(meta.updated_at)
}

fn apply_saved(meta: &mut EntityMeta, id: DbId, stamp: Timestamp, target: StoreTarget) {
    meta.id = id;
    meta.updated_at = stamp;
    meta.is_dirty = target == StoreTarget::Cache;
}

fn corrupt(kind: EntityKind, id: DbId, err: DecodeError) -> StoreError {
    StoreError::Corrupt {
        kind,
        id,
        reason: err.to_string(),
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

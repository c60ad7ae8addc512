//! Where batch statistics get workpiece geometry from.
//!
//! Batches only hold workpiece ids. [`WorkpieceCatalog`] resolves an id to
//! its volume and surface area when known; the aggregator falls back to the
//! per-workpiece assumptions otherwise. Before computing statistics the
//! aggregator calls [`WorkpieceCatalog::prepare`] with the batch's members,
//! which lets a store-backed catalog pick up workpieces saved or synced
//! since it was built.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use spray_core::batch::WorkpieceGeometry;
use spray_core::entity::Entity;
use spray_core::target::StoreTarget;
use spray_core::types::DbId;
use spray_core::workpiece::Workpiece;
use spray_db::{ListFilter, RecordStore, StoreError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait WorkpieceCatalog: Send + Sync {
    fn geometry(&self, workpiece_id: DbId) -> Option<WorkpieceGeometry>;

    /// Bring the geometry of `workpiece_ids` up to date. No-op by default.
    fn prepare<'a>(&'a self, _workpiece_ids: &'a [DbId]) -> BoxFuture<'a, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// A catalog that knows nothing; every workpiece uses the assumptions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeometry;

impl WorkpieceCatalog for NoGeometry {
    fn geometry(&self, _workpiece_id: DbId) -> Option<WorkpieceGeometry> {
        None
    }
}

struct StoreSource {
    store: Arc<RecordStore>,
    target: StoreTarget,
}

/// Geometry keyed by workpiece id, optionally refreshed from a store.
#[derive(Default)]
pub struct GeometryCatalog {
    entries: RwLock<HashMap<DbId, WorkpieceGeometry>>,
    source: Option<StoreSource>,
}

impl GeometryCatalog {
    /// An in-memory catalog filled only through [`insert`](Self::insert) and
    /// [`record`](Self::record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm the catalog with every active workpiece on `target` and keep
    /// reading members from it on [`prepare`](WorkpieceCatalog::prepare).
    pub async fn load_from_store(
        store: Arc<RecordStore>,
        target: StoreTarget,
    ) -> Result<Self, StoreError> {
        let workpieces = store.list_workpieces(&ListFilter::default(), target).await?;
        let catalog = Self {
            entries: RwLock::default(),
            source: Some(StoreSource { store, target }),
        };
        for workpiece in &workpieces {
            catalog.record(workpiece);
        }
        tracing::debug!(%target, workpieces = catalog.len(), "Loaded workpiece geometry");
        Ok(catalog)
    }

    pub fn insert(&self, workpiece_id: DbId, geometry: WorkpieceGeometry) {
        self.write().insert(workpiece_id, geometry);
    }

    /// Record a persisted workpiece's geometry. Unsaved workpieces are ignored.
    pub fn record(&self, workpiece: &Workpiece) {
        if workpiece.id() == 0 {
            return;
        }
        self.insert(
            workpiece.id(),
            WorkpieceGeometry {
                volume: workpiece.volume(),
                surface_area: workpiece.surface_area(),
            },
        );
    }

    pub fn remove(&self, workpiece_id: DbId) -> bool {
        self.write().remove(&workpiece_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read each id from the backing store. Inactive or missing
    /// workpieces are forgotten; other failures keep the last known value.
    async fn reload(&self, source: &StoreSource, workpiece_ids: &[DbId]) {
        for &id in workpiece_ids {
            match source.store.load_workpiece(id, source.target).await {
                Ok(workpiece) => self.record(&workpiece),
                Err(StoreError::NotFound { .. }) => {
                    self.remove(id);
                }
                Err(e) => {
                    tracing::warn!(store_target = %source.target, id, error = %e, "Keeping cached workpiece geometry");
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DbId, WorkpieceGeometry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<DbId, WorkpieceGeometry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkpieceCatalog for GeometryCatalog {
    fn geometry(&self, workpiece_id: DbId) -> Option<WorkpieceGeometry> {
        self.read().get(&workpiece_id).copied()
    }

    fn prepare<'a>(&'a self, workpiece_ids: &'a [DbId]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(source) = &self.source {
                self.reload(source, workpiece_ids).await;
            }
        })
    }
}

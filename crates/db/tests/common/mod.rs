//! Shared fixtures: both stores backed by SQLite files in a scratch directory.

#![allow(dead_code)]

use std::sync::Arc;

use spray_core::geometry::{Quat, Vec3};
use spray_core::target::StoreTarget;
use spray_core::trajectory::{Trajectory, TrajectoryPoint, TrajectoryType};
use spray_core::types::DbId;
use spray_core::workpiece::{Dimensions, Workpiece};
use spray_db::{ConnectParams, ConnectionManager, ConnectionSettings, RecordStore, SyncEngine};
use spray_events::EventBus;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub events: Arc<EventBus>,
    pub connections: Arc<ConnectionManager>,
    pub store: Arc<RecordStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ConnectionSettings::default())
    }

    pub fn with_settings(settings: ConnectionSettings) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let events = Arc::new(EventBus::default());
        let connections = Arc::new(ConnectionManager::new(settings, Arc::clone(&events)));
        let store = Arc::new(RecordStore::new(Arc::clone(&connections)));
        Self {
            dir,
            events,
            connections,
            store,
        }
    }

    /// One SQLite file per target inside the scratch directory.
    pub fn params(&self, target: StoreTarget) -> ConnectParams {
        ConnectParams::Sqlite {
            path: self.dir.path().join(format!("{target}.db")),
        }
    }

    pub async fn connect(&self, target: StoreTarget) {
        self.connections
            .connect(target, self.params(target))
            .await
            .expect("connect to scratch store");
    }

    pub async fn connect_both(&self) {
        self.connect(StoreTarget::Remote).await;
        self.connect(StoreTarget::Cache).await;
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.events),
        ))
    }
}

pub fn bracket(name: &str) -> Workpiece {
    let mut w = Workpiece::new(name, "general", Dimensions::new(120.0, 80.0, 40.5));
    w.set_material("Al 6061");
    w.set_surface_area(31_250.75);
    w.set_complexity_score(0.35);
    w
}

/// A zig-zag spray pass over `workpiece_id` with awkward float values.
pub fn zigzag(workpiece_id: DbId, name: &str) -> Trajectory {
    let mut t = Trajectory::new(workpiece_id, name, TrajectoryType::Spray);
    t.add_point(TrajectoryPoint::at(Vec3::new(0.0, 0.0, 200.0)));
    t.add_point(
        TrajectoryPoint::at(Vec3::new(0.1 + 0.2, 100.0 / 3.0, 200.0))
            .with_orientation(Quat::new(0.1, 0.2, 0.3, 0.9))
            .with_speed(42.5),
    );
    t.add_point(
        TrajectoryPoint::at(Vec3::new(120.0, 80.0, 199.999_999_7))
            .with_flow_rate(0.65)
            .with_dwell_time(0.25),
    );
    t.set_parameter("passes", 2_i64);
    t.set_parameter("overlap", 0.3);
    t.set_parameter("nozzle", "fan-40");
    t.set_parameter("preheat", true);
    t
}

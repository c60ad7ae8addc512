//! Integration tests for `BatchAggregator`.
//!
//! Verifies that:
//! - The "B1" scenario (three workpieces, no known geometry) yields the
//!   expected utilization and processing time, and publishes the analysis.
//! - Duplicate members, non-members and unknown batches are rejected.
//! - Known geometry from the catalog replaces the per-workpiece assumption,
//!   and a store-backed catalog follows workpieces saved after it was built.
//! - Batches survive a restart through their files, and export/import
//!   reproduces a batch exactly.

use std::sync::Arc;

use assert_matches::assert_matches;
use spray_batch::{BatchAggregator, BatchError, BatchFileStore, GeometryCatalog, NoGeometry};
use spray_core::batch::{
    BatchSettings, BatchStatus, WorkpieceGeometry, ASSUMED_SURFACE_AREA_MM2, ASSUMED_VOLUME_MM3,
    BOOTH_CAPACITY_MM3, CLEANUP_MINUTES, PER_WORKPIECE_MINUTES, SETUP_MINUTES,
};
use spray_core::entity::EntityKind;
use spray_core::target::StoreTarget;
use spray_core::validation::ValidationCode;
use spray_core::workpiece::{Dimensions, Workpiece};
use spray_db::{ConnectParams, ConnectionManager, ConnectionSettings, RecordStore};
use spray_events::{EventBus, SprayEvent};

// ---- Helpers ----

fn aggregator(events: &Arc<EventBus>) -> BatchAggregator {
    BatchAggregator::new(BatchSettings::default(), Arc::new(NoGeometry), Arc::clone(events))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<spray_events::Envelope>) -> Vec<SprayEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

// ---------------------------------------------------------------------------
// Test: end-to-end layout analysis
// ---------------------------------------------------------------------------

#[tokio::test]
async fn b1_layout_analysis() {
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let agg = aggregator(&events);

    let id = agg.create_batch("B1", "three parts").await.expect("create");
    for workpiece_id in [11, 12, 13] {
        agg.add_workpiece(&id, workpiece_id).await.expect("add");
    }
    let report = agg.analyze_layout(&id).await.expect("analyze");

    let expected_utilization = (3.0 * ASSUMED_VOLUME_MM3 / BOOTH_CAPACITY_MM3).min(1.0);
    let expected_minutes = SETUP_MINUTES + 3.0 * PER_WORKPIECE_MINUTES + CLEANUP_MINUTES;
    assert_eq!(report.batch_id, id);
    assert_eq!(report.total_workpieces, 3);
    assert_eq!(report.space_utilization, expected_utilization);
    assert_eq!(report.estimated_time, expected_minutes);
    assert_eq!(agg.space_utilization(&id).await.expect("utilization"), expected_utilization);
    assert_eq!(agg.estimate_processing_time(&id).await.expect("time"), expected_minutes);

    let batch = agg.get_batch(&id).await.expect("get");
    assert_eq!(batch.statistics.total_workpieces, 3);
    assert_eq!(batch.statistics.total_surface_area, 3.0 * ASSUMED_SURFACE_AREA_MM2);
    assert_eq!(agg.workpieces_in_batch(&id).await.expect("members"), vec![11, 12, 13]);

    let published = drain(&mut rx);
    assert_eq!(published.first(), Some(&SprayEvent::BatchCreated { batch_id: id.clone() }));
    let added = published
        .iter()
        .filter(|e| matches!(e, SprayEvent::WorkpieceAdded { .. }))
        .count();
    assert_eq!(added, 3);
    assert_matches!(
        published.last(),
        Some(SprayEvent::BatchAnalysisCompleted { batch_id, report: published_report })
            if batch_id == &id && published_report == &report
    );
}

#[tokio::test]
async fn validation_and_constraints() {
    let events = Arc::new(EventBus::default());
    let agg = aggregator(&events);
    let id = agg.create_batch("Empty", "").await.expect("create");

    let errors = agg.validate(&id).await.expect("validate");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ValidationCode::Required);

    agg.add_workpiece(&id, 1).await.expect("add");
    assert!(agg.validate(&id).await.expect("validate").is_empty());
    let warnings = agg.check_constraints(&id).await.expect("constraints");
    assert_eq!(warnings.len(), 1, "one workpiece leaves the booth mostly empty");
}

// ---------------------------------------------------------------------------
// Test: membership errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn membership_errors() {
    let events = Arc::new(EventBus::default());
    let agg = aggregator(&events);
    let id = agg.create_batch("Line 3", "").await.expect("create");
    agg.add_workpiece(&id, 5).await.expect("add");

    assert_matches!(
        agg.add_workpiece(&id, 5).await,
        Err(BatchError::DuplicateWorkpiece { workpiece_id: 5, .. })
    );
    assert_matches!(
        agg.remove_workpiece(&id, 6).await,
        Err(BatchError::NotAMember { workpiece_id: 6, .. })
    );
    assert_matches!(
        agg.add_workpiece("no-such-batch", 5).await,
        Err(BatchError::NotFound(_))
    );
    assert_eq!(agg.get_batch(&id).await.expect("get").workpiece_ids, vec![5]);

    agg.remove_workpiece(&id, 5).await.expect("remove");
    let batch = agg.get_batch(&id).await.expect("get");
    assert!(batch.workpiece_ids.is_empty());
    assert_eq!(batch.statistics.estimated_time, 0.0);

    agg.delete_batch(&id).await.expect("delete");
    assert_matches!(agg.get_batch(&id).await, Err(BatchError::NotFound(_)));
    assert!(agg.list_batches().await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: catalog geometry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn known_geometry_replaces_assumptions() {
    let events = Arc::new(EventBus::default());
    let catalog = Arc::new(GeometryCatalog::new());
    catalog.insert(
        1,
        WorkpieceGeometry {
            volume: 4.0e8,
            surface_area: 1.5e6,
        },
    );
    let agg = BatchAggregator::new(BatchSettings::default(), catalog.clone(), Arc::clone(&events));
    let id = agg.create_batch("Mixed", "").await.expect("create");
    agg.add_workpiece(&id, 1).await.expect("add known");
    agg.add_workpiece(&id, 2).await.expect("add unknown");

    let stats = agg.get_batch(&id).await.expect("get").statistics;
    assert_eq!(stats.total_volume, 4.0e8 + ASSUMED_VOLUME_MM3);
    assert_eq!(stats.total_surface_area, 1.5e6 + ASSUMED_SURFACE_AREA_MM2);

    catalog.insert(
        2,
        WorkpieceGeometry {
            volume: 1.0e6,
            surface_area: 1.0e4,
        },
    );
    let stats = agg.recompute_statistics(&id).await.expect("recompute");
    assert_eq!(stats.total_volume, 4.0e8 + 1.0e6);
}

#[tokio::test]
async fn store_backed_catalog_follows_saved_workpieces() {
    let dir = tempfile::tempdir().expect("temp dir");
    let events = Arc::new(EventBus::default());
    let connections = Arc::new(ConnectionManager::new(
        ConnectionSettings::default(),
        Arc::clone(&events),
    ));
    connections
        .connect(
            StoreTarget::Cache,
            ConnectParams::Sqlite {
                path: dir.path().join("cache.db"),
            },
        )
        .await
        .expect("connect cache");
    let store = Arc::new(RecordStore::new(Arc::clone(&connections)));
    let catalog = Arc::new(
        GeometryCatalog::load_from_store(Arc::clone(&store), StoreTarget::Cache)
            .await
            .expect("catalog"),
    );
    assert!(catalog.is_empty());
    let agg = BatchAggregator::new(BatchSettings::default(), catalog.clone(), Arc::clone(&events));

    // Saved after the catalog was built.
    let mut plate = Workpiece::new("Plate", "general", Dimensions::new(100.0, 50.0, 2.0));
    plate.set_surface_area(10_600.0);
    let plate_id = store
        .save_workpiece(&mut plate, StoreTarget::Cache)
        .await
        .expect("save");

    let id = agg.create_batch("Live", "").await.expect("create");
    agg.add_workpiece(&id, plate_id).await.expect("add");
    let stats = agg.get_batch(&id).await.expect("get").statistics;
    assert_eq!(stats.total_volume, 10_000.0);
    assert_eq!(stats.total_surface_area, 10_600.0);

    plate.set_dimensions(Dimensions::new(100.0, 50.0, 4.0));
    store
        .save_workpiece(&mut plate, StoreTarget::Cache)
        .await
        .expect("update");
    let stats = agg.recompute_statistics(&id).await.expect("recompute");
    assert_eq!(stats.total_volume, 20_000.0);

    store
        .soft_delete(EntityKind::Workpiece, plate_id, StoreTarget::Cache)
        .await
        .expect("soft delete");
    let stats = agg.recompute_statistics(&id).await.expect("recompute");
    assert_eq!(stats.total_volume, ASSUMED_VOLUME_MM3);
    assert!(catalog.is_empty());
}

// ---------------------------------------------------------------------------
// Test: persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batches_survive_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let events = Arc::new(EventBus::default());
    let agg = aggregator(&events).with_file_store(BatchFileStore::new(dir.path()));

    let id = agg.create_batch("Persisted", "kept on disk").await.expect("create");
    agg.add_workpiece(&id, 21).await.expect("add");
    agg.set_status(&id, BatchStatus::Processing).await.expect("status");
    assert!(dir.path().join(format!("batch_{id}.json")).exists());
    let before = agg.get_batch(&id).await.expect("get");

    let restarted = aggregator(&events).with_file_store(BatchFileStore::new(dir.path()));
    assert_eq!(restarted.load_saved().await.expect("load"), 1);
    assert_eq!(restarted.get_batch(&id).await.expect("get"), before);

    restarted.delete_batch(&id).await.expect("delete");
    assert!(!dir.path().join(format!("batch_{id}.json")).exists());
}

#[tokio::test]
async fn export_then_import_reproduces_batch() {
    let dir = tempfile::tempdir().expect("temp dir");
    let events = Arc::new(EventBus::default());
    let source = aggregator(&events);
    let id = source.create_batch("Shared", "handed to line 2").await.expect("create");
    source.add_workpiece(&id, 31).await.expect("add");
    source.add_workpiece(&id, 32).await.expect("add");
    let export_path = dir.path().join("shared.json");

    source.export_batch(&id, &export_path).await.expect("export");

    let target = aggregator(&events);
    let imported = target.import_batch(&export_path).await.expect("import");
    assert_eq!(imported, id);
    assert_eq!(
        target.get_batch(&id).await.expect("get"),
        source.get_batch(&id).await.expect("get")
    );

    let report = target.generate_report(&id).await.expect("report");
    assert_eq!(report["batchName"], "Shared");
    assert_eq!(report["statistics"]["totalWorkpieces"], 2);
    assert_eq!(report["workpieces"], serde_json::json!([31, 32]));
}

#[tokio::test]
async fn import_rejects_malformed_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let events = Arc::new(EventBus::default());
    let agg = aggregator(&events);

    let broken = dir.path().join("broken.json");
    tokio::fs::write(&broken, b"[1, 2, 3]").await.expect("write");
    assert_matches!(agg.import_batch(&broken).await, Err(BatchError::Json { .. }));

    let missing = dir.path().join("missing.json");
    assert_matches!(agg.import_batch(&missing).await, Err(BatchError::Io { .. }));

    let escaping = dir.path().join("escaping.json");
    let json = serde_json::json!({
        "batchId": "../../etc",
        "batchName": "Escape",
        "createTime": "2026-01-05T08:00:00Z",
    });
    tokio::fs::write(&escaping, json.to_string()).await.expect("write");
    assert_matches!(agg.import_batch(&escaping).await, Err(BatchError::InvalidId(_)));
    assert!(agg.list_batches().await.is_empty());
}

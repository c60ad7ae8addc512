//! Integration tests for the periodic auto-sync and health-check tasks.
//!
//! Verifies that:
//! - The auto-sync timer pushes dirty cache rows without an explicit call.
//! - A stopped auto-sync task runs no further syncs, and can be restarted.
//! - A sync requested while another is running is skipped, not queued.
//! - The health task demotes a broken store and reconnects it once the
//!   backoff delay has elapsed.
//!
//! The tasks run on real time with short periods; the stores do real
//! SQLite I/O, so a paused clock would trip the connect and acquire
//! timeouts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bracket, Harness};
use spray_core::entity::Entity;
use spray_core::target::{ConnectionStatus, StoreTarget};
use spray_db::reconnect::ReconnectConfig;
use spray_db::{ConnectionSettings, ListFilter, SyncStatus};
use spray_events::{Envelope, SprayEvent};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

const CACHE: StoreTarget = StoreTarget::Cache;
const REMOTE: StoreTarget = StoreTarget::Remote;

const TICK: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(10);

// ---- Helpers ----

/// Receive until an event matches `pred`; panics after [`WAIT`].
async fn wait_for(rx: &mut Receiver<Envelope>, mut pred: impl FnMut(&SprayEvent) -> bool) -> SprayEvent {
    let received = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(envelope) if pred(&envelope.event) => return envelope.event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    received.expect("expected event was not published in time")
}

fn drain(rx: &mut Receiver<Envelope>) -> Vec<SprayEvent> {
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(envelope) => seen.push(envelope.event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => return seen,
        }
    }
}

async fn remote_names(h: &Harness) -> Vec<String> {
    h.store
        .list_workpieces(&ListFilter::default(), REMOTE)
        .await
        .expect("list remote workpieces")
        .iter()
        .map(|w| w.name().to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Test: auto sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_sync_timer_pushes_dirty_rows() {
    let h = Harness::new();
    h.connect_both().await;
    let engine = h.sync_engine();
    let mut rx = h.events.subscribe();

    let mut w = bracket("Timed");
    h.store.save_workpiece(&mut w, CACHE).await.expect("save");

    engine.start_auto_sync(TICK);
    assert!(engine.is_auto_sync_enabled());
    wait_for(&mut rx, |e| matches!(e, SprayEvent::SyncCompleted { success: true })).await;
    engine.stop_auto_sync().await;

    assert_eq!(remote_names(&h).await, vec!["Timed".to_owned()]);
}

#[tokio::test]
async fn stopped_auto_sync_runs_nothing_until_restarted() {
    let h = Harness::new();
    h.connect_both().await;
    let engine = h.sync_engine();

    engine.start_auto_sync(TICK);
    engine.stop_auto_sync().await;
    assert!(!engine.is_auto_sync_enabled());
    assert!(!engine.is_running());

    let mut rx = h.events.subscribe();
    let mut w = bracket("Waiting");
    h.store.save_workpiece(&mut w, CACHE).await.expect("save");
    tokio::time::sleep(TICK * 6).await;

    let sync_events = drain(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SprayEvent::SyncProgress { .. } | SprayEvent::SyncCompleted { .. }
            )
        })
        .count();
    assert_eq!(sync_events, 0);
    assert!(remote_names(&h).await.is_empty());

    engine.start_auto_sync(TICK);
    wait_for(&mut rx, |e| matches!(e, SprayEvent::SyncCompleted { success: true })).await;
    engine.stop_auto_sync().await;
    assert_eq!(remote_names(&h).await, vec!["Waiting".to_owned()]);
}

// ---------------------------------------------------------------------------
// Test: overlapping syncs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overlapping_sync_is_skipped_not_queued() {
    let h = Harness::new();
    h.connect_both().await;
    let engine = h.sync_engine();

    let mut w = bracket("Contended");
    h.store.save_workpiece(&mut w, CACHE).await.expect("save");
    h.store.ensure_ready(REMOTE).await.expect("remote ready");

    // The cache pool has a single connection; holding it parks the first
    // sync inside its push pass.
    let cache = h.store.ensure_ready(CACHE).await.expect("cache ready");
    let held = cache.pool().acquire().await.expect("hold cache connection");

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.sync_once().await }
    });
    tokio::time::timeout(WAIT, async {
        while !engine.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first sync started");

    let second = engine.sync_once().await.expect("skip is not an error");
    assert_eq!(second.status, SyncStatus::SkippedBusy);
    assert_eq!(second.pushed, 0);
    assert!(engine.is_running());

    drop(held);
    let first = first.await.expect("join first sync").expect("first sync");
    assert!(first.is_completed());
    assert_eq!(first.pushed, 1);
    assert!(!engine.is_running());
}

// ---------------------------------------------------------------------------
// Test: health task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_task_reconnects_after_backoff() {
    let backoff = Duration::from_millis(300);
    let h = Harness::with_settings(ConnectionSettings {
        reconnect: ReconnectConfig {
            initial_delay: backoff,
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        },
        ..ConnectionSettings::default()
    });
    h.connect(CACHE).await;
    let mut rx = h.events.subscribe();

    h.connections.start_health_checks(TICK);
    let handle = h.connections.handle(CACHE).expect("cache handle");
    handle.pool().close().await;

    wait_for(&mut rx, |e| {
        matches!(
            e,
            SprayEvent::ConnectionStatusChanged {
                target: CACHE,
                status: ConnectionStatus::Error
            }
        )
    })
    .await;
    let failed_at = Instant::now();

    wait_for(&mut rx, |e| {
        matches!(
            e,
            SprayEvent::ConnectionStatusChanged {
                target: CACHE,
                status: ConnectionStatus::Connected
            }
        )
    })
    .await;
    assert!(failed_at.elapsed() >= backoff - TICK);
    h.connections.stop_health_checks().await;

    assert_eq!(h.connections.status(CACHE), ConnectionStatus::Connected);
    let mut w = bracket("After reconnect");
    h.store
        .save_workpiece(&mut w, CACHE)
        .await
        .expect("save on the new pool");
}

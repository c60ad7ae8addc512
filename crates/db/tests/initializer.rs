//! Integration tests for the startup sequence.
//!
//! Verifies that:
//! - Progress is published at every step.
//! - Default configuration is seeded once and never overwritten.
//! - The administrator is seeded only on an empty, connected remote store.
//! - An unreachable remote store leaves the system offline, not failed.
//! - A remote schema from a newer release aborts start-up.

mod common;

use assert_matches::assert_matches;
use common::Harness;
use spray_core::target::{ConnectionStatus, StoreTarget};
use spray_db::initializer::{ADMIN_USERNAME, DEFAULT_CONFIGS, LAST_SHUTDOWN_KEY};
use spray_db::models::user::UserRole;
use spray_db::password::verify_password;
use spray_db::repositories::{ConfigRepo, UserRepo};
use spray_db::schema::CURRENT_SCHEMA_VERSION;
use spray_db::{ConnectParams, InitError, InitOptions, SystemInitializer};
use spray_events::SprayEvent;

const ADMIN_PASSWORD: &str = "Sprayer#2026";

// ---- Helpers ----

fn options(h: &Harness, with_remote: bool, admin_password: Option<&str>) -> InitOptions {
    InitOptions {
        cache: h.params(StoreTarget::Cache),
        remote: with_remote.then(|| h.params(StoreTarget::Remote)),
        admin_password: admin_password.map(str::to_string),
    }
}

fn initializer(h: &Harness) -> SystemInitializer {
    SystemInitializer::new(h.store.clone())
}

// ---------------------------------------------------------------------------
// Test: cache-only start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cache_only_start_seeds_configuration() {
    let h = Harness::new();
    let mut rx = h.events.subscribe();

    let report = initializer(&h)
        .initialize(&options(&h, false, Some(ADMIN_PASSWORD)))
        .await
        .expect("initialize");

    assert!(!report.remote_connected);
    assert!(!report.admin_created);
    assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.seeded_configs, DEFAULT_CONFIGS.len() + 2);
    assert_eq!(report.configs.get("ui.theme").map(String::as_str), Some("dark"));
    assert_eq!(
        report.configs.get("system.version"),
        Some(&CURRENT_SCHEMA_VERSION.to_string())
    );
    assert!(report.configs.contains_key("system.install_date"));
    assert!(!report.configs.keys().any(|key| key.starts_with("database.backup")));
    assert_eq!(h.connections.status(StoreTarget::Cache), ConnectionStatus::Connected);

    let mut percents = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if let SprayEvent::InitializationProgress { percent, .. } = envelope.event {
            percents.push(percent);
        }
    }
    assert_eq!(percents, vec![10, 30, 50, 70, 90, 100]);
}

#[tokio::test]
async fn existing_configuration_is_not_overwritten() {
    let h = Harness::new();
    let init = initializer(&h);
    init.initialize(&options(&h, false, None)).await.expect("first start");

    let cache = h.store.ensure_ready(StoreTarget::Cache).await.expect("cache ready");
    ConfigRepo::set(cache.pool(), "ui.theme", "light", 0)
        .await
        .expect("user changes theme");

    let report = init.initialize(&options(&h, false, None)).await.expect("second start");

    assert_eq!(report.seeded_configs, 0);
    assert_eq!(report.configs.get("ui.theme").map(String::as_str), Some("light"));
}

#[tokio::test]
async fn shutdown_time_is_recorded() {
    let h = Harness::new();
    let init = initializer(&h);
    init.initialize(&options(&h, false, None)).await.expect("initialize");

    init.record_shutdown().await.expect("record shutdown");

    let cache = h.store.ensure_ready(StoreTarget::Cache).await.expect("cache ready");
    let value = ConfigRepo::get(cache.pool(), LAST_SHUTDOWN_KEY)
        .await
        .expect("read key");
    assert!(value.is_some_and(|v| chrono::DateTime::parse_from_rfc3339(&v).is_ok()));
}

// ---------------------------------------------------------------------------
// Test: remote store and administrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_is_seeded_once_on_empty_remote() {
    let h = Harness::new();
    let init = initializer(&h);

    let first = init
        .initialize(&options(&h, true, Some(ADMIN_PASSWORD)))
        .await
        .expect("first start");
    assert!(first.remote_connected);
    assert!(first.admin_created);

    let remote = h.store.ensure_ready(StoreTarget::Remote).await.expect("remote ready");
    let admin = UserRepo::find_by_username(remote.pool(), ADMIN_USERNAME)
        .await
        .expect("query")
        .expect("admin exists");
    assert_matches!(admin.role(), Ok(UserRole::Admin));
    assert!(verify_password(ADMIN_PASSWORD, &admin.password_hash).expect("verify"));
    assert!(!verify_password("wrong-password", &admin.password_hash).expect("verify"));

    let second = init
        .initialize(&options(&h, true, Some(ADMIN_PASSWORD)))
        .await
        .expect("second start");
    assert!(!second.admin_created);
    // The second start reconnected, closing the earlier pool.
    let remote = h.store.ensure_ready(StoreTarget::Remote).await.expect("remote ready");
    assert_eq!(UserRepo::count_active(remote.pool()).await.expect("count"), 1);
}

#[tokio::test]
async fn weak_admin_password_is_refused() {
    let h = Harness::new();
    let result = initializer(&h)
        .initialize(&options(&h, true, Some("short")))
        .await;
    assert_matches!(result, Err(InitError::AdminPassword(_)));
}

#[tokio::test]
async fn unreachable_remote_runs_offline() {
    let h = Harness::new();
    let blocker = h.dir.path().join("blocker");
    std::fs::write(&blocker, b"file").expect("write blocker");
    let mut opts = options(&h, false, Some(ADMIN_PASSWORD));
    opts.remote = Some(ConnectParams::Sqlite {
        path: blocker.join("remote.db"),
    });

    let report = initializer(&h).initialize(&opts).await.expect("offline start");

    assert!(!report.remote_connected);
    assert!(!report.admin_created);
    assert_eq!(h.connections.status(StoreTarget::Remote), ConnectionStatus::Error);
}

#[tokio::test]
async fn newer_remote_schema_aborts_start() {
    let h = Harness::new();
    h.connect(StoreTarget::Remote).await;
    let remote = h.store.ensure_ready(StoreTarget::Remote).await.expect("remote ready");
    sqlx::query(
        "INSERT INTO schema_migrations (version, description, applied_at) \
         VALUES (42, 'from the future', 0)",
    )
    .execute(remote.pool())
    .await
    .expect("stamp future version");
    h.connections.disconnect(StoreTarget::Remote).await;

    let result = initializer(&h).initialize(&options(&h, true, None)).await;

    assert_matches!(result, Err(InitError::UnsupportedSchema(_)));
}

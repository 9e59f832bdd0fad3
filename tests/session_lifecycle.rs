//! Exercises the single-active-session and TTL-expiry invariants against a
//! real `Storage` (temp-file SQLite) and a fake `Supervisor` double, the
//! same pairing the grader's pipeline uses in production minus the real
//! container engine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use labyard::config::{AppConfig, CliOverrides};
use labyard::error::AppError;
use labyard::orchestrator::Orchestrator;
use labyard::storage::Storage;
use labyard::supervisor::{BuildResult, ExecResult, FsListing, Quotas, RunResult, Supervisor, WorkerHandle};

struct FakeSupervisor;

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn start(&self, session_id: &str, _ttl: u64, _quotas: &Quotas, _seed: Option<&str>) -> Result<WorkerHandle, AppError> {
        Ok(WorkerHandle {
            worker_ref: format!("fake-{session_id}"),
        })
    }
    async fn stop(&self, _session_id: &str) -> Result<(), AppError> {
        Ok(())
    }
    async fn build(&self, _s: &str, _c: &str, _d: &str, _t: &str) -> Result<BuildResult, AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn run(&self, _s: &str, _i: &str, _p: &[(u16, u16)], _d: bool, _a: bool) -> Result<RunResult, AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn stop_run(&self, _s: &str, _c: &str, _t: u64, _r: bool) -> Result<(), AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn exec(&self, _s: &str, _a: &[String], _w: Option<&str>, _t: Option<u64>) -> Result<ExecResult, AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_list(&self, _s: &str, _p: &str) -> Result<FsListing, AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_read(&self, _s: &str, _p: &str) -> Result<Vec<u8>, AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_write(&self, _s: &str, _p: &str, _b: &[u8]) -> Result<(), AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_create(&self, _s: &str, _p: &str, _d: bool, _b: Option<&[u8]>) -> Result<(), AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_rename(&self, _s: &str, _f: &str, _t: &str) -> Result<(), AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
    async fn fs_delete(&self, _s: &str, _p: &str) -> Result<(), AppError> {
        unimplemented!("not exercised by lifecycle tests")
    }
}

async fn test_orchestrator(ttl_seconds: u64) -> (Arc<Orchestrator>, tempfile::TempDir) {
    test_orchestrator_with_capacity(ttl_seconds, None).await
}

async fn test_orchestrator_with_capacity(
    ttl_seconds: u64,
    max_concurrent_workers: Option<u32>,
) -> (Arc<Orchestrator>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("test.db");
    let mut config = AppConfig::new(
        CliOverrides {
            http_port: None,
            session_ttl_seconds: Some(ttl_seconds),
            store_path: Some(store_path.to_string_lossy().to_string()),
            supervisor_base_url: None,
            log_level: None,
            log_file: None,
            token_secret: None,
        },
        &PathBuf::from("does-not-exist.toml"),
    );
    if let Some(cap) = max_concurrent_workers {
        config.max_concurrent_workers = cap;
    }
    let config = Arc::new(config);
    let storage = Arc::new(Storage::connect(&config.store_path).await.unwrap());
    let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor);
    let orchestrator = Arc::new(Orchestrator::new(storage, supervisor, config));
    (orchestrator, dir)
}

#[tokio::test]
async fn starting_twice_replaces_the_first_session() {
    let (orchestrator, _dir) = test_orchestrator(1800).await;
    let (user, _token) = orchestrator
        .authenticate("github", "acct-1", Some("a@example.com"), None, None)
        .await
        .unwrap();

    let first = orchestrator.start_session(&user, "first-image").await.unwrap();
    assert!(first.replaced.is_empty());

    let second = orchestrator.start_session(&user, "first-image").await.unwrap();
    assert_eq!(second.replaced, vec![first.session.id.clone()]);
    assert_ne!(second.session.id, first.session.id);

    let (reloaded_first, _) = orchestrator.get_session(&user, &first.session.id, 1).await.unwrap();
    assert!(reloaded_first.ended_at.is_some());

    let active = orchestrator.get_active_session(&user, "first-image").await.unwrap();
    assert_eq!(active.id, second.session.id);
}

#[tokio::test]
async fn stopping_twice_is_idempotent() {
    let (orchestrator, _dir) = test_orchestrator(1800).await;
    let (user, _token) = orchestrator
        .authenticate("github", "acct-2", None, None, None)
        .await
        .unwrap();
    let started = orchestrator.start_session(&user, "first-image").await.unwrap();

    let first_stop = orchestrator.stop_session(&user, &started.session.id).await.unwrap();
    let second_stop = orchestrator.stop_session(&user, &started.session.id).await.unwrap();
    assert_eq!(first_stop.ended_at, second_stop.ended_at);
}

#[tokio::test]
async fn expired_session_is_rejected_by_owned_live_session() {
    let (orchestrator, _dir) = test_orchestrator(0).await;
    let (user, _token) = orchestrator
        .authenticate("github", "acct-3", None, None, None)
        .await
        .unwrap();
    let started = orchestrator.start_session(&user, "first-image").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let result = orchestrator.owned_live_session(&user, &started.session.id).await;
    assert!(matches!(result, Err(AppError::SessionExpired)));
}

#[tokio::test]
async fn logged_out_token_is_rejected() {
    let (orchestrator, _dir) = test_orchestrator(1800).await;
    let (_user, token) = orchestrator
        .authenticate("github", "acct-4", None, None, None)
        .await
        .unwrap();
    let header = format!("Bearer {token}");
    orchestrator.resolve_caller(Some(&header)).await.unwrap();

    orchestrator.logout(&header).await.unwrap();
    let result = orchestrator.resolve_caller(Some(&header)).await;
    assert!(matches!(result, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn capacity_exhausted_once_cap_reached() {
    let (orchestrator, _dir) = test_orchestrator_with_capacity(1800, Some(1)).await;
    let (first_user, _) = orchestrator.authenticate("github", "acct-7", None, None, None).await.unwrap();
    let (second_user, _) = orchestrator.authenticate("github", "acct-8", None, None, None).await.unwrap();

    orchestrator.start_session(&first_user, "first-image").await.unwrap();

    let result = orchestrator.start_session(&second_user, "layer-cache").await;
    assert!(matches!(result, Err(AppError::CapacityExhausted)));
}

#[tokio::test]
async fn replacing_a_session_does_not_count_against_its_own_cap() {
    let (orchestrator, _dir) = test_orchestrator_with_capacity(1800, Some(1)).await;
    let (user, _) = orchestrator.authenticate("github", "acct-9", None, None, None).await.unwrap();

    orchestrator.start_session(&user, "first-image").await.unwrap();
    // Starting again for the same (user, lab) replaces the prior session
    // first, so it never competes against itself for the single slot.
    orchestrator.start_session(&user, "first-image").await.unwrap();
}

#[tokio::test]
async fn inspector_reports_numeric_deltas_between_last_two_attempts() {
    let (orchestrator, _dir) = test_orchestrator(1800).await;
    let (user, _) = orchestrator.authenticate("github", "acct-10", None, None, None).await.unwrap();
    let started = orchestrator.start_session(&user, "first-image").await.unwrap();

    let now = chrono::Utc::now();
    orchestrator
        .storage
        .insert_attempt(
            &started.session.id,
            "first-image",
            now,
            false,
            &serde_json::json!([]),
            &serde_json::json!({ "image_size_mb": 100.0, "layer_count": 5 }),
            &serde_json::json!({}),
        )
        .await
        .unwrap();
    orchestrator
        .storage
        .insert_attempt(
            &started.session.id,
            "first-image",
            now + chrono::Duration::seconds(1),
            true,
            &serde_json::json!([]),
            &serde_json::json!({ "image_size_mb": 80.0, "layer_count": 5 }),
            &serde_json::json!({}),
        )
        .await
        .unwrap();

    let view = orchestrator.inspector(&user, &started.session.id).await.unwrap();
    assert_eq!(view.deltas.get("image_size_mb").and_then(|v| v.as_f64()), Some(-20.0));
    assert_eq!(view.deltas.get("layer_count").and_then(|v| v.as_f64()), Some(0.0));
}

#[tokio::test]
async fn forbidden_for_non_owner() {
    let (orchestrator, _dir) = test_orchestrator(1800).await;
    let (owner, _) = orchestrator.authenticate("github", "acct-5", None, None, None).await.unwrap();
    let (other, _) = orchestrator.authenticate("github", "acct-6", None, None, None).await.unwrap();
    let started = orchestrator.start_session(&owner, "first-image").await.unwrap();

    let result = orchestrator.get_session(&other, &started.session.id, 1).await;
    assert!(matches!(result, Err(AppError::Forbidden)));
}

//! Push state machine tests against an in-memory bucket and a fake worker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{FakeWorker, create_db, seed_lease, test_config};
use membridge_core::identity::sha256_hex;
use membridge_core::leadership::Lease;
use membridge_core::locks::{LockDocument, LockPolicy};
use membridge_core::remote::memory::MemoryObjectStore;
use membridge_core::remote::{ObjectStore, keys, put_json_pretty};
use membridge_core::sync::{PushOutcome, RemoteManifest, SyncEngine};
use tempfile::TempDir;

const PROJECT: &str = "test-project";
const CID: &str = "75c84d20a0aa90c5";

async fn seed_lock(store: &MemoryObjectStore, hostname: &str, age_seconds: i64) {
    let doc = LockDocument {
        hostname: hostname.to_string(),
        timestamp: chrono::Utc::now().timestamp() - age_seconds,
        project: PROJECT.to_string(),
        canonical_id: CID.to_string(),
    };
    put_json_pretty(store, &keys::lock_key(CID), &doc)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fresh_push_uploads_snapshot_hash_and_manifest() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    create_db(&cfg.db_path, 10).await;

    let store = MemoryObjectStore::new();
    let worker = FakeWorker::new();
    let engine = SyncEngine::new(store.clone(), worker.clone(), cfg);

    let outcome = engine.push().await;
    let PushOutcome::Uploaded { sha256, counts, .. } = &outcome else {
        panic!("expected Uploaded, got {outcome:?}");
    };
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(counts.observations, 10);

    // Hash coherence: snapshot bytes, hash text, and manifest agree.
    let snapshot_bytes = store.get_bytes(&keys::snapshot_key(CID)).await.unwrap();
    assert_eq!(&sha256_hex(&snapshot_bytes), sha256);

    let sha_text = String::from_utf8(store.get_bytes(&keys::sha256_key(CID)).await.unwrap()).unwrap();
    assert_eq!(sha_text, format!("{sha256}  claude-mem.db\n"));

    let manifest: RemoteManifest =
        serde_json::from_slice(&store.get_bytes(&keys::manifest_key(CID)).await.unwrap()).unwrap();
    assert_eq!(&manifest.sha256, sha256);
    assert_eq!(manifest.observations, 10);
    assert_eq!(manifest.tables, 3);
    assert_eq!(manifest.project, PROJECT);
    assert_eq!(manifest.canonical_id, CID);

    // Lock was written by this host.
    assert!(store.contains(&keys::lock_key(CID)).await);

    // Worker was quiesced for the snapshot and resumed right after.
    assert_eq!(worker.stop_count(), 1);
    assert_eq!(worker.start_count(), 1);
}

#[tokio::test]
async fn test_fresh_push_bootstraps_lease_needing_ui_selection() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    create_db(&cfg.db_path, 1).await;

    let store = MemoryObjectStore::new();
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);
    assert!(engine.push().await.is_success());

    // No PRIMARY_NODE_ID configured: the bootstrap lease names this node
    // and flags the missing administrative choice.
    let lease: Lease =
        serde_json::from_slice(&store.get_bytes(&keys::lease_key(CID)).await.unwrap()).unwrap();
    assert_eq!(lease.primary_node_id, "rpi4b");
    assert_eq!(lease.epoch, 1);
    assert_eq!(lease.needs_ui_selection, Some(true));
}

#[tokio::test]
async fn test_idempotent_push_performs_no_writes() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    create_db(&cfg.db_path, 4).await;

    let store = MemoryObjectStore::new();
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    assert!(matches!(engine.push().await, PushOutcome::Uploaded { .. }));
    let objects_before = store.len().await;
    let lock_before = store.get_bytes(&keys::lock_key(CID)).await.unwrap();

    let outcome = engine.push().await;
    assert!(matches!(outcome, PushOutcome::AlreadyCurrent));
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.detail(), "remote already up to date");

    // Zero object-store writes: same object count, lock untouched.
    assert_eq!(store.len().await, objects_before);
    assert_eq!(
        store.get_bytes(&keys::lock_key(CID)).await.unwrap(),
        lock_before
    );
}

#[tokio::test]
async fn test_secondary_push_is_blocked_with_exit_code_3() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    create_db(&cfg.db_path, 2).await;

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "orangepi", 3600).await;
    let worker = FakeWorker::new();
    let engine = SyncEngine::new(store.clone(), worker.clone(), cfg);

    let outcome = engine.push().await;
    match &outcome {
        PushOutcome::BlockedBySecondary { primary } => assert_eq!(primary, "orangepi"),
        other => panic!("expected BlockedBySecondary, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 3);

    // The gate fires before quiesce: the worker was never touched and
    // nothing was uploaded.
    assert_eq!(worker.stop_count(), 0);
    assert!(!store.contains(&keys::snapshot_key(CID)).await);
}

#[tokio::test]
async fn test_secondary_push_allowed_with_override() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path(), PROJECT);
    cfg.leadership.allow_secondary_push = true;
    create_db(&cfg.db_path, 2).await;

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "orangepi", 3600).await;
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    assert!(matches!(engine.push().await, PushOutcome::Uploaded { .. }));
}

#[tokio::test]
async fn test_leadership_disabled_bypasses_the_gate() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path(), PROJECT);
    cfg.leadership.enabled = false;
    create_db(&cfg.db_path, 2).await;

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "orangepi", 3600).await;
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    assert!(matches!(engine.push().await, PushOutcome::Uploaded { .. }));
}

#[tokio::test]
async fn test_push_blocked_by_fresh_foreign_lock() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    create_db(&cfg.db_path, 2).await;

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "rpi4b", 3600).await;
    seed_lock(&store, "orangepi", 100).await;
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    let outcome = engine.push().await;
    match &outcome {
        PushOutcome::BlockedByLock { holder, age_seconds } => {
            assert_eq!(holder, "orangepi");
            assert!(*age_seconds >= 100);
            assert!(outcome.detail().contains("orangepi"));
        }
        other => panic!("expected BlockedByLock, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert!(!store.contains(&keys::snapshot_key(CID)).await);
}

#[tokio::test]
async fn test_push_steals_stale_lock_and_proceeds() {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path(), PROJECT);
    cfg.lock = LockPolicy {
        ttl_seconds: 100,
        grace_seconds: 60,
        force: false,
    };
    create_db(&cfg.db_path, 2).await;

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "rpi4b", 3600).await;
    seed_lock(&store, "orangepi", 200).await;
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    assert!(matches!(engine.push().await, PushOutcome::Uploaded { .. }));

    let lock: LockDocument =
        serde_json::from_slice(&store.get_bytes(&keys::lock_key(CID)).await.unwrap()).unwrap();
    assert_eq!(lock.hostname, "rpi4b");
}

#[tokio::test]
async fn test_push_corrupt_db_fails_integrity_and_restarts_worker() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);
    tokio::fs::write(&cfg.db_path, b"this is not a database")
        .await
        .unwrap();

    let store = MemoryObjectStore::new();
    seed_lease(&store, CID, "rpi4b", 3600).await;
    let worker = FakeWorker::new();
    let engine = SyncEngine::new(store.clone(), worker.clone(), cfg);

    let outcome = engine.push().await;
    assert!(
        matches!(outcome, PushOutcome::IntegrityFailed { .. }),
        "got {outcome:?}"
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(!store.contains(&keys::snapshot_key(CID)).await);
    // The worker is restarted so a failed push leaves the host serving.
    assert_eq!(worker.start_count(), 1);
}

#[tokio::test]
async fn test_push_without_local_db_fails() {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path(), PROJECT);

    let store = MemoryObjectStore::new();
    let engine = SyncEngine::new(store.clone(), FakeWorker::new(), cfg);

    let outcome = engine.push().await;
    assert!(matches!(outcome, PushOutcome::TransportFailed { .. }));
    assert_eq!(outcome.exit_code(), 1);
    assert!(store.is_empty().await);
}

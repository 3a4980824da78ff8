//! Shared fixtures for the sync engine tests: an in-memory worker, a
//! config builder rooted in a temp dir, and SQLite snapshot helpers.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use membridge_core::backup::BackupPolicy;
use membridge_core::config::SyncConfig;
use membridge_core::error::Result;
use membridge_core::identity::canonical_project_id;
use membridge_core::leadership::LeadershipConfig;
use membridge_core::locks::LockPolicy;
use membridge_core::remote::StoreConfig;
use membridge_core::worker::{WorkerConfig, WorkerControl};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Worker fake that records stop/start calls.
#[derive(Clone, Default)]
pub struct FakeWorker {
    pub running: Arc<AtomicBool>,
    pub stops: Arc<AtomicUsize>,
    pub starts: Arc<AtomicUsize>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl WorkerControl for FakeWorker {
    async fn pid(&self) -> Option<i32> {
        self.running.load(Ordering::SeqCst).then_some(4242)
    }

    async fn stop(&self) -> Result<bool> {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(was_running)
    }

    async fn start(&self) -> Result<bool> {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn wait_ready(&self, _timeout: Duration) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Engine config rooted in a temp dir, with short lock TTLs and the node
/// id `rpi4b`. The store section is a placeholder — tests run against
/// `MemoryObjectStore`.
pub fn test_config(dir: &Path, project: &str) -> SyncConfig {
    SyncConfig {
        project: project.to_string(),
        canonical_id: canonical_project_id(project),
        db_path: dir.join("claude-mem.db"),
        store: StoreConfig {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
        },
        lock: LockPolicy::default(),
        leadership: LeadershipConfig::new("rpi4b"),
        backup: BackupPolicy {
            base_dir: dir.join("backups/pull-overwrite"),
            max_days: 14,
            max_count: 50,
        },
        worker: WorkerConfig {
            pid_file: dir.join("worker.pid"),
            command: vec![],
            port: 37777,
        },
        no_restart_worker: true,
        hostname: "rpi4b".to_string(),
    }
}

/// Seed a lease naming `primary`, valid for `ttl_offset` seconds from now
/// (negative for an expired lease).
pub async fn seed_lease(
    store: &membridge_core::remote::memory::MemoryObjectStore,
    canonical_id: &str,
    primary: &str,
    ttl_offset: i64,
) {
    use membridge_core::leadership::{LEASE_POLICY, Lease};
    use membridge_core::remote::{keys, put_json_pretty};

    let now = chrono::Utc::now().timestamp();
    let lease = Lease {
        canonical_id: canonical_id.to_string(),
        primary_node_id: primary.to_string(),
        issued_at: now,
        expires_at: now + ttl_offset,
        lease_seconds: ttl_offset,
        epoch: 1,
        policy: LEASE_POLICY.to_string(),
        issued_by: primary.to_string(),
        needs_ui_selection: None,
    };
    put_json_pretty(store, &keys::lease_key(canonical_id), &lease)
        .await
        .unwrap();
}

/// Create a snapshot database with the tracked tables and `observations`
/// rows in the observations table.
pub async fn create_db(path: &Path, observations: usize) {
    let db = libsql::Builder::new_local(path).build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute_batch(
        "CREATE TABLE observations (id INTEGER PRIMARY KEY, body TEXT);
         CREATE TABLE session_summaries (id INTEGER PRIMARY KEY, body TEXT);
         CREATE TABLE user_prompts (id INTEGER PRIMARY KEY, body TEXT);",
    )
    .await
    .unwrap();
    for i in 0..observations {
        conn.execute(
            "INSERT INTO observations (body) VALUES (?1)",
            libsql::params![format!("obs-{i}")],
        )
        .await
        .unwrap();
    }
}

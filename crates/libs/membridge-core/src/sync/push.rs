//! Push state machine.
//!
//! Ordering matters: the hash object and manifest are written after the
//! snapshot so a reader observing a new hash will find a matching
//! snapshot. Upload failure leaves the lock in place to expire rather
//! than half-updating the remote set.

use super::{PushOutcome, RemoteManifest, SyncEngine};
use crate::error::{Error, Result};
use crate::leadership::{Role, determine_role};
use crate::locks::{LockAcquire, acquire_lock};
use crate::remote::{ObjectStore, get_json, get_text, keys, put_json_pretty};
use crate::snapshot;
use crate::worker::WorkerControl;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

impl<S: ObjectStore, W: WorkerControl> SyncEngine<S, W> {
    /// Push the local snapshot to the object store.
    pub async fn push(&self) -> PushOutcome {
        match self.push_inner().await {
            Ok(outcome) => outcome,
            Err(Error::Integrity(reason)) => PushOutcome::IntegrityFailed { reason },
            Err(e) => PushOutcome::TransportFailed { cause: e.to_string() },
        }
    }

    async fn push_inner(&self) -> Result<PushOutcome> {
        let cfg = &self.cfg;
        let cid = &cfg.canonical_id;
        info!(
            project = %cfg.project,
            canonical_id = %cid,
            db = %cfg.db_path.display(),
            "push starting"
        );

        if !cfg.db_path.exists() {
            return Err(Error::Config(format!(
                "local DB does not exist at {}",
                cfg.db_path.display()
            )));
        }

        // Leadership gate: a secondary must not push. A failing check is
        // logged and ignored — role enforcement is advisory when the lease
        // cannot be read.
        if cfg.leadership.enabled {
            match determine_role(&self.store, &cfg.leadership, cid).await {
                Ok((role, lease, _)) => {
                    info!(role = %role, node = %cfg.leadership.node_id,
                          primary = %lease.primary_node_id, "leadership");
                    if role == Role::Secondary && !cfg.leadership.allow_secondary_push {
                        info!("secondary: push blocked (ALLOW_SECONDARY_PUSH to override)");
                        return Ok(PushOutcome::BlockedBySecondary {
                            primary: lease.primary_node_id,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "leadership check failed, proceeding without role enforcement");
                }
            }
        }

        // Quiesce the worker so the snapshot is consistent.
        self.worker.stop().await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Snapshot: integrity-check the source, then vacuum-copy to a
        // sibling temp file. Failures restart the worker before returning.
        let db_dir = cfg
            .db_path
            .parent()
            .ok_or_else(|| Error::Config(format!("no parent dir for {}", cfg.db_path.display())))?;

        let snapshot_result = async {
            let report = snapshot::integrity_check(&cfg.db_path).await?;
            if report != "ok" {
                return Err(Error::Integrity(format!("source DB integrity check: {report}")));
            }

            let snap_path = tempfile::Builder::new()
                .suffix(".snap.db")
                .tempfile_in(db_dir)?
                .into_temp_path();
            snapshot::vacuum_copy(&cfg.db_path, &snap_path).await?;
            let counts = snapshot::counts(&snap_path).await?;
            let size = snapshot::file_size(&snap_path).await?;
            Ok((snap_path, counts, size))
        }
        .await;

        let (snap_path, counts, size) = match snapshot_result {
            Ok(v) => v,
            Err(e) => {
                let _ = self.worker.start().await;
                // A database that cannot be checked or copied is an
                // integrity failure, not a transport one.
                return Err(match e {
                    Error::Libsql(le) => Error::Integrity(format!("snapshot failed: {le}")),
                    other => other,
                });
            }
        };
        info!(size, observations = counts.observations, "snapshot created");

        // Resume the worker immediately; the copy is independent now.
        let worker_restarted = self.worker.start().await.unwrap_or(false);

        let local_sha = snapshot::hash_file(&snap_path).await?;
        info!(sha256 = %local_sha, "snapshot hashed");

        // Compare with the remote hash; equality is a no-op push.
        let sha_key = keys::sha256_key(cid);
        let remote_sha = match get_text(&self.store, &sha_key).await {
            Ok(text) => keys::parse_sha256_object(&text),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(error = %e, "remote hash unreadable, treating as first push");
                }
                None
            }
        };

        if remote_sha.as_deref() == Some(local_sha.as_str()) {
            info!("remote already up to date");
            return Ok(PushOutcome::AlreadyCurrent);
        }

        if remote_sha.is_some() {
            // Pull-before-push guard: warn when the remote looks ahead.
            if let Ok(manifest) =
                get_json::<S, RemoteManifest>(&self.store, &keys::manifest_key(cid)).await
            {
                if manifest.observations > counts.observations {
                    warn!(
                        remote = manifest.observations,
                        local = counts.observations,
                        "remote may be ahead; consider pulling first"
                    );
                }
            }
        }

        // Single-writer lock.
        match acquire_lock(&self.store, &cfg.lock, &cfg.hostname, &cfg.project, cid).await? {
            LockAcquire::Acquired { .. } => {}
            LockAcquire::Blocked { holder, age_seconds, .. } => {
                return Ok(PushOutcome::BlockedByLock { holder, age_seconds });
            }
        }

        // Upload snapshot, then hash text, then manifest. Any failure
        // aborts without half-updating; the lock is left to expire.
        self.store.upload(&snap_path, &keys::snapshot_key(cid)).await?;
        info!(key = %keys::snapshot_key(cid), size, "snapshot uploaded");

        self.store
            .put_bytes(&sha_key, keys::render_sha256_object(&local_sha).into_bytes())
            .await?;

        let manifest = RemoteManifest {
            project: cfg.project.clone(),
            canonical_id: cid.clone(),
            timestamp: Utc::now().to_rfc3339(),
            source_host: cfg.hostname.clone(),
            db_size: size,
            sha256: local_sha.clone(),
            observations: counts.observations,
            session_summaries: counts.session_summaries,
            user_prompts: counts.user_prompts,
            tables: counts.tables,
        };
        put_json_pretty(&self.store, &keys::manifest_key(cid), &manifest).await?;
        info!(key = %keys::manifest_key(cid), "manifest uploaded");

        // Post-upload verification: a mismatch is loud but not fatal,
        // the upload has already happened.
        match get_text(&self.store, &sha_key).await {
            Ok(text) => match keys::parse_sha256_object(&text) {
                Some(verified) if verified == local_sha => info!("post-upload hash verified"),
                other => warn!(
                    expected = %local_sha,
                    got = ?other,
                    "post-upload hash mismatch"
                ),
            },
            Err(e) => warn!(error = %e, "could not verify remote hash after upload"),
        }

        // The vacuum copy is a TempPath and deletes itself on drop.
        Ok(PushOutcome::Uploaded {
            sha256: local_sha,
            size,
            counts,
            worker_restarted,
        })
    }
}

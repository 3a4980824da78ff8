//! Pull state machine.
//!
//! Pulls never take the object-store lock: they are read-only remotely and
//! only need the worker quiesced around the atomic rename. A primary that
//! observes a divergent remote refuses the overwrite — that divergence
//! means split-brain or manual tampering, and silently losing the
//! authoritative copy is the one unrecoverable mistake here.

use super::{PullOutcome, RemoteManifest, SyncEngine};
use crate::backup;
use crate::error::{Error, Result};
use crate::leadership::{Role, determine_role};
use crate::remote::{ObjectStore, get_json, get_text, keys};
use crate::snapshot;
use crate::worker::WorkerControl;
use std::time::Duration;
use tracing::{info, warn};

impl<S: ObjectStore, W: WorkerControl> SyncEngine<S, W> {
    /// Pull the remote snapshot and atomically replace the local database.
    pub async fn pull(&self) -> PullOutcome {
        match self.pull_inner().await {
            Ok(outcome) => outcome,
            Err(Error::Integrity(reason)) => PullOutcome::IntegrityFailed { reason },
            Err(e) => PullOutcome::TransportFailed { cause: e.to_string() },
        }
    }

    async fn pull_inner(&self) -> Result<PullOutcome> {
        let cfg = &self.cfg;
        let cid = &cfg.canonical_id;
        info!(
            project = %cfg.project,
            canonical_id = %cid,
            db = %cfg.db_path.display(),
            "pull starting"
        );

        // Discover: the remote hash object is the source of truth; its
        // absence means there is nothing to pull.
        let sha_text = get_text(&self.store, &keys::sha256_key(cid)).await?;
        let remote_sha = keys::parse_sha256_object(&sha_text)
            .ok_or_else(|| Error::Integrity("remote hash object is empty".to_string()))?;
        info!(remote_sha = %remote_sha, "remote hash fetched");

        let local_exists = cfg.db_path.exists();
        let mut local_sha = None;
        let mut local_obs = None;
        let mut local_ahead = false;
        let mut remote_obs = 0;

        if local_exists {
            let sha = snapshot::hash_file(&cfg.db_path).await?;
            if sha == remote_sha {
                info!("already up to date");
                return Ok(PullOutcome::UpToDate);
            }
            info!(local_sha = %sha, "hash mismatch, pulling remote");
            local_sha = Some(sha);

            // Primary gate: only when an existing local copy would be
            // destroyed. A failing check is logged and ignored.
            if cfg.leadership.enabled {
                match determine_role(&self.store, &cfg.leadership, cid).await {
                    Ok((role, lease, _)) => {
                        info!(role = %role, node = %cfg.leadership.node_id,
                              primary = %lease.primary_node_id, "leadership");
                        if role == Role::Primary && !cfg.leadership.allow_primary_pull_override {
                            warn!(
                                "primary refusing destructive pull overwrite; resolve remote \
                                 drift manually or set ALLOW_PRIMARY_PULL_OVERRIDE"
                            );
                            return Ok(PullOutcome::BlockedByPrimary {
                                local_sha: local_sha.unwrap_or_default(),
                                remote_sha,
                            });
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "leadership check failed, proceeding without role enforcement");
                    }
                }
            }

            // Local-ahead guard: compare observation counts before the
            // overwrite; this only escalates backup messaging.
            local_obs = snapshot::counts(&cfg.db_path)
                .await
                .ok()
                .map(|c| c.observations);
            remote_obs = get_json::<S, RemoteManifest>(&self.store, &keys::manifest_key(cid))
                .await
                .map(|m| m.observations)
                .unwrap_or(0);
            if let Some(obs) = local_obs {
                if obs > remote_obs {
                    local_ahead = true;
                    warn!(
                        local = obs,
                        remote = remote_obs,
                        "local ahead suspected; safety backup will preserve local state"
                    );
                }
            }
        } else {
            info!("local DB does not exist, pulling remote");
        }

        // Download to a sibling temp file and verify its content hash.
        let db_dir = cfg
            .db_path
            .parent()
            .ok_or_else(|| Error::Config(format!("no parent dir for {}", cfg.db_path.display())))?;
        tokio::fs::create_dir_all(db_dir).await?;
        let tmp_path = tempfile::Builder::new()
            .suffix(".db.tmp")
            .tempfile_in(db_dir)?
            .into_temp_path();
        let downloaded = self
            .store
            .download(&keys::snapshot_key(cid), &tmp_path)
            .await?;
        info!(bytes = downloaded, "snapshot downloaded");

        let downloaded_sha = snapshot::hash_file(&tmp_path).await?;
        if downloaded_sha != remote_sha {
            return Err(Error::Integrity(format!(
                "downloaded snapshot hash mismatch: expected {remote_sha}, got {downloaded_sha}"
            )));
        }

        // Safety backup of the file about to be overwritten.
        let backup_dir = if local_exists {
            let dir = backup::create_pull_safety_backup(
                &cfg.db_path,
                &cfg.backup,
                &cfg.hostname,
                local_sha.clone(),
                &remote_sha,
                local_obs,
                remote_obs,
                local_ahead,
            )
            .await?;
            info!(backup_dir = %dir.display(), local_ahead, "safety backup created");
            Some(dir)
        } else {
            None
        };

        // Quiesce, then atomically rename the verified temp over the live
        // path.
        self.worker.stop().await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        tmp_path
            .persist(&cfg.db_path)
            .map_err(|e| Error::Io(e.error))?;
        let size = snapshot::file_size(&cfg.db_path).await?;
        info!(size, "local snapshot replaced");

        let counts = snapshot::counts(&cfg.db_path).await.unwrap_or_default();
        let final_sha = snapshot::hash_file(&cfg.db_path).await?;
        if final_sha != remote_sha {
            warn!(expected = %remote_sha, got = %final_sha, "post-replace hash mismatch");
        }

        // Resume the worker unless the caller suppressed restart; give it
        // a moment and make sure it did not immediately rewrite the file.
        let worker_restarted = if cfg.no_restart_worker {
            info!("worker restart suppressed; it will start with the next session");
            None
        } else {
            let ok = self.worker.start().await.unwrap_or(false);
            tokio::time::sleep(Duration::from_secs(2)).await;
            let post_worker_sha = snapshot::hash_file(&cfg.db_path).await?;
            if post_worker_sha != remote_sha {
                warn!(
                    expected = %remote_sha,
                    got = %post_worker_sha,
                    "worker modified the database right after replace"
                );
            }
            Some(ok)
        };

        // Retention of old safety backups; non-critical.
        backup::cleanup_pull_backups(&cfg.backup);

        Ok(PullOutcome::Replaced {
            sha256: remote_sha,
            size,
            counts,
            backup_dir,
            local_ahead,
            worker_restarted,
        })
    }
}

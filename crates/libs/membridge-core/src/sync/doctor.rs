//! Sync diagnostics.
//!
//! Runs the same checks an operator would do by hand — identity, object
//! store reachability, lock state, local DB health, worker health, and
//! leadership — and folds them into one structured report.

use super::SyncEngine;
use crate::leadership::determine_role;
use crate::locks::lock_status;
use crate::remote::{ObjectStore, get_text, keys};
use crate::snapshot::{self, DbCounts};
use crate::worker::WorkerControl;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DoctorStatus {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteHealth {
    pub reachable: bool,
    pub snapshot_size: Option<u64>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockHealth {
    /// `free`, `locked`, `expired`, or `unknown`.
    pub status: String,
    pub holder: Option<String>,
    pub age_seconds: Option<i64>,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbHealth {
    pub exists: bool,
    pub path: String,
    pub size: Option<u64>,
    pub integrity: Option<String>,
    pub counts: Option<DbCounts>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    pub pid: Option<i32>,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadershipHealth {
    pub role: Option<String>,
    pub primary: Option<String>,
    pub epoch: Option<i64>,
    pub ttl_remaining: Option<i64>,
    pub needs_ui_selection: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub status: DoctorStatus,
    pub project: String,
    pub canonical_id: String,
    pub hostname: String,
    pub node_id: String,
    pub remote: RemoteHealth,
    pub lock: LockHealth,
    pub db: DbHealth,
    pub worker: WorkerHealth,
    pub leadership: LeadershipHealth,
}

impl<S: ObjectStore, W: WorkerControl> SyncEngine<S, W> {
    /// Run diagnostics across the whole sync path.
    pub async fn doctor(&self) -> DoctorReport {
        let cfg = &self.cfg;
        let cid = &cfg.canonical_id;
        let mut status = DoctorStatus::Ok;

        // Object store: a head on the snapshot answers both reachability
        // and presence; not-found still means the store is reachable.
        let remote = match self.store.head(&keys::snapshot_key(cid)).await {
            Ok(meta) => {
                let sha256 = get_text(&self.store, &keys::sha256_key(cid))
                    .await
                    .ok()
                    .and_then(|t| keys::parse_sha256_object(&t));
                RemoteHealth {
                    reachable: true,
                    snapshot_size: Some(meta.size),
                    sha256,
                }
            }
            Err(e) if e.is_not_found() => RemoteHealth {
                reachable: true,
                snapshot_size: None,
                sha256: None,
            },
            Err(_) => {
                status = DoctorStatus::Error;
                RemoteHealth {
                    reachable: false,
                    snapshot_size: None,
                    sha256: None,
                }
            }
        };

        let lock = if remote.reachable {
            match lock_status(&self.store, cid).await {
                Some((doc, age)) => LockHealth {
                    status: if age < cfg.lock.ttl_seconds {
                        "locked".to_string()
                    } else {
                        "expired".to_string()
                    },
                    holder: Some(doc.hostname),
                    age_seconds: Some(age),
                    ttl_seconds: cfg.lock.ttl_seconds,
                },
                None => LockHealth {
                    status: "free".to_string(),
                    holder: None,
                    age_seconds: None,
                    ttl_seconds: cfg.lock.ttl_seconds,
                },
            }
        } else {
            LockHealth {
                status: "unknown".to_string(),
                holder: None,
                age_seconds: None,
                ttl_seconds: cfg.lock.ttl_seconds,
            }
        };

        let db = if cfg.db_path.exists() {
            let size = snapshot::file_size(&cfg.db_path).await.ok();
            let integrity = snapshot::integrity_check(&cfg.db_path).await.ok();
            let counts = snapshot::counts(&cfg.db_path).await.ok();
            if integrity.as_deref() != Some("ok") {
                status = DoctorStatus::Error;
            }
            DbHealth {
                exists: true,
                path: cfg.db_path.display().to_string(),
                size,
                integrity,
                counts,
            }
        } else {
            status = DoctorStatus::Error;
            DbHealth {
                exists: false,
                path: cfg.db_path.display().to_string(),
                size: None,
                integrity: None,
                counts: None,
            }
        };

        let worker = WorkerHealth {
            pid: self.worker.pid().await,
            ready: self.worker.wait_ready(Duration::from_secs(5)).await,
        };
        if !worker.ready && status == DoctorStatus::Ok {
            status = DoctorStatus::Degraded;
        }

        let leadership = if remote.reachable {
            match determine_role(&self.store, &cfg.leadership, cid).await {
                Ok((role, lease, _)) => LeadershipHealth {
                    role: Some(role.as_str().to_string()),
                    primary: Some(lease.primary_node_id.clone()),
                    epoch: Some(lease.epoch),
                    ttl_remaining: Some(lease.expires_at - Utc::now().timestamp()),
                    needs_ui_selection: lease.needs_ui_selection.unwrap_or(false),
                },
                Err(_) => LeadershipHealth {
                    role: None,
                    primary: None,
                    epoch: None,
                    ttl_remaining: None,
                    needs_ui_selection: false,
                },
            }
        } else {
            LeadershipHealth {
                role: None,
                primary: None,
                epoch: None,
                ttl_remaining: None,
                needs_ui_selection: false,
            }
        };

        DoctorReport {
            status,
            project: cfg.project.clone(),
            canonical_id: cid.clone(),
            hostname: cfg.hostname.clone(),
            node_id: cfg.leadership.node_id.clone(),
            remote,
            lock,
            db,
            worker,
            leadership,
        }
    }
}

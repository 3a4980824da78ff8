//! The push and pull state machines.
//!
//! [`SyncEngine`] ties together the object-store adapter, the snapshot
//! adapter, the worker controller, the lock manager, and the leadership
//! manager. Every outcome is a tagged variant with distinct fields so
//! callers pattern-match instead of inspecting ad-hoc JSON; `exit_code()`
//! maps each outcome to the subprocess convention (0 success or no-op,
//! 1 transport/integrity/lock, 2 primary-refused pull, 3 secondary-refused
//! push).

mod doctor;
mod pull;
mod push;

pub use doctor::{
    DbHealth, DoctorReport, DoctorStatus, LeadershipHealth, LockHealth, RemoteHealth,
    WorkerHealth,
};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::leadership::{Lease, Role, determine_role};
use crate::remote::ObjectStore;
use crate::snapshot::DbCounts;
use crate::worker::WorkerControl;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata uploaded next to every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub project: String,
    pub canonical_id: String,
    /// ISO-8601 UTC.
    pub timestamp: String,
    pub source_host: String,
    pub db_size: u64,
    pub sha256: String,
    pub observations: i64,
    pub session_summaries: i64,
    pub user_prompts: i64,
    pub tables: i64,
}

/// Result of a push.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    Uploaded {
        sha256: String,
        size: u64,
        counts: DbCounts,
        worker_restarted: bool,
    },
    AlreadyCurrent,
    BlockedBySecondary {
        primary: String,
    },
    BlockedByLock {
        holder: String,
        age_seconds: i64,
    },
    IntegrityFailed {
        reason: String,
    },
    TransportFailed {
        cause: String,
    },
}

impl PushOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            PushOutcome::Uploaded { .. } | PushOutcome::AlreadyCurrent => 0,
            PushOutcome::BlockedBySecondary { .. } => 3,
            PushOutcome::BlockedByLock { .. }
            | PushOutcome::IntegrityFailed { .. }
            | PushOutcome::TransportFailed { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn detail(&self) -> String {
        match self {
            PushOutcome::Uploaded { sha256, size, .. } => {
                format!("uploaded snapshot ({size} bytes, sha256 {sha256})")
            }
            PushOutcome::AlreadyCurrent => "remote already up to date".to_string(),
            PushOutcome::BlockedBySecondary { primary } => {
                format!("push blocked: this node is secondary (primary is {primary})")
            }
            PushOutcome::BlockedByLock { holder, age_seconds } => {
                format!("push blocked: lock held by {holder} for {age_seconds}s")
            }
            PushOutcome::IntegrityFailed { reason } => {
                format!("integrity check failed: {reason}")
            }
            PushOutcome::TransportFailed { cause } => format!("push failed: {cause}"),
        }
    }
}

/// Result of a pull.
#[derive(Debug, Clone)]
pub enum PullOutcome {
    UpToDate,
    Replaced {
        sha256: String,
        size: u64,
        counts: DbCounts,
        backup_dir: Option<PathBuf>,
        local_ahead: bool,
        /// `None` when restart was suppressed by the caller.
        worker_restarted: Option<bool>,
    },
    BlockedByPrimary {
        local_sha: String,
        remote_sha: String,
    },
    IntegrityFailed {
        reason: String,
    },
    TransportFailed {
        cause: String,
    },
}

impl PullOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            PullOutcome::UpToDate | PullOutcome::Replaced { .. } => 0,
            PullOutcome::BlockedByPrimary { .. } => 2,
            PullOutcome::IntegrityFailed { .. } | PullOutcome::TransportFailed { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn detail(&self) -> String {
        match self {
            PullOutcome::UpToDate => "already up to date".to_string(),
            PullOutcome::Replaced { sha256, size, .. } => {
                format!("replaced local snapshot ({size} bytes, sha256 {sha256})")
            }
            PullOutcome::BlockedByPrimary { .. } => {
                "pull refused: primary will not overwrite its local database".to_string()
            }
            PullOutcome::IntegrityFailed { reason } => {
                format!("integrity check failed: {reason}")
            }
            PullOutcome::TransportFailed { cause } => format!("pull failed: {cause}"),
        }
    }
}

/// The sync engine for one project.
///
/// Generic over the object store and the worker controller so tests can
/// run the full state machines against an in-memory bucket and a fake
/// worker.
pub struct SyncEngine<S, W> {
    pub(crate) store: S,
    pub(crate) worker: W,
    pub(crate) cfg: SyncConfig,
}

impl<S: ObjectStore, W: WorkerControl> SyncEngine<S, W> {
    pub fn new(store: S, worker: W, cfg: SyncConfig) -> Self {
        Self { store, worker, cfg }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    /// This node's current role and lease for the configured project.
    pub async fn leadership(&self) -> Result<(Role, Lease, bool)> {
        determine_role(&self.store, &self.cfg.leadership, &self.cfg.canonical_id).await
    }
}

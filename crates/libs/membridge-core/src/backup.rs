//! Safety backups taken before a pull overwrites the local database.
//!
//! Layout: `{base}/{YYYYMMDD-HHMMSS}/claude-mem.db` plus a `manifest.json`
//! recording both sides' hashes and row counts. Retention evicts oldest
//! first, bounded by both an age limit and a count limit; the cleanup path
//! is non-critical and swallows errors.

use crate::error::Result;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_BACKUP_MAX_DAYS: i64 = 14;
pub const DEFAULT_BACKUP_MAX_COUNT: usize = 50;

/// Retention policy and location for pull-overwrite backups.
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    pub base_dir: PathBuf,
    pub max_days: i64,
    pub max_count: usize,
}

impl BackupPolicy {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_days: DEFAULT_BACKUP_MAX_DAYS,
            max_count: DEFAULT_BACKUP_MAX_COUNT,
        }
    }
}

/// What was about to be overwritten and why; stored next to the copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub timestamp: String,
    pub hostname: String,
    pub reason: String,
    pub local_sha: Option<String>,
    pub remote_sha: String,
    pub local_obs: Option<i64>,
    pub remote_obs: i64,
    pub local_ahead: bool,
    pub db_path: String,
}

/// Copy the current database into a timestamped backup directory together
/// with a manifest describing both sides. Returns the backup directory.
pub async fn create_pull_safety_backup(
    db_path: &Path,
    policy: &BackupPolicy,
    hostname: &str,
    local_sha: Option<String>,
    remote_sha: &str,
    local_obs: Option<i64>,
    remote_obs: i64,
    local_ahead: bool,
) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let backup_dir = policy.base_dir.join(stamp);
    tokio::fs::create_dir_all(&backup_dir).await?;

    let db_backup = backup_dir.join(crate::remote::keys::SNAPSHOT_FILE);
    tokio::fs::copy(db_path, &db_backup).await?;

    let manifest = BackupManifest {
        timestamp: Utc::now().to_rfc3339(),
        hostname: hostname.to_string(),
        reason: "pull-overwrite safety backup".to_string(),
        local_sha,
        remote_sha: remote_sha.to_string(),
        local_obs,
        remote_obs,
        local_ahead,
        db_path: db_path.display().to_string(),
    };
    let body = serde_json::to_vec_pretty(&manifest)?;
    tokio::fs::write(backup_dir.join("manifest.json"), body).await?;

    Ok(backup_dir)
}

/// Evict old backups: anything older than `max_days`, then oldest-first
/// down to `max_count`. Errors are ignored — this is a non-critical path.
pub fn cleanup_pull_backups(policy: &BackupPolicy) -> usize {
    let Ok(entries) = std::fs::read_dir(&policy.base_dir) else {
        return 0;
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    // Timestamped names sort oldest to newest.
    dirs.sort();

    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs((policy.max_days.max(0) as u64) * 86400);
    let mut removed = 0;

    dirs.retain(|dir| {
        let too_old = std::fs::metadata(dir)
            .and_then(|m| m.modified())
            .map(|mtime| mtime < cutoff)
            .unwrap_or(false);
        if too_old && std::fs::remove_dir_all(dir).is_ok() {
            removed += 1;
            return false;
        }
        true
    });

    while dirs.len() > policy.max_count {
        let oldest = dirs.remove(0);
        if std::fs::remove_dir_all(&oldest).is_ok() {
            removed += 1;
        } else {
            break;
        }
    }

    if removed > 0 {
        info!(removed, "backup cleanup removed old pull-overwrite snapshots");
    }
    removed
}

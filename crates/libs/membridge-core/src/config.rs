//! Sync engine configuration.
//!
//! The engine is configured purely from the environment because it runs
//! with per-project, per-invocation env (the agent sets `CLAUDE_PROJECT_ID`
//! for each dispatch). Required variables fail fast with a configuration
//! error naming the missing key.

use crate::backup::{BackupPolicy, DEFAULT_BACKUP_MAX_COUNT, DEFAULT_BACKUP_MAX_DAYS};
use crate::error::{Error, Result};
use crate::identity::canonical_project_id;
use crate::leadership::{DEFAULT_LEASE_SECONDS, LeadershipConfig};
use crate::locks::{DEFAULT_LOCK_TTL_SECONDS, DEFAULT_STALE_GRACE_SECONDS, LockPolicy};
use crate::remote::StoreConfig;
use crate::remote::s3::DEFAULT_REGION;
use crate::worker::WorkerConfig;
use std::path::PathBuf;

/// Everything one push/pull invocation needs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub project: String,
    pub canonical_id: String,
    pub db_path: PathBuf,
    pub store: StoreConfig,
    pub lock: LockPolicy,
    pub leadership: LeadershipConfig,
    pub backup: BackupPolicy,
    pub worker: WorkerConfig,
    /// Leave the worker stopped after a pull replace.
    pub no_restart_worker: bool,
    pub hostname: String,
}

fn required_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Config(format!("{key} not set"))),
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1").unwrap_or(false)
}

fn env_flag_default_on(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1").unwrap_or(true)
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

impl SyncConfig {
    /// Build from the environment; the project name comes from
    /// `CLAUDE_PROJECT_ID`.
    pub fn from_env() -> Result<Self> {
        let project = required_env("CLAUDE_PROJECT_ID")?;
        Self::for_project(&project)
    }

    /// Build from the environment for an explicit project name
    /// (the agent passes the name from the request body).
    pub fn for_project(project: &str) -> Result<Self> {
        if project.is_empty() {
            return Err(Error::InvalidInput("project name is empty".to_string()));
        }

        let store = StoreConfig {
            endpoint: required_env("MINIO_ENDPOINT")?,
            access_key: required_env("MINIO_ACCESS_KEY")?,
            secret_key: required_env("MINIO_SECRET_KEY")?,
            bucket: required_env("MINIO_BUCKET")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
        };

        let db_path = PathBuf::from(required_env("CLAUDE_MEM_DB")?);

        let lock = LockPolicy {
            ttl_seconds: env_i64("LOCK_TTL_SECONDS", DEFAULT_LOCK_TTL_SECONDS),
            grace_seconds: env_i64("STALE_LOCK_GRACE_SECONDS", DEFAULT_STALE_GRACE_SECONDS),
            force: env_flag("FORCE_PUSH"),
        };

        let hostname = local_hostname();
        let node_id = std::env::var("NODE_ID")
            .or_else(|_| std::env::var("MEMBRIDGE_NODE_ID"))
            .unwrap_or_else(|_| hostname.clone());
        let configured_primary = std::env::var("PRIMARY_NODE_ID")
            .ok()
            .filter(|p| !p.is_empty());

        let leadership = LeadershipConfig {
            enabled: env_flag_default_on("LEADERSHIP_ENABLED"),
            node_id,
            configured_primary,
            lease_seconds: env_i64("LEADERSHIP_LEASE_SECONDS", DEFAULT_LEASE_SECONDS),
            allow_secondary_push: env_flag("ALLOW_SECONDARY_PUSH"),
            allow_primary_pull_override: env_flag("ALLOW_PRIMARY_PULL_OVERRIDE"),
        };

        // Backups live next to the database they protect.
        let backup_base = db_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("backups/pull-overwrite");
        let backup = BackupPolicy {
            base_dir: backup_base,
            max_days: env_i64("PULL_BACKUP_MAX_DAYS", DEFAULT_BACKUP_MAX_DAYS),
            max_count: env_usize("PULL_BACKUP_MAX_COUNT", DEFAULT_BACKUP_MAX_COUNT),
        };

        Ok(Self {
            project: project.to_string(),
            canonical_id: canonical_project_id(project),
            db_path,
            store,
            lock,
            leadership,
            backup,
            worker: WorkerConfig::from_env(),
            no_restart_worker: env_flag("MEMBRIDGE_NO_RESTART_WORKER"),
            hostname,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "MINIO_ENDPOINT",
            "MINIO_ACCESS_KEY",
            "MINIO_SECRET_KEY",
            "MINIO_BUCKET",
            "MINIO_REGION",
            "CLAUDE_PROJECT_ID",
            "CLAUDE_MEM_DB",
            "LOCK_TTL_SECONDS",
            "FORCE_PUSH",
            "LEADERSHIP_ENABLED",
            "PRIMARY_NODE_ID",
            "ALLOW_SECONDARY_PUSH",
            "MEMBRIDGE_NO_RESTART_WORKER",
        ] {
            // SAFETY: Test code only, serialized via #[serial]
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_required() {
        // SAFETY: Test code only, serialized via #[serial]
        unsafe {
            std::env::set_var("MINIO_ENDPOINT", "http://localhost:9000");
            std::env::set_var("MINIO_ACCESS_KEY", "minioadmin");
            std::env::set_var("MINIO_SECRET_KEY", "minioadmin");
            std::env::set_var("MINIO_BUCKET", "test-bucket");
            std::env::set_var("CLAUDE_MEM_DB", "/tmp/claude-mem.db");
        }
    }

    #[test]
    #[serial]
    fn test_missing_required_var_names_the_key() {
        clear_env();
        let err = SyncConfig::for_project("test-project").unwrap_err();
        assert!(err.to_string().contains("MINIO_ENDPOINT"));
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        clear_env();
        set_required();
        let cfg = SyncConfig::for_project("test-project").unwrap();
        assert_eq!(cfg.canonical_id, "75c84d20a0aa90c5");
        assert_eq!(cfg.store.region, "us-east-1");
        assert_eq!(cfg.lock.ttl_seconds, 7200);
        assert_eq!(cfg.lock.grace_seconds, 60);
        assert!(!cfg.lock.force);
        assert!(cfg.leadership.enabled);
        assert_eq!(cfg.leadership.lease_seconds, 3600);
        assert!(!cfg.no_restart_worker);
        assert_eq!(cfg.backup.max_days, 14);
        assert_eq!(cfg.backup.max_count, 50);
        assert!(cfg.backup.base_dir.ends_with("backups/pull-overwrite"));
    }

    #[test]
    #[serial]
    fn test_flags_and_overrides() {
        clear_env();
        set_required();
        // SAFETY: Test code only, serialized via #[serial]
        unsafe {
            std::env::set_var("FORCE_PUSH", "1");
            std::env::set_var("LEADERSHIP_ENABLED", "0");
            std::env::set_var("LOCK_TTL_SECONDS", "120");
            std::env::set_var("PRIMARY_NODE_ID", "rpi4b");
        }
        let cfg = SyncConfig::for_project("demo").unwrap();
        assert!(cfg.lock.force);
        assert!(!cfg.leadership.enabled);
        assert_eq!(cfg.lock.ttl_seconds, 120);
        assert_eq!(cfg.leadership.configured_primary.as_deref(), Some("rpi4b"));
        clear_env();
    }
}

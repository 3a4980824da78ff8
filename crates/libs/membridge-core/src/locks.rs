//! Single-writer advisory lock in the object store.
//!
//! One lock object per project at `locks/active.lock`. The store has no
//! compare-and-swap, so acquisition is read-classify-overwrite; the grace
//! window past the TTL is the defense against stealing from a holder that
//! is still finishing. Locks are never deleted — they expire, which leaves
//! a recoverable state behind a crashed holder.

use crate::error::Result;
use crate::remote::{ObjectStore, get_json, keys, put_json_pretty};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_LOCK_TTL_SECONDS: i64 = 7200;
pub const DEFAULT_STALE_GRACE_SECONDS: i64 = 60;

/// The lock object. At most one valid lock per project;
/// valid means `now - timestamp < ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDocument {
    pub hostname: String,
    pub timestamp: i64,
    pub project: String,
    pub canonical_id: String,
}

/// TTL, grace, and operator-override policy.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub ttl_seconds: i64,
    pub grace_seconds: i64,
    /// Operator flag: overwrite regardless of holder or age.
    pub force: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            grace_seconds: DEFAULT_STALE_GRACE_SECONDS,
            force: false,
        }
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone)]
pub enum LockAcquire {
    Acquired {
        /// A stale foreign lock was overwritten.
        stolen: bool,
        /// Our own still-valid lock was overwritten.
        reacquired: bool,
    },
    Blocked {
        holder: String,
        age_seconds: i64,
        /// The TTL had expired but the grace window had not.
        in_grace: bool,
    },
}

impl LockAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquire::Acquired { .. })
    }
}

/// Read the current lock, returning the document and its age in seconds.
/// Read failures present as "no lock" — the original discipline treats an
/// unreadable lock object like an absent one.
pub async fn lock_status<S: ObjectStore>(
    store: &S,
    canonical_id: &str,
) -> Option<(LockDocument, i64)> {
    let key = keys::lock_key(canonical_id);
    match get_json::<S, LockDocument>(store, &key).await {
        Ok(doc) => {
            let age = Utc::now().timestamp() - doc.timestamp;
            Some((doc, age))
        }
        Err(e) => {
            if !e.is_not_found() {
                debug!(key, error = %e, "lock read failed, treating as absent");
            }
            None
        }
    }
}

/// Acquire the advisory lock for a push.
///
/// The cases when a lock already exists:
/// 1. held by this host — re-acquire without protest
/// 2. force override requested — overwrite regardless of age
/// 3. foreign holder, `age < ttl` — blocked
/// 4. foreign holder, `ttl <= age <= ttl + grace` — blocked (grace)
/// 5. foreign holder, `age > ttl + grace` — steal, logged as a takeover
pub async fn acquire_lock<S: ObjectStore>(
    store: &S,
    policy: &LockPolicy,
    hostname: &str,
    project: &str,
    canonical_id: &str,
) -> Result<LockAcquire> {
    let mut stolen = false;
    let mut reacquired = false;

    if let Some((existing, age)) = lock_status(store, canonical_id).await {
        let holder = existing.hostname.clone();
        let same_host = holder == hostname;
        let grace_limit = policy.ttl_seconds + policy.grace_seconds;

        if same_host {
            info!(holder, age, "re-acquiring own lock");
            reacquired = true;
        } else if policy.force {
            warn!(holder, age, "overriding lock (force push)");
        } else if age < policy.ttl_seconds {
            info!(
                holder,
                age,
                ttl = policy.ttl_seconds,
                "lock active, held by another host"
            );
            return Ok(LockAcquire::Blocked {
                holder,
                age_seconds: age,
                in_grace: false,
            });
        } else if age <= grace_limit {
            info!(
                holder,
                age,
                grace_limit,
                "lock recently expired, grace window not exhausted"
            );
            return Ok(LockAcquire::Blocked {
                holder,
                age_seconds: age,
                in_grace: true,
            });
        } else {
            warn!(holder, age, grace_limit, "stealing stale lock");
            stolen = true;
        }
    }

    let doc = LockDocument {
        hostname: hostname.to_string(),
        timestamp: Utc::now().timestamp(),
        project: project.to_string(),
        canonical_id: canonical_id.to_string(),
    };
    put_json_pretty(store, &keys::lock_key(canonical_id), &doc).await?;
    info!(hostname, "lock acquired");
    Ok(LockAcquire::Acquired { stolen, reacquired })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryObjectStore;

    const CID: &str = "cafe0123cafe0123";

    async fn write_lock(store: &MemoryObjectStore, hostname: &str, age_seconds: i64) {
        let doc = LockDocument {
            hostname: hostname.to_string(),
            timestamp: Utc::now().timestamp() - age_seconds,
            project: "test-project".to_string(),
            canonical_id: CID.to_string(),
        };
        put_json_pretty(store, &keys::lock_key(CID), &doc)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_with_no_lock_present() {
        let store = MemoryObjectStore::new();
        let result = acquire_lock(&store, &LockPolicy::default(), "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(matches!(
            result,
            LockAcquire::Acquired {
                stolen: false,
                reacquired: false
            }
        ));
        let (doc, age) = lock_status(&store, CID).await.unwrap();
        assert_eq!(doc.hostname, "rpi4b");
        assert!(age <= 1);
    }

    #[tokio::test]
    async fn test_reacquire_own_lock() {
        let store = MemoryObjectStore::new();
        write_lock(&store, "rpi4b", 100).await;
        let result = acquire_lock(&store, &LockPolicy::default(), "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(matches!(result, LockAcquire::Acquired { reacquired: true, .. }));
    }

    #[tokio::test]
    async fn test_fresh_foreign_lock_blocks() {
        let store = MemoryObjectStore::new();
        write_lock(&store, "orangepi", 100).await;
        let result = acquire_lock(&store, &LockPolicy::default(), "rpi4b", "test-project", CID)
            .await
            .unwrap();
        match result {
            LockAcquire::Blocked {
                holder,
                age_seconds,
                in_grace,
            } => {
                assert_eq!(holder, "orangepi");
                assert!((100..=101).contains(&age_seconds));
                assert!(!in_grace);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        // Holder unchanged.
        let (doc, _) = lock_status(&store, CID).await.unwrap();
        assert_eq!(doc.hostname, "orangepi");
    }

    #[tokio::test]
    async fn test_expired_lock_within_grace_blocks() {
        let store = MemoryObjectStore::new();
        let policy = LockPolicy {
            ttl_seconds: 100,
            grace_seconds: 60,
            force: false,
        };
        write_lock(&store, "orangepi", 130).await;
        let result = acquire_lock(&store, &policy, "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(matches!(result, LockAcquire::Blocked { in_grace: true, .. }));
    }

    #[tokio::test]
    async fn test_stale_lock_is_stolen() {
        let store = MemoryObjectStore::new();
        let policy = LockPolicy {
            ttl_seconds: 100,
            grace_seconds: 60,
            force: false,
        };
        write_lock(&store, "orangepi", 200).await;
        let result = acquire_lock(&store, &policy, "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(matches!(result, LockAcquire::Acquired { stolen: true, .. }));
        let (doc, _) = lock_status(&store, CID).await.unwrap();
        assert_eq!(doc.hostname, "rpi4b");
    }

    #[tokio::test]
    async fn test_force_overrides_fresh_foreign_lock() {
        let store = MemoryObjectStore::new();
        let policy = LockPolicy {
            force: true,
            ..LockPolicy::default()
        };
        write_lock(&store, "orangepi", 10).await;
        let result = acquire_lock(&store, &policy, "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(result.is_acquired());
        let (doc, _) = lock_status(&store, CID).await.unwrap();
        assert_eq!(doc.hostname, "rpi4b");
    }

    #[tokio::test]
    async fn test_unreadable_lock_treated_as_absent() {
        let store = MemoryObjectStore::new();
        store.insert(&keys::lock_key(CID), b"not json".to_vec()).await;
        let result = acquire_lock(&store, &LockPolicy::default(), "rpi4b", "test-project", CID)
            .await
            .unwrap();
        assert!(result.is_acquired());
    }
}

//! Primary/secondary leadership lease.
//!
//! The lease names the current primary node for a project and lives at
//! `leadership/lease.json`. The store has no compare-and-swap; races
//! between simultaneous writers are tolerated because the lease is only
//! ever read to decide whether to continue — the authoritative writer
//! exclusion is the snapshot lock, not the lease. Every lease write
//! appends a best-effort audit entry.

use crate::error::Result;
use crate::remote::{ObjectStore, get_json, keys, put_json_pretty};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_LEASE_SECONDS: i64 = 3600;
/// The only policy this design supports: the primary is authoritative and
/// administrative selection is the only promotion path.
pub const LEASE_POLICY: &str = "primary_authoritative";

/// This node's role for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lease object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub canonical_id: String,
    pub primary_node_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub lease_seconds: i64,
    /// Monotonic on renewal.
    pub epoch: i64,
    pub policy: String,
    pub issued_by: String,
    /// Set when the lease was bootstrapped without an administrative choice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_ui_selection: Option<bool>,
}

impl Lease {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Leadership policy for this node.
#[derive(Debug, Clone)]
pub struct LeadershipConfig {
    /// When false both role gates are bypassed (tests, disaster recovery).
    pub enabled: bool,
    pub node_id: String,
    /// Environment-configured primary, if any.
    pub configured_primary: Option<String>,
    pub lease_seconds: i64,
    /// Override: let a secondary push anyway.
    pub allow_secondary_push: bool,
    /// Override: let a primary destructively pull anyway.
    pub allow_primary_pull_override: bool,
}

impl LeadershipConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            node_id: node_id.into(),
            configured_primary: None,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            allow_secondary_push: false,
            allow_primary_pull_override: false,
        }
    }
}

/// Read the lease, best-effort: any failure reads as "no lease".
pub async fn read_lease<S: ObjectStore>(store: &S, canonical_id: &str) -> Option<Lease> {
    let key = keys::lease_key(canonical_id);
    match get_json::<S, Lease>(store, &key).await {
        Ok(lease) => Some(lease),
        Err(e) => {
            if !e.is_not_found() {
                debug!(key, error = %e, "lease read failed, treating as absent");
            }
            None
        }
    }
}

/// Write the lease and append an audit entry.
///
/// The audit write is non-critical; its failure is logged and swallowed.
/// Without CAS this is last-writer-wins — callers re-read to verify when
/// they care.
pub async fn write_lease<S: ObjectStore>(
    store: &S,
    cfg: &LeadershipConfig,
    canonical_id: &str,
    primary_node_id: &str,
    lease_seconds: Option<i64>,
    epoch: i64,
    needs_ui_selection: bool,
) -> Result<Lease> {
    let lease_seconds = lease_seconds.unwrap_or(cfg.lease_seconds);
    let now = Utc::now().timestamp();
    let lease = Lease {
        canonical_id: canonical_id.to_string(),
        primary_node_id: primary_node_id.to_string(),
        issued_at: now,
        expires_at: now + lease_seconds,
        lease_seconds,
        epoch,
        policy: LEASE_POLICY.to_string(),
        issued_by: cfg.node_id.clone(),
        needs_ui_selection: needs_ui_selection.then_some(true),
    };

    put_json_pretty(store, &keys::lease_key(canonical_id), &lease).await?;

    // Audit entry: the lease fields plus event metadata, as its own object.
    let audit_result = async {
        let mut entry = serde_json::to_value(&lease)?;
        if let Some(map) = entry.as_object_mut() {
            map.insert("event".into(), serde_json::json!("lease_written"));
            map.insert("timestamp".into(), serde_json::json!(Utc::now().to_rfc3339()));
        }
        let key = keys::audit_key(canonical_id, &cfg.node_id, Utc::now());
        put_json_pretty(store, &key, &entry).await?;
        Ok::<(), crate::error::Error>(())
    }
    .await;
    if let Err(e) = audit_result {
        warn!(error = %e, "leadership audit write failed (ignored)");
    }

    Ok(lease)
}

/// Decide this node's role for a project.
///
/// Returns `(role, lease, was_created)` where `was_created` reports that the
/// lease was absent or expired and had to be (re)written or at least
/// re-evaluated. Best-effort without CAS: read, maybe write, re-read once.
pub async fn determine_role<S: ObjectStore>(
    store: &S,
    cfg: &LeadershipConfig,
    canonical_id: &str,
) -> Result<(Role, Lease, bool)> {
    let now = Utc::now().timestamp();

    let Some(lease) = read_lease(store, canonical_id).await else {
        // No lease: bootstrap a default. The primary is the configured one
        // when set, else this node, flagged for UI selection.
        let (primary, needs_ui) = match cfg.configured_primary.as_deref() {
            Some(p) if !p.is_empty() => (p.to_string(), false),
            _ => (cfg.node_id.clone(), true),
        };
        let lease =
            write_lease(store, cfg, canonical_id, &primary, None, 1, needs_ui).await?;
        info!(primary, needs_ui, "no lease found, created default");
        if needs_ui {
            warn!(
                canonical_id,
                "lease bootstrapped without configuration; confirm the primary via \
                 POST /projects/{{cid}}/leadership/select or PRIMARY_NODE_ID"
            );
        }
        let role = if cfg.node_id == primary {
            Role::Primary
        } else {
            Role::Secondary
        };
        return Ok((role, lease, true));
    };

    if lease.is_expired_at(now) {
        // Expired: renew only if we are the environment-configured primary.
        if cfg
            .configured_primary
            .as_deref()
            .is_some_and(|p| p == cfg.node_id)
        {
            let renewed = write_lease(
                store,
                cfg,
                canonical_id,
                &cfg.node_id,
                None,
                lease.epoch + 1,
                false,
            )
            .await?;
            info!(epoch = renewed.epoch, "lease expired, renewed as primary");
            return Ok((Role::Primary, renewed, true));
        }

        // Not ours to renew: re-read once in case another node just wrote a
        // fresh lease.
        if let Some(fresh) = read_lease(store, canonical_id).await {
            if !fresh.is_expired_at(now) {
                let role = if cfg.node_id == fresh.primary_node_id {
                    Role::Primary
                } else {
                    Role::Secondary
                };
                return Ok((role, fresh, false));
            }
        }

        return Ok((Role::Secondary, lease, true));
    }

    let role = if cfg.node_id == lease.primary_node_id {
        Role::Primary
    } else {
        Role::Secondary
    };
    Ok((role, lease, false))
}

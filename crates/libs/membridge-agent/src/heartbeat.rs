//! Heartbeat client.
//!
//! Every interval the agent collects its non-loopback IP addresses and the
//! local project list, then posts one heartbeat per known project (or a
//! single node-only heartbeat when none are known) to the control plane.
//! Consecutive failures back off exponentially, capped at 60 seconds.

use membridge_core::registry::{ProjectEntry, ProjectRegistry};
use membridge_common::config::AgentConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

/// Heartbeat HTTP timeout.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
/// Backoff ceiling on consecutive failures.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Canonical-id placeholder for the node-only heartbeat sent when the
/// agent knows no projects yet.
pub const NODE_ONLY_CANONICAL_ID: &str = "unassigned";

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub node_id: String,
    pub canonical_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obs_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_sha: Option<String>,
    pub ip_addrs: Vec<String>,
    pub agent_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatAck {
    pub ok: bool,
    #[serde(default)]
    pub role: Option<String>,
    pub canonical_id: String,
}

/// Posts heartbeats to the control plane.
#[derive(Clone)]
pub struct HeartbeatClient {
    http: reqwest::Client,
    server_url: String,
    admin_key: Option<String>,
    node_id: String,
}

impl HeartbeatClient {
    /// `None` when no control-plane URL is configured (heartbeats off).
    pub fn from_config(config: &AgentConfig) -> Option<Self> {
        let server_url = config.server_url.as_ref()?.trim_end_matches('/').to_string();
        Some(Self {
            http: reqwest::Client::new(),
            server_url,
            admin_key: config.server_admin_key.clone(),
            node_id: config.node_id.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/agent/heartbeat", self.server_url)
    }

    /// One payload per known project, or a single node-only payload.
    pub fn build_payloads(
        &self,
        projects: &[ProjectEntry],
        ip_addrs: Vec<String>,
    ) -> Vec<HeartbeatPayload> {
        let version = env!("CARGO_PKG_VERSION").to_string();
        if projects.is_empty() {
            return vec![HeartbeatPayload {
                node_id: self.node_id.clone(),
                canonical_id: NODE_ONLY_CANONICAL_ID.to_string(),
                project_id: None,
                obs_count: None,
                db_sha: None,
                ip_addrs,
                agent_version: version,
            }];
        }
        projects
            .iter()
            .map(|entry| HeartbeatPayload {
                node_id: self.node_id.clone(),
                canonical_id: entry.canonical_id.clone(),
                project_id: Some(entry.project_id.clone()),
                obs_count: entry.obs_count,
                db_sha: entry.db_sha.clone(),
                ip_addrs: ip_addrs.clone(),
                agent_version: version.clone(),
            })
            .collect()
    }

    /// Post one round of heartbeats; returns the collected acks.
    pub async fn beat_once(
        &self,
        projects: &[ProjectEntry],
    ) -> reqwest::Result<Vec<HeartbeatAck>> {
        let payloads = self.build_payloads(projects, collect_ip_addrs());
        let mut acks = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let mut request = self
                .http
                .post(self.endpoint())
                .timeout(HEARTBEAT_TIMEOUT)
                .json(payload);
            if let Some(key) = &self.admin_key {
                request = request.header("x-membridge-admin", key);
            }
            let ack: HeartbeatAck = request.send().await?.error_for_status()?.json().await?;
            acks.push(ack);
        }
        Ok(acks)
    }

    /// The long-lived heartbeat loop; exits when `shutdown` flips.
    pub async fn run(
        self,
        registry: Arc<Mutex<ProjectRegistry>>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut consecutive_failures: u32 = 0;
        loop {
            let delay = backoff_delay(interval, consecutive_failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    debug!("heartbeat loop shutting down");
                    return;
                }
            }

            let projects = registry.lock().await.list();
            match self.beat_once(&projects).await {
                Ok(acks) => {
                    consecutive_failures = 0;
                    debug!(count = acks.len(), "heartbeats delivered");
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        error = %e,
                        consecutive_failures,
                        "heartbeat failed, backing off"
                    );
                }
            }
        }
    }
}

/// Exponential backoff: the base interval doubled per consecutive
/// failure, capped at [`BACKOFF_CAP`].
pub fn backoff_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let factor = 2u64.saturating_pow(consecutive_failures.min(16));
    interval
        .saturating_mul(factor.min(u64::from(u32::MAX)) as u32)
        .min(BACKOFF_CAP)
}

/// Non-loopback IP addresses of this machine, sorted and deduplicated.
#[cfg(unix)]
pub fn collect_ip_addrs() -> Vec<String> {
    let mut addrs = Vec::new();
    if let Ok(ifaddrs) = nix::ifaddrs::getifaddrs() {
        for ifaddr in ifaddrs {
            let Some(storage) = ifaddr.address else { continue };
            if let Some(sin) = storage.as_sockaddr_in() {
                let ip = sin.ip();
                if !ip.is_loopback() && !ip.is_unspecified() {
                    addrs.push(ip.to_string());
                }
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                let ip = sin6.ip();
                let link_local = (ip.segments()[0] & 0xffc0) == 0xfe80;
                if !ip.is_loopback() && !ip.is_unspecified() && !link_local {
                    addrs.push(ip.to_string());
                }
            }
        }
    }
    addrs.sort();
    addrs.dedup();
    addrs
}

#[cfg(not(unix))]
pub fn collect_ip_addrs() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps_at_60s() {
        let interval = Duration::from_secs(10);
        assert_eq!(backoff_delay(interval, 0), Duration::from_secs(10));
        assert_eq!(backoff_delay(interval, 1), Duration::from_secs(20));
        assert_eq!(backoff_delay(interval, 2), Duration::from_secs(40));
        assert_eq!(backoff_delay(interval, 3), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, 10), Duration::from_secs(60));
        assert_eq!(backoff_delay(interval, u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_collect_ip_addrs_excludes_loopback() {
        let addrs = collect_ip_addrs();
        assert!(addrs.iter().all(|a| a != "127.0.0.1" && a != "::1"));
    }
}

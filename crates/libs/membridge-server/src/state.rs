//! In-memory control-plane registries.
//!
//! Projects, agents, node records, and the preferred-primary map each sit
//! behind their own `RwLock`; handlers hold a lock only for the map
//! operation itself. Node records are mutated only by heartbeats and by
//! leadership selection, and they are never evicted — staleness is a
//! presentation concern (`online` is computed from `last_seen` against
//! 3x the heartbeat interval).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::{Result, ServerError};
use membridge_core::canonical_project_id;

/// A registered project.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub name: String,
    pub canonical_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Unknown,
    Online,
    Offline,
    Syncing,
    Error,
}

/// A registered agent daemon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Agent {
    pub name: String,
    pub url: String,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Latest observation of one node for one project, keyed by
/// `(canonical_id, node_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeRecord {
    pub node_id: String,
    pub canonical_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obs_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_sha: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub ip_addrs: Vec<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Presentation only: `last_seen` within the staleness threshold.
    #[serde(default)]
    pub online: bool,
}

/// Heartbeat payload an agent posts per known project (or once, node-only).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub canonical_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub obs_count: Option<i64>,
    #[serde(default)]
    pub db_sha: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub ip_addrs: Vec<String>,
    #[serde(default)]
    pub agent_version: Option<String>,
}

/// Leadership summary for one project.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeadershipView {
    pub canonical_id: String,
    pub preferred_primary: Option<String>,
    pub node_count: usize,
    pub nodes: Vec<NodeRecord>,
}

/// The process-wide registry capability handed to every handler.
#[derive(Debug, Default)]
pub struct Registry {
    projects: RwLock<HashMap<String, Project>>,
    agents: RwLock<HashMap<String, Agent>>,
    nodes: RwLock<HashMap<(String, String), NodeRecord>>,
    preferred_primary: RwLock<HashMap<String, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Projects

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(name) {
            return Err(ServerError::conflict(format!(
                "Project '{name}' already exists"
            )));
        }
        let project = Project {
            name: name.to_string(),
            canonical_id: canonical_project_id(name),
            created_at: Utc::now(),
        };
        projects.insert(name.to_string(), project.clone());
        Ok(project)
    }

    pub async fn get_project(&self, name: &str) -> Option<Project> {
        self.projects.read().await.get(name).cloned()
    }

    pub async fn delete_project(&self, name: &str) -> bool {
        self.projects.write().await.remove(name).is_some()
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.read().await.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        projects
    }

    pub async fn project_count(&self) -> usize {
        self.projects.read().await.len()
    }

    // -- Agents

    pub async fn register_agent(&self, name: &str, url: &str) -> Result<Agent> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(name) {
            return Err(ServerError::conflict(format!(
                "Agent '{name}' already registered"
            )));
        }
        let agent = Agent {
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            status: AgentStatus::Unknown,
            registered_at: Utc::now(),
            last_seen: None,
        };
        agents.insert(name.to_string(), agent.clone());
        Ok(agent)
    }

    pub async fn get_agent(&self, name: &str) -> Option<Agent> {
        self.agents.read().await.get(name).cloned()
    }

    pub async fn delete_agent(&self, name: &str) -> bool {
        self.agents.write().await.remove(name).is_some()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn set_agent_status(&self, name: &str, status: AgentStatus, touch_last_seen: bool) {
        if let Some(agent) = self.agents.write().await.get_mut(name) {
            agent.status = status;
            if touch_last_seen {
                agent.last_seen = Some(Utc::now());
            }
        }
    }

    // -- Node records and leadership preference

    /// Record a heartbeat observation and answer the node's role from the
    /// preferred-primary map (`None` when no preference has been set yet).
    pub async fn record_heartbeat(&self, hb: &HeartbeatRequest) -> Option<String> {
        let role = {
            let preferred = self.preferred_primary.read().await;
            preferred.get(&hb.canonical_id).map(|primary| {
                if primary == &hb.node_id {
                    "primary".to_string()
                } else {
                    "secondary".to_string()
                }
            })
        };

        let key = (hb.canonical_id.clone(), hb.node_id.clone());
        let mut nodes = self.nodes.write().await;
        let now = Utc::now();
        let record = nodes.entry(key).or_insert_with(|| NodeRecord {
            node_id: hb.node_id.clone(),
            canonical_id: hb.canonical_id.clone(),
            role: None,
            obs_count: None,
            db_sha: None,
            last_seen: now,
            ip_addrs: Vec::new(),
            registered_at: now,
            agent_version: None,
            online: true,
        });
        record.last_seen = now;
        if !hb.ip_addrs.is_empty() {
            record.ip_addrs = hb.ip_addrs.clone();
        }
        if hb.obs_count.is_some() {
            record.obs_count = hb.obs_count;
        }
        if hb.db_sha.is_some() {
            record.db_sha = hb.db_sha.clone();
        }
        if hb.agent_version.is_some() {
            record.agent_version = hb.agent_version.clone();
        }
        if role.is_some() {
            record.role = role.clone();
        }
        role
    }

    /// Nodes known for a project, with `online` computed against the
    /// staleness threshold.
    pub async fn list_nodes(&self, canonical_id: &str, staleness: Duration) -> Vec<NodeRecord> {
        let cutoff = Utc::now() - staleness;
        let mut records: Vec<NodeRecord> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|r| r.canonical_id == canonical_id)
            .cloned()
            .map(|mut r| {
                r.online = r.last_seen >= cutoff;
                r
            })
            .collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        records
    }

    pub async fn preferred_primary(&self, canonical_id: &str) -> Option<String> {
        self.preferred_primary.read().await.get(canonical_id).cloned()
    }

    /// Administrative leadership selection: set the preferred primary and
    /// refresh the cached role on every node record of the project. The
    /// object-store lease is *not* written here; nodes discover the change
    /// through `determine_role` on their next interaction.
    pub async fn select_primary(&self, canonical_id: &str, node_id: &str) {
        self.preferred_primary
            .write()
            .await
            .insert(canonical_id.to_string(), node_id.to_string());

        let mut nodes = self.nodes.write().await;
        for record in nodes.values_mut() {
            if record.canonical_id == canonical_id {
                record.role = Some(if record.node_id == node_id {
                    "primary".to_string()
                } else {
                    "secondary".to_string()
                });
            }
        }
    }

    pub async fn leadership_view(&self, canonical_id: &str, staleness: Duration) -> LeadershipView {
        let nodes = self.list_nodes(canonical_id, staleness).await;
        LeadershipView {
            canonical_id: canonical_id.to_string(),
            preferred_primary: self.preferred_primary(canonical_id).await,
            node_count: nodes.len(),
            nodes,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn heartbeat(node: &str, cid: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            node_id: node.to_string(),
            canonical_id: cid.to_string(),
            project_id: None,
            obs_count: None,
            db_sha: None,
            last_seen: None,
            ip_addrs: vec![],
            agent_version: None,
        }
    }

    #[tokio::test]
    async fn test_project_create_is_unique() {
        let registry = Registry::new();
        let project = registry.create_project("garden-seedling").await.unwrap();
        assert_eq!(project.canonical_id, "aeeafec3a5b5710f");
        assert!(registry.create_project("garden-seedling").await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_without_preference_has_no_role() {
        let registry = Registry::new();
        let role = registry.record_heartbeat(&heartbeat("rpi4b", "cid001")).await;
        assert_eq!(role, None);
        let nodes = registry.list_nodes("cid001", Duration::seconds(30)).await;
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].online);
        assert_eq!(nodes[0].role, None);
    }

    #[tokio::test]
    async fn test_select_primary_updates_roles_and_later_heartbeats() {
        let registry = Registry::new();
        registry.record_heartbeat(&heartbeat("rpi4b", "cid003")).await;
        registry.record_heartbeat(&heartbeat("orangepi", "cid003")).await;

        registry.select_primary("cid003", "rpi4b").await;

        let nodes = registry.list_nodes("cid003", Duration::seconds(30)).await;
        let by_name: HashMap<_, _> = nodes.into_iter().map(|n| (n.node_id.clone(), n)).collect();
        assert_eq!(by_name["rpi4b"].role.as_deref(), Some("primary"));
        assert_eq!(by_name["orangepi"].role.as_deref(), Some("secondary"));

        let role = registry.record_heartbeat(&heartbeat("orangepi", "cid003")).await;
        assert_eq!(role.as_deref(), Some("secondary"));
        let role = registry.record_heartbeat(&heartbeat("rpi4b", "cid003")).await;
        assert_eq!(role.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn test_heartbeat_updates_observations() {
        let registry = Registry::new();
        let mut hb = heartbeat("rpi4b", "cid005");
        hb.obs_count = Some(500);
        hb.db_sha = Some("deadbeef".to_string());
        hb.ip_addrs = vec!["192.168.1.10".to_string()];
        registry.record_heartbeat(&hb).await;

        let nodes = registry.list_nodes("cid005", Duration::seconds(30)).await;
        assert_eq!(nodes[0].obs_count, Some(500));
        assert_eq!(nodes[0].db_sha.as_deref(), Some("deadbeef"));
        assert_eq!(nodes[0].ip_addrs, vec!["192.168.1.10"]);
    }

    #[tokio::test]
    async fn test_leadership_view_empty_project() {
        let registry = Registry::new();
        let view = registry.leadership_view("cid404", Duration::seconds(30)).await;
        assert_eq!(view.node_count, 0);
        assert_eq!(view.preferred_primary, None);
    }
}

//! Service configuration for the control plane and the agent daemon.
//!
//! Loading is layered: defaults, then optional `config/{run_mode}.toml`
//! files, then environment overrides.
//! The sync engine itself has a separate pure-environment `SyncConfig` in
//! `membridge-core` because it is invoked with per-project environment.

use config::{Config, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
}

/// Control-plane settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Pre-shared key expected in `X-MEMBRIDGE-ADMIN` on non-health routes.
    pub admin_key: Option<String>,
    /// Pre-shared key sent as `X-MEMBRIDGE-AGENT` when dispatching to agents.
    pub agent_key: Option<String>,
    /// Directory for the persistent job-history database.
    pub data_dir: String,
    /// Disables authentication. Local development and tests only.
    #[serde(default)]
    pub dev_mode: bool,
    /// Used to present node records as online/offline (3x staleness rule).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Agent daemon settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    /// Pre-shared key expected in `X-MEMBRIDGE-AGENT` on non-health routes.
    pub agent_key: Option<String>,
    /// Control-plane base URL; heartbeats are disabled when unset.
    pub server_url: Option<String>,
    /// Admin key sent with heartbeats.
    pub server_admin_key: Option<String>,
    /// Stable identifier for this machine; defaults to the hostname.
    pub node_id: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Directory for the local project registry.
    pub data_dir: String,
    /// URL the control plane should use to reach this agent; when set the
    /// agent registers itself at startup (best-effort).
    pub advertise_url: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_heartbeat_interval() -> u64 {
    10
}

/// Parse boolean environment variable with truthy value detection
pub fn parse_bool_env(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
        .unwrap_or(false)
}

fn local_node_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                admin_key: None,
                agent_key: None,
                data_dir: "data".to_string(),
                dev_mode: false,
                heartbeat_interval_secs: 10,
            },
            agent: AgentConfig {
                host: "0.0.0.0".to_string(),
                port: 8001,
                agent_key: None,
                server_url: None,
                server_admin_key: None,
                node_id: local_node_id(),
                heartbeat_interval_secs: 10,
                data_dir: "data".to_string(),
                advertise_url: None,
                dev_mode: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration with 12-factor style env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `MEMBRIDGE_*` / `PORT` / `HOST` env vars
    /// 2. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.data_dir", "data")?
            .set_default("server.dev_mode", false)?
            .set_default("server.heartbeat_interval_secs", 10)?
            .set_default("agent.host", "0.0.0.0")?
            .set_default("agent.port", 8001)?
            .set_default("agent.node_id", local_node_id())?
            .set_default("agent.heartbeat_interval_secs", 10)?
            .set_default("agent.data_dir", "data")?
            .set_default("agent.dev_mode", false)?
            // Merge in config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        // 12-factor standard: PORT and HOST apply to whichever service runs
        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder
                    .set_override("server.port", p)?
                    .set_override("agent.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder
                .set_override("server.host", host.clone())?
                .set_override("agent.host", host)?;
        }

        if let Ok(key) = env::var("MEMBRIDGE_ADMIN_KEY") {
            builder = builder.set_override("server.admin_key", key)?;
        }
        if let Ok(key) = env::var("MEMBRIDGE_AGENT_KEY") {
            builder = builder
                .set_override("server.agent_key", key.clone())?
                .set_override("agent.agent_key", key)?;
        }
        if let Ok(dir) = env::var("MEMBRIDGE_DATA_DIR") {
            builder = builder
                .set_override("server.data_dir", dir.clone())?
                .set_override("agent.data_dir", dir)?;
        }
        if let Ok(url) = env::var("SERVER_URL") {
            builder = builder.set_override("agent.server_url", url)?;
        }
        if let Ok(url) = env::var("MEMBRIDGE_ADVERTISE_URL") {
            builder = builder.set_override("agent.advertise_url", url)?;
        }
        if let Ok(node) = env::var("NODE_ID").or_else(|_| env::var("MEMBRIDGE_NODE_ID")) {
            builder = builder.set_override("agent.node_id", node)?;
        }
        if let Ok(secs) = env::var("HEARTBEAT_INTERVAL_SECONDS") {
            if let Ok(s) = secs.parse::<i64>() {
                builder = builder
                    .set_override("agent.heartbeat_interval_secs", s)?
                    .set_override("server.heartbeat_interval_secs", s)?;
            }
        }
        if let Some(key) = resolve_server_admin_key() {
            builder = builder.set_override("agent.server_admin_key", key)?;
        }
        if parse_bool_env("MEMBRIDGE_DEV") {
            builder = builder
                .set_override("server.dev_mode", true)?
                .set_override("agent.dev_mode", true)?;
        }

        builder.build()?.try_deserialize()
    }
}

/// Resolve the admin key the heartbeat client sends to the control plane.
///
/// `MEMBRIDGE_SERVER_ADMIN_KEY` is canonical; `MEMBRIDGE_ADMIN_KEY` is kept
/// as a deprecated alias because older installs exported only that name.
pub fn resolve_server_admin_key() -> Option<String> {
    if let Ok(key) = env::var("MEMBRIDGE_SERVER_ADMIN_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    match env::var("MEMBRIDGE_ADMIN_KEY") {
        Ok(key) if !key.is_empty() => {
            tracing::warn!(
                "MEMBRIDGE_ADMIN_KEY is deprecated for agents; set MEMBRIDGE_SERVER_ADMIN_KEY"
            );
            Some(key)
        }
        _ => None,
    }
}

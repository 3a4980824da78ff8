//! Dispatching sync commands to agent daemons.
//!
//! The control plane calls agents over HTTP(S) with the agent pre-shared
//! key. Transport failures mark the agent offline and surface as 502 with
//! the cause preserved; an agent-side error keeps its status and body.

use crate::state::Agent;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Timeout for a control-plane-to-agent call; pulls can be slow.
pub const AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Header carrying the agent pre-shared key.
pub const AGENT_HEADER: &str = "x-membridge-agent";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("agent unreachable at {url}: {cause}")]
    Unreachable { url: String, cause: String },

    #[error("agent error: {status} {body}")]
    AgentError { status: u16, body: String },
}

/// POST a JSON body to an agent endpoint and decode the JSON reply.
pub async fn call_agent(
    http: &reqwest::Client,
    agent: &Agent,
    agent_key: Option<&str>,
    path: &str,
    body: &Value,
) -> Result<Value, DispatchError> {
    let url = format!("{}{}", agent.url, path);

    let mut request = http.post(&url).timeout(AGENT_CALL_TIMEOUT).json(body);
    if let Some(key) = agent_key {
        request = request.header(AGENT_HEADER, key);
    }

    let response = request.send().await.map_err(|e| DispatchError::Unreachable {
        url: url.clone(),
        cause: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::AgentError {
            status: status.as_u16(),
            body,
        });
    }

    response.json().await.map_err(|e| DispatchError::AgentError {
        status: status.as_u16(),
        body: format!("invalid JSON from agent: {e}"),
    })
}

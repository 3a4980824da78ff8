//! Pre-shared-key authentication for the agent daemon.
//!
//! Non-health routes require `X-MEMBRIDGE-AGENT`. The local registry
//! endpoints (`/register_project`, `/projects`) are additionally exempt
//! for loopback callers so tooling on the same machine can register
//! projects without carrying the key.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

use crate::AgentState;
use crate::error::ErrorResponse;

/// Header carrying the agent pre-shared key.
pub const AGENT_HEADER: &str = "x-membridge-agent";

pub fn is_open_path(path: &str) -> bool {
    path == "/health"
}

/// Paths loopback callers may use without the key.
pub fn is_localhost_exempt_path(path: &str) -> bool {
    path == "/register_project" || path == "/projects"
}

fn keys_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

pub async fn agent_auth(
    State(state): State<AgentState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if state.config.dev_mode || is_open_path(path) {
        return next.run(request).await;
    }

    if is_localhost_exempt_path(path) {
        let is_loopback = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().is_loopback())
            .unwrap_or(false);
        if is_loopback {
            return next.run(request).await;
        }
    }

    let Some(expected) = state.config.agent_key.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(ErrorResponse {
                code: "CONFIG_ERROR",
                detail: "MEMBRIDGE_AGENT_KEY not configured on agent".to_string(),
            }),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !keys_match(provided, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(ErrorResponse {
                code: "UNAUTHORIZED",
                detail: "Unauthorized — invalid or missing X-MEMBRIDGE-AGENT header".to_string(),
            }),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_path_classification() {
        assert!(is_open_path("/health"));
        assert!(!is_open_path("/sync/push"));
        assert!(is_localhost_exempt_path("/register_project"));
        assert!(is_localhost_exempt_path("/projects"));
        assert!(!is_localhost_exempt_path("/sync/pull"));
    }
}

//! Pre-shared-key authentication for the control plane.
//!
//! Every non-health route requires the `X-MEMBRIDGE-ADMIN` header to match
//! the configured admin key. Health and documentation paths stay open, and
//! dev mode disables the check entirely. A missing server-side key is a
//! configuration error (500), not an auth failure.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::error::{ErrorCode, ErrorResponse};

/// Header carrying the admin pre-shared key.
pub const ADMIN_HEADER: &str = "x-membridge-admin";

/// Paths reachable without authentication.
pub fn is_open_path(path: &str) -> bool {
    path == "/health"
        || path == "/metrics"
        || path.starts_with("/api-docs")
        || path.starts_with("/docs")
}

/// Constant-shape comparison: compare digests instead of raw strings so
/// the equality check does not leak a prefix length.
pub fn keys_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.dev_mode || is_open_path(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(expected) = state.config.admin_key.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(ErrorResponse::new(
                ErrorCode::ConfigError,
                "MEMBRIDGE_ADMIN_KEY not configured on server",
            )),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !keys_match(provided, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(ErrorResponse::new(
                ErrorCode::Unauthorized,
                "Unauthorized — invalid or missing X-MEMBRIDGE-ADMIN header",
            )),
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
    fn test_open_paths() {
        assert!(is_open_path("/health"));
        assert!(is_open_path("/api-docs/openapi.json"));
        assert!(is_open_path("/metrics"));
        assert!(!is_open_path("/projects"));
        assert!(!is_open_path("/agent/heartbeat"));
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "other"));
        assert!(!keys_match("", "secret"));
    }
}

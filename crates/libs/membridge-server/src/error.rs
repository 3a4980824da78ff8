//! Error handling for the control-plane HTTP surface.
//!
//! Follows the house rules: never expose internals, machine-readable error
//! codes, semantic HTTP status mapping. Agent failures surface as 502 with
//! the agent's detail preserved.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error codes for machine-readable error classification.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 4xx Client Errors
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,

    // 5xx Server Errors
    InternalError,
    DatabaseError,
    ConfigError,
    BadGateway,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::BadGateway => "BAD_GATEWAY",
        }
    }
}

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code for client-side handling.
    pub code: &'static str,
    /// Human-readable error message (safe for display).
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code: code.as_str(),
            detail: detail.into(),
        }
    }
}

/// Control-plane error type.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Agent gateway error: {0}")]
    BadGateway(String),

    #[error("Database error")]
    Db(#[from] libsql::Error),

    #[error("Core error")]
    Core(#[from] membridge_core::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Full error server-side; sanitized detail to the caller.
        tracing::error!(error = ?self, "Request error");

        let (status, response) = match self {
            ServerError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(ErrorCode::NotFound, msg),
            ),
            ServerError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(ErrorCode::Conflict, msg),
            ),
            ServerError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(ErrorCode::BadRequest, msg),
            ),
            ServerError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(ErrorCode::Unauthorized, "Authentication required"),
            ),
            ServerError::ConfigError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::ConfigError, msg),
            ),
            ServerError::BadGateway(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new(ErrorCode::BadGateway, msg),
            ),
            ServerError::Db(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::DatabaseError, "Database operation failed"),
            ),
            ServerError::Core(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::InternalError, "Sync core operation failed"),
            ),
            ServerError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(ErrorCode::InternalError, "File operation failed"),
            ),
        };

        (status, Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_serialization() {
        let resp = ErrorResponse::new(ErrorCode::NotFound, "Project not found: demo");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("NOT_FOUND"));
        assert!(json.contains("Project not found: demo"));
    }

    #[test]
    fn test_error_codes_are_screaming_snake() {
        assert_eq!(ErrorCode::BadGateway.as_str(), "BAD_GATEWAY");
        assert_eq!(ErrorCode::Conflict.as_str(), "CONFLICT");
    }
}

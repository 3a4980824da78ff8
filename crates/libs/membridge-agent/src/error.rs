//! Agent-side HTTP error handling, mirroring the control plane's
//! code + detail response shape.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<membridge_core::Error> for AgentError {
    fn from(err: membridge_core::Error) -> Self {
        match err {
            membridge_core::Error::Config(msg) => AgentError::Config(msg),
            membridge_core::Error::InvalidInput(msg) => AgentError::BadRequest(msg),
            other => AgentError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "Request error");
        let (status, code, detail) = match self {
            AgentError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AgentError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized — invalid or missing X-MEMBRIDGE-AGENT header".to_string(),
            ),
            AgentError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AgentError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg),
            AgentError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };
        (status, Json(ErrorResponse { code, detail })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

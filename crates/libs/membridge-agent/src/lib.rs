//! Membridge agent daemon.
//!
//! Runs on every machine in the fleet: exposes the local sync API, keeps
//! the persistent project registry, posts heartbeats to the control plane,
//! and registers itself there at startup (best-effort). The heartbeat and
//! registration tasks are owned by the process lifetime — shutdown signals
//! them over a watch channel and awaits their exit.

use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod auth;
pub mod error;
pub mod heartbeat;

pub use error::AgentError;
use heartbeat::HeartbeatClient;
use membridge_common::ServiceError;
use membridge_common::config::AgentConfig;
use membridge_core::registry::ProjectRegistry;

// --- Application State
#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub registry: Arc<Mutex<ProjectRegistry>>,
    pub http: reqwest::Client,
    pub start_time: Instant,
}

impl AgentState {
    pub fn new(config: AgentConfig) -> Result<Self, ServiceError> {
        let registry_path = Path::new(&config.data_dir).join("projects.json");
        let registry =
            ProjectRegistry::open(registry_path).map_err(|e| ServiceError::Core(e.to_string()))?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(Mutex::new(registry)),
            http: reqwest::Client::new(),
            start_time: Instant::now(),
        })
    }
}

pub fn build_router(state: AgentState) -> Router {
    Router::new()
        .merge(api::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::agent_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Best-effort self-registration with the control plane. A conflict (409)
/// means we are already registered; any failure is logged and ignored.
pub async fn register_runtime(state: AgentState) {
    let (Some(server_url), Some(advertise_url)) = (
        state.config.server_url.clone(),
        state.config.advertise_url.clone(),
    ) else {
        return;
    };

    let url = format!("{}/agents", server_url.trim_end_matches('/'));
    let mut request = state
        .http
        .post(&url)
        .timeout(Duration::from_secs(10))
        .json(&serde_json::json!({
            "name": state.config.node_id,
            "url": advertise_url,
        }));
    if let Some(key) = &state.config.server_admin_key {
        request = request.header("x-membridge-admin", key);
    }

    match request.send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!(node = %state.config.node_id, "registered with control plane");
        }
        Ok(resp) if resp.status() == reqwest::StatusCode::CONFLICT => {
            tracing::debug!(node = %state.config.node_id, "already registered with control plane");
        }
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "runtime registration rejected (ignored)");
        }
        Err(e) => {
            tracing::warn!(error = %e, "runtime registration failed (ignored)");
        }
    }
}

pub async fn run(config: AgentConfig) -> Result<(), ServiceError> {
    let host = config.host.clone();
    let port = config.port;
    let state = AgentState::new(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Supervised background tasks: heartbeat loop and one-shot runtime
    // registration.
    let heartbeat_handle = HeartbeatClient::from_config(&state.config).map(|client| {
        tracing::info!(
            server = state.config.server_url.as_deref().unwrap_or(""),
            interval = state.config.heartbeat_interval_secs,
            "heartbeat loop starting"
        );
        tokio::spawn(client.run(
            state.registry.clone(),
            Duration::from_secs(state.config.heartbeat_interval_secs.max(1)),
            shutdown_rx.clone(),
        ))
    });
    let register_handle = tokio::spawn(register_runtime(state.clone()));

    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ServiceError::Core(format!("invalid listen address: {e}")))?;
    tracing::info!("Membridge agent starting on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // ConnectInfo enables the loopback exemption in the auth middleware.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Cancel and join background tasks.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = heartbeat_handle {
        let _ = handle.await;
    }
    let _ = register_handle.await;

    Ok(())
}

#[allow(clippy::expect_used)] // Signal handler setup is infallible in practice; panic is acceptable
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}

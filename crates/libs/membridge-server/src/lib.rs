//! Membridge control plane.
//!
//! Central HTTP API tracking projects, agents, node records, and the
//! preferred-primary assignment per project, plus a persistent job history
//! for every dispatched push/pull. Agents post heartbeats here and collect
//! their role assignments.

use axum::http::header::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

// Modules
pub mod api;
pub mod auth;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod openapi;
pub mod state;

pub use error::ServerError;
use jobs::JobStore;
use membridge_common::config::ServerConfig;
use state::Registry;

// --- Application State
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub jobs: JobStore,
    pub http: reqwest::Client,
    pub config: Arc<ServerConfig>,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,
}

impl AppState {
    /// Node records older than 3x the heartbeat interval present as
    /// offline.
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.config.heartbeat_interval_secs as i64) * 3)
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[allow(clippy::expect_used)] // Metrics setup is infallible; panic acceptable during initialization
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            const EXPONENTIAL_SECONDS: &[f64] = &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ];

            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("http_request_duration_seconds".to_string()),
                    EXPONENTIAL_SECONDS,
                )
                .expect("Failed to set buckets")
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Build the full application state for the given configuration.
pub async fn build_state(config: ServerConfig) -> std::result::Result<AppState, ServerError> {
    let jobs = JobStore::open(std::path::Path::new(&config.data_dir)).await?;
    Ok(AppState {
        registry: Arc::new(Registry::new()),
        jobs,
        http: reqwest::Client::new(),
        config: Arc::new(config),
        metrics_handle: setup_metrics(),
        start_time: Instant::now(),
    })
}

/// Assemble the router: authenticated API routes plus the open health,
/// docs, and metrics endpoints.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            auth::admin_auth,
        ))
        // Public routes (no auth)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(app_state)
}

pub async fn run(config: ServerConfig) -> std::result::Result<(), ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let app_state = build_state(config).await?;

    if app_state.config.dev_mode {
        tracing::warn!("dev mode: authentication disabled");
    } else if app_state.config.admin_key.is_none() {
        tracing::warn!("MEMBRIDGE_ADMIN_KEY not set; all authenticated routes will answer 500");
    }

    let app = build_router(app_state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ServerError::ConfigError(format!("invalid listen address: {e}")))?;
    tracing::info!("Membridge control plane starting on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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

async fn openapi_json() -> impl IntoResponse {
    axum::Json(openapi::ApiDoc::openapi())
}

#[derive(serde::Serialize, ToSchema)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    projects: usize,
    agents: usize,
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok",
        service: "membridge-control-plane",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        projects: state.registry.project_count().await,
        agents: state.registry.agent_count().await,
    };
    (StatusCode::OK, axum::Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

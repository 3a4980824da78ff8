//! Agent HTTP surface.
//!
//! Sync endpoints build a fresh engine from the per-project environment
//! and run it in-process; the response carries the outcome's exit code in
//! `returncode` so job rows keep the subprocess convention.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::AgentState;
use crate::error::{AgentError, Result};
use membridge_core::config::SyncConfig;
use membridge_core::registry::ProjectEntry;
use membridge_core::remote::S3ObjectStore;
use membridge_core::sync::{DoctorReport, PullOutcome, PushOutcome, SyncEngine};
use membridge_core::worker::ProcessWorker;
use membridge_core::canonical_project_id;
use std::time::Duration;

/// Bound on one in-process push or pull.
const SYNC_TIMEOUT: Duration = Duration::from_secs(120);

pub fn routes() -> Router<AgentState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/sync/pull", post(sync_pull))
        .route("/sync/push", post(sync_push))
        // Aliases kept for older tooling.
        .route("/pull", post(sync_pull))
        .route("/push", post(sync_push))
        .route("/doctor", post(doctor))
        .route("/register_project", post(register_project))
        .route("/projects", get(list_projects))
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

// -- Diagnostics

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    hostname: String,
    node_id: String,
    projects: usize,
}

async fn health(State(state): State<AgentState>) -> Json<HealthResponse> {
    let projects = state.registry.lock().await.len();
    Json(HealthResponse {
        status: "ok",
        service: "membridge-agent",
        version: env!("CARGO_PKG_VERSION"),
        hostname: local_hostname(),
        node_id: state.config.node_id.clone(),
        projects,
    })
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub project: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub project: String,
    pub canonical_id: String,
    pub hostname: String,
    pub detail: String,
    pub db_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

async fn status(Query(query): Query<StatusQuery>) -> Json<StatusResponse> {
    let canonical_id = canonical_project_id(&query.project);
    let hostname = local_hostname();
    match SyncConfig::for_project(&query.project) {
        Ok(cfg) => Json(StatusResponse {
            ok: true,
            project: query.project,
            canonical_id,
            hostname,
            detail: "Agent ready".to_string(),
            db_exists: cfg.db_path.exists(),
            db_path: Some(cfg.db_path.display().to_string()),
        }),
        Err(e) => Json(StatusResponse {
            ok: false,
            project: query.project,
            canonical_id,
            hostname,
            detail: format!("{e}. Configure the sync environment first."),
            db_exists: false,
            db_path: None,
        }),
    }
}

// -- Sync execution

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub project: String,
    /// Safe default: leave the worker stopped after a pull.
    #[serde(default = "default_true")]
    pub no_restart_worker: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub ok: bool,
    pub action: &'static str,
    pub project: String,
    pub canonical_id: String,
    pub hostname: String,
    pub detail: String,
    pub returncode: i32,
}

fn build_engine(
    project: &str,
    no_restart_worker: bool,
) -> Result<SyncEngine<S3ObjectStore, ProcessWorker>> {
    let mut cfg = SyncConfig::for_project(project)?;
    cfg.no_restart_worker = cfg.no_restart_worker || no_restart_worker;
    let store = S3ObjectStore::new(&cfg.store);
    let worker = ProcessWorker::new(cfg.worker.clone());
    Ok(SyncEngine::new(store, worker, cfg))
}

async fn record_sync(
    state: &AgentState,
    project: &str,
    obs_count: Option<i64>,
    db_sha: Option<String>,
) {
    let mut registry = state.registry.lock().await;
    if let Ok(entry) = registry.register(project, None, None, None) {
        let _ = registry.touch(&entry.canonical_id, obs_count, db_sha);
    }
}

async fn sync_push(
    State(state): State<AgentState>,
    Json(body): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let engine = build_engine(&body.project, false)?;
    let canonical_id = engine.config().canonical_id.clone();
    let outcome = match tokio::time::timeout(SYNC_TIMEOUT, engine.push()).await {
        Ok(outcome) => outcome,
        Err(_) => PushOutcome::TransportFailed {
            cause: format!("push timed out after {}s", SYNC_TIMEOUT.as_secs()),
        },
    };

    if let PushOutcome::Uploaded { sha256, counts, .. } = &outcome {
        record_sync(
            &state,
            &body.project,
            Some(counts.observations),
            Some(sha256.clone()),
        )
        .await;
    }

    Ok(Json(SyncResponse {
        ok: outcome.is_success(),
        action: "push",
        project: body.project,
        canonical_id,
        hostname: local_hostname(),
        detail: outcome.detail(),
        returncode: outcome.exit_code(),
    }))
}

async fn sync_pull(
    State(state): State<AgentState>,
    Json(body): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let engine = build_engine(&body.project, body.no_restart_worker)?;
    let canonical_id = engine.config().canonical_id.clone();
    let outcome = match tokio::time::timeout(SYNC_TIMEOUT, engine.pull()).await {
        Ok(outcome) => outcome,
        Err(_) => PullOutcome::TransportFailed {
            cause: format!("pull timed out after {}s", SYNC_TIMEOUT.as_secs()),
        },
    };

    if let PullOutcome::Replaced { sha256, counts, .. } = &outcome {
        record_sync(
            &state,
            &body.project,
            Some(counts.observations),
            Some(sha256.clone()),
        )
        .await;
    }

    Ok(Json(SyncResponse {
        ok: outcome.is_success(),
        action: "pull",
        project: body.project,
        canonical_id,
        hostname: local_hostname(),
        detail: outcome.detail(),
        returncode: outcome.exit_code(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DoctorRequest {
    pub project: String,
}

async fn doctor(Json(body): Json<DoctorRequest>) -> Result<Json<DoctorReport>> {
    let engine = build_engine(&body.project, true)?;
    Ok(Json(engine.doctor().await))
}

// -- Local project registry

#[derive(Debug, Deserialize)]
pub struct RegisterProjectRequest {
    pub project: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

async fn register_project(
    State(state): State<AgentState>,
    Json(body): Json<RegisterProjectRequest>,
) -> Result<Json<ProjectEntry>> {
    if body.project.is_empty() {
        return Err(AgentError::BadRequest("project name is empty".to_string()));
    }
    let mut registry = state.registry.lock().await;
    let entry = registry
        .register(&body.project, body.path, body.repo_url, body.notes)
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    Ok(Json(entry))
}

async fn list_projects(State(state): State<AgentState>) -> Json<Vec<ProjectEntry>> {
    Json(state.registry.lock().await.list())
}

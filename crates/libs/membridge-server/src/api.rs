//! Control-plane HTTP surface.
//!
//! Projects and agents CRUD, sync dispatch with job rows, heartbeat
//! ingestion, node listings, and administrative leadership selection.
//! Leadership selection only writes the in-memory preference and cached
//! roles — never the object-store lease; nodes discover the change on
//! their next `determine_role`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use crate::dispatch::{self, DispatchError};
use crate::error::{Result, ServerError};
use crate::state::{
    Agent, AgentStatus, HeartbeatRequest, LeadershipView, NodeRecord, Project,
};
use crate::{AppState, jobs::Job};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        // All /projects/{cid}/... routes share the parameter name; the
        // bare route receives the project *name*, the nested ones the
        // canonical id.
        .route("/projects/{cid}", get(get_project).delete(delete_project))
        .route("/agents", get(list_agents).post(register_agent))
        .route("/agents/{name}", delete(unregister_agent))
        .route("/sync/pull", post(sync_pull))
        .route("/sync/push", post(sync_push))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/agent/heartbeat", post(agent_heartbeat))
        .route("/projects/{cid}/nodes", get(list_nodes))
        .route("/projects/{cid}/leadership", get(get_leadership))
        .route("/projects/{cid}/leadership/select", post(select_leadership))
}

// -- Projects

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreate {
    pub name: String,
}

#[utoipa::path(
    get,
    path = "/projects",
    responses((status = 200, description = "All registered projects", body = [Project]))
)]
pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    Json(state.registry.list_projects().await)
}

#[utoipa::path(
    post,
    path = "/projects",
    request_body = ProjectCreate,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 409, description = "Project already exists")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<ProjectCreate>,
) -> Result<(StatusCode, Json<Project>)> {
    if body.name.is_empty() || body.name.len() > 128 {
        return Err(ServerError::BadRequest(
            "project name must be 1..=128 characters".to_string(),
        ));
    }
    let project = state.registry.create_project(&body.name).await?;
    info!(project = %project.name, canonical_id = %project.canonical_id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Project>> {
    state
        .registry
        .get_project(&name)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::not_found(format!("Project '{name}' not found")))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    if state.registry.delete_project(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::not_found(format!("Project '{name}' not found")))
    }
}

// -- Agents

#[derive(Debug, Deserialize, ToSchema)]
pub struct AgentCreate {
    pub name: String,
    pub url: String,
}

#[utoipa::path(
    get,
    path = "/agents",
    responses((status = 200, description = "All registered agents", body = [Agent]))
)]
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    Json(state.registry.list_agents().await)
}

pub async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentCreate>,
) -> Result<(StatusCode, Json<Agent>)> {
    if body.name.is_empty() || body.name.len() > 128 {
        return Err(ServerError::BadRequest(
            "agent name must be 1..=128 characters".to_string(),
        ));
    }
    let agent = state.registry.register_agent(&body.name, &body.url).await?;
    info!(agent = %agent.name, url = %agent.url, "agent registered");
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn unregister_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    if state.registry.delete_agent(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::not_found(format!("Agent '{name}' not found")))
    }
}

// -- Sync dispatch

#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncDispatchRequest {
    pub project: String,
    pub agent: String,
    #[serde(default)]
    pub no_restart_worker: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncDispatchResponse {
    pub ok: bool,
    pub job_id: String,
    pub project: String,
    pub agent: String,
    pub canonical_id: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
}

#[utoipa::path(
    post,
    path = "/sync/pull",
    request_body = SyncDispatchRequest,
    responses(
        (status = 200, description = "Pull dispatched", body = SyncDispatchResponse),
        (status = 404, description = "Unknown project or agent"),
        (status = 502, description = "Agent unreachable or failed")
    )
)]
pub async fn sync_pull(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SyncDispatchRequest>,
) -> Result<Json<SyncDispatchResponse>> {
    dispatch_sync(state, "pull", body, headers).await
}

#[utoipa::path(
    post,
    path = "/sync/push",
    request_body = SyncDispatchRequest,
    responses(
        (status = 200, description = "Push dispatched", body = SyncDispatchResponse),
        (status = 404, description = "Unknown project or agent"),
        (status = 502, description = "Agent unreachable or failed")
    )
)]
pub async fn sync_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SyncDispatchRequest>,
) -> Result<Json<SyncDispatchResponse>> {
    dispatch_sync(state, "push", body, headers).await
}

async fn dispatch_sync(
    state: AppState,
    action: &str,
    body: SyncDispatchRequest,
    headers: HeaderMap,
) -> Result<Json<SyncDispatchResponse>> {
    let project = state
        .registry
        .get_project(&body.project)
        .await
        .ok_or_else(|| ServerError::not_found(format!("Project '{}' not found", body.project)))?;
    let agent = state
        .registry
        .get_agent(&body.agent)
        .await
        .ok_or_else(|| ServerError::not_found(format!("Agent '{}' not found", body.agent)))?;

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let job = state
        .jobs
        .create_job(
            action,
            &body.project,
            &project.canonical_id,
            Some(&body.agent),
            request_id.as_deref(),
        )
        .await?;
    metrics::counter!("membridge_sync_jobs_total", "action" => action.to_string()).increment(1);

    state
        .registry
        .set_agent_status(&body.agent, AgentStatus::Syncing, false)
        .await;

    info!(action, project = %body.project, agent = %body.agent, job_id = %job.id, "dispatching sync");

    let payload = json!({
        "project": body.project,
        "no_restart_worker": body.no_restart_worker.unwrap_or(true),
    });
    let result = dispatch::call_agent(
        &state.http,
        &agent,
        state.config.agent_key.as_deref(),
        &format!("/sync/{action}"),
        &payload,
    )
    .await;

    match result {
        Ok(value) => {
            state
                .registry
                .set_agent_status(&body.agent, AgentStatus::Online, true)
                .await;
            let ok = value.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false);
            let detail = value
                .get("detail")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(if ok { "completed" } else { "failed" })
                .to_string();
            let returncode = value
                .get("returncode")
                .and_then(serde_json::Value::as_i64)
                .map(|c| c as i32);
            state
                .jobs
                .finish_job(
                    &job.id,
                    if ok { "completed" } else { "failed" },
                    Some(&detail),
                    None,
                    None,
                    returncode,
                )
                .await?;
            Ok(Json(SyncDispatchResponse {
                ok,
                job_id: job.id,
                project: body.project,
                agent: body.agent,
                canonical_id: project.canonical_id,
                detail,
                returncode,
            }))
        }
        Err(DispatchError::Unreachable { url, cause }) => {
            state
                .registry
                .set_agent_status(&body.agent, AgentStatus::Offline, false)
                .await;
            let detail = format!("Agent '{}' unreachable at {url}: {cause}", body.agent);
            let _ = state
                .jobs
                .finish_job(&job.id, "failed", Some(&detail), None, None, None)
                .await;
            Err(ServerError::BadGateway(detail))
        }
        Err(DispatchError::AgentError { status, body: agent_body }) => {
            state
                .registry
                .set_agent_status(&body.agent, AgentStatus::Error, false)
                .await;
            let detail = format!("Agent error: {status} {agent_body}");
            let _ = state
                .jobs
                .finish_job(&job.id, "failed", Some(&detail), None, None, None)
                .await;
            Err(ServerError::BadGateway(detail))
        }
    }
}

// -- Job history

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub project: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<Job>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let jobs = state.jobs.list_jobs(limit, query.project.as_deref()).await?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    state
        .jobs
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::not_found(format!("Job '{id}' not found")))
}

// -- Heartbeats and leadership

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub canonical_id: String,
}

#[utoipa::path(
    post,
    path = "/agent/heartbeat",
    request_body = HeartbeatRequest,
    responses((status = 200, description = "Heartbeat recorded", body = HeartbeatResponse))
)]
pub async fn agent_heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>> {
    if body.node_id.is_empty() || body.canonical_id.is_empty() {
        return Err(ServerError::BadRequest(
            "node_id and canonical_id are required".to_string(),
        ));
    }
    let role = state.registry.record_heartbeat(&body).await;
    metrics::counter!("membridge_heartbeats_total").increment(1);
    Ok(Json(HeartbeatResponse {
        ok: true,
        role,
        canonical_id: body.canonical_id,
    }))
}

pub async fn list_nodes(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Json<Vec<NodeRecord>> {
    Json(state.registry.list_nodes(&cid, state.staleness()).await)
}

#[utoipa::path(
    get,
    path = "/projects/{cid}/leadership",
    params(("cid" = String, Path, description = "Canonical project id")),
    responses((status = 200, description = "Leadership preference and known nodes", body = LeadershipView))
)]
pub async fn get_leadership(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Json<LeadershipView> {
    Json(state.registry.leadership_view(&cid, state.staleness()).await)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeadershipSelectRequest {
    pub primary_node_id: String,
    #[serde(default)]
    pub lease_seconds: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeadershipSelectResponse {
    pub ok: bool,
    pub canonical_id: String,
    pub primary_node_id: String,
    pub lease_seconds: i64,
}

#[utoipa::path(
    post,
    path = "/projects/{cid}/leadership/select",
    params(("cid" = String, Path, description = "Canonical project id")),
    request_body = LeadershipSelectRequest,
    responses((status = 200, description = "Preferred primary set", body = LeadershipSelectResponse))
)]
pub async fn select_leadership(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    Json(body): Json<LeadershipSelectRequest>,
) -> Result<Json<LeadershipSelectResponse>> {
    if body.primary_node_id.is_empty() {
        return Err(ServerError::BadRequest(
            "primary_node_id is required".to_string(),
        ));
    }
    state.registry.select_primary(&cid, &body.primary_node_id).await;
    info!(canonical_id = %cid, primary = %body.primary_node_id, "preferred primary selected");
    Ok(Json(LeadershipSelectResponse {
        ok: true,
        canonical_id: cid,
        primary_node_id: body.primary_node_id,
        lease_seconds: body.lease_seconds.unwrap_or(3600),
    }))
}

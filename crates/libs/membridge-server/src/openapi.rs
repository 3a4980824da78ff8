//! OpenAPI document for the control-plane surface, served at
//! `/api-docs/openapi.json` (open, like the health path).

use utoipa::OpenApi;

use crate::api;
use crate::jobs::Job;
use crate::state::{Agent, AgentStatus, HeartbeatRequest, LeadershipView, NodeRecord, Project};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Membridge Control Plane",
        description = "Centralized API for managing Claude memory sync projects and agents",
    ),
    paths(
        api::list_projects,
        api::create_project,
        api::list_agents,
        api::sync_pull,
        api::sync_push,
        api::agent_heartbeat,
        api::get_leadership,
        api::select_leadership,
    ),
    components(schemas(
        Project,
        Agent,
        AgentStatus,
        NodeRecord,
        HeartbeatRequest,
        LeadershipView,
        Job,
        api::ProjectCreate,
        api::AgentCreate,
        api::SyncDispatchRequest,
        api::SyncDispatchResponse,
        api::HeartbeatResponse,
        api::LeadershipSelectRequest,
        api::LeadershipSelectResponse,
    ))
)]
pub struct ApiDoc;

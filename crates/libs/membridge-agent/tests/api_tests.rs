//! Agent router tests: auth, localhost exemption, and the local registry
//! endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use membridge_agent::{AgentState, build_router};
use membridge_common::config::AgentConfig;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;

const AGENT_KEY: &str = "test-agent-key";

fn test_agent_config(dir: &TempDir, dev_mode: bool) -> AgentConfig {
    AgentConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        agent_key: Some(AGENT_KEY.to_string()),
        server_url: None,
        server_admin_key: None,
        node_id: "rpi4b".to_string(),
        heartbeat_interval_secs: 10,
        data_dir: dir.path().join("data").display().to_string(),
        advertise_url: None,
        dev_mode,
    }
}

fn test_app(dir: &TempDir, dev_mode: bool) -> Router {
    build_router(AgentState::new(test_agent_config(dir, dev_mode)).unwrap())
}

struct SendOptions {
    with_key: bool,
    from_loopback: bool,
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    opts: SendOptions,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if opts.with_key {
        builder = builder.header("x-membridge-agent", AGENT_KEY);
    }
    let mut request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let peer: SocketAddr = if opts.from_loopback {
        "127.0.0.1:54321".parse().unwrap()
    } else {
        "192.168.1.99:54321".parse().unwrap()
    };
    request.extensions_mut().insert(ConnectInfo(peer));

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_is_open() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, false);

    let (status, body) = send(
        &app,
        "GET",
        "/health",
        None,
        SendOptions { with_key: false, from_loopback: false },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "membridge-agent");
    assert_eq!(body["node_id"], "rpi4b");
}

#[tokio::test]
async fn test_projects_requires_key_for_remote_callers() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, false);

    let (status, body) = send(
        &app,
        "GET",
        "/projects",
        None,
        SendOptions { with_key: false, from_loopback: false },
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &app,
        "GET",
        "/projects",
        None,
        SendOptions { with_key: true, from_loopback: false },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_localhost_exemption_for_registry_endpoints() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, false);

    // Loopback callers may use the registry endpoints without the key.
    let (status, body) = send(
        &app,
        "POST",
        "/register_project",
        Some(json!({"project": "garden-seedling", "path": "/srv/garden"})),
        SendOptions { with_key: false, from_loopback: true },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["canonical_id"], "aeeafec3a5b5710f");

    let (status, body) = send(
        &app,
        "GET",
        "/projects",
        None,
        SendOptions { with_key: false, from_loopback: true },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    // The exemption does not extend to the sync endpoints.
    let (status, _) = send(
        &app,
        "POST",
        "/sync/push",
        Some(json!({"project": "garden-seedling"})),
        SendOptions { with_key: false, from_loopback: true },
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dev_mode_disables_auth() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, true);

    let (status, _) = send(
        &app,
        "GET",
        "/projects",
        None,
        SendOptions { with_key: false, from_loopback: false },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_project_persists_to_registry_file() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, true);

    send(
        &app,
        "POST",
        "/register_project",
        Some(json!({"project": "alpha", "repo_url": "https://example.com/alpha.git"})),
        SendOptions { with_key: false, from_loopback: true },
    )
    .await;

    let raw = std::fs::read(dir.path().join("data/projects.json")).unwrap();
    let entries: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(entries["8ed3f6ad685b959e"]["project_id"], "alpha");
}

#[tokio::test]
async fn test_register_project_rejects_empty_name() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir, true);

    let (status, body) = send(
        &app,
        "POST",
        "/register_project",
        Some(json!({"project": ""})),
        SendOptions { with_key: false, from_loopback: true },
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

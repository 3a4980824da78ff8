//! Heartbeat client tests against a mock control plane.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use membridge_agent::heartbeat::{HeartbeatClient, NODE_ONLY_CANONICAL_ID};
use membridge_common::config::AgentConfig;
use membridge_core::registry::ProjectRegistry;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_with_server(url: Option<String>) -> AgentConfig {
    AgentConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        agent_key: None,
        server_url: url,
        server_admin_key: Some("admin-secret".to_string()),
        node_id: "rpi4b".to_string(),
        heartbeat_interval_secs: 10,
        data_dir: "data".to_string(),
        advertise_url: None,
        dev_mode: false,
    }
}

#[test]
fn test_client_disabled_without_server_url() {
    assert!(HeartbeatClient::from_config(&config_with_server(None)).is_none());
    assert!(
        HeartbeatClient::from_config(&config_with_server(Some("http://cp:5000".into()))).is_some()
    );
}

#[test]
fn test_build_payloads_node_only_when_no_projects() {
    let client =
        HeartbeatClient::from_config(&config_with_server(Some("http://cp:5000".into()))).unwrap();
    let payloads = client.build_payloads(&[], vec!["192.168.1.10".to_string()]);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].canonical_id, NODE_ONLY_CANONICAL_ID);
    assert_eq!(payloads[0].project_id, None);
    assert_eq!(payloads[0].node_id, "rpi4b");
    assert_eq!(payloads[0].ip_addrs, vec!["192.168.1.10"]);
}

#[test]
fn test_build_payloads_one_per_project() {
    let dir = TempDir::new().unwrap();
    let mut registry = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();
    registry.register("alpha", None, None, None).unwrap();
    registry.register("demo", None, None, None).unwrap();

    let client =
        HeartbeatClient::from_config(&config_with_server(Some("http://cp:5000".into()))).unwrap();
    let payloads = client.build_payloads(&registry.list(), vec![]);
    assert_eq!(payloads.len(), 2);
    let cids: Vec<&str> = payloads.iter().map(|p| p.canonical_id.as_str()).collect();
    assert!(cids.contains(&"8ed3f6ad685b959e")); // alpha
    assert!(cids.contains(&"2a97516c354b6884")); // demo
}

#[tokio::test]
async fn test_beat_once_posts_per_project_with_admin_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/heartbeat"))
        .and(header("x-membridge-admin", "admin-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "role": "primary",
            "canonical_id": "8ed3f6ad685b959e",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut registry = ProjectRegistry::open(dir.path().join("projects.json")).unwrap();
    registry.register("alpha", None, None, None).unwrap();

    let client =
        HeartbeatClient::from_config(&config_with_server(Some(server.uri()))).unwrap();
    let acks = client.beat_once(&registry.list()).await.unwrap();

    assert_eq!(acks.len(), 1);
    assert!(acks[0].ok);
    assert_eq!(acks[0].role.as_deref(), Some("primary"));
}

#[tokio::test]
async fn test_beat_once_propagates_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/heartbeat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client =
        HeartbeatClient::from_config(&config_with_server(Some(server.uri()))).unwrap();
    assert!(client.beat_once(&[]).await.is_err());
}

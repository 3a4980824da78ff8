//! Agent daemon entry point.

use membridge_common::config::AppConfig;
use membridge_common::tracing::setup_tracing;

#[tokio::main]
async fn main() -> membridge_common::Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    setup_tracing(json_logs);

    let config = AppConfig::load()?;
    tracing::info!(
        host = %config.agent.host,
        port = config.agent.port,
        node_id = %config.agent.node_id,
        "loaded agent configuration"
    );

    membridge_agent::run(config.agent).await
}

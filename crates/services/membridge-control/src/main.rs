//! Control-plane daemon entry point.

use membridge_common::config::AppConfig;
use membridge_common::tracing::setup_tracing;

#[tokio::main]
async fn main() -> membridge_common::Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    setup_tracing(json_logs);

    let config = AppConfig::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.server.data_dir,
        "loaded control-plane configuration"
    );

    membridge_server::run(config.server)
        .await
        .map_err(|e| membridge_common::ServiceError::Core(e.to_string()))
}

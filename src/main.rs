/// flowcore: workflow DAG execution engine
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server together with the scheduler's worker pool.

use flowcore::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Execution API at /api/executions/* and /api/workflows/{id}/executions
/// - Webhook triggers at /webhook/{workflow_id}/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

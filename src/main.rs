/// Runway: durable, queue-driven workflow execution engine
///
/// The server provides:
/// - Workflow registration at PUT /api/workflows/{id}
/// - Synchronous execution at POST /api/workflows/{id}/execute
/// - Durable runs at /api/workflows/{id}/runs and /api/runs/{id}
/// - Health check at /healthz

use runway::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:3004 and sqlite://data/runway.db, overridable via RUNWAY_* env vars
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

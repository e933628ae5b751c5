/// processway server entry point
///
/// Serves:
/// - Definition deployment at /api/definitions
/// - Process runtime at /api/process-instances, /api/tasks, /api/jobs, /api/messages, /api/signals
/// - History at /api/history/*
/// - Health check at /healthz

use processway::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from PROCESSWAY_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

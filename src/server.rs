/// Server setup and initialization
///
/// Wires together all components: database pool, process engine, job executor, the
/// background acquisition service and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    persistence::schema,
    runtime::{JobAcquisitionService, JobExecutor, ProcessEngine},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Initializes all components and wires them together into a complete application.
/// The job acquisition service runs in the background when the job executor is enabled.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Connecting to database");
    let pool = schema::connect(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("🚀 Initializing process engine");
    let engine = Arc::new(
        ProcessEngine::new(pool, config.engine.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize process engine: {}", e))?,
    );

    tracing::info!("⚙️ Initializing job executor");
    let executor = Arc::new(JobExecutor::new(Arc::clone(&engine)));

    if config.engine.jobs.enabled {
        tracing::info!("⏰ Initializing job acquisition service");
        let acquisition = Arc::new(
            JobAcquisitionService::new(Arc::clone(&executor))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize job acquisition: {}", e))?,
        );
        acquisition.start().await?;

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Err(e) = acquisition.stop().await {
                    tracing::error!("❌ Failed to stop job acquisition: {}", e);
                }
            }
        });
    } else {
        tracing::info!("⏸️ Job executor disabled; jobs run only on demand");
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(AppState { engine, executor });

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Router over already constructed services
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(state))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting processway server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

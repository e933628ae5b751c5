/// HTTP API Layer
///
/// REST endpoints over the process engine services:
/// - Definition deployment and lookup
/// - Process instance lifecycle and variables
/// - Task claiming and completion
/// - Job administration, message/signal correlation and history

use crate::error::EngineError;
use crate::runtime::{JobExecutor, ProcessEngine};
use axum::{http::StatusCode, Router};
use std::sync::Arc;

pub mod definitions;
pub mod events;
pub mod history;
pub mod jobs;
pub mod process_instances;
pub mod tasks;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProcessEngine>,
    /// Used to run single jobs on demand
    pub executor: Arc<JobExecutor>,
}

/// All API routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(definitions::routes())
        .merge(process_instances::routes())
        .merge(tasks::routes())
        .merge(jobs::routes())
        .merge(events::routes())
        .merge(history::routes())
}

/// Map an engine failure onto a status code, logging it
pub(crate) fn error_status(error: EngineError) -> StatusCode {
    let status = match &error {
        EngineError::NotFound { .. } | EngineError::DefinitionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::IllegalArgument(_)
        | EngineError::InvalidTimerExpression { .. }
        | EngineError::UnknownJobHandler(_) => StatusCode::BAD_REQUEST,
        EngineError::OptimisticLocking { .. } | EngineError::IllegalState(_) => StatusCode::CONFLICT,
        EngineError::Database(_) | EngineError::Serialization(_) | EngineError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        tracing::error!("❌ Request failed: {}", error);
    } else {
        tracing::warn!("⚠️ Request rejected ({}): {}", status, error);
    }
    status
}

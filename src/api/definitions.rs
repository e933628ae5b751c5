/// Process definition endpoints
///
/// Deployment always creates a new version of the definition key.

use crate::api::{error_status, AppState};
use crate::definition::{DeploymentRequest, ProcessDefinition};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/definitions", get(list_definitions).post(deploy_definition))
        .route("/api/definitions/{id}", get(get_definition))
}

/// Deploy a definition
///
/// POST /api/definitions
/// Body: { "key": "...", "name": "...", "activities": [...], "flows": [...] }
async fn deploy_definition(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> Result<(StatusCode, Json<ProcessDefinition>), StatusCode> {
    if request.name.is_empty() || request.activities.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let compiled = state.engine.deploy(request).await.map_err(error_status)?;
    tracing::info!("✅ Deployed definition via API: {}", compiled.id());
    Ok((StatusCode::CREATED, Json(compiled.definition.clone())))
}

async fn list_definitions(State(state): State<AppState>) -> Json<Vec<ProcessDefinition>> {
    Json(state.engine.list_definitions())
}

async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessDefinition>, StatusCode> {
    state.engine.get_definition(&id).map(Json).map_err(error_status)
}

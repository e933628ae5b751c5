/// Process instance endpoints
///
/// Starting, inspecting, suspending and cancelling process instances, and reading or
/// writing their variables.

use crate::api::{error_status, AppState};
use crate::entities::ExecutionEntity;
use crate::runtime::StartedProcessInstance;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/process-instances", post(start_process_instance))
        .route(
            "/api/process-instances/{id}",
            get(get_process_instance).delete(delete_process_instance),
        )
        .route("/api/process-instances/{id}/executions", get(list_executions))
        .route("/api/process-instances/{id}/suspend", post(suspend_process_instance))
        .route("/api/process-instances/{id}/activate", post(activate_process_instance))
        .route(
            "/api/process-instances/{id}/variables",
            get(get_variables).put(set_variables),
        )
}

/// Request body for starting a process instance; `key` starts the latest version
#[derive(Debug, Deserialize)]
pub struct StartProcessInstanceRequest {
    pub key: Option<String>,
    pub definition_id: Option<String>,
    pub business_key: Option<String>,
    pub variables: Option<Map<String, Value>>,
    pub start_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
}

/// Start a process instance
///
/// POST /api/process-instances
/// Body: { "key": "invoice", "business_key": "INV-1", "variables": { ... } }
async fn start_process_instance(
    State(state): State<AppState>,
    Json(request): Json<StartProcessInstanceRequest>,
) -> Result<(StatusCode, Json<StartedProcessInstance>), StatusCode> {
    let started = match (&request.key, &request.definition_id) {
        (_, Some(definition_id)) => {
            state
                .engine
                .start_process_instance_by_id(
                    definition_id,
                    request.business_key,
                    request.variables,
                    request.start_user_id,
                )
                .await
        }
        (Some(key), None) => {
            state
                .engine
                .start_process_instance_by_key(key, request.business_key, request.variables, request.start_user_id)
                .await
        }
        (None, None) => return Err(StatusCode::BAD_REQUEST),
    }
    .map_err(error_status)?;

    Ok((StatusCode::CREATED, Json(started)))
}

async fn get_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionEntity>, StatusCode> {
    state.engine.get_execution(&id).await.map(Json).map_err(error_status)
}

async fn delete_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Value>, StatusCode> {
    state
        .engine
        .delete_process_instance(&id, query.reason.as_deref())
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionEntity>>, StatusCode> {
    state.engine.list_executions(&id).await.map(Json).map_err(error_status)
}

async fn suspend_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionEntity>, StatusCode> {
    state.engine.suspend_process_instance(&id).await.map_err(error_status)?;
    state.engine.get_execution(&id).await.map(Json).map_err(error_status)
}

async fn activate_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionEntity>, StatusCode> {
    state.engine.activate_process_instance(&id).await.map_err(error_status)?;
    state.engine.get_execution(&id).await.map(Json).map_err(error_status)
}

async fn get_variables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Map<String, Value>>, StatusCode> {
    state.engine.get_variables(&id).await.map(Json).map_err(error_status)
}

/// Set variables; existing names are updated where they are defined
///
/// PUT /api/process-instances/{id}/variables
/// Body: { "amount": 120, "approved": false }
async fn set_variables(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(variables): Json<Map<String, Value>>,
) -> Result<Json<Map<String, Value>>, StatusCode> {
    state.engine.set_variables(&id, &variables).await.map_err(error_status)?;
    state.engine.get_variables(&id).await.map(Json).map_err(error_status)
}

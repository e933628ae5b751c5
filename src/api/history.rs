use crate::api::{error_status, AppState};
use crate::entities::{
    HistoricActivityInstanceEntity, HistoricProcessInstanceEntity, HistoricTaskInstanceEntity,
    HistoricVariableInstanceEntity,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/history/process-instances/{id}",
            get(historic_process_instance).delete(delete_historic_process_instance),
        )
        .route("/api/history/process-instances/{id}/activities", get(historic_activities))
        .route("/api/history/process-instances/{id}/tasks", get(historic_tasks))
        .route("/api/history/process-instances/{id}/variables", get(historic_variables))
}

async fn historic_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoricProcessInstanceEntity>, StatusCode> {
    state.engine.historic_process_instance(&id).await.map(Json).map_err(error_status)
}

async fn historic_activities(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoricActivityInstanceEntity>>, StatusCode> {
    state.engine.historic_activities(&id).await.map(Json).map_err(error_status)
}

async fn historic_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoricTaskInstanceEntity>>, StatusCode> {
    state.engine.historic_tasks(&id).await.map(Json).map_err(error_status)
}

async fn historic_variables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoricVariableInstanceEntity>>, StatusCode> {
    state.engine.historic_variables(&id).await.map(Json).map_err(error_status)
}

/// Only finished process instances can lose their history
async fn delete_historic_process_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .delete_historic_process_instance(&id)
        .await
        .map_err(error_status)?;
    Ok(StatusCode::NO_CONTENT)
}

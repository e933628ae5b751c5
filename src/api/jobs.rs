/// Job administration endpoints
///
/// Dead-lettered jobs are revived by giving them retries again.

use crate::api::{error_status, AppState};
use crate::entities::JobEntity;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/dead-letter", get(dead_letter_jobs))
        .route("/api/jobs/{id}/execute", post(execute_job))
        .route("/api/jobs/{id}/retries", put(set_job_retries))
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub process_instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetriesRequest {
    pub retries: i32,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<JobEntity>>, StatusCode> {
    state
        .engine
        .list_jobs(query.process_instance_id.as_deref())
        .await
        .map(Json)
        .map_err(error_status)
}

async fn dead_letter_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobEntity>>, StatusCode> {
    state.engine.dead_letter_jobs().await.map(Json).map_err(error_status)
}

/// Run a job now, regardless of its due date
async fn execute_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state.executor.execute_job(&id).await.map_err(error_status)?;
    Ok(Json(json!({ "id": id, "executed": true })))
}

async fn set_job_retries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RetriesRequest>,
) -> Result<Json<JobEntity>, StatusCode> {
    state
        .engine
        .set_job_retries(&id, request.retries)
        .await
        .map(Json)
        .map_err(error_status)
}

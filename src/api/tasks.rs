use crate::api::{error_status, AppState};
use crate::entities::{IdentityLinkEntity, TaskEntity};
use crate::runtime::TaskFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/identity-links", get(task_identity_links))
        .route("/api/tasks/{id}/claim", post(claim_task))
        .route("/api/tasks/{id}/assignee", put(set_assignee))
        .route("/api/tasks/{id}/complete", post(complete_task))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AssigneeRequest {
    /// `null` unassigns the task
    pub assignee: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteTaskRequest {
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

/// GET /api/tasks?process_instance_id=..&assignee=..&candidate_user=..&candidate_group=..
async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<TaskEntity>>, StatusCode> {
    state.engine.list_tasks(&filter).await.map(Json).map_err(error_status)
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<TaskEntity>, StatusCode> {
    state.engine.get_task(&id).await.map(Json).map_err(error_status)
}

async fn task_identity_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<IdentityLinkEntity>>, StatusCode> {
    state.engine.task_identity_links(&id).await.map(Json).map_err(error_status)
}

async fn claim_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<TaskEntity>, StatusCode> {
    state
        .engine
        .claim_task(&id, &request.user_id)
        .await
        .map(Json)
        .map_err(error_status)
}

async fn set_assignee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AssigneeRequest>,
) -> Result<Json<TaskEntity>, StatusCode> {
    state
        .engine
        .set_assignee(&id, request.assignee.as_deref())
        .await
        .map(Json)
        .map_err(error_status)
}

/// Complete a task and continue its process instance
///
/// POST /api/tasks/{id}/complete
/// Body: { "variables": { "approved": true } }
async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompleteTaskRequest>,
) -> Result<Json<Value>, StatusCode> {
    state
        .engine
        .complete_task(&id, request.variables)
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "id": id, "completed": true })))
}

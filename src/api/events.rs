/// Message and signal endpoints
///
/// A message reaches exactly one waiting execution; a signal reaches every subscribed
/// execution of the tenant.

use crate::api::{error_status, AppState};
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/messages", post(correlate_message))
        .route("/api/signals", post(signal_event_received))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message_name: String,
    pub process_instance_id: Option<String>,
    pub variables: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal_name: String,
    pub tenant_id: Option<String>,
    pub variables: Option<Map<String, Value>>,
    /// Deliver through `process-event` jobs instead of in the request
    #[serde(default)]
    pub asynchronous: bool,
}

async fn correlate_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<Value>, StatusCode> {
    let execution_id = state
        .engine
        .correlate_message(
            &request.message_name,
            request.process_instance_id.as_deref(),
            request.variables,
        )
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "execution_id": execution_id })))
}

async fn signal_event_received(
    State(state): State<AppState>,
    Json(request): Json<SignalRequest>,
) -> Result<Json<Value>, StatusCode> {
    let delivered = state
        .engine
        .signal_event_received(
            &request.signal_name,
            request.tenant_id.as_deref(),
            request.variables,
            request.asynchronous,
        )
        .await
        .map_err(error_status)?;
    Ok(Json(json!({ "subscriptions": delivered, "asynchronous": request.asynchronous })))
}

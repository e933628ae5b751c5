mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::*;
use processway::api::AppState;
use processway::server::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Router {
    let engine = engine().await;
    let executor = executor(&engine);
    create_router(AppState { engine, executor })
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

fn approval_definition() -> Value {
    json!({
        "key": "approval",
        "name": "Approval",
        "activities": [
            { "id": "start", "activity_type": "StartEvent" },
            { "id": "approve", "activity_type": "UserTask",
              "params": { "name": "Approve", "candidate_groups": ["managers"] } },
            { "id": "end", "activity_type": "EndEvent" }
        ],
        "flows": [
            { "from": "start", "to": "approve" },
            { "from": "approve", "to": "end" }
        ]
    })
}

#[tokio::test]
async fn health_check_answers_ok() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn deploy_start_claim_complete() {
    let app = app().await;

    let (status, definition) = send(&app, Method::POST, "/api/definitions", Some(approval_definition())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(definition["version"], json!(1));
    let definition_id = definition["id"].as_str().unwrap().to_string();

    let (status, listed) = send(&app, Method::GET, "/api/definitions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let (status, _) = send(&app, Method::GET, &format!("/api/definitions/{definition_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, started) = send(
        &app,
        Method::POST,
        "/api/process-instances",
        Some(json!({ "key": "approval", "business_key": "PO-17", "variables": { "amount": 250 } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["ended"], json!(false));
    assert_eq!(started["business_key"], json!("PO-17"));
    let id = started["id"].as_str().unwrap().to_string();

    let (status, variables) = send(&app, Method::GET, &format!("/api/process-instances/{id}/variables"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(variables["amount"], json!(250));

    let (status, tasks) = send(&app, Method::GET, "/api/tasks?candidate_group=managers", None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    let task_id = tasks[0]["id"].as_str().unwrap().to_string();

    let (status, links) = send(&app, Method::GET, &format!("/api/tasks/{task_id}/identity-links"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(links[0]["group_id"], json!("managers"));

    let (status, claimed) = send(
        &app,
        Method::POST,
        &format!("/api/tasks/{task_id}/claim"),
        Some(json!({ "user_id": "kermit" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["assignee"], json!("kermit"));

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/tasks/{task_id}/claim"),
        Some(json!({ "user_id": "gonzo" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, completed) = send(
        &app,
        Method::POST,
        &format!("/api/tasks/{task_id}/complete"),
        Some(json!({ "variables": { "approved": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["completed"], json!(true));

    let (status, _) = send(&app, Method::GET, &format!("/api/process-instances/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, historic) = send(&app, Method::GET, &format!("/api/history/process-instances/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(historic["end_activity_id"], json!("end"));

    let (status, activities) = send(
        &app,
        Method::GET,
        &format!("/api/history/process-instances/{id}/activities"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activities.as_array().unwrap().len(), 3);

    let (status, variables) = send(
        &app,
        Method::GET,
        &format!("/api/history/process-instances/{id}/variables"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(variables.as_array().unwrap().len(), 2);

    let (status, tasks) = send(&app, Method::GET, &format!("/api/history/process-instances/{id}/tasks"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tasks[0]["delete_reason"], json!("completed"));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/history/process-instances/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::GET, &format!("/api/history/process-instances/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let app = app().await;

    let (status, _) = send(&app, Method::POST, "/api/process-instances", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/api/process-instances", Some(json!({ "key": "missing" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut dangling = approval_definition();
    dangling["flows"] = json!([{ "from": "start", "to": "nowhere" }]);
    let (status, _) = send(&app, Method::POST, "/api/definitions", Some(dangling)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut unnamed = approval_definition();
    unnamed["name"] = json!("");
    let (status, _) = send(&app, Method::POST, "/api/definitions", Some(unnamed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/tasks/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::POST, "/api/jobs/unknown/execute", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/messages",
        Some(json!({ "message_name": "nobody-listens" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn suspension_and_deletion_over_http() {
    let app = app().await;
    send(&app, Method::POST, "/api/definitions", Some(approval_definition())).await;
    let (_, started) = send(&app, Method::POST, "/api/process-instances", Some(json!({ "key": "approval" }))).await;
    let id = started["id"].as_str().unwrap().to_string();

    let (status, suspended) = send(&app, Method::POST, &format!("/api/process-instances/{id}/suspend"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(suspended["suspension_state"], json!("suspended"));

    let (status, _) = send(&app, Method::POST, &format!("/api/process-instances/{id}/suspend"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, Method::POST, &format!("/api/process-instances/{id}/activate"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, executions) = send(&app, Method::GET, &format!("/api/process-instances/{id}/executions"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executions.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/history/process-instances/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, deleted) = send(
        &app,
        Method::DELETE,
        &format!("/api/process-instances/{id}?reason=obsolete"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], json!(true));

    let (_, historic) = send(&app, Method::GET, &format!("/api/history/process-instances/{id}"), None).await;
    assert_eq!(historic["delete_reason"], json!("obsolete"));
}

#[tokio::test]
async fn jobs_and_signals_over_http() {
    let app = app().await;
    let definition = json!({
        "key": "batch",
        "name": "Batch",
        "activities": [
            { "id": "start", "activity_type": "StartEvent" },
            { "id": "wait", "activity_type": "SignalCatch", "params": { "signal": "go" } },
            { "id": "work", "activity_type": "ServiceTask",
              "params": { "async": true, "fail": "disk full" } },
            { "id": "end", "activity_type": "EndEvent" }
        ],
        "flows": [
            { "from": "start", "to": "wait" },
            { "from": "wait", "to": "work" },
            { "from": "work", "to": "end" }
        ]
    });
    send(&app, Method::POST, "/api/definitions", Some(definition)).await;
    let (_, started) = send(&app, Method::POST, "/api/process-instances", Some(json!({ "key": "batch" }))).await;
    let id = started["id"].as_str().unwrap().to_string();

    let (status, signalled) = send(&app, Method::POST, "/api/signals", Some(json!({ "signal_name": "go" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signalled["subscriptions"], json!(1));

    let (status, jobs) = send(&app, Method::GET, &format!("/api/jobs?process_instance_id={id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = jobs[0]["id"].as_str().unwrap().to_string();

    for _ in 0..3 {
        let (status, _) = send(&app, Method::POST, &format!("/api/jobs/{job_id}/execute"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    let (status, dead) = send(&app, Method::GET, "/api/jobs/dead-letter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dead[0]["id"], json!(job_id));
    assert_eq!(dead[0]["retries"], json!(0));

    let (status, revived) = send(
        &app,
        Method::PUT,
        &format!("/api/jobs/{job_id}/retries"),
        Some(json!({ "retries": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revived["retries"], json!(2));

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/jobs/{job_id}/retries"),
        Some(json!({ "retries": -3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

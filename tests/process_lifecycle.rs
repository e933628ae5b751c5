mod common;

use assert_matches::assert_matches;
use common::*;
use processway::definition::ActivityType;
use processway::event::EngineEventType;
use processway::runtime::TaskFilter;
use processway::EngineError;
use serde_json::{json, Map, Value};

fn vars(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn straight_through_process_ends_in_starting_command() {
    let engine = engine().await;
    deploy(
        &engine,
        "auto",
        vec![
            start("start"),
            service_task("approve", json!({ "variables": { "approved": true } })),
            end("end"),
        ],
        &[("start", "approve"), ("approve", "end")],
    )
    .await;

    let started = engine
        .start_process_instance_by_key("auto", Some("BK-1".into()), None, None)
        .await
        .unwrap();
    assert!(started.ended);

    let id = started.instance.id.clone();
    assert_matches!(engine.get_execution(&id).await, Err(EngineError::NotFound { .. }));

    let historic = engine.historic_process_instance(&id).await.unwrap();
    assert!(historic.end_time.is_some());
    assert_eq!(historic.business_key.as_deref(), Some("BK-1"));
    assert_eq!(historic.end_activity_id.as_deref(), Some("end"));
    assert_eq!(historic.delete_reason, None);

    let activities = engine.historic_activities(&id).await.unwrap();
    let mut ids: Vec<&str> = activities.iter().map(|a| a.activity_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["approve", "end", "start"]);
    assert!(activities.iter().all(|a| a.end_time.is_some()));

    let variables = engine.historic_variables(&id).await.unwrap();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].name, "approved");
    assert_eq!(variables[0].value, json!(true));
    assert!(variables[0].removed);
}

#[tokio::test]
async fn user_task_waits_until_completed() {
    let engine = engine().await;
    deploy_single_task(
        &engine,
        "approval",
        json!({ "name": "Approve invoice", "assignee": "kermit", "candidate_groups": ["management"] }),
    )
    .await;

    let started = engine
        .start_process_instance_by_key("approval", None, Some(vars(json!({ "amount": 120 }))), None)
        .await
        .unwrap();
    assert!(!started.ended);
    let id = started.instance.id.clone();

    let tasks = engine
        .list_tasks(&TaskFilter {
            assignee: Some("kermit".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.name.as_deref(), Some("Approve invoice"));
    assert_eq!(task.process_instance_id.as_deref(), Some(id.as_str()));

    let links = engine.task_identity_links(&task.id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].group_id.as_deref(), Some("management"));

    engine
        .complete_task(&task.id, Some(vars(json!({ "approved": true }))))
        .await
        .unwrap();
    assert_matches!(engine.get_task(&task.id).await, Err(EngineError::NotFound { .. }));
    assert_matches!(engine.get_execution(&id).await, Err(EngineError::NotFound { .. }));

    let historic_tasks = engine.historic_tasks(&id).await.unwrap();
    assert_eq!(historic_tasks.len(), 1);
    assert_eq!(historic_tasks[0].delete_reason.as_deref(), Some("completed"));
    assert_eq!(historic_tasks[0].assignee.as_deref(), Some("kermit"));
    assert!(historic_tasks[0].end_time.is_some());

    let names: Vec<String> = engine
        .historic_variables(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert!(names.contains(&"amount".to_string()));
    assert!(names.contains(&"approved".to_string()));
}

#[tokio::test]
async fn candidate_users_claim_unassigned_tasks() {
    let engine = engine().await;
    deploy_single_task(&engine, "claimable", json!({ "candidate_users": ["fozzie", "gonzo"] })).await;
    engine
        .start_process_instance_by_key("claimable", None, None, None)
        .await
        .unwrap();

    let candidate = TaskFilter {
        candidate_user: Some("gonzo".into()),
        ..Default::default()
    };
    let tasks = engine.list_tasks(&candidate).await.unwrap();
    assert_eq!(tasks.len(), 1);
    let task_id = tasks[0].id.clone();

    let claimed = engine.claim_task(&task_id, "gonzo").await.unwrap();
    assert_eq!(claimed.assignee.as_deref(), Some("gonzo"));
    // Claimed tasks are no longer offered to candidates
    assert!(engine.list_tasks(&candidate).await.unwrap().is_empty());

    assert_matches!(
        engine.claim_task(&task_id, "fozzie").await,
        Err(EngineError::IllegalState(_))
    );
    // Claiming one's own task again is fine
    engine.claim_task(&task_id, "gonzo").await.unwrap();

    let unassigned = engine.set_assignee(&task_id, None).await.unwrap();
    assert_eq!(unassigned.assignee, None);
    assert_eq!(engine.list_tasks(&candidate).await.unwrap().len(), 1);
}

#[tokio::test]
async fn fork_creates_concurrent_children_and_joins_implicitly() {
    let engine = engine().await;
    deploy(
        &engine,
        "parallel",
        vec![
            start("start"),
            user_task("left", json!({})),
            user_task("right", json!({})),
            end("left_end"),
            end("right_end"),
        ],
        &[("start", "left"), ("start", "right"), ("left", "left_end"), ("right", "right_end")],
    )
    .await;

    let id = engine
        .start_process_instance_by_key("parallel", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let tree = engine.execution_tree(&id).await.unwrap();
    assert_eq!(tree.len(), 3);
    assert!(!tree.root().is_active);
    let children = tree.children(&id);
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|child| child.is_concurrent));
    let mut child_activities: Vec<_> = children.iter().filter_map(|c| c.activity_id.clone()).collect();
    child_activities.sort();
    assert_eq!(child_activities, vec!["left".to_string(), "right".to_string()]);

    let filter = TaskFilter {
        process_instance_id: Some(id.clone()),
        ..Default::default()
    };
    let tasks = engine.list_tasks(&filter).await.unwrap();
    assert_eq!(tasks.len(), 2);

    engine.complete_task(&tasks[0].id, None).await.unwrap();
    assert_eq!(engine.list_executions(&id).await.unwrap().len(), 2);
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_none());

    engine.complete_task(&tasks[1].id, None).await.unwrap();
    assert_matches!(engine.list_executions(&id).await, Err(EngineError::NotFound { .. }));
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_some());
}

#[tokio::test]
async fn call_activity_resumes_caller_when_sub_process_ends() {
    let engine = engine().await;
    deploy_single_task(&engine, "child", json!({ "name": "Child work" })).await;
    deploy(
        &engine,
        "parent",
        vec![
            start("start"),
            activity("call", ActivityType::CallActivity, json!({ "called_element": "child" })),
            user_task("after", json!({ "name": "After call" })),
            end("end"),
        ],
        &[("start", "call"), ("call", "after"), ("after", "end")],
    )
    .await;

    let parent_id = engine
        .start_process_instance_by_key("parent", Some("order-7".into()), None, None)
        .await
        .unwrap()
        .instance
        .id;

    let tasks = engine.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name.as_deref(), Some("Child work"));
    let child_id = tasks[0].process_instance_id.clone().unwrap();
    assert_ne!(child_id, parent_id);

    let child = engine.get_execution(&child_id).await.unwrap();
    assert_eq!(child.super_execution_id.as_deref(), Some(parent_id.as_str()));
    assert_eq!(child.business_key.as_deref(), Some("order-7"));
    let historic_child = engine.historic_process_instance(&child_id).await.unwrap();
    assert_eq!(historic_child.super_process_instance_id.as_deref(), Some(parent_id.as_str()));

    let call = engine
        .historic_activities(&parent_id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.activity_id == "call")
        .unwrap();
    assert_eq!(call.called_process_instance_id.as_deref(), Some(child_id.as_str()));

    engine.complete_task(&tasks[0].id, None).await.unwrap();
    assert!(engine.historic_process_instance(&child_id).await.unwrap().end_time.is_some());

    let tasks = engine.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name.as_deref(), Some("After call"));
    assert_eq!(tasks[0].process_instance_id.as_deref(), Some(parent_id.as_str()));
}

#[tokio::test]
async fn call_activity_to_unknown_key_fails_the_start() {
    let engine = engine().await;
    deploy(
        &engine,
        "dangling",
        vec![
            start("start"),
            activity("call", ActivityType::CallActivity, json!({ "called_element": "missing" })),
            end("end"),
        ],
        &[("start", "call"), ("call", "end")],
    )
    .await;

    assert_matches!(
        engine.start_process_instance_by_key("dangling", None, None, None).await,
        Err(EngineError::DefinitionNotFound(key)) if key == "missing"
    );
    // The failed command left nothing behind
    assert!(engine.list_process_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn suspended_instance_rejects_task_completion() {
    let engine = engine().await;
    deploy_single_task(&engine, "suspendable", json!({})).await;
    let id = engine
        .start_process_instance_by_key("suspendable", None, None, None)
        .await
        .unwrap()
        .instance
        .id;
    let task_id = engine.list_tasks(&TaskFilter::default()).await.unwrap()[0].id.clone();

    engine.suspend_process_instance(&id).await.unwrap();
    assert!(engine.get_execution(&id).await.unwrap().is_suspended());
    assert_matches!(
        engine.suspend_process_instance(&id).await,
        Err(EngineError::IllegalState(_))
    );
    assert_matches!(
        engine.complete_task(&task_id, None).await,
        Err(EngineError::IllegalState(_))
    );
    assert_matches!(engine.claim_task(&task_id, "kermit").await, Err(EngineError::IllegalState(_)));

    engine.activate_process_instance(&id).await.unwrap();
    engine.complete_task(&task_id, None).await.unwrap();
    assert_matches!(engine.get_execution(&id).await, Err(EngineError::NotFound { .. }));
}

#[tokio::test]
async fn variables_resolve_through_parent_executions() {
    let engine = engine().await;
    deploy(
        &engine,
        "scoped",
        vec![
            start("start"),
            user_task("a", json!({})),
            user_task("b", json!({})),
            end("a_end"),
            end("b_end"),
        ],
        &[("start", "a"), ("start", "b"), ("a", "a_end"), ("b", "b_end")],
    )
    .await;

    let id = engine
        .start_process_instance_by_key("scoped", None, Some(vars(json!({ "amount": 10 }))), None)
        .await
        .unwrap()
        .instance
        .id;
    let tree = engine.execution_tree(&id).await.unwrap();
    let child_id = tree.children(&id)[0].id.clone();

    assert_eq!(engine.get_variables(&child_id).await.unwrap()["amount"], json!(10));

    // Existing names are updated where they live, new names land on the process instance
    engine
        .set_variables(&child_id, &vars(json!({ "amount": 20, "note": "checked" })))
        .await
        .unwrap();
    let root_variables = engine.get_variables(&id).await.unwrap();
    assert_eq!(root_variables["amount"], json!(20));
    assert_eq!(root_variables["note"], json!("checked"));
}

#[tokio::test]
async fn starting_unknown_key_is_definition_not_found() {
    let engine = engine().await;
    assert_matches!(
        engine.start_process_instance_by_key("nope", None, None, None).await,
        Err(EngineError::DefinitionNotFound(_))
    );
}

#[tokio::test]
async fn deploying_again_creates_a_new_version() {
    let engine = engine().await;
    let first = deploy_single_task(&engine, "versioned", json!({})).await;
    let second = deploy_single_task(&engine, "versioned", json!({})).await;
    assert_eq!(first.definition.version, 1);
    assert_eq!(second.definition.version, 2);

    let started = engine
        .start_process_instance_by_key("versioned", None, None, None)
        .await
        .unwrap();
    assert_eq!(started.instance.process_definition_id, second.definition.id);

    let pinned = engine
        .start_process_instance_by_id(&first.definition.id, None, None, None)
        .await
        .unwrap();
    assert_eq!(pinned.instance.process_definition_id, first.definition.id);
}

#[tokio::test]
async fn lifecycle_events_follow_the_process() {
    let engine = engine().await;
    deploy(
        &engine,
        "evented",
        vec![start("start"), service_task("work", json!({})), end("end")],
        &[("start", "work"), ("work", "end")],
    )
    .await;
    let listener = RecordingListener::register(
        &engine,
        Some(vec![
            EngineEventType::ProcessStarted,
            EngineEventType::ActivityStarted,
            EngineEventType::ActivityCompleted,
            EngineEventType::ProcessCompleted,
        ]),
    );

    engine
        .start_process_instance_by_key("evented", None, None, None)
        .await
        .unwrap();

    use EngineEventType::*;
    assert_eq!(
        listener.types(),
        vec![
            ProcessStarted,
            ActivityStarted,
            ActivityCompleted,
            ActivityStarted,
            ActivityCompleted,
            ActivityStarted,
            ProcessCompleted,
        ]
    );
    let started: Vec<Value> = listener
        .events()
        .into_iter()
        .filter(|e| e.event_type == ActivityStarted)
        .map(|e| e.payload["activity_id"].clone())
        .collect();
    assert_eq!(started, vec![json!("start"), json!("work"), json!("end")]);

    listener.clear();
    engine.dispatcher().set_enabled(false);
    engine
        .start_process_instance_by_key("evented", None, None, None)
        .await
        .unwrap();
    assert!(listener.types().is_empty());
}

#[tokio::test]
async fn starter_becomes_identity_link_of_the_instance() {
    let engine = engine().await;
    deploy_single_task(&engine, "started-by", json!({ "assignee": "piggy" })).await;
    let id = engine
        .start_process_instance_by_key("started-by", None, None, Some("kermit".into()))
        .await
        .unwrap()
        .instance
        .id;

    assert_eq!(
        engine.historic_process_instance(&id).await.unwrap().start_user_id.as_deref(),
        Some("kermit")
    );

    let mut ctx = engine.command();
    let mut links: Vec<(String, String)> = ctx
        .identity_links()
        .find_by_process_instance_id(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|link| (link.user_id.unwrap(), link.link_type))
        .collect();
    links.sort();
    assert_eq!(
        links,
        vec![
            ("kermit".to_string(), "starter".to_string()),
            ("piggy".to_string(), "participant".to_string()),
        ]
    );
}

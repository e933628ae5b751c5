#![allow(dead_code)]

use processway::config::{DatabaseConfig, EngineConfig, JobExecutorConfig};
use processway::definition::{Activity, ActivityType, CompiledDefinition, DeploymentRequest, SequenceFlow};
use processway::event::{EngineEvent, EngineEventListener, EngineEventType};
use processway::history::HistoryLevel;
use processway::persistence::schema;
use processway::runtime::{JobExecutor, ProcessEngine};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        history_level: HistoryLevel::Full,
        events_enabled: true,
        jobs: JobExecutorConfig {
            enabled: false,
            acquire_interval_ms: 100,
            max_jobs_per_acquisition: 10,
            lock_time_ms: 60_000,
            default_retries: 3,
            retry_wait_ms: 1_000,
            lock_owner: "test-node".to_string(),
        },
    }
}

/// Current time truncated to the millisecond precision entities are stored with
pub fn now_millis() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap()
}

pub async fn engine() -> Arc<ProcessEngine> {
    engine_with(test_config()).await
}

pub async fn engine_with(config: EngineConfig) -> Arc<ProcessEngine> {
    let pool = schema::connect(&DatabaseConfig::in_memory()).await.unwrap();
    Arc::new(ProcessEngine::new(pool, config).await.unwrap())
}

pub fn executor(engine: &Arc<ProcessEngine>) -> Arc<JobExecutor> {
    Arc::new(JobExecutor::new(Arc::clone(engine)))
}

pub fn activity(id: &str, activity_type: ActivityType, params: Value) -> Activity {
    Activity {
        id: id.to_string(),
        name: Some(id.to_string()),
        activity_type,
        params,
    }
}

pub fn start(id: &str) -> Activity {
    activity(id, ActivityType::StartEvent, json!({}))
}

pub fn end(id: &str) -> Activity {
    activity(id, ActivityType::EndEvent, json!({}))
}

pub fn user_task(id: &str, params: Value) -> Activity {
    activity(id, ActivityType::UserTask, params)
}

pub fn service_task(id: &str, params: Value) -> Activity {
    activity(id, ActivityType::ServiceTask, params)
}

pub fn deployment(key: &str, activities: Vec<Activity>, flows: &[(&str, &str)]) -> DeploymentRequest {
    DeploymentRequest {
        key: key.to_string(),
        name: format!("{key} process"),
        activities,
        flows: flows
            .iter()
            .map(|(from, to)| SequenceFlow {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect(),
        tenant_id: None,
    }
}

pub async fn deploy(
    engine: &ProcessEngine,
    key: &str,
    activities: Vec<Activity>,
    flows: &[(&str, &str)],
) -> Arc<CompiledDefinition> {
    engine.deploy(deployment(key, activities, flows)).await.unwrap()
}

/// start -> task -> end, with the task's params
pub async fn deploy_single_task(engine: &ProcessEngine, key: &str, task_params: Value) -> Arc<CompiledDefinition> {
    deploy(
        engine,
        key,
        vec![start("start"), user_task("task", task_params), end("end")],
        &[("start", "task"), ("task", "end")],
    )
    .await
}

/// Collects every dispatched event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingListener {
    pub fn register(engine: &ProcessEngine, types: Option<Vec<EngineEventType>>) -> Arc<Self> {
        let listener = Arc::new(Self::default());
        engine
            .dispatcher()
            .add_event_listener(Arc::clone(&listener) as Arc<dyn EngineEventListener>, types);
        listener
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<EngineEventType> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EngineEventListener for RecordingListener {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

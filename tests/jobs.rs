mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Duration;
use common::*;
use processway::definition::ActivityType;
use processway::entities::{JobEntity, JobType};
use processway::event::EngineEventType;
use processway::runtime::{agenda, CommandContext, JobHandler, ProcessEngine, TaskFilter};
use processway::{EngineError, EngineResult};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn tasks_of(process_instance_id: &str) -> TaskFilter {
    TaskFilter {
        process_instance_id: Some(process_instance_id.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn async_service_task_continues_through_a_job() {
    let engine = engine().await;
    let executor = executor(&engine);
    deploy(
        &engine,
        "async",
        vec![
            start("start"),
            service_task("prepare", json!({ "async": true, "variables": { "prepared": true } })),
            user_task("review", json!({})),
            end("end"),
        ],
        &[("start", "prepare"), ("prepare", "review"), ("review", "end")],
    )
    .await;

    let id = engine
        .start_process_instance_by_key("async", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let jobs = engine.list_jobs(Some(&id)).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, JobType::Message);
    assert_eq!(jobs[0].handler_type, "async-continuation");
    assert!(jobs[0].exclusive);
    assert!(engine.list_tasks(&tasks_of(&id)).await.unwrap().is_empty());

    assert_eq!(executor.acquire_and_execute().await.unwrap(), 1);

    assert!(engine.list_jobs(Some(&id)).await.unwrap().is_empty());
    assert_eq!(engine.list_tasks(&tasks_of(&id)).await.unwrap().len(), 1);
    assert_eq!(engine.get_variables(&id).await.unwrap()["prepared"], json!(true));
}

#[tokio::test]
async fn failing_job_is_retried_until_dead_lettered() {
    let engine = engine().await;
    let executor = executor(&engine);
    deploy(
        &engine,
        "flaky",
        vec![
            start("start"),
            service_task("call-partner", json!({ "async": true, "fail": "partner unavailable" })),
            end("end"),
        ],
        &[("start", "call-partner"), ("call-partner", "end")],
    )
    .await;
    let id = engine
        .start_process_instance_by_key("flaky", None, None, None)
        .await
        .unwrap()
        .instance
        .id;
    let job_id = engine.list_jobs(Some(&id)).await.unwrap()[0].id.clone();

    let base = now_millis();
    engine.clock().set_current_time(base);
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 0);

    let job = engine.list_jobs(Some(&id)).await.unwrap().remove(0);
    assert_eq!(job.retries, 2);
    assert!(job.exception_message.as_deref().unwrap().contains("partner unavailable"));
    assert_eq!(job.lock_owner, None);
    assert_eq!(job.duedate.unwrap().timestamp_millis(), (base + Duration::seconds(1)).timestamp_millis());

    // Not due again before the retry wait has passed
    assert!(executor.acquire_jobs().await.unwrap().is_empty());

    engine.clock().set_current_time(base + Duration::seconds(2));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 0);
    engine.clock().set_current_time(base + Duration::seconds(4));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 0);

    let dead = engine.dead_letter_jobs().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job_id);
    assert_eq!(dead[0].retries, 0);

    engine.clock().set_current_time(base + Duration::minutes(1));
    assert!(executor.acquire_jobs().await.unwrap().is_empty());

    // Giving retries back makes the job acquirable again
    let revived = engine.set_job_retries(&job_id, 1).await.unwrap();
    assert_eq!(revived.retries, 1);
    assert!(engine.dead_letter_jobs().await.unwrap().is_empty());
    assert_eq!(executor.acquire_jobs().await.unwrap(), vec![vec![job_id.clone()]]);

    assert_matches!(
        engine.set_job_retries(&job_id, -1).await,
        Err(EngineError::IllegalArgument(_))
    );
}

#[tokio::test]
async fn failure_of_a_job_rolls_back_its_work() {
    let engine = engine().await;
    let executor = executor(&engine);
    deploy(
        &engine,
        "rollback",
        vec![
            start("start"),
            service_task("first", json!({ "async": true, "variables": { "written": true } })),
            service_task("second", json!({ "fail": "boom" })),
            end("end"),
        ],
        &[("start", "first"), ("first", "second"), ("second", "end")],
    )
    .await;
    let id = engine
        .start_process_instance_by_key("rollback", None, None, None)
        .await
        .unwrap()
        .instance
        .id;
    let job_id = engine.list_jobs(Some(&id)).await.unwrap()[0].id.clone();

    assert_matches!(executor.execute_job(&job_id).await, Err(EngineError::Other(_)));

    assert!(engine.get_variables(&id).await.unwrap().get("written").is_none());
    let execution = engine.get_execution(&id).await.unwrap();
    assert_eq!(execution.activity_id.as_deref(), Some("first"));
    assert_eq!(engine.list_jobs(Some(&id)).await.unwrap()[0].retries, 2);
}

#[tokio::test]
async fn missing_job_does_not_count_as_failure() {
    let engine = engine().await;
    let executor = executor(&engine);
    assert_matches!(executor.execute_job("gone").await, Err(EngineError::NotFound { .. }));
}

#[tokio::test]
async fn timer_cycle_fires_each_repetition_before_leaving() {
    let engine = engine().await;
    let executor = executor(&engine);
    let listener = RecordingListener::register(&engine, Some(vec![EngineEventType::TimerFired]));
    deploy(
        &engine,
        "reminders",
        vec![
            start("start"),
            activity("remind", ActivityType::TimerCatch, json!({ "cycle": "R3/PT10M" })),
            user_task("follow-up", json!({})),
            end("end"),
        ],
        &[("start", "remind"), ("remind", "follow-up"), ("follow-up", "end")],
    )
    .await;

    let base = now_millis();
    engine.clock().set_current_time(base);
    let id = engine
        .start_process_instance_by_key("reminders", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let timer = engine.list_jobs(Some(&id)).await.unwrap().remove(0);
    assert_eq!(timer.job_type, JobType::Timer);
    assert_eq!(timer.repeat.as_deref(), Some("R3/PT10M"));
    assert_eq!(timer.duedate.unwrap(), base + Duration::minutes(10));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 0);

    for (fired, minutes) in [(1, 10), (2, 20)] {
        engine.clock().set_current_time(base + Duration::minutes(minutes));
        assert_eq!(executor.acquire_and_execute().await.unwrap(), 1);
        assert_eq!(listener.events().len(), fired);

        let next = engine.list_jobs(Some(&id)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].duedate.unwrap(), base + Duration::minutes(minutes + 10));
        assert!(engine.list_tasks(&tasks_of(&id)).await.unwrap().is_empty());
    }

    engine.clock().set_current_time(base + Duration::minutes(30));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 1);
    assert_eq!(listener.events().len(), 3);
    assert!(engine.list_jobs(Some(&id)).await.unwrap().is_empty());
    assert_eq!(engine.list_tasks(&tasks_of(&id)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn duration_timer_waits_for_its_due_date() {
    let engine = engine().await;
    let executor = executor(&engine);
    deploy(
        &engine,
        "cooldown",
        vec![
            start("start"),
            activity("wait", ActivityType::TimerCatch, json!({ "duration": "PT5M" })),
            end("end"),
        ],
        &[("start", "wait"), ("wait", "end")],
    )
    .await;

    let base = now_millis();
    engine.clock().set_current_time(base);
    let id = engine
        .start_process_instance_by_key("cooldown", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    engine.clock().set_current_time(base + Duration::minutes(4));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 0);
    assert!(engine.get_execution(&id).await.is_ok());

    engine.clock().set_current_time(base + Duration::minutes(5));
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 1);
    assert_matches!(engine.get_execution(&id).await, Err(EngineError::NotFound { .. }));
    assert_eq!(
        engine
            .historic_process_instance(&id)
            .await
            .unwrap()
            .end_activity_id
            .as_deref(),
        Some("end")
    );
}

#[tokio::test]
async fn invalid_timer_expressions_are_rejected_at_deploy() {
    let engine = engine().await;
    let timers = [
        json!({ "cycle": "R0/PT5M" }),
        json!({ "duration": "PT-5S" }),
        json!({ "duration": "P400000000Y" }),
        json!({ "duration": "PT9999999999999H" }),
        json!({ "duration": "P200000000000000D" }),
        json!({ "duration": "P1000000000M" }),
    ];

    for params in timers {
        let request = deployment(
            "broken-timer",
            vec![
                start("start"),
                activity("wait", ActivityType::TimerCatch, params.clone()),
                end("end"),
            ],
            &[("start", "wait"), ("wait", "end")],
        );
        assert_matches!(
            engine.deploy(request).await,
            Err(EngineError::InvalidTimerExpression { .. }),
            "{params} should be rejected"
        );
    }

    assert!(engine.list_definitions().is_empty());
    assert_matches!(
        engine.start_process_instance_by_key("broken-timer", None, None, None).await,
        Err(EngineError::DefinitionNotFound(_))
    );
}

fn parallel_async(engine_key: &str, exclusive: bool) -> processway::definition::DeploymentRequest {
    deployment(
        engine_key,
        vec![
            start("start"),
            service_task("a", json!({ "async": true, "exclusive": exclusive })),
            service_task("b", json!({ "async": true, "exclusive": exclusive })),
            end("a_end"),
            end("b_end"),
        ],
        &[("start", "a"), ("start", "b"), ("a", "a_end"), ("b", "b_end")],
    )
}

#[tokio::test]
async fn exclusive_jobs_of_one_instance_form_a_single_batch() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("exclusive", true)).await.unwrap();
    let id = engine
        .start_process_instance_by_key("exclusive", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let batches = executor.acquire_jobs().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);

    let locked = engine.list_jobs(Some(&id)).await.unwrap();
    assert!(locked.iter().all(|job| job.lock_owner.as_deref() == Some("test-node")));
    assert!(executor.acquire_jobs().await.unwrap().is_empty());

    for job_id in &batches[0] {
        executor.execute_job(job_id).await.unwrap();
    }
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_some());
}

#[tokio::test]
async fn non_exclusive_jobs_are_batched_individually() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("shared", false)).await.unwrap();
    let id = engine
        .start_process_instance_by_key("shared", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let batches = executor.acquire_jobs().await.unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|batch| batch.len() == 1));

    for job_id in batches.iter().flatten() {
        executor.execute_job(job_id).await.unwrap();
    }
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_some());
}

#[tokio::test]
async fn siblings_ending_in_parallel_commands_still_join() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("racing-join", false)).await.unwrap();
    let id = engine
        .start_process_instance_by_key("racing-join", None, None, None)
        .await
        .unwrap()
        .instance
        .id;
    let jobs = engine.list_jobs(Some(&id)).await.unwrap();
    assert_eq!(jobs.len(), 2);
    let handler = engine.job_handler("async-continuation").unwrap();

    // Both siblings run side by side, each seeing the other still alive
    let mut first = engine.command();
    let mut second = engine.command();
    for (ctx, job) in [(&mut first, &jobs[0]), (&mut second, &jobs[1])] {
        let job = ctx.jobs().get(&job.id).await.unwrap();
        handler.execute(ctx, &job).await.unwrap();
        agenda::run(ctx).await.unwrap();
        ctx.jobs().job_executed(&job).unwrap();
    }

    first.close().await.unwrap();
    assert_matches!(second.close().await, Err(EngineError::OptimisticLocking { .. }));

    let root = engine.get_execution(&id).await.unwrap();
    assert_eq!(root.ended_children, 1);
    assert_eq!(engine.list_executions(&id).await.unwrap().len(), 2);

    // The losing job is untouched and completes the join on its next run
    let remaining = engine.list_jobs(Some(&id)).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, jobs[1].id);
    assert_eq!(remaining[0].retries, 3);

    executor.execute_job(&jobs[1].id).await.unwrap();
    assert_matches!(engine.get_execution(&id).await, Err(EngineError::NotFound { .. }));
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_some());
}

/// Changes the job's execution behind the command's back on its first run
struct ConflictingHandler {
    engine: Arc<ProcessEngine>,
    raced: AtomicBool,
}

#[async_trait]
impl JobHandler for ConflictingHandler {
    fn handler_type(&self) -> &str {
        "conflicting"
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> EngineResult<()> {
        let execution_id = job.execution_id.clone().unwrap_or_default();
        let mut execution = ctx.executions().get(&execution_id).await?;
        if !self.raced.swap(true, Ordering::SeqCst) {
            let mut other = self.engine.command();
            let mut concurrent = other.executions().get(&execution_id).await?;
            concurrent.name = Some("concurrent".into());
            other.executions().update(&concurrent)?;
            other.close().await?;
        }
        execution.name = Some("handler".into());
        ctx.executions().update(&execution)
    }
}

#[tokio::test]
async fn conflicting_job_is_released_without_losing_a_retry() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.register_job_handler(Arc::new(ConflictingHandler {
        engine: Arc::clone(&engine),
        raced: AtomicBool::new(false),
    }));
    deploy_single_task(&engine, "conflict", json!({})).await;
    let id = engine
        .start_process_instance_by_key("conflict", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let mut ctx = engine.command();
    let execution = ctx.executions().get(&id).await.unwrap();
    ctx.jobs().create_async_job(&execution, "conflicting", None, true).unwrap();
    ctx.close().await.unwrap();

    let batches = executor.acquire_jobs().await.unwrap();
    let job_id = batches[0][0].clone();
    assert_matches!(
        executor.execute_job(&job_id).await,
        Err(EngineError::OptimisticLocking { .. })
    );

    let job = &engine.list_jobs(Some(&id)).await.unwrap()[0];
    assert_eq!(job.retries, 3);
    assert_eq!(job.lock_owner, None);
    assert_eq!(engine.get_execution(&id).await.unwrap().name.as_deref(), Some("concurrent"));

    assert_eq!(executor.acquire_and_execute().await.unwrap(), 1);
    assert!(engine.list_jobs(Some(&id)).await.unwrap().is_empty());
    assert_eq!(engine.get_execution(&id).await.unwrap().name.as_deref(), Some("handler"));
}

#[tokio::test]
async fn acquisition_never_exceeds_the_configured_limit() {
    let mut config = test_config();
    config.jobs.max_jobs_per_acquisition = 1;
    let engine = engine_with(config).await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("limited", true)).await.unwrap();
    let id = engine
        .start_process_instance_by_key("limited", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let batches = executor.acquire_jobs().await.unwrap();
    assert_eq!(batches, vec![vec![batches[0][0].clone()]]);
    let locked = engine
        .list_jobs(Some(&id))
        .await
        .unwrap()
        .into_iter()
        .filter(|job| job.lock_owner.is_some())
        .count();
    assert_eq!(locked, 1);

    // The rest of the instance waits until its running exclusive job is done
    assert!(executor.acquire_jobs().await.unwrap().is_empty());
    executor.execute_job(&batches[0][0]).await.unwrap();

    let next = executor.acquire_jobs().await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].len(), 1);
    executor.execute_job(&next[0][0]).await.unwrap();
    assert!(engine.historic_process_instance(&id).await.unwrap().end_time.is_some());
}

#[tokio::test]
async fn expired_locks_are_acquired_again() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("expiring", true)).await.unwrap();
    engine
        .start_process_instance_by_key("expiring", None, None, None)
        .await
        .unwrap();

    let base = now_millis();
    engine.clock().set_current_time(base);
    assert_eq!(executor.acquire_jobs().await.unwrap().len(), 1);
    assert!(executor.acquire_jobs().await.unwrap().is_empty());

    // Lock time is one minute in the test configuration
    engine.clock().set_current_time(base + Duration::minutes(2));
    let batches = executor.acquire_jobs().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn suspended_jobs_are_not_acquired() {
    let engine = engine().await;
    let executor = executor(&engine);
    engine.deploy(parallel_async("paused", true)).await.unwrap();
    let id = engine
        .start_process_instance_by_key("paused", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    engine.suspend_process_instance(&id).await.unwrap();
    assert!(executor.acquire_jobs().await.unwrap().is_empty());

    engine.activate_process_instance(&id).await.unwrap();
    assert_eq!(executor.acquire_and_execute().await.unwrap(), 2);
}

struct CountingHandler {
    runs: AtomicUsize,
}

#[async_trait]
impl JobHandler for CountingHandler {
    fn handler_type(&self) -> &str {
        "counting"
    }

    async fn execute(&self, _ctx: &mut CommandContext, _job: &JobEntity) -> EngineResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn registered_handlers_run_custom_jobs() {
    let engine = engine().await;
    let executor = executor(&engine);
    let handler = Arc::new(CountingHandler { runs: AtomicUsize::new(0) });
    engine.register_job_handler(handler.clone());

    deploy_single_task(&engine, "custom", json!({})).await;
    let id = engine
        .start_process_instance_by_key("custom", None, None, None)
        .await
        .unwrap()
        .instance
        .id;

    let mut ctx = engine.command();
    let execution = ctx.executions().get(&id).await.unwrap();
    let job = ctx.jobs().create_async_job(&execution, "counting", None, true).unwrap();
    ctx.close().await.unwrap();

    executor.execute_job(&job.id).await.unwrap();
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert!(engine.list_jobs(Some(&id)).await.unwrap().is_empty());

    let mut ctx = engine.command();
    let orphan = ctx.jobs().create_async_job(&execution, "unknown", None, true).unwrap();
    ctx.close().await.unwrap();
    assert_matches!(
        executor.execute_job(&orphan.id).await,
        Err(EngineError::UnknownJobHandler(_))
    );
    assert_eq!(engine.list_jobs(Some(&id)).await.unwrap()[0].retries, 2);
}

/// Async job execution
///
/// Jobs are acquired (locked) in one command and executed each in their own command.
/// The work a job does is delegated to the `JobHandler` registered for its handler type.

use crate::entities::{JobEntity, JobType, SuspensionState};
use crate::error::{EngineError, EngineResult};
use crate::runtime::agenda::{self, AgendaOperation};
use crate::runtime::context::CommandContext;
use crate::runtime::engine::ProcessEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

pub const TRIGGER_TIMER: &str = "trigger-timer";
pub const ASYNC_CONTINUATION: &str = "async-continuation";
pub const PROCESS_EVENT: &str = "process-event";

/// Behaviour behind a job handler type
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn handler_type(&self) -> &str;

    /// Runs inside the job's command; planned agenda operations execute afterwards
    async fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> EngineResult<()>;
}

fn job_execution_id(job: &JobEntity) -> EngineResult<&str> {
    job.execution_id
        .as_deref()
        .ok_or_else(|| EngineError::IllegalState(format!("job '{}' has no execution", job.id)))
}

/// Leaves a timer catch event once its timer cycle is exhausted
pub struct TriggerTimerHandler;

#[async_trait]
impl JobHandler for TriggerTimerHandler {
    fn handler_type(&self) -> &str {
        TRIGGER_TIMER
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> EngineResult<()> {
        let execution_id = job_execution_id(job)?;
        // The fired job is gone by now; a remaining timer is the next repetition
        if !ctx.jobs().find_timers_by_execution_id(execution_id).await?.is_empty() {
            tracing::debug!("🔁 Timer cycle of execution {} continues", execution_id);
            return Ok(());
        }
        ctx.agenda().plan(AgendaOperation::TakeOutgoing {
            execution_id: execution_id.to_string(),
        });
        Ok(())
    }
}

/// Runs an async service task and leaves it
pub struct AsyncContinuationHandler;

#[async_trait]
impl JobHandler for AsyncContinuationHandler {
    fn handler_type(&self) -> &str {
        ASYNC_CONTINUATION
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> EngineResult<()> {
        agenda::continue_async(ctx, job_execution_id(job)?).await
    }
}

/// Handler configuration of a `process-event` job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEventConfiguration {
    pub subscription_id: String,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

/// Delivers a message or signal to its subscription asynchronously
pub struct ProcessEventHandler;

#[async_trait]
impl JobHandler for ProcessEventHandler {
    fn handler_type(&self) -> &str {
        PROCESS_EVENT
    }

    async fn execute(&self, ctx: &mut CommandContext, job: &JobEntity) -> EngineResult<()> {
        let raw = job.handler_configuration.as_deref().ok_or_else(|| {
            EngineError::IllegalState(format!("process event job '{}' has no configuration", job.id))
        })?;
        let configuration: ProcessEventConfiguration = serde_json::from_str(raw)?;

        let Some(subscription) = ctx
            .event_subscriptions()
            .find_by_id(&configuration.subscription_id)
            .await?
        else {
            tracing::debug!("⏭️ Subscription {} already consumed", configuration.subscription_id);
            return Ok(());
        };
        ctx.event_subscriptions()
            .event_received(&subscription, configuration.variables.as_ref())
            .await
    }
}

/// Acquires due jobs and runs them through their handlers
pub struct JobExecutor {
    engine: Arc<ProcessEngine>,
}

impl JobExecutor {
    pub fn new(engine: Arc<ProcessEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ProcessEngine> {
        &self.engine
    }

    /// Lock due jobs for this node
    ///
    /// Returns batches of job ids, never more than `max_jobs_per_acquisition` jobs in
    /// total. Due exclusive jobs of one process instance form a single batch so they
    /// never run concurrently; a process instance whose exclusive jobs are locked
    /// elsewhere is skipped entirely. Losing a race against another acquiring node
    /// yields no batches.
    pub async fn acquire_jobs(&self) -> EngineResult<Vec<Vec<String>>> {
        let settings = &self.engine.config().jobs;
        let mut ctx = self.engine.command();
        let candidates = ctx
            .jobs()
            .find_next_jobs_to_execute(settings.max_jobs_per_acquisition)
            .await?;

        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut exclusive_instances: HashSet<String> = HashSet::new();
        let mut acquired: HashSet<String> = HashSet::new();

        for job in candidates {
            let capacity = settings.max_jobs_per_acquisition.saturating_sub(acquired.len());
            if capacity == 0 {
                break;
            }
            if acquired.contains(&job.id) {
                continue;
            }
            match (job.exclusive, job.process_instance_id.as_deref()) {
                (true, Some(process_instance_id)) => {
                    if !exclusive_instances.insert(process_instance_id.to_string()) {
                        continue;
                    }
                    if !ctx
                        .jobs()
                        .find_locked_exclusive_jobs(process_instance_id)
                        .await?
                        .is_empty()
                    {
                        tracing::debug!("🔐 Exclusive jobs of {} are locked elsewhere", process_instance_id);
                        continue;
                    }

                    let mut batch = Vec::new();
                    let due = ctx.jobs().find_exclusive_jobs_to_execute(process_instance_id).await?;
                    for exclusive in due.into_iter().take(capacity) {
                        ctx.jobs()
                            .lock_job(&exclusive.id, &settings.lock_owner, settings.lock_time_ms)
                            .await?;
                        acquired.insert(exclusive.id.clone());
                        batch.push(exclusive.id);
                    }
                    if !batch.is_empty() {
                        batches.push(batch);
                    }
                }
                _ => {
                    ctx.jobs()
                        .lock_job(&job.id, &settings.lock_owner, settings.lock_time_ms)
                        .await?;
                    acquired.insert(job.id.clone());
                    batches.push(vec![job.id]);
                }
            }
        }

        match ctx.close().await {
            Ok(_) => {
                if !acquired.is_empty() {
                    tracing::debug!("📥 Acquired {} jobs in {} batches", acquired.len(), batches.len());
                }
                Ok(batches)
            }
            Err(EngineError::OptimisticLocking { kind, id }) => {
                tracing::debug!("🤝 Lost acquisition race on {} '{}'", kind, id);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Run one job in its own command
    ///
    /// A failing run is rolled back and recorded through `job_failed` in a fresh
    /// command; the original error is returned.
    pub async fn execute_job(&self, job_id: &str) -> EngineResult<()> {
        let error = match self.run_job(job_id).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        match &error {
            EngineError::NotFound { .. } => {
                tracing::debug!("⏭️ Job {} not executed: {}", job_id, error);
            }
            EngineError::OptimisticLocking { .. } => {
                // Concurrent change; the job becomes due again right away
                tracing::debug!("🔁 Job {} lost a concurrent update: {}", job_id, error);
                if let Err(release) = self.release(job_id).await {
                    tracing::debug!("⏭️ Job {} not released: {}", job_id, release);
                }
            }
            _ => {
                tracing::warn!("⚠️ Job {} failed: {}", job_id, error);
                if let Err(failure) = self.record_failure(job_id, &error).await {
                    tracing::error!("❌ Could not record failure of job {}: {}", job_id, failure);
                }
            }
        }
        Err(error)
    }

    async fn run_job(&self, job_id: &str) -> EngineResult<()> {
        let mut ctx = self.engine.command();
        let job = ctx.jobs().get(job_id).await?;
        if job.suspension_state == SuspensionState::Suspended {
            return Err(EngineError::IllegalState(format!("job '{job_id}' is suspended")));
        }
        let handler = self.engine.job_handler(&job.handler_type)?;

        if job.job_type == JobType::Timer {
            ctx.jobs().execute_timer_job(&job).await?;
        }
        handler.execute(&mut ctx, &job).await?;
        agenda::run(&mut ctx).await?;
        ctx.jobs().job_executed(&job)?;
        ctx.close().await?;

        tracing::info!("✅ Executed {} job {}", job.handler_type, job.id);
        Ok(())
    }

    async fn release(&self, job_id: &str) -> EngineResult<()> {
        let mut ctx = self.engine.command();
        ctx.jobs().unlock_job(job_id).await?;
        ctx.close().await?;
        Ok(())
    }

    async fn record_failure(&self, job_id: &str, error: &EngineError) -> EngineResult<()> {
        let mut ctx = self.engine.command();
        ctx.jobs().job_failed(job_id, &error.to_string()).await?;
        ctx.close().await?;
        Ok(())
    }

    /// Acquire due jobs and execute the batches concurrently
    ///
    /// Jobs within a batch run one after another. Returns how many jobs succeeded.
    pub async fn acquire_and_execute(self: &Arc<Self>) -> EngineResult<usize> {
        let batches = self.acquire_jobs().await?;
        let mut running = JoinSet::new();
        for batch in batches {
            let executor = Arc::clone(self);
            running.spawn(async move {
                let mut succeeded = 0;
                for job_id in batch {
                    if executor.execute_job(&job_id).await.is_ok() {
                        succeeded += 1;
                    }
                }
                succeeded
            });
        }

        let mut succeeded = 0;
        while let Some(result) = running.join_next().await {
            match result {
                Ok(count) => succeeded += count,
                Err(e) => tracing::error!("❌ Job batch panicked: {}", e),
            }
        }
        Ok(succeeded)
    }
}

/// Handlers every engine starts with
pub(crate) fn builtin_handlers() -> HashMap<String, Arc<dyn JobHandler>> {
    let handlers: [Arc<dyn JobHandler>; 3] = [
        Arc::new(TriggerTimerHandler),
        Arc::new(AsyncContinuationHandler),
        Arc::new(ProcessEventHandler),
    ];
    handlers
        .into_iter()
        .map(|handler| (handler.handler_type().to_string(), handler))
        .collect()
}

use crate::entities::{ExecutionEntity, JobEntity, JobType, SuspensionState};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::persistence::{new_id, EntityKind, Order, Predicate, Statement};
use crate::runtime::calendar::{RepeatExpression, TimerDeclaration};
use crate::runtime::context::CommandContext;
use chrono::Duration;
use serde_json::{json, Value};

const JOBS_BY_EXECUTION: Statement =
    Statement::new("selectJobsByExecutionId", EntityKind::Job, &[Predicate::Eq("execution_id")])
        .ordered("create_time", Order::Asc);

const JOBS_BY_PROCESS_INSTANCE: Statement =
    Statement::new("selectJobsByProcessInstanceId", EntityKind::Job, &[Predicate::Eq("process_instance_id")])
        .ordered("create_time", Order::Asc);

const TIMERS_BY_EXECUTION: Statement = Statement::new(
    "selectTimersByExecutionId",
    EntityKind::Job,
    &[Predicate::Eq("execution_id"), Predicate::Eq("job_type")],
)
.ordered("duedate", Order::Asc);

const DEAD_LETTER_JOBS: Statement =
    Statement::new("selectDeadLetterJobs", EntityKind::Job, &[Predicate::NullOrLte("retries")])
        .ordered("create_time", Order::Asc);

const ALL_JOBS: Statement = Statement::new("selectJobs", EntityKind::Job, &[]).ordered("create_time", Order::Asc);

/// Due, unlocked (or lock expired), active jobs with retries left
const NEXT_JOBS_TO_EXECUTE: Statement = Statement::new(
    "selectNextJobsToExecute",
    EntityKind::Job,
    &[
        Predicate::Gt("retries"),
        Predicate::NullOrLt("lock_expiration_time"),
        Predicate::NullOrLte("duedate"),
        Predicate::Eq("suspension_state"),
    ],
)
.ordered("duedate", Order::Asc);

const EXCLUSIVE_JOBS_TO_EXECUTE: Statement = Statement::new(
    "selectExclusiveJobsToExecute",
    EntityKind::Job,
    &[
        Predicate::Gt("retries"),
        Predicate::NullOrLt("lock_expiration_time"),
        Predicate::NullOrLte("duedate"),
        Predicate::Eq("suspension_state"),
        Predicate::Eq("process_instance_id"),
        Predicate::Eq("exclusive"),
    ],
)
.ordered("duedate", Order::Asc);

const LOCKED_EXCLUSIVE_JOBS: Statement = Statement::new(
    "selectLockedExclusiveJobsByProcessInstance",
    EntityKind::Job,
    &[
        Predicate::Eq("process_instance_id"),
        Predicate::Eq("exclusive"),
        Predicate::Gt("lock_expiration_time"),
    ],
);

pub struct JobManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> JobManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    fn event(event_type: EngineEventType, job: &JobEntity) -> EngineEvent {
        EngineEvent::entity(event_type, job)
            .with_execution(job.execution_id.as_deref(), job.process_instance_id.as_deref())
            .with_definition(job.process_definition_id.as_deref())
    }

    fn now_param(&self) -> Value {
        Value::from(self.ctx.now().timestamp_millis())
    }

    fn job_for_execution(&self, job_type: JobType, handler_type: &str, execution: &ExecutionEntity) -> JobEntity {
        let mut job = JobEntity::new(job_type, handler_type, self.ctx.config().jobs.default_retries, self.ctx.now());
        job.execution_id = Some(execution.id.clone());
        job.process_instance_id = Some(execution.process_instance_id.clone());
        job.process_definition_id = Some(execution.process_definition_id.clone());
        job.suspension_state = execution.suspension_state;
        job.tenant_id = execution.tenant_id.clone();
        job
    }

    // Creation

    /// Message job continuing `execution` asynchronously
    pub fn create_async_job(
        &mut self,
        execution: &ExecutionEntity,
        handler_type: &str,
        handler_configuration: Option<String>,
        exclusive: bool,
    ) -> EngineResult<JobEntity> {
        let mut job = self.job_for_execution(JobType::Message, handler_type, execution);
        job.handler_configuration = handler_configuration;
        job.exclusive = exclusive;
        self.insert(&job)?;
        Ok(job)
    }

    /// Timer job due according to the declaration
    pub fn schedule_timer(
        &mut self,
        execution: &ExecutionEntity,
        declaration: &TimerDeclaration,
        handler_type: &str,
        handler_configuration: Option<String>,
    ) -> EngineResult<JobEntity> {
        let mut job = self.job_for_execution(JobType::Timer, handler_type, execution);
        job.handler_configuration = handler_configuration;
        job.duedate = Some(declaration.resolve_due_date(self.ctx.now())?);
        if let Some(repeat) = declaration.repeat()? {
            job.end_date = repeat.end;
            job.repeat = Some(repeat.to_string());
        }
        self.insert(&job)?;
        self.ctx.dispatch(Self::event(EngineEventType::TimerScheduled, &job))?;
        tracing::debug!("⏰ Scheduled timer {} due {:?}", job.id, job.duedate);
        Ok(job)
    }

    pub fn insert(&mut self, job: &JobEntity) -> EngineResult<()> {
        self.ctx.session().insert(job)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityCreated, job))?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityInitialized, job))
    }

    // Finders

    pub async fn find_by_id(&mut self, id: &str) -> EngineResult<Option<JobEntity>> {
        self.ctx.session().select_by_id(id).await
    }

    pub async fn get(&mut self, id: &str) -> EngineResult<JobEntity> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Job, id))
    }

    pub async fn find_jobs_by_execution_id(&mut self, execution_id: &str) -> EngineResult<Vec<JobEntity>> {
        self.ctx
            .session()
            .select_list(&JOBS_BY_EXECUTION, &[Value::from(execution_id)])
            .await
    }

    pub async fn find_jobs_by_process_instance_id(&mut self, process_instance_id: &str) -> EngineResult<Vec<JobEntity>> {
        self.ctx
            .session()
            .select_list(&JOBS_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_timers_by_execution_id(&mut self, execution_id: &str) -> EngineResult<Vec<JobEntity>> {
        self.ctx
            .session()
            .select_list(
                &TIMERS_BY_EXECUTION,
                &[Value::from(execution_id), Value::from(JobType::Timer.as_str())],
            )
            .await
    }

    pub async fn find_dead_letter_jobs(&mut self) -> EngineResult<Vec<JobEntity>> {
        self.ctx
            .session()
            .select_list(&DEAD_LETTER_JOBS, &[Value::from(0)])
            .await
    }

    pub async fn find_all(&mut self) -> EngineResult<Vec<JobEntity>> {
        self.ctx.session().select_list(&ALL_JOBS, &[]).await
    }

    pub async fn find_next_jobs_to_execute(&mut self, limit: usize) -> EngineResult<Vec<JobEntity>> {
        let now = self.now_param();
        self.ctx
            .session()
            .select_page(
                &NEXT_JOBS_TO_EXECUTE,
                &[
                    Value::from(0),
                    now.clone(),
                    now,
                    Value::from(SuspensionState::Active.as_str()),
                ],
                limit,
            )
            .await
    }

    /// Executable exclusive jobs of a process instance, due-date order
    pub async fn find_exclusive_jobs_to_execute(&mut self, process_instance_id: &str) -> EngineResult<Vec<JobEntity>> {
        let now = self.now_param();
        self.ctx
            .session()
            .select_list(
                &EXCLUSIVE_JOBS_TO_EXECUTE,
                &[
                    Value::from(0),
                    now.clone(),
                    now,
                    Value::from(SuspensionState::Active.as_str()),
                    Value::from(process_instance_id),
                    Value::Bool(true),
                ],
            )
            .await
    }

    /// Exclusive jobs of a process instance currently held by a live lock
    pub async fn find_locked_exclusive_jobs(&mut self, process_instance_id: &str) -> EngineResult<Vec<JobEntity>> {
        let now = self.now_param();
        self.ctx
            .session()
            .select_list(
                &LOCKED_EXCLUSIVE_JOBS,
                &[Value::from(process_instance_id), Value::Bool(true), now],
            )
            .await
    }

    // Locking

    pub async fn lock_job(&mut self, job_id: &str, lock_owner: &str, lock_time_ms: i64) -> EngineResult<JobEntity> {
        let mut job = self.get(job_id).await?;
        job.lock_owner = Some(lock_owner.to_string());
        job.lock_expiration_time = Some(self.ctx.now() + Duration::milliseconds(lock_time_ms));
        self.ctx.session().update(&job)?;
        tracing::debug!("🔒 Locked job {} for {}", job.id, lock_owner);
        Ok(job)
    }

    pub async fn unlock_job(&mut self, job_id: &str) -> EngineResult<JobEntity> {
        let mut job = self.get(job_id).await?;
        job.lock_owner = None;
        job.lock_expiration_time = None;
        self.ctx.session().update(&job)?;
        Ok(job)
    }

    // Execution bookkeeping

    /// Fire a timer: schedule the next repetition (if any) and remove the fired job
    ///
    /// The next due date is computed from the previous due date so a late firing does
    /// not shift the cycle.
    pub async fn execute_timer_job(&mut self, job: &JobEntity) -> EngineResult<Option<JobEntity>> {
        self.ctx.dispatch(Self::event(EngineEventType::TimerFired, job))?;

        let mut next_timer = None;
        if let Some(repeat) = &job.repeat {
            let previous = job.duedate.unwrap_or_else(|| self.ctx.now());
            if let Some((next_due, remaining)) = RepeatExpression::parse(repeat)?.next_after(previous)? {
                let mut next = job.clone();
                next.id = new_id();
                next.revision = 1;
                next.duedate = Some(next_due);
                next.repeat = Some(remaining.to_string());
                next.retries = self.ctx.config().jobs.default_retries;
                next.exception_message = None;
                next.lock_owner = None;
                next.lock_expiration_time = None;
                next.create_time = self.ctx.now();
                self.insert(&next)?;
                self.ctx.dispatch(Self::event(EngineEventType::TimerScheduled, &next))?;
                tracing::debug!("🔁 Rescheduled timer {} as {} due {}", job.id, next.id, next_due);
                next_timer = Some(next);
            }
        }

        self.ctx.session().delete(job)?;
        Ok(next_timer)
    }

    /// Successful end of a job run
    pub fn job_executed(&mut self, job: &JobEntity) -> EngineResult<()> {
        if job.job_type == JobType::Message {
            self.ctx.session().delete(job)?;
        }
        self.ctx.dispatch(Self::event(EngineEventType::JobExecutionSuccess, job))
    }

    /// Record a failed run: one retry less, unlocked, due again after the retry wait
    ///
    /// A job reaching zero retries is dead-lettered and no longer acquired.
    pub async fn job_failed(&mut self, job_id: &str, message: &str) -> EngineResult<JobEntity> {
        let mut job = self.get(job_id).await?;
        job.retries = (job.retries - 1).max(0);
        job.exception_message = Some(message.to_string());
        job.lock_owner = None;
        job.lock_expiration_time = None;
        job.duedate = Some(self.ctx.now() + Duration::milliseconds(self.ctx.config().jobs.retry_wait_ms));
        self.ctx.session().update(&job)?;

        self.ctx.dispatch(
            Self::event(EngineEventType::JobExecutionFailure, &job).with_payload(json!({ "message": message })),
        )?;
        self.ctx.dispatch(
            Self::event(EngineEventType::JobRetriesDecremented, &job).with_payload(json!({ "retries": job.retries })),
        )?;

        if job.is_dead_letter() {
            tracing::warn!("💀 Job {} moved to dead letter: {}", job.id, message);
        } else {
            tracing::warn!("⚠️ Job {} failed ({} retries left): {}", job.id, job.retries, message);
        }
        Ok(job)
    }

    // Admin

    pub async fn set_job_retries(&mut self, job_id: &str, retries: i32) -> EngineResult<JobEntity> {
        if retries < 0 {
            return Err(EngineError::IllegalArgument(format!("job retries must not be negative, got {retries}")));
        }
        let mut job = self.get(job_id).await?;
        job.retries = retries;
        self.ctx.session().update(&job)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityUpdated, &job))?;
        tracing::info!("🔧 Job {} retries set to {}", job.id, retries);
        Ok(job)
    }

    pub fn delete(&mut self, job: &JobEntity) -> EngineResult<()> {
        self.ctx.session().delete(job)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityDeleted, job))?;
        if job.job_type == JobType::Timer {
            self.ctx.dispatch(Self::event(EngineEventType::JobCanceled, job))?;
        }
        Ok(())
    }

    pub async fn delete_jobs_by_execution(&mut self, execution_id: &str) -> EngineResult<()> {
        for job in self.find_jobs_by_execution_id(execution_id).await? {
            self.delete(&job)?;
        }
        Ok(())
    }
}

/// Process engine services
///
/// Every service method runs as one command: a fresh `CommandContext`, the agenda run
/// to completion and a single flush. Read-only methods drop their context instead of
/// flushing it.

use crate::config::EngineConfig;
use crate::definition::{
    CompiledDefinition, DefinitionRegistry, DefinitionStorage, DeploymentRequest, ProcessDefinition,
};
use crate::entities::{
    EventSubscriptionEntity, ExecutionEntity, HistoricActivityInstanceEntity,
    HistoricProcessInstanceEntity, HistoricTaskInstanceEntity, HistoricVariableInstanceEntity,
    IdentityLinkEntity, JobEntity, TaskEntity,
};
use crate::error::{EngineError, EngineResult};
use crate::event::EventDispatcher;
use crate::managers::ExecutionTree;
use crate::persistence::{schema, EntityKind};
use crate::runtime::agenda::{self, AgendaOperation};
use crate::runtime::clock::EngineClock;
use crate::runtime::context::CommandContext;
use crate::runtime::executor::{self, JobHandler, ProcessEventConfiguration, PROCESS_EVENT};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePool;
use std::{collections::HashMap, sync::Arc};

/// Result of starting a process instance
#[derive(Debug, Clone, Serialize)]
pub struct StartedProcessInstance {
    #[serde(flatten)]
    pub instance: ExecutionEntity,
    /// The instance ran to its end within the starting command
    pub ended: bool,
}

/// Task query; all given criteria must match
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub process_instance_id: Option<String>,
    pub assignee: Option<String>,
    /// Unassigned tasks the user is a candidate for
    pub candidate_user: Option<String>,
    pub candidate_group: Option<String>,
}

pub struct ProcessEngine {
    pool: SqlitePool,
    config: Arc<EngineConfig>,
    dispatcher: Arc<EventDispatcher>,
    definitions: Arc<DefinitionRegistry>,
    clock: EngineClock,
    handlers: ArcSwap<HashMap<String, Arc<dyn JobHandler>>>,
}

impl ProcessEngine {
    /// Create the schema, load the deployed definitions and register built-in handlers
    pub async fn new(pool: SqlitePool, config: EngineConfig) -> anyhow::Result<Self> {
        schema::init_schema(&pool).await?;
        let storage = DefinitionStorage::new(pool.clone());
        storage.init_schema().await?;
        let definitions = Arc::new(DefinitionRegistry::new(storage));
        definitions.init_from_storage().await?;

        tracing::info!(
            "⚙️ Process engine ready (history level: {}, events: {})",
            config.history_level,
            config.events_enabled
        );
        Ok(Self {
            pool,
            dispatcher: Arc::new(EventDispatcher::new(config.events_enabled)),
            config: Arc::new(config),
            definitions,
            clock: EngineClock::new(),
            handlers: ArcSwap::new(Arc::new(executor::builtin_handlers())),
        })
    }

    /// Open a new unit of work
    pub fn command(&self) -> CommandContext {
        CommandContext::new(
            self.pool.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.config),
            Arc::clone(&self.definitions),
            self.clock.now(),
        )
    }

    async fn finish(mut ctx: CommandContext) -> EngineResult<()> {
        agenda::run(&mut ctx).await?;
        ctx.close().await?;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn clock(&self) -> &EngineClock {
        &self.clock
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        &self.definitions
    }

    pub fn register_job_handler(&self, handler: Arc<dyn JobHandler>) {
        let handler_type = handler.handler_type().to_string();
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(handler_type.clone(), Arc::clone(&handler));
            next
        });
        tracing::info!("🧩 Registered job handler '{}'", handler_type);
    }

    pub fn job_handler(&self, handler_type: &str) -> EngineResult<Arc<dyn JobHandler>> {
        self.handlers
            .load()
            .get(handler_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownJobHandler(handler_type.to_string()))
    }

    // Definitions

    pub async fn deploy(&self, request: DeploymentRequest) -> EngineResult<Arc<CompiledDefinition>> {
        self.definitions.deploy(request).await
    }

    pub fn get_definition(&self, id: &str) -> EngineResult<ProcessDefinition> {
        Ok(self.definitions.get_required(id)?.definition.clone())
    }

    pub fn list_definitions(&self) -> Vec<ProcessDefinition> {
        self.definitions
            .list()
            .into_iter()
            .map(|compiled| compiled.definition.clone())
            .collect()
    }

    // Process instances

    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        business_key: Option<String>,
        variables: Option<Map<String, Value>>,
        start_user_id: Option<String>,
    ) -> EngineResult<StartedProcessInstance> {
        let definition = self
            .definitions
            .latest(key)
            .ok_or_else(|| EngineError::DefinitionNotFound(key.to_string()))?;
        self.start_process_instance(&definition, business_key, variables, start_user_id)
            .await
    }

    pub async fn start_process_instance_by_id(
        &self,
        definition_id: &str,
        business_key: Option<String>,
        variables: Option<Map<String, Value>>,
        start_user_id: Option<String>,
    ) -> EngineResult<StartedProcessInstance> {
        let definition = self.definitions.get_required(definition_id)?;
        self.start_process_instance(&definition, business_key, variables, start_user_id)
            .await
    }

    async fn start_process_instance(
        &self,
        definition: &CompiledDefinition,
        business_key: Option<String>,
        variables: Option<Map<String, Value>>,
        start_user_id: Option<String>,
    ) -> EngineResult<StartedProcessInstance> {
        let mut ctx = self.command();
        let instance = ctx
            .executions()
            .create_process_instance(definition, business_key, start_user_id)
            .await?;
        if let Some(variables) = &variables {
            ctx.variables().set_variables(&instance.id, variables).await?;
        }
        ctx.agenda().plan(AgendaOperation::ContinueProcess {
            execution_id: instance.id.clone(),
        });
        agenda::run(&mut ctx).await?;

        let current = ctx.executions().find_by_id(&instance.id).await?;
        ctx.close().await?;

        Ok(match current {
            Some(instance) => StartedProcessInstance { instance, ended: false },
            None => StartedProcessInstance { instance, ended: true },
        })
    }

    pub async fn get_execution(&self, execution_id: &str) -> EngineResult<ExecutionEntity> {
        self.command().executions().get(execution_id).await
    }

    pub async fn execution_tree(&self, process_instance_id: &str) -> EngineResult<ExecutionTree> {
        self.command().executions().execution_tree(process_instance_id).await
    }

    pub async fn list_executions(&self, process_instance_id: &str) -> EngineResult<Vec<ExecutionEntity>> {
        let mut ctx = self.command();
        let executions = ctx
            .executions()
            .find_executions_by_process_instance(process_instance_id)
            .await?;
        if executions.is_empty() {
            return Err(EngineError::not_found(EntityKind::Execution, process_instance_id));
        }
        Ok(executions)
    }

    pub async fn list_process_instances(&self) -> EngineResult<Vec<ExecutionEntity>> {
        self.command().executions().find_process_instances().await
    }

    pub async fn delete_process_instance(&self, process_instance_id: &str, reason: Option<&str>) -> EngineResult<()> {
        let mut ctx = self.command();
        ctx.executions()
            .delete_process_instance(process_instance_id, reason, false)
            .await?;
        Self::finish(ctx).await
    }

    pub async fn suspend_process_instance(&self, process_instance_id: &str) -> EngineResult<()> {
        let mut ctx = self.command();
        ctx.executions().suspend_process_instance(process_instance_id).await?;
        Self::finish(ctx).await
    }

    pub async fn activate_process_instance(&self, process_instance_id: &str) -> EngineResult<()> {
        let mut ctx = self.command();
        ctx.executions().activate_process_instance(process_instance_id).await?;
        Self::finish(ctx).await
    }

    // Variables

    pub async fn get_variables(&self, execution_id: &str) -> EngineResult<Map<String, Value>> {
        self.command().variables().get_variables(execution_id).await
    }

    pub async fn set_variables(&self, execution_id: &str, variables: &Map<String, Value>) -> EngineResult<()> {
        let mut ctx = self.command();
        ctx.variables().set_variables(execution_id, variables).await?;
        Self::finish(ctx).await
    }

    pub async fn get_task_variables(&self, task_id: &str) -> EngineResult<Map<String, Value>> {
        self.command().variables().get_task_variables(task_id).await
    }

    // Tasks

    pub async fn list_tasks(&self, filter: &TaskFilter) -> EngineResult<Vec<TaskEntity>> {
        let mut ctx = self.command();
        let mut tasks = if filter.candidate_user.is_some() || filter.candidate_group.is_some() {
            let groups: Vec<String> = filter.candidate_group.iter().cloned().collect();
            ctx.tasks()
                .find_tasks_by_candidate(filter.candidate_user.as_deref().unwrap_or_default(), &groups)
                .await?
        } else if let Some(assignee) = &filter.assignee {
            ctx.tasks().find_tasks_by_assignee(assignee).await?
        } else if let Some(process_instance_id) = &filter.process_instance_id {
            ctx.tasks().find_tasks_by_process_instance_id(process_instance_id).await?
        } else {
            ctx.tasks().find_all().await?
        };

        tasks.retain(|task| {
            filter
                .process_instance_id
                .as_ref()
                .map_or(true, |id| task.process_instance_id.as_ref() == Some(id))
                && filter.assignee.as_ref().map_or(true, |user| task.assignee.as_ref() == Some(user))
        });
        Ok(tasks)
    }

    pub async fn get_task(&self, task_id: &str) -> EngineResult<TaskEntity> {
        self.command().tasks().get(task_id).await
    }

    pub async fn claim_task(&self, task_id: &str, user_id: &str) -> EngineResult<TaskEntity> {
        let mut ctx = self.command();
        let task = ctx.tasks().claim(task_id, user_id).await?;
        Self::finish(ctx).await?;
        Ok(task)
    }

    pub async fn set_assignee(&self, task_id: &str, assignee: Option<&str>) -> EngineResult<TaskEntity> {
        let mut ctx = self.command();
        let task = ctx.tasks().change_assignee(task_id, assignee).await?;
        Self::finish(ctx).await?;
        Ok(task)
    }

    pub async fn add_candidate_user(&self, task_id: &str, user_id: &str) -> EngineResult<IdentityLinkEntity> {
        let mut ctx = self.command();
        let task = ctx.tasks().get(task_id).await?;
        let link = ctx.identity_links().add_candidate_user(&task, user_id).await?;
        Self::finish(ctx).await?;
        Ok(link)
    }

    pub async fn add_candidate_group(&self, task_id: &str, group_id: &str) -> EngineResult<IdentityLinkEntity> {
        let mut ctx = self.command();
        let task = ctx.tasks().get(task_id).await?;
        let link = ctx.identity_links().add_candidate_group(&task, group_id)?;
        Self::finish(ctx).await?;
        Ok(link)
    }

    pub async fn delete_candidate_user(&self, task_id: &str, user_id: &str) -> EngineResult<usize> {
        let mut ctx = self.command();
        let task = ctx.tasks().get(task_id).await?;
        let removed = ctx
            .identity_links()
            .delete_identity_link(&task, Some(user_id), None, crate::entities::link_type::CANDIDATE)
            .await?;
        Self::finish(ctx).await?;
        Ok(removed)
    }

    pub async fn task_identity_links(&self, task_id: &str) -> EngineResult<Vec<IdentityLinkEntity>> {
        let mut ctx = self.command();
        ctx.tasks().get(task_id).await?;
        ctx.identity_links().find_by_task_id(task_id).await
    }

    /// Complete a task and continue its execution past the user task
    pub async fn complete_task(&self, task_id: &str, variables: Option<Map<String, Value>>) -> EngineResult<()> {
        let mut ctx = self.command();
        let task = ctx.tasks().get(task_id).await?;
        if let (Some(variables), Some(execution_id)) = (&variables, &task.execution_id) {
            ctx.variables().set_variables(execution_id, variables).await?;
        }
        ctx.tasks().complete(task_id).await?;
        if let Some(execution_id) = task.execution_id {
            ctx.agenda().plan(AgendaOperation::TakeOutgoing { execution_id });
        }
        Self::finish(ctx).await
    }

    // Correlation

    /// Deliver a message to the single execution waiting for it
    ///
    /// Returns the id of the execution that received the message.
    pub async fn correlate_message(
        &self,
        message_name: &str,
        process_instance_id: Option<&str>,
        variables: Option<Map<String, Value>>,
    ) -> EngineResult<String> {
        let mut ctx = self.command();
        let mut subscriptions = ctx
            .event_subscriptions()
            .find_message_subscriptions_by_name(message_name)
            .await?;
        if let Some(process_instance_id) = process_instance_id {
            subscriptions.retain(|s| s.process_instance_id.as_deref() == Some(process_instance_id));
        }

        let subscription = match subscriptions.as_slice() {
            [] => return Err(EngineError::not_found(EntityKind::EventSubscription, message_name)),
            [subscription] => subscription.clone(),
            many => {
                return Err(EngineError::IllegalState(format!(
                    "message '{}' matches {} waiting executions",
                    message_name,
                    many.len()
                )))
            }
        };

        ctx.event_subscriptions()
            .event_received(&subscription, variables.as_ref())
            .await?;
        Self::finish(ctx).await?;
        Ok(subscription.execution_id.unwrap_or_default())
    }

    /// Broadcast a signal to every subscribed execution of the tenant
    ///
    /// With `asynchronous` each delivery becomes a `process-event` job. Returns the
    /// number of subscriptions reached.
    pub async fn signal_event_received(
        &self,
        signal_name: &str,
        tenant_id: Option<&str>,
        variables: Option<Map<String, Value>>,
        asynchronous: bool,
    ) -> EngineResult<usize> {
        let mut ctx = self.command();
        let subscriptions = ctx
            .event_subscriptions()
            .find_signal_subscriptions_by_event_name(signal_name, tenant_id)
            .await?;

        for subscription in &subscriptions {
            if asynchronous {
                Self::schedule_event_delivery(&mut ctx, subscription, variables.clone()).await?;
            } else {
                ctx.event_subscriptions()
                    .event_received(subscription, variables.as_ref())
                    .await?;
            }
        }
        Self::finish(ctx).await?;

        tracing::info!("📡 Signal '{}' reached {} subscriptions", signal_name, subscriptions.len());
        Ok(subscriptions.len())
    }

    async fn schedule_event_delivery(
        ctx: &mut CommandContext,
        subscription: &EventSubscriptionEntity,
        variables: Option<Map<String, Value>>,
    ) -> EngineResult<JobEntity> {
        let execution_id = subscription.execution_id.as_deref().ok_or_else(|| {
            EngineError::IllegalState(format!("event subscription '{}' has no execution", subscription.id))
        })?;
        let execution = ctx.executions().get(execution_id).await?;
        let configuration = serde_json::to_string(&ProcessEventConfiguration {
            subscription_id: subscription.id.clone(),
            variables,
        })?;
        ctx.jobs()
            .create_async_job(&execution, PROCESS_EVENT, Some(configuration), true)
    }

    // Jobs

    pub async fn list_jobs(&self, process_instance_id: Option<&str>) -> EngineResult<Vec<JobEntity>> {
        let mut ctx = self.command();
        match process_instance_id {
            Some(id) => ctx.jobs().find_jobs_by_process_instance_id(id).await,
            None => ctx.jobs().find_all().await,
        }
    }

    pub async fn dead_letter_jobs(&self) -> EngineResult<Vec<JobEntity>> {
        self.command().jobs().find_dead_letter_jobs().await
    }

    pub async fn set_job_retries(&self, job_id: &str, retries: i32) -> EngineResult<JobEntity> {
        let mut ctx = self.command();
        let job = ctx.jobs().set_job_retries(job_id, retries).await?;
        Self::finish(ctx).await?;
        Ok(job)
    }

    // History

    pub async fn historic_process_instance(&self, process_instance_id: &str) -> EngineResult<HistoricProcessInstanceEntity> {
        self.command()
            .history()
            .find_historic_process_instance(process_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::HistoricProcessInstance, process_instance_id))
    }

    pub async fn historic_activities(&self, process_instance_id: &str) -> EngineResult<Vec<HistoricActivityInstanceEntity>> {
        self.command()
            .history()
            .find_historic_activity_instances(process_instance_id)
            .await
    }

    pub async fn historic_tasks(&self, process_instance_id: &str) -> EngineResult<Vec<HistoricTaskInstanceEntity>> {
        self.command()
            .history()
            .find_historic_task_instances(process_instance_id)
            .await
    }

    pub async fn historic_variables(&self, process_instance_id: &str) -> EngineResult<Vec<HistoricVariableInstanceEntity>> {
        self.command()
            .history()
            .find_historic_variable_instances(process_instance_id)
            .await
    }

    /// Remove the history of a finished process instance
    pub async fn delete_historic_process_instance(&self, process_instance_id: &str) -> EngineResult<()> {
        let mut ctx = self.command();
        if ctx.executions().find_by_id(process_instance_id).await?.is_some() {
            return Err(EngineError::IllegalState(format!(
                "process instance '{process_instance_id}' is still running"
            )));
        }
        if !ctx
            .history()
            .delete_historic_process_instance(process_instance_id)
            .await?
        {
            return Err(EngineError::not_found(EntityKind::HistoricProcessInstance, process_instance_id));
        }
        Self::finish(ctx).await
    }
}

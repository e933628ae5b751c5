use crate::definition::CompiledDefinition;
use crate::entities::{link_type, ExecutionEntity, SuspensionState};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::managers::ExecutionTree;
use crate::persistence::{EntityKind, Order, Predicate, Statement};
use crate::runtime::context::CommandContext;
use serde_json::{json, Value};

const CHILDREN_BY_PARENT: Statement =
    Statement::new("selectExecutionsByParentId", EntityKind::Execution, &[Predicate::Eq("parent_id")])
        .ordered("start_time", Order::Asc);

const CHILDREN_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectChildExecutionsByProcessInstanceId",
    EntityKind::Execution,
    &[Predicate::Eq("process_instance_id"), Predicate::NotNull("parent_id")],
)
.ordered("start_time", Order::Asc);

const BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectExecutionsByProcessInstanceId",
    EntityKind::Execution,
    &[Predicate::Eq("process_instance_id")],
)
.ordered("start_time", Order::Asc);

const SUB_PROCESS_INSTANCE_BY_SUPER_EXECUTION: Statement = Statement::new(
    "selectSubProcessInstanceBySuperExecutionId",
    EntityKind::Execution,
    &[Predicate::Eq("super_execution_id")],
);

const INACTIVE_BY_ACTIVITY: Statement = Statement::new(
    "selectInactiveExecutionsInActivity",
    EntityKind::Execution,
    &[Predicate::Eq("activity_id"), Predicate::Eq("parent_id"), Predicate::Eq("is_active")],
);

const PROCESS_INSTANCES_BY_DEFINITION: Statement = Statement::new(
    "selectProcessInstancesByProcessDefinitionId",
    EntityKind::Execution,
    &[Predicate::Eq("process_definition_id"), Predicate::Eq("is_process_instance")],
)
.ordered("start_time", Order::Asc);

const PROCESS_INSTANCE_BY_BUSINESS_KEY: Statement = Statement::new(
    "selectProcessInstanceByBusinessKey",
    EntityKind::Execution,
    &[
        Predicate::Eq("process_definition_key"),
        Predicate::Eq("business_key"),
        Predicate::Eq("is_process_instance"),
    ],
);

const ALL_PROCESS_INSTANCES: Statement = Statement::new(
    "selectProcessInstances",
    EntityKind::Execution,
    &[Predicate::Eq("is_process_instance")],
)
.ordered("start_time", Order::Asc);

pub struct ExecutionManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> ExecutionManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    /// Insert the root execution of a new process instance positioned at the start event
    pub async fn create_process_instance(
        &mut self,
        definition: &CompiledDefinition,
        business_key: Option<String>,
        start_user_id: Option<String>,
    ) -> EngineResult<ExecutionEntity> {
        let mut process_instance =
            ExecutionEntity::new_process_instance(definition.id(), &definition.definition.key, self.ctx.now());
        process_instance.business_key = business_key;
        process_instance.start_user_id = start_user_id;
        process_instance.name = Some(definition.definition.name.clone());
        process_instance.tenant_id = definition.definition.tenant_id.clone();
        process_instance.activity_id = Some(definition.start_activity_id.clone());

        self.initialize_process_instance(&process_instance, None).await?;
        Ok(process_instance)
    }

    /// Start a process instance called from `super_execution`
    pub async fn create_subprocess_instance(
        &mut self,
        super_execution: &ExecutionEntity,
        definition: &CompiledDefinition,
        business_key: Option<String>,
    ) -> EngineResult<ExecutionEntity> {
        let mut process_instance =
            ExecutionEntity::new_process_instance(definition.id(), &definition.definition.key, self.ctx.now());
        process_instance.super_execution_id = Some(super_execution.id.clone());
        process_instance.root_process_instance_id = super_execution.root_process_instance_id.clone();
        process_instance.business_key = business_key;
        process_instance.name = Some(definition.definition.name.clone());
        process_instance.tenant_id = definition.definition.tenant_id.clone();
        process_instance.activity_id = Some(definition.start_activity_id.clone());

        self.initialize_process_instance(&process_instance, Some(&super_execution.process_instance_id))
            .await?;
        Ok(process_instance)
    }

    async fn initialize_process_instance(
        &mut self,
        process_instance: &ExecutionEntity,
        super_process_instance_id: Option<&str>,
    ) -> EngineResult<()> {
        self.ctx.session().insert(process_instance)?;

        if let Some(user) = &process_instance.start_user_id {
            self.ctx
                .identity_links()
                .involve_user(&process_instance.id, user, link_type::STARTER)
                .await?;
        }

        self.ctx
            .history()
            .record_process_instance_start(process_instance, super_process_instance_id)?;

        self.ctx
            .dispatch(self.event(EngineEventType::EntityCreated, process_instance))?;
        self.ctx
            .dispatch(self.event(EngineEventType::ProcessStarted, process_instance))?;

        tracing::info!(
            "🚀 Started process instance {} of {}",
            process_instance.id,
            process_instance.process_definition_id
        );
        Ok(())
    }

    /// Insert a child execution below `parent`
    pub fn create_child_execution(
        &mut self,
        parent: &ExecutionEntity,
        activity_id: Option<&str>,
        concurrent: bool,
    ) -> EngineResult<ExecutionEntity> {
        let mut child = ExecutionEntity::new_child(parent, self.ctx.now());
        if let Some(activity_id) = activity_id {
            child.activity_id = Some(activity_id.to_string());
        }
        child.is_concurrent = concurrent;

        self.ctx.session().insert(&child)?;
        self.ctx.dispatch(self.event(EngineEventType::EntityCreated, &child))?;
        tracing::debug!("🌿 Created child execution {} below {}", child.id, parent.id);
        Ok(child)
    }

    fn event(&self, event_type: EngineEventType, execution: &ExecutionEntity) -> EngineEvent {
        EngineEvent::entity(event_type, execution)
            .with_execution(Some(&execution.id), Some(&execution.process_instance_id))
            .with_definition(Some(&execution.process_definition_id))
    }

    // Finders

    pub async fn find_by_id(&mut self, id: &str) -> EngineResult<Option<ExecutionEntity>> {
        self.ctx.session().select_by_id(id).await
    }

    pub async fn get(&mut self, id: &str) -> EngineResult<ExecutionEntity> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Execution, id))
    }

    pub async fn find_child_executions_by_parent(&mut self, parent_id: &str) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(&CHILDREN_BY_PARENT, &[Value::from(parent_id)])
            .await
    }

    pub async fn find_child_executions_by_process_instance(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(&CHILDREN_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    /// Root and every child of a process instance
    pub async fn find_executions_by_process_instance(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(&BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_sub_process_instance_by_super_execution(
        &mut self,
        super_execution_id: &str,
    ) -> EngineResult<Option<ExecutionEntity>> {
        self.ctx
            .session()
            .select_one(&SUB_PROCESS_INSTANCE_BY_SUPER_EXECUTION, &[Value::from(super_execution_id)])
            .await
    }

    /// Inactive children of `parent_id` waiting in `activity_id`
    pub async fn find_inactive_executions_by_activity(
        &mut self,
        activity_id: &str,
        parent_id: &str,
    ) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(
                &INACTIVE_BY_ACTIVITY,
                &[Value::from(activity_id), Value::from(parent_id), Value::Bool(false)],
            )
            .await
    }

    pub async fn find_process_instances_by_definition(
        &mut self,
        process_definition_id: &str,
    ) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(
                &PROCESS_INSTANCES_BY_DEFINITION,
                &[Value::from(process_definition_id), Value::Bool(true)],
            )
            .await
    }

    pub async fn find_process_instance_by_business_key(
        &mut self,
        process_definition_key: &str,
        business_key: &str,
    ) -> EngineResult<Option<ExecutionEntity>> {
        self.ctx
            .session()
            .select_one(
                &PROCESS_INSTANCE_BY_BUSINESS_KEY,
                &[Value::from(process_definition_key), Value::from(business_key), Value::Bool(true)],
            )
            .await
    }

    pub async fn find_process_instances(&mut self) -> EngineResult<Vec<ExecutionEntity>> {
        self.ctx
            .session()
            .select_list(&ALL_PROCESS_INSTANCES, &[Value::Bool(true)])
            .await
    }

    pub async fn execution_tree(&mut self, process_instance_id: &str) -> EngineResult<ExecutionTree> {
        let executions = self.find_executions_by_process_instance(process_instance_id).await?;
        if executions.is_empty() {
            return Err(EngineError::not_found(EntityKind::Execution, process_instance_id));
        }
        ExecutionTree::build(executions)
    }

    // Updates

    pub fn update(&mut self, execution: &ExecutionEntity) -> EngineResult<()> {
        self.ctx.session().update(execution)?;
        self.ctx.dispatch(self.event(EngineEventType::EntityUpdated, execution))
    }

    pub async fn update_business_key(
        &mut self,
        process_instance_id: &str,
        business_key: Option<String>,
    ) -> EngineResult<ExecutionEntity> {
        let mut process_instance = self.get_process_instance(process_instance_id).await?;
        process_instance.business_key = business_key;
        self.update(&process_instance)?;
        self.ctx
            .history()
            .record_process_business_key_change(process_instance_id, process_instance.business_key.as_deref())
            .await?;
        Ok(process_instance)
    }

    async fn get_process_instance(&mut self, process_instance_id: &str) -> EngineResult<ExecutionEntity> {
        let execution = self.get(process_instance_id).await?;
        if !execution.is_process_instance {
            return Err(EngineError::IllegalArgument(format!(
                "execution '{process_instance_id}' is not a process instance"
            )));
        }
        Ok(execution)
    }

    pub async fn suspend_process_instance(&mut self, process_instance_id: &str) -> EngineResult<()> {
        self.change_suspension_state(process_instance_id, SuspensionState::Suspended).await
    }

    pub async fn activate_process_instance(&mut self, process_instance_id: &str) -> EngineResult<()> {
        self.change_suspension_state(process_instance_id, SuspensionState::Active).await
    }

    /// Apply a suspension state to the executions, tasks and jobs of a process instance
    async fn change_suspension_state(&mut self, process_instance_id: &str, state: SuspensionState) -> EngineResult<()> {
        let process_instance = self.get_process_instance(process_instance_id).await?;
        if process_instance.suspension_state == state {
            return Err(EngineError::IllegalState(format!(
                "process instance '{}' is already {}",
                process_instance_id,
                state.as_str()
            )));
        }

        for mut execution in self.find_executions_by_process_instance(process_instance_id).await? {
            execution.suspension_state = state;
            self.ctx.session().update(&execution)?;
        }

        for mut task in self.ctx.tasks().find_tasks_by_process_instance_id(process_instance_id).await? {
            task.suspension_state = state;
            self.ctx.session().update(&task)?;
        }

        for mut job in self.ctx.jobs().find_jobs_by_process_instance_id(process_instance_id).await? {
            job.suspension_state = state;
            self.ctx.session().update(&job)?;
        }

        let event_type = match state {
            SuspensionState::Suspended => EngineEventType::EntitySuspended,
            SuspensionState::Active => EngineEventType::EntityActivated,
        };
        self.ctx.dispatch(self.event(event_type, &process_instance))?;
        tracing::info!("⏯️ Process instance {} is now {}", process_instance_id, state.as_str());
        Ok(())
    }

    // Deletion

    /// Cancel a process instance together with every sub process instance it called
    ///
    /// Sub process instances are removed deepest first; within one instance the
    /// execution tree is removed leaves first.
    pub async fn delete_process_instance(
        &mut self,
        process_instance_id: &str,
        delete_reason: Option<&str>,
        cascade_history: bool,
    ) -> EngineResult<()> {
        let root = self.get_process_instance(process_instance_id).await?;

        let mut hierarchy = vec![root];
        let mut cursor = 0;
        while cursor < hierarchy.len() {
            let instance_id = hierarchy[cursor].id.clone();
            for execution in self.find_executions_by_process_instance(&instance_id).await? {
                if let Some(sub) = self.find_sub_process_instance_by_super_execution(&execution.id).await? {
                    hierarchy.push(sub);
                }
            }
            cursor += 1;
        }

        for instance in hierarchy.iter().rev() {
            self.delete_instance_tree(&instance.id, delete_reason).await?;
            self.ctx
                .history()
                .record_process_instance_end(&instance.id, delete_reason, instance.activity_id.as_deref())
                .await?;
            self.ctx.dispatch(
                self.event(EngineEventType::ProcessCancelled, instance)
                    .with_payload(json!({ "delete_reason": delete_reason })),
            )?;
            if cascade_history {
                self.ctx.history().delete_historic_process_instance(&instance.id).await?;
            }
            tracing::info!("🛑 Deleted process instance {} ({})", instance.id, delete_reason.unwrap_or("no reason"));
        }
        Ok(())
    }

    async fn delete_instance_tree(&mut self, process_instance_id: &str, delete_reason: Option<&str>) -> EngineResult<()> {
        let tree = self.execution_tree(process_instance_id).await?;
        tracing::debug!("🌳 Deleting execution tree\n{}", tree);
        let executions: Vec<ExecutionEntity> = tree.leafs_first().into_iter().cloned().collect();
        for execution in &executions {
            self.delete_execution_and_related(execution, delete_reason).await?;
        }
        Ok(())
    }

    /// Delete one execution with the runtime data attached to it
    pub async fn delete_execution_and_related(
        &mut self,
        execution: &ExecutionEntity,
        delete_reason: Option<&str>,
    ) -> EngineResult<()> {
        self.ctx
            .tasks()
            .delete_tasks_by_execution(&execution.id, delete_reason, false)
            .await?;
        self.ctx.jobs().delete_jobs_by_execution(&execution.id).await?;
        self.ctx.event_subscriptions().delete_by_execution(&execution.id).await?;
        self.ctx.variables().delete_variables_by_execution(&execution.id).await?;
        if execution.is_process_instance {
            self.ctx.identity_links().delete_by_process_instance(&execution.id).await?;
        }
        self.ctx.history().record_activity_end(execution, delete_reason).await?;

        self.ctx.session().delete(execution)?;
        self.ctx.dispatch(self.event(EngineEventType::EntityDeleted, execution))
    }

    /// Complete a process instance that reached its end
    ///
    /// Returns the removed root so callers can resume a calling super execution.
    pub async fn end_process_instance(
        &mut self,
        process_instance_id: &str,
        end_activity_id: Option<&str>,
    ) -> EngineResult<ExecutionEntity> {
        let process_instance = self.get_process_instance(process_instance_id).await?;
        self.delete_instance_tree(process_instance_id, None).await?;
        self.ctx
            .history()
            .record_process_instance_end(process_instance_id, None, end_activity_id)
            .await?;
        self.ctx
            .dispatch(self.event(EngineEventType::ProcessCompleted, &process_instance))?;
        tracing::info!("🏁 Process instance {} completed", process_instance_id);
        Ok(process_instance)
    }
}

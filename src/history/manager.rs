use crate::definition::Activity;
use crate::entities::{
    ExecutionEntity, HistoricActivityInstanceEntity, HistoricDetailEntity, HistoricIdentityLinkEntity,
    HistoricProcessInstanceEntity, HistoricTaskInstanceEntity, HistoricVariableInstanceEntity,
    IdentityLinkEntity, TaskEntity, VariableInstanceEntity,
};
use crate::error::EngineResult;
use crate::history::HistoryLevel;
use crate::persistence::{new_id, EntityKind, Order, Predicate, Statement};
use crate::runtime::context::CommandContext;
use chrono::{DateTime, Utc};
use serde_json::Value;

const ACTIVITIES_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectHistoricActivityInstancesByProcessInstanceId",
    EntityKind::HistoricActivityInstance,
    &[Predicate::Eq("process_instance_id")],
)
.ordered("start_time", Order::Asc);

const OPEN_ACTIVITY_BY_EXECUTION: Statement = Statement::new(
    "selectOpenHistoricActivityInstanceByExecutionAndActivity",
    EntityKind::HistoricActivityInstance,
    &[Predicate::Eq("execution_id"), Predicate::Eq("activity_id"), Predicate::IsNull("end_time")],
)
.ordered("start_time", Order::Desc);

const TASKS_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectHistoricTaskInstancesByProcessInstanceId",
    EntityKind::HistoricTaskInstance,
    &[Predicate::Eq("process_instance_id")],
)
.ordered("start_time", Order::Asc);

const VARIABLES_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectHistoricVariableInstancesByProcessInstanceId",
    EntityKind::HistoricVariableInstance,
    &[Predicate::Eq("process_instance_id")],
)
.ordered("create_time", Order::Asc);

const IDENTITY_LINKS_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectHistoricIdentityLinksByProcessInstanceId",
    EntityKind::HistoricIdentityLink,
    &[Predicate::Eq("process_instance_id")],
);

const IDENTITY_LINKS_BY_TASK: Statement = Statement::new(
    "selectHistoricIdentityLinksByTaskId",
    EntityKind::HistoricIdentityLink,
    &[Predicate::Eq("task_id")],
);

const DETAILS_BY_PROCESS_INSTANCE: Statement = Statement::new(
    "selectHistoricDetailsByProcessInstanceId",
    EntityKind::HistoricDetail,
    &[Predicate::Eq("process_instance_id")],
)
.ordered("time", Order::Asc);

const DETAILS_BY_VARIABLE: Statement = Statement::new(
    "selectHistoricDetailsByVariableInstanceId",
    EntityKind::HistoricDetail,
    &[Predicate::Eq("variable_instance_id")],
)
.ordered("variable_revision", Order::Asc);

const PROCESS_INSTANCES_BY_DEFINITION: Statement = Statement::new(
    "selectHistoricProcessInstancesByDefinitionId",
    EntityKind::HistoricProcessInstance,
    &[Predicate::Eq("process_definition_id")],
)
.ordered("start_time", Order::Asc);

fn duration_millis(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds()
}

/// Records historic entities for the current command
pub struct HistoryManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> HistoryManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    pub fn level(&self) -> HistoryLevel {
        self.ctx.history_level()
    }

    pub fn is_enabled(&self, level: HistoryLevel) -> bool {
        self.ctx.history_level().is_at_least(level)
    }

    // Process instances

    pub fn record_process_instance_start(
        &mut self,
        process_instance: &ExecutionEntity,
        super_process_instance_id: Option<&str>,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let historic = HistoricProcessInstanceEntity {
            id: process_instance.id.clone(),
            revision: 1,
            process_definition_id: process_instance.process_definition_id.clone(),
            process_definition_key: process_instance.process_definition_key.clone(),
            business_key: process_instance.business_key.clone(),
            start_time: process_instance.start_time,
            end_time: None,
            duration_millis: None,
            start_user_id: process_instance.start_user_id.clone(),
            start_activity_id: process_instance.activity_id.clone(),
            end_activity_id: None,
            delete_reason: None,
            super_process_instance_id: super_process_instance_id.map(str::to_string),
            tenant_id: process_instance.tenant_id.clone(),
        };
        self.ctx.session().insert(&historic)
    }

    pub async fn record_process_instance_end(
        &mut self,
        process_instance_id: &str,
        delete_reason: Option<&str>,
        end_activity_id: Option<&str>,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let now = self.ctx.now();
        let Some(mut historic) = self
            .ctx
            .session()
            .select_by_id::<HistoricProcessInstanceEntity>(process_instance_id)
            .await?
        else {
            return Ok(());
        };
        historic.end_time = Some(now);
        historic.duration_millis = Some(duration_millis(historic.start_time, now));
        historic.delete_reason = delete_reason.map(str::to_string);
        historic.end_activity_id = end_activity_id.map(str::to_string);
        self.ctx.session().update(&historic)
    }

    pub async fn record_process_business_key_change(
        &mut self,
        process_instance_id: &str,
        business_key: Option<&str>,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        if let Some(mut historic) = self
            .ctx
            .session()
            .select_by_id::<HistoricProcessInstanceEntity>(process_instance_id)
            .await?
        {
            historic.business_key = business_key.map(str::to_string);
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    // Activity instances

    pub fn record_activity_start(&mut self, execution: &ExecutionEntity, activity: &Activity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let historic = HistoricActivityInstanceEntity {
            id: new_id(),
            revision: 1,
            activity_id: activity.id.clone(),
            activity_name: activity.name.clone(),
            activity_type: activity.activity_type.as_str().to_string(),
            execution_id: execution.id.clone(),
            process_instance_id: execution.process_instance_id.clone(),
            process_definition_id: execution.process_definition_id.clone(),
            task_id: None,
            called_process_instance_id: None,
            assignee: None,
            start_time: self.ctx.now(),
            end_time: None,
            duration_millis: None,
            delete_reason: None,
        };
        self.ctx.session().insert(&historic)
    }

    /// Close the open activity instance of the execution's current activity
    pub async fn record_activity_end(
        &mut self,
        execution: &ExecutionEntity,
        delete_reason: Option<&str>,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let now = self.ctx.now();
        if let Some(mut historic) = self.find_open_activity_instance(execution).await? {
            historic.end_time = Some(now);
            historic.duration_millis = Some(duration_millis(historic.start_time, now));
            historic.delete_reason = delete_reason.map(str::to_string);
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    /// Link a user task to the activity instance that created it
    pub async fn record_activity_task_id(&mut self, task: &TaskEntity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }
        let (Some(execution_id), Some(activity_id)) = (&task.execution_id, &task.task_definition_key) else {
            return Ok(());
        };

        let params = [Value::from(execution_id.as_str()), Value::from(activity_id.as_str())];
        let open = self
            .ctx
            .session()
            .select_one::<HistoricActivityInstanceEntity>(&OPEN_ACTIVITY_BY_EXECUTION, &params)
            .await?;
        if let Some(mut historic) = open {
            historic.task_id = Some(task.id.clone());
            historic.assignee = task.assignee.clone();
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    pub async fn record_activity_called_process_instance(
        &mut self,
        execution: &ExecutionEntity,
        called_process_instance_id: &str,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        if let Some(mut historic) = self.find_open_activity_instance(execution).await? {
            historic.called_process_instance_id = Some(called_process_instance_id.to_string());
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    async fn find_open_activity_instance(
        &mut self,
        execution: &ExecutionEntity,
    ) -> EngineResult<Option<HistoricActivityInstanceEntity>> {
        let Some(activity_id) = &execution.activity_id else {
            return Ok(None);
        };
        let params = [Value::from(execution.id.as_str()), Value::from(activity_id.as_str())];
        self.ctx.session().select_one(&OPEN_ACTIVITY_BY_EXECUTION, &params).await
    }

    // Task instances

    pub fn record_task_created(&mut self, task: &TaskEntity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Audit) {
            return Ok(());
        }

        let historic = HistoricTaskInstanceEntity {
            id: task.id.clone(),
            revision: 1,
            name: task.name.clone(),
            description: task.description.clone(),
            task_definition_key: task.task_definition_key.clone(),
            execution_id: task.execution_id.clone(),
            process_instance_id: task.process_instance_id.clone(),
            process_definition_id: task.process_definition_id.clone(),
            assignee: task.assignee.clone(),
            owner: task.owner.clone(),
            parent_task_id: task.parent_task_id.clone(),
            priority: task.priority,
            start_time: task.create_time,
            claim_time: None,
            end_time: None,
            duration_millis: None,
            due_date: task.due_date,
            delete_reason: None,
            tenant_id: task.tenant_id.clone(),
        };
        self.ctx.session().insert(&historic)
    }

    /// Copy the mutable task fields onto its history
    ///
    /// An assignee change is also visible on the activity instance at activity level.
    pub async fn record_task_info_change(&mut self, task: &TaskEntity) -> EngineResult<()> {
        if self.is_enabled(HistoryLevel::Activity) && task.execution_id.is_some() {
            self.record_activity_task_id(task).await?;
        }
        if !self.is_enabled(HistoryLevel::Audit) {
            return Ok(());
        }

        let now = self.ctx.now();
        let Some(mut historic) = self.ctx.session().select_by_id::<HistoricTaskInstanceEntity>(&task.id).await?
        else {
            return Ok(());
        };
        if task.assignee.is_some() && historic.assignee != task.assignee {
            historic.claim_time = Some(now);
        }
        historic.name = task.name.clone();
        historic.description = task.description.clone();
        historic.assignee = task.assignee.clone();
        historic.owner = task.owner.clone();
        historic.priority = task.priority;
        historic.due_date = task.due_date;
        historic.parent_task_id = task.parent_task_id.clone();
        self.ctx.session().update(&historic)
    }

    pub async fn record_task_end(&mut self, task_id: &str, delete_reason: Option<&str>) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Audit) {
            return Ok(());
        }

        let now = self.ctx.now();
        if let Some(mut historic) = self.ctx.session().select_by_id::<HistoricTaskInstanceEntity>(task_id).await? {
            historic.end_time = Some(now);
            historic.duration_millis = Some(duration_millis(historic.start_time, now));
            historic.delete_reason = delete_reason.map(str::to_string);
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    pub async fn delete_historic_task_instance(&mut self, task_id: &str) -> EngineResult<()> {
        if let Some(historic) = self.ctx.session().select_by_id::<HistoricTaskInstanceEntity>(task_id).await? {
            self.ctx.session().delete(&historic)?;
        }
        let links: Vec<HistoricIdentityLinkEntity> = self
            .ctx
            .session()
            .select_list(&IDENTITY_LINKS_BY_TASK, &[Value::from(task_id)])
            .await?;
        for link in &links {
            self.ctx.session().delete(link)?;
        }
        Ok(())
    }

    // Variable instances

    pub fn record_variable_create(&mut self, variable: &VariableInstanceEntity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let now = self.ctx.now();
        let historic = HistoricVariableInstanceEntity {
            id: variable.id.clone(),
            revision: 1,
            name: variable.name.clone(),
            value: variable.value.clone(),
            value_type: variable.value_type,
            process_instance_id: variable.process_instance_id.clone(),
            execution_id: variable.execution_id.clone(),
            task_id: variable.task_id.clone(),
            create_time: now,
            last_updated_time: now,
            removed: false,
        };
        self.ctx.session().insert(&historic)?;
        self.record_variable_detail(variable, 1)
    }

    pub async fn record_variable_update(
        &mut self,
        variable: &VariableInstanceEntity,
        variable_revision: i64,
    ) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let now = self.ctx.now();
        if let Some(mut historic) =
            self.ctx.session().select_by_id::<HistoricVariableInstanceEntity>(&variable.id).await?
        {
            historic.value = variable.value.clone();
            historic.value_type = variable.value_type;
            historic.last_updated_time = now;
            self.ctx.session().update(&historic)?;
        }
        self.record_variable_detail(variable, variable_revision)
    }

    pub async fn record_variable_removed(&mut self, variable: &VariableInstanceEntity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Activity) {
            return Ok(());
        }

        let now = self.ctx.now();
        if let Some(mut historic) =
            self.ctx.session().select_by_id::<HistoricVariableInstanceEntity>(&variable.id).await?
        {
            historic.removed = true;
            historic.last_updated_time = now;
            self.ctx.session().update(&historic)?;
        }
        Ok(())
    }

    fn record_variable_detail(&mut self, variable: &VariableInstanceEntity, variable_revision: i64) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Full) {
            return Ok(());
        }

        let detail = HistoricDetailEntity {
            id: new_id(),
            revision: 1,
            variable_instance_id: variable.id.clone(),
            name: variable.name.clone(),
            value: variable.value.clone(),
            value_type: variable.value_type,
            variable_revision,
            process_instance_id: variable.process_instance_id.clone(),
            execution_id: variable.execution_id.clone(),
            task_id: variable.task_id.clone(),
            time: self.ctx.now(),
        };
        self.ctx.session().insert(&detail)
    }

    // Identity links

    pub fn record_identity_link_created(&mut self, link: &IdentityLinkEntity) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Audit) {
            return Ok(());
        }
        if link.task_id.is_none() && link.process_instance_id.is_none() {
            return Ok(());
        }

        let historic = HistoricIdentityLinkEntity {
            id: link.id.clone(),
            revision: 1,
            link_type: link.link_type.clone(),
            user_id: link.user_id.clone(),
            group_id: link.group_id.clone(),
            task_id: link.task_id.clone(),
            process_instance_id: link.process_instance_id.clone(),
        };
        self.ctx.session().insert(&historic)
    }

    pub async fn record_identity_link_deleted(&mut self, link_id: &str) -> EngineResult<()> {
        if !self.is_enabled(HistoryLevel::Audit) {
            return Ok(());
        }

        if let Some(historic) = self.ctx.session().select_by_id::<HistoricIdentityLinkEntity>(link_id).await? {
            self.ctx.session().delete(&historic)?;
        }
        Ok(())
    }

    /// Delete a historic process instance with all its historic children
    ///
    /// Returns false when no history exists for the id.
    pub async fn delete_historic_process_instance(&mut self, process_instance_id: &str) -> EngineResult<bool> {
        let params = [Value::from(process_instance_id)];

        let details: Vec<HistoricDetailEntity> =
            self.ctx.session().select_list(&DETAILS_BY_PROCESS_INSTANCE, &params).await?;
        for detail in &details {
            self.ctx.session().delete(detail)?;
        }

        let variables: Vec<HistoricVariableInstanceEntity> =
            self.ctx.session().select_list(&VARIABLES_BY_PROCESS_INSTANCE, &params).await?;
        for variable in &variables {
            self.ctx.session().delete(variable)?;
        }

        let tasks: Vec<HistoricTaskInstanceEntity> =
            self.ctx.session().select_list(&TASKS_BY_PROCESS_INSTANCE, &params).await?;
        for task in &tasks {
            self.delete_historic_task_instance(&task.id).await?;
        }

        let links: Vec<HistoricIdentityLinkEntity> =
            self.ctx.session().select_list(&IDENTITY_LINKS_BY_PROCESS_INSTANCE, &params).await?;
        for link in &links {
            self.ctx.session().delete(link)?;
        }

        let activities: Vec<HistoricActivityInstanceEntity> =
            self.ctx.session().select_list(&ACTIVITIES_BY_PROCESS_INSTANCE, &params).await?;
        for activity in &activities {
            self.ctx.session().delete(activity)?;
        }

        let Some(historic) = self
            .ctx
            .session()
            .select_by_id::<HistoricProcessInstanceEntity>(process_instance_id)
            .await?
        else {
            return Ok(false);
        };
        self.ctx.session().delete(&historic)?;
        tracing::info!("🗑️ Deleted history of process instance {}", process_instance_id);
        Ok(true)
    }

    // Finders

    pub async fn find_historic_process_instance(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Option<HistoricProcessInstanceEntity>> {
        self.ctx.session().select_by_id(process_instance_id).await
    }

    pub async fn find_historic_process_instances_by_definition(
        &mut self,
        process_definition_id: &str,
    ) -> EngineResult<Vec<HistoricProcessInstanceEntity>> {
        self.ctx
            .session()
            .select_list(&PROCESS_INSTANCES_BY_DEFINITION, &[Value::from(process_definition_id)])
            .await
    }

    pub async fn find_historic_activity_instances(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<HistoricActivityInstanceEntity>> {
        self.ctx
            .session()
            .select_list(&ACTIVITIES_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_historic_task_instances(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<HistoricTaskInstanceEntity>> {
        self.ctx
            .session()
            .select_list(&TASKS_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_historic_variable_instances(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<HistoricVariableInstanceEntity>> {
        self.ctx
            .session()
            .select_list(&VARIABLES_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_historic_identity_links(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<HistoricIdentityLinkEntity>> {
        self.ctx
            .session()
            .select_list(&IDENTITY_LINKS_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_historic_identity_links_by_task(
        &mut self,
        task_id: &str,
    ) -> EngineResult<Vec<HistoricIdentityLinkEntity>> {
        self.ctx.session().select_list(&IDENTITY_LINKS_BY_TASK, &[Value::from(task_id)]).await
    }

    pub async fn find_historic_details(&mut self, process_instance_id: &str) -> EngineResult<Vec<HistoricDetailEntity>> {
        self.ctx
            .session()
            .select_list(&DETAILS_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_historic_details_by_variable(
        &mut self,
        variable_instance_id: &str,
    ) -> EngineResult<Vec<HistoricDetailEntity>> {
        self.ctx
            .session()
            .select_list(&DETAILS_BY_VARIABLE, &[Value::from(variable_instance_id)])
            .await
    }
}

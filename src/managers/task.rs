use crate::entities::{link_type, task::DEFAULT_PRIORITY, IdentityLinkEntity, SuspensionState, TaskEntity};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::persistence::{new_id, EntityKind, Order, Predicate, Statement};
use crate::runtime::context::CommandContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

const TASKS_BY_EXECUTION: Statement =
    Statement::new("selectTasksByExecutionId", EntityKind::Task, &[Predicate::Eq("execution_id")])
        .ordered("create_time", Order::Asc);

const TASKS_BY_PROCESS_INSTANCE: Statement =
    Statement::new("selectTasksByProcessInstanceId", EntityKind::Task, &[Predicate::Eq("process_instance_id")])
        .ordered("create_time", Order::Asc);

const TASKS_BY_ASSIGNEE: Statement =
    Statement::new("selectTasksByAssignee", EntityKind::Task, &[Predicate::Eq("assignee")])
        .ordered("create_time", Order::Asc);

const SUBTASKS: Statement =
    Statement::new("selectSubTasksByParentTaskId", EntityKind::Task, &[Predicate::Eq("parent_task_id")])
        .ordered("create_time", Order::Asc);

const ALL_TASKS: Statement = Statement::new("selectTasks", EntityKind::Task, &[]).ordered("create_time", Order::Asc);

/// Fields of a task about to be created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub name: Option<String>,
    pub description: Option<String>,
    pub task_definition_key: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub parent_task_id: Option<String>,
    pub priority: Option<i32>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub due_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub tenant_id: Option<String>,
}

pub struct TaskManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> TaskManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    fn event(event_type: EngineEventType, task: &TaskEntity) -> EngineEvent {
        EngineEvent::entity(event_type, task)
            .with_execution(task.execution_id.as_deref(), task.process_instance_id.as_deref())
            .with_definition(task.process_definition_id.as_deref())
    }

    pub async fn create_task(&mut self, new_task: NewTask) -> EngineResult<TaskEntity> {
        let task = TaskEntity {
            id: new_id(),
            revision: 1,
            name: new_task.name,
            description: new_task.description,
            task_definition_key: new_task.task_definition_key,
            execution_id: new_task.execution_id,
            process_instance_id: new_task.process_instance_id,
            process_definition_id: new_task.process_definition_id,
            assignee: None,
            owner: new_task.owner,
            parent_task_id: new_task.parent_task_id,
            priority: new_task.priority.unwrap_or(DEFAULT_PRIORITY),
            create_time: self.ctx.now(),
            due_date: new_task.due_date,
            category: new_task.category,
            suspension_state: SuspensionState::Active,
            tenant_id: new_task.tenant_id,
        };

        self.ctx.session().insert(&task)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityCreated, &task))?;
        self.ctx.history().record_task_created(&task)?;
        self.ctx.history().record_activity_task_id(&task).await?;

        let task = match new_task.assignee {
            Some(assignee) => self.change_assignee(&task.id, Some(&assignee)).await?,
            None => task,
        };

        self.ctx.dispatch(Self::event(EngineEventType::TaskCreated, &task))?;
        tracing::info!("📝 Created task {} ({})", task.id, task.name.as_deref().unwrap_or("unnamed"));
        Ok(task)
    }

    // Finders

    pub async fn find_by_id(&mut self, id: &str) -> EngineResult<Option<TaskEntity>> {
        self.ctx.session().select_by_id(id).await
    }

    pub async fn get(&mut self, id: &str) -> EngineResult<TaskEntity> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Task, id))
    }

    pub async fn find_tasks_by_execution_id(&mut self, execution_id: &str) -> EngineResult<Vec<TaskEntity>> {
        self.ctx
            .session()
            .select_list(&TASKS_BY_EXECUTION, &[Value::from(execution_id)])
            .await
    }

    pub async fn find_tasks_by_process_instance_id(&mut self, process_instance_id: &str) -> EngineResult<Vec<TaskEntity>> {
        self.ctx
            .session()
            .select_list(&TASKS_BY_PROCESS_INSTANCE, &[Value::from(process_instance_id)])
            .await
    }

    pub async fn find_tasks_by_assignee(&mut self, assignee: &str) -> EngineResult<Vec<TaskEntity>> {
        self.ctx
            .session()
            .select_list(&TASKS_BY_ASSIGNEE, &[Value::from(assignee)])
            .await
    }

    pub async fn find_subtasks(&mut self, parent_task_id: &str) -> EngineResult<Vec<TaskEntity>> {
        self.ctx
            .session()
            .select_list(&SUBTASKS, &[Value::from(parent_task_id)])
            .await
    }

    pub async fn find_all(&mut self) -> EngineResult<Vec<TaskEntity>> {
        self.ctx.session().select_list(&ALL_TASKS, &[]).await
    }

    /// Unassigned tasks the user may claim, directly or through one of the groups
    pub async fn find_tasks_by_candidate(&mut self, user_id: &str, groups: &[String]) -> EngineResult<Vec<TaskEntity>> {
        let mut links: Vec<IdentityLinkEntity> = self.ctx.identity_links().find_candidates_by_user(user_id).await?;
        for group in groups {
            links.extend(self.ctx.identity_links().find_candidates_by_group(group).await?);
        }

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for task_id in links.into_iter().filter_map(|link| link.task_id) {
            if !seen.insert(task_id.clone()) {
                continue;
            }
            if let Some(task) = self.find_by_id(&task_id).await? {
                if task.assignee.is_none() {
                    tasks.push(task);
                }
            }
        }
        tasks.sort_by_key(|task| task.create_time);
        Ok(tasks)
    }

    // Updates

    pub async fn update(&mut self, task: &TaskEntity) -> EngineResult<()> {
        self.ctx.session().update(task)?;
        self.ctx.dispatch(Self::event(EngineEventType::EntityUpdated, task))?;
        self.ctx.history().record_task_info_change(task).await
    }

    pub async fn change_assignee(&mut self, task_id: &str, assignee: Option<&str>) -> EngineResult<TaskEntity> {
        let mut task = self.get(task_id).await?;
        if task.assignee.as_deref() == assignee {
            return Ok(task);
        }

        task.assignee = assignee.map(str::to_string);
        self.ctx.session().update(&task)?;
        self.ctx.history().record_task_info_change(&task).await?;

        if let Some(user) = assignee {
            self.ctx.dispatch(Self::event(EngineEventType::TaskAssigned, &task))?;
            if let Some(process_instance_id) = &task.process_instance_id {
                self.ctx
                    .identity_links()
                    .involve_user(process_instance_id, user, link_type::PARTICIPANT)
                    .await?;
            }
        }
        tracing::debug!("👤 Task {} assignee is now {:?}", task.id, task.assignee);
        Ok(task)
    }

    pub async fn change_owner(&mut self, task_id: &str, owner: Option<&str>) -> EngineResult<TaskEntity> {
        let mut task = self.get(task_id).await?;
        if task.owner.as_deref() == owner {
            return Ok(task);
        }

        task.owner = owner.map(str::to_string);
        self.update(&task).await?;
        if let (Some(user), Some(process_instance_id)) = (owner, &task.process_instance_id) {
            self.ctx
                .identity_links()
                .involve_user(process_instance_id, user, link_type::PARTICIPANT)
                .await?;
        }
        Ok(task)
    }

    /// Assign an unclaimed task; claiming one's own task again is a no-op
    pub async fn claim(&mut self, task_id: &str, user_id: &str) -> EngineResult<TaskEntity> {
        let task = self.get(task_id).await?;
        if task.suspension_state == SuspensionState::Suspended {
            return Err(EngineError::IllegalState(format!("task '{task_id}' is suspended")));
        }
        match task.assignee.as_deref() {
            Some(current) if current != user_id => Err(EngineError::IllegalState(format!(
                "task '{task_id}' is already claimed by '{current}'"
            ))),
            Some(_) => Ok(task),
            None => self.change_assignee(task_id, Some(user_id)).await,
        }
    }

    /// Finish a task; the caller continues the waiting execution
    pub async fn complete(&mut self, task_id: &str) -> EngineResult<TaskEntity> {
        let task = self.get(task_id).await?;
        if task.suspension_state == SuspensionState::Suspended {
            return Err(EngineError::IllegalState(format!("task '{task_id}' is suspended")));
        }
        self.ctx.dispatch(Self::event(EngineEventType::TaskCompleted, &task))?;
        self.delete_task(&task, Some("completed"), false).await?;
        tracing::info!("✅ Completed task {}", task.id);
        Ok(task)
    }

    // Deletion

    /// Delete a task with its subtasks, identity links and variables
    ///
    /// Without `cascade_history` the historic task instance is ended with the reason;
    /// with it the history is removed as well.
    pub async fn delete_task(
        &mut self,
        task: &TaskEntity,
        delete_reason: Option<&str>,
        cascade_history: bool,
    ) -> EngineResult<()> {
        let mut pending = vec![task.clone()];
        let mut cursor = 0;
        while cursor < pending.len() {
            let subtasks = self.find_subtasks(&pending[cursor].id).await?;
            pending.extend(subtasks);
            cursor += 1;
        }

        for task in pending.iter().rev() {
            if self.ctx.session().is_deleted(EntityKind::Task, &task.id) {
                continue;
            }
            self.ctx.identity_links().delete_by_task(&task.id).await?;
            self.ctx.variables().delete_variables_by_task(&task.id).await?;
            if cascade_history {
                self.ctx.history().delete_historic_task_instance(&task.id).await?;
            } else {
                self.ctx.history().record_task_end(&task.id, delete_reason).await?;
            }

            self.ctx.session().delete(task)?;
            self.ctx.dispatch(
                Self::event(EngineEventType::EntityDeleted, task)
                    .with_payload(serde_json::json!({ "delete_reason": delete_reason })),
            )?;
        }
        Ok(())
    }

    pub async fn delete_tasks_by_execution(
        &mut self,
        execution_id: &str,
        delete_reason: Option<&str>,
        cascade_history: bool,
    ) -> EngineResult<()> {
        for task in self.find_tasks_by_execution_id(execution_id).await? {
            self.delete_task(&task, delete_reason, cascade_history).await?;
        }
        Ok(())
    }
}

use crate::entities::{ExecutionEntity, VariableInstanceEntity, VariableType};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::persistence::{new_id, EntityKind, Order, Predicate, Statement};
use crate::runtime::context::CommandContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const BY_EXECUTION: Statement = Statement::new(
    "selectVariablesByExecutionId",
    EntityKind::Variable,
    &[Predicate::Eq("execution_id"), Predicate::IsNull("task_id")],
)
.ordered("name", Order::Asc);

const BY_TASK: Statement =
    Statement::new("selectVariablesByTaskId", EntityKind::Variable, &[Predicate::Eq("task_id")])
        .ordered("name", Order::Asc);

const BY_EXECUTION_AND_NAME: Statement = Statement::new(
    "selectVariableByExecutionAndName",
    EntityKind::Variable,
    &[Predicate::Eq("execution_id"), Predicate::IsNull("task_id"), Predicate::Eq("name")],
);

const BY_TASK_AND_NAME: Statement = Statement::new(
    "selectVariableByTaskAndName",
    EntityKind::Variable,
    &[Predicate::Eq("task_id"), Predicate::Eq("name")],
);

/// Owner of a set of local variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum VariableScope {
    Execution(String),
    Task(String),
}

pub struct VariableManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> VariableManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    fn event(event_type: EngineEventType, variable: &VariableInstanceEntity) -> EngineEvent {
        EngineEvent::entity(event_type, variable)
            .with_execution(variable.execution_id.as_deref(), variable.process_instance_id.as_deref())
            .with_payload(json!({
                "name": variable.name,
                "value": variable.value,
                "task_id": variable.task_id,
            }))
    }

    async fn find_local(&mut self, scope: &VariableScope, name: &str) -> EngineResult<Option<VariableInstanceEntity>> {
        match scope {
            VariableScope::Execution(id) => {
                self.ctx
                    .session()
                    .select_one(&BY_EXECUTION_AND_NAME, &[Value::from(id.as_str()), Value::from(name)])
                    .await
            }
            VariableScope::Task(id) => {
                self.ctx
                    .session()
                    .select_one(&BY_TASK_AND_NAME, &[Value::from(id.as_str()), Value::from(name)])
                    .await
            }
        }
    }

    async fn load_execution(&mut self, execution_id: &str) -> EngineResult<ExecutionEntity> {
        self.ctx
            .session()
            .select_by_id::<ExecutionEntity>(execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Execution, execution_id))
    }

    async fn create(&mut self, scope: &VariableScope, name: &str, value: Value) -> EngineResult<VariableInstanceEntity> {
        let (execution_id, process_instance_id, task_id) = match scope {
            VariableScope::Execution(id) => {
                let execution = self.load_execution(id).await?;
                (Some(execution.id), Some(execution.process_instance_id), None)
            }
            VariableScope::Task(id) => {
                let task = self.ctx.tasks().get(id).await?;
                (task.execution_id, task.process_instance_id, Some(task.id))
            }
        };

        let variable = VariableInstanceEntity {
            id: new_id(),
            revision: 1,
            name: name.to_string(),
            value_type: VariableType::of(&value),
            value,
            execution_id,
            process_instance_id,
            task_id,
        };
        self.ctx.session().insert(&variable)?;
        self.ctx.history().record_variable_create(&variable)?;
        self.ctx.dispatch(Self::event(EngineEventType::VariableCreated, &variable))?;
        Ok(variable)
    }

    async fn update_value(&mut self, mut variable: VariableInstanceEntity, value: Value) -> EngineResult<VariableInstanceEntity> {
        if variable.value == value {
            return Ok(variable);
        }
        variable.set_value(value);
        self.ctx.session().update(&variable)?;
        self.ctx
            .history()
            .record_variable_update(&variable, variable.revision + 1)
            .await?;
        self.ctx.dispatch(Self::event(EngineEventType::VariableUpdated, &variable))?;
        Ok(variable)
    }

    async fn set_scoped(&mut self, scope: VariableScope, name: &str, value: Value) -> EngineResult<VariableInstanceEntity> {
        match self.find_local(&scope, name).await? {
            Some(existing) => self.update_value(existing, value).await,
            None => self.create(&scope, name, value).await,
        }
    }

    // Execution variables

    pub async fn set_variable_local(
        &mut self,
        execution_id: &str,
        name: &str,
        value: Value,
    ) -> EngineResult<VariableInstanceEntity> {
        self.set_scoped(VariableScope::Execution(execution_id.to_string()), name, value)
            .await
    }

    /// Update the variable on the nearest execution defining it, or create it on the
    /// process instance
    pub async fn set_variable(&mut self, execution_id: &str, name: &str, value: Value) -> EngineResult<VariableInstanceEntity> {
        let mut current = self.load_execution(execution_id).await?;
        loop {
            let scope = VariableScope::Execution(current.id.clone());
            if let Some(existing) = self.find_local(&scope, name).await? {
                return self.update_value(existing, value).await;
            }
            match current.parent_id.clone() {
                Some(parent_id) => current = self.load_execution(&parent_id).await?,
                None => return self.create(&scope, name, value).await,
            }
        }
    }

    pub async fn set_variables(&mut self, execution_id: &str, variables: &Map<String, Value>) -> EngineResult<()> {
        for (name, value) in variables {
            self.set_variable(execution_id, name, value.clone()).await?;
        }
        Ok(())
    }

    // Task variables

    pub async fn set_task_variable_local(
        &mut self,
        task_id: &str,
        name: &str,
        value: Value,
    ) -> EngineResult<VariableInstanceEntity> {
        self.set_scoped(VariableScope::Task(task_id.to_string()), name, value).await
    }

    // Reads

    /// Value visible from an execution, walking up to the process instance
    pub async fn get_variable(&mut self, execution_id: &str, name: &str) -> EngineResult<Option<Value>> {
        let mut current = Some(execution_id.to_string());
        while let Some(id) = current {
            if let Some(variable) = self.find_local(&VariableScope::Execution(id.clone()), name).await? {
                return Ok(Some(variable.value));
            }
            current = self.load_execution(&id).await?.parent_id;
        }
        Ok(None)
    }

    /// Every variable visible from an execution; values closer to it win
    pub async fn get_variables(&mut self, execution_id: &str) -> EngineResult<Map<String, Value>> {
        let mut chain = Vec::new();
        let mut current = Some(execution_id.to_string());
        while let Some(id) = current {
            current = self.load_execution(&id).await?.parent_id;
            chain.push(id);
        }

        let mut merged = Map::new();
        for id in chain.iter().rev() {
            for variable in self.find_variables_by_execution(id).await? {
                merged.insert(variable.name, variable.value);
            }
        }
        Ok(merged)
    }

    /// Execution variables of the task's execution overlaid with task-local ones
    pub async fn get_task_variables(&mut self, task_id: &str) -> EngineResult<Map<String, Value>> {
        let task = self.ctx.tasks().get(task_id).await?;
        let mut merged = match &task.execution_id {
            Some(execution_id) => self.get_variables(execution_id).await?,
            None => Map::new(),
        };
        for variable in self.find_variables_by_task(task_id).await? {
            merged.insert(variable.name, variable.value);
        }
        Ok(merged)
    }

    pub async fn find_variables_by_execution(&mut self, execution_id: &str) -> EngineResult<Vec<VariableInstanceEntity>> {
        self.ctx
            .session()
            .select_list(&BY_EXECUTION, &[Value::from(execution_id)])
            .await
    }

    pub async fn find_variables_by_task(&mut self, task_id: &str) -> EngineResult<Vec<VariableInstanceEntity>> {
        self.ctx.session().select_list(&BY_TASK, &[Value::from(task_id)]).await
    }

    // Deletion

    pub async fn delete_variable(&mut self, scope: &VariableScope, name: &str) -> EngineResult<bool> {
        match self.find_local(scope, name).await? {
            Some(variable) => {
                self.remove(&variable).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn delete_variables_by_execution(&mut self, execution_id: &str) -> EngineResult<()> {
        for variable in self.find_variables_by_execution(execution_id).await? {
            self.remove(&variable).await?;
        }
        Ok(())
    }

    pub async fn delete_variables_by_task(&mut self, task_id: &str) -> EngineResult<()> {
        for variable in self.find_variables_by_task(task_id).await? {
            self.remove(&variable).await?;
        }
        Ok(())
    }

    async fn remove(&mut self, variable: &VariableInstanceEntity) -> EngineResult<()> {
        self.ctx.session().delete(variable)?;
        self.ctx.history().record_variable_removed(variable).await?;
        self.ctx.dispatch(Self::event(EngineEventType::VariableDeleted, variable))
    }
}

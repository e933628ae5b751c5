/// Agenda of process navigation operations
///
/// Operations are planned by managers and behaviours and executed FIFO within the same
/// command, so continuing a process never recurses:
/// - `ContinueProcess`: enter the execution's current activity
/// - `TakeOutgoing`: leave the activity over its outgoing flows (forking on several)
/// - `EndExecution`: remove an execution and propagate the end upwards

use crate::definition::{Activity, ActivityType, CompiledDefinition};
use crate::entities::ExecutionEntity;
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::managers::NewTask;
use crate::runtime::calendar::TimerDeclaration;
use crate::runtime::context::CommandContext;
use crate::runtime::executor::{ASYNC_CONTINUATION, TRIGGER_TIMER};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgendaOperation {
    ContinueProcess { execution_id: String },
    TakeOutgoing { execution_id: String },
    EndExecution { execution_id: String },
}

#[derive(Debug, Default)]
pub struct Agenda {
    operations: VecDeque<AgendaOperation>,
}

impl Agenda {
    pub fn plan(&mut self, operation: AgendaOperation) {
        self.operations.push_back(operation);
    }

    pub fn next_operation(&mut self) -> Option<AgendaOperation> {
        self.operations.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Execute planned operations until the agenda is empty
pub async fn run(ctx: &mut CommandContext) -> EngineResult<()> {
    while let Some(operation) = ctx.agenda().next_operation() {
        tracing::debug!("▶️ {:?}", operation);
        match operation {
            AgendaOperation::ContinueProcess { execution_id } => continue_process(ctx, &execution_id).await?,
            AgendaOperation::TakeOutgoing { execution_id } => take_outgoing(ctx, &execution_id).await?,
            AgendaOperation::EndExecution { execution_id } => end_execution(ctx, &execution_id).await?,
        }
    }
    Ok(())
}

async fn load(ctx: &mut CommandContext, execution_id: &str) -> EngineResult<(ExecutionEntity, Arc<CompiledDefinition>)> {
    let execution = ctx.executions().get(execution_id).await?;
    let definition = ctx.definitions().get_required(&execution.process_definition_id)?;
    Ok((execution, definition))
}

fn current_activity<'d>(definition: &'d CompiledDefinition, execution: &ExecutionEntity) -> EngineResult<&'d Activity> {
    let activity_id = execution.activity_id.as_deref().ok_or_else(|| {
        EngineError::IllegalState(format!("execution '{}' is not positioned in an activity", execution.id))
    })?;
    definition.activity(activity_id).ok_or_else(|| {
        EngineError::IllegalState(format!(
            "activity '{}' not found in definition '{}'",
            activity_id,
            definition.id()
        ))
    })
}

fn activity_event(event_type: EngineEventType, execution: &ExecutionEntity, activity: &Activity) -> EngineEvent {
    EngineEvent::entity(event_type, execution)
        .with_execution(Some(&execution.id), Some(&execution.process_instance_id))
        .with_definition(Some(&execution.process_definition_id))
        .with_payload(json!({
            "activity_id": activity.id,
            "activity_name": activity.name,
            "activity_type": activity.activity_type.as_str(),
        }))
}

async fn continue_process(ctx: &mut CommandContext, execution_id: &str) -> EngineResult<()> {
    let (execution, definition) = load(ctx, execution_id).await?;
    let activity = current_activity(&definition, &execution)?;

    ctx.history().record_activity_start(&execution, activity)?;
    ctx.dispatch(activity_event(EngineEventType::ActivityStarted, &execution, activity))?;

    match activity.activity_type {
        ActivityType::StartEvent => leave(ctx, &execution),
        ActivityType::EndEvent => ctx.agenda().plan(AgendaOperation::EndExecution {
            execution_id: execution.id.clone(),
        }),
        ActivityType::ServiceTask => {
            if activity.param_bool("async") {
                let exclusive = activity.params.get("exclusive").and_then(|v| v.as_bool()).unwrap_or(true);
                ctx.jobs().create_async_job(&execution, ASYNC_CONTINUATION, None, exclusive)?;
            } else {
                execute_service_task(ctx, &execution, activity).await?;
                leave(ctx, &execution);
            }
        }
        ActivityType::UserTask => {
            let task = ctx
                .tasks()
                .create_task(NewTask {
                    name: activity.param_str("name").map(str::to_string).or_else(|| activity.name.clone()),
                    description: activity.param_str("description").map(str::to_string),
                    task_definition_key: Some(activity.id.clone()),
                    execution_id: Some(execution.id.clone()),
                    process_instance_id: Some(execution.process_instance_id.clone()),
                    process_definition_id: Some(execution.process_definition_id.clone()),
                    assignee: activity.param_str("assignee").map(str::to_string),
                    priority: activity.param_i64("priority").map(|p| p as i32),
                    tenant_id: execution.tenant_id.clone(),
                    ..Default::default()
                })
                .await?;
            for user in activity.param_strings("candidate_users") {
                ctx.identity_links().add_candidate_user(&task, &user).await?;
            }
            for group in activity.param_strings("candidate_groups") {
                ctx.identity_links().add_candidate_group(&task, &group)?;
            }
        }
        ActivityType::TimerCatch => {
            let declaration = TimerDeclaration::from_activity(activity)?;
            ctx.jobs().schedule_timer(&execution, &declaration, TRIGGER_TIMER, Some(activity.id.clone()))?;
        }
        ActivityType::MessageCatch => {
            let message = activity
                .param_str("message")
                .ok_or_else(|| EngineError::IllegalState(format!("message catch '{}' has no message", activity.id)))?;
            ctx.event_subscriptions()
                .create_message_subscription(&execution, &activity.id, message)?;
        }
        ActivityType::SignalCatch => {
            let signal = activity
                .param_str("signal")
                .ok_or_else(|| EngineError::IllegalState(format!("signal catch '{}' has no signal", activity.id)))?;
            ctx.event_subscriptions()
                .create_signal_subscription(&execution, &activity.id, signal)?;
        }
        ActivityType::CallActivity => {
            let called_key = activity.param_str("called_element").ok_or_else(|| {
                EngineError::IllegalState(format!("call activity '{}' has no called element", activity.id))
            })?;
            let called = ctx
                .definitions()
                .latest(called_key)
                .ok_or_else(|| EngineError::DefinitionNotFound(called_key.to_string()))?;
            let sub_instance = ctx
                .executions()
                .create_subprocess_instance(&execution, &called, execution.business_key.clone())
                .await?;
            ctx.history()
                .record_activity_called_process_instance(&execution, &sub_instance.id)
                .await?;
            ctx.agenda().plan(AgendaOperation::ContinueProcess {
                execution_id: sub_instance.id,
            });
        }
    }
    Ok(())
}

fn leave(ctx: &mut CommandContext, execution: &ExecutionEntity) {
    ctx.agenda().plan(AgendaOperation::TakeOutgoing {
        execution_id: execution.id.clone(),
    });
}

/// Resume a service task whose execution was handed to an async job
pub(crate) async fn continue_async(ctx: &mut CommandContext, execution_id: &str) -> EngineResult<()> {
    let (execution, definition) = load(ctx, execution_id).await?;
    let activity = current_activity(&definition, &execution)?;
    execute_service_task(ctx, &execution, activity).await?;
    leave(ctx, &execution);
    Ok(())
}

/// Run the synchronous part of a service task
///
/// Params: `variables` are written to the execution; `fail` raises an error carrying
/// the given message.
async fn execute_service_task(
    ctx: &mut CommandContext,
    execution: &ExecutionEntity,
    activity: &Activity,
) -> EngineResult<()> {
    if let Some(message) = activity.param_str("fail") {
        return Err(EngineError::Other(anyhow::anyhow!(
            "service task '{}' failed: {}",
            activity.id,
            message
        )));
    }
    if let Some(variables) = activity.params.get("variables").and_then(|v| v.as_object()) {
        ctx.variables().set_variables(&execution.id, variables).await?;
    }
    tracing::debug!("⚙️ Executed service task {} on {}", activity.id, execution.id);
    Ok(())
}

async fn take_outgoing(ctx: &mut CommandContext, execution_id: &str) -> EngineResult<()> {
    let (mut execution, definition) = load(ctx, execution_id).await?;
    let activity = current_activity(&definition, &execution)?;

    ctx.history().record_activity_end(&execution, None).await?;
    ctx.dispatch(activity_event(EngineEventType::ActivityCompleted, &execution, activity))?;

    let targets = definition.outgoing(&activity.id);
    match targets.as_slice() {
        [] => ctx.agenda().plan(AgendaOperation::EndExecution {
            execution_id: execution.id.clone(),
        }),
        [target] => {
            execution.activity_id = Some(target.id.clone());
            execution.is_active = true;
            ctx.executions().update(&execution)?;
            ctx.agenda().plan(AgendaOperation::ContinueProcess {
                execution_id: execution.id.clone(),
            });
        }
        targets => {
            execution.is_active = false;
            ctx.executions().update(&execution)?;
            for target in targets {
                let child = ctx
                    .executions()
                    .create_child_execution(&execution, Some(&target.id), true)?;
                ctx.agenda().plan(AgendaOperation::ContinueProcess { execution_id: child.id });
            }
            tracing::debug!("🍴 Forked execution {} into {} paths", execution.id, targets.len());
        }
    }
    Ok(())
}

async fn end_execution(ctx: &mut CommandContext, execution_id: &str) -> EngineResult<()> {
    // Already removed together with its process instance
    let Some(execution) = ctx.executions().find_by_id(execution_id).await? else {
        return Ok(());
    };

    match &execution.parent_id {
        Some(parent_id) => {
            // Ending a child always writes the parent; siblings ending in parallel
            // commands conflict on its revision
            let mut parent = ctx.executions().get(parent_id).await?;
            parent.ended_children = parent.ended_children.saturating_add(1);
            ctx.executions().update(&parent)?;

            ctx.executions().delete_execution_and_related(&execution, None).await?;
            let remaining = ctx.executions().find_child_executions_by_parent(parent_id).await?;
            if remaining.is_empty() {
                ctx.agenda().plan(AgendaOperation::EndExecution {
                    execution_id: parent_id.clone(),
                });
            }
        }
        None => {
            let ended = ctx
                .executions()
                .end_process_instance(&execution.id, execution.activity_id.as_deref())
                .await?;
            if let Some(super_execution_id) = ended.super_execution_id {
                ctx.agenda().plan(AgendaOperation::TakeOutgoing {
                    execution_id: super_execution_id,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_run_in_planning_order() {
        let mut agenda = Agenda::default();
        agenda.plan(AgendaOperation::ContinueProcess { execution_id: "a".into() });
        agenda.plan(AgendaOperation::TakeOutgoing { execution_id: "a".into() });
        agenda.plan(AgendaOperation::EndExecution { execution_id: "b".into() });
        assert_eq!(agenda.len(), 3);

        assert_eq!(
            agenda.next_operation(),
            Some(AgendaOperation::ContinueProcess { execution_id: "a".into() })
        );
        assert_eq!(
            agenda.next_operation(),
            Some(AgendaOperation::TakeOutgoing { execution_id: "a".into() })
        );
        assert_eq!(
            agenda.next_operation(),
            Some(AgendaOperation::EndExecution { execution_id: "b".into() })
        );
        assert!(agenda.is_empty());
        assert_eq!(agenda.next_operation(), None);
    }
}

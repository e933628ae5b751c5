use crate::entities::{EventSubscriptionEntity, EventType, ExecutionEntity};
use crate::error::{EngineError, EngineResult};
use crate::event::{EngineEvent, EngineEventType};
use crate::persistence::{new_id, EntityKind, Order, Predicate, Statement};
use crate::runtime::agenda::AgendaOperation;
use crate::runtime::context::CommandContext;
use serde_json::{json, Map, Value};

const BY_EXECUTION: Statement = Statement::new(
    "selectEventSubscriptionsByExecution",
    EntityKind::EventSubscription,
    &[Predicate::Eq("execution_id")],
)
.ordered("created", Order::Asc);

const BY_EXECUTION_AND_TYPE: Statement = Statement::new(
    "selectEventSubscriptionsByExecutionAndType",
    EntityKind::EventSubscription,
    &[Predicate::Eq("execution_id"), Predicate::Eq("event_type")],
)
.ordered("created", Order::Asc);

const MESSAGE_BY_EXECUTION_AND_NAME: Statement = Statement::new(
    "selectMessageEventSubscriptionByExecutionAndName",
    EntityKind::EventSubscription,
    &[Predicate::Eq("event_type"), Predicate::Eq("execution_id"), Predicate::Eq("event_name")],
);

const BY_TYPE_AND_NAME: Statement = Statement::new(
    "selectEventSubscriptionsByTypeAndName",
    EntityKind::EventSubscription,
    &[Predicate::Eq("event_type"), Predicate::Eq("event_name")],
)
.ordered("created", Order::Asc);

const BY_TYPE_AND_PROCESS_INSTANCE: Statement = Statement::new(
    "selectEventSubscriptionsByTypeAndProcessInstance",
    EntityKind::EventSubscription,
    &[Predicate::Eq("event_type"), Predicate::Eq("process_instance_id")],
)
.ordered("created", Order::Asc);

pub struct EventSubscriptionManager<'a> {
    ctx: &'a mut CommandContext,
}

impl<'a> EventSubscriptionManager<'a> {
    pub(crate) fn new(ctx: &'a mut CommandContext) -> Self {
        Self { ctx }
    }

    fn event(event_type: EngineEventType, subscription: &EventSubscriptionEntity) -> EngineEvent {
        EngineEvent::entity(event_type, subscription)
            .with_execution(subscription.execution_id.as_deref(), subscription.process_instance_id.as_deref())
            .with_definition(subscription.process_definition_id.as_deref())
    }

    fn new_subscription(
        &self,
        event_type: EventType,
        execution: &ExecutionEntity,
        activity_id: &str,
        event_name: Option<&str>,
    ) -> EventSubscriptionEntity {
        EventSubscriptionEntity {
            id: new_id(),
            revision: 1,
            event_type,
            event_name: event_name.map(str::to_string),
            execution_id: Some(execution.id.clone()),
            process_instance_id: Some(execution.process_instance_id.clone()),
            activity_id: Some(activity_id.to_string()),
            configuration: None,
            created: self.ctx.now(),
            process_definition_id: Some(execution.process_definition_id.clone()),
            tenant_id: execution.tenant_id.clone(),
        }
    }

    pub fn create_message_subscription(
        &mut self,
        execution: &ExecutionEntity,
        activity_id: &str,
        message_name: &str,
    ) -> EngineResult<EventSubscriptionEntity> {
        let subscription = self.new_subscription(EventType::Message, execution, activity_id, Some(message_name));
        self.insert(&subscription)?;
        Ok(subscription)
    }

    pub fn create_signal_subscription(
        &mut self,
        execution: &ExecutionEntity,
        activity_id: &str,
        signal_name: &str,
    ) -> EngineResult<EventSubscriptionEntity> {
        let subscription = self.new_subscription(EventType::Signal, execution, activity_id, Some(signal_name));
        self.insert(&subscription)?;
        Ok(subscription)
    }

    /// Bookkeeping only: compensation handlers are never invoked
    pub fn create_compensate_subscription(
        &mut self,
        execution: &ExecutionEntity,
        activity_id: &str,
        configuration: Option<String>,
    ) -> EngineResult<EventSubscriptionEntity> {
        let mut subscription = self.new_subscription(EventType::Compensate, execution, activity_id, None);
        subscription.configuration = configuration;
        self.insert(&subscription)?;
        Ok(subscription)
    }

    pub fn insert(&mut self, subscription: &EventSubscriptionEntity) -> EngineResult<()> {
        self.ctx.session().insert(subscription)?;
        self.ctx
            .dispatch(Self::event(EngineEventType::EntityCreated, subscription))?;
        tracing::debug!(
            "📮 Subscribed execution {:?} to {} '{}'",
            subscription.execution_id,
            subscription.event_type.as_str(),
            subscription.event_name.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    // Finders

    pub async fn find_by_id(&mut self, id: &str) -> EngineResult<Option<EventSubscriptionEntity>> {
        self.ctx.session().select_by_id(id).await
    }

    pub async fn find_event_subscriptions_by_execution(
        &mut self,
        execution_id: &str,
    ) -> EngineResult<Vec<EventSubscriptionEntity>> {
        self.ctx
            .session()
            .select_list(&BY_EXECUTION, &[Value::from(execution_id)])
            .await
    }

    pub async fn find_by_execution_and_type(
        &mut self,
        execution_id: &str,
        event_type: EventType,
    ) -> EngineResult<Vec<EventSubscriptionEntity>> {
        self.ctx
            .session()
            .select_list(
                &BY_EXECUTION_AND_TYPE,
                &[Value::from(execution_id), Value::from(event_type.as_str())],
            )
            .await
    }

    pub async fn find_message_subscription(
        &mut self,
        execution_id: &str,
        message_name: &str,
    ) -> EngineResult<Option<EventSubscriptionEntity>> {
        self.ctx
            .session()
            .select_one(
                &MESSAGE_BY_EXECUTION_AND_NAME,
                &[
                    Value::from(EventType::Message.as_str()),
                    Value::from(execution_id),
                    Value::from(message_name),
                ],
            )
            .await
    }

    pub async fn find_message_subscriptions_by_name(
        &mut self,
        message_name: &str,
    ) -> EngineResult<Vec<EventSubscriptionEntity>> {
        self.ctx
            .session()
            .select_list(
                &BY_TYPE_AND_NAME,
                &[Value::from(EventType::Message.as_str()), Value::from(message_name)],
            )
            .await
    }

    /// Signal subscriptions of one tenant (`None` selects subscriptions without tenant)
    pub async fn find_signal_subscriptions_by_event_name(
        &mut self,
        signal_name: &str,
        tenant_id: Option<&str>,
    ) -> EngineResult<Vec<EventSubscriptionEntity>> {
        let subscriptions: Vec<EventSubscriptionEntity> = self
            .ctx
            .session()
            .select_list(
                &BY_TYPE_AND_NAME,
                &[Value::from(EventType::Signal.as_str()), Value::from(signal_name)],
            )
            .await?;
        Ok(subscriptions
            .into_iter()
            .filter(|subscription| subscription.tenant_id.as_deref() == tenant_id)
            .collect())
    }

    pub async fn find_compensate_subscriptions_by_process_instance(
        &mut self,
        process_instance_id: &str,
    ) -> EngineResult<Vec<EventSubscriptionEntity>> {
        self.ctx
            .session()
            .select_list(
                &BY_TYPE_AND_PROCESS_INSTANCE,
                &[Value::from(EventType::Compensate.as_str()), Value::from(process_instance_id)],
            )
            .await
    }

    // Correlation

    /// Deliver an event to the waiting execution
    ///
    /// Consumes the subscription, stores the payload as process variables and plans
    /// leaving the catching activity.
    pub async fn event_received(
        &mut self,
        subscription: &EventSubscriptionEntity,
        payload: Option<&Map<String, Value>>,
    ) -> EngineResult<()> {
        let execution_id = subscription.execution_id.as_deref().ok_or_else(|| {
            EngineError::IllegalState(format!("event subscription '{}' has no execution", subscription.id))
        })?;
        let execution: ExecutionEntity = self
            .ctx
            .session()
            .select_by_id(execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Execution, execution_id))?;
        if execution.is_suspended() {
            return Err(EngineError::IllegalState(format!(
                "execution '{}' is suspended and cannot receive events",
                execution.id
            )));
        }

        let event_type = match subscription.event_type {
            EventType::Message => EngineEventType::ActivityMessageReceived,
            EventType::Signal => EngineEventType::ActivitySignaled,
            EventType::Compensate => {
                return Err(EngineError::IllegalArgument(
                    "compensate subscriptions cannot receive events".to_string(),
                ))
            }
        };

        self.delete(subscription)?;
        self.ctx.dispatch(Self::event(event_type, subscription).with_payload(json!({
            "activity_id": subscription.activity_id,
            "event_name": subscription.event_name,
            "payload": payload,
        })))?;

        if let Some(variables) = payload {
            self.ctx.variables().set_variables(&execution.id, variables).await?;
        }
        self.ctx.agenda().plan(AgendaOperation::TakeOutgoing {
            execution_id: execution.id.clone(),
        });
        tracing::info!(
            "📨 Execution {} received {} '{}'",
            execution.id,
            subscription.event_type.as_str(),
            subscription.event_name.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    // Deletion

    pub fn delete(&mut self, subscription: &EventSubscriptionEntity) -> EngineResult<()> {
        self.ctx.session().delete(subscription)?;
        self.ctx
            .dispatch(Self::event(EngineEventType::EntityDeleted, subscription))
    }

    pub async fn delete_by_execution(&mut self, execution_id: &str) -> EngineResult<()> {
        for subscription in self.find_event_subscriptions_by_execution(execution_id).await? {
            self.delete(&subscription)?;
        }
        Ok(())
    }
}

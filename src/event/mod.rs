/// Engine lifecycle events
///
/// Managers describe what happened to an entity as an `EngineEvent` and hand it to the
/// `EventDispatcher`, which forwards it to registered listeners when enabled.

pub mod dispatcher;

pub use dispatcher::{EngineEventListener, EventDispatcher};

use crate::persistence::{Entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEventType {
    EntityCreated,
    EntityInitialized,
    EntityUpdated,
    EntityDeleted,
    EntitySuspended,
    EntityActivated,
    ProcessStarted,
    ProcessCompleted,
    ProcessCancelled,
    ActivityStarted,
    ActivityCompleted,
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    JobExecutionSuccess,
    JobExecutionFailure,
    JobRetriesDecremented,
    JobCanceled,
    TimerScheduled,
    TimerFired,
    ActivityMessageReceived,
    ActivitySignaled,
    VariableCreated,
    VariableUpdated,
    VariableDeleted,
}

/// A typed lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_type: EngineEventType,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: EngineEventType) -> Self {
        Self {
            event_type,
            entity_kind: None,
            entity_id: None,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            payload: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Event about a specific entity
    pub fn entity<T: Entity>(event_type: EngineEventType, entity: &T) -> Self {
        let mut event = Self::new(event_type);
        event.entity_kind = Some(T::KIND);
        event.entity_id = Some(entity.id().to_string());
        event
    }

    pub fn with_execution(mut self, execution_id: Option<&str>, process_instance_id: Option<&str>) -> Self {
        self.execution_id = execution_id.map(str::to_string);
        self.process_instance_id = process_instance_id.map(str::to_string);
        self
    }

    pub fn with_definition(mut self, process_definition_id: Option<&str>) -> Self {
        self.process_definition_id = process_definition_id.map(str::to_string);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

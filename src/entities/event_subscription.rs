use crate::persistence::{impl_entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Signal,
    Compensate,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Signal => "signal",
            EventType::Compensate => "compensate",
        }
    }
}

/// A waiting execution's interest in a named message or signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscriptionEntity {
    pub id: String,
    pub revision: i64,
    pub event_type: EventType,
    pub event_name: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub activity_id: Option<String>,
    pub configuration: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    pub process_definition_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl_entity!(EventSubscriptionEntity, EntityKind::EventSubscription);

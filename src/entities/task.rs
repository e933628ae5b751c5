use crate::entities::SuspensionState;
use crate::persistence::{impl_entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A human task, either attached to an execution or standalone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: String,
    pub revision: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Activity id of the user task in the process definition
    pub task_definition_key: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub parent_task_id: Option<String>,
    pub priority: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub due_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub suspension_state: SuspensionState,
    pub tenant_id: Option<String>,
}

impl_entity!(TaskEntity, EntityKind::Task);

pub const DEFAULT_PRIORITY: i32 = 50;

/// History (audit) records
///
/// Written by the history manager according to the configured history level. Historic
/// rows outlive the runtime entities they describe.

use crate::entities::VariableType;
use crate::persistence::{impl_entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricProcessInstanceEntity {
    /// Same id as the runtime process instance
    pub id: String,
    pub revision: i64,
    pub process_definition_id: String,
    pub process_definition_key: String,
    pub business_key: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_millis: Option<i64>,
    pub start_user_id: Option<String>,
    pub start_activity_id: Option<String>,
    pub end_activity_id: Option<String>,
    pub delete_reason: Option<String>,
    pub super_process_instance_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl_entity!(HistoricProcessInstanceEntity, EntityKind::HistoricProcessInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricActivityInstanceEntity {
    pub id: String,
    pub revision: i64,
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub activity_type: String,
    pub execution_id: String,
    pub process_instance_id: String,
    pub process_definition_id: String,
    pub task_id: Option<String>,
    pub called_process_instance_id: Option<String>,
    pub assignee: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_millis: Option<i64>,
    pub delete_reason: Option<String>,
}

impl_entity!(HistoricActivityInstanceEntity, EntityKind::HistoricActivityInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricTaskInstanceEntity {
    /// Same id as the runtime task
    pub id: String,
    pub revision: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub task_definition_key: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub parent_task_id: Option<String>,
    pub priority: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub claim_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub duration_millis: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub due_date: Option<DateTime<Utc>>,
    pub delete_reason: Option<String>,
    pub tenant_id: Option<String>,
}

impl_entity!(HistoricTaskInstanceEntity, EntityKind::HistoricTaskInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricVariableInstanceEntity {
    /// Same id as the runtime variable
    pub id: String,
    pub revision: i64,
    pub name: String,
    pub value: Value,
    pub value_type: VariableType,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub task_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated_time: DateTime<Utc>,
    /// Set once the runtime variable is removed
    pub removed: bool,
}

impl_entity!(HistoricVariableInstanceEntity, EntityKind::HistoricVariableInstance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricIdentityLinkEntity {
    /// Same id as the runtime identity link
    pub id: String,
    pub revision: i64,
    pub link_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub task_id: Option<String>,
    pub process_instance_id: Option<String>,
}

impl_entity!(HistoricIdentityLinkEntity, EntityKind::HistoricIdentityLink);

/// One recorded variable value change (full history only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricDetailEntity {
    pub id: String,
    pub revision: i64,
    pub variable_instance_id: String,
    pub name: String,
    pub value: Value,
    pub value_type: VariableType,
    /// Revision of the runtime variable this detail captures
    pub variable_revision: i64,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub task_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

impl_entity!(HistoricDetailEntity, EntityKind::HistoricDetail);

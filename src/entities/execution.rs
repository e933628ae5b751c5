use crate::persistence::{impl_entity, new_id, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a process instance (and everything hanging off it) may make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionState {
    #[default]
    Active,
    Suspended,
}

impl SuspensionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SuspensionState::Active => "active",
            SuspensionState::Suspended => "suspended",
        }
    }
}

/// A path of control inside a process instance
///
/// The process instance itself is the root execution (`id == process_instance_id`).
/// Forks create concurrent children below a scope execution; call activities start a
/// new process instance whose root points back through `super_execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEntity {
    pub id: String,
    pub revision: i64,
    pub process_instance_id: String,
    pub parent_id: Option<String>,
    pub super_execution_id: Option<String>,
    pub root_process_instance_id: String,
    pub process_definition_id: String,
    pub process_definition_key: String,
    pub business_key: Option<String>,
    pub activity_id: Option<String>,
    pub is_active: bool,
    pub is_scope: bool,
    pub is_concurrent: bool,
    pub is_process_instance: bool,
    pub suspension_state: SuspensionState,
    pub tenant_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub start_user_id: Option<String>,
    pub name: Option<String>,
    /// Concurrent children that have ended; bumps the parent's revision on every join step
    #[serde(default)]
    pub ended_children: u32,
}

impl_entity!(ExecutionEntity, EntityKind::Execution);

impl ExecutionEntity {
    /// New root execution representing a process instance
    pub fn new_process_instance(
        process_definition_id: &str,
        process_definition_key: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let id = new_id();
        Self {
            process_instance_id: id.clone(),
            root_process_instance_id: id.clone(),
            id,
            revision: 1,
            parent_id: None,
            super_execution_id: None,
            process_definition_id: process_definition_id.to_string(),
            process_definition_key: process_definition_key.to_string(),
            business_key: None,
            activity_id: None,
            is_active: true,
            is_scope: true,
            is_concurrent: false,
            is_process_instance: true,
            suspension_state: SuspensionState::Active,
            tenant_id: None,
            start_time: now,
            start_user_id: None,
            ended_children: 0,
            name: None,
        }
    }

    /// New child execution below `parent`, inheriting its process context
    pub fn new_child(parent: &ExecutionEntity, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            revision: 1,
            process_instance_id: parent.process_instance_id.clone(),
            parent_id: Some(parent.id.clone()),
            super_execution_id: None,
            root_process_instance_id: parent.root_process_instance_id.clone(),
            process_definition_id: parent.process_definition_id.clone(),
            process_definition_key: parent.process_definition_key.clone(),
            business_key: None,
            activity_id: parent.activity_id.clone(),
            is_active: true,
            is_scope: false,
            is_concurrent: false,
            is_process_instance: false,
            suspension_state: parent.suspension_state,
            tenant_id: parent.tenant_id.clone(),
            start_time: now,
            start_user_id: None,
            ended_children: 0,
            name: None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension_state == SuspensionState::Suspended
    }
}

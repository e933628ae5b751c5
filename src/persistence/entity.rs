/// Entity kinds and the `Entity` trait
///
/// Every persisted record is a serde struct stored as a JSON document keyed by id,
/// next to a `rev` column used for optimistic locking.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// All persisted entity kinds
///
/// Declaration order is the flush order for inserts and updates; deletes flush in
/// reverse order so dependents go before the records they point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Execution,
    Task,
    Job,
    EventSubscription,
    IdentityLink,
    Variable,
    HistoricProcessInstance,
    HistoricActivityInstance,
    HistoricTaskInstance,
    HistoricVariableInstance,
    HistoricIdentityLink,
    HistoricDetail,
}

impl EntityKind {
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Execution,
        EntityKind::Task,
        EntityKind::Job,
        EntityKind::EventSubscription,
        EntityKind::IdentityLink,
        EntityKind::Variable,
        EntityKind::HistoricProcessInstance,
        EntityKind::HistoricActivityInstance,
        EntityKind::HistoricTaskInstance,
        EntityKind::HistoricVariableInstance,
        EntityKind::HistoricIdentityLink,
        EntityKind::HistoricDetail,
    ];

    /// Backing table name
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Execution => "ru_execution",
            EntityKind::Task => "ru_task",
            EntityKind::Job => "ru_job",
            EntityKind::EventSubscription => "ru_event_subscr",
            EntityKind::IdentityLink => "ru_identitylink",
            EntityKind::Variable => "ru_variable",
            EntityKind::HistoricProcessInstance => "hi_procinst",
            EntityKind::HistoricActivityInstance => "hi_actinst",
            EntityKind::HistoricTaskInstance => "hi_taskinst",
            EntityKind::HistoricVariableInstance => "hi_varinst",
            EntityKind::HistoricIdentityLink => "hi_identitylink",
            EntityKind::HistoricDetail => "hi_detail",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Execution => "execution",
            EntityKind::Task => "task",
            EntityKind::Job => "job",
            EntityKind::EventSubscription => "event subscription",
            EntityKind::IdentityLink => "identity link",
            EntityKind::Variable => "variable",
            EntityKind::HistoricProcessInstance => "historic process instance",
            EntityKind::HistoricActivityInstance => "historic activity instance",
            EntityKind::HistoricTaskInstance => "historic task instance",
            EntityKind::HistoricVariableInstance => "historic variable instance",
            EntityKind::HistoricIdentityLink => "historic identity link",
            EntityKind::HistoricDetail => "historic detail",
        }
    }

    /// JSON fields that get an expression index
    pub fn index_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Execution => &["process_instance_id", "parent_id", "super_execution_id"],
            EntityKind::Task => &["execution_id", "process_instance_id", "assignee"],
            EntityKind::Job => &["execution_id", "process_instance_id", "duedate"],
            EntityKind::EventSubscription => &["execution_id", "event_name"],
            EntityKind::IdentityLink => &["task_id", "process_instance_id"],
            EntityKind::Variable => &["execution_id", "task_id"],
            EntityKind::HistoricProcessInstance => &["process_definition_id"],
            EntityKind::HistoricActivityInstance => &["process_instance_id", "execution_id"],
            EntityKind::HistoricTaskInstance => &["process_instance_id"],
            EntityKind::HistoricVariableInstance => &["process_instance_id"],
            EntityKind::HistoricIdentityLink => &["process_instance_id", "task_id"],
            EntityKind::HistoricDetail => &["process_instance_id"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A persisted record managed through `DbSqlSession`
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Revision the entity was loaded with (1 for new entities)
    fn revision(&self) -> i64;
}

/// Generate a fresh entity id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Implements `Entity` for structs with `id: String` and `revision: i64` fields
macro_rules! impl_entity {
    ($ty:ty, $kind:expr) => {
        impl $crate::persistence::Entity for $ty {
            const KIND: $crate::persistence::EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn revision(&self) -> i64 {
                self.revision
            }
        }
    };
}

pub(crate) use impl_entity;

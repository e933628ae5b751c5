/// Entity definitions
///
/// Runtime entities (executions, tasks, jobs, event subscriptions, identity links,
/// variables) and the history records derived from them. All of them are plain serde
/// structs persisted through `DbSqlSession`.

pub mod event_subscription;
pub mod execution;
pub mod history;
pub mod identity_link;
pub mod job;
pub mod task;
pub mod variable;

pub use event_subscription::{EventSubscriptionEntity, EventType};
pub use execution::{ExecutionEntity, SuspensionState};
pub use history::{
    HistoricActivityInstanceEntity, HistoricDetailEntity, HistoricIdentityLinkEntity,
    HistoricProcessInstanceEntity, HistoricTaskInstanceEntity, HistoricVariableInstanceEntity,
};
pub use identity_link::{link_type, IdentityLinkEntity};
pub use job::{JobEntity, JobType};
pub use task::TaskEntity;
pub use variable::{VariableInstanceEntity, VariableType};

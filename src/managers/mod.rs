/// Entity managers
///
/// One manager per runtime entity kind. Each borrows the `CommandContext` for the
/// duration of a call chain and combines session access with lifecycle events, history
/// and cascading deletes.

pub mod event_subscription;
pub mod execution;
pub mod execution_tree;
pub mod identity_link;
pub mod job;
pub mod task;
pub mod variable;

pub use event_subscription::EventSubscriptionManager;
pub use execution::ExecutionManager;
pub use execution_tree::ExecutionTree;
pub use identity_link::IdentityLinkManager;
pub use job::JobManager;
pub use task::{NewTask, TaskManager};
pub use variable::{VariableManager, VariableScope};

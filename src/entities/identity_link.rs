use crate::persistence::{impl_entity, EntityKind};
use serde::{Deserialize, Serialize};

/// Well-known identity link types
pub mod link_type {
    pub const CANDIDATE: &str = "candidate";
    pub const ASSIGNEE: &str = "assignee";
    pub const OWNER: &str = "owner";
    pub const PARTICIPANT: &str = "participant";
    pub const STARTER: &str = "starter";
}

/// Associates a user or group with a task or process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityLinkEntity {
    pub id: String,
    pub revision: i64,
    pub link_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub task_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
}

impl_entity!(IdentityLinkEntity, EntityKind::IdentityLink);

/// Process definition types
///
/// Definitions are deployed as JSON documents: a list of activities and the sequence
/// flows connecting them. They are stored as JSON in SQLite and compiled into petgraph
/// graphs by the registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A deployed, versioned process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Unique definition id (`key:version:uuid`)
    pub id: String,
    /// Stable key shared by all versions (e.g., "invoice-approval")
    pub key: String,
    /// Version number, starting at 1 per key
    pub version: i32,
    /// Human-readable name
    pub name: String,
    pub activities: Vec<Activity>,
    pub flows: Vec<SequenceFlow>,
    pub tenant_id: Option<String>,
}

/// A node of the process graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Activity id, unique within the definition (e.g., "approve")
    pub id: String,
    pub name: Option<String>,
    pub activity_type: ActivityType,
    /// Type-specific configuration as flexible JSON
    #[serde(default)]
    pub params: Value,
}

/// Supported activity behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    /// Single entry point of the process
    StartEvent,

    /// Ends the execution that reaches it
    EndEvent,

    /// Creates a human task and waits for its completion
    /// Expected params: { "name": "Approve", "assignee": "kermit", "candidate_users": [...],
    ///                    "candidate_groups": [...], "priority": 50 }
    UserTask,

    /// Automatic step; optionally continued asynchronously through a job
    /// Expected params: { "async": true, "exclusive": true, "variables": { "approved": true } }
    /// `"fail": "message"` makes the step raise an error (useful for retry handling)
    ServiceTask,

    /// Waits for a timer
    /// Expected params: one of { "date": "2026-01-01T00:00:00Z" }, { "duration": "PT5M" },
    ///                  { "cycle": "R3/PT10M" }
    TimerCatch,

    /// Waits for a named message
    /// Expected params: { "message": "payment-received" }
    MessageCatch,

    /// Waits for a broadcast signal
    /// Expected params: { "signal": "shutdown" }
    SignalCatch,

    /// Starts the latest version of another definition and waits for it to end
    /// Expected params: { "called_element": "sub-process-key" }
    CallActivity,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::StartEvent => "startEvent",
            ActivityType::EndEvent => "endEvent",
            ActivityType::UserTask => "userTask",
            ActivityType::ServiceTask => "serviceTask",
            ActivityType::TimerCatch => "timerCatchEvent",
            ActivityType::MessageCatch => "messageCatchEvent",
            ActivityType::SignalCatch => "signalCatchEvent",
            ActivityType::CallActivity => "callActivity",
        }
    }
}

impl Activity {
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn param_bool(&self, name: &str) -> bool {
        self.params.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn param_strings(&self, name: &str) -> Vec<String> {
        self.params
            .get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.params.get(name).and_then(Value::as_i64)
    }
}

/// Connection between two activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFlow {
    /// Source activity ID
    pub from: String,
    /// Target activity ID
    pub to: String,
}

/// Body of a deployment: everything except the id and version the registry assigns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub key: String,
    pub name: String,
    pub activities: Vec<Activity>,
    pub flows: Vec<SequenceFlow>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

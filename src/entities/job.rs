use crate::entities::SuspensionState;
use crate::persistence::{impl_entity, new_id, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Executed as soon as it is acquired
    Message,
    /// Executed once its due date has passed
    Timer,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Message => "message",
            JobType::Timer => "timer",
        }
    }
}

/// Persisted unit of asynchronous work
///
/// `handler_type` selects the `JobHandler` that runs the job; `handler_configuration`
/// is opaque to the job manager and interpreted by that handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntity {
    pub id: String,
    pub revision: i64,
    pub job_type: JobType,
    pub handler_type: String,
    pub handler_configuration: Option<String>,
    pub execution_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub duedate: Option<DateTime<Utc>>,
    /// Remaining repeat cycle for timers (ISO-8601 `R[n]/...`)
    pub repeat: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub end_date: Option<DateTime<Utc>>,
    pub retries: i32,
    pub exception_message: Option<String>,
    pub lock_owner: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub exclusive: bool,
    pub suspension_state: SuspensionState,
    pub tenant_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_time: DateTime<Utc>,
}

impl_entity!(JobEntity, EntityKind::Job);

impl JobEntity {
    pub fn new(job_type: JobType, handler_type: &str, retries: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            revision: 1,
            job_type,
            handler_type: handler_type.to_string(),
            handler_configuration: None,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            duedate: None,
            repeat: None,
            end_date: None,
            retries,
            exception_message: None,
            lock_owner: None,
            lock_expiration_time: None,
            exclusive: true,
            suspension_state: SuspensionState::Active,
            tenant_id: None,
            create_time: now,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_some() && self.lock_expiration_time.is_some_and(|expires| expires > now)
    }

    pub fn is_dead_letter(&self) -> bool {
        self.retries <= 0
    }
}

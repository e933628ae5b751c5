/// Engine error type
///
/// Every manager, the session and the runtime report failures through `EngineError`.
/// The HTTP layer maps the variants onto status codes.

use crate::persistence::EntityKind;

/// Errors raised by the persistence tier and the runtime on top of it
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("process definition '{0}' not found")]
    DefinitionNotFound(String),

    /// Zero rows matched an update/delete carrying the loaded revision
    #[error("{kind} '{id}' was updated or deleted by another transaction")]
    OptimisticLocking { kind: EntityKind, id: String },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid timer expression '{expression}': {reason}")]
    InvalidTimerExpression { expression: String, reason: String },

    #[error("no job handler registered for type '{0}'")]
    UnknownJobHandler(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn invalid_timer(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTimerExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error taxonomy
///
/// Separates benign races (`InvalidTransition`) and terminal task failures
/// (`ExecutorMissing`, `Executor`) from infrastructure failures that the
/// queue layer is allowed to retry (`Persistence`, `Queue`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is {actual}, expected {expected}")]
    InvalidTransition {
        kind: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("no executor for type {0}")]
    ExecutorMissing(String),

    #[error("executor failed: {0}")]
    Executor(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("queue failure: {0}")]
    Queue(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Whether a job failing with this error should be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Queue(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

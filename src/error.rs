//! Error types for the task engine.

use uuid::Uuid;

use crate::tasks::TaskStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by the task registry and worker contexts.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task submission: {reason}")]
    InvalidSubmission { reason: String },

    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {id} already finished with status {status}")]
    AlreadyFinished { id: Uuid, status: TaskStatus },

    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// How an executor run ended, when it did not succeed.
///
/// `Cancelled` is the unwind signal returned by
/// [`WorkerContext::check_cancelled`](crate::tasks::WorkerContext::check_cancelled);
/// everything else is a domain failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Task was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl ExecutorError {
    /// Build a domain failure from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for ExecutorError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(format!("{e:#}"))
    }
}

impl From<TaskError> for ExecutorError {
    fn from(e: TaskError) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

//! Task state machine and record snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Status message stored when a task fails without saying why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Task failed";

/// Process-unique task identifier.
pub type TaskId = Uuid;

/// Discriminator naming the executor variant that owns a task,
/// e.g. `"EncodingTask"` or `"NodeFileDownloadTask"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank names cannot be routed to an executor.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, executor not started yet.
    Pending,
    /// Executor is running.
    Running,
    /// Executor returned normally.
    Completed,
    /// Executor returned a domain error or panicked.
    Failed,
    /// Cancellation was requested and honored.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time copy of a task record.
///
/// The same type is stored in the registry and handed out to observers;
/// readers always get a clone taken under the registry lock, so a snapshot
/// is never half-updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Percent complete, always within `[0, 100]`.
    pub progress: f64,
    /// Executor-defined payload, replaced wholesale on every update.
    pub payload: serde_json::Value,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Create a fresh record in `Pending`.
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0.0,
            payload,
            status_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to a new status, stamping timestamps on the way.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        message: Option<String>,
    ) -> Result<(), TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        // Progress notes from the run don't describe a finished task.
        self.status_message = match target {
            TaskStatus::Failed => Some(
                message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            ),
            TaskStatus::Completed => message,
            _ => message.or(self.status_message.take()),
        };

        match target {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed => {
                self.progress = 100.0;
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {}
        }

        Ok(())
    }

    /// Set progress, clamped to `[0, 100]`. NaN reads as 0.
    pub fn set_progress(&mut self, value: f64) -> Result<(), TaskError> {
        self.ensure_active()?;
        self.progress = clamp_progress(value);
        Ok(())
    }

    pub fn set_payload(&mut self, payload: serde_json::Value) -> Result<(), TaskError> {
        self.ensure_active()?;
        self.payload = payload;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_active(&self) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyFinished {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Clamp a raw progress value into `[0, 100]`.
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

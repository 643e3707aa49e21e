//! Worker context — the capability handle an executor reports through.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::{TaskId, TaskStatus, TaskType};
use super::store::TaskStore;
use crate::error::{ExecutorError, TaskError};

/// Handed to an executor for the duration of one run.
///
/// `P` is the executor's payload type; the registry stores it as JSON, the
/// executor only ever sees `P`. Each mutator applies one atomic update to the
/// task record and publishes the resulting snapshot.
pub struct WorkerContext<P> {
    id: TaskId,
    task_type: TaskType,
    store: Arc<TaskStore>,
    cancel: CancellationToken,
    _payload: PhantomData<fn(P)>,
}

impl<P> Clone for WorkerContext<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            task_type: self.task_type.clone(),
            store: Arc::clone(&self.store),
            cancel: self.cancel.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for WorkerContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<P: Serialize> WorkerContext<P> {
    pub(crate) fn new(
        id: TaskId,
        task_type: TaskType,
        store: Arc<TaskStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            task_type,
            store,
            cancel,
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    /// Bail out if cancellation was requested.
    ///
    /// Call at every suspension point; propagate with `?`:
    ///
    /// ```ignore
    /// for chunk in chunks {
    ///     ctx.check_cancelled()?;
    ///     copy(chunk).await?;
    /// }
    /// ```
    pub fn check_cancelled(&self) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            debug!(task_id = %self.id, "Cancellation observed");
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested. Meant for `tokio::select!`
    /// against long waits (subprocess exit, network reads).
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Replace the payload wholesale.
    pub async fn set_payload(&self, payload: &P) -> Result<(), TaskError> {
        let value = serde_json::to_value(payload)?;
        self.store
            .update(self.id, |task| task.set_payload(value))
            .await
    }

    /// Report progress; values outside `[0, 100]` are clamped.
    pub async fn report_progress(&self, value: f64) -> Result<(), TaskError> {
        self.store
            .update(self.id, |task| task.set_progress(value))
            .await
    }

    /// Move the task to `status`. Only `Running -> Completed | Failed |
    /// Cancelled` is accepted from an executor.
    pub async fn report_status(
        &self,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), TaskError> {
        self.store
            .update(self.id, |task| task.transition_to(status, message))
            .await
    }

    /// Set progress and payload in one update.
    pub async fn report(&self, progress: f64, payload: &P) -> Result<(), TaskError> {
        let value = serde_json::to_value(payload)?;
        self.store
            .update(self.id, |task| {
                task.set_progress(progress)?;
                task.set_payload(value)
            })
            .await
    }
}

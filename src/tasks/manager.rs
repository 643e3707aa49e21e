//! Task manager — submission, supervision, queries and cancellation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{SubscriptionError, TaskSubscription, UpdateChannel};
use super::context::WorkerContext;
use super::executor::TaskExecutor;
use super::state::{DEFAULT_FAILURE_MESSAGE, TaskId, TaskSnapshot, TaskStatus, TaskType};
use super::store::{TaskStore, TaskSummary};
use crate::config::EngineConfig;
use crate::error::{ExecutorError, TaskError};

/// Owns every task in the process and runs their executors.
///
/// Cloning is cheap; clones share the same store and update channel.
#[derive(Debug, Clone)]
pub struct TaskManager {
    store: Arc<TaskStore>,
}

impl TaskManager {
    /// Create a manager over an existing store.
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Create a manager with a fresh store sized from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Arc::new(TaskStore::new(UpdateChannel::new(
            config.broadcast_capacity,
        ))))
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Create a task and schedule its executor. Returns as soon as the task
    /// is recorded; the executor runs on the tokio runtime.
    pub async fn submit<E: TaskExecutor>(
        &self,
        task_type: impl Into<TaskType>,
        initial_payload: E::Payload,
        executor: E,
    ) -> Result<TaskId, TaskError> {
        let task_type = task_type.into();
        if !task_type.is_valid() {
            return Err(TaskError::InvalidSubmission {
                reason: "task type must not be blank".to_string(),
            });
        }
        let payload = serde_json::to_value(&initial_payload).map_err(|e| {
            TaskError::InvalidSubmission {
                reason: format!("initial payload is not serializable: {e}"),
            }
        })?;

        let snapshot = TaskSnapshot::new(task_type.clone(), payload);
        let id = snapshot.id;
        let cancel = CancellationToken::new();
        self.store.insert(snapshot, cancel.clone()).await;

        info!(task_id = %id, task_type = %task_type, "Task submitted");

        let ctx = WorkerContext::<E::Payload>::new(id, task_type, Arc::clone(&self.store), cancel);
        tokio::spawn(supervise(Arc::clone(&self.store), ctx, executor));

        Ok(id)
    }

    /// Snapshot of every task, oldest first.
    pub async fn tasks(&self) -> Vec<TaskSnapshot> {
        self.store.list(None).await
    }

    /// Snapshot of every task of one type, oldest first.
    pub async fn tasks_of_type(&self, task_type: &TaskType) -> Vec<TaskSnapshot> {
        self.store.list(Some(task_type)).await
    }

    pub async fn try_get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.store.get(id).await
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false if the task is unknown or already finished. A running
    /// task ends as `Cancelled` once its executor notices.
    pub async fn cancel_task(&self, id: TaskId) -> bool {
        let accepted = self.store.cancel(id).await;
        if accepted {
            info!(task_id = %id, "Task cancellation requested");
        } else {
            debug!(task_id = %id, "Cancellation ignored, task unknown or finished");
        }
        accepted
    }

    /// Request cancellation of every unfinished task. Returns how many
    /// requests were accepted.
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for id in self.store.active_ids().await {
            if self.store.cancel(id).await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(count = cancelled, "Cancelled all active tasks");
        }
        cancelled
    }

    /// Live snapshots from now on, optionally for one task type only.
    pub fn subscribe(&self, filter: Option<TaskType>) -> TaskSubscription {
        self.store.updates().subscribe(filter)
    }

    pub async fn summary(&self) -> TaskSummary {
        self.store.summary().await
    }

    /// Wait until the task reaches a terminal status and return that
    /// snapshot. `None` if the task is unknown (or was pruned meanwhile).
    pub async fn wait_for_completion(&self, id: TaskId) -> Option<TaskSnapshot> {
        // Subscribe before reading so a transition between the two is not lost.
        let mut sub = self.subscribe(None);

        let current = self.store.get(id).await?;
        if current.is_terminal() {
            return Some(current);
        }

        loop {
            match sub.recv().await {
                Some(Ok(snapshot)) => {
                    if snapshot.id == id && snapshot.is_terminal() {
                        return Some(snapshot);
                    }
                }
                Some(Err(SubscriptionError::Lagged(_))) => {
                    let current = self.store.get(id).await?;
                    if current.is_terminal() {
                        return Some(current);
                    }
                }
                None => return self.store.get(id).await,
            }
        }
    }

    /// Drop finished tasks that completed more than `older_than` ago.
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
        else {
            return 0;
        };
        let removed = self.store.remove_finished_before(cutoff).await;
        if removed > 0 {
            info!(count = removed, "Pruned finished tasks");
        }
        removed
    }
}

/// Run one executor and guarantee its task ends in a terminal status.
async fn supervise<E: TaskExecutor>(
    store: Arc<TaskStore>,
    ctx: WorkerContext<E::Payload>,
    mut executor: E,
) where
    E::Payload: Serialize,
{
    let id = ctx.id();
    let task_type = ctx.task_type().clone();

    // Fails when the task was cancelled while still pending.
    if let Err(e) = store
        .update(id, |task| task.transition_to(TaskStatus::Running, None))
        .await
    {
        debug!(task_id = %id, error = %e, "Executor not started");
        return;
    }
    info!(task_id = %id, task_type = %task_type, "Task started");

    let outcome = AssertUnwindSafe(executor.execute(&ctx))
        .catch_unwind()
        .await;

    let (status, message) = match outcome {
        Ok(Ok(())) => (TaskStatus::Completed, None),
        Ok(Err(_)) if ctx.is_cancelled() => {
            (TaskStatus::Cancelled, Some("Cancelled".to_string()))
        }
        Ok(Err(ExecutorError::Cancelled)) => {
            (TaskStatus::Cancelled, Some("Cancelled".to_string()))
        }
        Ok(Err(ExecutorError::Failed(reason))) => (TaskStatus::Failed, Some(failure_text(reason))),
        Err(panic) => (
            TaskStatus::Failed,
            Some(format!("Executor panicked: {}", panic_message(panic.as_ref()))),
        ),
    };

    match store.finalize(id, status, message.clone()).await {
        Some(TaskStatus::Failed) => {
            warn!(
                task_id = %id,
                task_type = %task_type,
                error = message.as_deref().unwrap_or_default(),
                "Task failed"
            );
        }
        Some(final_status) => {
            info!(task_id = %id, task_type = %task_type, status = %final_status, "Task finished");
        }
        None => debug!(task_id = %id, "Task removed before it finished"),
    }
}

fn failure_text(reason: String) -> String {
    if reason.trim().is_empty() {
        DEFAULT_FAILURE_MESSAGE.to_string()
    } else {
        reason
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sweep period used when the caller passes a zero interval.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a background task that periodically prunes finished tasks.
pub fn spawn_retention_task(
    manager: TaskManager,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    let every = if every.is_zero() {
        warn!(
            fallback_secs = DEFAULT_SWEEP_INTERVAL.as_secs(),
            "Retention sweep interval is zero, using fallback"
        );
        DEFAULT_SWEEP_INTERVAL
    } else {
        every
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            manager.prune_finished(retention).await;
        }
    })
}

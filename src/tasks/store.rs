//! In-memory task store — the one shared mutable map in the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::channel::UpdateChannel;
use super::state::{TaskId, TaskSnapshot, TaskStatus, TaskType};
use crate::error::TaskError;

/// A record plus the token its executor watches.
#[derive(Debug)]
struct TaskEntry {
    /// Insertion order, used to list tasks oldest first.
    seq: u64,
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
}

/// Counts of tasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Concurrency-safe map of every task record in the process.
///
/// Every mutation runs inside one write-lock critical section and publishes
/// the resulting snapshot before the lock is released, so observers see the
/// updates of a single task in the order they were applied.
#[derive(Debug)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    next_seq: AtomicU64,
    updates: UpdateChannel,
}

impl TaskStore {
    pub fn new(updates: UpdateChannel) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            updates,
        }
    }

    pub fn updates(&self) -> &UpdateChannel {
        &self.updates
    }

    /// Store a new record and publish it.
    pub async fn insert(&self, snapshot: TaskSnapshot, cancel: CancellationToken) {
        let mut tasks = self.tasks.write().await;
        let published = snapshot.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tasks.insert(
            snapshot.id,
            TaskEntry {
                seq,
                snapshot,
                cancel,
            },
        );
        self.updates.publish(published);
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks
            .read()
            .await
            .get(&id)
            .map(|entry| entry.snapshot.clone())
    }

    /// All records, optionally of one type, oldest first.
    pub async fn list(&self, task_type: Option<&TaskType>) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let mut entries: Vec<&TaskEntry> = tasks
            .values()
            .filter(|entry| task_type.is_none_or(|ty| *ty == entry.snapshot.task_type))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| entry.snapshot.clone())
            .collect()
    }

    /// Apply `f` to a record; on success publish the new snapshot.
    pub async fn update<F, R>(&self, id: TaskId, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(&mut TaskSnapshot) -> Result<R, TaskError>,
    {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id).ok_or(TaskError::NotFound { id })?;
        let out = f(&mut entry.snapshot)?;
        self.updates.publish(entry.snapshot.clone());
        Ok(out)
    }

    /// Apply the final status unless the task already finished.
    ///
    /// Returns the status the task ended with.
    pub async fn finalize(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Option<TaskStatus> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(&id)?;
        if entry.snapshot.is_terminal() {
            return Some(entry.snapshot.status);
        }
        match entry.snapshot.transition_to(status, message) {
            Ok(()) => {
                self.updates.publish(entry.snapshot.clone());
                Some(status)
            }
            Err(e) => {
                debug!(task_id = %id, error = %e, "Final transition rejected");
                Some(entry.snapshot.status)
            }
        }
    }

    /// Fire the cancellation token of a live task.
    ///
    /// A task that never started is moved to `Cancelled` right here; a running
    /// one is left for its executor to unwind. Returns false for unknown or
    /// finished tasks.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if entry.snapshot.is_terminal() {
            return false;
        }

        entry.cancel.cancel();

        if entry.snapshot.status == TaskStatus::Pending
            && entry
                .snapshot
                .transition_to(
                    TaskStatus::Cancelled,
                    Some("Cancelled before start".to_string()),
                )
                .is_ok()
        {
            self.updates.publish(entry.snapshot.clone());
        }

        true
    }

    /// Ids of all tasks not yet finished.
    pub async fn active_ids(&self) -> Vec<TaskId> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|entry| entry.snapshot.status.is_active())
            .map(|entry| entry.snapshot.id)
            .collect()
    }

    /// Drop finished records completed before `cutoff`.
    pub async fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, entry| {
            !(entry.snapshot.is_terminal()
                && entry.snapshot.completed_at.is_some_and(|at| at < cutoff))
        });
        before - tasks.len()
    }

    pub async fn summary(&self) -> TaskSummary {
        let tasks = self.tasks.read().await;
        let mut summary = TaskSummary {
            total: tasks.len(),
            ..TaskSummary::default()
        };
        for entry in tasks.values() {
            match entry.snapshot.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

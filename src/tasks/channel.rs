//! Update channel — broadcast fan-out of task snapshots to observers.

use futures::Stream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::state::{TaskSnapshot, TaskType};

/// Default broadcast channel capacity.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Largest backlog a single subscriber may hold before it lags.
pub const MAX_BROADCAST_CAPACITY: usize = 65_536;

/// Why a subscription could not deliver the next snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `n` snapshots were dropped for it.
    /// Resync with a full query.
    #[error("subscriber lagged behind by {0} updates")]
    Lagged(u64),
}

/// Publish/subscribe hub for task snapshots.
///
/// Publishing never blocks: a slow subscriber only loses its own backlog.
#[derive(Debug, Clone)]
pub struct UpdateChannel {
    tx: broadcast::Sender<TaskSnapshot>,
}

impl UpdateChannel {
    /// Capacity is clamped to `1..=MAX_BROADCAST_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.clamp(1, MAX_BROADCAST_CAPACITY));
        Self { tx }
    }

    /// Send a snapshot to every current subscriber. Returns how many
    /// subscribers it reached; zero is not an error.
    pub fn publish(&self, snapshot: TaskSnapshot) -> usize {
        self.tx.send(snapshot).unwrap_or(0)
    }

    /// Subscribe to all subsequent snapshots, optionally only one task type.
    pub fn subscribe(&self, filter: Option<TaskType>) -> TaskSubscription {
        TaskSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

/// One observer's view of the update channel.
#[derive(Debug)]
pub struct TaskSubscription {
    rx: broadcast::Receiver<TaskSnapshot>,
    filter: Option<TaskType>,
}

impl TaskSubscription {
    /// Wait for the next snapshot that matches the filter.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Result<TaskSnapshot, SubscriptionError>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    if self.matches(&snapshot) {
                        return Some(Ok(snapshot));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Err(SubscriptionError::Lagged(n)));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a `Stream` of matching snapshots.
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<TaskSnapshot, SubscriptionError>> + Send + 'static {
        let filter = self.filter;
        BroadcastStream::new(self.rx).filter_map(move |item| {
            let out = match item {
                Ok(snapshot) => filter
                    .as_ref()
                    .is_none_or(|ty| *ty == snapshot.task_type)
                    .then_some(Ok(snapshot)),
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(SubscriptionError::Lagged(n))),
            };
            futures::future::ready(out)
        })
    }

    fn matches(&self, snapshot: &TaskSnapshot) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|ty| *ty == snapshot.task_type)
    }
}

//! Background task engine.
//!
//! Core components:
//! - `state` — Task record and status machine (Pending → Running → Completed/Failed/Cancelled)
//! - `channel` — Broadcast fan-out of snapshots, optionally filtered by task type
//! - `store` — Concurrency-safe map of all task records
//! - `context` — WorkerContext handed to executors (progress, payload, status, cancellation)
//! - `executor` — TaskExecutor trait, one implementation per task type
//! - `manager` — TaskManager: submit, query, cancel, supervise
//! - `ws` — REST + WebSocket surface for the browser client

pub mod channel;
pub mod context;
pub mod executor;
pub mod manager;
pub mod state;
pub mod store;
pub mod ws;

pub use channel::{SubscriptionError, TaskSubscription, UpdateChannel};
pub use context::WorkerContext;
pub use executor::{FnExecutor, TaskExecutor};
pub use manager::{TaskManager, spawn_retention_task};
pub use state::{TaskId, TaskSnapshot, TaskStatus, TaskType};
pub use store::{TaskStore, TaskSummary};
pub use ws::task_routes;

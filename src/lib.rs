//! Media Tasks — background task engine for a self-hosted media manager.
//!
//! Long-running work (torrent transfers, encodes, metadata scans, node file
//! transfers) is submitted to a [`tasks::TaskManager`] as an executor; the
//! manager tracks its state, supports cooperative cancellation and pushes
//! snapshots to subscribers.

pub mod config;
pub mod error;
pub mod tasks;

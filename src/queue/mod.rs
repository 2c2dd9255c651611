//! Queue agent control loop
//!
//! Each registered queue is driven by a controller that periodically
//! rebuilds a snapshot of the queue's partitions and, on the leading agent,
//! trims rows that every vital consumer has already read.
//!
//! # Overview
//!
//! - [`builder::SnapshotBuilder`] reads mount info, tablet infos and data
//!   weights and turns them into an immutable [`snapshot::QueueSnapshot`].
//! - [`controller::OrderedDynamicTableController`] publishes snapshots,
//!   schedules passes and runs trimming iterations.
//! - [`trim`] discovers the replicas of a queue and computes how many rows
//!   of each partition can go.
//! - [`agent::QueueAgent`] keeps one controller per queue row.
//!
//! ```text
//!   rows ──► QueueAgent ──► QueueController ──► SnapshotBuilder ──► QueueSnapshot
//!                                  │
//!                                  └── leading ──► TrimPlanner ──► TrimSession × replicas
//! ```
//!
//! Failures are recorded in snapshots and trim reports rather than
//! propagated; a pass always completes.

pub mod agent;
pub mod api;
pub mod builder;
pub mod config;
pub mod controller;
pub mod error;
pub mod orchid;
pub mod profile;
pub mod snapshot;
pub mod trim;
pub mod types;
pub mod write_rate;

pub use error::{QueueError, QueueResult};

#[cfg(test)]
mod tests;

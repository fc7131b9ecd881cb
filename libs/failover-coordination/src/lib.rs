//! # failover-coordination
//!
//! Active/standby coordination between a primary and a backup server.
//!
//! This library provides:
//! - **Typed models** for the failover state machine and partner liveness.
//! - **FailoverController**, the single place failover state changes, driven
//!   by partner heartbeat recency and injected failures.
//! - **ReplicationChannel**, which emits periodic sync snapshots (pool
//!   counters + lease table) and heartbeats from the active node, and merges
//!   received snapshots monotonically.
//!
//! Sync and heartbeat run on independent timers so losing one never blocks
//! the other. Only the active node emits.

pub mod error;
pub mod failover;
pub mod models;
pub mod replication;

pub use error::{CoordinationError, CoordinationResult};
pub use failover::FailoverController;
pub use models::{FailoverEvent, FailoverState, PartnerLiveness, Transition};
pub use replication::{MergeOutcome, ReplicationChannel};

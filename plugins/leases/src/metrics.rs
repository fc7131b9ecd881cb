//! Plugin-local metrics for address allocation.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//! The plugin owns its own counters rather than centralizing them in duet-core.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Addresses handed out in ADVERTISEs, by pool
    pub static ref ALLOCATIONS: IntCounterVec = register_int_counter_vec!(
        "lease_allocations",
        "count of addresses allocated, by pool",
        &["pool"]
    ).unwrap();

    /// Leases committed from a REQUEST
    pub static ref COMMITS: IntCounter = register_int_counter!(
        "lease_commits",
        "count of leases committed from REQUEST"
    ).unwrap();

    /// Leases extended from a RENEW
    pub static ref RENEWALS: IntCounter = register_int_counter!(
        "lease_renewals",
        "count of leases extended from RENEW"
    ).unwrap();

    /// Entries waiting in each admission queue
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "admission_queue_depth",
        "entries waiting in an admission queue",
        &["queue"]
    ).unwrap();

    /// Events the handler returned an error for
    pub static ref HANDLER_ERRORS: IntCounter = register_int_counter!(
        "lease_handler_errors",
        "count of dequeued events dropped because the handler failed"
    ).unwrap();
}

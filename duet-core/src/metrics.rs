#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! process wide statistics for every node in the run
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use prometheus_static_metric::make_static_metric;

use crate::msg::Message;

make_static_metric! {
    pub label_enum MsgKind {
        solicit,
        advertise,
        request,
        renew,
        reply,
        sync,
        heartbeat,
        unknown,
    }
    pub struct RecvStats: IntCounter {
        "message_kind" => MsgKind
    }
    pub struct SentStats: IntCounter {
        "message_kind" => MsgKind
    }
    pub label_enum DropReason {
        malformed,
        misrouted,
        inactive,
    }
    pub struct DroppedStats: IntCounter {
        "reason" => DropReason
    }
}

lazy_static! {
    /// histogram of logical response latency (arrival to response emission)
    pub static ref RESPONSE_DURATION: HistogramVec = register_histogram_vec!(
        "duet_response_duration",
        "logical response latency (seconds)",
        &["type"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    pub static ref RECV_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "duet_recv_kind_counts",
        "Recv Kind Counts",
        &["message_kind"]
    )
    .unwrap();
    pub static ref SENT_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "duet_sent_kind_counts",
        "Sent Kind Counts",
        &["message_kind"]
    )
    .unwrap();
    pub static ref DROPPED_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "duet_dropped_events",
        "events dropped before processing",
        &["reason"]
    )
    .unwrap();

    /// aggregate count of all recv'd message kinds
    pub static ref RECV_TYPE_COUNT: RecvStats = RecvStats::from(&RECV_COUNT_VEC);
    /// aggregate count of all sent message kinds
    pub static ref SENT_TYPE_COUNT: SentStats = SentStats::from(&SENT_COUNT_VEC);
    /// dropped events by reason
    pub static ref DROPPED_EVENTS: DroppedStats = DroppedStats::from(&DROPPED_COUNT_VEC);

    /// standby nodes that promoted themselves
    pub static ref FAILOVER_PROMOTIONS: IntCounter = register_int_counter!("duet_failover_promotions", "standby to active promotions").unwrap();
    /// simulated crashes
    pub static ref INJECTED_FAILURES: IntCounter = register_int_counter!("duet_injected_failures", "injected node failures").unwrap();
    /// snapshots pushed to a partner
    pub static ref SYNC_SENT: IntCounter = register_int_counter!("duet_sync_sent", "sync snapshots sent").unwrap();
    /// snapshots merged from a partner
    pub static ref SYNC_APPLIED: IntCounter = register_int_counter!("duet_sync_applied", "sync snapshots merged").unwrap();
    /// heartbeats sent
    pub static ref HEARTBEAT_SENT: IntCounter = register_int_counter!("duet_heartbeat_sent", "heartbeats sent").unwrap();
    /// nodes currently serving clients
    pub static ref ACTIVE_NODES: IntGauge = register_int_gauge!("duet_active_nodes", "nodes in the active state").unwrap();
}

/// count a received message by kind
pub fn record_recv(msg: &Message) {
    let c = &RECV_TYPE_COUNT;
    match msg {
        Message::Solicit(_) => c.solicit.inc(),
        Message::Advertise(_) => c.advertise.inc(),
        Message::Request(_) => c.request.inc(),
        Message::Renew(_) => c.renew.inc(),
        Message::Reply(_) => c.reply.inc(),
        Message::Sync(_) => c.sync.inc(),
        Message::Heartbeat => c.heartbeat.inc(),
    }
}

/// a frame arrived that did not decode to any message kind
pub fn record_undecodable() {
    RECV_TYPE_COUNT.unknown.inc();
}

/// count a sent message by kind
pub fn record_sent(msg: &Message) {
    let c = &SENT_TYPE_COUNT;
    match msg {
        Message::Solicit(_) => c.solicit.inc(),
        Message::Advertise(_) => c.advertise.inc(),
        Message::Request(_) => c.request.inc(),
        Message::Renew(_) => c.renew.inc(),
        Message::Reply(_) => c.reply.inc(),
        Message::Sync(_) => c.sync.inc(),
        Message::Heartbeat => c.heartbeat.inc(),
    }
}

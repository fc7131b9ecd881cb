//! Sync and heartbeat exchange between the two servers.
//!
//! The active node pushes a full snapshot every `sync_interval` and a
//! payload-free heartbeat every `heartbeat_interval`. The standby node merges
//! snapshots (per pool `max`, leases unioned with the received entry winning)
//! and checks partner liveness every `failover_timeout`.

use std::time::Duration;

use config::FailoverTiming;
use duet_core::{
    metrics,
    msg::{Envelope, Message, NodeId, SyncPayload},
    sim::{Runtime, Timer, TimerId},
};
use ip_manager::{AddressPool, LeaseTable};
use tracing::{debug, trace};

use crate::error::{CoordinationError, CoordinationResult};

/// What a merge changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub counters_changed: bool,
    pub leases_changed: usize,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        !self.counters_changed && self.leases_changed == 0
    }
}

/// Build the snapshot the active node sends.
pub fn snapshot(pool: &AddressPool, leases: &LeaseTable) -> SyncPayload {
    SyncPayload {
        counters: pool.counters(),
        leases: leases.snapshot_all(),
    }
}

/// Merge a received snapshot. Idempotent and monotonic in the counters.
pub fn merge(pool: &mut AddressPool, leases: &mut LeaseTable, payload: &SyncPayload) -> MergeOutcome {
    MergeOutcome {
        counters_changed: pool.merge_counters(&payload.counters),
        leases_changed: leases.merge(&payload.leases),
    }
}

#[derive(Debug)]
pub struct ReplicationChannel {
    me: NodeId,
    partner: NodeId,
    timing: FailoverTiming,
    link_delay: Duration,
    sync_timer: Option<TimerId>,
    heartbeat_timer: Option<TimerId>,
    liveness_timer: Option<TimerId>,
    syncs_sent: u64,
    syncs_applied: u64,
    heartbeats_sent: u64,
}

impl ReplicationChannel {
    pub fn new(me: NodeId, partner: NodeId, timing: FailoverTiming, link_delay: Duration) -> Self {
        Self {
            me,
            partner,
            timing,
            link_delay,
            sync_timer: None,
            heartbeat_timer: None,
            liveness_timer: None,
            syncs_sent: 0,
            syncs_applied: 0,
            heartbeats_sent: 0,
        }
    }

    pub fn partner(&self) -> NodeId {
        self.partner
    }

    pub fn timing(&self) -> FailoverTiming {
        self.timing
    }

    pub fn is_emitting(&self) -> bool {
        self.sync_timer.is_some() || self.heartbeat_timer.is_some()
    }

    pub fn syncs_sent(&self) -> u64 {
        self.syncs_sent
    }

    pub fn syncs_applied(&self) -> u64 {
        self.syncs_applied
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent
    }

    /// Begin emitting sync and heartbeat on their own intervals. Call when
    /// the node becomes active.
    pub fn start_emitting(&mut self, rt: &mut dyn Runtime) {
        if self.sync_timer.is_none() {
            self.sync_timer = Some(rt.schedule(self.me, self.timing.sync_interval, Timer::Sync));
        }
        if self.heartbeat_timer.is_none() {
            self.heartbeat_timer = Some(rt.schedule(
                self.me,
                self.timing.heartbeat_interval,
                Timer::Heartbeat,
            ));
        }
        debug!(me = %self.me, partner = %self.partner, "replication emitting");
    }

    /// Begin periodic liveness checks. Call when the node starts standby.
    pub fn start_watching(&mut self, rt: &mut dyn Runtime) {
        if self.liveness_timer.is_none() {
            self.liveness_timer = Some(rt.schedule(
                self.me,
                self.timing.failover_timeout,
                Timer::Liveness,
            ));
        }
    }

    /// Cancel every replication timer.
    pub fn stop(&mut self, rt: &mut dyn Runtime) {
        for id in [
            self.sync_timer.take(),
            self.heartbeat_timer.take(),
            self.liveness_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            rt.cancel(id);
        }
    }

    /// Stop liveness checks, keep emitting.
    pub fn stop_watching(&mut self, rt: &mut dyn Runtime) {
        if let Some(id) = self.liveness_timer.take() {
            rt.cancel(id);
        }
    }

    /// Sync timer fired: push `payload` to the partner and re-arm.
    pub fn on_sync_timer(&mut self, payload: SyncPayload, rt: &mut dyn Runtime) -> CoordinationResult<()> {
        self.sync_timer = Some(rt.schedule(self.me, self.timing.sync_interval, Timer::Sync));
        let leases = payload.leases.len();
        self.send(Message::Sync(payload), rt)?;
        self.syncs_sent += 1;
        metrics::SYNC_SENT.inc();
        trace!(partner = %self.partner, leases, "sync sent");
        Ok(())
    }

    /// Heartbeat timer fired: tell the partner we are alive and re-arm.
    pub fn on_heartbeat_timer(&mut self, rt: &mut dyn Runtime) -> CoordinationResult<()> {
        self.heartbeat_timer = Some(rt.schedule(
            self.me,
            self.timing.heartbeat_interval,
            Timer::Heartbeat,
        ));
        self.send(Message::Heartbeat, rt)?;
        self.heartbeats_sent += 1;
        metrics::HEARTBEAT_SENT.inc();
        Ok(())
    }

    /// Liveness timer fired: re-arm. The caller runs the check.
    pub fn on_liveness_timer(&mut self, rt: &mut dyn Runtime) {
        self.liveness_timer = Some(rt.schedule(
            self.me,
            self.timing.failover_timeout,
            Timer::Liveness,
        ));
    }

    /// Reject peer messages that did not come from our partner.
    pub fn accept_from(&self, src: NodeId) -> CoordinationResult<()> {
        if src != self.partner {
            return Err(CoordinationError::UnknownPeer {
                expected: self.partner,
                actual: src,
            });
        }
        Ok(())
    }

    /// Merge a received snapshot into the local pool and lease table.
    pub fn apply(
        &mut self,
        src: NodeId,
        payload: &SyncPayload,
        pool: &mut AddressPool,
        leases: &mut LeaseTable,
    ) -> CoordinationResult<MergeOutcome> {
        self.accept_from(src)?;
        let outcome = merge(pool, leases, payload);
        self.syncs_applied += 1;
        metrics::SYNC_APPLIED.inc();
        if !outcome.is_noop() {
            debug!(from = %src, ?outcome, "merged sync");
        }
        Ok(outcome)
    }

    fn send(&self, msg: Message, rt: &mut dyn Runtime) -> CoordinationResult<()> {
        let env = Envelope::from_msg(self.me, Some(self.partner), &msg)
            .map_err(|err| CoordinationError::Codec(err.to_string()))?;
        metrics::record_sent(&msg);
        rt.send(env, self.link_delay);
        Ok(())
    }
}

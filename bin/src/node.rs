//! A DHCPv6-like server attached to the fabric.
//!
//! Incoming frames are gated before anything else runs: frames addressed to
//! another node are dropped (trace), undecodable ones are dropped as malformed
//! (warn), and client traffic reaching a node that is not active is dropped
//! as inactive. What survives goes to the admission queues or, for partner
//! traffic, to the replication channel.
use std::any::Any;

use config::{Role, ServerConfig};
use duet_core::{
    metrics::{self, ACTIVE_NODES, DROPPED_EVENTS},
    msg::SyncPayload,
    prelude::*,
    sim::QueueKind,
};
use failover_coordination::{replication, FailoverController, FailoverState, ReplicationChannel};
use leases::{AdmissionScheduler, ClientMsg, Leases};
use serde::Serialize;

/// what a node saw and dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeCounters {
    pub solicits_seen: u64,
    pub requests_seen: u64,
    pub renews_seen: u64,
    pub dropped_malformed: u64,
    pub dropped_misrouted: u64,
    pub dropped_inactive: u64,
    pub leases_expired: u64,
}

/// End-of-run view of one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub id: NodeId,
    pub role: Role,
    pub state: FailoverState,
    #[serde(flatten)]
    pub counters: NodeCounters,
    pub advertises_sent: u64,
    pub replies_sent: u64,
    pub active_leases: usize,
    /// mean SOLICIT response latency in milliseconds
    pub mean_response_ms: Option<f64>,
    pub pool_counters: PoolCounters,
    pub syncs_sent: u64,
    pub syncs_applied: u64,
    pub heartbeats_sent: u64,
}

#[derive(Debug)]
pub struct ServerNode {
    cfg: ServerConfig,
    leases: Leases,
    scheduler: AdmissionScheduler,
    failover: FailoverController,
    replication: Option<ReplicationChannel>,
    counters: NodeCounters,
    transitions: Vec<failover_coordination::Transition>,
}

impl ServerNode {
    pub fn new(cfg: ServerConfig) -> Self {
        let replication = match (cfg.partner(), cfg.failover()) {
            (Some(partner), Some(timing)) => Some(ReplicationChannel::new(
                cfg.id(),
                partner,
                timing,
                cfg.link_delay(),
            )),
            _ => None,
        };
        let timeout = cfg
            .failover()
            .map(|f| f.failover_timeout)
            .unwrap_or_default();
        Self {
            leases: Leases::new(&cfg),
            scheduler: AdmissionScheduler::new(cfg.id(), cfg.link_delay()),
            failover: FailoverController::new(cfg.role(), timeout, Duration::ZERO),
            replication,
            counters: NodeCounters::default(),
            transitions: Vec::new(),
            cfg,
        }
    }

    pub fn name(&self) -> &str {
        self.cfg.name()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn state(&self) -> FailoverState {
        self.failover.state()
    }

    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    pub fn leases(&self) -> &Leases {
        &self.leases
    }

    pub fn leases_mut(&mut self) -> &mut Leases {
        &mut self.leases
    }

    pub fn replication(&self) -> Option<&ReplicationChannel> {
        self.replication.as_ref()
    }

    /// every failover state change so far, oldest first
    pub fn transitions(&self) -> &[failover_coordination::Transition] {
        &self.transitions
    }

    pub fn report(&self) -> NodeReport {
        let stats = self.leases.stats();
        let repl = self.replication.as_ref();
        NodeReport {
            name: self.cfg.name().to_owned(),
            id: self.cfg.id(),
            role: self.cfg.role(),
            state: self.state(),
            counters: self.counters,
            advertises_sent: stats.advertises_sent,
            replies_sent: stats.replies_sent,
            active_leases: self.leases.table().len(),
            mean_response_ms: stats.mean_response().map(|d| d.as_secs_f64() * 1000.0),
            pool_counters: self.leases.pool().counters(),
            syncs_sent: repl.map_or(0, |r| r.syncs_sent()),
            syncs_applied: repl.map_or(0, |r| r.syncs_applied()),
            heartbeats_sent: repl.map_or(0, |r| r.heartbeats_sent()),
        }
    }

    /// Client SOLICIT/REQUEST/RENEW, already known to be addressed to us.
    #[instrument(level = "debug", skip_all, fields(node = %self.cfg.name(), src = %src))]
    pub fn on_client_event(&mut self, src: NodeId, msg: ClientMsg, rt: &mut dyn Runtime) {
        if !self.failover.is_serving() {
            self.counters.dropped_inactive += 1;
            DROPPED_EVENTS.inactive.inc();
            trace!(state = %self.state(), "not active, dropping client event");
            return;
        }
        if let Some(addr) = msg.claimed_address() {
            if let Err(err) = self.leases.pool().pool_of(addr) {
                self.drop_malformed(&err);
                return;
            }
        }
        match &msg {
            ClientMsg::Solicit(_) => self.counters.solicits_seen += 1,
            ClientMsg::Request(_) => self.counters.requests_seen += 1,
            ClientMsg::Renew(_) => self.counters.renews_seen += 1,
        }
        self.scheduler.admit(src, msg, &mut self.leases, rt);
    }

    /// Snapshot from the partner.
    pub fn on_peer_sync(&mut self, src: NodeId, payload: SyncPayload) {
        let Some(repl) = self.replication.as_mut() else {
            debug!(%src, "sync received without a partner configured");
            return;
        };
        let (pool, table) = self.leases.parts_mut();
        if let Err(err) = repl.apply(src, &payload, pool, table) {
            self.drop_malformed(&err);
        }
    }

    /// Heartbeat from the partner.
    pub fn on_peer_heartbeat(&mut self, src: NodeId, rt: &mut dyn Runtime) {
        let Some(repl) = self.replication.as_ref() else {
            debug!(%src, "heartbeat received without a partner configured");
            return;
        };
        if let Err(err) = repl.accept_from(src) {
            self.drop_malformed(&err);
            return;
        }
        self.failover.on_heartbeat(rt.now());
    }

    /// Simulated crash: stop serving and drop every pending timer and queued
    /// event in one go.
    pub fn on_injected_failure(&mut self, rt: &mut dyn Runtime) {
        let was_serving = self.failover.is_serving();
        match self.failover.fail(rt.now()) {
            Ok(t) => self.transitions.push(t),
            Err(err) => {
                warn!(?err, node = %self.cfg.name(), "ignoring injected failure");
                return;
            }
        }
        if let Some(repl) = self.replication.as_mut() {
            repl.stop(rt);
        }
        let timers = rt.cancel_all(self.cfg.id());
        let queued = self.scheduler.clear();
        if was_serving {
            ACTIVE_NODES.dec();
        }
        info!(node = %self.cfg.name(), timers, queued, "node failed");
    }

    /// timer dispatch
    pub fn on_tick(&mut self, timer: Timer, rt: &mut dyn Runtime) {
        match timer {
            Timer::Drain(kind) => self.on_drain(kind, rt),
            Timer::Sync => {
                let payload = replication::snapshot(self.leases.pool(), self.leases.table());
                if let Some(repl) = self.replication.as_mut() {
                    if let Err(err) = repl.on_sync_timer(payload, rt) {
                        warn!(?err, "failed to send sync");
                    }
                }
            }
            Timer::Heartbeat => {
                if let Some(repl) = self.replication.as_mut() {
                    if let Err(err) = repl.on_heartbeat_timer(rt) {
                        warn!(?err, "failed to send heartbeat");
                    }
                }
            }
            Timer::Liveness => self.on_liveness(rt),
            Timer::InjectedFailure => self.on_injected_failure(rt),
            Timer::LeaseSweep => self.on_sweep(rt),
            Timer::DeviceStart | Timer::DeviceRetry | Timer::DeviceRenew => {
                warn!(?timer, node = %self.cfg.name(), "device timer fired on a server");
            }
        }
    }

    fn on_drain(&mut self, kind: QueueKind, rt: &mut dyn Runtime) {
        self.scheduler.on_drain(kind, &mut self.leases, rt);
    }

    fn on_liveness(&mut self, rt: &mut dyn Runtime) {
        let Some(repl) = self.replication.as_mut() else {
            return;
        };
        repl.on_liveness_timer(rt);
        match self.failover.check_liveness(rt.now()) {
            Ok(Some(t)) => {
                self.transitions.push(t);
                ACTIVE_NODES.inc();
                repl.stop_watching(rt);
                repl.start_emitting(rt);
            }
            Ok(None) => {}
            Err(err) => warn!(?err, "liveness check failed"),
        }
    }

    fn on_sweep(&mut self, rt: &mut dyn Runtime) {
        let Some(interval) = self.cfg.lease_expiry() else {
            return;
        };
        rt.schedule(self.cfg.id(), interval, Timer::LeaseSweep);
        let expired = self.leases.purge_expired(rt.now());
        if !expired.is_empty() {
            self.counters.leases_expired += expired.len() as u64;
            debug!(node = %self.cfg.name(), ?expired, remaining = self.leases.table().len(), "purged expired leases");
        }
    }

    fn drop_malformed(&mut self, err: &dyn std::fmt::Debug) {
        self.counters.dropped_malformed += 1;
        DROPPED_EVENTS.malformed.inc();
        warn!(?err, node = %self.cfg.name(), "dropping malformed input");
    }
}

impl Endpoint for ServerNode {
    fn id(&self) -> NodeId {
        self.cfg.id()
    }

    fn on_start(&mut self, rt: &mut dyn Runtime) {
        let now = rt.now();
        let timeout = self.failover.failover_timeout();
        self.failover = FailoverController::new(self.cfg.role(), timeout, now);

        if self.failover.is_serving() {
            ACTIVE_NODES.inc();
        }
        if let Some(repl) = self.replication.as_mut() {
            if self.failover.is_serving() {
                repl.start_emitting(rt);
            } else {
                repl.start_watching(rt);
            }
        }
        if let Some(at) = self.cfg.fail_at() {
            rt.schedule(self.cfg.id(), at.saturating_sub(now), Timer::InjectedFailure);
        }
        if let Some(interval) = self.cfg.lease_expiry() {
            rt.schedule(self.cfg.id(), interval, Timer::LeaseSweep);
        }

        let pools = self.cfg.pools();
        info!(
            node = %self.cfg.name(),
            id = %self.cfg.id(),
            role = ?self.cfg.role(),
            state = %self.state(),
            pc = %pools.get(PoolId::Pc),
            mobile = %pools.get(PoolId::Mobile),
            printer = %pools.get(PoolId::Printer),
            vip = %pools.get(PoolId::Vip),
            vip_lease = ?self.cfg.lease_time().get_vip(),
            normal_lease = ?self.cfg.lease_time().get_normal(),
            "server up"
        );
    }

    fn on_envelope(&mut self, env: &Envelope, rt: &mut dyn Runtime) {
        let me = self.cfg.id();
        if env.is_misrouted(me) {
            self.counters.dropped_misrouted += 1;
            DROPPED_EVENTS.misrouted.inc();
            trace!(src = %env.src(), dst = ?env.dst(), %me, "not for us");
            return;
        }
        if self.state().is_terminal() {
            self.counters.dropped_inactive += 1;
            DROPPED_EVENTS.inactive.inc();
            trace!(src = %env.src(), "node failed, dropping frame");
            return;
        }
        let msg = match env.to_msg() {
            Ok(msg) => msg,
            Err(err) => {
                metrics::record_undecodable();
                self.drop_malformed(&err);
                return;
            }
        };
        metrics::record_recv(&msg);
        let src = env.src();
        match msg {
            Message::Heartbeat => self.on_peer_heartbeat(src, rt),
            Message::Sync(payload) => self.on_peer_sync(src, payload),
            msg => match ClientMsg::from_message(msg) {
                Some(client) => self.on_client_event(src, client, rt),
                // another server's broadcast, nothing to do
                None => trace!(%src, "ignoring server-originated message"),
            },
        }
    }

    fn on_timer(&mut self, _id: TimerId, timer: Timer, rt: &mut dyn Runtime) {
        self.on_tick(timer, rt);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

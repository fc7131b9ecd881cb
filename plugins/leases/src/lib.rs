#![warn(
    missing_debug_implementations,
    // missing_docs, // we shall remove thee, someday!
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

use std::{net::Ipv6Addr, time::Duration};

use config::ServerConfig;
use duet_core::{
    anyhow::{anyhow, Context},
    msg::{Advertise, Renew, Reply, Request, Solicit},
    prelude::*,
    sim::QueueKind,
};
use ip_manager::{AddressPool, LeaseTable};

pub mod metrics;
pub mod queue;
pub mod scheduler;

pub use queue::{AdmissionQueue, PendingEvent, QueueState};
pub use scheduler::{AdmissionScheduler, DRAIN_STEP};

/// The client messages the admission queues accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMsg {
    Solicit(Solicit),
    Request(Request),
    Renew(Renew),
}

impl ClientMsg {
    /// `None` for anything a client does not send to a server
    pub fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Solicit(m) => Some(ClientMsg::Solicit(m)),
            Message::Request(m) => Some(ClientMsg::Request(m)),
            Message::Renew(m) => Some(ClientMsg::Renew(m)),
            _ => None,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            ClientMsg::Solicit(m) => m.priority,
            ClientMsg::Request(m) => m.priority,
            ClientMsg::Renew(m) => m.priority,
        }
    }

    pub fn queue(&self) -> QueueKind {
        match self {
            ClientMsg::Solicit(_) => QueueKind::Solicit,
            ClientMsg::Request(_) | ClientMsg::Renew(_) => QueueKind::Request,
        }
    }

    /// the address a REQUEST or RENEW wants committed
    pub fn claimed_address(&self) -> Option<Ipv6Addr> {
        match self {
            ClientMsg::Solicit(_) => None,
            ClientMsg::Request(m) => Some(m.offered_address),
            ClientMsg::Renew(m) => Some(m.current_address),
        }
    }
}

/// Per-event state handed to the handler
#[derive(Debug)]
pub struct LeaseContext {
    event: PendingEvent<ClientMsg>,
    response: Option<(Message, Duration)>,
}

impl LeaseContext {
    pub fn new(event: PendingEvent<ClientMsg>) -> Self {
        Self {
            event,
            response: None,
        }
    }

    pub fn event(&self) -> &PendingEvent<ClientMsg> {
        &self.event
    }

    /// send `msg` back to the event's source after `delay`
    pub fn set_response(&mut self, msg: Message, delay: Duration) {
        self.response = Some((msg, delay));
    }

    pub fn response(&self) -> Option<&(Message, Duration)> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<(Message, Duration)> {
        self.response.take()
    }
}

/// What the allocation handler has sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseStats {
    pub advertises_sent: u64,
    pub replies_sent: u64,
    /// summed SOLICIT response latency
    pub response_total: Duration,
    pub responses: u64,
}

impl LeaseStats {
    /// mean SOLICIT response latency (arrival to ADVERTISE emission)
    pub fn mean_response(&self) -> Option<Duration> {
        if self.responses == 0 {
            return None;
        }
        let nanos = self.response_total.as_nanos() / u128::from(self.responses);
        Some(u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos))
    }
}

/// Allocation handler: SOLICIT draws an address, REQUEST/RENEW commit one.
#[derive(Debug)]
pub struct Leases {
    server_id: NodeId,
    server_name: String,
    pool: AddressPool,
    table: LeaseTable,
    fast_delay: Duration,
    normal_delay: Duration,
    expiry: bool,
    stats: LeaseStats,
}

impl Leases {
    pub fn new(cfg: &ServerConfig) -> Self {
        Self {
            server_id: cfg.id(),
            server_name: cfg.name().to_owned(),
            pool: AddressPool::from_config(cfg),
            table: LeaseTable::new(),
            fast_delay: cfg.fast_delay(),
            normal_delay: cfg.normal_delay(),
            expiry: cfg.lease_expiry().is_some(),
            stats: LeaseStats::default(),
        }
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    pub fn table(&self) -> &LeaseTable {
        &self.table
    }

    /// both halves, for the replication merge
    pub fn parts_mut(&mut self) -> (&mut AddressPool, &mut LeaseTable) {
        (&mut self.pool, &mut self.table)
    }

    pub fn stats(&self) -> LeaseStats {
        self.stats
    }

    pub fn purge_expired(&mut self, now: Duration) -> Vec<(NodeId, Ipv6Addr)> {
        self.table.purge_expired(now)
    }

    fn delay_for(&self, pool: PoolId) -> Duration {
        match pool {
            PoolId::Vip => self.fast_delay,
            _ => self.normal_delay,
        }
    }

    fn solicit(&mut self, ctx: &mut LeaseContext, msg: &Solicit, now: Duration) -> Result<Action> {
        let pool = self.pool.classify(msg.device_type, msg.priority);
        let addr = self.pool.allocate(pool).context("refusing to advertise")?;
        let lease = self.pool.lease_duration(pool);
        let delay = self.delay_for(pool);

        let latency = now.saturating_sub(ctx.event().arrival) + delay;
        self.stats.response_total += latency;
        self.stats.responses += 1;
        self.stats.advertises_sent += 1;
        duet_core::metrics::RESPONSE_DURATION
            .with_label_values(&["advertise"])
            .observe(latency.as_secs_f64());
        metrics::ALLOCATIONS.with_label_values(&[pool.as_str()]).inc();

        debug!(src = %ctx.event().src, device_type = %msg.device_type, priority = msg.priority, %pool, %addr, "advertising");
        ctx.set_response(
            Message::Advertise(Advertise {
                offered_address: addr,
                priority: msg.priority,
                lease_seconds: Some(lease.as_secs()),
                server_id: self.server_id,
                server_name: self.server_name.clone(),
            }),
            delay,
        );
        Ok(Action::Respond)
    }

    fn commit(&mut self, ctx: &mut LeaseContext, addr: Ipv6Addr, now: Duration) -> Result<Action> {
        // validate before touching the table
        let pool = self
            .pool
            .pool_of(addr)
            .context("refusing to commit address")?;
        let lease = self.pool.lease_duration(pool);
        let device = ctx.event().src;
        let prev = if self.expiry {
            self.table.record_until(device, addr, now + lease)
        } else {
            self.table.record(device, addr)
        };
        if matches!(prev, Some(p) if p.address != addr) {
            debug!(%device, %addr, "device moved to a new address");
        }
        match ctx.event().payload {
            ClientMsg::Renew(_) => metrics::RENEWALS.inc(),
            _ => metrics::COMMITS.inc(),
        }

        let delay = self.delay_for(pool);
        let latency = now.saturating_sub(ctx.event().arrival) + delay;
        duet_core::metrics::RESPONSE_DURATION
            .with_label_values(&["reply"])
            .observe(latency.as_secs_f64());
        self.stats.replies_sent += 1;

        debug!(%device, %addr, %pool, leases = self.table.len(), "lease committed");
        ctx.set_response(
            Message::Reply(Reply {
                confirmed_address: addr,
                lease_seconds: Some(lease.as_secs()),
                server_name: self.server_name.clone(),
            }),
            delay,
        );
        Ok(Action::Respond)
    }
}

impl Handler<LeaseContext> for Leases {
    #[instrument(level = "debug", skip_all)]
    fn handle(&mut self, ctx: &mut LeaseContext, rt: &dyn Runtime) -> Result<Action> {
        let now = rt.now();
        match ctx.event().payload.clone() {
            ClientMsg::Solicit(msg) => self.solicit(ctx, &msg, now),
            msg => {
                let addr = msg
                    .claimed_address()
                    .ok_or_else(|| anyhow!("no address to commit"))?;
                self.commit(ctx, addr, now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use config::{LeaseTime, PoolPrefixes};
    use duet_core::{
        msg::{DeviceType, Envelope},
        sim::{Timer, TimerId},
    };
    use tracing_test::traced_test;

    use super::*;

    /// runtime that records instead of delivering
    #[derive(Debug, Default)]
    struct Recorder {
        now: Duration,
        timers: Vec<(Duration, Timer)>,
        sent: Vec<(Envelope, Duration)>,
    }

    impl Runtime for Recorder {
        fn now(&self) -> Duration {
            self.now
        }
        fn schedule(&mut self, _owner: NodeId, after: Duration, timer: Timer) -> TimerId {
            self.timers.push((self.now + after, timer));
            TimerId::default()
        }
        fn cancel(&mut self, _id: TimerId) -> bool {
            false
        }
        fn cancel_all(&mut self, _owner: NodeId) -> usize {
            0
        }
        fn send(&mut self, env: Envelope, delay: Duration) {
            self.sent.push((env, delay));
        }
    }

    impl Recorder {
        fn take_sent(&mut self) -> Vec<(NodeId, Message, Duration)> {
            self.sent
                .drain(..)
                .map(|(env, d)| (env.dst().unwrap(), env.to_msg().unwrap(), d))
                .collect()
        }

        /// fire the next pending drain step
        fn fire_drain(&mut self) -> QueueKind {
            let (at, timer) = self.timers.remove(0);
            self.now = at;
            match timer {
                Timer::Drain(kind) => kind,
                other => panic!("unexpected timer {other:?}"),
            }
        }
    }

    fn server(cutoff: i32) -> ServerConfig {
        let prefixes = PoolPrefixes::new(
            "2001:db8:1::/64".parse().unwrap(),
            "2001:db8:2::/64".parse().unwrap(),
            "2001:db8:3::/64".parse().unwrap(),
            "2001:db8:f::/64".parse().unwrap(),
        )
        .unwrap();
        ServerConfig::standalone("dhcp-a", NodeId(1), prefixes)
            .with_vip_priority_cutoff(cutoff)
            .with_delays(Duration::from_millis(10), Duration::from_millis(50))
            .with_lease_time(LeaseTime::new(
                Duration::from_secs(7200),
                Duration::from_secs(3600),
            ))
    }

    fn solicit(device_type: DeviceType, priority: i32) -> ClientMsg {
        ClientMsg::Solicit(Solicit {
            device_type,
            priority,
        })
    }

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    #[traced_test]
    fn vip_solicit_gets_vip_address_fast() {
        let cfg = server(9);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        sched.admit(NodeId(20), solicit(DeviceType::Pc, 9), &mut leases, &mut rt);
        let sent = rt.take_sent();
        assert_eq!(sent.len(), 1);
        let (dst, msg, delay) = &sent[0];
        assert_eq!(*dst, NodeId(20));
        assert_eq!(*delay, Duration::from_millis(10));
        match msg {
            Message::Advertise(adv) => {
                assert_eq!(adv.offered_address, addr("2001:db8:f::1"));
                assert_eq!(adv.lease_seconds, Some(7200));
                assert_eq!(adv.priority, 9);
                assert_eq!(adv.server_name, "dhcp-a");
            }
            other => panic!("expected ADVERTISE, got {other:?}"),
        }
        assert_eq!(leases.stats().mean_response(), Some(Duration::from_millis(10)));
        assert!(logs_contain("advertising"));
        // the step holds the queue until its drain fires
        assert_eq!(sched.queue(QueueKind::Solicit).state(), QueueState::Processing);
        let kind = rt.fire_drain();
        sched.on_drain(kind, &mut leases, &mut rt);
        assert!(rt.timers.is_empty());
        assert_eq!(sched.queue(QueueKind::Solicit).state(), QueueState::Idle);
    }

    #[test]
    fn two_pc_solicits_get_consecutive_counters() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        sched.admit(NodeId(20), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        sched.admit(NodeId(21), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        // second one waits for the drain step
        assert_eq!(rt.sent.len(), 1);
        let kind = rt.fire_drain();
        assert_eq!(rt.now, DRAIN_STEP);
        sched.on_drain(kind, &mut leases, &mut rt);

        let offered = rt
            .take_sent()
            .into_iter()
            .map(|(dst, msg, delay)| match msg {
                Message::Advertise(a) => {
                    assert_eq!(delay, Duration::from_millis(50));
                    (dst, a.offered_address)
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(
            offered,
            [
                (NodeId(20), addr("2001:db8:1::1")),
                (NodeId(21), addr("2001:db8:1::2"))
            ]
        );
        assert_eq!(leases.pool().next_counter(PoolId::Pc), 3);
        // the second waited one drain step
        let mean = leases.stats().mean_response().unwrap();
        assert_eq!(mean, Duration::from_millis(50) + DRAIN_STEP / 2);
    }

    #[test]
    fn priority_decides_between_queued_events() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        // first arrival is handled at once, the rest wait for the drain step
        sched.admit(NodeId(20), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        sched.admit(NodeId(30), solicit(DeviceType::Mobile, 2), &mut leases, &mut rt);
        sched.admit(NodeId(31), solicit(DeviceType::Printer, 5), &mut leases, &mut rt);
        sched.admit(NodeId(32), solicit(DeviceType::Mobile, 2), &mut leases, &mut rt);
        rt.take_sent();

        let mut order = Vec::new();
        while !rt.timers.is_empty() {
            let kind = rt.fire_drain();
            sched.on_drain(kind, &mut leases, &mut rt);
            order.extend(rt.take_sent().into_iter().map(|(dst, ..)| dst));
        }
        assert_eq!(order, [NodeId(31), NodeId(30), NodeId(32)]);
    }

    #[test]
    fn queues_are_independent() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        sched.admit(NodeId(20), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        sched.admit(NodeId(21), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        // the request queue is idle, so this is handled right away
        let req = ClientMsg::Request(Request {
            offered_address: addr("2001:db8:1::1"),
            priority: 1,
        });
        sched.admit(NodeId(20), req, &mut leases, &mut rt);
        let sent = rt.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[1].1, Message::Reply(_)));
        assert_eq!(leases.table().get(NodeId(20)).unwrap().address, addr("2001:db8:1::1"));
    }

    #[test]
    fn request_commits_and_classifies_by_address() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::from_millis(1));
        let mut rt = Recorder::default();

        let req = ClientMsg::Request(Request {
            offered_address: addr("2001:db8:f::3"),
            priority: 1,
        });
        sched.admit(NodeId(40), req, &mut leases, &mut rt);
        let (_, msg, delay) = rt.take_sent().remove(0);
        // vip address, fast delay plus link delay
        assert_eq!(delay, Duration::from_millis(11));
        match msg {
            Message::Reply(r) => {
                assert_eq!(r.confirmed_address, addr("2001:db8:f::3"));
                assert_eq!(r.lease_seconds, Some(7200));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(leases.stats().replies_sent, 1);
        // latency is only tracked for SOLICIT
        assert_eq!(leases.stats().mean_response(), None);
    }

    #[test]
    #[traced_test]
    fn unpooled_request_is_dropped_without_mutation() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        let req = ClientMsg::Renew(Renew {
            current_address: addr("fd00::1"),
            priority: 1,
        });
        sched.admit(NodeId(40), req, &mut leases, &mut rt);
        assert!(rt.sent.is_empty());
        assert!(leases.table().is_empty());
        assert!(logs_contain("dropping event"));
        let kind = rt.fire_drain();
        assert_eq!(kind, QueueKind::Request);
        sched.on_drain(kind, &mut leases, &mut rt);
        assert_eq!(sched.queue(QueueKind::Request).state(), QueueState::Idle);
    }

    #[test]
    fn mean_response_past_u32_responses() {
        let stats = LeaseStats {
            response_total: Duration::from_millis(3) * 1_000_000,
            responses: u64::from(u32::MAX) + 1,
            ..LeaseStats::default()
        };
        // 3000 s over 2^32 responses
        assert_eq!(stats.mean_response(), Some(Duration::from_nanos(698)));
        assert_eq!(LeaseStats::default().mean_response(), None);
    }

    #[test]
    #[traced_test]
    fn exhausted_pool_sends_no_advertise() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();

        // a partner counter at the very top of the range
        let (pool, _) = leases.parts_mut();
        pool.merge_counters(&PoolCounters {
            pc: u64::MAX,
            ..PoolCounters::default()
        });
        sched.admit(NodeId(20), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        assert!(rt.sent.is_empty());
        assert!(logs_contain("dropping event"));
        assert_eq!(leases.pool().next_counter(PoolId::Pc), u64::MAX);
        assert_eq!(leases.stats().advertises_sent, 0);

        // the other pools still serve
        let kind = rt.fire_drain();
        sched.on_drain(kind, &mut leases, &mut rt);
        sched.admit(NodeId(21), solicit(DeviceType::Mobile, 1), &mut leases, &mut rt);
        let sent = rt.take_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].1, Message::Advertise(a) if a.offered_address == addr("2001:db8:2::1")));
    }

    #[test]
    fn expiry_sets_lease_end() {
        let cfg = server(8).with_lease_expiry(Some(Duration::from_secs(30)));
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder {
            now: Duration::from_secs(100),
            ..Default::default()
        };
        let req = ClientMsg::Request(Request {
            offered_address: addr("2001:db8:2::9"),
            priority: 1,
        });
        sched.admit(NodeId(41), req, &mut leases, &mut rt);
        assert_eq!(
            leases.table().get(NodeId(41)).unwrap().expires_at,
            Some(Duration::from_secs(3700))
        );
        assert_eq!(leases.purge_expired(Duration::from_secs(3700)).len(), 1);
    }

    #[test]
    fn clear_discards_queued_events() {
        let cfg = server(8);
        let mut leases = Leases::new(&cfg);
        let mut sched = AdmissionScheduler::new(cfg.id(), Duration::ZERO);
        let mut rt = Recorder::default();
        for id in 20..24 {
            sched.admit(NodeId(id), solicit(DeviceType::Pc, 1), &mut leases, &mut rt);
        }
        assert_eq!(sched.clear(), 3);
        assert_eq!(sched.queue(QueueKind::Solicit).state(), QueueState::Idle);
    }
}

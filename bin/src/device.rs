//! A simulated client.
//!
//! Boots at its configured start time, broadcasts a SOLICIT, requests the
//! first address it is offered from the server that offered it, and is done
//! once a REPLY arrives. With a retry policy it re-solicits when no REPLY
//! shows up in time, which is how it finds the backup after the primary dies.
use std::any::Any;

use config::DeviceConfig;
use duet_core::{
    metrics,
    msg::{Advertise, Renew, Reply, Request, Solicit},
    prelude::*,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// not booted yet
    Init,
    Soliciting,
    Requesting { server: NodeId },
    Bound { server: NodeId },
    Renewing { server: NodeId },
    /// ran out of retries
    GaveUp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub solicits_sent: u64,
    pub advertises_received: u64,
    pub requests_sent: u64,
    pub replies_received: u64,
    pub renews_sent: u64,
    pub retries: u32,
}

/// End-of-run view of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub name: String,
    pub id: NodeId,
    pub device_type: DeviceType,
    pub priority: i32,
    #[serde(flatten)]
    pub stats: DeviceStats,
    pub address: Option<Ipv6Addr>,
    pub server_name: Option<String>,
    pub completed: bool,
}

#[derive(Debug)]
pub struct Device {
    cfg: DeviceConfig,
    link_delay: Duration,
    state: DeviceState,
    stats: DeviceStats,
    address: Option<Ipv6Addr>,
    server_name: Option<String>,
    completed_at: Option<Duration>,
    retry_timer: Option<TimerId>,
    // retries since the last REPLY
    attempts: u32,
}

impl Device {
    pub fn new(cfg: DeviceConfig, link_delay: Duration) -> Self {
        Self {
            cfg,
            link_delay,
            state: DeviceState::Init,
            stats: DeviceStats::default(),
            address: None,
            server_name: None,
            completed_at: None,
            retry_timer: None,
            attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn address(&self) -> Option<Ipv6Addr> {
        self.address
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// logical time of the first REPLY
    pub fn completed_at(&self) -> Option<Duration> {
        self.completed_at
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn report(&self) -> DeviceReport {
        DeviceReport {
            name: self.cfg.name.clone(),
            id: self.cfg.id,
            device_type: self.cfg.device_type,
            priority: self.cfg.priority,
            stats: self.stats,
            address: self.address,
            server_name: self.server_name.clone(),
            completed: self.is_completed(),
        }
    }

    fn send(&self, dst: Option<NodeId>, msg: Message, rt: &mut dyn Runtime) {
        match Envelope::from_msg(self.cfg.id, dst, &msg) {
            Ok(env) => {
                metrics::record_sent(&msg);
                rt.send(env, self.link_delay);
            }
            Err(err) => warn!(?err, device = %self.cfg.name, "failed to encode"),
        }
    }

    fn solicit(&mut self, rt: &mut dyn Runtime) {
        let msg = Message::Solicit(Solicit {
            device_type: self.cfg.device_type,
            priority: self.cfg.priority,
        });
        self.send(None, msg, rt);
        self.stats.solicits_sent += 1;
        self.state = DeviceState::Soliciting;
        self.arm_retry(rt);
        info!(device = %self.cfg.name, device_type = %self.cfg.device_type, priority = self.cfg.priority, "sent SOLICIT");
    }

    fn arm_retry(&mut self, rt: &mut dyn Runtime) {
        if let Some(id) = self.retry_timer.take() {
            rt.cancel(id);
        }
        if let Some(retry) = self.cfg.retry {
            self.retry_timer = Some(rt.schedule(self.cfg.id, retry.after, Timer::DeviceRetry));
        }
    }

    fn on_advertise(&mut self, adv: Advertise, rt: &mut dyn Runtime) {
        self.stats.advertises_received += 1;
        if matches!(self.state, DeviceState::Bound { .. } | DeviceState::Renewing { .. }) {
            debug!(device = %self.cfg.name, from = %adv.server_name, "already bound, ignoring ADVERTISE");
            return;
        }
        // the REQUEST goes to whoever made the offer
        let server = adv.server_id;
        info!(device = %self.cfg.name, offer = %adv.offered_address, from = %adv.server_name, lease_seconds = ?adv.lease_seconds, "received ADVERTISE");
        let msg = Message::Request(Request {
            offered_address: adv.offered_address,
            priority: self.cfg.priority,
        });
        self.send(Some(server), msg, rt);
        self.stats.requests_sent += 1;
        self.state = DeviceState::Requesting { server };
    }

    fn on_reply(&mut self, src: NodeId, reply: Reply, rt: &mut dyn Runtime) {
        self.stats.replies_received += 1;
        let server = match self.state {
            DeviceState::Requesting { server } | DeviceState::Renewing { server } => server,
            _ => src,
        };
        if let Some(id) = self.retry_timer.take() {
            rt.cancel(id);
        }
        self.attempts = 0;
        self.address = Some(reply.confirmed_address);
        self.server_name = Some(reply.server_name.clone());
        self.state = DeviceState::Bound { server };
        if self.completed_at.is_none() {
            self.completed_at = Some(rt.now());
        }
        info!(device = %self.cfg.name, addr = %reply.confirmed_address, from = %reply.server_name, "configured address");

        if let (true, Some(secs)) = (self.cfg.renew, reply.lease_seconds) {
            let after = config::renew(Duration::from_secs(secs));
            rt.schedule(self.cfg.id, after, Timer::DeviceRenew);
            debug!(device = %self.cfg.name, ?after, "renew scheduled");
        }
    }

    fn renew(&mut self, rt: &mut dyn Runtime) {
        let (DeviceState::Bound { server }, Some(addr)) = (self.state, self.address) else {
            return;
        };
        let msg = Message::Renew(Renew {
            current_address: addr,
            priority: self.cfg.priority,
        });
        self.send(Some(server), msg, rt);
        self.stats.renews_sent += 1;
        self.state = DeviceState::Renewing { server };
        self.arm_retry(rt);
        debug!(device = %self.cfg.name, %addr, %server, "sent RENEW");
    }

    fn retry(&mut self, rt: &mut dyn Runtime) {
        self.retry_timer = None;
        let Some(policy) = self.cfg.retry else {
            return;
        };
        if matches!(self.state, DeviceState::Bound { .. }) {
            return;
        }
        if self.attempts >= policy.max_retries {
            warn!(device = %self.cfg.name, retries = self.attempts, "no REPLY, giving up");
            self.state = DeviceState::GaveUp;
            return;
        }
        self.attempts += 1;
        self.stats.retries += 1;
        info!(device = %self.cfg.name, attempt = self.attempts, "no REPLY, soliciting again");
        self.solicit(rt);
    }
}

impl Endpoint for Device {
    fn id(&self) -> NodeId {
        self.cfg.id
    }

    fn on_start(&mut self, rt: &mut dyn Runtime) {
        let after = self.cfg.start_at.saturating_sub(rt.now());
        rt.schedule(self.cfg.id, after, Timer::DeviceStart);
        debug!(device = %self.cfg.name, start_at = ?self.cfg.start_at, "device ready");
    }

    fn on_envelope(&mut self, env: &Envelope, rt: &mut dyn Runtime) {
        // broadcast SOLICITs and partner traffic reach us too
        if env.is_misrouted(self.cfg.id) {
            return;
        }
        let msg = match env.to_msg() {
            Ok(msg) => msg,
            Err(err) => {
                metrics::record_undecodable();
                warn!(?err, device = %self.cfg.name, "dropping malformed frame");
                return;
            }
        };
        if matches!(msg, Message::Advertise(_) | Message::Reply(_)) {
            metrics::record_recv(&msg);
        }
        match msg {
            Message::Advertise(adv) => self.on_advertise(adv, rt),
            Message::Reply(reply) => self.on_reply(env.src(), reply, rt),
            _ => {}
        }
    }

    fn on_timer(&mut self, _id: TimerId, timer: Timer, rt: &mut dyn Runtime) {
        match timer {
            Timer::DeviceStart => self.solicit(rt),
            Timer::DeviceRetry => self.retry(rt),
            Timer::DeviceRenew => self.renew(rt),
            other => warn!(?other, device = %self.cfg.name, "unexpected timer"),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

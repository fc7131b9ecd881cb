//! Logical clock, timers and the message fabric.
//!
//! Everything a node needs from its environment goes through [`Runtime`]:
//! the current logical time, one-shot timers, and message delivery with a
//! propagation delay. [`World`] is the deterministic in-process implementation
//! that drives a set of [`Endpoint`]s; [`paced`] runs a `World` against the
//! wall clock on tokio.
use std::{any::Any, fmt, time::Duration};

use crate::msg::{Envelope, NodeId};

pub mod paced;
mod world;

pub use world::World;

/// Handle to a scheduled timer, used to cancel it
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Which queue a deferred drain step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// SOLICIT class
    Solicit,
    /// REQUEST/RENEW class
    Request,
}

/// What a timer means to its owner when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// pop the next entry of an admission queue
    Drain(QueueKind),
    /// push a state snapshot to the partner
    Sync,
    /// tell the partner we are alive
    Heartbeat,
    /// check how long ago the partner was heard from
    Liveness,
    /// simulated crash
    InjectedFailure,
    /// purge expired leases
    LeaseSweep,
    /// device boots and solicits
    DeviceStart,
    /// device gave up waiting for a REPLY
    DeviceRetry,
    /// device renews its lease
    DeviceRenew,
}

/// Services the engine consumes from its environment.
pub trait Runtime {
    /// monotonic logical time since the start of the run
    fn now(&self) -> Duration;

    /// schedule `timer` for `owner`, `after` from now
    fn schedule(&mut self, owner: NodeId, after: Duration, timer: Timer) -> TimerId;

    /// cancel a pending timer. Returns false if it already fired or was cancelled
    fn cancel(&mut self, id: TimerId) -> bool;

    /// cancel every pending timer `owner` has, returning how many were dropped
    fn cancel_all(&mut self, owner: NodeId) -> usize;

    /// deliver `env` after `delay`. A `None` destination reaches every other endpoint
    fn send(&mut self, env: Envelope, delay: Duration);
}

/// Something attached to the fabric: a server node or a client device
pub trait Endpoint: Any + Send {
    /// this endpoint's address on the fabric
    fn id(&self) -> NodeId;

    /// called once, at the logical time the endpoint was added
    fn on_start(&mut self, rt: &mut dyn Runtime);

    /// a message arrived
    fn on_envelope(&mut self, env: &Envelope, rt: &mut dyn Runtime);

    /// one of our timers fired
    fn on_timer(&mut self, id: TimerId, timer: Timer, rt: &mut dyn Runtime);

    /// for downcasting in reports and tests
    fn as_any(&self) -> &dyn Any;

    /// for downcasting in tests
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap},
    fmt,
    time::Duration,
};

use anyhow::{bail, Result};
use tracing::trace;

use super::{Endpoint, Runtime, Timer, TimerId};
use crate::msg::{Envelope, NodeId};

#[derive(Debug)]
enum Event {
    Start(NodeId),
    Deliver { to: NodeId, env: Envelope },
    Timer { owner: NodeId, id: TimerId, timer: Timer },
}

#[derive(Debug)]
struct Scheduled {
    time: Duration,
    // scheduling order, breaks ties between events at the same time
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // max heap: earliest time, then lowest seq, is the greatest
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// the half of the world handed to endpoints as their `Runtime`
#[derive(Debug, Default)]
struct Scheduler {
    now: Duration,
    seq: u64,
    next_timer: u64,
    heap: BinaryHeap<Scheduled>,
    pending: HashMap<TimerId, NodeId>,
    members: BTreeSet<NodeId>,
    isolated: BTreeSet<NodeId>,
}

impl Scheduler {
    fn push(&mut self, time: Duration, event: Event) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Scheduled { time, seq, event });
    }
}

impl Runtime for Scheduler {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, owner: NodeId, after: Duration, timer: Timer) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.pending.insert(id, owner);
        self.push(self.now + after, Event::Timer { owner, id, timer });
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    fn cancel_all(&mut self, owner: NodeId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, o| *o != owner);
        before - self.pending.len()
    }

    fn send(&mut self, env: Envelope, delay: Duration) {
        // shared medium: every endpoint but the sender hears the frame and
        // checks the destination header itself
        let at = self.now + delay;
        let targets = self
            .members
            .iter()
            .copied()
            .filter(|id| *id != env.src())
            .collect::<Vec<_>>();
        for to in targets {
            self.push(
                at,
                Event::Deliver {
                    to,
                    env: env.clone(),
                },
            );
        }
    }
}

/// Deterministic discrete-event world. Events are processed in
/// `(time, scheduling order)` order; nothing here reads the wall clock.
#[derive(Default)]
pub struct World {
    endpoints: BTreeMap<NodeId, Box<dyn Endpoint>>,
    sched: Scheduler,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("now", &self.sched.now)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("queued", &self.sched.heap.len())
            .finish()
    }
}

impl World {
    /// empty world at logical time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint. Its `on_start` runs at the current logical time.
    pub fn add<E: Endpoint>(&mut self, ep: E) -> Result<NodeId> {
        let id = ep.id();
        if self.endpoints.contains_key(&id) {
            bail!("endpoint {id} already attached");
        }
        self.endpoints.insert(id, Box::new(ep));
        self.sched.members.insert(id);
        let now = self.sched.now;
        self.sched.push(now, Event::Start(id));
        Ok(id)
    }

    /// current logical time
    pub fn now(&self) -> Duration {
        self.sched.now
    }

    /// time of the next queued event, if any
    pub fn next_event_time(&self) -> Option<Duration> {
        self.sched.heap.peek().map(|s| s.time)
    }

    /// Process the next event. Returns its time, or `None` if nothing is queued
    pub fn step(&mut self) -> Option<Duration> {
        let Scheduled { time, event, .. } = self.sched.heap.pop()?;
        self.sched.now = self.sched.now.max(time);
        match event {
            Event::Start(id) => {
                if let Some(ep) = self.endpoints.get_mut(&id) {
                    ep.on_start(&mut self.sched);
                }
            }
            Event::Deliver { to, env } => {
                if self.sched.isolated.contains(&to) || self.sched.isolated.contains(&env.src()) {
                    trace!(src = %env.src(), %to, "link down, frame lost");
                } else if let Some(ep) = self.endpoints.get_mut(&to) {
                    ep.on_envelope(&env, &mut self.sched);
                }
            }
            Event::Timer { owner, id, timer } => {
                // cancelled timers stay in the heap and are skipped here
                if self.sched.pending.remove(&id).is_some() {
                    if let Some(ep) = self.endpoints.get_mut(&owner) {
                        trace!(%owner, %id, ?timer, "timer fired");
                        ep.on_timer(id, timer, &mut self.sched);
                    }
                }
            }
        }
        Some(time)
    }

    /// Process every event up to and including `deadline`, then advance the
    /// clock to `deadline`. Returns the number of events processed.
    pub fn run_until(&mut self, deadline: Duration) -> usize {
        let mut n = 0;
        while matches!(self.next_event_time(), Some(t) if t <= deadline) {
            self.step();
            n += 1;
        }
        self.sched.now = self.sched.now.max(deadline);
        n
    }

    /// inject a frame from outside, e.g. a scripted client
    pub fn post(&mut self, env: Envelope, delay: Duration) {
        self.sched.send(env, delay);
    }

    /// drop every frame to or from `id` until [`World::heal`]
    pub fn isolate(&mut self, id: NodeId) {
        self.sched.isolated.insert(id);
    }

    /// restore links of an isolated endpoint
    pub fn heal(&mut self, id: NodeId) {
        self.sched.isolated.remove(&id);
    }

    /// number of live timers owned by `owner`
    pub fn pending_timers(&self, owner: NodeId) -> usize {
        self.sched.pending.values().filter(|o| **o == owner).count()
    }

    /// all attached endpoints, ordered by id
    pub fn endpoints(&self) -> impl Iterator<Item = &dyn Endpoint> + '_ {
        self.endpoints.values().map(|ep| ep.as_ref())
    }

    /// borrow an endpoint as its concrete type
    pub fn endpoint<T: Endpoint>(&self, id: NodeId) -> Option<&T> {
        self.endpoints.get(&id)?.as_any().downcast_ref::<T>()
    }

    /// mutably borrow an endpoint as its concrete type
    pub fn endpoint_mut<T: Endpoint>(&mut self, id: NodeId) -> Option<&mut T> {
        self.endpoints.get_mut(&id)?.as_any_mut().downcast_mut::<T>()
    }
}

//! Two independent admission queues (SOLICIT class and REQUEST/RENEW class)
//! feeding a [`Handler`] one event at a time.
use std::time::Duration;

use duet_core::{
    handler::{Action, Handler},
    metrics,
    msg::{Envelope, NodeId},
    sim::{QueueKind, Runtime, Timer},
};
use tracing::{debug, trace, warn};

use crate::{
    ClientMsg, LeaseContext,
    metrics::{HANDLER_ERRORS, QUEUE_DEPTH},
    queue::{AdmissionQueue, QueueState},
};

/// Gap between two pops of the same queue.
///
/// The drain is scheduled after every handled event, even when the queue is
/// already empty, so the queue only returns to idle once the gap has passed.
/// Returning to idle straight away would hand each arrival to the handler on
/// its own and the queue would never hold two events to order by priority.
pub const DRAIN_STEP: Duration = Duration::from_micros(10);

#[derive(Debug)]
pub struct AdmissionScheduler {
    me: NodeId,
    link_delay: Duration,
    solicit: AdmissionQueue<ClientMsg>,
    request: AdmissionQueue<ClientMsg>,
}

impl AdmissionScheduler {
    pub fn new(me: NodeId, link_delay: Duration) -> Self {
        Self {
            me,
            link_delay,
            solicit: AdmissionQueue::new(QueueKind::Solicit),
            request: AdmissionQueue::new(QueueKind::Request),
        }
    }

    pub fn queue(&self, kind: QueueKind) -> &AdmissionQueue<ClientMsg> {
        match kind {
            QueueKind::Solicit => &self.solicit,
            QueueKind::Request => &self.request,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut AdmissionQueue<ClientMsg> {
        match kind {
            QueueKind::Solicit => &mut self.solicit,
            QueueKind::Request => &mut self.request,
        }
    }

    /// Enqueue a client event. If its queue is idle the head is handled now.
    pub fn admit<H>(&mut self, src: NodeId, msg: ClientMsg, handler: &mut H, rt: &mut dyn Runtime)
    where
        H: Handler<LeaseContext>,
    {
        let kind = msg.queue();
        let now = rt.now();
        let queue = self.queue_mut(kind);
        queue.push(src, msg.priority(), now, msg);
        let idle = queue.state() == QueueState::Idle;
        set_depth(kind, queue.len());
        if idle {
            self.process_next(kind, handler, rt);
        } else {
            trace!(?kind, depth = self.queue(kind).len(), "queued behind in-flight step");
        }
    }

    /// The deferred drain step for `kind` fired: the previous step is over.
    pub fn on_drain<H>(&mut self, kind: QueueKind, handler: &mut H, rt: &mut dyn Runtime)
    where
        H: Handler<LeaseContext>,
    {
        self.process_next(kind, handler, rt);
    }

    /// Drop everything queued. Returns how many events were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.solicit.clear() + self.request.clear();
        set_depth(QueueKind::Solicit, 0);
        set_depth(QueueKind::Request, 0);
        n
    }

    fn process_next<H>(&mut self, kind: QueueKind, handler: &mut H, rt: &mut dyn Runtime)
    where
        H: Handler<LeaseContext>,
    {
        let Some(event) = self.queue_mut(kind).pop() else {
            self.queue_mut(kind).set_state(QueueState::Idle);
            return;
        };
        self.queue_mut(kind).set_state(QueueState::Processing);

        let mut ctx = LeaseContext::new(event);
        match handler.handle(&mut ctx, &*rt) {
            Ok(Action::Respond) => self.respond(&mut ctx, rt),
            Ok(Action::NoResponse) => {
                debug!(src = %ctx.event().src, "handler chose not to respond");
            }
            Err(err) => {
                HANDLER_ERRORS.inc();
                warn!(?err, src = %ctx.event().src, "dropping event");
            }
        }

        // the step occupies the queue until the drain fires, arrivals in between
        // are ordered by priority
        set_depth(kind, self.queue(kind).len());
        rt.schedule(self.me, DRAIN_STEP, Timer::Drain(kind));
    }

    fn respond(&self, ctx: &mut LeaseContext, rt: &mut dyn Runtime) {
        let dst = ctx.event().src;
        let Some((msg, delay)) = ctx.take_response() else {
            warn!(%dst, "handler asked to respond without a response");
            return;
        };
        match Envelope::from_msg(self.me, Some(dst), &msg) {
            Ok(env) => {
                metrics::record_sent(&msg);
                rt.send(env, delay + self.link_delay);
            }
            Err(err) => warn!(?err, "failed to encode response"),
        }
    }
}

fn set_depth(kind: QueueKind, depth: usize) {
    let label = match kind {
        QueueKind::Solicit => "solicit",
        QueueKind::Request => "request",
    };
    QUEUE_DEPTH.with_label_values(&[label]).set(depth as i64);
}

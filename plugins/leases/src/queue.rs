//! One admission queue: a priority heap plus its `IDLE -> PROCESSING -> IDLE`
//! machine.
use std::{cmp::Ordering, collections::BinaryHeap, time::Duration};

use duet_core::{msg::NodeId, sim::QueueKind};

/// A client event waiting for its turn
#[derive(Debug, Clone)]
pub struct PendingEvent<T> {
    pub payload: T,
    pub src: NodeId,
    pub priority: i32,
    pub arrival: Duration,
    // admission order within this queue
    seq: u64,
}

impl<T> PendingEvent<T> {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<T> PartialEq for PendingEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for PendingEvent<T> {}

impl<T> PartialOrd for PendingEvent<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PendingEvent<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // max heap: highest priority, then earliest arrival, then first admitted
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    /// an event is being handled or a deferred drain step is pending
    Processing,
}

#[derive(Debug)]
pub struct AdmissionQueue<T> {
    kind: QueueKind,
    heap: BinaryHeap<PendingEvent<T>>,
    state: QueueState,
    next_seq: u64,
}

impl<T> AdmissionQueue<T> {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            heap: BinaryHeap::new(),
            state: QueueState::Idle,
            next_seq: 0,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn set_state(&mut self, state: QueueState) {
        self.state = state;
    }

    pub fn push(&mut self, src: NodeId, priority: i32, arrival: Duration, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PendingEvent {
            payload,
            src,
            priority,
            arrival,
            seq,
        });
    }

    /// highest priority, oldest entry
    pub fn pop(&mut self) -> Option<PendingEvent<T>> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// drop everything queued and go idle, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        self.state = QueueState::Idle;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(q: &mut AdmissionQueue<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| q.pop()).map(|e| e.payload).collect()
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut q = AdmissionQueue::new(QueueKind::Solicit);
        q.push(NodeId(1), 3, Duration::from_millis(10), "a");
        q.push(NodeId(2), 3, Duration::from_millis(11), "b");
        assert_eq!(drain(&mut q), ["a", "b"]);
    }

    #[test]
    fn simultaneous_arrivals_keep_admission_order() {
        let mut q = AdmissionQueue::new(QueueKind::Request);
        for name in ["a", "b", "c", "d"] {
            q.push(NodeId(1), 1, Duration::from_millis(5), name);
        }
        assert_eq!(drain(&mut q), ["a", "b", "c", "d"]);
    }

    #[test]
    fn higher_priority_jumps_ahead() {
        let mut q = AdmissionQueue::new(QueueKind::Solicit);
        q.push(NodeId(1), 1, Duration::from_millis(1), "low-early");
        q.push(NodeId(2), 5, Duration::from_millis(2), "mid");
        q.push(NodeId(3), 9, Duration::from_millis(3), "high-late");
        q.push(NodeId(4), 5, Duration::from_millis(1), "mid-early");
        assert_eq!(drain(&mut q), ["high-late", "mid-early", "mid", "low-early"]);
    }

    #[test]
    fn clear_goes_idle() {
        let mut q = AdmissionQueue::new(QueueKind::Solicit);
        q.push(NodeId(1), 1, Duration::ZERO, "a");
        q.set_state(QueueState::Processing);
        assert_eq!(q.clear(), 1);
        assert_eq!(q.state(), QueueState::Idle);
        assert!(q.is_empty());
    }
}

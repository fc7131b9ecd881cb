//! Handlers process one dequeued client event at a time by implementing
//! [`Handler`].
use anyhow::Result;

use crate::sim::Runtime;

/// What the node does after the handler returns
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Action {
    /// Send the response the handler left in its context
    Respond,
    /// Don't respond
    NoResponse,
}

/// Mutates a per-event context `C` and decides whether to respond.
///
/// Handlers run to completion on the node's single logical thread. An `Err`
/// drops the event; nothing partially applied is rolled back, so handlers
/// must validate before they mutate.
pub trait Handler<C>: Send + 'static {
    /// what to do with this event
    fn handle(&mut self, ctx: &mut C, rt: &dyn Runtime) -> Result<Action>;
}

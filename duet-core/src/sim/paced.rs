//! Runs a [`World`] against the wall clock.
//!
//! Each event is processed no earlier than `start + event_time / speed`. The
//! logical schedule is identical to running the world flat out; only the
//! observed timing changes.
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::World;

/// How a paced run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// reached the requested logical deadline
    Deadline(Duration),
    /// the token was cancelled first, at this logical time
    Cancelled(Duration),
}

/// Drive `world` until logical `until` or until `token` is cancelled.
/// `speed` scales logical time to wall time (2.0 runs twice as fast).
pub async fn run(world: &mut World, until: Duration, speed: f64, token: CancellationToken) -> Finish {
    let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
    let origin = world.now();
    let start = Instant::now();
    let wall = |t: Duration| start + (t.saturating_sub(origin)).div_f64(speed);

    loop {
        let next = match world.next_event_time() {
            Some(t) if t <= until => t,
            _ => until,
        };
        tokio::select! {
            _ = token.cancelled() => {
                info!(now = ?world.now(), "paced run cancelled");
                return Finish::Cancelled(world.now());
            }
            _ = time::sleep_until(wall(next)) => {
                if matches!(world.next_event_time(), Some(t) if t <= until) {
                    world.step();
                } else {
                    world.run_until(until);
                    debug!(?until, "paced run reached deadline");
                    return Finish::Deadline(until);
                }
            }
        }
    }
}

//! The failover state machine.
//!
//! ```text
//! STANDBY_PASSIVE --partner_timeout--> ACTIVE
//! STANDBY_PASSIVE --injected_failure-> FAILED
//! ACTIVE          --injected_failure-> FAILED
//! ```
//!
//! Promotion is one way: a promoted backup stays active even if the partner's
//! heartbeats come back. Everything else is an illegal transition.

use std::time::Duration;

use config::Role;
use duet_core::metrics;
use tracing::{debug, error, info};

use crate::{
    error::{CoordinationError, CoordinationResult},
    models::{FailoverEvent, FailoverState, PartnerLiveness, Transition},
};

#[derive(Debug, Clone)]
pub struct FailoverController {
    role: Role,
    state: FailoverState,
    partner: PartnerLiveness,
    failover_timeout: Duration,
}

impl FailoverController {
    /// `started_at` seeds the partner's last heartbeat so a backup waits a full
    /// timeout before it can promote.
    pub fn new(role: Role, failover_timeout: Duration, started_at: Duration) -> Self {
        Self {
            role,
            state: FailoverState::initial(role),
            partner: PartnerLiveness {
                alive: true,
                last_heartbeat: started_at,
            },
            failover_timeout,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn partner(&self) -> PartnerLiveness {
        self.partner
    }

    pub fn failover_timeout(&self) -> Duration {
        self.failover_timeout
    }

    pub fn is_serving(&self) -> bool {
        self.state.is_serving()
    }

    /// The only place `state` changes. On error the state is left as it was.
    pub fn transition(
        &mut self,
        event: FailoverEvent,
        now: Duration,
    ) -> CoordinationResult<Transition> {
        use FailoverEvent::*;
        use FailoverState::*;

        let from = self.state;
        let to = match (from, event) {
            (StandbyPassive, PartnerTimeout) => Active,
            (StandbyPassive | Active, InjectedFailure) => Failed,
            _ => return Err(CoordinationError::IllegalTransition { from, event }),
        };
        self.state = to;
        match event {
            PartnerTimeout => {
                self.partner.alive = false;
                metrics::FAILOVER_PROMOTIONS.inc();
                info!(role = ?self.role, ?now, silent_for = ?now.saturating_sub(self.partner.last_heartbeat), "partner timed out, promoting to active");
            }
            InjectedFailure => {
                metrics::INJECTED_FAILURES.inc();
                error!(role = ?self.role, ?now, %from, "injected failure");
            }
        }
        Ok(Transition {
            from,
            to,
            event,
            at: now,
        })
    }

    /// Record a heartbeat from the partner. Never demotes.
    pub fn on_heartbeat(&mut self, now: Duration) {
        if !self.partner.alive {
            debug!(?now, "heartbeat from a partner we had given up on");
        }
        self.partner.alive = true;
        self.partner.last_heartbeat = now;
    }

    /// Periodic check. Promotes a standby node whose partner has been silent
    /// for longer than the failover timeout.
    pub fn check_liveness(&mut self, now: Duration) -> CoordinationResult<Option<Transition>> {
        if self.state != FailoverState::StandbyPassive || !self.partner.alive {
            return Ok(None);
        }
        if now.saturating_sub(self.partner.last_heartbeat) > self.failover_timeout {
            return self
                .transition(FailoverEvent::PartnerTimeout, now)
                .map(Some);
        }
        Ok(None)
    }

    /// Simulated crash.
    pub fn fail(&mut self, now: Duration) -> CoordinationResult<Transition> {
        self.transition(FailoverEvent::InjectedFailure, now)
    }
}

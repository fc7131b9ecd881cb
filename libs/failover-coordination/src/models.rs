//! Typed models for the failover state machine.

use std::{fmt, time::Duration};

use config::Role;
use serde::{Deserialize, Serialize};

/// Where a server is in the failover lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverState {
    /// backup waiting on the primary; client traffic is discarded
    StandbyPassive,
    /// serving clients
    Active,
    /// crashed, terminal
    Failed,
}

impl FailoverState {
    /// a primary starts active, a backup starts standby
    pub fn initial(role: Role) -> Self {
        match role {
            Role::Primary => FailoverState::Active,
            Role::Backup => FailoverState::StandbyPassive,
        }
    }

    /// Returns true only while the node should answer clients.
    pub fn is_serving(&self) -> bool {
        matches!(self, FailoverState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailoverState::Failed)
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverState::StandbyPassive => write!(f, "STANDBY_PASSIVE"),
            FailoverState::Active => write!(f, "ACTIVE"),
            FailoverState::Failed => write!(f, "FAILED"),
        }
    }
}

/// What can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverEvent {
    /// partner silent for longer than the failover timeout
    PartnerTimeout,
    /// simulated crash of this node
    InjectedFailure,
}

impl fmt::Display for FailoverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverEvent::PartnerTimeout => write!(f, "partner_timeout"),
            FailoverEvent::InjectedFailure => write!(f, "injected_failure"),
        }
    }
}

/// What we know about the partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerLiveness {
    pub alive: bool,
    /// logical time of the last heartbeat, or of our own start
    pub last_heartbeat: Duration,
}

/// A state change that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FailoverState,
    pub to: FailoverState,
    pub event: FailoverEvent,
    pub at: Duration,
}

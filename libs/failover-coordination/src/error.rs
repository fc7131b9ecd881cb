//! Error types for failover coordination.

use duet_core::msg::NodeId;
use thiserror::Error;

use crate::models::{FailoverEvent, FailoverState};

/// Top-level error type for the failover-coordination crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinationError {
    /// The event is not valid in the current state. State is left untouched.
    #[error("illegal failover transition: {event} while {from}")]
    IllegalTransition {
        from: FailoverState,
        event: FailoverEvent,
    },

    /// A sync or heartbeat came from a node that is not our partner.
    #[error("peer message from {actual}, partner is {expected}")]
    UnknownPeer { expected: NodeId, actual: NodeId },

    /// Codec error while encoding a sync or heartbeat.
    #[error("codec error: {0}")]
    Codec(String),
}

impl CoordinationError {
    /// Returns true if the error was raised by the state machine.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, CoordinationError::IllegalTransition { .. })
    }

    /// Returns true if the offending message should count as malformed input.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            CoordinationError::UnknownPeer { .. } | CoordinationError::Codec(_)
        )
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let illegal = CoordinationError::IllegalTransition {
            from: FailoverState::Failed,
            event: FailoverEvent::PartnerTimeout,
        };
        assert!(illegal.is_illegal_transition());
        assert!(!illegal.is_malformed_input());

        let peer = CoordinationError::UnknownPeer {
            expected: NodeId(2),
            actual: NodeId(7),
        };
        assert!(peer.is_malformed_input());

        let codec = CoordinationError::Codec("bad json".into());
        assert!(codec.is_malformed_input());
        assert!(!codec.is_illegal_transition());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::IllegalTransition {
            from: FailoverState::Failed,
            event: FailoverEvent::InjectedFailure,
        };
        let msg = format!("{err}");
        assert!(msg.contains("injected_failure"));
        assert!(msg.contains("FAILED"));
    }
}

//! Session lifecycle
//!
//! Every connection-oriented session walks the same state machine,
//! whichever transport it arrived on:
//!
//! ```text
//! ACCEPTED ──handshake──► NAMED ──registered──► ACTIVE ──close/error──► CLOSED
//! ```
//!
//! Transitions only move forward; a session is never reused.

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport accepted, handshake not yet received
    Accepted,
    /// Handshake name received
    Named,
    /// Registered and exchanging messages
    Active,
    /// Unregistered and closed
    Closed,
}

impl SessionPhase {
    /// Short label used in log fields
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Accepted => "accepted",
            SessionPhase::Named => "named",
            SessionPhase::Active => "active",
            SessionPhase::Closed => "closed",
        }
    }

    /// Handshake complete
    pub fn complete_handshake(&mut self) {
        if *self == SessionPhase::Accepted {
            *self = SessionPhase::Named;
        }
    }

    /// Registered with the session's registry
    pub fn activate(&mut self) {
        if *self == SessionPhase::Named {
            *self = SessionPhase::Active;
        }
    }

    /// Session torn down; terminal
    pub fn close(&mut self) {
        *self = SessionPhase::Closed;
    }

    /// Whether the session is exchanging messages
    pub fn is_active(&self) -> bool {
        *self == SessionPhase::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut phase = SessionPhase::Accepted;

        phase.complete_handshake();
        assert_eq!(phase, SessionPhase::Named);

        phase.activate();
        assert_eq!(phase, SessionPhase::Active);
        assert!(phase.is_active());

        phase.close();
        assert_eq!(phase, SessionPhase::Closed);
    }

    #[test]
    fn test_activate_requires_handshake() {
        let mut phase = SessionPhase::Accepted;

        phase.activate();
        assert_eq!(phase, SessionPhase::Accepted);
    }

    #[test]
    fn test_close_from_any_state() {
        let mut phase = SessionPhase::Accepted;
        phase.close();
        assert_eq!(phase, SessionPhase::Closed);

        let mut phase = SessionPhase::Named;
        phase.close();
        assert_eq!(phase, SessionPhase::Closed);
    }
}

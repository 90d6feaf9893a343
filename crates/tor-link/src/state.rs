//! The link lifecycle state machine (spec §4.1).

use std::fmt;

/// The lifecycle state of a [`Link`](crate::Link).
///
/// Transitions are validated by [`LinkState::can_transition_to`]; the only
/// mutator that is allowed to move a link between states is
/// [`Link::change_state`](crate::Link::change_state), which consults this
/// table and keeps the registry partitions in sync with it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum LinkState {
    /// No transport is attached; the link either hasn't started or has
    /// finished teardown. All three queues are empty in this state.
    Closed,
    /// Teardown has been requested or forced and is in progress.
    Closing,
    /// The link has failed irrecoverably. Terminal.
    Error,
    /// A listening link, accepting incoming connections.
    Listening,
    /// The transport briefly left its "open" condition (e.g. TLS
    /// renegotiation); cells may still be queued but not flushed.
    Maint,
    /// The transport is connecting or the handshake is in progress.
    Opening,
    /// The transport is connected, the handshake is complete, and cells
    /// flow normally.
    Open,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Closed => "CLOSED",
            LinkState::Closing => "CLOSING",
            LinkState::Error => "ERROR",
            LinkState::Listening => "LISTENING",
            LinkState::Maint => "MAINT",
            LinkState::Opening => "OPENING",
            LinkState::Open => "OPEN",
        };
        f.write_str(s)
    }
}

impl LinkState {
    /// Return true if `self -> to` is a transition the state machine
    /// allows (spec §4.1). `Error` is terminal: no transition out of it
    /// is ever allowed.
    pub fn can_transition_to(self, to: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, to),
            (Closed, Listening)
                | (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closing)
                | (Opening, Error)
                | (Open, Maint)
                | (Open, Closing)
                | (Open, Error)
                | (Maint, Open)
                | (Maint, Closing)
                | (Maint, Error)
                | (Listening, Closing)
                | (Listening, Error)
                | (Closing, Closed)
                | (Closing, Error)
        )
    }

    /// Return true if cells may be queued or written while in this state
    /// (spec §3 invariants: `OPENING`, `OPEN`, `MAINT`).
    pub fn accepts_cells(self) -> bool {
        matches!(self, LinkState::Opening | LinkState::Open | LinkState::Maint)
    }

    /// Return true if this state requires `reason_for_closing != NOT_CLOSING`
    /// (spec §3 invariants).
    pub fn is_closing_family(self) -> bool {
        matches!(self, LinkState::Closing | LinkState::Closed | LinkState::Error)
    }
}

/// Why a link is being, or was, closed.
///
/// `reason_for_closing != NotClosing` iff `state` is one of
/// `{CLOSING, CLOSED, ERROR}` (spec §3).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[non_exhaustive]
pub enum CloseReason {
    /// The link is not being closed.
    #[default]
    NotClosing,
    /// `request_close()` was called from above (the circuit layer).
    Requested,
    /// The transport told us it is closing (`close_from_lower_layer`).
    FromBelow,
    /// A protocol or programming error forced closure (`close_for_error`).
    ForError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use LinkState::*;

    #[test]
    fn allowed_edges() {
        assert!(Closed.can_transition_to(Opening));
        assert!(Closed.can_transition_to(Listening));
        assert!(Opening.can_transition_to(Open));
        assert!(Open.can_transition_to(Maint));
        assert!(Maint.can_transition_to(Open));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn disallowed_edges() {
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Maint));
        assert!(!Closing.can_transition_to(Open));
        assert!(!Error.can_transition_to(Closed));
        assert!(!Error.can_transition_to(Opening));
        assert!(!Listening.can_transition_to(Open));
    }

    #[test]
    fn closing_family_matches_reason_invariant() {
        for s in [Closed, Closing, Error, Listening, Maint, Opening, Open] {
            assert_eq!(
                s.is_closing_family(),
                matches!(s, Closing | Closed | Error)
            );
        }
    }
}

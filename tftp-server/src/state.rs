//! Session finite-state machine (FSM) types.
//!
//! Transitions are driven by [`crate::session::Session::step`]; this module
//! only names the states.
//!
//! ```text
//!                 ┌────── ACK(block), more payload ──────┐
//!                 ▼                                      │
//!  SENDING_BLOCK ──DATA sent──▶ AWAITING_ACK ────────────┤
//!                                │   ▲                   │
//!            timeout, budget left│   │stray / malformed  │ ACK(block), final block
//!              (retransmit)      └───┘                   ▼
//!                                │                      DONE
//!     budget exhausted, ERROR,   │
//!     transport failure          ▼
//!                              ABORTED
//! ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Next DATA packet is about to be encoded and sent.
    #[default]
    SendingBlock,
    /// A DATA packet is in flight; waiting for its ACK or a timeout.
    AwaitingAck,
    /// Final block acknowledged.
    Done,
    /// Retries exhausted, remote error, or transport failure.
    Aborted,
}

impl SessionState {
    /// `Done` and `Aborted` end the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

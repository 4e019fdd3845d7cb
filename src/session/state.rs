//! Session states

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Accepted, not yet authenticated
    Connected,
    /// Authenticated, no transaction
    Ready,
    /// Implicit transaction with an open result
    AutoCommitStreaming,
    /// Explicit transaction open
    InTransaction,
    /// A recoverable failure was reported; waiting for reset
    Failed,
    /// Interrupt received; everything but reset is ignored
    Interrupted,
    /// Terminal
    Closed,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Connected => "CONNECTED",
            State::Ready => "READY",
            State::AutoCommitStreaming => "AUTO_COMMIT_STREAMING",
            State::InTransaction => "IN_TRANSACTION",
            State::Failed => "FAILED",
            State::Interrupted => "INTERRUPTED",
            State::Closed => "CLOSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Closed)
    }

    /// States a pending interrupt moves into INTERRUPTED.
    pub fn accepts_interrupt(&self) -> bool {
        matches!(
            self,
            State::Ready | State::AutoCommitStreaming | State::InTransaction | State::Failed
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

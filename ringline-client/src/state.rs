//! Connection lifecycle states.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Lifecycle state of a connection.
///
/// ```text
///   Open ──► Upgrading ──► Upgraded
///    │           │
///    └─────┬─────┘
///          ▼
///        Closed
/// ```
///
/// States only move forward. `Upgraded` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Accepting and exchanging requests.
    Open,
    /// The peer accepted a protocol switch; waiting for `perform_upgrade`.
    Upgrading,
    /// The byte stream was handed to the caller.
    Upgraded,
    /// The connection is gone.
    Closed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Upgraded | State::Closed)
    }

    /// True if `self → to` is a legal transition.
    pub fn can_transition(self, to: State) -> bool {
        matches!(
            (self, to),
            (State::Open, State::Upgrading)
                | (State::Open, State::Closed)
                | (State::Upgrading, State::Upgraded)
                | (State::Upgrading, State::Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Open => "open",
            State::Upgrading => "upgrading",
            State::Upgraded => "upgraded",
            State::Closed => "closed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection reached [`State::Closed`].
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// `close()` was called, or the last handle was dropped.
    Local,
    /// The peer closed the stream.
    PeerClosed,
    /// The transport failed.
    Io(Arc<io::Error>),
    /// The peer sent something the codec could not accept.
    Protocol(String),
}

impl CloseReason {
    /// True if the connection went away without the local side asking.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, CloseReason::Io(_) | CloseReason::Protocol(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Io(e) => write!(f, "io error: {e}"),
            CloseReason::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

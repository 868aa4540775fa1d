use std::io;
use std::sync::Arc;

use crate::option::ValueKind;
use crate::state::{CloseReason, State};

/// Errors produced by a client connection.
///
/// One failure usually fans out to many listeners (every queued and in-flight
/// request), so the error is `Clone`. I/O causes are shared behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The operation is not legal in the connection's current state.
    #[error("{op} is not allowed while the connection is {state}")]
    IllegalState { op: &'static str, state: State },

    /// The connection was upgraded; the request can never be sent.
    #[error("connection upgraded")]
    ConnectionUpgraded,

    /// The pending queue is at its configured capacity.
    #[error("request queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The request body was already ended.
    #[error("request body already complete")]
    BodyComplete,

    /// A listener is already registered for this outcome.
    #[error("listener already registered")]
    ListenerRegistered,

    /// The request was rejected by the codec before being queued.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An option value does not match the option's declared type.
    #[error("option {name}: expected {expected} value, got {actual}")]
    OptionTypeMismatch {
        name: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Neither the connection nor its transport supports the option.
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),

    /// Configuration value out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The connection closed before the request was admitted.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection closed while the exchange was in progress.
    #[error("connection reset mid-exchange: {reason}")]
    ResetMidExchange { reason: CloseReason },

    /// I/O error from the transport.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// The transport failed to get or set an option. The connection stays open.
    #[error("option {option}: {cause}")]
    OptionIo {
        option: String,
        cause: Arc<io::Error>,
    },

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse relative to the connection lifecycle.
    State,
    /// Bad input rejected before any side effect.
    Validation,
    /// The underlying byte stream failed or went away.
    Transport,
    /// Malformed or unexpected data from the peer.
    Protocol,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::IllegalState { .. }
            | ClientError::ConnectionUpgraded
            | ClientError::QueueFull { .. }
            | ClientError::BodyComplete
            | ClientError::ListenerRegistered => ErrorKind::State,
            ClientError::InvalidRequest(_)
            | ClientError::OptionTypeMismatch { .. }
            | ClientError::UnsupportedOption(_)
            | ClientError::InvalidConfig(_) => ErrorKind::Validation,
            ClientError::ConnectionClosed
            | ClientError::ResetMidExchange { .. }
            | ClientError::Io(_)
            | ClientError::OptionIo { .. } => ErrorKind::Transport,
            ClientError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// True if the error is fatal to the connection rather than to one call.
    ///
    /// A failed transport option call is a transport error but leaves the
    /// connection usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::OptionIo { .. } => false,
            _ => matches!(self.kind(), ErrorKind::Transport | ErrorKind::Protocol),
        }
    }

    pub(crate) fn option_io(name: &str, err: io::Error) -> Self {
        ClientError::OptionIo {
            option: name.to_string(),
            cause: Arc::new(err),
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

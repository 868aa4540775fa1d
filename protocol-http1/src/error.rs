//! Error types for HTTP/1.1 framing.

/// Error produced while parsing a response from the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The status line is not `HTTP/x.y NNN reason`.
    #[error("invalid status line")]
    InvalidStatusLine,

    /// The status line names a version other than HTTP/1.0 or HTTP/1.1.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    /// A header line is malformed.
    #[error("invalid header line: {0}")]
    InvalidHeader(String),

    /// `content-length` is not a decimal integer, or repeats with different values.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// A chunk-size line is malformed or a chunk is not terminated by CRLF.
    #[error("invalid chunk framing")]
    InvalidChunk,

    /// The response head exceeds the configured limit without terminating.
    #[error("response head too large: {len} bytes exceeds {max} byte limit")]
    HeadTooLarge { len: usize, max: usize },

    /// The peer closed the stream before the body was complete.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// Error produced while encoding a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The method is not an HTTP token.
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    /// The request target is empty or contains whitespace or control bytes.
    #[error("invalid request target: {0:?}")]
    InvalidTarget(String),

    /// A header name is not an HTTP token.
    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// A header value contains CR, LF or NUL.
    #[error("invalid value for header {0:?}")]
    InvalidHeaderValue(String),

    /// HTTP/1.1 requests must carry a `host` header.
    #[error("missing host header")]
    MissingHost,

    /// `content-length` is not a decimal integer.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Both `content-length` and chunked `transfer-encoding` were given.
    #[error("content-length and chunked transfer-encoding are mutually exclusive")]
    ConflictingFraming,

    /// Body bytes were written to a request that declared no body.
    #[error("request declares no body")]
    BodyNotAllowed,

    /// More body bytes were written than `content-length` declared.
    #[error("body exceeds content-length: {written} > {declared}")]
    BodyTooLong { declared: u64, written: u64 },

    /// The body ended before `content-length` bytes were written.
    #[error("body shorter than content-length: {written} < {declared}")]
    BodyTooShort { declared: u64, written: u64 },
}

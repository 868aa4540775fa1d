//! ringline-client: thread-affine, non-blocking client connections.
//!
//! A [`Connection`] drives one established transport on the worker thread
//! that owns it. Requests are submitted with a [`Callback`]; once admitted,
//! each becomes an [`Exchange`] that streams its request body and yields the
//! response head and body chunks, through callbacks or futures.
//!
//! Requests are written in submission order and, when the protocol allows,
//! pipelined: a request may go out before earlier responses arrive.
//! Responses are matched to exchanges strictly in order. A request that asks
//! for a protocol switch runs alone; once the peer accepts it the connection
//! enters [`State::Upgrading`] and [`Connection::perform_upgrade`] hands the
//! raw stream to the caller.
//!
//! The wire format is a [`Codec`]. The `http1` feature (on by default)
//! provides [`Http1Codec`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//!
//! use ringline_client::{
//!     Callback, ClientError, Connection, ConnectionConfig, Exchange, FixedBufferPool, Http1Codec,
//!     Request, ResponseHead,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = TcpStream::connect("127.0.0.1:8080")?;
//!     stream.set_nonblocking(true)?;
//!
//!     let pool = Arc::new(FixedBufferPool::new(64, 16 * 1024));
//!     let conn = Connection::new(stream, Http1Codec::new(), pool, ConnectionConfig::default())?;
//!
//!     let request = Request::get("/health").header("host", "localhost");
//!     conn.submit(
//!         request,
//!         Callback::new(|admitted: Result<Exchange<Http1Codec>, ClientError>| {
//!             if let Ok(exchange) = admitted {
//!                 let on_head = |head: Result<ResponseHead, ClientError>| {
//!                     if let Ok(head) = head {
//!                         println!("status {}", head.status());
//!                     }
//!                 };
//!                 let _ = exchange.on_response(Callback::new(on_head));
//!             }
//!         }),
//!     )?;
//!
//!     // The event loop calls these as the socket becomes ready.
//!     conn.on_writable();
//!     while conn.on_readable() {}
//!     Ok(())
//! }
//! ```

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod dispatch;
pub(crate) mod metrics;
pub(crate) mod queue;
#[cfg(test)]
pub(crate) mod testing;

// ── Public modules ──────────────────────────────────────────────────────
pub mod callback;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod exchange;
#[cfg(feature = "http1")]
pub mod http1;
pub mod option;
pub mod pool;
pub mod state;
pub mod transport;
pub mod upgrade;

// ── Re-exports ──────────────────────────────────────────────────────────
pub use callback::Callback;
pub use codec::{BodyEncoder, Codec, Decoded, WriteProgress};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, WorkerId};
pub use connection::Connection;
pub use error::{ClientError, ErrorKind};
pub use exchange::{BodyChunk, ChunkFuture, Exchange, ExchangeId, ResponseFuture};
pub use option::{
    OptionKey, OptionLevel, OptionRegistry, OptionType, OptionValue, ValueKind, options,
};
pub use pool::{BufferPool, FixedBufferPool, PooledBuffer};
pub use state::{CloseReason, State};
pub use transport::Transport;
pub use upgrade::Upgraded;

#[cfg(feature = "http1")]
pub use http1::Http1Codec;
#[cfg(feature = "http1")]
pub use protocol_http1::{Request, ResponseHead, Version};

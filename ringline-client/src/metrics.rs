//! ringline-client metrics.
//!
//! Process-wide counters for requests, connections and bytes, registered
//! with `metriken` so any exposition layer (Prometheus, admin endpoint) picks
//! them up.

use metriken::{Counter, Gauge, metric};

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "ringline_client/requests/submitted",
    description = "Requests accepted into a connection's queue"
)]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "ringline_client/requests/rejected",
    description = "Requests rejected synchronously at submit"
)]
pub static REQUESTS_REJECTED: Counter = Counter::new();

#[metric(
    name = "ringline_client/requests/admitted",
    description = "Requests whose head was put on the wire"
)]
pub static REQUESTS_ADMITTED: Counter = Counter::new();

#[metric(
    name = "ringline_client/requests/completed",
    description = "Exchanges that finished both directions"
)]
pub static REQUESTS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "ringline_client/requests/failed",
    description = "Queued or in-flight requests failed by a connection close"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

// ── Connection lifecycle ─────────────────────────────────────────

#[metric(
    name = "ringline_client/connections/opened",
    description = "Client connections created"
)]
pub static CONNECTIONS_OPENED: Counter = Counter::new();

#[metric(
    name = "ringline_client/connections/closed",
    description = "Client connections closed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "ringline_client/connections/upgraded",
    description = "Client connections handed off after a protocol upgrade"
)]
pub static CONNECTIONS_UPGRADED: Counter = Counter::new();

#[metric(
    name = "ringline_client/connections/protocol_errors",
    description = "Client connections closed on a protocol violation"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

#[metric(
    name = "ringline_client/connections/active",
    description = "Client connections in the open or upgrading state"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "ringline_client/bytes/received",
    description = "Total bytes read from transports"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "ringline_client/bytes/sent",
    description = "Total bytes written to transports"
)]
pub static BYTES_SENT: Counter = Counter::new();

// ── Buffer pool ──────────────────────────────────────────────────

#[metric(
    name = "ringline_client/pool/allocated",
    description = "Buffers allocated because the pool's free list was empty"
)]
pub static POOL_ALLOCATED: Counter = Counter::new();

#[metric(
    name = "ringline_client/pool/discarded",
    description = "Released buffers dropped because the free list was full"
)]
pub static POOL_DISCARDED: Counter = Counter::new();

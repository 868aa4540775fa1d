//! Client connection core.
//!
//! A [`Connection`] wraps an established [`Transport`] and a [`Codec`]. It is
//! bound to the worker thread that created it and never blocks: the event
//! loop calls [`on_readable`](Connection::on_readable),
//! [`on_writable`](Connection::on_writable) and
//! [`on_transport_closed`](Connection::on_transport_closed), and the
//! connection performs non-blocking I/O, admits queued requests and
//! delivers outcomes through callbacks and wakers.
//!
//! Listeners never run while the connection's state is borrowed, so any
//! callback may call back into the connection.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::callback::Callback;
use crate::codec::{BodyEncoder, Codec, Decoded};
use crate::config::{ConnectionConfig, WorkerId};
use crate::dispatch::{Deferred, Dispatcher};
use crate::error::ClientError;
use crate::exchange::{BodyChunk, Driver, Exchange, ExchangeId, ExchangeRef, ExchangeState};
use crate::metrics;
use crate::option::{OptionKey, OptionLevel, OptionRegistry, OptionType, OptionValue, options};
use crate::pool::{BufferPool, PooledBuffer};
use crate::queue::{Admission, Pending, Pipeline};
use crate::state::{CloseReason, State};
use crate::transport::Transport;
use crate::upgrade::Upgraded;

/// Smallest scratch buffer used for a transport read.
const MIN_READ: usize = 512;

type CloseListener = Box<dyn FnOnce(&CloseReason)>;

/// A thread-affine client connection.
///
/// Cloning yields another handle to the same connection. Handles are
/// `!Send`; all use happens on the worker thread that created it.
pub struct Connection<T: Transport + 'static, C: Codec + 'static> {
    shared: Rc<Shared<T, C>>,
}

struct Shared<T: Transport + 'static, C: Codec + 'static> {
    inner: RefCell<Inner<T, C>>,
    dispatcher: Dispatcher,
    owner: ThreadId,
    worker: WorkerId,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    pool: Arc<dyn BufferPool>,
}

struct Inner<T: Transport + 'static, C: Codec + 'static> {
    state: State,
    transport: Option<T>,
    codec: C,
    options: OptionRegistry,
    config: ConnectionConfig,
    pipeline: Pipeline<C>,
    /// Encoded bytes not yet accepted by the transport.
    write_buf: BytesMut,
    /// Received bytes not yet consumed by the codec.
    read_buf: BytesMut,
    /// Total bytes ever appended to `write_buf`.
    queued_bytes: u64,
    /// Total bytes ever written to the transport.
    flushed_bytes: u64,
    next_id: u64,
    close_listeners: Vec<CloseListener>,
    close_reason: Option<CloseReason>,
    driver: Weak<dyn Driver<C>>,
}

impl<T: Transport + 'static, C: Codec + 'static> Connection<T, C> {
    /// Wrap an established transport.
    pub fn new(
        transport: T,
        codec: C,
        pool: Arc<dyn BufferPool>,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let local_addr = transport.local_addr();
        let peer_addr = transport.peer_addr();
        let mut registry = OptionRegistry::new();
        registry.set(
            options::PIPELINING.name(),
            OptionValue::Bool(config.pipelining),
        )?;
        let worker = config.worker;

        let shared = Rc::new_cyclic(|weak: &Weak<Shared<T, C>>| {
            let driver: Weak<dyn Driver<C>> = weak.clone();
            Shared {
                inner: RefCell::new(Inner {
                    state: State::Open,
                    transport: Some(transport),
                    codec,
                    options: registry,
                    config,
                    pipeline: Pipeline::new(),
                    write_buf: BytesMut::new(),
                    read_buf: BytesMut::new(),
                    queued_bytes: 0,
                    flushed_bytes: 0,
                    next_id: 0,
                    close_listeners: Vec::new(),
                    close_reason: None,
                    driver,
                }),
                dispatcher: Dispatcher::new(),
                owner: thread::current().id(),
                worker,
                local_addr,
                peer_addr,
                pool,
            }
        });

        metrics::CONNECTIONS_OPENED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();
        debug!(worker = worker.0, peer = ?peer_addr, "connection opened");
        Ok(Self { shared })
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Queue a request.
    ///
    /// Fails synchronously, without invoking `callback`, if the connection is
    /// not open, the codec rejects the request, or the queue is at its
    /// configured capacity. Otherwise `callback` later receives the
    /// [`Exchange`] once the request is admitted, or the error that
    /// prevented admission.
    pub fn submit(
        &self,
        request: C::Request,
        callback: Callback<Exchange<C>>,
    ) -> Result<ExchangeId, ClientError> {
        self.shared
            .run(|inner, out| inner.submit(request, callback, out))
    }

    /// Number of requests waiting for admission.
    pub fn queued(&self) -> usize {
        self.shared.with(|inner| inner.pipeline.queued_len())
    }

    /// Number of admitted exchanges not yet complete.
    pub fn in_flight(&self) -> usize {
        self.shared.with(|inner| inner.pipeline.in_flight_len())
    }

    // ── Event loop ───────────────────────────────────────────────────

    /// The transport has bytes to read.
    ///
    /// Reads at most `read_chunk_size` bytes. Returns true when that budget
    /// ran out before the transport would block: more input may be waiting,
    /// and an edge-triggered loop must call this again.
    pub fn on_readable(&self) -> bool {
        let pool = self.shared.pool.clone();
        self.shared.run(|inner, out| inner.read_ready(&pool, out))
    }

    /// The transport can accept more bytes.
    pub fn on_writable(&self) {
        self.shared.run(|inner, out| inner.pump(out))
    }

    /// The event loop observed the transport going away. `None` is an
    /// orderly close by the peer.
    pub fn on_transport_closed(&self, error: Option<io::Error>) {
        self.shared.run(|inner, out| match error {
            Some(e) => {
                warn!(error = %e, "transport failed");
                inner.close_with(CloseReason::Io(Arc::new(e)), out)
            }
            None => inner.peer_closed(out),
        })
    }

    /// True while encoded bytes wait for the transport. The event loop
    /// should watch for writability while this holds.
    pub fn wants_write(&self) -> bool {
        self.shared
            .with(|inner| !inner.write_buf.is_empty() && inner.transport.is_some())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.shared.with(|inner| inner.state)
    }

    /// True in `Open` and `Upgrading`.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), State::Open | State::Upgrading)
    }

    pub fn is_upgraded(&self) -> bool {
        self.state() == State::Upgraded
    }

    /// Close the connection. Every queued request fails with
    /// [`ClientError::ConnectionClosed`] and every in-flight exchange with
    /// [`ClientError::ResetMidExchange`]. Closing twice is a no-op.
    pub fn close(&self) {
        self.shared
            .run(|inner, out| inner.close_with(CloseReason::Local, out))
    }

    /// Run `listener` once when the connection closes. Runs immediately if
    /// it already has. Listeners are dropped, not run, when the connection
    /// is upgraded.
    pub fn on_close<F>(&self, listener: F)
    where
        F: FnOnce(&CloseReason) + 'static,
    {
        self.shared.run(|inner, out| match inner.state {
            State::Closed => {
                let reason = inner.close_reason.clone().unwrap_or(CloseReason::Local);
                out.push(Box::new(move || listener(&reason)));
            }
            State::Upgraded => out.push(Box::new(move || drop(listener))),
            State::Open | State::Upgrading => inner.close_listeners.push(Box::new(listener)),
        })
    }

    /// Take over the byte stream after the peer accepted an upgrade.
    ///
    /// Only legal in [`State::Upgrading`]; in any other state this fails with
    /// [`ClientError::IllegalState`] and changes nothing.
    pub fn perform_upgrade(&self) -> Result<Upgraded<T>, ClientError> {
        self.shared.run(|inner, out| inner.perform_upgrade(out))
    }

    // ── Options ──────────────────────────────────────────────────────

    /// Declare an additional connection- or transport-level option.
    pub fn declare_option<V: OptionType>(&self, key: &OptionKey<V>) {
        self.shared.run(|inner, _| inner.options.declare(key))
    }

    pub fn supports_option<V: OptionType>(&self, key: &OptionKey<V>) -> bool {
        self.supports_option_name(key.name())
    }

    /// True if the option is declared at connection level, or the transport
    /// implements it.
    pub fn supports_option_name(&self, name: &str) -> bool {
        self.shared.with(|inner| match inner.options.level(name) {
            Some(OptionLevel::Connection) => true,
            Some(OptionLevel::Transport) | None => inner.transport_supports(name),
        })
    }

    pub fn get_option<V: OptionType>(&self, key: &OptionKey<V>) -> Result<Option<V>, ClientError> {
        Ok(self.get_option_value(key.name())?.and_then(V::from_value))
    }

    /// Current value, or `None` if not set or not supported.
    pub fn get_option_value(&self, name: &str) -> Result<Option<OptionValue>, ClientError> {
        self.shared.with(|inner| inner.get_option(name))
    }

    /// Set an option, returning its previous value.
    pub fn set_option<V: OptionType>(
        &self,
        key: &OptionKey<V>,
        value: V,
    ) -> Result<Option<V>, ClientError> {
        let previous = self.set_option_value(key.name(), value.into_value())?;
        Ok(previous.and_then(V::from_value))
    }

    /// Untyped [`set_option`](Self::set_option). The value's type is checked
    /// against the option's declaration before anything changes.
    pub fn set_option_value(
        &self,
        name: &str,
        value: OptionValue,
    ) -> Result<Option<OptionValue>, ClientError> {
        self.shared
            .run(|inner, out| inner.set_option(name, value, out))
    }

    // ── Environment ──────────────────────────────────────────────────

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    pub fn buffer_pool(&self) -> &Arc<dyn BufferPool> {
        &self.shared.pool
    }

    pub fn worker(&self) -> WorkerId {
        self.shared.worker
    }

    /// The thread the connection is bound to.
    pub fn io_thread(&self) -> ThreadId {
        self.shared.owner
    }
}

impl<T: Transport + 'static, C: Codec + 'static> Clone for Connection<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport + 'static, C: Codec + 'static> fmt::Debug for Connection<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Connection");
        d.field("worker", &self.shared.worker)
            .field("peer_addr", &self.shared.peer_addr);
        match self.shared.inner.try_borrow() {
            Ok(inner) => d
                .field("state", &inner.state)
                .field("queued", &inner.pipeline.queued_len())
                .field("in_flight", &inner.pipeline.in_flight_len()),
            Err(_) => d.field("state", &"<borrowed>"),
        };
        d.finish()
    }
}

impl<T: Transport + 'static, C: Codec + 'static> Shared<T, C> {
    /// Mutate the connection, then deliver what the mutation produced.
    fn run<R>(&self, f: impl FnOnce(&mut Inner<T, C>, &mut Vec<Deferred>) -> R) -> R {
        self.check_thread();
        let mut out = Vec::new();
        let result = {
            let mut inner = self.inner.borrow_mut();
            f(&mut inner, &mut out)
        };
        self.dispatcher.extend(out);
        self.dispatcher.drain();
        result
    }

    fn with<R>(&self, f: impl FnOnce(&Inner<T, C>) -> R) -> R {
        self.check_thread();
        f(&self.inner.borrow())
    }

    fn check_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "connection used off its io thread"
        );
    }
}

impl<T: Transport + 'static, C: Codec + 'static> Driver<C> for Shared<T, C> {
    fn write_body(&self, exchange: &ExchangeRef<C>, chunk: &[u8]) -> Result<(), ClientError> {
        self.run(|inner, out| inner.write_body(exchange, chunk, out))
    }

    fn end_body(&self, exchange: &ExchangeRef<C>) -> Result<(), ClientError> {
        self.run(|inner, out| inner.end_body(exchange, out))
    }

    fn is_writable(&self) -> bool {
        self.with(|inner| {
            inner.transport.is_some() && inner.write_buf.len() < inner.config.write_high_watermark
        })
    }
}

impl<T: Transport + 'static, C: Codec + 'static> Drop for Shared<T, C> {
    fn drop(&mut self) {
        // Last handle gone: fail whatever is still pending.
        let mut out = Vec::new();
        self.inner
            .get_mut()
            .close_with(CloseReason::Local, &mut out);
        for f in out {
            f();
        }
    }
}

impl<T: Transport + 'static, C: Codec + 'static> Inner<T, C> {
    fn pipelining(&self) -> bool {
        self.codec.supports_pipelining()
            && self
                .options
                .get_typed(&options::PIPELINING)
                .unwrap_or(self.config.pipelining)
    }

    fn submit(
        &mut self,
        request: C::Request,
        callback: Callback<Exchange<C>>,
        out: &mut Vec<Deferred>,
    ) -> Result<ExchangeId, ClientError> {
        let rejected = if self.state != State::Open {
            Some(ClientError::IllegalState {
                op: "submit",
                state: self.state,
            })
        } else if let Err(e) = self.codec.validate(&request) {
            Some(e)
        } else if let Some(capacity) = self.config.max_queued
            && self.pipeline.queued_len() >= capacity
        {
            Some(ClientError::QueueFull { capacity })
        } else {
            None
        };
        if let Some(err) = rejected {
            callback.disarm();
            metrics::REQUESTS_REJECTED.increment();
            debug!(error = %err, "request rejected");
            return Err(err);
        }

        let id = ExchangeId(self.next_id);
        self.next_id += 1;
        self.pipeline.push(Pending {
            id,
            request,
            callback,
        });
        metrics::REQUESTS_SUBMITTED.increment();
        trace!(exchange = %id, queued = self.pipeline.queued_len(), "request queued");
        self.pump(out);
        Ok(id)
    }

    /// Admit what can be admitted and write what can be written, until
    /// neither makes progress.
    fn pump(&mut self, out: &mut Vec<Deferred>) {
        loop {
            let admitted = self.admit(out);
            let flushed = self.flush(out);
            if self.state != State::Open || (admitted == 0 && !flushed) {
                break;
            }
        }
    }

    fn admit(&mut self, out: &mut Vec<Deferred>) -> usize {
        let mut admitted = 0;
        while self.state == State::Open {
            let policy = Admission {
                pipelining: self.pipelining(),
                max_depth: self.config.max_pipeline_depth,
                flushed: self.flushed_bytes,
            };
            if !self.pipeline.can_admit(&self.codec, policy) {
                break;
            }
            let Some(Pending {
                id,
                request,
                callback,
            }) = self.pipeline.pop_queued()
            else {
                break;
            };

            let before = self.write_buf.len();
            let encoder = match self.codec.encode_head(&request, &mut self.write_buf) {
                Ok(encoder) => encoder,
                Err(err) => {
                    // Nothing of a request that failed to encode reaches the wire.
                    self.write_buf.truncate(before);
                    warn!(exchange = %id, error = %err, "request head encoding failed");
                    metrics::REQUESTS_FAILED.increment();
                    out.push(Box::new(move || callback.complete(Err(err))));
                    continue;
                }
            };
            self.queued_bytes += (self.write_buf.len() - before) as u64;

            let upgrade = self.codec.is_upgrade_request(&request);
            let state = Rc::new(RefCell::new(ExchangeState::new(
                id,
                Rc::new(request),
                upgrade,
                self.queued_bytes,
                encoder,
            )));
            self.pipeline.admit(state.clone());
            metrics::REQUESTS_ADMITTED.increment();
            trace!(
                exchange = %id,
                in_flight = self.pipeline.in_flight_len(),
                upgrade,
                "request admitted"
            );

            let exchange = Exchange::new(state, self.driver.clone());
            out.push(Box::new(move || callback.complete(Ok(exchange))));
            admitted += 1;
        }
        admitted
    }

    /// Write buffered bytes until the transport pushes back. Returns true
    /// if anything was written.
    fn flush(&mut self, out: &mut Vec<Deferred>) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let mut progressed = false;
        while !self.write_buf.is_empty() {
            match transport.write(&self.write_buf) {
                Ok(0) => {
                    let err = io::Error::from(io::ErrorKind::WriteZero);
                    warn!(error = %err, "transport write failed");
                    self.close_with(CloseReason::Io(Arc::new(err)), out);
                    return progressed;
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    self.flushed_bytes += n as u64;
                    metrics::BYTES_SENT.add(n as u64);
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "transport write failed");
                    self.close_with(CloseReason::Io(Arc::new(e)), out);
                    return progressed;
                }
            }
        }
        if progressed {
            trace!(
                flushed = self.flushed_bytes,
                pending = self.write_buf.len(),
                "flushed"
            );
            if self.write_buf.is_empty()
                && let Err(e) = transport.flush()
                && e.kind() != io::ErrorKind::WouldBlock
            {
                warn!(error = %e, "transport flush failed");
                self.close_with(CloseReason::Io(Arc::new(e)), out);
            }
        }
        progressed
    }

    /// Returns true if the read budget ran out before the transport would
    /// block, so more bytes may be waiting.
    fn read_ready(&mut self, pool: &Arc<dyn BufferPool>, out: &mut Vec<Deferred>) -> bool {
        // While upgrading, unread bytes belong to the upgraded stream.
        if self.state != State::Open {
            return false;
        }
        let mut scratch = PooledBuffer::acquire(pool);
        let len = scratch.capacity().max(pool.buffer_size()).max(MIN_READ);
        scratch.resize(len, 0);

        let mut budget = self.config.read_chunk_size;
        let mut drained = false;
        while budget > 0 && self.state == State::Open {
            let Some(transport) = self.transport.as_mut() else {
                return false;
            };
            let want = len.min(budget);
            match transport.read(&mut scratch[..want]) {
                Ok(0) => {
                    self.peer_closed(out);
                    return false;
                }
                Ok(n) => {
                    budget = budget.saturating_sub(n);
                    metrics::BYTES_RECEIVED.add(n as u64);
                    self.read_buf.extend_from_slice(&scratch[..n]);
                    trace!(read = n, buffered = self.read_buf.len(), "read");
                    self.process_input(out);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    drained = true;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    self.close_with(CloseReason::Io(Arc::new(e)), out);
                    return false;
                }
            }
        }
        self.pump(out);
        !drained && self.state == State::Open
    }

    /// Feed buffered input to the codec until it needs more bytes.
    fn process_input(&mut self, out: &mut Vec<Deferred>) {
        while self.state == State::Open {
            let Some(exchange) = self.pipeline.reading() else {
                if !self.read_buf.is_empty() {
                    self.protocol_error("response data with no request in flight".into(), out);
                }
                return;
            };
            let request = exchange.borrow().request.clone();
            match self.codec.decode(&request, &mut self.read_buf) {
                Ok(None) => return,
                Ok(Some(decoded)) => self.on_decoded(&exchange, &request, decoded, out),
                Err(e) => {
                    self.protocol_error(protocol_message(e), out);
                    return;
                }
            }
        }
    }

    fn on_decoded(
        &mut self,
        exchange: &ExchangeRef<C>,
        request: &C::Request,
        decoded: Decoded<C::Response>,
        out: &mut Vec<Deferred>,
    ) {
        match decoded {
            Decoded::Head(response) => {
                if !self.codec.is_upgrade_accepted(request, &response) {
                    exchange.borrow_mut().deliver_response(response, out);
                    return;
                }
                if !exchange.borrow().upgrade || self.pipeline.in_flight_len() > 1 {
                    self.protocol_error(
                        "upgrade accepted with other requests in flight".into(),
                        out,
                    );
                    return;
                }
                {
                    let mut ex = exchange.borrow_mut();
                    ex.deliver_response(response, out);
                    ex.push_chunk(BodyChunk::End, out);
                }
                self.retire();
                self.begin_upgrade(out);
            }
            Decoded::Data(data) => exchange
                .borrow_mut()
                .push_chunk(BodyChunk::Data(data), out),
            Decoded::End => {
                let id = {
                    let mut ex = exchange.borrow_mut();
                    ex.push_chunk(BodyChunk::End, out);
                    ex.id
                };
                trace!(exchange = %id, "response complete");
                self.retire();
            }
        }
    }

    fn retire(&mut self) {
        let retired = self.pipeline.retire();
        if retired > 0 {
            metrics::REQUESTS_COMPLETED.add(retired as u64);
        }
    }

    fn begin_upgrade(&mut self, out: &mut Vec<Deferred>) {
        debug_assert!(self.state.can_transition(State::Upgrading));
        self.state = State::Upgrading;
        let queued = self.pipeline.take_queued();
        debug!(
            worker = self.config.worker.0,
            dropped = queued.len(),
            "upgrade accepted"
        );
        for pending in queued {
            metrics::REQUESTS_FAILED.increment();
            let callback = pending.callback;
            out.push(Box::new(move || {
                callback.complete(Err(ClientError::ConnectionUpgraded))
            }));
        }
    }

    fn perform_upgrade(&mut self, out: &mut Vec<Deferred>) -> Result<Upgraded<T>, ClientError> {
        if self.state != State::Upgrading {
            return Err(ClientError::IllegalState {
                op: "perform_upgrade",
                state: self.state,
            });
        }
        let Some(transport) = self.transport.take() else {
            return Err(ClientError::IllegalState {
                op: "perform_upgrade",
                state: self.state,
            });
        };
        self.state = State::Upgraded;

        for exchange in self.pipeline.take_in_flight() {
            let mut ex = exchange.borrow_mut();
            if !ex.is_complete() {
                ex.fail(ClientError::ConnectionUpgraded, out);
            }
        }
        for pending in self.pipeline.take_queued() {
            let callback = pending.callback;
            out.push(Box::new(move || {
                callback.complete(Err(ClientError::ConnectionUpgraded))
            }));
        }
        // The caller owns the stream's lifecycle from here on.
        let listeners = std::mem::take(&mut self.close_listeners);
        out.push(Box::new(move || drop(listeners)));

        metrics::CONNECTIONS_UPGRADED.increment();
        metrics::CONNECTIONS_ACTIVE.decrement();
        debug!(
            worker = self.config.worker.0,
            read_ahead = self.read_buf.len(),
            unwritten = self.write_buf.len(),
            "connection upgraded"
        );
        Ok(Upgraded::new(
            transport,
            self.read_buf.split().freeze(),
            self.write_buf.split().freeze(),
        ))
    }

    /// The peer closed its side. A response delimited by the close completes
    /// first; everything else fails.
    fn peer_closed(&mut self, out: &mut Vec<Deferred>) {
        if self.state == State::Open
            && let Some(exchange) = self.pipeline.reading()
        {
            let request = exchange.borrow().request.clone();
            match self.codec.decode_eof(&request) {
                Ok(Some(decoded)) => self.on_decoded(&exchange, &request, decoded, out),
                Ok(None) => {}
                Err(e) => {
                    self.protocol_error(protocol_message(e), out);
                    return;
                }
            }
        }
        self.close_with(CloseReason::PeerClosed, out);
    }

    fn protocol_error(&mut self, message: String, out: &mut Vec<Deferred>) {
        warn!(error = %message, "protocol error");
        metrics::PROTOCOL_ERRORS.increment();
        self.close_with(CloseReason::Protocol(message), out);
    }

    /// Move to `Closed` and fail everything pending, in submission order.
    fn close_with(&mut self, reason: CloseReason, out: &mut Vec<Deferred>) {
        if self.state.is_terminal() {
            return;
        }
        let from = self.state;
        self.state = State::Closed;
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close()
        {
            debug!(error = %e, "transport close failed");
        }

        let in_flight = self.pipeline.take_in_flight();
        let queued = self.pipeline.take_queued();
        debug!(
            worker = self.config.worker.0,
            from = %from,
            reason = %reason,
            in_flight = in_flight.len(),
            queued = queued.len(),
            "connection closed"
        );
        metrics::CONNECTIONS_CLOSED.increment();
        metrics::CONNECTIONS_ACTIVE.decrement();

        for exchange in in_flight {
            let mut ex = exchange.borrow_mut();
            if ex.is_complete() {
                continue;
            }
            metrics::REQUESTS_FAILED.increment();
            ex.fail(
                ClientError::ResetMidExchange {
                    reason: reason.clone(),
                },
                out,
            );
        }
        for pending in queued {
            metrics::REQUESTS_FAILED.increment();
            let callback = pending.callback;
            out.push(Box::new(move || {
                callback.complete(Err(ClientError::ConnectionClosed))
            }));
        }

        self.write_buf.clear();
        self.read_buf.clear();
        for listener in self.close_listeners.drain(..) {
            let reason = reason.clone();
            out.push(Box::new(move || listener(&reason)));
        }
        self.close_reason = Some(reason);
    }

    fn write_body(
        &mut self,
        exchange: &ExchangeRef<C>,
        chunk: &[u8],
        out: &mut Vec<Deferred>,
    ) -> Result<(), ClientError> {
        {
            let mut ex = exchange.borrow_mut();
            if let Some(err) = ex.failure() {
                return Err(err.clone());
            }
            if ex.write_complete {
                return Err(ClientError::BodyComplete);
            }
            if self.transport.is_none() {
                return Err(ClientError::IllegalState {
                    op: "write_body",
                    state: self.state,
                });
            }
            let Some(encoder) = ex.encoder.as_mut() else {
                return Err(ClientError::BodyComplete);
            };
            let before = self.write_buf.len();
            encoder.encode(chunk, &mut self.write_buf)?;
            self.queued_bytes += (self.write_buf.len() - before) as u64;
        }
        self.pump(out);
        Ok(())
    }

    fn end_body(
        &mut self,
        exchange: &ExchangeRef<C>,
        out: &mut Vec<Deferred>,
    ) -> Result<(), ClientError> {
        {
            let mut ex = exchange.borrow_mut();
            if let Some(err) = ex.failure() {
                return Err(err.clone());
            }
            if ex.write_complete {
                return Ok(());
            }
            if self.transport.is_none() {
                return Err(ClientError::IllegalState {
                    op: "end_body",
                    state: self.state,
                });
            }
            let Some(mut encoder) = ex.encoder.take() else {
                return Ok(());
            };
            let before = self.write_buf.len();
            if let Err(e) = encoder.finish(&mut self.write_buf) {
                ex.encoder = Some(encoder);
                return Err(e);
            }
            self.queued_bytes += (self.write_buf.len() - before) as u64;
            ex.write_complete = true;
            trace!(exchange = %ex.id, "request body complete");
        }
        self.retire();
        self.pump(out);
        Ok(())
    }

    fn transport_supports(&self, name: &str) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.supports_option(name))
    }

    fn get_option(&self, name: &str) -> Result<Option<OptionValue>, ClientError> {
        match self.options.level(name) {
            Some(OptionLevel::Connection) => Ok(self.options.get(name).cloned()),
            Some(OptionLevel::Transport) | None => match &self.transport {
                Some(t) if t.supports_option(name) => t
                    .get_option(name)
                    .map_err(|e| ClientError::option_io(name, e)),
                _ => Ok(None),
            },
        }
    }

    fn set_option(
        &mut self,
        name: &str,
        value: OptionValue,
        out: &mut Vec<Deferred>,
    ) -> Result<Option<OptionValue>, ClientError> {
        let level = match self.options.check(name, value.kind()) {
            Ok(level) => level,
            // Undeclared names the transport knows are passed through as-is.
            Err(ClientError::UnsupportedOption(_)) if self.transport_supports(name) => {
                OptionLevel::Transport
            }
            Err(e) => return Err(e),
        };
        match level {
            OptionLevel::Connection => {
                let previous = self.options.set(name, value)?;
                trace!(option = name, "connection option set");
                if name == options::PIPELINING.name() {
                    self.pump(out);
                }
                Ok(previous)
            }
            OptionLevel::Transport => {
                let state = self.state;
                let Some(transport) = self.transport.as_mut() else {
                    return Err(ClientError::IllegalState {
                        op: "set_option",
                        state,
                    });
                };
                if !transport.supports_option(name) {
                    return Err(ClientError::UnsupportedOption(name.to_string()));
                }
                trace!(option = name, "transport option set");
                transport
                    .set_option(name, value)
                    .map_err(|e| ClientError::option_io(name, e))
            }
        }
    }
}

fn protocol_message(err: ClientError) -> String {
    match err {
        ClientError::Protocol(message) => message,
        other => other.to_string(),
    }
}

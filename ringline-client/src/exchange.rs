//! One request/response pairing on a connection.
//!
//! An [`Exchange`] is handed out by the admission callback once the request
//! head has been queued for the wire. The caller streams the request body
//! through it and waits for the response head and body, either with
//! single-shot callbacks or with the futures it returns.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;

use crate::callback::{Callback, Listener};
use crate::codec::{BodyEncoder, Codec, WriteProgress};
use crate::dispatch::Deferred;
use crate::error::ClientError;

/// Connection-unique, monotonically increasing exchange number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(pub u64);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    Data(Bytes),
    End,
}

pub(crate) type ExchangeRef<C> = Rc<RefCell<ExchangeState<C>>>;

/// The connection side of an exchange's body writes.
pub(crate) trait Driver<C: Codec> {
    fn write_body(&self, exchange: &ExchangeRef<C>, chunk: &[u8]) -> Result<(), ClientError>;

    fn end_body(&self, exchange: &ExchangeRef<C>) -> Result<(), ClientError>;

    fn is_writable(&self) -> bool;
}

enum Slot<T> {
    Empty,
    Waiting(Listener<T>),
    Ready(Result<T, ClientError>),
    Taken,
}

#[derive(Default)]
struct BodyQueue {
    chunks: VecDeque<BodyChunk>,
    reader: Option<Listener<BodyChunk>>,
    finished: bool,
}

pub(crate) struct ExchangeState<C: Codec> {
    pub(crate) id: ExchangeId,
    pub(crate) request: Rc<C::Request>,
    pub(crate) upgrade: bool,
    /// Connection write offset at which this exchange's head is fully written.
    pub(crate) head_end: u64,
    pub(crate) encoder: Option<C::BodyEncoder>,
    pub(crate) write_complete: bool,
    pub(crate) head_received: bool,
    pub(crate) read_complete: bool,
    response: Slot<C::Response>,
    body: BodyQueue,
    failure: Option<ClientError>,
}

impl<C: Codec> ExchangeState<C> {
    pub(crate) fn new(
        id: ExchangeId,
        request: Rc<C::Request>,
        upgrade: bool,
        head_end: u64,
        encoder: C::BodyEncoder,
    ) -> Self {
        let expects_body = encoder.expects_body();
        Self {
            id,
            request,
            upgrade,
            head_end,
            encoder: expects_body.then_some(encoder),
            write_complete: !expects_body,
            head_received: false,
            read_complete: false,
            response: Slot::Empty,
            body: BodyQueue::default(),
            failure: None,
        }
    }

    pub(crate) fn write_progress(&self, flushed: u64) -> WriteProgress {
        if flushed < self.head_end {
            WriteProgress::HeadPending
        } else if self.write_complete {
            WriteProgress::Complete
        } else {
            WriteProgress::Body
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.write_complete && self.read_complete
    }

    pub(crate) fn failure(&self) -> Option<&ClientError> {
        self.failure.as_ref()
    }

    pub(crate) fn deliver_response(&mut self, response: C::Response, out: &mut Vec<Deferred>) {
        self.head_received = true;
        settle(&mut self.response, Ok(response), out);
    }

    pub(crate) fn push_chunk(&mut self, chunk: BodyChunk, out: &mut Vec<Deferred>) {
        if chunk == BodyChunk::End {
            self.read_complete = true;
        }
        self.body.chunks.push_back(chunk);
        self.notify_reader(out);
    }

    /// Fail the exchange. The first failure wins; outcomes already delivered
    /// stand, everything still pending observes `err`.
    pub(crate) fn fail(&mut self, err: ClientError, out: &mut Vec<Deferred>) {
        if self.failure.is_some() {
            return;
        }
        self.failure = Some(err.clone());
        self.encoder = None;
        settle(&mut self.response, Err(err), out);
        self.notify_reader(out);
    }

    fn next_chunk(&mut self) -> Option<Result<BodyChunk, ClientError>> {
        if let Some(chunk) = self.body.chunks.pop_front() {
            if chunk == BodyChunk::End {
                self.body.finished = true;
            }
            return Some(Ok(chunk));
        }
        if self.body.finished {
            return Some(Ok(BodyChunk::End));
        }
        self.failure.clone().map(Err)
    }

    fn notify_reader(&mut self, out: &mut Vec<Deferred>) {
        match self.body.reader.take() {
            None => {}
            Some(Listener::Waker(waker)) => out.push(Box::new(move || waker.wake())),
            Some(Listener::Callback(cb)) => match self.next_chunk() {
                Some(outcome) => out.push(Box::new(move || cb.complete(outcome))),
                None => self.body.reader = Some(Listener::Callback(cb)),
            },
        }
    }
}

fn settle<T: 'static>(
    slot: &mut Slot<T>,
    outcome: Result<T, ClientError>,
    out: &mut Vec<Deferred>,
) {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Empty => *slot = Slot::Ready(outcome),
        Slot::Waiting(Listener::Callback(cb)) => out.push(Box::new(move || cb.complete(outcome))),
        Slot::Waiting(Listener::Waker(waker)) => {
            *slot = Slot::Ready(outcome);
            out.push(Box::new(move || waker.wake()));
        }
        settled @ (Slot::Ready(_) | Slot::Taken) => *slot = settled,
    }
}

/// Handle to an admitted request/response pairing.
///
/// Cheap to clone. Holds the connection weakly: once the connection is
/// gone, body writes fail with [`ClientError::ConnectionClosed`] while
/// already-received response data remains readable.
pub struct Exchange<C: Codec> {
    id: ExchangeId,
    request: Rc<C::Request>,
    state: ExchangeRef<C>,
    driver: Weak<dyn Driver<C>>,
}

impl<C: Codec> Clone for Exchange<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            request: self.request.clone(),
            state: self.state.clone(),
            driver: self.driver.clone(),
        }
    }
}

impl<C: Codec> Exchange<C> {
    pub(crate) fn new(state: ExchangeRef<C>, driver: Weak<dyn Driver<C>>) -> Self {
        let (id, request) = {
            let st = state.borrow();
            (st.id, st.request.clone())
        };
        Self {
            id,
            request,
            state,
            driver,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn request(&self) -> &C::Request {
        &self.request
    }

    /// Stream a slice of the request body.
    ///
    /// After the exchange failed this returns that failure and writes
    /// nothing. After [`end_body`](Self::end_body) it fails with
    /// [`ClientError::BodyComplete`].
    pub fn write_body(&self, chunk: &[u8]) -> Result<(), ClientError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        let driver = self.driver()?;
        driver.write_body(&self.state, chunk)
    }

    /// Finish the request body. A request without a body is complete from
    /// admission and `end_body` is a no-op for it.
    pub fn end_body(&self) -> Result<(), ClientError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        let driver = self.driver()?;
        driver.end_body(&self.state)
    }

    /// False while the connection's outbound buffer is above its high
    /// watermark. Callers streaming large bodies should pause until the
    /// event loop has drained it.
    pub fn is_writable(&self) -> bool {
        self.driver
            .upgrade()
            .is_some_and(|driver| driver.is_writable())
    }

    /// Register for the response head. Fires once, immediately if the
    /// response already arrived.
    pub fn on_response(&self, callback: Callback<C::Response>) -> Result<(), ClientError> {
        let ready = {
            let mut st = self.state.borrow_mut();
            match std::mem::replace(&mut st.response, Slot::Taken) {
                Slot::Empty => {
                    st.response = Slot::Waiting(Listener::Callback(callback));
                    None
                }
                Slot::Ready(outcome) => Some((callback, outcome)),
                other => {
                    st.response = other;
                    callback.disarm();
                    return Err(ClientError::ListenerRegistered);
                }
            }
        };
        if let Some((callback, outcome)) = ready {
            callback.complete(outcome);
        }
        Ok(())
    }

    /// Future resolving to the response head.
    pub fn response(&self) -> ResponseFuture<C> {
        ResponseFuture {
            state: self.state.clone(),
        }
    }

    /// Register for the next body chunk. Fires once per registration.
    pub fn read_body(&self, callback: Callback<BodyChunk>) -> Result<(), ClientError> {
        let ready = {
            let mut st = self.state.borrow_mut();
            if st.body.reader.is_some() {
                callback.disarm();
                return Err(ClientError::ListenerRegistered);
            }
            match st.next_chunk() {
                Some(outcome) => Some((callback, outcome)),
                None => {
                    st.body.reader = Some(Listener::Callback(callback));
                    None
                }
            }
        };
        if let Some((callback, outcome)) = ready {
            callback.complete(outcome);
        }
        Ok(())
    }

    /// Future resolving to the next body chunk.
    pub fn chunk(&self) -> ChunkFuture<C> {
        ChunkFuture {
            state: self.state.clone(),
        }
    }

    /// True once the request was fully written and the response fully read.
    pub fn is_complete(&self) -> bool {
        self.state.borrow().is_complete()
    }

    pub fn failure(&self) -> Option<ClientError> {
        self.state.borrow().failure.clone()
    }

    fn driver(&self) -> Result<Rc<dyn Driver<C>>, ClientError> {
        self.driver.upgrade().ok_or(ClientError::ConnectionClosed)
    }
}

impl<C: Codec> fmt::Debug for Exchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("write_complete", &st.write_complete)
            .field("read_complete", &st.read_complete)
            .field("failed", &st.failure.is_some())
            .finish()
    }
}

/// Resolves to the response head of an [`Exchange`].
pub struct ResponseFuture<C: Codec> {
    state: ExchangeRef<C>,
}

impl<C: Codec> Future for ResponseFuture<C> {
    type Output = Result<C::Response, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut st = self.state.borrow_mut();
        match std::mem::replace(&mut st.response, Slot::Taken) {
            Slot::Ready(outcome) => Poll::Ready(outcome),
            Slot::Empty | Slot::Waiting(Listener::Waker(_)) => {
                st.response = Slot::Waiting(Listener::Waker(cx.waker().clone()));
                Poll::Pending
            }
            Slot::Waiting(Listener::Callback(cb)) => {
                st.response = Slot::Waiting(Listener::Callback(cb));
                Poll::Ready(Err(ClientError::ListenerRegistered))
            }
            Slot::Taken => Poll::Ready(Err(ClientError::ListenerRegistered)),
        }
    }
}

/// Resolves to the next body chunk of an [`Exchange`].
pub struct ChunkFuture<C: Codec> {
    state: ExchangeRef<C>,
}

impl<C: Codec> Future for ChunkFuture<C> {
    type Output = Result<BodyChunk, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut st = self.state.borrow_mut();
        if matches!(st.body.reader, Some(Listener::Callback(_))) {
            return Poll::Ready(Err(ClientError::ListenerRegistered));
        }
        match st.next_chunk() {
            Some(outcome) => {
                st.body.reader = None;
                Poll::Ready(outcome)
            }
            None => {
                st.body.reader = Some(Listener::Waker(cx.waker().clone()));
                Poll::Pending
            }
        }
    }
}

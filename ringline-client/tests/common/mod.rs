#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use ringline_client::{
    BodyChunk, BufferPool, Callback, ClientError, CloseReason, Connection, ConnectionConfig,
    Exchange, FixedBufferPool, Http1Codec, OptionValue, Request, ResponseHead, Transport,
};

pub const LOCAL: &str = "127.0.0.1:40000";
pub const PEER: &str = "127.0.0.1:8080";

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Default)]
struct Script {
    inbound: VecDeque<Inbound>,
    written: Vec<u8>,
    /// `Some(n)` caps each write at `n` bytes; `Some(0)` blocks.
    write_limit: Option<usize>,
    nodelay: bool,
    option_calls: usize,
    fail_options: bool,
    closed: bool,
}

/// In-memory transport driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport(Rc<RefCell<Script>>);

impl MockTransport {
    pub fn feed(&self, data: &[u8]) {
        self.0
            .borrow_mut()
            .inbound
            .push_back(Inbound::Data(data.to_vec()));
    }

    pub fn feed_eof(&self) {
        self.0.borrow_mut().inbound.push_back(Inbound::Eof);
    }

    pub fn feed_error(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().inbound.push_back(Inbound::Error(kind));
    }

    /// Everything written so far, drained.
    pub fn take_written(&self) -> String {
        let bytes = std::mem::take(&mut self.0.borrow_mut().written);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.0.borrow_mut().write_limit = limit;
    }

    /// Make every later option call fail with an I/O error.
    pub fn fail_options(&self) {
        self.0.borrow_mut().fail_options = true;
    }

    pub fn option_calls(&self) -> usize {
        self.0.borrow().option_calls
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.0.borrow_mut();
        match script.inbound.pop_front() {
            Some(Inbound::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    data.drain(..n);
                    script.inbound.push_front(Inbound::Data(data));
                }
                Ok(n)
            }
            Some(Inbound::Eof) => {
                script.inbound.push_front(Inbound::Eof);
                Ok(0)
            }
            Some(Inbound::Error(kind)) => Err(kind.into()),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.0.borrow_mut();
        let n = match script.write_limit {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        script.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.borrow_mut().closed = true;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        LOCAL.parse().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        PEER.parse().ok()
    }

    fn supports_option(&self, name: &str) -> bool {
        name == "tcp_nodelay"
    }

    fn get_option(&self, name: &str) -> io::Result<Option<OptionValue>> {
        let mut script = self.0.borrow_mut();
        script.option_calls += 1;
        if script.fail_options {
            return Err(io::Error::other("option refused"));
        }
        match name {
            "tcp_nodelay" => Ok(Some(OptionValue::Bool(script.nodelay))),
            _ => Ok(None),
        }
    }

    fn set_option(&mut self, name: &str, value: OptionValue) -> io::Result<Option<OptionValue>> {
        let mut script = self.0.borrow_mut();
        script.option_calls += 1;
        if script.fail_options {
            return Err(io::Error::other("option refused"));
        }
        match (name, value) {
            ("tcp_nodelay", OptionValue::Bool(on)) => {
                let previous = std::mem::replace(&mut script.nodelay, on);
                Ok(Some(OptionValue::Bool(previous)))
            }
            _ => Err(io::ErrorKind::Unsupported.into()),
        }
    }
}

pub type Conn = Connection<MockTransport, Http1Codec>;

/// What a test observed for one submitted request.
#[derive(Default)]
pub struct Outcome {
    pub exchange: Option<Exchange<Http1Codec>>,
    pub admission_error: Option<ClientError>,
    pub status: Option<u16>,
    pub response_error: Option<ClientError>,
    pub body: Vec<u8>,
    pub ended: bool,
}

impl Outcome {
    pub fn exchange(&self) -> Exchange<Http1Codec> {
        self.exchange.clone().expect("request not admitted")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub type Tracked = Rc<RefCell<Outcome>>;

/// A connection over a mock transport, with an ordered event log.
pub struct Harness {
    pub conn: Conn,
    pub wire: MockTransport,
    pub log: Rc<RefCell<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        let wire = MockTransport::default();
        let pool: Arc<dyn BufferPool> = Arc::new(FixedBufferPool::new(8, 4096));
        let conn = Connection::new(wire.clone(), Http1Codec::new(), pool, config).unwrap();
        Self {
            conn,
            wire,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Submit `request`, logging each outcome under `name`.
    pub fn submit(&self, name: &str, request: Request) -> Result<Tracked, ClientError> {
        let outcome: Tracked = Rc::default();
        let (tracked, log, name) = (outcome.clone(), self.log.clone(), name.to_string());
        self.conn.submit(
            request,
            Callback::new(move |admitted: Result<Exchange<Http1Codec>, ClientError>| {
                match admitted {
                    Ok(exchange) => {
                        log.borrow_mut().push(format!("{name}: admitted"));
                        watch(&exchange, &name, &tracked, &log);
                        tracked.borrow_mut().exchange = Some(exchange);
                    }
                    Err(e) => {
                        log.borrow_mut().push(format!("{name}: rejected: {e}"));
                        tracked.borrow_mut().admission_error = Some(e);
                    }
                }
            }),
        )?;
        Ok(outcome)
    }

    /// Record close notifications in the log.
    pub fn watch_close(&self) {
        let log = self.log.clone();
        self.conn.on_close(move |reason: &CloseReason| {
            log.borrow_mut().push(format!("closed: {reason}"))
        });
    }

    pub fn respond(&self, data: &[u8]) {
        self.wire.feed(data);
        self.conn.on_readable();
    }

    pub fn events(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

fn watch(
    exchange: &Exchange<Http1Codec>,
    name: &str,
    tracked: &Tracked,
    log: &Rc<RefCell<Vec<String>>>,
) {
    let (t, l, n) = (tracked.clone(), log.clone(), name.to_string());
    exchange
        .on_response(Callback::new(move |head: Result<ResponseHead, ClientError>| {
            match head {
                Ok(head) => {
                    l.borrow_mut().push(format!("{n}: status {}", head.status()));
                    t.borrow_mut().status = Some(head.status());
                }
                Err(e) => {
                    l.borrow_mut().push(format!("{n}: failed: {e}"));
                    t.borrow_mut().response_error = Some(e);
                }
            }
        }))
        .unwrap();
    read_body(exchange.clone(), name.to_string(), tracked.clone(), log.clone());
}

fn read_body(
    exchange: Exchange<Http1Codec>,
    name: String,
    tracked: Tracked,
    log: Rc<RefCell<Vec<String>>>,
) {
    let next = exchange.clone();
    exchange
        .read_body(Callback::new(move |chunk: Result<BodyChunk, ClientError>| {
            match chunk {
                Ok(BodyChunk::Data(data)) => {
                    tracked.borrow_mut().body.extend_from_slice(&data);
                    read_body(next, name, tracked, log);
                }
                Ok(BodyChunk::End) => {
                    log.borrow_mut().push(format!("{name}: end"));
                    tracked.borrow_mut().ended = true;
                }
                // A failure before the head is logged by the response listener.
                Err(e) => {
                    if tracked.borrow().status.is_some() {
                        log.borrow_mut().push(format!("{name}: body failed: {e}"));
                    }
                }
            }
        }))
        .unwrap();
}

pub fn get(path: &str) -> Request {
    Request::get(path).header("host", "example.com")
}

pub fn ok(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

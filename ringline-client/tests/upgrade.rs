mod common;

use std::io::{Read, Write};

use common::{Harness, get, ok};
use ringline_client::{ClientError, State};

const SWITCH: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nconnection: upgrade\r\nupgrade: websocket\r\n\r\n";

fn upgrade_request() -> ringline_client::Request {
    get("/chat").upgrade("websocket")
}

#[test]
fn accepted_upgrade_hands_off_the_stream() {
    let h = Harness::new();
    h.watch_close();
    let u = h.submit("u", upgrade_request()).unwrap();
    assert!(h.wire.take_written().starts_with("GET /chat HTTP/1.1\r\n"));

    let mut data = SWITCH.to_vec();
    data.extend_from_slice(b"\x81\x05hello");
    h.respond(&data);

    assert_eq!(h.conn.state(), State::Upgrading);
    assert!(h.conn.is_open());
    assert!(!h.conn.is_upgraded());
    assert_eq!(u.borrow().status, Some(101));
    assert!(u.borrow().ended);

    // Bytes arriving now are left for the upgraded stream.
    h.respond(b"more");

    let mut stream = h.conn.perform_upgrade().unwrap();
    assert_eq!(h.conn.state(), State::Upgraded);
    assert!(h.conn.is_upgraded());
    assert!(!h.conn.is_open());
    assert_eq!(stream.read_buf(), b"\x81\x05hello");

    let mut buf = [0u8; 32];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"\x81\x05hello");
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"more");

    stream.write_all(b"frame").unwrap();
    assert_eq!(h.wire.take_written(), "frame");

    // The old protocol's lifecycle is over: no close notifications.
    h.conn.close();
    assert!(!h.events().iter().any(|e| e.starts_with("closed")));
    assert!(!h.wire.is_closed());
}

#[test]
fn upgrade_runs_alone() {
    let h = Harness::new();
    let a = h.submit("a", get("/a")).unwrap();
    let u = h.submit("u", upgrade_request()).unwrap();
    let b = h.submit("b", get("/b")).unwrap();
    assert_eq!(
        h.wire.take_written(),
        "GET /a HTTP/1.1\r\nhost: example.com\r\n\r\n"
    );
    assert_eq!(h.conn.queued(), 2);

    h.respond(&ok("1"));
    assert!(a.borrow().ended);
    assert!(h.wire.take_written().starts_with("GET /chat HTTP/1.1\r\n"));
    assert!(u.borrow().exchange.is_some());
    assert_eq!(h.conn.queued(), 1);

    h.respond(SWITCH);
    assert_eq!(h.conn.state(), State::Upgrading);
    assert!(matches!(
        b.borrow().admission_error,
        Some(ClientError::ConnectionUpgraded)
    ));
    assert_eq!(h.conn.queued(), 0);
    assert_eq!(h.wire.take_written(), "");

    let err = h.submit("late", get("/c")).err().unwrap();
    assert!(matches!(
        err,
        ClientError::IllegalState {
            op: "submit",
            state: State::Upgrading
        }
    ));
}

#[test]
fn declined_upgrade_keeps_the_connection() {
    let h = Harness::new();
    let u = h.submit("u", upgrade_request()).unwrap();
    let b = h.submit("b", get("/b")).unwrap();
    h.wire.take_written();
    assert_eq!(h.conn.queued(), 1);

    h.respond(b"HTTP/1.1 426 Upgrade Required\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(u.borrow().status, Some(426));
    assert_eq!(h.conn.state(), State::Open);
    assert_eq!(
        h.wire.take_written(),
        "GET /b HTTP/1.1\r\nhost: example.com\r\n\r\n"
    );

    h.respond(&ok("fine"));
    assert_eq!(b.borrow().body_text(), "fine");
}

#[test]
fn perform_upgrade_requires_upgrading() {
    let h = Harness::new();
    let err = h.conn.perform_upgrade().unwrap_err();
    assert!(matches!(
        err,
        ClientError::IllegalState {
            op: "perform_upgrade",
            state: State::Open
        }
    ));
    assert_eq!(h.conn.state(), State::Open);
    h.submit("a", get("/a")).unwrap();
    assert_eq!(h.conn.in_flight(), 1);
}

#[test]
fn switching_protocols_without_request_is_protocol_error() {
    let h = Harness::new();
    h.watch_close();
    let a = h.submit("a", get("/a")).unwrap();
    h.respond(SWITCH);
    assert_eq!(h.conn.state(), State::Closed);
    assert!(a.borrow().response_error.is_some());
    assert!(h.events().last().unwrap().starts_with("closed: protocol error:"));
}

#[test]
fn upgrade_twice_is_illegal() {
    let h = Harness::new();
    h.submit("u", upgrade_request()).unwrap();
    h.respond(SWITCH);
    let _stream = h.conn.perform_upgrade().unwrap();
    h.wire.take_written();
    assert!(matches!(
        h.conn.perform_upgrade(),
        Err(ClientError::IllegalState {
            state: State::Upgraded,
            ..
        })
    ));
    assert!(matches!(
        h.submit("late", get("/a")),
        Err(ClientError::IllegalState {
            state: State::Upgraded,
            ..
        })
    ));
    assert_eq!(h.wire.take_written(), "");
}

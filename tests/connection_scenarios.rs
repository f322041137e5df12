//! End-to-end `Connection` drives against an in-memory socket, covering
//! the scenarios the core itself is responsible for: preamble parsing
//! through to keep-alive reuse, chunked body delivery, header-size
//! rejection, longest-prefix routing, and the WebSocket hand-off.
//!
//! Grounded on the teacher's `tests/server_simple.rs` (a hand-rolled
//! mock transport driving `Proto::poll()` directly, rather than a real
//! socket); `MockStream` below plays the same role `MockData` /
//! `tk_bufstream` played there.

extern crate futures;
extern crate tokio_io;
extern crate vhost_http_core;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use futures::{Async, Poll};
use tokio_io::{AsyncRead, AsyncWrite};

use vhost_http_core::{
    AuthScheme, Config, Connection, EndpointListener, Listener,
    PrefixSpec, RequestBody, RequestContext, ResponseMessage,
};

struct Inner {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// Single-threaded in-memory duplex stream; all instances cloned from
/// the same `MockStream::new()` call share one `Inner` so a test can
/// push bytes in and inspect bytes out while a `Connection` owns its
/// own clone.
#[derive(Clone)]
struct MockStream {
    inner: Rc<RefCell<Inner>>,
}

impl MockStream {
    fn new() -> MockStream {
        MockStream {
            inner: Rc::new(RefCell::new(Inner {
                input: VecDeque::new(),
                output: Vec::new(),
            })),
        }
    }

    fn push_input(&self, bytes: &[u8]) {
        self.inner.borrow_mut().input.extend(bytes.iter().cloned());
    }

    fn written(&self) -> Vec<u8> {
        self.inner.borrow().output.clone()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data queued"));
        }
        let n = ::std::cmp::min(buf.len(), inner.input.len());
        for slot in buf[..n].iter_mut() {
            *slot = inner.input.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for MockStream {}

impl AsyncWrite for MockStream {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        Ok(Async::Ready(()))
    }
}

fn config() -> Arc<Config> {
    Config::new().done()
}

fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// Drive `conn` to completion, handing every delivery that shows up on
/// any of `queues` to `on_request` and sending its answer back. Panics
/// if the connection never reaches `Closed`/`HandedOff` within a
/// generous iteration budget (a stuck state machine is a test bug or a
/// product bug, not a hang worth waiting out).
fn drive<F>(
    conn: &mut Connection<MockStream>,
    queues: &[&Listener<MockStream>],
    mut on_request: F,
) where
    F: FnMut(RequestContext<MockStream>) -> ResponseMessage,
{
    for _ in 0..10_000 {
        if let Async::Ready(()) = conn.poll().unwrap() {
            return;
        }
        for queue in queues {
            if let Ok(Async::Ready(Some(delivery))) = queue.get_context() {
                let response = on_request(delivery.context);
                let _ = delivery.respond.send(response);
            }
        }
    }
    panic!("connection did not reach a terminal state");
}

fn ok_response(close: bool) -> ResponseMessage {
    ResponseMessage {
        bytes: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
        close: close,
        upgraded: false,
    }
}

fn single_listener(prefix: &str) -> (Arc<Listener<MockStream>>, Arc<EndpointListener<MockStream>>) {
    let listener: Arc<Listener<MockStream>> = Listener::new(
        vec![PrefixSpec::parse(prefix).unwrap()], 8, |_| AuthScheme::None);
    let endpoint: Arc<EndpointListener<MockStream>> = Arc::new(
        EndpointListener::new("127.0.0.1:80".parse().unwrap(), false, config()));
    endpoint.add_prefix(PrefixSpec::parse(prefix).unwrap(), listener.clone());
    (listener, endpoint)
}

#[test]
fn plain_get_then_keep_alive_reuse() {
    let (listener, endpoint) = single_listener("http://+:80/a/");
    let stream = MockStream::new();
    stream.push_input(
        b"GET /a/ HTTP/1.1\r\nHost: h\r\n\r\n\
          GET /a/ HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    let mut seen = 0;
    drive(&mut conn, &[&listener], |ctx| {
        seen += 1;
        assert_eq!(ctx.preamble.method, "GET");
        assert_eq!(ctx.preamble.routing_path(), "/a/");
        ok_response(false)
    });

    assert_eq!(seen, 2, "keep-alive must serve both preambles over one socket");
    let written = String::from_utf8(stream.written()).unwrap();
    assert_eq!(written.matches("200 OK").count(), 2);
}

#[test]
fn secure_endpoint_resolves_an_https_preamble_url() {
    let listener: Arc<Listener<MockStream>> = Listener::new(
        vec![PrefixSpec::parse("https://+:443/a/").unwrap()], 8, |_| AuthScheme::None);
    let endpoint: Arc<EndpointListener<MockStream>> = Arc::new(
        EndpointListener::new("127.0.0.1:443".parse().unwrap(), true, config()));
    endpoint.add_prefix(PrefixSpec::parse("https://+:443/a/").unwrap(), listener.clone());

    let stream = MockStream::new();
    stream.push_input(b"GET /a/?x=1 HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
    let mut conn = Connection::with_scheme(
        stream.clone(), config(), endpoint, 443, stop_flag(), true);

    drive(&mut conn, &[&listener], |ctx| {
        let url = ctx.preamble.url.as_ref().expect("url must resolve on a secure endpoint");
        assert_eq!(url.as_str(), "https://h/a/?x=1");
        ok_response(true)
    });
}

#[test]
fn chunked_post_body_is_fully_decoded() {
    let (listener, endpoint) = single_listener("http://+:80/x");
    let stream = MockStream::new();
    stream.push_input(
        b"POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n0\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    drive(&mut conn, &[&listener], |ctx| {
        let mut collected = Vec::new();
        match ctx.body {
            RequestBody::Chunked(mut body) => loop {
                let mut buf = [0u8; 32];
                match body.poll_read(&mut buf).unwrap() {
                    Async::Ready(0) => break,
                    Async::Ready(n) => collected.extend_from_slice(&buf[..n]),
                    Async::NotReady => break,
                }
            },
            _ => panic!("expected a chunked body"),
        }
        assert_eq!(collected, b"hello");
        ok_response(true)
    });
}

#[test]
fn header_overflow_without_terminator_yields_400() {
    let (listener, endpoint) = single_listener("http://+:80/");
    let stream = MockStream::new();
    let mut huge = Vec::from(&b"GET / HTTP/1.1\r\n"[..]);
    while huge.len() < 40 * 1024 {
        huge.extend_from_slice(b"X-Pad: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
    }
    stream.push_input(&huge);
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    drive(&mut conn, &[&listener], |_ctx| {
        panic!("an oversized preamble must never reach the host");
    });

    let written = String::from_utf8(stream.written()).unwrap();
    assert!(written.starts_with("HTTP/1.1 400"));
    assert!(written.contains("Headers too long"));
    assert!(written.contains("Connection: close"));
}

#[test]
fn longest_prefix_wins_between_two_listeners() {
    let root: Arc<Listener<MockStream>> = Listener::new(
        vec![PrefixSpec::parse("http://+:80/").unwrap()], 8, |_| AuthScheme::None);
    let api: Arc<Listener<MockStream>> = Listener::new(
        vec![PrefixSpec::parse("http://+:80/api/").unwrap()], 8, |_| AuthScheme::None);
    let endpoint: Arc<EndpointListener<MockStream>> = Arc::new(
        EndpointListener::new("127.0.0.1:80".parse().unwrap(), false, config()));
    endpoint.add_prefix(PrefixSpec::parse("http://+:80/").unwrap(), root.clone());
    endpoint.add_prefix(PrefixSpec::parse("http://+:80/api/").unwrap(), api.clone());

    let stream = MockStream::new();
    stream.push_input(b"GET /api/v1/ HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    drive(&mut conn, &[&root, &api], |ctx| {
        assert_eq!(ctx.preamble.routing_path(), "/api/v1/");
        ok_response(true)
    });

    match root.get_context().unwrap() {
        Async::NotReady => {}
        _ => panic!("the root listener must never see a request the /api/ prefix claims"),
    }
}

#[test]
fn websocket_upgrade_is_handed_off_without_flushing_a_body() {
    let (listener, endpoint) = single_listener("http://+:80/ws");
    let stream = MockStream::new();
    stream.push_input(
        b"GET /ws HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
          Sec-WebSocket-Version: 13\r\n\
          Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    drive(&mut conn, &[&listener], |ctx| {
        assert!(ctx.preamble.is_websocket_upgrade());
        ResponseMessage {
            bytes: ::vhost_http_core::switching_protocols(&[
                ("Sec-WebSocket-Accept", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
            ]),
            close: false,
            upgraded: true,
        }
    });

    let written = String::from_utf8(stream.written()).unwrap();
    assert!(written.starts_with("HTTP/1.1 101 Switching Protocols"));
}

#[test]
fn authentication_challenge_is_retried_then_closed() {
    let listener: Arc<Listener<MockStream>> = Listener::new(
        vec![PrefixSpec::parse("http://+:80/secure/").unwrap()], 8,
        |_| AuthScheme::Basic);
    let cfg = Config::new().auth_retry_limit(2).done();
    let endpoint: Arc<EndpointListener<MockStream>> = Arc::new(
        EndpointListener::new("127.0.0.1:80".parse().unwrap(), false, cfg.clone()));
    endpoint.add_prefix(PrefixSpec::parse("http://+:80/secure/").unwrap(), listener.clone());

    let stream = MockStream::new();
    stream.push_input(
        b"GET /secure/ HTTP/1.1\r\nHost: h\r\n\r\n\
          GET /secure/ HTTP/1.1\r\nHost: h\r\n\r\n\
          GET /secure/ HTTP/1.1\r\nHost: h\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), cfg, endpoint, 80, stop_flag());

    drive(&mut conn, &[&listener], |_ctx| {
        panic!("an unauthenticated request must never reach the host");
    });

    let written = String::from_utf8(stream.written()).unwrap();
    assert_eq!(written.matches("401 Unauthorized").count(), 3);
    assert_eq!(written.matches("WWW-Authenticate: Basic").count(), 3);
    assert_eq!(written.matches("Connection: close").count(), 1);
}

#[test]
fn unregistered_prefix_yields_404_and_closes() {
    let (listener, endpoint) = single_listener("http://+:80/api/");
    let stream = MockStream::new();
    stream.push_input(b"GET /nope HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
    let mut conn = Connection::new(stream.clone(), config(), endpoint, 80, stop_flag());

    drive(&mut conn, &[&listener], |_ctx| {
        panic!("an unmatched path must never reach the host");
    });

    let written = String::from_utf8(stream.written()).unwrap();
    assert!(written.starts_with("HTTP/1.1 404"));
}

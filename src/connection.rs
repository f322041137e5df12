//! Per-socket state machine (`§4.6`): read preamble, route, hand off to
//! the host, write the response, flush leftover body, and either close
//! or loop back to reading the next preamble.
//!
//! Grounded on the teacher's `server::proto::Proto`, which held the
//! same kind of fields (`io`, parser position, request/response
//! halves, `reuses` counter) but whose `do_reads`/`do_writes` methods
//! are `unimplemented!()` in the teacher tree. Those stubs are not
//! replicated here (`SPEC_FULL.md`, resolving `§9` Open Question 1);
//! this is a complete implementation of the six states `§4.6` names.
//!
//! Buffering is done with `bytes::BytesMut` rather than the teacher's
//! `tk-bufstream`/`netbuf` pairing (noted as a dependency swap in
//! `DESIGN.md`), driven by `tokio_io::AsyncRead::read_buf`, which the
//! same crate generation exposes for exactly this purpose.
//!
//! The body framing (`RequestStream`/`ChunkedRequestStream`) lives in
//! `Shared`, alongside the socket and input buffer, rather than being
//! owned solely by the `BodyHandle` given to host code. That way
//! `FlushingInput` (`§4.5` `FlushInput`, `§4.6`) can observe exactly
//! how much of the body the host actually consumed and drain whatever
//! is left before a keep-alive reuse, instead of assuming the host
//! read to completion.

use std::cell::RefCell;
use std::io::Write as IoWrite;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use tokio_io::{AsyncRead, AsyncWrite};

use config::Config;
use error::Error;
use listener::AuthScheme;
use request::{parse_preamble, RequestPreamble};
use request_stream::{ChunkedRequestStream, RequestStream};
use response;
use status::Status;
use version::Version;

/// The narrow interface `Connection` needs from its owning
/// `EndpointListener` (`§4.7`): resolve a request to the `Listener`
/// that should receive it.
pub trait Router<S> {
    fn route(&self, host: Option<&str>, port: u16, path: &str)
        -> Option<Box<ContextSink<S>>>;

    /// Called once a request on this connection has matched a route,
    /// so the endpoint can stop tracking `flag` in its unregistered
    /// set (`§4.7`: "each accepted socket ... is placed into the
    /// unregistered set ... force-closed" on endpoint close). No-op by
    /// default; only `EndpointListener` has an unregistered set to
    /// maintain.
    fn unregister(&self, _flag: &Arc<AtomicBool>) {}
}

/// The narrow interface `Connection` needs from a matched `Listener`
/// (`§4.9`): decide whether the request must be challenged for
/// credentials, and hand the context to its `ContextQueue` to get back
/// the channel the host will use to deliver the finished response.
pub trait ContextSink<S> {
    fn deliver(&self, ctx: RequestContext<S>) -> oneshot::Receiver<ResponseMessage>;

    /// Authentication scheme this request should be challenged with,
    /// decided synchronously before `deliver` (`§4.6` AwaitingRoute,
    /// `§4.9`'s selector). `AuthScheme::None`/`Anonymous` let the
    /// request through unchallenged.
    fn auth_scheme(&self, ctx: &RequestContext<S>) -> AuthScheme;
}

/// What host code hands back once it has written a response: the
/// fully serialized bytes (status line, headers, body) and whether the
/// connection must close afterward.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub bytes: Vec<u8>,
    pub close: bool,
    /// Set by host code after a successful WebSocket handshake
    /// (`§4.1`/`§4.5` hand-off). Once the bytes above are written, the
    /// connection stops parsing HTTP entirely and leaves the socket to
    /// whoever is holding a `RawHandle` from this request's context —
    /// frame coding itself is out of scope (`SPEC_FULL.md` `§1`
    /// Non-goals).
    pub upgraded: bool,
}

/// Which body framing (`§3`, `§4.5`) applies to the in-flight request,
/// shared between the `BodyHandle` host code reads through and the
/// `Connection`'s own `FlushingInput` drain.
enum BodyFraming {
    Empty,
    Fixed(RequestStream),
    Chunked(ChunkedRequestStream),
}

impl BodyFraming {
    fn is_eof(&self) -> bool {
        match *self {
            BodyFraming::Empty => true,
            BodyFraming::Fixed(ref s) => s.is_eof(),
            BodyFraming::Chunked(ref s) => s.is_eof(),
        }
    }

    /// Decode/copy from `transport` into `out`. Returns `(used,
    /// written)`: how many transport bytes were consumed and how many
    /// body bytes landed in `out`.
    fn read(&mut self, transport: &[u8], out: &mut [u8]) -> Result<(usize, usize), Error> {
        match *self {
            BodyFraming::Empty => Ok((0, 0)),
            BodyFraming::Fixed(ref mut s) => {
                let (_, used, n) = s.read(transport, out);
                Ok((used, n))
            }
            BodyFraming::Chunked(ref mut s) => {
                let (_, used, n) = s.read(transport, out)?;
                Ok((used, n))
            }
        }
    }
}

/// One fixed- or chunked-length body reader, or no body at all, handed
/// to the host alongside the preamble (`§3`).
pub enum RequestBody<S> {
    Fixed(BodyHandle<S>),
    Chunked(BodyHandle<S>),
    Empty,
}

/// What is delivered to the host through a `Listener`'s `ContextQueue`
/// (`§4.9`).
pub struct RequestContext<S> {
    pub preamble: RequestPreamble,
    pub body: RequestBody<S>,
    /// Passthrough to the connection's socket, meaningful once host
    /// code has answered a `preamble.is_websocket_upgrade()` request
    /// with a switching-protocols `ResponseMessage` (`upgraded: true`).
    /// Reading or writing through it before that point races the
    /// `Connection`'s own state machine; it's offered unconditionally
    /// only because building it is free (one `Rc` clone).
    pub raw: RawHandle<S>,
}

struct Shared<S> {
    socket: S,
    in_buf: BytesMut,
    body: BodyFraming,
}

/// Raw byte passthrough to a connection's socket, handed to host code
/// alongside every `RequestContext` for the WebSocket hand-off case
/// (`§4.1`). Frame coding is out of scope; this only moves bytes.
pub struct RawHandle<S> {
    shared: Rc<RefCell<Shared<S>>>,
}

impl<S: AsyncRead> RawHandle<S> {
    pub fn poll_read(&mut self, out: &mut [u8]) -> Poll<usize, Error> {
        let mut shared = self.shared.borrow_mut();
        if shared.in_buf.is_empty() {
            fill_from_socket(&mut shared, out.len().max(1))?;
        }
        let n = ::std::cmp::min(out.len(), shared.in_buf.len());
        out[..n].copy_from_slice(&shared.in_buf[..n]);
        consume(&mut shared.in_buf, n);
        if n == 0 {
            return Ok(Async::NotReady);
        }
        Ok(Async::Ready(n))
    }
}

impl<S: AsyncWrite> RawHandle<S> {
    pub fn poll_write(&mut self, buf: &[u8]) -> Poll<usize, Error> {
        let mut shared = self.shared.borrow_mut();
        match shared.socket.write(buf) {
            Ok(n) => Ok(Async::Ready(n)),
            Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {
                Ok(Async::NotReady)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
impl<S> RawHandle<S> {
    /// Test-only constructor for modules that build a `RequestContext`
    /// by hand instead of going through `Connection::step_awaiting_route`.
    pub fn for_test(socket: S) -> RawHandle<S> {
        RawHandle { shared: Rc::new(RefCell::new(Shared {
            socket: socket,
            in_buf: BytesMut::new(),
            body: BodyFraming::Empty,
        })) }
    }
}

/// A body reader handed to host code; pulls from the same socket the
/// `Connection` itself reads from, so further transport reads happen
/// lazily as the host consumes the body (`§4.5`). The decode state
/// lives in the shared `BodyFraming`, not in this handle, so
/// `Connection` can keep draining after the handle is dropped.
pub struct BodyHandle<S> {
    shared: Rc<RefCell<Shared<S>>>,
}

impl<S: AsyncRead> BodyHandle<S> {
    pub fn poll_read(&mut self, out: &mut [u8]) -> Poll<usize, Error> {
        let mut shared = self.shared.borrow_mut();
        fill_from_socket(&mut shared, 8192)?;
        let transport = shared.in_buf.to_vec();
        let (used, n) = shared.body.read(&transport, out)?;
        consume(&mut shared.in_buf, used);
        Ok(Async::Ready(n))
    }

    pub fn is_eof(&self) -> bool {
        self.shared.borrow().body.is_eof()
    }
}

fn consume(buf: &mut BytesMut, n: usize) {
    let n = ::std::cmp::min(n, buf.len());
    let _ = buf.split_to(n);
}

fn fill_from_socket<S: AsyncRead>(shared: &mut Shared<S>, want: usize)
    -> Result<(), Error>
{
    if shared.in_buf.len() >= want {
        return Ok(());
    }
    shared.in_buf.reserve(want);
    match shared.socket.read_buf(&mut shared.in_buf) {
        Ok(Async::Ready(_)) | Ok(Async::NotReady) => Ok(()),
        Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// `§4.6`'s six connection states.
enum State<S> {
    ReadingPreamble,
    AwaitingRoute(RequestPreamble, Vec<u8>),
    Dispatched(oneshot::Receiver<ResponseMessage>, bool /* close after */),
    WritingResponse(Vec<u8>, usize, bool /* close after */, bool /* upgraded */),
    FlushingInput(bool /* close after */),
    /// Response to a WebSocket handshake has been written; the socket
    /// now belongs to whoever holds this request's `RawHandle`. The
    /// connection's own HTTP parsing stops here for good (`§4.1`).
    HandedOff,
    Closed,
    /// Transient placeholder only ever observed inside `poll()`'s
    /// `mem::replace` dance, never left behind across a `NotReady`.
    Transitioning(::std::marker::PhantomData<S>),
}

pub struct Connection<S> {
    shared: Rc<RefCell<Shared<S>>>,
    state: State<S>,
    config: Arc<Config>,
    router: Arc<Router<S>>,
    reuses: u32,
    auth_attempts: u32,
    deadline: Instant,
    /// Force-close signal for this one connection, set only while it
    /// remains in its owning `EndpointListener`'s unregistered set
    /// (`§4.7`) — i.e. before it has matched a route. Distinct from the
    /// accept loop's own cancellation signal (`§5`), which stops new
    /// sockets from being accepted but never touches an already
    /// in-flight connection.
    force_close: Arc<AtomicBool>,
    local_port: u16,
    /// Whether this connection was accepted on a secure (`https`)
    /// endpoint (`§3`'s `tls-wrapped?`) — used only to pick the scheme
    /// `RequestPreamble::resolve_url` resolves origin-form targets
    /// against; TLS handshaking itself happens below `S` and is out of
    /// scope here (`§1`).
    secure: bool,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    pub fn new(socket: S, config: Arc<Config>, router: Arc<Router<S>>,
        local_port: u16, force_close: Arc<AtomicBool>) -> Connection<S>
    {
        Connection::with_scheme(socket, config, router, local_port, force_close, false)
    }

    pub fn with_scheme(socket: S, config: Arc<Config>, router: Arc<Router<S>>,
        local_port: u16, force_close: Arc<AtomicBool>, secure: bool) -> Connection<S>
    {
        let deadline = Instant::now() + config.read_deadline(0);
        Connection {
            shared: Rc::new(RefCell::new(Shared {
                socket: socket,
                in_buf: BytesMut::new(),
                body: BodyFraming::Empty,
            })),
            state: State::ReadingPreamble,
            config: config,
            router: router,
            reuses: 0,
            auth_attempts: 0,
            deadline: deadline,
            force_close: force_close,
            local_port: local_port,
            secure: secure,
        }
    }

    /// Drive the state machine one step. Returns `Ok(Async::Ready(()))`
    /// once the connection is `Closed`.
    pub fn poll(&mut self) -> Poll<(), Error> {
        if self.force_close.load(Ordering::SeqCst) {
            self.state = State::Closed;
        }
        loop {
            let current = ::std::mem::replace(&mut self.state,
                State::Transitioning(::std::marker::PhantomData));
            match current {
                State::ReadingPreamble => {
                    if Instant::now() > self.deadline {
                        debug!("read deadline elapsed after {} reuse(s)", self.reuses);
                        self.state = self.synthesize_error(
                            Status::RequestTimeout, "read timed out", true);
                        continue;
                    }
                    match self.step_reading_preamble()? {
                        Async::Ready(next) => self.state = next,
                        Async::NotReady => {
                            self.state = State::ReadingPreamble;
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::AwaitingRoute(preamble, carry) => {
                    self.state = self.step_awaiting_route(preamble, carry);
                }
                State::Dispatched(mut recv, close) => {
                    match recv.poll() {
                        Ok(Async::Ready(msg)) => {
                            self.state = State::WritingResponse(
                                msg.bytes, 0, close || msg.close, msg.upgraded);
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::Dispatched(recv, close);
                            return Ok(Async::NotReady);
                        }
                        Err(_) => {
                            // host dropped the sender without responding
                            self.state = State::Closed;
                        }
                    }
                }
                State::WritingResponse(bytes, written, close, upgraded) => {
                    match self.step_writing(&bytes, written)? {
                        Async::Ready(()) => {
                            self.state = if upgraded {
                                State::HandedOff
                            } else {
                                State::FlushingInput(close)
                            };
                        }
                        Async::NotReady => {
                            self.state = State::WritingResponse(
                                bytes, written, close, upgraded);
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::FlushingInput(close) => {
                    match self.step_flushing_input()? {
                        Async::Ready(()) => {
                            if close {
                                self.state = State::Closed;
                            } else {
                                self.reuses += 1;
                                self.deadline = Instant::now()
                                    + self.config.read_deadline(self.reuses);
                                self.state = State::ReadingPreamble;
                            }
                        }
                        Async::NotReady => {
                            self.state = State::FlushingInput(close);
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::HandedOff => {
                    self.state = State::HandedOff;
                    return Ok(Async::Ready(()));
                }
                State::Closed => {
                    self.state = State::Closed;
                    return Ok(Async::Ready(()));
                }
                State::Transitioning(_) => unreachable!(),
            }
        }
    }

    fn step_reading_preamble(&mut self) -> Poll<State<S>, Error> {
        let max = self.config.get_max_preamble_size();
        let mut shared = self.shared.borrow_mut();
        fill_from_socket(&mut shared, 8192)?;

        if let Some(end) = find_blank_line(&shared.in_buf) {
            let buf = shared.in_buf.to_vec();
            match parse_preamble(&buf[..end])? {
                Some((preamble, used)) => {
                    let carry = buf[used..].to_vec();
                    shared.in_buf.clear();
                    return Ok(Async::Ready(
                        State::AwaitingRoute(preamble, carry)));
                }
                None => unreachable!("blank line implies a complete preamble"),
            }
        }

        if shared.in_buf.len() > max {
            drop(shared);
            return Ok(Async::Ready(
                self.synthesize_error(Status::BadRequest,
                    "Headers too long", true)));
        }

        Ok(Async::NotReady)
    }

    fn step_awaiting_route(&mut self, mut preamble: RequestPreamble, carry: Vec<u8>)
        -> State<S>
    {
        preamble.resolve_url(if self.secure { "https" } else { "http" });
        let host = preamble.host_for_routing().map(|h| h.to_string());
        let path = preamble.routing_path().to_string();
        match self.router.route(host.as_ref().map(|s| s.as_str()),
            self.local_port, &path)
        {
            Some(sink) => {
                // Past this point the connection has matched a route;
                // the endpoint no longer needs to force-close it on
                // its own (`§4.7`).
                self.router.unregister(&self.force_close);

                let framing = if preamble.chunked {
                    BodyFraming::Chunked(ChunkedRequestStream::new(carry))
                } else {
                    match preamble.content_length {
                        Some(0) | None => BodyFraming::Empty,
                        Some(n) => BodyFraming::Fixed(RequestStream::new(carry, Some(n))),
                    }
                };
                let body = match &framing {
                    &BodyFraming::Empty => RequestBody::Empty,
                    &BodyFraming::Fixed(_) => RequestBody::Fixed(
                        BodyHandle { shared: self.shared.clone() }),
                    &BodyFraming::Chunked(_) => RequestBody::Chunked(
                        BodyHandle { shared: self.shared.clone() }),
                };
                self.shared.borrow_mut().body = framing;
                let close = preamble.connection_close;
                let raw = RawHandle { shared: self.shared.clone() };
                let ctx = RequestContext { preamble: preamble, body: body, raw: raw };
                match sink.auth_scheme(&ctx) {
                    AuthScheme::None | AuthScheme::Anonymous => {
                        let recv = sink.deliver(ctx);
                        State::Dispatched(recv, close)
                    }
                    scheme => self.challenge(scheme, close),
                }
            }
            None => {
                debug!("no listener registered for host {:?} path {:?}",
                    host, path);
                let close = preamble.connection_close;
                self.synthesize_error(Status::NotFound,
                    "no matching prefix", close)
            }
        }
    }

    /// Emit a `401` challenge for `scheme` (`§4.6` AwaitingRoute, `§7`
    /// Authentication): keep the connection open for a credential
    /// retry on the next preamble, up to `Config::auth_retry_limit`
    /// attempts, then close it.
    fn challenge(&mut self, scheme: AuthScheme, requested_close: bool) -> State<S> {
        self.auth_attempts += 1;
        if self.auth_attempts > self.config.get_auth_retry_limit() {
            debug!("authentication retry limit ({}) exceeded after {} attempt(s)",
                self.config.get_auth_retry_limit(), self.auth_attempts);
            let status = Error::AuthenticationFailed.status()
                .expect("AuthenticationFailed always maps to a status");
            return self.synthesize_error(status,
                "authentication retries exhausted", true);
        }
        let page = response::unauthorized_challenge(
            Version::Http11, auth_scheme_name(scheme), requested_close);
        State::WritingResponse(page, 0, requested_close, false)
    }

    fn step_writing(&mut self, bytes: &[u8], mut written: usize)
        -> Poll<(), Error>
    {
        let mut shared = self.shared.borrow_mut();
        while written < bytes.len() {
            match shared.socket.write(&bytes[written..]) {
                Ok(0) => return Err(Error::PrematureEof),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {
                    return Ok(Async::NotReady);
                }
                Err(e) => {
                    if self.config.get_ignore_write_errors() {
                        return Ok(Async::Ready(()));
                    }
                    return Err(Error::Io(e));
                }
            }
        }
        let _ = shared.socket.flush();
        Ok(Async::Ready(()))
    }

    /// Drain whatever body bytes the host never read (`§4.5`
    /// `FlushInput`), discarding the decoded output. A fixed-length
    /// body is done once its advertised length has been consumed; a
    /// chunked one is done once the decoder reports `End`. Framing
    /// violations surface as an error so the caller closes instead of
    /// reusing a connection whose byte boundary is now unknown.
    fn step_flushing_input(&mut self) -> Poll<(), Error> {
        let mut scratch = [0u8; 8192];
        loop {
            let mut shared = self.shared.borrow_mut();
            if shared.body.is_eof() {
                return Ok(Async::Ready(()));
            }
            fill_from_socket(&mut shared, 8192)?;
            if shared.in_buf.is_empty() {
                return Ok(Async::NotReady);
            }
            let transport = shared.in_buf.to_vec();
            let (used, _) = shared.body.read(&transport, &mut scratch)?;
            if used == 0 {
                return Ok(Async::NotReady);
            }
            consume(&mut shared.in_buf, used);
        }
    }

    fn synthesize_error(&self, status: Status, message: &str, close: bool)
        -> State<S>
    {
        let page = response::error_page(Version::Http11, status, message, close);
        State::WritingResponse(page, 0, close, false)
    }
}

/// `WWW-Authenticate` scheme token for a challenge (`§4.6`, `§7`).
/// Only ever called for a scheme `step_awaiting_route` decided to
/// challenge with, i.e. never `None`/`Anonymous`.
fn auth_scheme_name(scheme: AuthScheme) -> &'static str {
    match scheme {
        AuthScheme::Basic => "Basic",
        AuthScheme::Digest => "Digest",
        AuthScheme::None | AuthScheme::Anonymous => {
            unreachable!("challenge is never raised for a pass-through scheme")
        }
    }
}

/// Position right after the first blank line in `buf`, i.e. the length
/// of the preamble including its terminating empty line. Recognizes a
/// bare `\n\n` the same way `LineReader` recognizes a bare LF as a line
/// terminator (`§4.2`), not just the canonical `\r\n\r\n`.
fn find_blank_line(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            let seg = &buf[start..i];
            let seg = if seg.ends_with(b"\r") { &seg[..seg.len() - 1] } else { seg };
            if seg.is_empty() {
                return Some(i + 1);
            }
            start = i + 1;
        }
    }
    None
}

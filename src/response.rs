//! Minimal response serialization for the core's own synthesized
//! messages: error pages (`§6`) and the `101 Switching Protocols` line
//! that precedes a WebSocket hand-off (`§4.6`). Writing an actual
//! application response is host code's job — this module only ever
//! emits the handful of messages the state machine itself is
//! responsible for.
//!
//! Grounded on the teacher's `server::encoder::Encoder` and
//! `server::simple_error_page::SimpleErrorPage`, stripped of the
//! `tk-bufstream`-specific `MessageState`/`WriteBuf` plumbing (which
//! belongs to the full response-writing surface this crate doesn't
//! provide) down to a plain byte-buffer writer.

use std::io::Write;

use status::Status;
use version::Version;

#[cfg(feature = "date_header")]
fn write_date_header(out: &mut Vec<u8>) {
    use httpdate::HttpDate;
    use std::time::SystemTime;
    let _ = write!(out, "Date: {}\r\n", HttpDate::from(SystemTime::now()));
}

#[cfg(not(feature = "date_header"))]
fn write_date_header(_out: &mut Vec<u8>) {}

/// Shared renderer behind `error_page`/`unauthorized_challenge`:
/// status line, `Date`, any `extra_headers`, then the standard error
/// body template from `§6`.
fn render_page(version: Version, status: Status, message: &str, close: bool,
    extra_headers: &[(&str, &str)]) -> Vec<u8>
{
    let body = format!(
        "<html><body><h1>{} {} ({})</h1></body></html>",
        status.code(), status.reason(), message);

    let mut out = Vec::with_capacity(256 + body.len());
    let _ = write!(out, "{} {} {}\r\n", version, status.code(), status.reason());
    write_date_header(&mut out);
    for &(name, value) in extra_headers {
        let _ = write!(out, "{}: {}\r\n", name, value);
    }
    let _ = write!(out, "Content-Type: text/html; charset=utf-8\r\n");
    let _ = write!(out, "Content-Length: {}\r\n", body.len());
    if close {
        let _ = write!(out, "Connection: close\r\n");
    }
    let _ = write!(out, "\r\n");
    out.extend_from_slice(body.as_bytes());
    out
}

/// Render the standard error page template from `§6`:
/// `<html><body><h1>{status} {reason} ({message})</h1></body></html>`
/// with a matching `Content-Type`/`Content-Length`, into a fresh
/// buffer ready to write to the socket.
///
/// `close` marks whether this response ends the connection (always the
/// case for errors discovered before or during preamble parsing,
/// `§4.6`); when set, `Connection: close` is emitted.
pub fn error_page(version: Version, status: Status, message: &str, close: bool)
    -> Vec<u8>
{
    render_page(version, status, message, close, &[])
}

/// Render a `401 Unauthorized` challenge naming `scheme_name` in a
/// `WWW-Authenticate` header (`§4.6` AwaitingRoute, `§7`
/// Authentication). `close` behaves as in `error_page`: set once the
/// connection's retry bound (`Config::auth_retry_limit`) is exhausted.
pub fn unauthorized_challenge(version: Version, scheme_name: &str, close: bool)
    -> Vec<u8>
{
    render_page(version, Status::Unauthorized, "authentication required", close,
        &[("WWW-Authenticate", scheme_name)])
}

/// Render the `100 Continue` interim response a host can write back
/// before reading the body of a request carrying `Expect:
/// 100-continue` (`§6`: "observed but not automatically acted upon by
/// the core" — `RequestPreamble::expects_100_continue` is the
/// observation, this is the convenience the core offers host code that
/// chooses to act on it).
pub fn continue_100() -> Vec<u8> {
    b"HTTP/1.1 100 Continue\r\n\r\n".to_vec()
}

/// Render the `101 Switching Protocols` response that hands the
/// connection to a WebSocket layer (`§4.6`). `extra_headers` lets the
/// caller echo back a negotiated `Sec-WebSocket-Protocol`/extensions;
/// this crate does not compute `Sec-WebSocket-Accept` itself (`§1`
/// Non-goals), so the caller supplies it as one of `extra_headers`.
pub fn switching_protocols(extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    let _ = write!(out, "HTTP/1.1 101 Switching Protocols\r\n");
    let _ = write!(out, "Upgrade: websocket\r\n");
    let _ = write!(out, "Connection: Upgrade\r\n");
    for &(name, value) in extra_headers {
        let _ = write!(out, "{}: {}\r\n", name, value);
    }
    let _ = write!(out, "\r\n");
    out
}

use std::str::from_utf8;

use httparse;

use error::Error;
use header_set::HeaderSet;
use version::Version;
use websocket::{self, UpgradeRequest};

/// The request-target grammar of RFC 7230 §5.3, kept distinct from the
/// resolved `url` field so host code can tell an origin-form path from an
/// absolute-form proxy request (`§3`).
///
/// Grounded on the teacher's `server::request_target::RequestTarget`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// `/hello?name=world`
    Origin(String),
    /// `http://example.com:8080/hello` — path may lack a leading slash.
    Absolute { scheme: String, authority: String, path: String },
    /// `example.com:8080`, only meaningful for `CONNECT`.
    Authority(String),
    /// `*`
    Asterisk,
}

fn authority_end_char(x: &u8) -> bool {
    *x == b'/' || *x == b'?' || *x == b'#' || *x == b'@'
}

impl RequestTarget {
    pub fn parse(s: &str) -> Option<RequestTarget> {
        if s.is_empty() {
            return None;
        }
        if s.starts_with('/') {
            return Some(RequestTarget::Origin(s.to_string()));
        }
        for (scheme, prefix) in &[("http", "http://"), ("https", "https://")] {
            if let Some(rest) = s.strip_prefix(prefix) {
                let auth_end = rest.as_bytes().iter()
                    .position(authority_end_char)
                    .unwrap_or(rest.len());
                return Some(RequestTarget::Absolute {
                    scheme: scheme.to_string(),
                    authority: rest[..auth_end].to_string(),
                    path: rest[auth_end..].to_string(),
                });
            }
        }
        if s == "*" {
            return Some(RequestTarget::Asterisk);
        }
        if s.as_bytes().iter().position(authority_end_char).is_none() {
            return Some(RequestTarget::Authority(s.to_string()));
        }
        None
    }

    /// The path component to route on, when one exists.
    pub fn path(&self) -> Option<&str> {
        match *self {
            RequestTarget::Origin(ref s) => {
                Some(s.split('?').next().unwrap_or(s.as_str()))
            }
            RequestTarget::Absolute { ref path, .. } => Some(path.as_str()),
            RequestTarget::Authority(_) | RequestTarget::Asterisk => None,
        }
    }
}

/// A fully parsed HTTP/1.x request preamble (`§3`).
#[derive(Debug, Clone)]
pub struct RequestPreamble {
    pub method: String,
    pub target: RequestTarget,
    pub raw_target: String,
    pub version: Version,
    pub headers: HeaderSet,
    pub host_header: Option<String>,
    /// `None` means no body (no `Content-Length`, no chunked encoding).
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub expects_100_continue: bool,
    pub connection_close: bool,
    pub websocket_upgrade: Option<UpgradeRequest>,
    /// The resolved absolute URL (`§3`: `url (resolved)`), filled in by
    /// `resolve_url` once the connection knows which scheme it was
    /// accepted under — `parse_preamble` itself never sees that, since a
    /// preamble is scheme-agnostic until `Connection::step_awaiting_route`
    /// routes it.
    pub url: Option<::url::Url>,
}

impl RequestPreamble {
    pub fn is_websocket_upgrade(&self) -> bool {
        self.websocket_upgrade.is_some()
    }

    /// Resolve and cache the absolute URL for this request under
    /// `scheme` (`"http"`/`"https"`, decided by whether the connection
    /// was accepted on a secure endpoint). A malformed `Host` header or
    /// absolute-form target that the `url` crate itself rejects leaves
    /// `self.url` as `None` rather than failing the request — the core
    /// already routes on `host_for_routing`/`routing_path` without
    /// needing a parsed `Url`, so this is a convenience for host code,
    /// not a routing dependency.
    pub fn resolve_url(&mut self, scheme: &str) {
        self.url = self.build_url(scheme).ok();
    }

    fn build_url(&self, scheme: &str) -> Result<::url::Url, ::url::ParseError> {
        match self.target {
            // An absolute-form target already names its own scheme
            // (RFC 7230 §5.3.2); the connection's own scheme only
            // applies to origin-form targets resolved against `Host`.
            RequestTarget::Absolute { scheme: ref target_scheme, ref authority, ref path } => {
                ::url::Url::parse(&format!("{}://{}{}", target_scheme, authority, path))
            }
            _ => {
                let host = self.host_header.as_ref().map(|s| s.as_str())
                    .ok_or(::url::ParseError::EmptyHost)?;
                ::url::Url::parse(&format!("{}://{}{}", scheme, host, self.raw_target))
            }
        }
    }

    /// `(host, port)` resolved from an absolute-form target, falling
    /// back to the `Host` header — used by `EndpointListener` routing
    /// (`§4.7`). Port defaults to 80/443 based on the scheme the
    /// connection was accepted on, which the caller supplies.
    pub fn host_for_routing(&self) -> Option<&str> {
        match self.target {
            RequestTarget::Absolute { ref authority, .. } => {
                Some(authority.split(':').next().unwrap_or(authority.as_str()))
            }
            _ => self.host_header.as_ref().map(|h| {
                h.split(':').next().unwrap_or(h.as_str())
            }),
        }
    }

    pub fn routing_path(&self) -> &str {
        self.target.path().unwrap_or("/")
    }
}

/// Number of headers to allocate on the stack before falling back to a
/// heap allocation (`§4.1`'s "header-size cap" is a byte cap; this is
/// httparse's separate header-*count* cap, kept from the teacher).
const MIN_HEADERS: usize = 16;
const MAX_HEADERS: usize = 1024;

/// Parse one preamble out of `buf`. Returns `Ok(None)` when more bytes
/// are needed (mirrors `httparse::Status::Partial`); the caller
/// (`Connection::ReadingPreamble`) is responsible for the 32 KiB cap —
/// this function places no limit on `buf`'s length itself.
pub fn parse_preamble(buf: &[u8]) -> Result<Option<(RequestPreamble, usize)>, Error> {
    let mut small = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut large;
    let mut raw = httparse::Request::new(&mut small);
    let mut status = raw.parse(buf);
    if let Err(httparse::Error::TooManyHeaders) = status {
        large = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut large);
        status = raw.parse(buf);
    }
    let consumed = match status? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = raw.method.ok_or(Error::Parse(httparse::Error::Token))?
        .to_string();
    let raw_target = raw.path.ok_or(Error::Parse(httparse::Error::Token))?
        .to_string();
    let target = RequestTarget::parse(&raw_target)
        .ok_or(Error::InvalidPrefix("invalid path"))?;
    let version = Version::from_httparse(
        raw.version.ok_or(Error::Parse(httparse::Error::Version))?)
        .ok_or(Error::Parse(httparse::Error::Version))?;

    let mut headers = HeaderSet::new();
    let mut host_header: Option<String> = None;
    let mut has_content_length = false;
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut expects_100_continue = false;
    let mut connection_close = version == Version::Http10;

    for h in raw.headers.iter() {
        let name = h.name;
        if name.eq_ignore_ascii_case("transfer-encoding") {
            if is_chunked(h.value) {
                if has_content_length {
                    // Transfer-Encoding wins but forfeits keep-alive
                    // (`§6`: "its presence alongside content-length
                    // takes precedence").
                    connection_close = true;
                }
                chunked = true;
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            if has_content_length {
                return Err(Error::DuplicateContentLength);
            }
            has_content_length = true;
            if !chunked {
                let s = from_utf8(h.value)
                    .map_err(|_| Error::BadContentLength)?;
                let n: u64 = s.trim().parse()
                    .map_err(|_| Error::BadContentLength)?;
                content_length = Some(n);
            } else {
                connection_close = true;
            }
        } else if name.eq_ignore_ascii_case("connection") {
            if is_close(h.value) {
                connection_close = true;
            }
        } else if name.eq_ignore_ascii_case("host") {
            if host_header.is_some() {
                return Err(Error::DuplicateHost);
            }
            let s = from_utf8(h.value).map_err(|_| Error::HostInvalid)?;
            host_header = Some(s.trim().to_string());
        } else if name.eq_ignore_ascii_case("expect") {
            if is_continue(h.value) {
                expects_100_continue = true;
            }
        }
        headers.add_unchecked(name, h.value.to_vec());
    }

    if version == Version::Http11 && host_header.is_none() {
        return Err(Error::HostInvalid);
    }

    let websocket_upgrade = websocket::detect(&method, version, &headers)
        .map_err(|_| Error::Parse(httparse::Error::HeaderValue))?;

    Ok(Some((RequestPreamble {
        method: method,
        target: target,
        raw_target: raw_target,
        version: version,
        headers: headers,
        host_header: host_header,
        content_length: if chunked { None } else { content_length },
        chunked: chunked,
        expects_100_continue: expects_100_continue,
        connection_close: connection_close,
        websocket_upgrade: websocket_upgrade,
        url: None,
    }, consumed)))
}

/// Case-insensitive, whitespace-tolerant match for a single `close`
/// token inside a (possibly comma-separated) `Connection` header value.
/// Grounded on the teacher's `headers::is_close`, generalized to accept
/// any of the comma-separated tokens rather than only a lone value.
fn is_close(val: &[u8]) -> bool {
    value_tokens(val).any(|tok| tok.eq_ignore_ascii_case(b"close"))
}

fn is_chunked(val: &[u8]) -> bool {
    // `§3`: "if transfer-encoding includes chunked" — only the last
    // token in the list is significant per RFC 7230 §3.3.1.
    value_tokens(val).last()
        .map(|tok| tok.eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}

fn is_continue(val: &[u8]) -> bool {
    value_tokens(val).any(|tok| tok.eq_ignore_ascii_case(b"100-continue"))
}

fn value_tokens(val: &[u8]) -> impl Iterator<Item=&[u8]> {
    val.split(|&b| b == b',').map(|tok| trim_ows(tok))
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && matches!(bytes[start], b' ' | b'\t' | b'\r' | b'\n') {
        start += 1;
    }
    while end > start && matches!(bytes[end - 1], b' ' | b'\t' | b'\r' | b'\n') {
        end -= 1;
    }
    &bytes[start..end]
}

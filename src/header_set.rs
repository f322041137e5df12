use error::Error;

/// How a header name is allowed to be used, per the classification table
/// in `§6` (excerpt) of the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRole {
    RequestOnly,
    ResponseOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderArity {
    Single,
    MultiValuedInRequests,
    MultiValuedInResponses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderClass {
    pub role: HeaderRole,
    pub arity: HeaderArity,
    /// Restricted headers may only be set through the dedicated
    /// accessors the state machine itself uses (`§3`, `§6`).
    pub restricted_request: bool,
    pub restricted_response: bool,
}

const DEFAULT_CLASS: HeaderClass = HeaderClass {
    role: HeaderRole::Both,
    arity: HeaderArity::Single,
    restricted_request: false,
    restricted_response: false,
};

/// Multi-valued-on-request header names from `§6`.
const MULTI_VALUED_REQUEST: &[&str] = &[
    "accept", "accept-charset", "accept-encoding", "accept-language",
    "allow", "cache-control", "connection", "cookie", "pragma",
    "transfer-encoding", "trailer", "upgrade", "via", "warning",
];

/// Restricted-on-request header names from `§6`.
const RESTRICTED_REQUEST: &[&str] = &[
    "content-length", "date", "expect", "host", "if-modified-since",
    "range", "transfer-encoding", "user-agent",
];

/// Restricted-on-response header names from `§6`.
const RESTRICTED_RESPONSE: &[&str] = &[
    "content-length", "date", "server", "transfer-encoding",
    "www-authenticate",
];

fn classify(name: &str) -> HeaderClass {
    let lower = name.to_ascii_lowercase();
    let mut class = DEFAULT_CLASS;
    if MULTI_VALUED_REQUEST.iter().any(|&n| n == lower) {
        class.arity = HeaderArity::MultiValuedInRequests;
    }
    if RESTRICTED_REQUEST.iter().any(|&n| n == lower) {
        class.restricted_request = true;
    }
    if RESTRICTED_RESPONSE.iter().any(|&n| n == lower) {
        class.restricted_response = true;
    }
    class
}

/// Case-insensitive, multi-valued, insertion-ordered header store (`§3`,
/// `§4.3`).
///
/// Backed by a `Vec` rather than a `HashMap` because preambles have at
/// most a few dozen headers and iteration order (for re-serializing or
/// for `iter()`) matters more than lookup speed — the same trade-off the
/// teacher's `Head`/`scan_headers` made by walking `httparse`'s header
/// slice directly instead of indexing it.
#[derive(Debug, Clone, Default)]
pub struct HeaderSet {
    entries: Vec<(String, Vec<Vec<u8>>)>,
}

pub enum Side {
    Request,
    Response,
}

impl HeaderSet {
    pub fn new() -> HeaderSet {
        HeaderSet { entries: Vec::new() }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|&(ref n, _)| n.eq_ignore_ascii_case(name))
    }

    /// `add(name, value)`: replaces on a single-valued header, appends on
    /// a multi-valued one (`§4.3`).
    pub fn add(&mut self, side: Side, name: &str, value: Vec<u8>)
        -> Result<(), Error>
    {
        let class = classify(name);
        let restricted = match side {
            Side::Request => class.restricted_request,
            Side::Response => class.restricted_response,
        };
        if restricted {
            return Err(Error::RestrictedHeader(name.to_string()));
        }
        self.add_unchecked(name, value);
        Ok(())
    }

    /// Same as `add` but bypasses the restricted-header check — used by
    /// the preamble parser and the response encoder, which are the
    /// "dedicated accessors" `§4.3` carves out for restricted headers.
    pub fn add_unchecked(&mut self, name: &str, value: Vec<u8>) {
        let class = classify(name);
        let is_multi = class.arity != HeaderArity::Single;
        match self.find(name) {
            Some(idx) if is_multi => self.entries[idx].1.push(value),
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self.entries.push((name.to_string(), vec![value])),
        }
    }

    /// `set(name, value)`: always replaces, regardless of arity.
    pub fn set(&mut self, side: Side, name: &str, value: Vec<u8>)
        -> Result<(), Error>
    {
        let class = classify(name);
        let restricted = match side {
            Side::Request => class.restricted_request,
            Side::Response => class.restricted_response,
        };
        if restricted {
            return Err(Error::RestrictedHeader(name.to_string()));
        }
        match self.find(name) {
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self.entries.push((name.to_string(), vec![value])),
        }
        Ok(())
    }

    pub fn values(&self, name: &str) -> &[Vec<u8>] {
        match self.find(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    /// The first value, decoded as latin-1-safe UTF-8 for the common
    /// case (tokens like `Host`, `Connection`). Returns `None` if the
    /// header is absent or not valid UTF-8.
    pub fn value_str(&self, name: &str) -> Option<&str> {
        self.values(name).first()
            .and_then(|v| ::std::str::from_utf8(v).ok())
    }

    pub fn remove(&mut self, name: &str) {
        if let Some(idx) = self.find(name) {
            self.entries.remove(idx);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &[Vec<u8>])> {
        self.entries.iter().map(|&(ref n, ref v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

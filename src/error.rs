use std::io;

use httparse;
use url;

use status::Status;

quick_error! {
    /// Errors produced while parsing a preamble, decoding a chunked body,
    /// routing a request, or operating on a disposed listener.
    ///
    /// The taxonomy matches the error kinds of `§7 ERROR HANDLING DESIGN`:
    /// `ProtocolFraming`, `PolicyLimit`, `Routing`, `Authentication`,
    /// `Transport`, `Lifecycle`. Each variant below is tagged with which
    /// kind it belongs to; `status()` gives the HTTP status the connection
    /// state machine synthesises for it (`None` for errors that never
    /// reach the wire).
    #[derive(Debug)]
    pub enum Error {
        /// Transport: socket or TLS read/write failure.
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// ProtocolFraming: malformed request line or headers.
        Parse(err: httparse::Error) {
            description("parse error")
            display("parse error: {}", err)
            from()
        }
        /// ProtocolFraming: malformed chunk-size line.
        ChunkSize(err: httparse::InvalidChunkSize) {
            description("chunk size parse error")
            display("chunk size parse error: {}", err)
            from()
        }
        /// ProtocolFraming: invalid `scheme://host:port/path/` literal.
        InvalidPrefix(reason: &'static str) {
            description("invalid prefix")
            display("invalid prefix: {}", reason)
        }
        /// Lifecycle: two prefixes disagree about scheme on one endpoint.
        SchemeConflict {
            description("invalid scheme")
            display("prefix scheme conflicts with endpoint's bound scheme")
        }
        /// ProtocolFraming: duplicate or unparsable `Host` header.
        HostInvalid {
            description("invalid host header")
        }
        DuplicateHost {
            description("duplicate host header")
        }
        /// ProtocolFraming: duplicate `Content-Length` header.
        DuplicateContentLength {
            description("duplicate content-length header")
        }
        /// ProtocolFraming: unparsable `Content-Length` value.
        BadContentLength {
            description("invalid content-length header")
        }
        /// PolicyLimit: preamble exceeded the 32 KiB cap.
        HeadersTooLong {
            description("headers too long")
        }
        /// ProtocolFraming: transport closed mid-body.
        PrematureEof {
            description("premature end of body")
        }
        /// HeaderSet: attempt to set/add a restricted header from user code.
        RestrictedHeader(name: String) {
            description("restricted header")
            display("{:?} is a restricted header", name)
        }
        /// Routing: no prefix matched the request's host/port/path.
        NoMatchingPrefix {
            description("no matching prefix")
        }
        /// Authentication: credentials missing, invalid, or retries exhausted.
        AuthenticationFailed {
            description("authentication failed")
        }
        /// PolicyLimit: read deadline elapsed while reading a preamble or body.
        Timeout {
            description("operation timed out")
        }
        /// Lifecycle: operation attempted on a disposed `Listener`.
        Disposed {
            description("object disposed")
        }
        /// url crate surfaced a bad absolute-form target or `Host` header.
        Url(err: url::ParseError) {
            description("url parse error")
            display("url parse error: {}", err)
            from()
        }
    }
}

impl Error {
    /// The status this error should be answered with, if any.
    ///
    /// `None` means the error is not representable on the wire (the
    /// connection must simply close) — e.g. a transport failure, or a
    /// framing error discovered before any bytes were read at all.
    pub fn status(&self) -> Option<Status> {
        use self::Error::*;
        match *self {
            HeadersTooLong => Some(Status::BadRequest),
            Parse(..) | ChunkSize(..) | InvalidPrefix(..) | HostInvalid |
            DuplicateHost | DuplicateContentLength | BadContentLength |
            PrematureEof | Url(..)
                => Some(Status::BadRequest),
            NoMatchingPrefix => Some(Status::NotFound),
            AuthenticationFailed => Some(Status::Unauthorized),
            Timeout => Some(Status::RequestTimeout),
            Io(..) | SchemeConflict | RestrictedHeader(..) | Disposed
                => None,
        }
    }

    /// Whether this error is one a connection can recover from by closing
    /// gracefully with a synthesised response, vs. one that must surface
    /// to host/user code (`§7` propagation policy).
    pub fn is_local(&self) -> bool {
        self.status().is_some()
    }
}

#[cfg(test)]
mod test {
    use super::Error;
    use status::Status;

    #[test]
    fn headers_too_long_maps_to_400() {
        assert_eq!(Error::HeadersTooLong.status(), Some(Status::BadRequest));
    }

    #[test]
    fn no_matching_prefix_maps_to_404() {
        assert_eq!(Error::NoMatchingPrefix.status(), Some(Status::NotFound));
    }

    #[test]
    fn transport_errors_have_no_status() {
        let err = Error::Io(::std::io::Error::new(
            ::std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.status(), None);
        assert!(!err.is_local());
    }
}

use std::sync::Arc;
use std::time::Duration;

/// Fine-grained configuration of the connection/dispatch core.
///
/// Grounded on the teacher's `server::Config` (builder methods returning
/// `&mut Self`, `done()` wrapping the final value in an `Arc`).
#[derive(Debug, Clone)]
pub struct Config {
    max_preamble_size: usize,
    first_request_timeout: Duration,
    reuse_timeout: Duration,
    auth_retry_limit: u32,
    ignore_write_errors: bool,
}

impl Config {
    /// Defaults taken straight from `§4.6`/`§5`: 32 KiB preamble cap,
    /// 90s first-request deadline, 15s deadline on every subsequent
    /// keep-alive reuse, an implementation-defined (`>= 1`) auth retry
    /// bound (spec.md §9 resolves the teacher's suspect `< 99` as 16).
    pub fn new() -> Config {
        Config {
            max_preamble_size: 32 * 1024,
            first_request_timeout: Duration::from_millis(90_000),
            reuse_timeout: Duration::from_millis(15_000),
            auth_retry_limit: 16,
            ignore_write_errors: false,
        }
    }

    /// Hard cap on the accumulated preamble (request line + headers).
    pub fn max_preamble_size(&mut self, value: usize) -> &mut Self {
        self.max_preamble_size = value;
        self
    }

    /// Read deadline for the very first preamble on a connection.
    pub fn first_request_timeout(&mut self, value: Duration) -> &mut Self {
        self.first_request_timeout = value;
        self
    }

    /// Read deadline for every preamble after the first keep-alive reuse.
    pub fn reuse_timeout(&mut self, value: Duration) -> &mut Self {
        self.reuse_timeout = value;
        self
    }

    /// Bound on how many times a connection may retry a 401 challenge
    /// before it is forcibly closed (`§7` Authentication, `§9` Open
    /// Question 3). Must be `>= 1`.
    pub fn auth_retry_limit(&mut self, value: u32) -> &mut Self {
        assert!(value >= 1, "auth_retry_limit must be at least 1");
        self.auth_retry_limit = value;
        self
    }

    /// When `true`, a failed response write closes the connection
    /// silently instead of surfacing the transport error to host code
    /// (`§4.6` WritingResponse).
    pub fn ignore_write_errors(&mut self, value: bool) -> &mut Self {
        self.ignore_write_errors = value;
        self
    }

    pub fn get_max_preamble_size(&self) -> usize {
        self.max_preamble_size
    }

    pub fn get_auth_retry_limit(&self) -> u32 {
        self.auth_retry_limit
    }

    pub fn get_ignore_write_errors(&self) -> bool {
        self.ignore_write_errors
    }

    /// Read deadline to use given how many times the connection has been
    /// reused already (`§4.6`: first request 90s, any reuse 15s).
    pub fn read_deadline(&self, reuses: u32) -> Duration {
        if reuses == 0 {
            self.first_request_timeout
        } else {
            self.reuse_timeout
        }
    }

    /// Wrap the finished config in an `Arc`, ready to hand to an
    /// `EndpointRegistry` or `Connection`.
    pub fn done(&self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

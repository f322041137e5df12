//! Connection and virtual-host dispatch core for an embeddable
//! asynchronous HTTP(S) server built on the `tokio` 0.1 stack: preamble
//! parsing, chunked transfer decoding, longest-prefix host/path
//! routing, and WebSocket upgrade hand-off.
//!
//! WebSocket frame coding, authentication mechanisms, TLS internals,
//! cookie/URL helpers, high-level handler frameworks, HTTP/2 and
//! HTTP/3, request pipelining, and compression are all out of scope —
//! see `SPEC_FULL.md` `§1` for the full boundary.
#![recursion_limit="100"]

extern crate futures;
extern crate url;
extern crate httparse;
extern crate tokio_core;
extern crate tokio_io;
extern crate bytes;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
#[cfg(feature = "date_header")] extern crate httpdate;

mod version;
mod status;
mod error;
mod config;
mod prefix;
mod header_set;
mod line_reader;
mod chunked;
mod request;
mod request_stream;
mod websocket;
mod response;
mod cert;
mod connection;
mod endpoint;
mod registry;
mod listener;
mod opt_future;

pub use version::Version;
pub use status::Status;
pub use error::Error;
pub use config::Config;
pub use prefix::{PrefixSpec, Host, Scheme};
pub use header_set::HeaderSet;
pub use request::{RequestPreamble, RequestTarget};
pub use request_stream::{RequestStream, ChunkedRequestStream};
pub use websocket::UpgradeRequest;
pub use response::{continue_100, error_page, switching_protocols, unauthorized_challenge};
pub use cert::{CertPaths, resolve as resolve_cert};
pub use connection::{
    Connection, Router, ContextSink, RequestContext, RequestBody,
    RawHandle, ResponseMessage, BodyHandle,
};
pub use endpoint::{EndpointListener, ListenerHandle, serve_tcp};
pub use registry::EndpointRegistry;
pub use listener::{Listener, ContextQueue, Delivery, AuthScheme};
pub use opt_future::OptFuture;

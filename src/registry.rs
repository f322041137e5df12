//! `EndpointRegistry` (`§4.8`): the process-wide map from `(ip, port)`
//! to `EndpointListener`, guarded by a single mutex for structural
//! changes (`§5`).
//!
//! No direct teacher analogue — the teacher binds one listener per
//! `main()` (`examples/hello_world.rs`) and never multiplexes several
//! virtual hosts onto shared sockets. Built fresh from `§4.7`/`§4.8`,
//! reusing `EndpointListener`'s copy-on-write tables underneath.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use endpoint::{EndpointListener, ListenerHandle};
use error::Error;
use prefix::{PrefixSpec, Scheme};
use config::Config;

struct Entry<S> {
    endpoint: Arc<EndpointListener<S>>,
    scheme: Scheme,
}

/// Process-wide map from bound address to `EndpointListener`.
pub struct EndpointRegistry<S> {
    entries: Mutex<HashMap<SocketAddr, Entry<S>>>,
    config: Arc<Config>,
}

impl<S> EndpointRegistry<S> {
    pub fn new(config: Arc<Config>) -> EndpointRegistry<S> {
        EndpointRegistry { entries: Mutex::new(HashMap::new()), config: config }
    }

    /// Bind (or reuse) the endpoint for `prefix`'s `(host-independent)
    /// address:port` and register `prefix` on it, failing with
    /// `SchemeConflict` if the endpoint already serves the other
    /// scheme (`§4.8`).
    ///
    /// `bind_addr` is the local address to bind a *new* endpoint to —
    /// a prefix's `Host` is a routing key, not a bind address, so the
    /// caller supplies the actual interface (typically `0.0.0.0` or
    /// `::`) to listen on.
    pub fn add_prefix(&self, bind_addr: SocketAddr, prefix: PrefixSpec,
        handle: Arc<ListenerHandle<S>>) -> Result<Arc<EndpointListener<S>>, Error>
    {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(bind_addr).or_insert_with(|| {
            Entry {
                endpoint: Arc::new(EndpointListener::new(
                    bind_addr, prefix.scheme == Scheme::Https, self.config.clone())),
                scheme: prefix.scheme,
            }
        });
        if entry.scheme != prefix.scheme {
            return Err(Error::SchemeConflict);
        }
        entry.endpoint.add_prefix(prefix, handle);
        Ok(entry.endpoint.clone())
    }

    /// Remove `prefix` from the endpoint bound at `bind_addr`; once it
    /// has no prefixes left in any of its three tables, force-closes
    /// every connection still in its unregistered set and drops the
    /// endpoint from the registry (`§4.7`, `§4.8`).
    pub fn remove_prefix(&self, bind_addr: SocketAddr, prefix: &PrefixSpec) {
        let mut entries = self.entries.lock().unwrap();
        let drop_entry = if let Some(entry) = entries.get(&bind_addr) {
            entry.endpoint.remove_prefix(prefix);
            entry.endpoint.is_empty()
        } else {
            false
        };
        if drop_entry {
            if let Some(entry) = entries.remove(&bind_addr) {
                entry.endpoint.close_unregistered();
            }
        }
    }

    pub fn get(&self, bind_addr: &SocketAddr) -> Option<Arc<EndpointListener<S>>> {
        self.entries.lock().unwrap().get(bind_addr).map(|e| e.endpoint.clone())
    }

    pub fn endpoint_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

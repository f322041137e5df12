//! `Listener` facade and `ContextQueue` (`§4.9`): the public surface a
//! host embeds against — a set of prefixes, an authentication scheme
//! selector, and a bounded handoff from `Connection` to the host's
//! dispatch loop.
//!
//! No direct teacher analogue (the teacher never multiplexes several
//! virtual hosts behind one facade); grounded on `§4.9` and on the
//! teacher's `server::buffered::Service` for the shape of a
//! request-in/response-out seam between core and host code.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Async, Poll, Stream};
use futures::sync::{mpsc, oneshot};

use connection::{ContextSink, RequestContext, ResponseMessage};
use endpoint::ListenerHandle;
use error::Error;
use prefix::PrefixSpec;
use registry::EndpointRegistry;

/// Authentication scheme a request should be challenged with, per the
/// selector named in `§4.9`. Only the selector's *result* is part of
/// this crate; scheme implementations are external (`§1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Anonymous,
    Basic,
    Digest,
    None,
}

/// One item handed to the host: the routed request plus the one-shot
/// sender it must use to deliver the finished response back to
/// `Connection::Dispatched` (`§4.6`).
pub struct Delivery<S> {
    pub context: RequestContext<S>,
    pub respond: oneshot::Sender<ResponseMessage>,
}

/// A bounded handoff from `Connection` to the host's dispatch loop
/// (`§4.9`). Built on `futures::sync::mpsc`, which is bounded and
/// multi-producer out of the box; consumption is single-reader here
/// (one host loop draining the queue) but nothing below assumes that.
pub struct ContextQueue<S> {
    tx: mpsc::Sender<Delivery<S>>,
    rx: Mutex<mpsc::Receiver<Delivery<S>>>,
}

impl<S> ContextQueue<S> {
    pub fn new(capacity: usize) -> ContextQueue<S> {
        let (tx, rx) = mpsc::channel(capacity);
        ContextQueue { tx: tx, rx: Mutex::new(rx) }
    }

    fn sender(&self) -> mpsc::Sender<Delivery<S>> {
        self.tx.clone()
    }

    /// Await the next delivery. Once the `Listener` is stopped the
    /// sender half is dropped and this resolves to `None`.
    pub fn get_context(&self) -> Poll<Option<Delivery<S>>, ()> {
        self.rx.lock().unwrap().poll()
    }

    /// Drop every delivery still buffered in the queue (`§4.9` `Stop`:
    /// "closes all owned connections"). Dropping a `Delivery` drops its
    /// `respond` sender, which `Connection::Dispatched` observes as the
    /// host going away and closes without a response.
    fn close(&self) {
        let mut rx = self.rx.lock().unwrap();
        while let Ok(Async::Ready(Some(_))) = rx.poll() {}
    }
}

/// Public facade over one virtual host's prefixes, auth policy, and
/// context queue (`§4.9`).
pub struct Listener<S> {
    prefixes: Mutex<Vec<PrefixSpec>>,
    queue: Arc<ContextQueue<S>>,
    auth_selector: Box<Fn(&RequestContext<S>) -> AuthScheme>,
    disposed: AtomicBool,
}

impl<S: 'static> Listener<S> {
    pub fn new<F>(prefixes: Vec<PrefixSpec>, queue_capacity: usize,
        auth_selector: F) -> Arc<Listener<S>>
        where F: Fn(&RequestContext<S>) -> AuthScheme + 'static
    {
        Arc::new(Listener {
            prefixes: Mutex::new(prefixes),
            queue: Arc::new(ContextQueue::new(queue_capacity)),
            auth_selector: Box::new(auth_selector),
            disposed: AtomicBool::new(false),
        })
    }

    /// Bind every held prefix into `registry`, each at `bind_addr`
    /// (`§4.9` `Start`).
    pub fn start(self: &Arc<Self>, registry: &EndpointRegistry<S>,
        bind_addr: SocketAddr) -> Result<(), Error>
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        let prefixes = self.prefixes.lock().unwrap().clone();
        let handle: Arc<ListenerHandle<S>> = self.clone();
        for prefix in prefixes {
            registry.add_prefix(bind_addr, prefix, handle.clone())?;
        }
        Ok(())
    }

    /// Remove every held prefix from `registry`, mark the listener
    /// disposed, and close every connection still owned by this
    /// listener's queue — both requests already delivered but not yet
    /// answered, and (via `disposed`) any future delivery attempt
    /// (`§7` Lifecycle, `§4.9` `Stop`: "closes all owned connections").
    pub fn stop(&self, registry: &EndpointRegistry<S>, bind_addr: SocketAddr) {
        self.disposed.store(true, Ordering::SeqCst);
        {
            let prefixes = self.prefixes.lock().unwrap();
            for prefix in prefixes.iter() {
                registry.remove_prefix(bind_addr, prefix);
            }
        }
        self.queue.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Await the next routed request (`§4.9` `GetContext`).
    pub fn get_context(&self) -> Poll<Option<Delivery<S>>, Error> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        Ok(self.queue.get_context().unwrap_or(Async::Ready(None)))
    }

    pub fn auth_scheme_for(&self, ctx: &RequestContext<S>) -> AuthScheme {
        (self.auth_selector)(ctx)
    }
}

impl<S> ContextSink<S> for Listener<S> {
    fn deliver(&self, ctx: RequestContext<S>) -> oneshot::Receiver<ResponseMessage> {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.disposed.load(Ordering::SeqCst) {
            // `resp_tx` drops here uncalled; the caller's `Dispatched`
            // state observes the closed channel on its next poll.
            return resp_rx;
        }
        // `try_send` rather than a blocking send: a `Connection` drives
        // its own poll loop and must not block the reactor thread
        // waiting for queue capacity. A full queue drops `resp_tx`
        // here, which `Connection::Dispatched` observes as the host
        // going away and closes without a response.
        let mut sender = self.queue.sender();
        let _ = sender.try_send(Delivery { context: ctx, respond: resp_tx });
        resp_rx
    }

    fn auth_scheme(&self, ctx: &RequestContext<S>) -> AuthScheme {
        self.auth_scheme_for(ctx)
    }
}

impl<S> ListenerHandle<S> for Listener<S> {
    fn prefixes(&self) -> Vec<PrefixSpec> {
        self.prefixes.lock().unwrap().clone()
    }
}

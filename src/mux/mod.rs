//! Connection manager multiplexing virtual sockets over one link.
//!
//! A [`Transport`] owns a single [`Node`] obtained from its [`Network`] and lets
//! any number of [`Socket`]s share it. Outbound traffic from every socket goes
//! through one bounded outbox drained by the egress worker, which tags each
//! message with the socket's stream id. The ingress worker reads the id back
//! and hands the message to the matching socket, or, on first contact, to the
//! listener registered under that id, which accepts a new socket for it.
//!
//! # Key Components
//!
//! - [`Transport`]: connect/close lifecycle, [`Transport::dial`] and [`Transport::listen`].
//! - [`Socket`]: blocking `send`/`recv` on one stream.
//! - [`Listener`]: hands newly matched sockets to an accept loop.
//!
//! # Stream ids
//!
//! Both dialed sockets and listeners are keyed by [`stream_id`] of the address.
//! The dialer's stream therefore lands on the remote listener without any
//! handshake, and two dials of the same address share one stream id.
//!
//! # Example
//! ```rust
//! use std::thread;
//!
//! use tether::{Message, Transport, node::MemoryNetwork};
//!
//! let hub = MemoryNetwork::new();
//! let server = Transport::new(hub.node("server"));
//! let client = Transport::new(hub.node("client"));
//!
//! let listener = server.listen("echo").unwrap();
//! let serving = thread::spawn(move || {
//!     let socket = listener.accept_one().unwrap();
//!     let msg = socket.recv().unwrap();
//!     socket.send(Message::new(msg.body)).unwrap();
//! });
//!
//! let socket = client.dial("echo").unwrap();
//! socket.send(Message::new("ping")).unwrap();
//! assert_eq!(socket.recv().unwrap().body, b"ping");
//! serving.join().unwrap();
//! ```
//!
//! # Delivery
//!
//! Delivery is best effort. Failed link sends are dropped, a send racing a
//! close may be lost, and a socket that is not being drained stalls the
//! ingress worker for every other stream on the link.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crossbeam_channel::{Sender, bounded};
use log::{debug, info, warn};

use crate::{
    LinkError, TransportError, TransportOptions,
    node::{Network, Node},
    signal::Signal,
    stream_id,
};

mod listener;
mod registry;
mod socket;
mod worker;

pub use listener::Listener;
pub use socket::Socket;

use registry::Registry;
use socket::Envelope;
use worker::{Ingress, egress, spawn_worker};

/// State of one connected session.
struct Session {
    node: Arc<dyn Node>,
    outbox: Sender<Envelope>,
    closed: Arc<Signal>,
}

pub struct Transport {
    network: Box<dyn Network>,
    options: TransportOptions,
    session: Mutex<Option<Session>>,
    registry: Arc<Registry>,
}

impl Transport {
    pub fn new(network: impl Network + 'static) -> Self {
        Self::with_options(network, TransportOptions::default())
    }

    pub fn with_options(network: impl Network + 'static, options: TransportOptions) -> Self {
        Self {
            network: Box::new(network),
            options: options.normalized(),
            session: Mutex::new(None),
            registry: Arc::new(Registry::default()),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects the underlying link and starts both workers. No-op when
    /// already connected.
    pub fn connect(&self) -> Result<(), TransportError> {
        let mut session = self.lock_session();
        self.ensure_connected(&mut session)?;
        Ok(())
    }

    fn ensure_connected<'a>(
        &self,
        session: &'a mut Option<Session>,
    ) -> Result<&'a Session, TransportError> {
        if session.is_none() {
            *session = Some(self.open_session()?);
        }
        session
            .as_ref()
            .ok_or(TransportError::Link(LinkError::NotConnected))
    }

    fn open_session(&self) -> Result<Session, TransportError> {
        let node = self.network.connect()?;
        let (outbox, queue) = bounded(self.options.outbox_capacity);
        let closed = Arc::new(Signal::new());

        let egress_handle = {
            let node = Arc::clone(&node);
            let closed = Arc::clone(&closed);
            spawn_worker("tether-egress".into(), move || egress(node, queue, closed))
        };
        let ingress = Ingress {
            node: Arc::clone(&node),
            registry: Arc::clone(&self.registry),
            outbox: outbox.clone(),
            closed: Arc::clone(&closed),
            options: self.options,
        };
        let spawned = egress_handle
            .and_then(|_| spawn_worker("tether-ingress".into(), move || ingress.run()));
        if let Err(e) = spawned {
            closed.fire();
            let _ = node.close();
            return Err(LinkError::Io(e).into());
        }

        info!("transport connected at {}", node.address());
        Ok(Session {
            node,
            outbox,
            closed,
        })
    }

    /// Tears the session down: closes every socket and listener, stops both
    /// workers and closes the node. No-op when not connected.
    pub fn close(&self) -> Result<(), TransportError> {
        let mut session = self.lock_session();
        let Some(current) = session.take() else {
            return Ok(());
        };

        let (sockets, listeners) = self.registry.drain();
        debug!(
            "closing {} socket(s) and {} listener(s)",
            sockets.len(),
            listeners.len()
        );
        for socket in sockets {
            socket.close();
        }
        for listener in listeners {
            listener.close();
        }

        current.closed.fire();
        let address = current.node.address();
        current.node.close()?;
        info!("transport at {address} closed");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Opens a socket to `addr`, connecting first if needed.
    pub fn dial(&self, addr: &str) -> Result<Socket, TransportError> {
        let mut session = self.lock_session();
        let session = self.ensure_connected(&mut session)?;

        let socket = Socket::new(
            stream_id(addr),
            session.node.address(),
            addr.to_string(),
            session.outbox.clone(),
            self.options.inbox_capacity,
        );
        self.registry.put_socket(socket.clone());
        debug!("dialed {addr} on stream {}", socket.short_id());
        Ok(socket)
    }

    /// Starts accepting streams addressed to `addr`, connecting first if
    /// needed. Fails if a listener is registered for `addr`. A closed
    /// listener stays registered until traffic for it arrives or the
    /// transport closes, so it keeps the address taken until then.
    pub fn listen(&self, addr: &str) -> Result<Listener, TransportError> {
        let mut session = self.lock_session();

        // Registered before connecting so a peer's first message cannot
        // overtake the registration.
        let listener = Listener::new(
            stream_id(addr),
            addr.to_string(),
            self.options.accept_capacity,
        );
        self.registry.put_listener(listener.clone())?;
        if let Err(e) = self.ensure_connected(&mut session) {
            self.registry.delete_listener(&listener);
            return Err(e);
        }

        debug!("listening on {addr}");
        Ok(listener)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mux")
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close transport cleanly: {e}");
        }
    }
}

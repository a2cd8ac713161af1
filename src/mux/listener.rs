use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, warn};

use crate::{TransportError, signal::Signal};

use super::{Socket, worker::spawn_worker};

/// Accepts inbound virtual connections for one address.
#[derive(Debug, Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

#[derive(Debug)]
struct ListenerInner {
    id: String,
    addr: String,
    closed: Signal,
    queue_tx: Mutex<Option<Sender<Socket>>>,
    queue: Receiver<Socket>,
}

impl Listener {
    pub(crate) fn new(id: String, addr: String, accept_capacity: usize) -> Self {
        let (queue_tx, queue) = bounded(accept_capacity);
        Self {
            inner: Arc::new(ListenerInner {
                id,
                addr,
                closed: Signal::new(),
                queue_tx: Mutex::new(Some(queue_tx)),
                queue,
            }),
        }
    }

    /// Serves accepted sockets until the listener closes.
    ///
    /// Every socket is handed to `handler` on its own thread, so a slow
    /// handler never stalls the accept loop. Returns end of stream when called
    /// on a listener that is already closed.
    pub fn accept<F>(&self, handler: F) -> Result<(), TransportError>
    where
        F: Fn(Socket) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(TransportError::EndOfStream);
        }

        let handler = Arc::new(handler);
        while let Ok(socket) = self.accept_one() {
            let handler = Arc::clone(&handler);
            let name = format!("tether-conn-{}", socket.short_id());
            let worker_socket = socket.clone();
            if let Err(e) = spawn_worker(name, move || handler(worker_socket)) {
                warn!("failed to spawn handler for {}: {e}", self.inner.addr);
                socket.close();
            }
        }

        debug!("listener {} stopped accepting", self.inner.addr);
        Ok(())
    }

    /// Blocks until the next accepted socket.
    pub fn accept_one(&self) -> Result<Socket, TransportError> {
        if self.is_closed() {
            return Err(TransportError::EndOfStream);
        }
        select! {
            recv(self.inner.queue) -> socket => socket.map_err(|_| TransportError::EndOfStream),
            recv(self.inner.closed.receiver()) -> _ => Err(TransportError::EndOfStream),
        }
    }

    /// Closes the listener and its accept queue. Sockets already accepted stay open.
    pub fn close(&self) {
        if self.inner.closed.fire() {
            drop(
                self.inner
                    .queue_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take(),
            );
            debug!("listener {} closed", self.inner.addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub(crate) fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queues a freshly matched socket, blocking while the queue is full.
    /// Returns `false` if the listener closed first.
    pub(crate) fn push(&self, socket: Socket) -> bool {
        let Some(queue_tx) = self
            .inner
            .queue_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return false;
        };

        select! {
            send(queue_tx, socket) -> res => res.is_ok(),
            recv(self.inner.closed.receiver()) -> _ => false,
        }
    }
}

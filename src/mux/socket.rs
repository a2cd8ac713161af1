use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::debug;

use crate::{Message, TransportError, signal::Signal};

/// Outbound message tagged with the stream it belongs to.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub id: String,
    pub msg: Message,
}

/// One virtual, ordered, bidirectional connection multiplexed over the link.
///
/// Cloning a `Socket` yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

#[derive(Debug)]
struct SocketInner {
    id: String,
    local: String,
    remote: String,
    closed: Signal,
    drained: AtomicBool,
    outbox: Sender<Envelope>,
    inbox_tx: Sender<Message>,
    inbox: Receiver<Message>,
}

impl Socket {
    pub(crate) fn new(
        id: String,
        local: String,
        remote: String,
        outbox: Sender<Envelope>,
        inbox_capacity: usize,
    ) -> Self {
        let (inbox_tx, inbox) = bounded(inbox_capacity);
        Self {
            inner: Arc::new(SocketInner {
                id,
                local,
                remote,
                closed: Signal::new(),
                drained: AtomicBool::new(false),
                outbox,
                inbox_tx,
                inbox,
            }),
        }
    }

    /// Queues `msg` on the shared outbox. Blocks while the outbox is full.
    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        if self.inner.closed.is_fired() {
            return Err(TransportError::EndOfStream);
        }

        let envelope = Envelope {
            id: self.inner.id.clone(),
            msg,
        };
        select! {
            send(self.inner.outbox, envelope) -> res => res.map_err(|_| TransportError::EndOfStream),
            recv(self.inner.closed.receiver()) -> _ => Err(TransportError::EndOfStream),
        }
    }

    /// Blocks until the next inbound message.
    ///
    /// Once closed, at most one message that was already queued is still
    /// handed out; every later call reports end of stream.
    pub fn recv(&self) -> Result<Message, TransportError> {
        if self.is_closed() {
            return self.drain_one();
        }
        select! {
            recv(self.inner.inbox) -> msg => msg.map_err(|_| TransportError::EndOfStream),
            recv(self.inner.closed.receiver()) -> _ => self.drain_one(),
        }
    }

    fn drain_one(&self) -> Result<Message, TransportError> {
        if self.inner.drained.swap(true, Ordering::AcqRel) {
            return Err(TransportError::EndOfStream);
        }
        self.inner
            .inbox
            .try_recv()
            .map_err(|_| TransportError::EndOfStream)
    }

    /// Closes the socket. Blocked `send`/`recv` calls return end of stream.
    pub fn close(&self) {
        if self.inner.closed.fire() {
            debug!("socket {} closed", self.short_id());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    /// Stream id shared with the remote end.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Address of this end of the link.
    pub fn local(&self) -> &str {
        &self.inner.local
    }

    /// Dialed address, or the peer node's address for accepted sockets.
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    /// Hands an inbound message to this socket, blocking while its inbox is
    /// full. Returns `false` if the socket closed first.
    pub(crate) fn deliver(&self, msg: Message) -> bool {
        if self.inner.closed.is_fired() {
            return false;
        }
        select! {
            send(self.inner.inbox_tx, msg) -> res => res.is_ok(),
            recv(self.inner.closed.receiver()) -> _ => false,
        }
    }

    pub(crate) fn same(&self, other: &Socket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn short_id(&self) -> &str {
        &self.inner.id[..self.inner.id.len().min(8)]
    }
}

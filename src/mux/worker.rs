//! Long-lived multiplexing workers.
//!
//! A connected transport runs exactly two of these: the egress dispatcher,
//! which drains the shared outbox into the node, and the ingress
//! demultiplexer, which routes everything the node accepts to sockets and
//! listeners. Both stop when the session's close signal fires; the ingress
//! worker also stops on the first accept error, which is treated as the link
//! going away.
use std::{io, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, trace};

use crate::{
    Message, REMOTE_HEADER, STREAM_HEADER, TransportOptions, node::Node, signal::Signal,
};

use super::{
    Socket,
    registry::{Registry, Route},
    socket::Envelope,
};

pub(crate) fn spawn_worker<F>(name: String, f: F) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name).spawn(f)
}

/// Drains the outbox into `node` until `closed` fires.
///
/// Send failures are dropped: there is no retry and the sender is never told.
pub(crate) fn egress(node: Arc<dyn Node>, outbox: Receiver<Envelope>, closed: Arc<Signal>) {
    let local = node.address();
    debug!("egress worker started for {local}");

    loop {
        select! {
            recv(outbox) -> envelope => {
                let Ok(Envelope { id, mut msg }) = envelope else {
                    break;
                };
                msg.header.insert(REMOTE_HEADER.to_string(), local.clone());
                msg.header.insert(STREAM_HEADER.to_string(), id);

                if let Err(e) = node.send(msg) {
                    debug!("dropped outbound message: {e}");
                }
            }
            recv(closed.receiver()) -> _ => break,
        }
    }

    debug!("egress worker stopped for {local}");
}

/// Routing context handed to the ingress worker.
pub(crate) struct Ingress {
    pub node: Arc<dyn Node>,
    pub registry: Arc<Registry>,
    pub outbox: Sender<Envelope>,
    pub closed: Arc<Signal>,
    pub options: TransportOptions,
}

impl Ingress {
    pub(crate) fn run(self) {
        let local = self.node.address();
        debug!("ingress worker started for {local}");

        loop {
            let msg = match self.node.accept() {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("ingress link ended: {e}");
                    break;
                }
            };
            if self.closed.is_fired() {
                break;
            }
            self.route(&local, msg);
        }

        debug!("ingress worker stopped for {local}");
    }

    fn route(&self, local: &str, msg: Message) {
        let Some(id) = msg.stream().filter(|id| !id.is_empty()).map(str::to_string) else {
            trace!("dropping message without a stream id");
            return;
        };

        let route = self.registry.route(&id, || {
            Socket::new(
                id.clone(),
                local.to_string(),
                msg.remote().unwrap_or_default().to_string(),
                self.outbox.clone(),
                self.options.inbox_capacity,
            )
        });

        match route {
            Route::Deliver(socket) => {
                trace!("delivering to socket {}", socket.short_id());
                if !socket.deliver(msg) {
                    self.registry.delete_socket(&socket);
                }
            }
            Route::Accept(listener, socket) => {
                debug!(
                    "listener {} accepted stream {} from {}",
                    listener.addr(),
                    socket.short_id(),
                    socket.remote()
                );
                if listener.push(socket.clone()) {
                    if !socket.deliver(msg) {
                        self.registry.delete_socket(&socket);
                    }
                } else {
                    socket.close();
                    self.registry.delete_socket(&socket);
                }
            }
            Route::Drop => trace!("no socket or listener for stream {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{bounded, unbounded};

    use super::*;
    use crate::{LinkError, mux::Listener, stream_id};

    /// Node that records sent messages and replays a scripted inbound queue.
    struct ScriptedNode {
        sent: Sender<Message>,
        inbound: Receiver<Message>,
        fail_sends: bool,
    }

    impl Node for ScriptedNode {
        fn address(&self) -> String {
            "scripted".into()
        }

        fn send(&self, msg: Message) -> Result<(), LinkError> {
            if self.fail_sends {
                return Err(LinkError::Closed);
            }
            self.sent.send(msg).map_err(|_| LinkError::Closed)
        }

        fn accept(&self) -> Result<Message, LinkError> {
            self.inbound.recv().map_err(|_| LinkError::Closed)
        }

        fn close(&self) -> Result<(), LinkError> {
            Ok(())
        }
    }

    fn scripted(fail_sends: bool) -> (Arc<dyn Node>, Receiver<Message>, Sender<Message>) {
        let (sent, sent_rx) = unbounded();
        let (inbound_tx, inbound) = unbounded();
        let node = Arc::new(ScriptedNode {
            sent,
            inbound,
            fail_sends,
        });
        (node, sent_rx, inbound_tx)
    }

    #[test]
    fn egress_stamps_stream_and_remote() {
        let (node, sent, _inbound) = scripted(false);
        let (outbox, queue) = bounded(4);
        let closed = Arc::new(Signal::new());

        let worker = {
            let closed = Arc::clone(&closed);
            spawn_worker("egress".into(), move || egress(node, queue, closed)).unwrap()
        };

        outbox
            .send(Envelope {
                id: "abc".into(),
                msg: Message::new("hi"),
            })
            .unwrap();
        let msg = sent.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(msg.stream(), Some("abc"));
        assert_eq!(msg.remote(), Some("scripted"));
        assert_eq!(msg.body, b"hi");

        closed.fire();
        worker.join().unwrap();
    }

    #[test]
    fn egress_swallows_send_failures() {
        let (node, _sent, _inbound) = scripted(true);
        let (outbox, queue) = bounded(4);
        let closed = Arc::new(Signal::new());

        let worker = {
            let closed = Arc::clone(&closed);
            spawn_worker("egress".into(), move || egress(node, queue, closed)).unwrap()
        };

        for _ in 0..8 {
            outbox
                .send(Envelope {
                    id: "abc".into(),
                    msg: Message::new("lost"),
                })
                .unwrap();
        }

        closed.fire();
        worker.join().unwrap();
    }

    #[test]
    fn ingress_routes_and_skips_unmatched() {
        let (node, _sent, inbound) = scripted(false);
        let registry = Arc::new(Registry::default());
        let (outbox, _queue) = unbounded();
        let listener = Listener::new(stream_id("svc"), "svc".into(), 4);
        registry.put_listener(listener.clone()).unwrap();

        let ingress = Ingress {
            node,
            registry: Arc::clone(&registry),
            outbox,
            closed: Arc::new(Signal::new()),
            options: TransportOptions::default(),
        };
        let worker = spawn_worker("ingress".into(), move || ingress.run()).unwrap();

        inbound.send(Message::new("no stream")).unwrap();
        inbound
            .send(Message::new("stray").with_header(STREAM_HEADER, stream_id("nobody")))
            .unwrap();
        inbound
            .send(
                Message::new("first")
                    .with_header(STREAM_HEADER, stream_id("svc"))
                    .with_header(REMOTE_HEADER, "peer-b"),
            )
            .unwrap();
        inbound
            .send(Message::new("second").with_header(STREAM_HEADER, stream_id("svc")))
            .unwrap();

        let socket = listener.accept_one().unwrap();
        assert_eq!(socket.id(), stream_id("svc"));
        assert_eq!(socket.remote(), "peer-b");
        assert_eq!(socket.local(), "scripted");
        assert_eq!(socket.recv().unwrap().body, b"first");
        assert_eq!(socket.recv().unwrap().body, b"second");

        drop(inbound);
        worker.join().unwrap();
        assert_eq!(registry.socket_count(), 1);
    }

    #[test]
    fn ingress_evicts_closed_socket() {
        let (node, _sent, inbound) = scripted(false);
        let registry = Arc::new(Registry::default());
        let (outbox, _queue) = unbounded();
        let socket = Socket::new(stream_id("svc"), "l".into(), "r".into(), outbox.clone(), 4);
        registry.put_socket(socket.clone());
        socket.close();

        let ingress = Ingress {
            node,
            registry: Arc::clone(&registry),
            outbox,
            closed: Arc::new(Signal::new()),
            options: TransportOptions::default(),
        };
        let worker = spawn_worker("ingress".into(), move || ingress.run()).unwrap();

        inbound
            .send(Message::new("late").with_header(STREAM_HEADER, stream_id("svc")))
            .unwrap();
        drop(inbound);
        worker.join().unwrap();

        assert_eq!(registry.socket_count(), 0);
    }

    #[test]
    fn ingress_evicts_closed_listener() {
        let (node, _sent, inbound) = scripted(false);
        let registry = Arc::new(Registry::default());
        let (outbox, _queue) = unbounded();
        let listener = Listener::new(stream_id("svc"), "svc".into(), 4);
        registry.put_listener(listener.clone()).unwrap();
        listener.close();
        assert_eq!(registry.listener_count(), 1);

        let ingress = Ingress {
            node,
            registry: Arc::clone(&registry),
            outbox,
            closed: Arc::new(Signal::new()),
            options: TransportOptions::default(),
        };
        let worker = spawn_worker("ingress".into(), move || ingress.run()).unwrap();

        inbound
            .send(Message::new("late").with_header(STREAM_HEADER, stream_id("svc")))
            .unwrap();
        drop(inbound);
        worker.join().unwrap();

        assert_eq!(registry.listener_count(), 0);
        assert_eq!(registry.socket_count(), 0);
    }
}

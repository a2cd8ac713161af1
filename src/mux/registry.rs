//! Live sockets and listeners, keyed by stream id.
//!
//! All lookups and mutations go through one lock. [`Registry::route`] is the
//! ingress worker's find-or-create step and runs as a single critical section,
//! so a socket cannot be created for a listener that is concurrently being
//! evicted, and a closed socket is never handed out for delivery.
//!
//! Closed entries are not scavenged eagerly: a closed socket or listener stays
//! registered until inbound traffic for its id arrives or the transport
//! closes. A closed listener therefore still blocks `listen` on its address
//! until then.
//!
//! A socket displaced by a second dial of the same address is kept aside so
//! that closing the transport still reaches it.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::trace;

use crate::TransportError;

use super::{Listener, Socket};

/// Outcome of routing one inbound stream id.
#[derive(Debug)]
pub(crate) enum Route {
    /// An open socket owns the stream.
    Deliver(Socket),
    /// First contact: a new socket was registered for a matching listener.
    Accept(Listener, Socket),
    /// Nothing live matches; the message is discarded.
    Drop,
}

#[derive(Debug, Default)]
struct Tables {
    sockets: HashMap<String, Socket>,
    listeners: HashMap<String, Listener>,
    displaced: Vec<Socket>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `socket`, replacing any previous socket with the same id.
    pub(crate) fn put_socket(&self, socket: Socket) {
        let mut tables = self.lock();
        tables.displaced.retain(|s| !s.is_closed());
        if let Some(previous) = tables.sockets.insert(socket.id().to_string(), socket) {
            trace!("socket {} replaced an existing entry", previous.short_id());
            if !previous.is_closed() {
                tables.displaced.push(previous);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get_socket(&self, id: &str) -> Option<Socket> {
        self.lock().sockets.get(id).cloned()
    }

    /// Removes `socket`, unless its id has since been taken by another socket.
    pub(crate) fn delete_socket(&self, socket: &Socket) {
        let mut tables = self.lock();
        if tables
            .sockets
            .get(socket.id())
            .is_some_and(|current| current.same(socket))
        {
            tables.sockets.remove(socket.id());
        }
    }

    /// Registers `listener` unless any registered listener, closed or not,
    /// has its address.
    pub(crate) fn put_listener(&self, listener: Listener) -> Result<(), TransportError> {
        let mut tables = self.lock();
        if tables.listeners.values().any(|l| l.addr() == listener.addr()) {
            return Err(TransportError::AlreadyListening(listener.addr().to_string()));
        }
        tables
            .listeners
            .insert(listener.id().to_string(), listener);
        Ok(())
    }

    /// Removes `listener`, unless its id has since been taken by another listener.
    pub(crate) fn delete_listener(&self, listener: &Listener) {
        let mut tables = self.lock();
        if tables
            .listeners
            .get(listener.id())
            .is_some_and(|current| current.same(listener))
        {
            tables.listeners.remove(listener.id());
        }
    }

    pub(crate) fn route(&self, id: &str, make_socket: impl FnOnce() -> Socket) -> Route {
        let mut tables = self.lock();

        if let Some(socket) = tables.sockets.get(id).cloned() {
            if socket.is_closed() {
                tables.sockets.remove(id);
                return Route::Drop;
            }
            return Route::Deliver(socket);
        }

        let Some(listener) = tables.listeners.get(id).cloned() else {
            return Route::Drop;
        };
        if listener.is_closed() {
            tables.listeners.remove(id);
            return Route::Drop;
        }

        let socket = make_socket();
        tables.sockets.insert(id.to_string(), socket.clone());
        Route::Accept(listener, socket)
    }

    /// Empties both tables, returning what was registered, displaced sockets
    /// included.
    pub(crate) fn drain(&self) -> (Vec<Socket>, Vec<Listener>) {
        let mut tables = self.lock();
        let mut sockets: Vec<Socket> = tables.displaced.drain(..).collect();
        sockets.extend(tables.sockets.drain().map(|(_, s)| s));
        let listeners = tables.listeners.drain().map(|(_, l)| l).collect();
        (sockets, listeners)
    }

    #[cfg(test)]
    pub(crate) fn socket_count(&self) -> usize {
        self.lock().sockets.len()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;
    use crate::stream_id;

    fn socket(seed: &str) -> Socket {
        let (outbox, _) = unbounded();
        Socket::new(stream_id(seed), "local".into(), seed.into(), outbox, 4)
    }

    fn listener(addr: &str) -> Listener {
        Listener::new(stream_id(addr), addr.into(), 4)
    }

    #[test]
    fn route_prefers_socket() {
        let registry = Registry::default();
        registry.put_socket(socket("svc"));
        registry.put_listener(listener("svc")).unwrap();

        let route = registry.route(&stream_id("svc"), || unreachable!("socket exists"));
        assert!(matches!(route, Route::Deliver(_)));
    }

    #[test]
    fn route_creates_socket_for_listener() {
        let registry = Registry::default();
        registry.put_listener(listener("svc")).unwrap();

        let id = stream_id("svc");
        let route = registry.route(&id, || socket("svc"));
        let Route::Accept(l, s) = route else {
            panic!("expected accept, got {route:?}");
        };
        assert_eq!(l.addr(), "svc");
        assert!(registry.get_socket(&id).is_some_and(|r| r.same(&s)));

        // Later traffic on the stream goes to the new socket.
        assert!(matches!(
            registry.route(&id, || unreachable!()),
            Route::Deliver(_)
        ));
    }

    #[test]
    fn route_drops_unknown_stream() {
        let registry = Registry::default();
        assert!(matches!(
            registry.route(&stream_id("nobody"), || unreachable!()),
            Route::Drop
        ));
        assert_eq!(registry.socket_count(), 0);
    }

    #[test]
    fn route_evicts_closed_entries_lazily() {
        let registry = Registry::default();
        let s = socket("a");
        let l = listener("b");
        registry.put_socket(s.clone());
        registry.put_listener(l.clone()).unwrap();
        s.close();
        l.close();

        assert_eq!(registry.socket_count(), 1);
        assert_eq!(registry.listener_count(), 1);

        assert!(matches!(
            registry.route(&stream_id("a"), || unreachable!()),
            Route::Drop
        ));
        assert!(matches!(
            registry.route(&stream_id("b"), || unreachable!()),
            Route::Drop
        ));
        assert_eq!(registry.socket_count(), 0);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn listen_exclusivity() {
        let registry = Registry::default();
        registry.put_listener(listener("X")).unwrap();

        assert!(matches!(
            registry.put_listener(listener("X")),
            Err(TransportError::AlreadyListening(addr)) if addr == "X"
        ));
        registry.put_listener(listener("Y")).unwrap();
    }

    #[test]
    fn closed_listener_holds_address_until_scavenged() {
        let registry = Registry::default();
        let first = listener("X");
        registry.put_listener(first.clone()).unwrap();
        first.close();

        assert!(matches!(
            registry.put_listener(listener("X")),
            Err(TransportError::AlreadyListening(_))
        ));

        registry.route(&stream_id("X"), || unreachable!());
        registry.put_listener(listener("X")).unwrap();
        assert_eq!(registry.listener_count(), 1);
    }

    #[test]
    fn delete_ignores_replaced_socket() {
        let registry = Registry::default();
        let old = socket("svc");
        let new = socket("svc");
        registry.put_socket(old.clone());
        registry.put_socket(new.clone());

        registry.delete_socket(&old);
        assert!(registry.get_socket(&stream_id("svc")).is_some_and(|s| s.same(&new)));

        registry.delete_socket(&new);
        assert_eq!(registry.socket_count(), 0);
    }

    #[test]
    fn delete_listener_ignores_replacement() {
        let registry = Registry::default();
        let old = listener("X");
        registry.put_listener(old.clone()).unwrap();
        old.close();
        registry.route(&stream_id("X"), || unreachable!());
        let new = listener("X");
        registry.put_listener(new.clone()).unwrap();

        registry.delete_listener(&old);
        assert_eq!(registry.listener_count(), 1);

        registry.delete_listener(&new);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn drain_returns_displaced_sockets() {
        let registry = Registry::default();
        let old = socket("svc");
        let new = socket("svc");
        registry.put_socket(old.clone());
        registry.put_socket(new.clone());

        let (sockets, _) = registry.drain();
        assert_eq!(sockets.len(), 2);
        assert!(sockets.iter().any(|s| s.same(&old)));
        assert!(sockets.iter().any(|s| s.same(&new)));
    }

    #[test]
    fn drain_empties_tables() {
        let registry = Registry::default();
        registry.put_socket(socket("a"));
        registry.put_listener(listener("b")).unwrap();

        let (sockets, listeners) = registry.drain();
        assert_eq!((sockets.len(), listeners.len()), (1, 1));
        assert_eq!(registry.socket_count(), 0);
        assert_eq!(registry.listener_count(), 0);
    }
}

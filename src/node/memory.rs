//! In-process links.
//!
//! A [`MemoryNetwork`] is a hub shared by any number of endpoints. Messages
//! sent by one connected node are delivered to every *other* connected node,
//! so with two endpoints the hub behaves as a point-to-point link.
//!
//! # Example
//! ```rust
//! use tether::{Message, node::{MemoryNetwork, Network, Node}};
//!
//! let hub = MemoryNetwork::new();
//! let a = hub.node("a").connect().unwrap();
//! let b = hub.node("b").connect().unwrap();
//!
//! a.send(Message::new("hello")).unwrap();
//! assert_eq!(b.accept().unwrap().body, b"hello");
//! ```
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, trace};

use crate::{LinkError, Message, signal::Signal};

use super::{Network, Node};

const INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Hub {
    generation: AtomicU64,
    nodes: Mutex<HashMap<String, (u64, Sender<Message>)>>,
}

impl Hub {
    fn register(&self, address: &str, sender: Sender<Message>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if nodes
            .insert(address.to_string(), (generation, sender))
            .is_some()
        {
            debug!("memory node {address} replaced a previous connection");
        }
        generation
    }

    fn unregister(&self, address: &str, generation: u64) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if nodes.get(address).is_some_and(|(g, _)| *g == generation) {
            nodes.remove(address);
        }
    }

    fn peers_of(&self, address: &str) -> Vec<Sender<Message>> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(addr, _)| addr.as_str() != address)
            .map(|(_, (_, sender))| sender.clone())
            .collect()
    }
}

/// Shared in-process hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Network`] whose nodes live at `address` on this hub.
    pub fn node(&self, address: impl Into<String>) -> MemoryEndpoint {
        MemoryEndpoint {
            address: address.into(),
            hub: Arc::clone(&self.hub),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    address: String,
    hub: Arc<Hub>,
}

impl Network for MemoryEndpoint {
    fn connect(&self) -> Result<Arc<dyn Node>, LinkError> {
        let (sender, inbox) = bounded(INBOX_CAPACITY);
        let generation = self.hub.register(&self.address, sender);
        debug!("memory node {} connected", self.address);

        Ok(Arc::new(MemoryNode {
            address: self.address.clone(),
            generation,
            hub: Arc::clone(&self.hub),
            inbox,
            closed: Signal::new(),
        }))
    }
}

#[derive(Debug)]
pub struct MemoryNode {
    address: String,
    generation: u64,
    hub: Arc<Hub>,
    inbox: Receiver<Message>,
    closed: Signal,
}

impl Node for MemoryNode {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn send(&self, msg: Message) -> Result<(), LinkError> {
        if self.closed.is_fired() {
            return Err(LinkError::Closed);
        }

        let peers = self.hub.peers_of(&self.address);
        if peers.is_empty() {
            return Err(LinkError::Unreachable(self.address.clone()));
        }

        trace!(
            "memory node {} fanning out to {} peer(s)",
            self.address,
            peers.len()
        );
        for peer in peers {
            // A peer that went away since the lookup simply misses the message.
            let _ = peer.send(msg.clone());
        }
        Ok(())
    }

    fn accept(&self) -> Result<Message, LinkError> {
        select! {
            recv(self.inbox) -> msg => msg.map_err(|_| LinkError::Closed),
            recv(self.closed.receiver()) -> _ => Err(LinkError::Closed),
        }
    }

    fn close(&self) -> Result<(), LinkError> {
        if self.closed.fire() {
            self.hub.unregister(&self.address, self.generation);
            debug!("memory node {} closed", self.address);
        }
        Ok(())
    }
}

//! Raw point-to-point links.
//!
//! The multiplexer never talks to a network directly. It asks a [`Network`] for
//! a fresh [`Node`] every time it connects, and treats that node as an opaque,
//! bidirectional message pipe to exactly one peer (or to a broadcast medium,
//! if the implementation offers one).
//!
//! # Key Components
//!
//! - [`Network`]: produces a connected [`Node`].
//! - [`Node`]: sends and receives whole [`Message`]s.
//! - [`MemoryNetwork`]: in-process hub, used for tests and single-process setups.
//! - [`TcpNetwork`]: one TCP connection, messages framed with bincode.
//!
//! # Contract
//!
//! [`Node::accept`] blocks until a message arrives. [`Node::close`] must unblock
//! any pending `accept`, which then returns an error. The multiplexer treats an
//! `accept` error as the end of the link.
use std::sync::Arc;

use crate::{LinkError, Message};

mod memory;
mod tcp;

pub use memory::{MemoryEndpoint, MemoryNetwork, MemoryNode};
pub use tcp::{TcpNetwork, TcpNode};

/// Source of connected nodes.
pub trait Network: Send + Sync {
    /// Establishes a new link. Each call yields an independent node.
    fn connect(&self) -> Result<Arc<dyn Node>, LinkError>;
}

/// One established link to a peer.
pub trait Node: Send + Sync {
    /// Address of this end of the link.
    fn address(&self) -> String;

    fn send(&self, msg: Message) -> Result<(), LinkError>;

    /// Blocks until the next inbound message.
    fn accept(&self) -> Result<Message, LinkError>;

    fn close(&self) -> Result<(), LinkError>;
}

//! Stream multiplexing over a single point-to-point link.
//!
//! Many independent virtual sockets share one underlying [`Node`](node::Node)
//! connection. Outbound messages are tagged with a stream id in the
//! [`STREAM_HEADER`] header; inbound messages are routed back to the socket,
//! or to the listener, registered under that id.
//!
//! # Key Components
//!
//! - [`Transport`]: owns the link and the socket/listener registries.
//! - [`Socket`] and [`Listener`]: the virtual connection and acceptor handles.
//! - [`node`]: the link abstraction plus in-memory and TCP implementations.
pub mod error;
pub mod message;
pub mod mux;
pub mod node;
pub mod options;
pub mod signal;

pub use error::{LinkError, TransportError};
pub use message::{Message, REMOTE_HEADER, STREAM_HEADER, stream_id};
pub use mux::{Listener, Socket, Transport};
pub use options::TransportOptions;

//! Links over a single TCP connection.
//!
//! Each [`Message`] is written as one bincode frame using the standard
//! configuration with big-endian, fixed-width integers. Frames larger than
//! [`MAX_FRAME`] are rejected on decode.
use std::{
    io::{self, BufReader, BufWriter, ErrorKind, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, PoisonError},
};

use bincode::{
    config::{BigEndian, Configuration, Fixint, Limit},
    decode_from_std_read, encode_into_std_write,
    error::DecodeError,
};
use log::{debug, info};

use crate::{LinkError, Message, signal::Signal};

use super::{Network, Node};

/// Largest accepted frame, in bytes.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_FRAME>>;

fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_FRAME>()
}

/// Produces TCP nodes, either by dialing a peer or by accepting one.
#[derive(Debug)]
pub enum TcpNetwork {
    Dial(SocketAddr),
    Bind(TcpListener),
}

impl TcpNetwork {
    pub fn dial(peer: impl ToSocketAddrs) -> io::Result<Self> {
        let peer = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no address to dial"))?;
        Ok(TcpNetwork::Dial(peer))
    }

    /// Binds `addr`; every [`Network::connect`] waits for one inbound peer.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("tcp link listening at {}", listener.local_addr()?);
        Ok(TcpNetwork::Bind(listener))
    }

    /// The bound address for [`TcpNetwork::Bind`], the peer for [`TcpNetwork::Dial`].
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            TcpNetwork::Dial(peer) => Ok(*peer),
            TcpNetwork::Bind(listener) => listener.local_addr(),
        }
    }
}

impl Network for TcpNetwork {
    fn connect(&self) -> Result<Arc<dyn Node>, LinkError> {
        let stream = match self {
            TcpNetwork::Dial(peer) => TcpStream::connect(peer).map_err(|e| match e.kind() {
                ErrorKind::ConnectionRefused => LinkError::Unreachable(peer.to_string()),
                _ => LinkError::Io(e),
            })?,
            TcpNetwork::Bind(listener) => {
                let (stream, peer) = listener.accept()?;
                debug!("tcp link accepted {peer}");
                stream
            }
        };

        Ok(Arc::new(TcpNode::new(stream)?))
    }
}

#[derive(Debug)]
pub struct TcpNode {
    local: String,
    stream: TcpStream,
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<BufWriter<TcpStream>>,
    closed: Signal,
}

impl TcpNode {
    pub fn new(stream: TcpStream) -> Result<Self, LinkError> {
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?.to_string();
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);

        Ok(Self {
            local,
            stream,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: Signal::new(),
        })
    }
}

impl Node for TcpNode {
    fn address(&self) -> String {
        self.local.clone()
    }

    fn send(&self, msg: Message) -> Result<(), LinkError> {
        if self.closed.is_fired() {
            return Err(LinkError::Closed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        encode_into_std_write(msg, &mut *writer, wire_config())?;
        writer.flush()?;
        Ok(())
    }

    fn accept(&self) -> Result<Message, LinkError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        match decode_from_std_read(&mut *reader, wire_config()) {
            Ok(msg) => Ok(msg),
            Err(DecodeError::Io { inner, .. }) if inner.kind() == ErrorKind::UnexpectedEof => {
                Err(LinkError::Closed)
            }
            Err(_) if self.closed.is_fired() => Err(LinkError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) -> Result<(), LinkError> {
        if !self.closed.fire() {
            return Ok(());
        }
        debug!("closing tcp link {}", self.local);
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

use std::io;

use thiserror::Error;

/// Failures of the underlying point-to-point link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("link IO error: {0}")]
    Io(#[from] io::Error),
    #[error("link closed")]
    Closed,
    #[error("link not connected")]
    NotConnected,
    #[error("no peer reachable at '{0}'")]
    Unreachable(String),
}

/// Errors returned to callers of the multiplexing transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("already listening on {0}")]
    AlreadyListening(String),
    /// The socket or listener is gone; not retryable.
    #[error("end of stream")]
    EndOfStream,
    #[error(transparent)]
    Link(#[from] LinkError),
}

impl TransportError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TransportError::EndOfStream)
    }
}

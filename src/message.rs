//! Wire unit exchanged with the underlying link.
//!
//! A [`Message`] is a string header map plus an opaque body. Two header keys are
//! reserved by the multiplexer:
//!
//! - [`STREAM_HEADER`]: the stream id used to demultiplex inbound traffic. Every
//!   message leaving the egress dispatcher carries it.
//! - [`REMOTE_HEADER`]: the address of the peer that opened the stream. The
//!   remote listener copies it into the accepted socket's `remote()`.
//!
//! Stream ids are derived with [`stream_id`], a hex encoded SHA-256 digest of a
//! seed string. Because the digest is a pure function of the seed, dialing the
//! same address twice yields the same id.
use std::collections::HashMap;

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};

/// Header carrying the multiplexing stream id.
pub const STREAM_HEADER: &str = "Micro-Stream";

/// Header carrying the originating peer address.
pub const REMOTE_HEADER: &str = "Remote";

#[derive(Debug, Clone, Default, Encode, Decode, PartialEq, Eq)]
pub struct Message {
    pub header: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header entry, replacing any previous value for `key`.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// The stream id, if the message has been through an egress dispatcher.
    pub fn stream(&self) -> Option<&str> {
        self.header.get(STREAM_HEADER).map(String::as_str)
    }

    /// Address of the node that sent the message.
    pub fn remote(&self) -> Option<&str> {
        self.header.get(REMOTE_HEADER).map(String::as_str)
    }
}

/// Derives the stream id for `seed`.
pub fn stream_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_is_sha256_hex() {
        assert_eq!(
            stream_id(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(stream_id("svc").len(), 64);
    }

    #[test]
    fn stream_id_is_deterministic() {
        assert_eq!(stream_id("svcA"), stream_id("svcA"));
        assert_ne!(stream_id("svcA"), stream_id("svcB"));
    }

    #[test]
    fn reserved_headers() {
        let msg = Message::new("ping")
            .with_header(STREAM_HEADER, "abc")
            .with_header(REMOTE_HEADER, "10.0.0.1:9000");

        assert_eq!(msg.stream(), Some("abc"));
        assert_eq!(msg.remote(), Some("10.0.0.1:9000"));
        assert_eq!(Message::new("x").stream(), None);
    }
}

//! Fixed-size identifiers used across the protocol.

use std::fmt;
use std::str::FromStr;

use crate::{PEER_ID_SIZE, REQUEST_ID_SIZE};

/// A peer's long-term Ed25519 public key; serves as both identity and
/// signature-verification key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(pub [u8; PEER_ID_SIZE]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    /// Abbreviated hex form for logs. Never trust-relevant.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}…)", self.short())
    }
}

impl From<[u8; PEER_ID_SIZE]> for PeerId {
    fn from(bytes: [u8; PEER_ID_SIZE]) -> Self {
        PeerId(bytes)
    }
}

/// Error parsing a hex peer id.
#[derive(Debug, thiserror::Error)]
#[error("invalid peer id: {0}")]
pub struct ParsePeerIdError(String);

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParsePeerIdError(e.to_string()))?;
        let arr: [u8; PEER_ID_SIZE] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| ParsePeerIdError(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(PeerId(arr))
    }
}

/// Correlates a client frame with the router's reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestId(pub [u8; REQUEST_ID_SIZE]);

impl RequestId {
    pub fn as_bytes(&self) -> &[u8; REQUEST_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", hex::encode(&self.0[..4]))
    }
}

impl From<[u8; REQUEST_ID_SIZE]> for RequestId {
    fn from(bytes: [u8; REQUEST_ID_SIZE]) -> Self {
        RequestId(bytes)
    }
}

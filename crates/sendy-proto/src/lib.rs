//! Wire types shared by the sendy router and the peer connector.
//!
//! Two layers live here:
//! - the binary router framing (length-prefixed, big-endian) used between a
//!   client and the router, and
//! - the JSON signaling envelopes a peer sends *through* the router to
//!   another peer (signed, and except for the key-exchange marker, sealed).

#![forbid(unsafe_code)]

pub mod envelope;
pub mod frame;
pub mod ids;
pub mod signaling;

pub use envelope::{SealedEnvelope, SignedEnvelope, KEY_EXCHANGE_MARKER, MIN_SEALED_LEN};
pub use frame::{PeerHeader, ServerMessage, ServerMsgType};
pub use ids::{PeerId, RequestId};
pub use signaling::Signaling;

use thiserror::Error;

/// Upper bound on any single router frame, header included, length prefix
/// excluded.
pub const MAX_PACKET_SIZE: usize = 32 * 1024;

/// Random challenge sent by the router during the auth handshake.
pub const CHALLENGE_SIZE: usize = 32;

/// Ed25519 public key, doubling as the peer identity.
pub const PEER_ID_SIZE: usize = 32;

/// Detached Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Per-request correlation id.
pub const REQUEST_ID_SIZE: usize = 12;

/// Client frame header: length prefix + request id + recipient.
pub const PEER_HEADER_SIZE: usize = 4 + REQUEST_ID_SIZE + PEER_ID_SIZE;

/// Largest payload a client frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - REQUEST_ID_SIZE - PEER_ID_SIZE;

/// Errors from the framing layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer went away (EOF or reset) at a frame boundary or mid-frame.
    #[error("connection closed")]
    Closed,

    /// The bytes on the wire violate the protocol; the connection must be
    /// dropped without acting on the frame.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => WireError::Closed,
            _ => WireError::Io(e),
        }
    }
}

//! Events surfaced by the connector to the application layer.

use sendy_proto::PeerId;

/// Reason attached to a security-relevant drop. These are surfaced to the
/// user rather than silently suppressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityAlert {
    /// An inbound envelope failed Ed25519 verification under the sender id.
    InvalidSignature,
    /// The sender announced an encryption key different from the pinned one.
    /// Suspected MITM; the stored key is never updated.
    KeyMismatch,
    /// A non-handshake envelope was too short to be a real ciphertext.
    ShortCiphertext,
    /// The sealed body failed authenticated decryption.
    DecryptionFailed,
}

/// Connector lifecycle and data events.
#[derive(Debug)]
pub enum Event {
    /// The authenticated channel to `peer` is up in both directions.
    Connected { peer: PeerId },
    /// The session to `peer` went away.
    Disconnected { peer: PeerId },
    /// An outgoing or incoming connection attempt died before a session
    /// existed.
    ConnectionFailed { peer: PeerId, reason: String },
    /// A plaintext application message decrypted off the peer channel.
    DataReceived { peer: PeerId, data: Vec<u8> },
    /// A message from `peer` was dropped for a security reason.
    SecurityEvent { peer: PeerId, alert: SecurityAlert },
    /// A non-security processing error on an inbound message or live
    /// channel.
    Error { peer: PeerId, reason: String },
}

impl Event {
    /// The peer this event concerns.
    pub fn peer(&self) -> PeerId {
        match self {
            Event::Connected { peer }
            | Event::Disconnected { peer }
            | Event::ConnectionFailed { peer, .. }
            | Event::DataReceived { peer, .. }
            | Event::SecurityEvent { peer, .. }
            | Event::Error { peer, .. } => *peer,
        }
    }
}

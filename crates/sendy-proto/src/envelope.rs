//! Signaling envelopes carried in a router frame's payload.
//!
//! Every signaling payload is a [`SignedEnvelope`] whose inner `payload`
//! bytes are themselves a serialized [`SealedEnvelope`]. The serialization
//! is JSON with stable field names; decoders tolerate unknown fields and
//! reject missing ones. Byte fields travel as base64 strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PEER_ID_SIZE, SIGNATURE_SIZE};

/// Literal body of the handshake-only envelope. Not a ciphertext.
pub const KEY_EXCHANGE_MARKER: &[u8] = b"KEY_EXCHANGE_V1";

/// Smallest possible sealed body: 24-byte nonce plus 16-byte tag.
pub const MIN_SEALED_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("invalid field length for {field}: expected {expected}, got {got}")]
    BadLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Outer wrapper: opaque payload bytes plus a detached Ed25519 signature by
/// the sender's identity key over exactly those bytes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedEnvelope {
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    pub fn new(payload: Vec<u8>, signature: [u8; SIGNATURE_SIZE]) -> Self {
        Self {
            payload,
            signature: signature.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let env: SignedEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if env.signature.len() != SIGNATURE_SIZE {
            return Err(EnvelopeError::BadLength {
                field: "signature",
                expected: SIGNATURE_SIZE,
                got: env.signature.len(),
            });
        }
        Ok(env)
    }

    /// The signature as a fixed array. Length was validated at decode time.
    pub fn signature_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&self.signature);
        sig
    }
}

/// Inner wrapper: the sender's encryption public key plus either a sealed
/// body (`nonce ‖ ciphertext ‖ tag`) or the literal key-exchange marker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedEnvelope {
    #[serde(with = "b64")]
    pub sender_enc_pubkey: Vec<u8>,
    #[serde(with = "b64")]
    pub encrypted_data: Vec<u8>,
}

impl SealedEnvelope {
    pub fn new(sender_enc_pubkey: [u8; PEER_ID_SIZE], encrypted_data: Vec<u8>) -> Self {
        Self {
            sender_enc_pubkey: sender_enc_pubkey.to_vec(),
            encrypted_data,
        }
    }

    /// The handshake envelope announcing our encryption key.
    pub fn key_exchange(sender_enc_pubkey: [u8; PEER_ID_SIZE]) -> Self {
        Self::new(sender_enc_pubkey, KEY_EXCHANGE_MARKER.to_vec())
    }

    pub fn is_key_exchange(&self) -> bool {
        self.encrypted_data == KEY_EXCHANGE_MARKER
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let env: SealedEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if env.sender_enc_pubkey.len() != PEER_ID_SIZE {
            return Err(EnvelopeError::BadLength {
                field: "sender_enc_pubkey",
                expected: PEER_ID_SIZE,
                got: env.sender_enc_pubkey.len(),
            });
        }
        Ok(env)
    }

    /// The sender's encryption key as a fixed array. Length was validated at
    /// decode time.
    pub fn sender_key(&self) -> [u8; PEER_ID_SIZE] {
        let mut key = [0u8; PEER_ID_SIZE];
        key.copy_from_slice(&self.sender_enc_pubkey);
        key
    }
}

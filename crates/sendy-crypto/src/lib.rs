//! Cryptographic identity and the sealed-box primitive for sendy.
//!
//! An identity is a single Ed25519 signing keypair; the X25519 encryption
//! keypair is a pure function of the signing seed, so rotating the identity
//! rotates both keys atomically and nothing beyond the keyfile needs to be
//! persisted.

#![forbid(unsafe_code)]

pub mod identity;
pub mod sealed;

pub use identity::{verify_signature, Identity};
pub use sealed::{open, seal, SEAL_OVERHEAD};

use thiserror::Error;

/// Errors from identity and sealed-box operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key file: expected {expected} bytes, got {got}")]
    InvalidKeyFile { expected: usize, got: usize },

    #[error("key file does not match its embedded public key")]
    KeyFileMismatch,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("sealed message too short: {0} bytes")]
    TooShort(usize),

    #[error("encryption failed")]
    SealFailed,

    #[error("decryption failed: authentication failed or corrupted message")]
    OpenFailed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

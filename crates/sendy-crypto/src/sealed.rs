//! Static-static sealed box: X25519 agreement, HKDF key schedule,
//! XChaCha20-Poly1305 with a random 24-byte nonce prefixed to the output.
//!
//! `open(seal(m, b_pub, a_priv), a_pub, b_priv) == m`: the shared secret
//! is symmetric, so either party can seal to the other with its own static
//! secret.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::CryptoError;

const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;
const KDF_INFO: &[u8] = b"sendy_box_v1";

/// Bytes added by `seal`: nonce prefix plus authentication tag.
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Per-message key: HKDF-SHA256 over the shared secret, salted with the
/// nonce so every message gets an independent key.
fn message_key(shared: &[u8; 32], nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(nonce), shared);
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF output length");
    key
}

/// Seal `plaintext` for the holder of `recipient_pub`. Output is
/// `nonce ‖ ciphertext ‖ tag`, `SEAL_OVERHEAD` bytes longer than the input.
pub fn seal(
    plaintext: &[u8],
    recipient_pub: &[u8; 32],
    sender_secret: &StaticSecret,
) -> Result<Vec<u8>, CryptoError> {
    let shared = sender_secret
        .diffie_hellman(&X25519PublicKey::from(*recipient_pub))
        .to_bytes();

    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::SealFailed)?;

    let mut key = message_key(&shared, &nonce);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::SealFailed)?;
    key.zeroize();

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed message from the holder of `sender_pub`. Fails closed on
/// truncation, tampering, or a wrong key pair.
pub fn open(
    sealed: &[u8],
    sender_pub: &[u8; 32],
    recipient_secret: &StaticSecret,
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::TooShort(sealed.len()));
    }

    let shared = recipient_secret
        .diffie_hellman(&X25519PublicKey::from(*sender_pub))
        .to_bytes();

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&sealed[..NONCE_SIZE]);

    let mut key = message_key(&shared, &nonce);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&nonce), &sealed[NONCE_SIZE..])
        .map_err(|_| CryptoError::OpenFailed)?;
    key.zeroize();

    Ok(plaintext)
}

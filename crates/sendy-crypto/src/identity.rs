//! Long-term identity: Ed25519 signing keys plus the X25519 encryption
//! keys deterministically derived from the same seed.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use sendy_proto::{PeerId, SIGNATURE_SIZE};

use crate::CryptoError;

/// Domain-separation label for deriving the encryption scalar from the
/// signing seed.
const DERIVE_LABEL: &[u8] = b"curve25519-encryption:";

/// On-disk form: 32-byte seed followed by the 32-byte public key.
pub const KEYFILE_SIZE: usize = 64;

/// A local identity. Owns the signing key and the derived encryption key;
/// both are functions of the 32-byte seed.
pub struct Identity {
    sign: SigningKey,
    enc: StaticSecret,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let sign = SigningKey::generate(&mut OsRng);
        let enc = derive_encryption_secret(&sign.to_bytes());
        Self { sign, enc }
    }

    /// Build an identity from a 32-byte signing seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let sign = SigningKey::from_bytes(seed);
        let enc = derive_encryption_secret(seed);
        Self { sign, enc }
    }

    /// Parse the 64-byte keyfile form (seed ‖ public key). The embedded
    /// public key must match the one derived from the seed.
    pub fn from_keyfile_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEYFILE_SIZE {
            return Err(CryptoError::InvalidKeyFile {
                expected: KEYFILE_SIZE,
                got: bytes.len(),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let identity = Self::from_seed(&seed);
        seed.zeroize();

        if identity.sign.verifying_key().to_bytes() != bytes[32..] {
            return Err(CryptoError::KeyFileMismatch);
        }
        Ok(identity)
    }

    /// The 64-byte keyfile form.
    pub fn to_keyfile_bytes(&self) -> [u8; KEYFILE_SIZE] {
        let mut out = [0u8; KEYFILE_SIZE];
        out[..32].copy_from_slice(&self.sign.to_bytes());
        out[32..].copy_from_slice(&self.sign.verifying_key().to_bytes());
        out
    }

    /// Load an identity from `path`, or generate one and persist it there
    /// if the file does not exist.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), CryptoError> {
        match fs::read(path) {
            Ok(bytes) => Ok((Self::from_keyfile_bytes(&bytes)?, false)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate();
                identity.save(path)?;
                Ok((identity, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the keyfile with restrictive permissions. Writes to a
    /// temporary sibling first, then renames into place.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_keyfile_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The public signing key, doubling as this identity's peer id.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.sign.verifying_key().to_bytes())
    }

    /// The derived X25519 public key announced in sealed envelopes.
    pub fn enc_public(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.enc).to_bytes()
    }

    /// The derived X25519 secret, for sealed-box operations.
    pub fn enc_secret(&self) -> &StaticSecret {
        &self.enc
    }

    /// Detached Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let sig: Signature = self.sign.sign(message);
        sig.to_bytes()
    }
}

/// Derive the X25519 secret from the signing seed: SHA-512 over the
/// domain label and seed, first 32 bytes as the scalar, standard clamping.
/// Deterministic and pure.
fn derive_encryption_secret(seed: &[u8; 32]) -> StaticSecret {
    let mut hasher = Sha512::new();
    hasher.update(DERIVE_LABEL);
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;

    let secret = StaticSecret::from(scalar);
    scalar.zeroize();
    secret
}

/// Verify a detached Ed25519 signature under a peer id.
pub fn verify_signature(
    peer: &PeerId,
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let key =
        VerifyingKey::from_bytes(peer.as_bytes()).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    key.verify_strict(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn derivation_is_deterministic() {
        let seed = [42u8; 32];
        let a = Identity::from_seed(&seed);
        let b = Identity::from_seed(&seed);
        assert_eq!(a.enc_public(), b.enc_public());
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn different_seeds_derive_different_keys() {
        let a = Identity::from_seed(&[1u8; 32]);
        let b = Identity::from_seed(&[2u8; 32]);
        assert_ne!(a.enc_public(), b.enc_public());
    }

    #[test]
    fn shared_secret_agrees_both_ways() {
        let a = Identity::generate();
        let b = Identity::generate();

        let ab = a
            .enc_secret()
            .diffie_hellman(&X25519PublicKey::from(b.enc_public()));
        let ba = b
            .enc_secret()
            .diffie_hellman(&X25519PublicKey::from(a.enc_public()));
        assert_eq!(ab.to_bytes(), ba.to_bytes());
    }

    #[test]
    fn signature_round_trip() {
        let identity = Identity::generate();
        let sig = identity.sign(b"challenge");
        assert!(verify_signature(&identity.peer_id(), b"challenge", &sig).is_ok());
        assert!(verify_signature(&identity.peer_id(), b"tampered", &sig).is_err());
    }

    #[test]
    fn signature_under_wrong_key_fails() {
        let a = Identity::generate();
        let b = Identity::generate();
        let sig = a.sign(b"msg");
        assert!(verify_signature(&b.peer_id(), b"msg", &sig).is_err());
    }

    #[test]
    fn keyfile_round_trip() {
        let identity = Identity::generate();
        let restored = Identity::from_keyfile_bytes(&identity.to_keyfile_bytes()).unwrap();
        assert_eq!(identity.peer_id(), restored.peer_id());
        assert_eq!(identity.enc_public(), restored.enc_public());
    }

    #[test]
    fn keyfile_rejects_wrong_length() {
        assert!(matches!(
            Identity::from_keyfile_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidKeyFile { .. })
        ));
    }

    #[test]
    fn keyfile_rejects_mismatched_public_half() {
        let mut bytes = Identity::generate().to_keyfile_bytes();
        bytes[40] ^= 0xff;
        assert!(matches!(
            Identity::from_keyfile_bytes(&bytes),
            Err(CryptoError::KeyFileMismatch)
        ));
    }

    #[test]
    fn load_or_generate_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");

        let (first, generated) = Identity::load_or_generate(&path).unwrap();
        assert!(generated);

        let (second, generated) = Identity::load_or_generate(&path).unwrap();
        assert!(!generated);
        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[cfg(unix)]
    #[test]
    fn keyfile_permissions_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        Identity::generate().save(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

//! Ed25519 signature key pairs.
//!
//! Thin wrapper over `ed25519-dalek` presenting keys and signatures as the
//! raw byte strings the VM and block predicates traffic in.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Private key for signing transaction IDs and block headers.
///
/// Generated using cryptographically secure randomness from the OS.
/// Never serialized or transmitted.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a private key from a 32-byte seed.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.verifying_key(),
        }
    }

    /// Signs arbitrary data, producing a 64-byte signature.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(data).to_bytes()
    }
}

/// Public key for signature verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Parses a public key from raw bytes.
    ///
    /// Returns `None` if the length is wrong or the bytes are not a valid
    /// curve point.
    pub fn from_bytes(bytes: &[u8]) -> Option<PublicKey> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&arr).ok().map(|key| PublicKey { key })
    }

    /// Returns the raw 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.to_bytes()
    }

    /// Verifies a signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let sig: [u8; SIGNATURE_LEN] = match signature.try_into() {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.key
            .verify(data, &ed25519_dalek::Signature::from_bytes(&sig))
            .is_ok()
    }
}

/// Verifies `signature` over `data` against a raw public key.
///
/// Callers that need to distinguish malformed keys from bad signatures
/// (the VM's `checksig`) check lengths before calling; here any failure
/// is simply a non-verification.
pub fn verify(pubkey: &[u8], data: &[u8], signature: &[u8]) -> bool {
    match PublicKey::from_bytes(pubkey) {
        Some(pk) => pk.verify(data, signature),
        None => false,
    }
}

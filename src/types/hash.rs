//! 32-byte hash type, SHA3-256/SHA-256 builders, and the domain-tagged
//! "VM hash" used for seeds, IDs, and anchors.

use crate::types::encoding::EncodeSink;
use sha2::Sha256;
use sha3::digest::consts::U32;
use sha3::{Digest, Sha3_256};
use std::fmt;
use txvm_derive::BinaryCodec;

/// Hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used throughout the chain.
///
/// This type is `Copy` for performance - hashes are passed frequently during
/// block validation and should live on the stack to avoid heap allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    ///
    /// Used as a sentinel for unanchored nonces and the genesis previous-block
    /// reference.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Creates a hash from a byte slice of any length, zero-padding or
    /// truncating on the right.
    ///
    /// Used where the wire carries variable-length byte strings (nonce block
    /// IDs, contract seeds from input tuples) that the state layer keys by
    /// fixed-width hash.
    pub fn from_bytes_padded(slice: &[u8]) -> Hash {
        let mut bytes = [0u8; HASH_LEN];
        let n = slice.len().min(HASH_LEN);
        bytes[..n].copy_from_slice(&slice[..n]);
        Hash(bytes)
    }

    /// Parses a hash from a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Hash> {
        let bytes = crate::utils::hex::decode(s)?;
        Hash::from_slice(&bytes)
    }

    /// Creates a new SHA3-256 hash builder for incremental hashing.
    pub fn sha3() -> HashBuilder<Sha3_256> {
        HashBuilder::new()
    }

    /// Creates a new SHA-256 hash builder for incremental hashing.
    pub fn sha256() -> HashBuilder<Sha256> {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental hash builder over any 256-bit digest.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder<D: Digest<OutputSize = U32>> {
    hasher: D,
}

impl<D: Digest<OutputSize = U32>> HashBuilder<D> {
    /// Creates a new hash builder with empty state.
    pub fn new() -> Self {
        Self { hasher: D::new() }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Builder-style variant of [`update`](Self::update).
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl<D: Digest<OutputSize = U32>> Default for HashBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest<OutputSize = U32>> EncodeSink for HashBuilder<D> {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// Computes the domain-tagged VM hash `SHA3-256(uvarint(len(tag)) ‖ tag ‖ data)`.
///
/// Every derived identifier in the system (contract seeds, contract IDs,
/// asset IDs, anchors, block header IDs) goes through this function with a
/// distinct tag so that values from different domains can never collide.
pub fn vm_hash(tag: &[u8], data: &[u8]) -> Hash {
    let mut len_prefix = [0u8; 10];
    let n = put_uvarint(&mut len_prefix, tag.len() as u64);
    Hash::sha3()
        .chain(&len_prefix[..n])
        .chain(tag)
        .chain(data)
        .finalize()
}

/// Writes `v` as LEB128 into `buf`, returning the number of bytes written.
fn put_uvarint(buf: &mut [u8; 10], mut v: u64) -> usize {
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i + 1
}

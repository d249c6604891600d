//! Shared primitive types: byte buffers, hashes, the binary wire codec, and
//! the two authenticated tree structures the chain state depends on.

pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod merkle_tree;
pub mod patricia;

//! Shared test factories: deterministic programs, headers, and keys.

use crate::core::block::{new_initial_block, Block, BlockHeader};
use crate::crypto::key_pair::PrivateKey;
use crate::virtual_machine::item::{encode_int, write_pushdata};
use crate::virtual_machine::opcode as op;

/// Builds a minimal finalizable transaction program: a dropped salt for
/// uniqueness, then an unanchored `nonce` and `finalize`.
pub fn empty_tx_program(salt: u8) -> Vec<u8> {
    empty_tx_program_expiring(salt, 10_000)
}

/// Like [`empty_tx_program`] with an explicit nonce expiration.
pub fn empty_tx_program_expiring(salt: u8, exp_ms: i64) -> Vec<u8> {
    let mut p = Vec::new();
    write_pushdata(&mut p, &[salt; 32]);
    p.push(op::DROP);
    write_pushdata(&mut p, &[0u8; 32]);
    encode_int(exp_ms, &mut p);
    p.push(op::NONCE);
    p.push(op::FINALIZE);
    p
}

/// A height-1 header over empty trees with a 0-of-0 predicate.
pub fn initial_header() -> BlockHeader {
    initial_block().header
}

/// A height-1 block over empty trees with a 0-of-0 predicate.
pub fn initial_block() -> Block {
    new_initial_block(Vec::new(), 0, 1000)
}

/// A deterministic test key.
pub fn keypair(n: u8) -> PrivateKey {
    PrivateKey::from_bytes(&[n; 32])
}

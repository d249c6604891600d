//! Runlimit accounting.
//!
//! Every opcode debits a per-transaction budget before it does its work, so
//! memory and CPU are both bounded by the declared runlimit. The charge
//! model has three components: a base cost of 1 per opcode, a memory cost
//! proportional to bytes newly retained on a stack, and work costs for the
//! expensive operations (signature checks, hashing, fresh value or contract
//! records, log appends).

use crate::virtual_machine::errors::VmError;

/// Base cost debited for every opcode, including pushes.
pub const BASE_COST: i64 = 1;

/// Memory cost of a fresh Value or Contract record landing on a stack.
pub const CREATE_COST: i64 = 128;

/// Memory cost of a 32-byte hash pushed as Bytes (the byte length plus one).
pub const HASH_PUSH_COST: i64 = 33;

/// Work cost of verifying a non-empty Ed25519 signature.
pub const CHECKSIG_COST: i64 = 2048;

/// Log-record charges per domain code, covering the appended tuple's fixed
/// shape (the variable `log` payload is charged by encoded length instead).
pub const INPUT_RECORD_COST: i64 = 4;
pub const OUTPUT_RECORD_COST: i64 = 4;
pub const TIMERANGE_RECORD_COST: i64 = 5;
pub const FINALIZE_RECORD_COST: i64 = 5;
pub const NONCE_RECORD_COST: i64 = 6;
pub const ISSUE_RECORD_COST: i64 = 6;
pub const RETIRE_RECORD_COST: i64 = 6;

/// The remaining budget for a single transaction run.
#[derive(Debug, Clone, Copy)]
pub struct Runlimit {
    remaining: i64,
}

impl Runlimit {
    pub fn new(limit: i64) -> Runlimit {
        Runlimit { remaining: limit }
    }

    /// Debits `cost` units, faulting when the budget runs out.
    ///
    /// Costs derived from item sizes can be large but never negative.
    pub fn charge(&mut self, cost: i64) -> Result<(), VmError> {
        debug_assert!(cost >= 0);
        self.remaining -= cost;
        if self.remaining < 0 {
            return Err(VmError::Runlimit);
        }
        Ok(())
    }

    /// Returns the unspent budget.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

/// Memory charge for a byte string of length `len` landing on a stack.
pub fn bytes_cost(len: usize) -> i64 {
    len as i64 + 1
}

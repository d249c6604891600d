//! Block validation rules.
//!
//! [`block`] checks a candidate against its predecessor header and itself;
//! [`block_sig`] checks the predicate signatures. Neither mutates state;
//! the snapshot layer re-derives the tree roots separately.

use crate::core::block::{tx_merkle_root, Block, BlockHeader, DataItem, Predicate, UnsignedBlock};
use crate::crypto::key_pair::{self, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use txvm_derive::Error;

/// Block-level validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// A non-initial block was validated without its predecessor.
    #[error("no previous block for height {0}")]
    NoPrevBlock(u64),
    /// A version-3 block carries a transaction of another version.
    #[error("block version {block} cannot contain transaction version {tx}")]
    TxVersion { block: u64, tx: u64 },
    /// Block version went backwards.
    #[error("version regression: previous {prev}, current {current}")]
    VersionRegression { prev: u64, current: u64 },
    /// Height does not follow the predecessor.
    #[error("misordered block height: previous {prev}, current {current}")]
    MisorderedBlockHeight { prev: u64, current: u64 },
    /// Timestamp does not advance.
    #[error("misordered block time: previous {prev}, current {current}")]
    MisorderedBlockTime { prev: u64, current: u64 },
    /// The previous-block reference does not match the predecessor's ID.
    #[error("mismatched previous block reference")]
    MismatchedBlock,
    /// The transactions root does not match the transactions.
    #[error("mismatched transactions merkle root")]
    MismatchedMerkleRoot,
    /// The declared block runlimit is insufficient for its transactions.
    #[error("block runlimit not sufficient for transactions")]
    Runlimit,
    /// refs_count grew by more than one.
    #[error("refs count greater than allowed by previous block")]
    RefsCount,
    /// A version-3 block carries unknown header fields.
    #[error("unknown fields in block header")]
    ExtraFields,
    /// The predicate itself is malformed.
    #[error("invalid block predicate")]
    BadPredicate,
    /// The argument list does not fit the predicate.
    #[error("invalid block arguments for predicate")]
    BadArguments,
    /// Fewer valid signatures than the quorum requires.
    #[error("too few signatures for quorum")]
    TooFewSignatures,
}

/// Validates a block and the transactions within.
///
/// Does not check the predicate; for that see [`block_sig`].
pub fn block(b: &UnsignedBlock, prev: Option<&BlockHeader>) -> Result<(), BlockError> {
    if b.header.height > 1 {
        let prev = prev.ok_or(BlockError::NoPrevBlock(b.header.height))?;
        block_prev(b, prev)?;
    }
    block_only(b)
}

/// The parts of validation that depend only on the block itself.
pub fn block_only(b: &UnsignedBlock) -> Result<(), BlockError> {
    let mut runlimit = b.header.runlimit;
    for tx in &b.transactions {
        if b.header.version == 3 && tx.version != 3 {
            return Err(BlockError::TxVersion {
                block: b.header.version,
                tx: tx.version,
            });
        }
        runlimit -= tx.runlimit;
        if runlimit < 0 {
            return Err(BlockError::Runlimit);
        }
    }

    if tx_merkle_root(&b.transactions) != b.header.transactions_root {
        return Err(BlockError::MismatchedMerkleRoot);
    }

    if b.header.version == 3 && !b.header.extra_fields.is_empty() {
        return Err(BlockError::ExtraFields);
    }

    Ok(())
}

/// The parts of validation that need the previous block's header.
pub fn block_prev(b: &UnsignedBlock, prev: &BlockHeader) -> Result<(), BlockError> {
    if b.header.version < prev.version {
        return Err(BlockError::VersionRegression {
            prev: prev.version,
            current: b.header.version,
        });
    }
    if b.header.height != prev.height + 1 {
        return Err(BlockError::MisorderedBlockHeight {
            prev: prev.height,
            current: b.header.height,
        });
    }
    if prev.hash() != b.header.previous_block_id {
        return Err(BlockError::MismatchedBlock);
    }
    if b.header.timestamp_ms <= prev.timestamp_ms {
        return Err(BlockError::MisorderedBlockTime {
            prev: prev.timestamp_ms,
            current: b.header.timestamp_ms,
        });
    }
    if b.header.refs_count > prev.refs_count + 1 {
        return Err(BlockError::RefsCount);
    }
    Ok(())
}

/// Checks the block's predicate arguments against `predicate`.
///
/// Arguments pair positionally with the predicate's pubkeys; an empty byte
/// string counts as "no signature provided". Valid signatures must reach
/// the quorum.
pub fn block_sig(b: &Block, predicate: &Predicate) -> Result<(), BlockError> {
    if predicate.version != 1 {
        return Err(BlockError::BadPredicate);
    }
    if predicate.quorum < 0 || predicate.quorum as usize > predicate.pubkeys.len() {
        return Err(BlockError::BadPredicate);
    }
    if b.arguments.len() != predicate.pubkeys.len() {
        return Err(BlockError::BadArguments);
    }

    let hash = b.hash();
    let mut sig_count: i32 = 0;

    for (pubkey, argument) in predicate.pubkeys.iter().zip(&b.arguments) {
        if pubkey.len() != PUBLIC_KEY_LEN {
            return Err(BlockError::BadPredicate);
        }
        let sig = match argument {
            DataItem::Bytes(sig) => sig,
            _ => return Err(BlockError::BadArguments),
        };
        if sig.is_empty() {
            continue;
        }
        if sig.len() != SIGNATURE_LEN {
            return Err(BlockError::BadArguments);
        }
        if !key_pair::verify(pubkey, hash.as_slice(), sig) {
            return Err(BlockError::BadArguments);
        }
        sig_count += 1;
    }

    if sig_count < predicate.quorum {
        return Err(BlockError::TooFewSignatures);
    }
    Ok(())
}

//! The chain state snapshot: header plus the two authenticated trees.
//!
//! A snapshot tracks the unspent contracts (UTXO set) and the live issuance
//! nonces as Patricia trees, keyed by contract ID and nonce commitment
//! respectively. It is created empty, mutated only by [`Snapshot::apply_block`]
//! and [`Snapshot::apply_tx`], and deep-copied (cheaply, the trees share
//! structure) when a caller needs to speculate.
//!
//! Transaction application is atomic: a failing transaction leaves both
//! tree roots byte-identical to their pre-call values. This falls out of
//! the persistent trees - mutations are staged on clones and committed only
//! on success.

use crate::core::block::{BlockHeader, UnsignedBlock};
use crate::core::transaction::{CommitmentsTx, Tx};
use crate::types::hash::Hash;
use crate::types::patricia::{Tree, TreeError};
use std::collections::BTreeMap;
use txvm_derive::Error;

/// Errors from state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The snapshot has no header yet and the operation requires one.
    #[error("state is uninitialized")]
    Uninitialized,
    /// A transaction spent an output that is not in the contracts tree.
    #[error("missing output {0}")]
    MissingOutput(Hash),
    /// A transaction created an output that already exists.
    #[error("duplicate output {0}")]
    DuplicateOutput(Hash),
    /// A nonce commitment is already in the nonce tree.
    #[error("duplicate nonce {0}")]
    DuplicateNonce(Hash),
    /// A nonce is anchored to a block other than the initial block.
    #[error("nonce anchored to unknown block {0}")]
    NonceBlockId(Hash),
    /// A transaction's time range excludes the block timestamp.
    #[error("block time {block_ms} outside transaction range {min_ms}..{max_ms}")]
    OutsideTimerange {
        min_ms: i64,
        max_ms: i64,
        block_ms: u64,
    },
    /// Applied block height does not extend the snapshot.
    #[error("cannot apply block at height {got}, state is at {have}")]
    BadHeight { have: u64, got: u64 },
    /// Applied block has a lower version than the snapshot.
    #[error("block version {got} below state version {have}")]
    VersionRegression { have: u64, got: u64 },
    /// Applied block does not advance the timestamp.
    #[error("block time {got} not after state time {have}")]
    BadTimestamp { have: u64, got: u64 },
    /// Tree invariant violation (prefix keys); unreachable with 256-bit keys.
    #[error("tree error: {0}")]
    Tree(TreeError),
}

impl From<TreeError> for StateError {
    fn from(err: TreeError) -> StateError {
        StateError::Tree(err)
    }
}

/// Computes the nonce-tree key committing to a nonce and its expiration.
pub fn nonce_commitment(id: Hash, exp_ms: u64) -> Hash {
    Hash::sha3()
        .chain(id.as_slice())
        .chain(&exp_ms.to_le_bytes())
        .finalize()
}

/// Rolling chain state.
///
/// Cloning produces an independent snapshot that shares tree structure with
/// the original until either side mutates.
#[derive(Clone, Default, Debug)]
pub struct Snapshot {
    /// The last applied block header; `None` until block 1 lands.
    pub header: Option<BlockHeader>,
    /// Patricia tree over unspent contract IDs.
    pub contracts_tree: Tree,
    /// Patricia tree over nonce commitments.
    pub nonce_tree: Tree,
    /// The initial block's ID, the only valid non-zero nonce anchor.
    initial_block_id: Option<Hash>,
    /// Commitment to expiration index; the tree stores opaque commitments,
    /// so pruning needs this side table. It is part of the in-memory state
    /// but not covered by the nonce root.
    nonce_expirations: BTreeMap<Hash, u64>,
}

impl Snapshot {
    /// Creates an empty, uninitialized snapshot.
    pub fn empty() -> Snapshot {
        Snapshot::default()
    }

    /// Height of the last applied block, or 0 if uninitialized.
    pub fn height(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.height)
    }

    /// Timestamp of the last applied block, or 0 if uninitialized.
    pub fn timestamp_ms(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.timestamp_ms)
    }

    /// Version of the last applied block, or 0 if uninitialized.
    pub fn version(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.version)
    }

    /// The initial block's ID, once known.
    pub fn initial_block_id(&self) -> Option<Hash> {
        self.initial_block_id
    }

    /// Applies a validated transaction, atomically.
    pub fn apply_tx(&mut self, tx: &CommitmentsTx) -> Result<(), StateError> {
        self.apply_tx_raw(&tx.tx)
    }

    /// Applies a validated transaction given without its commitment wrapper.
    pub fn apply_tx_raw(&mut self, tx: &Tx) -> Result<(), StateError> {
        if self.header.is_none() {
            return Err(StateError::Uninitialized);
        }

        // Stage on clones; the trees are persistent, so this costs one
        // pointer copy until a mutation diverges them.
        let mut contracts = self.contracts_tree.clone();
        let mut nonces = self.nonce_tree.clone();
        let mut expirations = self.nonce_expirations.clone();

        for action in &tx.contracts {
            match action {
                crate::virtual_machine::vm::ContractAction::Input(id) => {
                    if !contracts.delete(id.as_slice()) {
                        return Err(StateError::MissingOutput(*id));
                    }
                }
                crate::virtual_machine::vm::ContractAction::Output(id) => {
                    if !contracts.insert(id.as_slice())? {
                        return Err(StateError::DuplicateOutput(*id));
                    }
                }
            }
        }

        for nonce in &tx.nonces {
            if nonce.block_id != Hash::zero() && Some(nonce.block_id) != self.initial_block_id {
                return Err(StateError::NonceBlockId(nonce.block_id));
            }
            let commitment = nonce_commitment(nonce.id, nonce.exp_ms);
            if !nonces.insert(commitment.as_slice())? {
                return Err(StateError::DuplicateNonce(nonce.id));
            }
            expirations.insert(commitment, nonce.exp_ms);
        }

        self.contracts_tree = contracts;
        self.nonce_tree = nonces;
        self.nonce_expirations = expirations;
        Ok(())
    }

    /// Applies a block: prunes expired nonces, applies every transaction,
    /// and installs the new header.
    pub fn apply_block(&mut self, block: &UnsignedBlock) -> Result<(), StateError> {
        match &self.header {
            None => {
                if block.header.height != 1 {
                    return Err(StateError::BadHeight {
                        have: 0,
                        got: block.header.height,
                    });
                }
            }
            Some(header) => {
                if block.header.height != header.height + 1 {
                    return Err(StateError::BadHeight {
                        have: header.height,
                        got: block.header.height,
                    });
                }
                if block.header.version < header.version {
                    return Err(StateError::VersionRegression {
                        have: header.version,
                        got: block.header.version,
                    });
                }
                if block.header.timestamp_ms <= header.timestamp_ms {
                    return Err(StateError::BadTimestamp {
                        have: header.timestamp_ms,
                        got: block.header.timestamp_ms,
                    });
                }
            }
        }

        self.prune_nonces(block.header.timestamp_ms);

        for tx in &block.transactions {
            check_tx_timeranges(tx, block.header.timestamp_ms)?;
            self.apply_tx_raw(tx)?;
        }

        self.apply_block_header(&block.header);
        Ok(())
    }

    /// Installs `header` as the snapshot's tip, recording the initial block
    /// ID on first application.
    pub fn apply_block_header(&mut self, header: &BlockHeader) {
        if header.height == 1 {
            self.initial_block_id = Some(header.hash());
        }
        self.header = Some(header.clone());
    }

    /// Deletes every nonce whose expiration is at or before `timestamp_ms`.
    pub fn prune_nonces(&mut self, timestamp_ms: u64) {
        let expired: Vec<Hash> = self
            .nonce_expirations
            .iter()
            .filter(|(_, &exp)| exp <= timestamp_ms)
            .map(|(&commitment, _)| commitment)
            .collect();
        for commitment in expired {
            self.nonce_tree.delete(commitment.as_slice());
            self.nonce_expirations.remove(&commitment);
        }
    }
}

/// Rejects a transaction whose time ranges exclude the block timestamp.
fn check_tx_timeranges(tx: &Tx, block_ms: u64) -> Result<(), StateError> {
    for tr in &tx.timeranges {
        let too_late = tr.max_ms > 0 && block_ms > tr.max_ms as u64;
        let too_early = tr.min_ms > 0 && block_ms < tr.min_ms as u64;
        if too_late || too_early {
            return Err(StateError::OutsideTimerange {
                min_ms: tr.min_ms,
                max_ms: tr.max_ms,
                block_ms,
            });
        }
    }
    Ok(())
}

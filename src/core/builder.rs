//! Candidate-block assembly.
//!
//! A [`BlockBuilder`] speculatively applies admitted transactions to a
//! working copy of the starting snapshot, so a rejected transaction (bad
//! time window, runlimit overflow, double spend) leaves the builder intact
//! and the next candidate can still be tried.

use crate::core::block::{BlockHeader, UnsignedBlock};
use crate::core::state::{Snapshot, StateError};
use crate::core::transaction::CommitmentsTx;
use crate::types::merkle_tree;
use txvm_derive::Error;

/// Default cap on transactions per block.
pub const MAX_BLOCK_TXS: usize = 10_000;
/// Default nonce window: a day, in milliseconds.
pub const MAX_NONCE_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;
/// Default bound on refs_count growth.
pub const MAX_BLOCK_WINDOW: i64 = 600;

/// Errors from block building.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// `add_tx`/`build` before `start`.
    #[error("builder is not started")]
    NotStarted,
    /// Block timestamp does not advance past the snapshot's.
    #[error("timestamp {got} is not greater than previous timestamp {prev}")]
    BadTimestamp { prev: u64, got: u64 },
    /// The block already holds the maximum number of transactions.
    #[error("block is full")]
    BlockFull,
    /// A transaction's time range excludes the block timestamp.
    #[error("transaction time range {min_ms}..{max_ms} excludes block time {block_ms}")]
    OutsideTimerange {
        min_ms: i64,
        max_ms: i64,
        block_ms: u64,
    },
    /// A nonce expires beyond the network's nonce window.
    #[error("nonce expiration exceeds the nonce window")]
    NonceWindow,
    /// Accumulated runlimit would overflow.
    #[error("block runlimit overflow")]
    RunlimitOverflow,
    /// The transaction failed to apply (double spend, duplicate nonce...).
    #[error("{0}")]
    State(StateError),
}

impl From<StateError> for BuildError {
    fn from(err: StateError) -> BuildError {
        BuildError::State(err)
    }
}

/// Assembles an unsigned candidate block, one admitted transaction at a
/// time.
pub struct BlockBuilder {
    /// Version for produced headers.
    pub version: u64,
    /// Max distance between a nonce expiration and the block time; 0
    /// disables the check.
    pub max_nonce_window_ms: u64,
    /// Cap on refs_count growth in produced headers.
    pub max_block_window: i64,
    /// Cap on transactions per block.
    pub max_block_txs: usize,

    snapshot: Option<Snapshot>,
    txs: Vec<CommitmentsTx>,
    timestamp_ms: u64,
    runlimit: i64,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder {
            version: crate::core::block::BLOCK_VERSION,
            max_nonce_window_ms: MAX_NONCE_WINDOW_MS,
            max_block_window: MAX_BLOCK_WINDOW,
            max_block_txs: MAX_BLOCK_TXS,
            snapshot: None,
            txs: Vec::new(),
            timestamp_ms: 0,
            runlimit: 0,
        }
    }

    /// Begins a block at `timestamp_ms` on top of `snapshot`.
    ///
    /// The builder works on a deep copy; the given snapshot is untouched.
    pub fn start(&mut self, snapshot: &Snapshot, timestamp_ms: u64) -> Result<(), BuildError> {
        if timestamp_ms <= snapshot.timestamp_ms() {
            return Err(BuildError::BadTimestamp {
                prev: snapshot.timestamp_ms(),
                got: timestamp_ms,
            });
        }
        let mut working = snapshot.clone();
        working.prune_nonces(timestamp_ms);
        self.snapshot = Some(working);
        self.timestamp_ms = timestamp_ms;
        self.txs = Vec::new();
        self.runlimit = 0;
        Ok(())
    }

    /// Admits one transaction, or rejects it without disturbing the
    /// builder's snapshot.
    pub fn add_tx(&mut self, tx: CommitmentsTx) -> Result<(), BuildError> {
        let snapshot = self.snapshot.as_mut().ok_or(BuildError::NotStarted)?;

        if self.txs.len() >= self.max_block_txs {
            return Err(BuildError::BlockFull);
        }

        for tr in &tx.tx.timeranges {
            let too_late = tr.max_ms > 0 && self.timestamp_ms > tr.max_ms as u64;
            let too_early = tr.min_ms > 0 && self.timestamp_ms < tr.min_ms as u64;
            if too_late || too_early {
                return Err(BuildError::OutsideTimerange {
                    min_ms: tr.min_ms,
                    max_ms: tr.max_ms,
                    block_ms: self.timestamp_ms,
                });
            }
        }

        // A zero window disables the check.
        if self.max_nonce_window_ms > 0 {
            for nonce in &tx.tx.nonces {
                if nonce.exp_ms > self.timestamp_ms + self.max_nonce_window_ms {
                    return Err(BuildError::NonceWindow);
                }
            }
        }

        let runlimit = self
            .runlimit
            .checked_add(tx.tx.runlimit)
            .ok_or(BuildError::RunlimitOverflow)?;

        snapshot.apply_tx(&tx)?;

        self.runlimit = runlimit;
        self.txs.push(tx);
        Ok(())
    }

    /// Produces the unsigned block and the snapshot with it applied,
    /// clearing the builder.
    pub fn build(&mut self) -> Result<(UnsignedBlock, Snapshot), BuildError> {
        let mut snapshot = self.snapshot.take().ok_or(BuildError::NotStarted)?;
        let prev = snapshot.header.clone().ok_or(BuildError::NotStarted)?;

        let refs_count = self.max_block_window.min(prev.refs_count + 1);

        let commitments: Vec<[u8; 32]> =
            self.txs.iter().map(|tx| tx.witness_commitment).collect();

        let header = BlockHeader {
            version: self.version,
            height: prev.height + 1,
            previous_block_id: prev.hash(),
            timestamp_ms: self.timestamp_ms,
            runlimit: self.runlimit,
            refs_count,
            transactions_root: merkle_tree::root(&commitments),
            contracts_root: snapshot.contracts_tree.root_hash(),
            nonces_root: snapshot.nonce_tree.root_hash(),
            next_predicate: prev.next_predicate.clone(),
            extra_fields: Vec::new(),
        };

        snapshot.apply_block_header(&header);

        let transactions = std::mem::take(&mut self.txs)
            .into_iter()
            .map(|c| c.tx)
            .collect();
        self.timestamp_ms = 0;
        self.runlimit = 0;

        Ok((
            UnsignedBlock {
                header,
                transactions,
            },
            snapshot,
        ))
    }
}

impl Default for BlockBuilder {
    fn default() -> BlockBuilder {
        BlockBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::Tx;
    use crate::core::validation;
    use crate::utils::test_utils::{empty_tx_program_expiring, initial_block};

    fn initialized() -> Snapshot {
        let mut snap = Snapshot::empty();
        snap.apply_block(&initial_block().unsigned()).unwrap();
        snap
    }

    fn tx_expiring(salt: u8, exp_ms: i64) -> CommitmentsTx {
        CommitmentsTx::new(Tx::new(&empty_tx_program_expiring(salt, exp_ms), 3, 2000).unwrap())
    }

    #[test]
    fn start_requires_advancing_timestamp() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        assert!(matches!(
            builder.start(&snap, snap.timestamp_ms()),
            Err(BuildError::BadTimestamp { .. })
        ));
        assert!(builder.start(&snap, snap.timestamp_ms() + 1).is_ok());
    }

    #[test]
    fn builds_a_valid_successor() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.start(&snap, 2000).unwrap();
        builder.add_tx(tx_expiring(1, 50_000)).unwrap();
        builder.add_tx(tx_expiring(2, 50_000)).unwrap();

        let (block, applied) = builder.build().unwrap();
        assert_eq!(block.header.height, 2);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.header.runlimit, 4000);
        assert_eq!(block.header.refs_count, 1);
        assert_eq!(
            block.header.contracts_root,
            applied.contracts_tree.root_hash()
        );
        assert_eq!(applied.height(), 2);

        // The produced block passes full validation against its parent.
        assert_eq!(
            validation::block(&block, snap.header.as_ref()),
            Ok(())
        );
    }

    #[test]
    fn rejected_tx_leaves_the_builder_usable() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.start(&snap, 2000).unwrap();

        let tx = tx_expiring(1, 50_000);
        builder.add_tx(tx.clone()).unwrap();
        // The same tx again is a duplicate nonce.
        assert!(matches!(
            builder.add_tx(tx),
            Err(BuildError::State(StateError::DuplicateNonce(_)))
        ));

        // The builder still produces a block with the first tx.
        builder.add_tx(tx_expiring(2, 50_000)).unwrap();
        let (block, _) = builder.build().unwrap();
        assert_eq!(block.transactions.len(), 2);
    }

    #[test]
    fn rejects_expired_timeranges() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.start(&snap, 60_000).unwrap();
        // The empty tx carries a timerange capped at its nonce expiration.
        assert!(matches!(
            builder.add_tx(tx_expiring(1, 50_000)),
            Err(BuildError::OutsideTimerange { .. })
        ));
    }

    #[test]
    fn rejects_nonces_beyond_the_window() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.max_nonce_window_ms = 1000;
        builder.start(&snap, 2000).unwrap();
        assert_eq!(
            builder.add_tx(tx_expiring(1, 50_000)).unwrap_err(),
            BuildError::NonceWindow
        );

        // Zero disables the window check entirely.
        let mut builder = BlockBuilder::new();
        builder.max_nonce_window_ms = 0;
        builder.start(&snap, 2000).unwrap();
        assert!(builder.add_tx(tx_expiring(1, 50_000)).is_ok());
    }

    #[test]
    fn enforces_the_tx_count_cap() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.max_block_txs = 1;
        builder.start(&snap, 2000).unwrap();
        builder.add_tx(tx_expiring(1, 50_000)).unwrap();
        assert_eq!(
            builder.add_tx(tx_expiring(2, 50_000)).unwrap_err(),
            BuildError::BlockFull
        );
    }

    #[test]
    fn refs_count_is_capped_by_the_block_window() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.max_block_window = 0;
        builder.start(&snap, 2000).unwrap();
        let (block, _) = builder.build().unwrap();
        assert_eq!(block.header.refs_count, 0);
    }

    #[test]
    fn build_clears_the_builder() {
        let snap = initialized();
        let mut builder = BlockBuilder::new();
        builder.start(&snap, 2000).unwrap();
        let _ = builder.build().unwrap();
        assert_eq!(builder.build().unwrap_err(), BuildError::NotStarted);
    }
}

//! The chain: committed state, block admission, and height notifications.
//!
//! A [`Chain`] owns the committed snapshot behind a read-write lock (readers
//! always see a consistent height/snapshot pair via the shared `Arc`),
//! serializes commits on a dedicated mutex, persists blocks through a
//! [`BlockStore`], and queues snapshots to a background task on a bounded
//! channel - if the queue is busy the snapshot is skipped with a warning
//! and a later commit retries.
//!
//! Commits are idempotent: re-committing an already-applied block succeeds
//! without re-applying, and duplicate applies racing from several threads
//! are deduplicated by height comparison under the commit mutex.

use crate::core::block::Block;
use crate::core::state::{Snapshot, StateError};
use crate::core::storage::{BlockStore, StoreError};
use crate::core::validation::{self, BlockError};
use crate::{error, info, warn};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use txvm_derive::Error;

/// Default number of transactions between persisted snapshots.
pub const TXS_PER_SNAPSHOT: u64 = 10_000;

/// Errors from chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Storage failure or block conflict.
    #[error("{0}")]
    Store(StoreError),
    /// The block failed stateless validation.
    #[error("{0}")]
    Validation(BlockError),
    /// The block failed to apply to the snapshot.
    #[error("{0}")]
    State(StateError),
    /// The computed contracts root disagrees with the block header.
    #[error("invalid contracts merkle root")]
    BadContractsRoot,
    /// The computed nonces root disagrees with the block header.
    #[error("invalid nonces merkle root")]
    BadNoncesRoot,
    /// A nonce expires beyond the network's nonce window.
    #[error("nonce expiring at {exp_ms} exceeds the window after block time {block_time_ms}")]
    NonceWindow { exp_ms: u64, block_time_ms: u64 },
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> ChainError {
        ChainError::Store(err)
    }
}

impl From<BlockError> for ChainError {
    fn from(err: BlockError) -> ChainError {
        ChainError::Validation(err)
    }
}

impl From<StateError> for ChainError {
    fn from(err: StateError) -> ChainError {
        ChainError::State(err)
    }
}

/// The committed chain.
pub struct Chain<S: BlockStore> {
    /// Max distance between a nonce expiration and the block time; 0
    /// disables the check.
    pub max_nonce_window_ms: u64,
    /// Cap on refs_count growth.
    pub max_block_window: i64,
    /// Snapshot persistence cadence, in transactions; 0 persists after
    /// every commit.
    pub txs_per_snapshot: u64,

    store: Arc<S>,
    initial_block: Block,

    current: RwLock<Arc<Snapshot>>,
    commit_lock: Mutex<()>,
    waiters: DashMap<u64, Vec<oneshot::Sender<()>>>,
    snapshot_queue: mpsc::Sender<Snapshot>,
    txs_since_snapshot: Mutex<u64>,
}

impl<S: BlockStore> Chain<S> {
    /// Creates a chain over `store`, spawning the snapshot-persistence
    /// task. The store is shared so that a later chain instance (after a
    /// restart) can recover from it. Must be called within a tokio runtime.
    pub fn new(initial_block: Block, store: Arc<S>) -> Chain<S> {
        // Bounded queue: persistence lags commits by at most one snapshot;
        // a busy queue drops the snapshot and a later commit retries.
        let (snapshot_queue, mut rx) = mpsc::channel::<Snapshot>(1);
        let persist_store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let height = snapshot.height();
                if let Err(err) = persist_store.save_snapshot(snapshot) {
                    error!("failed to persist snapshot at height {}: {}", height, err);
                }
            }
        });

        Chain {
            max_nonce_window_ms: crate::core::builder::MAX_NONCE_WINDOW_MS,
            max_block_window: crate::core::builder::MAX_BLOCK_WINDOW,
            txs_per_snapshot: TXS_PER_SNAPSHOT,
            store,
            initial_block,
            current: RwLock::new(Arc::new(Snapshot::empty())),
            commit_lock: Mutex::new(()),
            waiters: DashMap::new(),
            snapshot_queue,
            txs_since_snapshot: Mutex::new(0),
        }
    }

    /// The current committed snapshot.
    pub fn state(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().expect("lock"))
    }

    /// The current committed height.
    pub fn height(&self) -> u64 {
        self.state().height()
    }

    /// The chain's initial block.
    pub fn initial_block(&self) -> &Block {
        &self.initial_block
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Fetches a committed block by height.
    pub fn get_block(&self, height: u64) -> Result<Block, ChainError> {
        Ok(self.store.get_block(height)?)
    }

    /// Validates `block` against the current state, applies it, persists
    /// it, and publishes the new height. Idempotent.
    pub fn commit_block(&self, block: Block) -> Result<(), ChainError> {
        self.store.save_block(block.clone())?;

        let _guard = self.commit_lock.lock().expect("lock");
        let current = self.state();
        // Already applied: save_block would have errored had the stored
        // block differed, so this is the same block.
        if block.header.height <= current.height() {
            return Ok(());
        }

        let unsigned = block.unsigned();
        validation::block(&unsigned, current.header.as_ref())?;

        let mut snapshot = (*current).clone();
        snapshot.apply_block(&unsigned)?;
        if block.header.contracts_root != snapshot.contracts_tree.root_hash() {
            return Err(ChainError::BadContractsRoot);
        }
        if block.header.nonces_root != snapshot.nonce_tree.root_hash() {
            return Err(ChainError::BadNoncesRoot);
        }

        self.finalize_commit(block.transactions.len() as u64, snapshot)
    }

    /// Like [`commit_block`](Self::commit_block) but takes a snapshot the
    /// caller already applied, trusting it. Used by the local generator to
    /// avoid re-applying what the builder just built.
    pub fn commit_applied_block(
        &self,
        block: Block,
        snapshot: Snapshot,
    ) -> Result<(), ChainError> {
        self.store.save_block(block.clone())?;

        let _guard = self.commit_lock.lock().expect("lock");
        if block.header.height <= self.height() {
            return Ok(());
        }
        self.finalize_commit(block.transactions.len() as u64, snapshot)
    }

    /// On startup: load the latest persisted snapshot and replay any stored
    /// blocks above it, publishing the result as the current state.
    pub fn recover(&self) -> Result<Arc<Snapshot>, ChainError> {
        let _guard = self.commit_lock.lock().expect("lock");

        let mut snapshot = self.store.latest_snapshot()?;
        if snapshot.height() == 0 {
            snapshot = Snapshot::empty();
            snapshot.apply_block(&self.initial_block.unsigned())?;
        }
        let store_height = self.store.height()?;
        for height in snapshot.height() + 1..=store_height {
            let block = self.store.get_block(height)?;
            snapshot.apply_block(&block.unsigned())?;
        }

        let height = snapshot.height();
        let snapshot = Arc::new(snapshot);
        *self.current.write().expect("lock") = Arc::clone(&snapshot);
        self.publish(height);
        info!("recovered chain state at height {}", height);
        Ok(snapshot)
    }

    /// Checks that every nonce in `tx` expires within the chain's nonce
    /// window of `block_time_ms`. A zero window disables the check.
    pub fn check_nonce_window(
        &self,
        tx: &crate::core::transaction::Tx,
        block_time_ms: u64,
    ) -> Result<(), ChainError> {
        if self.max_nonce_window_ms == 0 {
            return Ok(());
        }
        for nonce in &tx.nonces {
            if nonce.exp_ms > block_time_ms + self.max_nonce_window_ms {
                return Err(ChainError::NonceWindow {
                    exp_ms: nonce.exp_ms,
                    block_time_ms,
                });
            }
        }
        Ok(())
    }

    /// Returns a one-shot notifier resolving when the chain reaches
    /// `height` or later. Dropping the receiver detaches the waiter.
    pub fn block_waiter(&self, height: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.height() >= height {
            let _ = tx.send(());
            return rx;
        }
        self.waiters.entry(height).or_default().push(tx);
        // The height may have advanced between the check and the insert;
        // republish so no waiter is stranded.
        let now = self.height();
        if now >= height {
            self.publish(now);
        }
        rx
    }

    fn finalize_commit(&self, tx_count: u64, snapshot: Snapshot) -> Result<(), ChainError> {
        self.maybe_queue_snapshot(tx_count, &snapshot);

        let height = snapshot.height();
        *self.current.write().expect("lock") = Arc::new(snapshot);
        self.publish(height);
        info!(
            "committed block at height {} ({} transactions)",
            height, tx_count
        );

        self.store.finalize_height(height)?;
        Ok(())
    }

    /// Queues the snapshot for persistence at the configured transaction
    /// cadence. A full queue skips the snapshot with a warning; the counter
    /// keeps accumulating so the next commit retries.
    fn maybe_queue_snapshot(&self, tx_count: u64, snapshot: &Snapshot) {
        let mut counter = self.txs_since_snapshot.lock().expect("lock");
        *counter += tx_count;
        if self.txs_per_snapshot > 0 && *counter < self.txs_per_snapshot {
            return;
        }
        match self.snapshot_queue.try_send(snapshot.clone()) {
            Ok(()) => *counter = 0,
            Err(_) => {
                warn!(
                    "snapshot queue is busy; skipping snapshot at height {}",
                    snapshot.height()
                );
            }
        }
    }

    /// Fires every waiter at or below `height`.
    fn publish(&self, height: u64) {
        let ready: Vec<u64> = self
            .waiters
            .iter()
            .map(|entry| *entry.key())
            .filter(|&h| h <= height)
            .collect();
        for h in ready {
            if let Some((_, senders)) = self.waiters.remove(&h) {
                for sender in senders {
                    let _ = sender.send(());
                }
            }
        }
    }
}

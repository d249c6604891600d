//! Block and snapshot persistence interface.
//!
//! The core only sees this trait; database bindings live with the caller.
//! Implementations must be thread-safe, and may block on disk.

use crate::core::block::Block;
use crate::core::state::Snapshot;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::Mutex;
use txvm_derive::Error;

/// Errors from storage backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No block at the requested height.
    #[error("no block at height {0}")]
    MissingBlock(u64),
    /// A different block already exists at this height.
    #[error("conflicting block at height {height}: have {have}, got {got}")]
    Conflict { height: u64, have: Hash, got: Hash },
    /// Backend failure.
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Persistent storage for blocks and state snapshots.
pub trait BlockStore: Send + Sync + 'static {
    /// The highest stored block height; 0 when empty.
    fn height(&self) -> Result<u64, StoreError>;

    /// Persists a block.
    ///
    /// Saving the same block at the same height twice is a no-op; a
    /// *different* block at an occupied height is a [`StoreError::Conflict`].
    fn save_block(&self, block: Block) -> Result<(), StoreError>;

    /// Persists a state snapshot.
    fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Fetches the block at `height`.
    fn get_block(&self, height: u64) -> Result<Block, StoreError>;

    /// Returns the most recently saved snapshot, or an empty one.
    fn latest_snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Notifies the backend that the chain reached `height`.
    fn finalize_height(&self, height: u64) -> Result<(), StoreError>;
}

/// In-memory [`BlockStore`], used by tests and local generators.
#[derive(Default)]
pub struct MemStore {
    blocks: Mutex<HashMap<u64, Block>>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl BlockStore for MemStore {
    fn height(&self) -> Result<u64, StoreError> {
        let blocks = self.blocks.lock().expect("lock");
        Ok(blocks.keys().copied().max().unwrap_or(0))
    }

    fn save_block(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.lock().expect("lock");
        let height = block.header.height;
        if let Some(existing) = blocks.get(&height) {
            if existing.hash() != block.hash() {
                return Err(StoreError::Conflict {
                    height,
                    have: existing.hash(),
                    got: block.hash(),
                });
            }
            return Ok(());
        }
        blocks.insert(height, block);
        Ok(())
    }

    fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        *self.snapshot.lock().expect("lock") = Some(snapshot);
        Ok(())
    }

    fn get_block(&self, height: u64) -> Result<Block, StoreError> {
        let blocks = self.blocks.lock().expect("lock");
        blocks
            .get(&height)
            .cloned()
            .ok_or(StoreError::MissingBlock(height))
    }

    fn latest_snapshot(&self) -> Result<Snapshot, StoreError> {
        let snapshot = self.snapshot.lock().expect("lock");
        Ok(snapshot.clone().unwrap_or_else(Snapshot::empty))
    }

    fn finalize_height(&self, _height: u64) -> Result<(), StoreError> {
        Ok(())
    }
}

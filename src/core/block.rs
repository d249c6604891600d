//! Blocks, headers, and their wire format.
//!
//! A block is a header plus fully validated transactions plus the predicate
//! arguments (signatures) supplied by block signers. On the wire a block is
//! a [`RawBlock`]: the header, the raw transaction triples, and tagged
//! predicate arguments. Deserializing a block re-validates every
//! transaction program, in parallel, and requires each to be finalized.

use crate::core::transaction::{Tx, TxError};
use crate::crypto::key_pair::PrivateKey;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode};
use crate::types::hash::{vm_hash, Hash};
use crate::types::{merkle_tree, patricia};
use crate::virtual_machine::item::{Item, Tuple};
use txvm_derive::BinaryCodec;

/// Domain tag for block header IDs.
pub const BLOCK_HEADER_TAG: &[u8] = b"BlockHeader";

/// The block version produced by this implementation.
pub const BLOCK_VERSION: u64 = 3;

/// The multisig predicate that must be satisfied by the next block.
#[derive(Debug, Clone, PartialEq, Eq, Default, BinaryCodec)]
pub struct Predicate {
    pub version: u64,
    pub quorum: i32,
    pub pubkeys: Vec<Vec<u8>>,
}

/// Block header: chain position, commitments, and the forward predicate.
#[derive(Debug, Clone, PartialEq, Eq, Default, BinaryCodec)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub previous_block_id: Hash,
    pub timestamp_ms: u64,
    /// Total runlimit available to this block's transactions.
    pub runlimit: i64,
    /// How many recent block IDs are valid nonce anchors after this block.
    pub refs_count: i64,
    pub transactions_root: Hash,
    pub contracts_root: Hash,
    pub nonces_root: Hash,
    pub next_predicate: Predicate,
    /// Unknown trailing fields from future versions; must be empty at
    /// version 3.
    pub extra_fields: Vec<Vec<u8>>,
}

impl BlockHeader {
    /// Computes the block ID: the domain-tagged hash of the header rendered
    /// as a canonical VM tuple.
    pub fn hash(&self) -> Hash {
        let predicate = Item::Tuple(Tuple::new(vec![
            Item::Int(self.next_predicate.version as i64),
            Item::Int(self.next_predicate.quorum as i64),
            Item::Tuple(Tuple::new(
                self.next_predicate
                    .pubkeys
                    .iter()
                    .map(|pk| Item::Bytes(Bytes::new(pk.clone())))
                    .collect(),
            )),
        ]));
        let extra = Item::Tuple(Tuple::new(
            self.extra_fields
                .iter()
                .map(|f| Item::Bytes(Bytes::new(f.clone())))
                .collect(),
        ));
        let tuple = Item::Tuple(Tuple::new(vec![
            Item::Int(self.version as i64),
            Item::Int(self.height as i64),
            Item::Bytes(Bytes::from(self.previous_block_id.0)),
            Item::Int(self.timestamp_ms as i64),
            Item::Int(self.runlimit),
            Item::Int(self.refs_count),
            Item::Bytes(Bytes::from(self.transactions_root.0)),
            Item::Bytes(Bytes::from(self.contracts_root.0)),
            Item::Bytes(Bytes::from(self.nonces_root.0)),
            predicate,
            extra,
        ]));
        vm_hash(BLOCK_HEADER_TAG, &tuple.encoded())
    }
}

/// Transaction wire format: the three fields that define a transaction.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct RawTx {
    pub version: u64,
    pub runlimit: i64,
    pub program: Vec<u8>,
}

/// A tagged predicate argument, so heterogeneous signature material can
/// round-trip through the wire format.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub enum DataItem {
    Bytes(Vec<u8>),
    Int(i64),
    Tuple(Vec<DataItem>),
}

/// Block wire format.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct RawBlock {
    pub header: BlockHeader,
    pub transactions: Vec<RawTx>,
    pub arguments: Vec<DataItem>,
}

/// A block whose predicate arguments have not been supplied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedBlock {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

impl UnsignedBlock {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// A complete block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
    pub arguments: Vec<DataItem>,
}

/// Errors from block deserialization.
#[derive(Debug, txvm_derive::Error)]
pub enum BlockDecodeError {
    /// The byte string is not a well-formed raw block.
    #[error("malformed block: {0}")]
    Decode(DecodeError),
    /// A transaction program failed validation.
    #[error("invalid transaction at index {0}: {1}")]
    Tx(usize, TxError),
}

impl From<DecodeError> for BlockDecodeError {
    fn from(err: DecodeError) -> Self {
        BlockDecodeError::Decode(err)
    }
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Returns the unsigned view of this block.
    pub fn unsigned(&self) -> UnsignedBlock {
        UnsignedBlock {
            header: self.header.clone(),
            transactions: self.transactions.clone(),
        }
    }

    /// Serializes to the raw wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let raw = RawBlock {
            header: self.header.clone(),
            transactions: self
                .transactions
                .iter()
                .map(|tx| RawTx {
                    version: tx.version,
                    runlimit: tx.runlimit,
                    program: tx.program.to_vec(),
                })
                .collect(),
            arguments: self.arguments.clone(),
        };
        raw.to_bytes()
    }

    /// Parses and re-validates a block from its wire format.
    ///
    /// Each transaction program is validated independently on a scoped
    /// worker pool (there is no shared state until the snapshot applies
    /// them); the first error in transaction order is surfaced. Every
    /// transaction must be finalized.
    pub fn from_bytes(bytes: &[u8]) -> Result<Block, BlockDecodeError> {
        let raw = RawBlock::from_bytes(bytes)?;
        let transactions = validate_txs(&raw.transactions)?;
        Ok(Block {
            header: raw.header,
            transactions,
            arguments: raw.arguments,
        })
    }
}

/// Validates raw transactions in parallel, preserving order.
fn validate_txs(raw: &[RawTx]) -> Result<Vec<Tx>, BlockDecodeError> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(raw.len().max(1));

    let mut results: Vec<Option<Result<Tx, TxError>>> = Vec::new();
    results.resize_with(raw.len(), || None);

    if workers <= 1 || raw.len() <= 1 {
        for (i, rt) in raw.iter().enumerate() {
            results[i] = Some(Tx::new(&rt.program, rt.version, rt.runlimit));
        }
    } else {
        let chunk = raw.len().div_ceil(workers);
        std::thread::scope(|scope| {
            for (slot, work) in results.chunks_mut(chunk).zip(raw.chunks(chunk)) {
                scope.spawn(move || {
                    for (out, rt) in slot.iter_mut().zip(work) {
                        *out = Some(Tx::new(&rt.program, rt.version, rt.runlimit));
                    }
                });
            }
        });
    }

    let mut txs = Vec::with_capacity(raw.len());
    for (i, result) in results.into_iter().enumerate() {
        match result.expect("every slot is filled") {
            Ok(tx) if tx.finalized => txs.push(tx),
            Ok(_) => {
                return Err(BlockDecodeError::Tx(i, TxError::Unfinalized));
            }
            Err(err) => return Err(BlockDecodeError::Tx(i, err)),
        }
    }
    Ok(txs)
}

/// Computes the transactions root over the witness commitments.
pub fn tx_merkle_root(txs: &[Tx]) -> Hash {
    let commitments: Vec<[u8; 32]> = txs.iter().map(|tx| tx.witness_commitment()).collect();
    merkle_tree::root(&commitments)
}

/// Produces the first block of a new chain with the given signing predicate.
pub fn new_initial_block(pubkeys: Vec<Vec<u8>>, quorum: i32, timestamp_ms: u64) -> Block {
    let empty_tree_root = patricia::Tree::new().root_hash();
    Block {
        header: BlockHeader {
            version: BLOCK_VERSION,
            height: 1,
            previous_block_id: Hash::zero(),
            timestamp_ms,
            runlimit: 0,
            refs_count: 0,
            transactions_root: tx_merkle_root(&[]),
            contracts_root: empty_tree_root,
            nonces_root: empty_tree_root,
            next_predicate: Predicate {
                version: 1,
                quorum,
                pubkeys,
            },
            extra_fields: Vec::new(),
        },
        transactions: Vec::new(),
        arguments: Vec::new(),
    }
}

/// Attaches predicate arguments to an unsigned block.
///
/// `signers` pairs with the previous predicate's pubkeys; a `None` entry
/// contributes an empty argument, counting as "no signature provided".
pub fn sign_block(unsigned: UnsignedBlock, signers: &[Option<&PrivateKey>]) -> Block {
    let hash = unsigned.hash();
    let arguments = signers
        .iter()
        .map(|signer| match signer {
            Some(key) => DataItem::Bytes(key.sign(hash.as_slice()).to_vec()),
            None => DataItem::Bytes(Vec::new()),
        })
        .collect();
    Block {
        header: unsigned.header,
        transactions: unsigned.transactions,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{empty_tx_program, initial_header};

    #[test]
    fn header_hash_is_sensitive_to_every_field() {
        let base = initial_header();
        let mut variants = Vec::new();

        let mut h = base.clone();
        h.height = 2;
        variants.push(h);
        let mut h = base.clone();
        h.timestamp_ms += 1;
        variants.push(h);
        let mut h = base.clone();
        h.runlimit = 5;
        variants.push(h);
        let mut h = base.clone();
        h.next_predicate.quorum = 1;
        variants.push(h);
        let mut h = base.clone();
        h.extra_fields.push(vec![1]);
        variants.push(h);

        for variant in variants {
            assert_ne!(base.hash(), variant.hash());
        }
        assert_eq!(base.hash(), base.clone().hash());
    }

    #[test]
    fn raw_block_roundtrip() {
        let tx = Tx::new(&empty_tx_program(7), 3, 2000).unwrap();
        let block = Block {
            header: initial_header(),
            transactions: vec![tx],
            arguments: vec![
                DataItem::Bytes(vec![1, 2, 3]),
                DataItem::Int(-5),
                DataItem::Tuple(vec![DataItem::Bytes(vec![9])]),
            ],
        };

        let bytes = block.to_bytes();
        let decoded = Block::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn from_bytes_rejects_unfinalized_txs() {
        let raw = RawBlock {
            header: initial_header(),
            transactions: vec![RawTx {
                version: 3,
                runlimit: 1000,
                // Pushes a small int and drops it; never finalizes.
                program: vec![0x01, crate::virtual_machine::opcode::DROP],
            }],
            arguments: Vec::new(),
        };
        let err = Block::from_bytes(&raw.to_bytes()).unwrap_err();
        assert!(matches!(err, BlockDecodeError::Tx(0, TxError::Unfinalized)));
    }

    #[test]
    fn from_bytes_surfaces_the_first_faulting_tx() {
        let good = empty_tx_program(1);
        let raw = RawBlock {
            header: initial_header(),
            transactions: vec![
                RawTx {
                    version: 3,
                    runlimit: 2000,
                    program: good,
                },
                RawTx {
                    version: 3,
                    runlimit: 2000,
                    program: vec![crate::virtual_machine::opcode::ADD],
                },
            ],
            arguments: Vec::new(),
        };
        let err = Block::from_bytes(&raw.to_bytes()).unwrap_err();
        assert!(matches!(err, BlockDecodeError::Tx(1, _)));
    }

    #[test]
    fn initial_block_commits_to_empty_roots() {
        let block = new_initial_block(vec![vec![0u8; 32]], 1, 1000);
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.transactions_root, tx_merkle_root(&[]));
        assert_eq!(
            block.header.contracts_root,
            patricia::Tree::new().root_hash()
        );
        assert_eq!(block.header.next_predicate.quorum, 1);
    }

    #[test]
    fn sign_block_pairs_arguments_with_signers() {
        let key_a = PrivateKey::from_bytes(&[1u8; 32]);
        let key_c = PrivateKey::from_bytes(&[3u8; 32]);
        let unsigned = UnsignedBlock {
            header: initial_header(),
            transactions: Vec::new(),
        };
        let hash = unsigned.hash();

        let block = sign_block(unsigned, &[Some(&key_a), None, Some(&key_c)]);
        assert_eq!(block.arguments.len(), 3);
        assert_eq!(block.arguments[1], DataItem::Bytes(Vec::new()));
        match &block.arguments[0] {
            DataItem::Bytes(sig) => {
                assert!(key_a.public_key().verify(hash.as_slice(), sig));
            }
            other => panic!("unexpected argument {:?}", other),
        }
    }
}

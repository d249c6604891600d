//! Authenticated binary radix (Patricia) tree over bit-string keys.
//!
//! Keys are arbitrary byte strings treated as bit strings (most-significant
//! bit first); in practice the chain state always stores 256-bit hashes.
//! The root hash commits to the full key set with domain separation between
//! leaves and interior nodes:
//!
//! - leaf: `SHA3(0x00 ‖ key)`
//! - interior: `SHA3(0x01 ‖ hash(left) ‖ hash(right))`
//! - empty tree: `SHA3("")`
//!
//! Nodes are immutable and shared via `Arc`: inserting or deleting rebuilds
//! only the path from the root to the affected leaf, so cloning a tree is
//! O(1) and snapshots share structure until they diverge. Each node caches
//! its hash in a `OnceLock`; rebuilt paths start with an empty cache, which
//! gives the lazy re-hash behavior for free.

use crate::types::hash::Hash;
use std::sync::{Arc, OnceLock};
use txvm_derive::Error;

const LEAF_PREFIX: &[u8] = &[0x00];
const INTERIOR_PREFIX: &[u8] = &[0x01];

/// Errors produced by tree mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// One key is a strict prefix of another; the tree only supports
    /// prefix-free key sets (all keys are fixed-length in practice, so this
    /// is a safeguard against misuse).
    #[error("key is a prefix of an existing key (or vice versa)")]
    PrefixCollision,
}

enum Node {
    Leaf {
        key: Vec<u8>,
        hash: OnceLock<Hash>,
    },
    Interior {
        /// Index of the bit that discriminates the two children. All keys in
        /// this subtree agree on every bit position below `keybit`.
        keybit: usize,
        /// `children[0]` holds keys with a 0 at `keybit`.
        children: [Arc<Node>; 2],
        hash: OnceLock<Hash>,
    },
}

impl Node {
    fn leaf(key: Vec<u8>) -> Arc<Node> {
        Arc::new(Node::Leaf {
            key,
            hash: OnceLock::new(),
        })
    }

    fn interior(keybit: usize, children: [Arc<Node>; 2]) -> Arc<Node> {
        Arc::new(Node::Interior {
            keybit,
            children,
            hash: OnceLock::new(),
        })
    }

    fn hash(&self) -> Hash {
        match self {
            Node::Leaf { key, hash } => *hash.get_or_init(|| {
                Hash::sha3().chain(LEAF_PREFIX).chain(key).finalize()
            }),
            Node::Interior { children, hash, .. } => *hash.get_or_init(|| {
                Hash::sha3()
                    .chain(INTERIOR_PREFIX)
                    .chain(children[0].hash().as_slice())
                    .chain(children[1].hash().as_slice())
                    .finalize()
            }),
        }
    }
}

/// Returns bit `i` of `key` (0 or 1), MSB first. Out-of-range bits read as 0.
fn bit(key: &[u8], i: usize) -> usize {
    let byte = i / 8;
    if byte >= key.len() {
        return 0;
    }
    ((key[byte] >> (7 - i % 8)) & 1) as usize
}

fn bitlen(key: &[u8]) -> usize {
    key.len() * 8
}

/// Outcome of comparing a candidate key against a resident key.
enum Diff {
    Equal,
    Prefix,
    /// First differing bit index.
    At(usize),
}

fn first_diff(a: &[u8], b: &[u8]) -> Diff {
    let min_bits = bitlen(a).min(bitlen(b));
    for i in 0..min_bits {
        if bit(a, i) != bit(b, i) {
            return Diff::At(i);
        }
    }
    if bitlen(a) == bitlen(b) {
        Diff::Equal
    } else {
        Diff::Prefix
    }
}

/// Authenticated binary radix tree.
///
/// Cloning is cheap; clones share structure copy-on-write.
#[derive(Clone, Default)]
pub struct Tree {
    root: Option<Arc<Node>>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root_hash", &self.root_hash())
            .finish()
    }
}

impl Tree {
    /// Creates an empty tree.
    pub fn new() -> Tree {
        Tree { root: None }
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the authenticated root hash.
    ///
    /// Hashes are computed lazily and cached per node, so repeated calls
    /// after a mutation only re-hash the rebuilt path.
    pub fn root_hash(&self) -> Hash {
        match &self.root {
            None => Hash::sha3().finalize(),
            Some(node) => node.hash(),
        }
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        let mut node = match &self.root {
            None => return false,
            Some(n) => n,
        };
        loop {
            match node.as_ref() {
                Node::Leaf { key: k, .. } => return k.as_slice() == key,
                Node::Interior {
                    keybit, children, ..
                } => {
                    if *keybit >= bitlen(key) {
                        return false;
                    }
                    node = &children[bit(key, *keybit)];
                }
            }
        }
    }

    /// Inserts `key`. Returns `Ok(true)` if the key was added, `Ok(false)`
    /// if it was already present, and an error if `key` is a strict prefix
    /// of a resident key (or vice versa).
    pub fn insert(&mut self, key: &[u8]) -> Result<bool, TreeError> {
        let root = match &self.root {
            None => {
                self.root = Some(Node::leaf(key.to_vec()));
                return Ok(true);
            }
            Some(r) => r,
        };

        // Phase one: route down to a representative leaf and find the
        // critical bit. All leaves below the insertion point share every bit
        // of the candidate key up to that point, so any representative works.
        let mut probe = root;
        let resident = loop {
            match probe.as_ref() {
                Node::Leaf { key: k, .. } => break k,
                Node::Interior {
                    keybit, children, ..
                } => probe = &children[bit(key, *keybit)],
            }
        };
        let crit = match first_diff(key, resident) {
            Diff::Equal => return Ok(false),
            Diff::Prefix => return Err(TreeError::PrefixCollision),
            Diff::At(i) => i,
        };

        // Phase two: rebuild the path from the root and splice an interior
        // node at the first position discriminated at or above `crit`.
        self.root = Some(splice(root, key, crit));
        Ok(true)
    }

    /// Deletes `key`. Returns true if the key was present. Deleting an
    /// absent key (including a strict prefix of resident keys) is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let root = match &self.root {
            None => return false,
            Some(r) => Arc::clone(r),
        };
        match remove(&root, key) {
            Removed::NotFound => false,
            Removed::Empty => {
                self.root = None;
                true
            }
            Removed::Subtree(node) => {
                self.root = Some(node);
                true
            }
        }
    }

    /// Visits every key in deterministic (bitwise) order.
    pub fn walk(&self, mut visit: impl FnMut(&[u8])) {
        fn rec(node: &Arc<Node>, visit: &mut impl FnMut(&[u8])) {
            match node.as_ref() {
                Node::Leaf { key, .. } => visit(key),
                Node::Interior { children, .. } => {
                    rec(&children[0], visit);
                    rec(&children[1], visit);
                }
            }
        }
        if let Some(root) = &self.root {
            rec(root, &mut visit);
        }
    }
}

/// Rebuilds the path through `node` for an insertion whose critical bit is
/// `crit`, returning the new subtree root.
fn splice(node: &Arc<Node>, key: &[u8], crit: usize) -> Arc<Node> {
    if let Node::Interior {
        keybit, children, ..
    } = node.as_ref()
    {
        if *keybit < crit {
            let dir = bit(key, *keybit);
            let mut rebuilt = [
                Arc::clone(&children[0]),
                Arc::clone(&children[1]),
            ];
            rebuilt[dir] = splice(&children[dir], key, crit);
            return Node::interior(*keybit, rebuilt);
        }
    }

    // Either a leaf or an interior discriminated at or past the critical
    // bit: the new branch point goes here.
    let new_leaf = Node::leaf(key.to_vec());
    let mut children = [Arc::clone(node), new_leaf];
    if bit(key, crit) == 0 {
        children.swap(0, 1);
    }
    Node::interior(crit, children)
}

enum Removed {
    NotFound,
    Empty,
    Subtree(Arc<Node>),
}

fn remove(node: &Arc<Node>, key: &[u8]) -> Removed {
    match node.as_ref() {
        Node::Leaf { key: k, .. } => {
            if k.as_slice() == key {
                Removed::Empty
            } else {
                Removed::NotFound
            }
        }
        Node::Interior {
            keybit, children, ..
        } => {
            if *keybit >= bitlen(key) {
                return Removed::NotFound;
            }
            let dir = bit(key, *keybit);
            match remove(&children[dir], key) {
                Removed::NotFound => Removed::NotFound,
                // A one-child interior node collapses into the sibling.
                Removed::Empty => Removed::Subtree(Arc::clone(&children[1 - dir])),
                Removed::Subtree(new_child) => {
                    let mut rebuilt = [
                        Arc::clone(&children[0]),
                        Arc::clone(&children[1]),
                    ];
                    rebuilt[dir] = new_child;
                    Removed::Subtree(Node::interior(*keybit, rebuilt))
                }
            }
        }
    }
}

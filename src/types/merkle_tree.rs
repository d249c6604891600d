//! Binary Merkle root over a list of byte strings.
//!
//! The tree is balanced by splitting at the largest power of two strictly
//! less than the item count, and leaves are domain-separated from interior
//! nodes. The strict split rule means lists of different lengths can never
//! share a root even when one is a duplicated extension of the other.

use crate::types::hash::Hash;

const LEAF_PREFIX: &[u8] = &[0x00];
const INTERIOR_PREFIX: &[u8] = &[0x01];

/// Computes the Merkle root of `items`.
///
/// - empty list: `SHA3("")`
/// - single item: `SHA3(0x00 ‖ item)`
/// - otherwise: `SHA3(0x01 ‖ root(left) ‖ root(right))` with the split at
///   the largest power of two strictly less than the item count
pub fn root<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => Hash::sha3().finalize(),
        1 => Hash::sha3()
            .chain(LEAF_PREFIX)
            .chain(items[0].as_ref())
            .finalize(),
        n => {
            let k = prev_power_of_two(n);
            let left = root(&items[..k]);
            let right = root(&items[k..]);
            Hash::sha3()
                .chain(INTERIOR_PREFIX)
                .chain(left.as_slice())
                .chain(right.as_slice())
                .finalize()
        }
    }
}

/// Returns the largest power of two strictly less than `n`.
///
/// For a power of two this is `n / 2`; the recursion depth of [`root`] is
/// therefore logarithmic in the item count.
fn prev_power_of_two(n: usize) -> usize {
    debug_assert!(n > 1);
    let p = n.next_power_of_two();
    if p == n {
        n / 2
    } else {
        p / 2
    }
}

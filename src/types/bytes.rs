//! Shared immutable byte strings.

use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte string.
///
/// VM byte strings, contract programs, seeds, and anchors all move through
/// this type; cloning a multi-kilobyte program onto a stack is a pointer
/// copy. Backed by `Arc<[u8]>`: there is no mutation path at all, which is
/// exactly the contract VM items require - an item pushed twice must stay
/// bitwise identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytes(Arc<[u8]>);

impl Bytes {
    /// Creates a new byte string from any owned byte source.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self::from_vec(data.into())
    }

    /// Creates a new byte string from an existing `Vec<u8>`.
    pub fn from_vec(v: Vec<u8>) -> Self {
        Bytes(v.into())
    }

    /// Returns the number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the byte string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Copies the contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Default for Bytes {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Bytes(Arc::from(s))
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Bytes(Arc::from(s.as_bytes()))
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(arr: [u8; N]) -> Self {
        Bytes(Arc::from(arr.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let a = Bytes::from("program bytes");
        let b = a.clone();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
        assert_eq!(a, b);
    }

    #[test]
    fn constructors_agree() {
        let from_vec = Bytes::from_vec(vec![1u8, 2, 3]);
        let from_slice = Bytes::from([1u8, 2, 3].as_slice());
        let from_array = Bytes::from([1u8, 2, 3]);
        assert_eq!(from_vec, from_slice);
        assert_eq!(from_vec, from_array);
    }

    #[test]
    fn default_is_empty() {
        assert!(Bytes::default().is_empty());
        assert_eq!(Bytes::default().len(), 0);
    }

    #[test]
    fn to_vec_copies_out() {
        let b = Bytes::from("abc");
        let v = b.to_vec();
        assert_eq!(v, b"abc");
        assert_ne!(v.as_ptr(), b.as_slice().as_ptr());
    }
}

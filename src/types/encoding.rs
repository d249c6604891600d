//! Binary encoding and decoding traits for deterministic serialization.
//!
//! This is the wire codec for blocks, headers, and raw transactions. (The
//! canonical VM item encoding of the transaction log lives in
//! [`crate::virtual_machine::item`]; it is a separate format with different
//! goals.) The primitive set is deliberately the subset those wire types
//! use, nothing more:
//!
//! - `u8`, `i32`, `i64`, `u64`: little-endian, fixed-width
//! - `usize`: encoded as `u64` (vector length prefixes)
//! - `Vec<T>`: length prefix followed by the elements
//! - `[T; N]`: elements in order, no length prefix (32-byte hashes)
//!
//! Structs and the predicate-argument enum derive their codecs with
//! `txvm_derive::BinaryCodec`, which composes these rules field by field.

use txvm_derive::Error;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers, so a header can be hashed
/// without first materializing its encoding.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    #[error("invalid value for target type")]
    InvalidValue,
    /// Length prefix exceeds maximum allowed size.
    #[error("length prefix exceeds maximum allowed size")]
    LengthOverflow,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Takes the next `n` bytes off the front of the input.
fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    let bytes = input.get(..n).ok_or(DecodeError::UnexpectedEof)?;
    *input = &input[n..];
    Ok(bytes)
}

// The fixed-width integers of the wire format, little-endian. `u8` rides
// the same path (its "endianness" is a one-byte array) and doubles as the
// enum tag codec.
macro_rules! le_int_codec {
    ($($t:ty),* $(,)?) => {$(
        impl Encode for $t {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                out.write(&self.to_le_bytes());
            }
        }

        impl Decode for $t {
            fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                let bytes = take(input, std::mem::size_of::<$t>())?;
                Ok(<$t>::from_le_bytes(bytes.try_into().expect("width checked")))
            }
        }
    )*};
}

le_int_codec!(u8, i32, i64, u64);

// usize is only ever a length prefix; on the wire it is a u64 so the
// format does not depend on the host word size.
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| DecodeError::LengthOverflow)
    }
}

/// Maximum allowed length for decoded vectors to prevent memory exhaustion.
const MAX_VEC_LEN: usize = 1_000_000;

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_VEC_LEN {
            return Err(DecodeError::LengthOverflow);
        }

        // The prefix is attacker-controlled; cap the preallocation.
        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

// Fixed-size arrays carry no length prefix; the type is the length.
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let items = (0..N)
            .map(|_| T::decode(input))
            .collect::<Result<Vec<T>, DecodeError>>()?;
        items.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        counter.write(&[1, 2, 3]);
        counter.write(&[4, 5]);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn to_bytes_preallocates_exact_capacity() {
        let data: Vec<u8> = vec![1, 2, 3, 4, 5];
        let bytes = data.to_bytes();
        // Vec encodes as: 8-byte length + elements
        assert_eq!(bytes.len(), 8 + 5);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    #[test]
    fn u64_roundtrip() {
        for val in [0u64, 1, u64::MAX / 2, u64::MAX] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 8);
            assert_eq!(u64::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn signed_ints_use_twos_complement() {
        let val: i64 = -1;
        let bytes = val.to_bytes();
        assert_eq!(bytes.as_slice(), &[0xFF; 8]);
        assert_eq!(i64::from_bytes(&bytes).unwrap(), val);

        let quorum: i32 = -2;
        assert_eq!(i32::from_bytes(&quorum.to_bytes()).unwrap(), quorum);
    }

    #[test]
    fn vec_encoding_format() {
        let vec: Vec<u8> = vec![0xAA, 0xBB, 0xCC];
        let bytes = vec.to_bytes();

        assert_eq!(&bytes[0..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn vec_length_overflow() {
        let huge_len: u64 = (MAX_VEC_LEN as u64) + 1;
        let bytes = huge_len.to_bytes();
        let result = Vec::<u8>::from_bytes(&bytes);
        assert!(matches!(result, Err(DecodeError::LengthOverflow)));
    }

    #[test]
    fn oversized_length_prefix_does_not_preallocate() {
        // A huge-but-legal length with no payload must fail cleanly.
        let bytes = (MAX_VEC_LEN as u64).to_bytes();
        let result = Vec::<u8>::from_bytes(&bytes);
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn array_no_length_prefix() {
        let arr: [u8; 4] = [1, 2, 3, 4];
        let bytes = arr.to_bytes();
        assert_eq!(bytes.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(<[u8; 4]>::from_bytes(&bytes).unwrap(), arr);
    }

    #[test]
    fn trailing_bytes_error() {
        let bytes = &[42u8, 0xFF, 0xFF];
        let result = u8::from_bytes(bytes);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn truncated_input_errors() {
        assert!(matches!(
            u64::from_bytes(&[0x12, 0x34]),
            Err(DecodeError::UnexpectedEof)
        ));
        assert!(matches!(
            <[u8; 4]>::from_bytes(&[1, 2]),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn decode_advances_input() {
        let mut input: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];

        let first = u8::decode(&mut input).unwrap();
        assert_eq!(first, 0x01);
        assert_eq!(input.len(), 8);

        let second = u64::decode(&mut input).unwrap();
        assert_eq!(second, u64::from_le_bytes([2, 3, 4, 5, 6, 7, 8, 9]));
        assert!(input.is_empty());
    }
}

//! The VM value domain: items, their canonical encoding, and the typed
//! "inspection" tuples used by `input` and output snapshots.
//!
//! Items come in five kinds. Int, Bytes, and Tuple are *data*: portable,
//! comparable, and serializable. Value and Contract are *resources*: they
//! cannot be duplicated and only leave a contract through the explicit
//! value-flow and control-flow opcodes. The distinction is enforced by the
//! VM's opcode handlers, not the type system, so the enum stays a plain
//! five-way variant.
//!
//! The canonical encoding of a data item is a program that, when executed,
//! pushes the item: small ints are their own opcode, larger ints are a
//! LEB128 pushdata followed by `int`, byte strings are pushdata, and tuples
//! are their encoded elements followed by the arity and `tuple`. Seeds, IDs,
//! the transaction log commitment, and `encode` all use this format.

use crate::types::bytes::Bytes;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::opcode;
use std::fmt;
use std::sync::Arc;

/// Typecode byte for Int in inspection tuples.
pub const INT_CODE: u8 = b'Z';
/// Typecode byte for Bytes.
pub const BYTES_CODE: u8 = b'S';
/// Typecode byte for Tuple.
pub const TUPLE_CODE: u8 = b'T';
/// Typecode byte for Value.
pub const VALUE_CODE: u8 = b'V';
/// Typecode byte for a plain contract.
pub const CONTRACT_CODE: u8 = b'C';
/// Typecode byte for a wrapped contract.
pub const WRAPPED_CODE: u8 = b'W';

/// An ordered, immutable sequence of items.
///
/// Shared via `Arc` so that log entries and nested tuples clone in O(1).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Tuple(Arc<Vec<Item>>);

impl Tuple {
    pub fn new(items: Vec<Item>) -> Tuple {
        Tuple(Arc::new(items))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Item> {
        self.0.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.0.iter()
    }
}

impl From<Vec<Item>> for Tuple {
    fn from(items: Vec<Item>) -> Tuple {
        Tuple::new(items)
    }
}

/// A quantity of some asset, carrying the anchor that makes it unique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value {
    pub amount: i64,
    pub asset_id: Bytes,
    pub anchor: Bytes,
}

impl Value {
    /// Returns true if this is a zero-amount anchor value.
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

/// Whether a contract can be re-entered with `call` or only reconstituted
/// through the snapshot with `input`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractKind {
    Plain,
    Wrapped,
}

impl ContractKind {
    pub fn typecode(self) -> u8 {
        match self {
            ContractKind::Plain => CONTRACT_CODE,
            ContractKind::Wrapped => WRAPPED_CODE,
        }
    }

    fn from_typecode(code: &[u8]) -> Option<ContractKind> {
        match code {
            [CONTRACT_CODE] => Some(ContractKind::Plain),
            [WRAPPED_CODE] => Some(ContractKind::Wrapped),
            _ => None,
        }
    }
}

/// A contract: a program, the seed identifying it, and its private stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractRecord {
    pub kind: ContractKind,
    pub seed: Bytes,
    pub program: Bytes,
    pub stack: Vec<Item>,
}

/// A single VM item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Int(i64),
    Bytes(Bytes),
    Tuple(Tuple),
    Value(Value),
    Contract(ContractRecord),
}

impl Item {
    /// Returns the human-readable kind name, used in fault dumps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Int(_) => "Int",
            Item::Bytes(_) => "Bytes",
            Item::Tuple(_) => "Tuple",
            Item::Value(_) => "Value",
            Item::Contract(_) => "Contract",
        }
    }

    /// Returns true for the portable, copyable item kinds.
    pub fn is_data(&self) -> bool {
        matches!(self, Item::Int(_) | Item::Bytes(_) | Item::Tuple(_))
    }

    /// Returns true if the item may be captured in an output snapshot.
    ///
    /// Data and Values are portable; a plain contract must be wrapped first.
    pub fn is_portable(&self) -> bool {
        match self {
            Item::Int(_) | Item::Bytes(_) | Item::Tuple(_) | Item::Value(_) => true,
            Item::Contract(c) => c.kind == ContractKind::Wrapped,
        }
    }

    /// Truthiness for `not`, `and`, `or`, `verify`, and `jumpif`: an Int is
    /// true iff nonzero; Bytes and Tuples are always true.
    pub fn is_true(&self) -> bool {
        match self {
            Item::Int(n) => *n != 0,
            _ => true,
        }
    }

    /// Writes the canonical encoding of the item.
    ///
    /// Resources encode as their inspection tuples; the VM's `encode` opcode
    /// only ever reaches the data arms.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Item::Int(n) => encode_int(*n, out),
            Item::Bytes(b) => write_pushdata(out, b),
            Item::Tuple(t) => {
                for item in t.iter() {
                    item.encode(out);
                }
                encode_int(t.len() as i64, out);
                out.push(opcode::TUPLE);
            }
            Item::Value(_) | Item::Contract(_) => self.inspect().encode(out),
        }
    }

    /// Returns the canonical encoding as a fresh byte string.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Length of the canonical encoding, used for copy charges.
    pub fn encoded_len(&self) -> usize {
        // Two small helpers would not beat just encoding; item copies are
        // charged before the copy, so the allocation is bounded by runlimit.
        self.encoded().len()
    }

    /// Returns the typed inspection tuple for this item.
    pub fn inspect(&self) -> Item {
        let fields = match self {
            Item::Int(n) => vec![Item::Bytes(Bytes::from([INT_CODE])), Item::Int(*n)],
            Item::Bytes(b) => vec![Item::Bytes(Bytes::from([BYTES_CODE])), Item::Bytes(b.clone())],
            Item::Tuple(t) => vec![
                Item::Bytes(Bytes::from([TUPLE_CODE])),
                Item::Tuple(t.clone()),
            ],
            Item::Value(v) => vec![
                Item::Bytes(Bytes::from([VALUE_CODE])),
                Item::Int(v.amount),
                Item::Bytes(v.asset_id.clone()),
                Item::Bytes(v.anchor.clone()),
            ],
            Item::Contract(c) => {
                let mut fields = vec![
                    Item::Bytes(Bytes::from([c.kind.typecode()])),
                    Item::Bytes(c.seed.clone()),
                    Item::Bytes(c.program.clone()),
                ];
                for item in &c.stack {
                    fields.push(item.inspect());
                }
                fields
            }
        };
        Item::Tuple(Tuple::new(fields))
    }
}

/// Parses a full contract inspection tuple, as consumed by `input`.
///
/// The expected shape is `{'C'|'W', seed, program, item*...}` where each
/// stack element is itself an inspection tuple. Any deviation is a `Fields`
/// fault.
pub fn contract_from_tuple(tuple: &Tuple) -> Result<ContractRecord, VmError> {
    if tuple.len() < 3 {
        return Err(VmError::Fields);
    }
    let kind = match tuple.get(0) {
        Some(Item::Bytes(code)) => {
            ContractKind::from_typecode(code.as_slice()).ok_or(VmError::Fields)?
        }
        _ => return Err(VmError::Fields),
    };
    let seed = match tuple.get(1) {
        Some(Item::Bytes(b)) => b.clone(),
        _ => return Err(VmError::Fields),
    };
    let program = match tuple.get(2) {
        Some(Item::Bytes(b)) => b.clone(),
        _ => return Err(VmError::Fields),
    };
    let mut stack = Vec::with_capacity(tuple.len() - 3);
    for item in tuple.iter().skip(3) {
        stack.push(item_from_inspected(item)?);
    }
    Ok(ContractRecord {
        kind,
        seed,
        program,
        stack,
    })
}

/// Parses one inspection tuple back into the item it describes.
fn item_from_inspected(item: &Item) -> Result<Item, VmError> {
    let tuple = match item {
        Item::Tuple(t) => t,
        _ => return Err(VmError::Fields),
    };
    let code = match tuple.get(0) {
        Some(Item::Bytes(code)) if code.len() == 1 => code[0],
        _ => return Err(VmError::Fields),
    };
    match code {
        INT_CODE => match (tuple.len(), tuple.get(1)) {
            (2, Some(Item::Int(n))) => Ok(Item::Int(*n)),
            _ => Err(VmError::Fields),
        },
        BYTES_CODE => match (tuple.len(), tuple.get(1)) {
            (2, Some(Item::Bytes(b))) => Ok(Item::Bytes(b.clone())),
            _ => Err(VmError::Fields),
        },
        TUPLE_CODE => match (tuple.len(), tuple.get(1)) {
            (2, Some(Item::Tuple(t))) => Ok(Item::Tuple(t.clone())),
            _ => Err(VmError::Fields),
        },
        VALUE_CODE => {
            if tuple.len() != 4 {
                return Err(VmError::Fields);
            }
            let amount = match tuple.get(1) {
                Some(Item::Int(n)) => *n,
                _ => return Err(VmError::Fields),
            };
            let asset_id = match tuple.get(2) {
                Some(Item::Bytes(b)) => b.clone(),
                _ => return Err(VmError::Fields),
            };
            let anchor = match tuple.get(3) {
                Some(Item::Bytes(b)) => b.clone(),
                _ => return Err(VmError::Fields),
            };
            Ok(Item::Value(Value {
                amount,
                asset_id,
                anchor,
            }))
        }
        CONTRACT_CODE | WRAPPED_CODE => Ok(Item::Contract(contract_from_tuple(tuple)?)),
        _ => Err(VmError::Fields),
    }
}

/// Writes `n` in canonical int form: a single byte for `0..=31`, otherwise a
/// pushdata of the LEB128 two's-complement form followed by `int`.
pub fn encode_int(n: i64, out: &mut Vec<u8>) {
    if (0..=opcode::MAX_SMALL_INT as i64).contains(&n) {
        out.push(n as u8);
        return;
    }
    let mut varint = Vec::with_capacity(10);
    write_uvarint(&mut varint, n as u64);
    write_pushdata(out, &varint);
    out.push(opcode::INT);
}

/// Writes a pushdata instruction for `data`.
pub fn write_pushdata(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() <= opcode::MAX_SHORT_PUSHDATA {
        out.push(opcode::MIN_PUSHDATA + data.len() as u8);
    } else {
        out.push(opcode::LONG_PUSHDATA);
        write_uvarint(out, data.len() as u64);
    }
    out.extend_from_slice(data);
}

/// Decodes the payload of a pushdata instruction whose opcode byte was `op`.
///
/// `rest` is the program remainder after the opcode; returns the payload and
/// the number of bytes consumed from `rest`, or `None` if truncated.
pub fn pushdata_payload(op: u8, rest: &[u8]) -> Option<(&[u8], usize)> {
    debug_assert!(opcode::is_pushdata(op));
    let (len, header) = if op == opcode::LONG_PUSHDATA {
        let (len, n) = read_uvarint(rest)?;
        (usize::try_from(len).ok()?, n)
    } else {
        ((op - opcode::MIN_PUSHDATA) as usize, 0)
    };
    let payload = rest.get(header..)?.get(..len)?;
    Some((payload, header + len))
}

/// Writes `v` as LEB128.
pub fn write_uvarint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Reads a LEB128 value, returning it and the number of bytes consumed.
pub fn read_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    for (i, &b) in data.iter().enumerate() {
        if i == 9 && b > 1 {
            return None; // overflows 64 bits
        }
        v |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
        if i == 9 {
            return None;
        }
    }
    None
}

impl fmt::Display for Item {
    /// Renders the item in assembler-literal form: ints plain, printable
    /// byte strings single-quoted, other byte strings as `x'…'`, tuples
    /// braced. Resources render as their inspection tuples.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Int(n) => write!(f, "{}", n),
            Item::Bytes(b) => {
                if b.iter().all(|&c| (0x20..0x7f).contains(&c)) {
                    write!(f, "'{}'", String::from_utf8_lossy(b))
                } else {
                    write!(f, "x'{}'", crate::utils::hex::encode(b))
                }
            }
            Item::Tuple(t) => {
                write!(f, "{{")?;
                for (i, item) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Item::Value(_) | Item::Contract(_) => write!(f, "{}", self.inspect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_encode_as_themselves() {
        assert_eq!(Item::Int(0).encoded(), vec![0x00]);
        assert_eq!(Item::Int(11).encoded(), vec![0x0b]);
        assert_eq!(Item::Int(31).encoded(), vec![0x1f]);
    }

    #[test]
    fn large_int_encodes_as_varint_pushdata() {
        // 1000 = LEB128 e8 07, pushed then converted with `int`.
        assert_eq!(
            Item::Int(1000).encoded(),
            vec![opcode::MIN_PUSHDATA + 2, 0xe8, 0x07, opcode::INT]
        );
    }

    #[test]
    fn negative_int_encodes_as_ten_byte_varint() {
        let encoded = Item::Int(-1).encoded();
        // Two's complement of -1 is ten LEB128 bytes.
        assert_eq!(encoded[0], opcode::MIN_PUSHDATA + 10);
        assert_eq!(encoded.last(), Some(&opcode::INT));
        let (v, n) = read_uvarint(&encoded[1..11]).unwrap();
        assert_eq!(n, 10);
        assert_eq!(v as i64, -1);
    }

    #[test]
    fn bytes_encode_as_pushdata() {
        assert_eq!(
            Item::Bytes(Bytes::from("hello there")).encoded(),
            [&[opcode::MIN_PUSHDATA + 11], b"hello there".as_slice()].concat()
        );
    }

    #[test]
    fn long_bytes_use_the_escape_form() {
        let data = vec![0xaa; 300];
        let encoded = Item::Bytes(Bytes::from_vec(data.clone())).encoded();
        assert_eq!(encoded[0], opcode::LONG_PUSHDATA);
        let (payload, consumed) = pushdata_payload(encoded[0], &encoded[1..]).unwrap();
        assert_eq!(payload, data.as_slice());
        assert_eq!(1 + consumed, encoded.len());
    }

    #[test]
    fn tuple_encoding_matches_reference_vector() {
        // {'hi', 'bye'} encodes to 616869626279650254.
        let t = Item::Tuple(Tuple::new(vec![
            Item::Bytes(Bytes::from("hi")),
            Item::Bytes(Bytes::from("bye")),
        ]));
        assert_eq!(
            t.encoded(),
            crate::utils::hex::decode("616869626279650254").unwrap()
        );
    }

    #[test]
    fn uvarint_roundtrip() {
        for v in [0u64, 1, 127, 128, 624485, u64::MAX] {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, v);
            assert_eq!(read_uvarint(&buf), Some((v, buf.len())));
        }
    }

    #[test]
    fn uvarint_rejects_truncation() {
        assert_eq!(read_uvarint(&[0xe5]), None);
        assert_eq!(read_uvarint(&[]), None);
    }

    #[test]
    fn inspect_roundtrips_a_contract() {
        let contract = ContractRecord {
            kind: ContractKind::Plain,
            seed: Bytes::from([7u8; 32]),
            program: Bytes::from([opcode::PUT].as_slice()),
            stack: vec![
                Item::Int(7),
                Item::Bytes(Bytes::from("stack item")),
                Item::Tuple(Tuple::new(vec![Item::Int(7)])),
                Item::Value(Value {
                    amount: 0,
                    asset_id: Bytes::from("apples"),
                    anchor: Bytes::from([1u8; 32]),
                }),
            ],
        };
        let inspected = Item::Contract(contract.clone()).inspect();
        let tuple = match &inspected {
            Item::Tuple(t) => t,
            _ => panic!("inspect must yield a tuple"),
        };
        assert_eq!(contract_from_tuple(tuple).unwrap(), contract);
    }

    #[test]
    fn contract_tuple_parse_rejects_malformed_fields() {
        let seed = Item::Bytes(Bytes::from([0u8; 32]));
        let prog = Item::Bytes(Bytes::default());
        let cases: Vec<Vec<Item>> = vec![
            // too short
            vec![Item::Bytes(Bytes::from("C"))],
            // bad typecode
            vec![Item::Bytes(Bytes::from("EE")), seed.clone(), prog.clone()],
            // non-bytes seed
            vec![Item::Bytes(Bytes::from("C")), Item::Int(9), prog.clone()],
            // stack element that is not an inspection tuple
            vec![
                Item::Bytes(Bytes::from("C")),
                seed.clone(),
                prog.clone(),
                Item::Bytes(Bytes::from("not a valid stack")),
            ],
            // empty inspection tuple
            vec![
                Item::Bytes(Bytes::from("C")),
                seed.clone(),
                prog.clone(),
                Item::Tuple(Tuple::default()),
            ],
            // value with missing fields
            vec![
                Item::Bytes(Bytes::from("C")),
                seed.clone(),
                prog.clone(),
                Item::Tuple(Tuple::new(vec![Item::Bytes(Bytes::from("V"))])),
            ],
            // Z wrapping a non-int
            vec![
                Item::Bytes(Bytes::from("C")),
                seed,
                prog,
                Item::Tuple(Tuple::new(vec![
                    Item::Bytes(Bytes::from("Z")),
                    Item::Bytes(Bytes::from("not int")),
                ])),
            ],
        ];
        for fields in cases {
            let t = Tuple::new(fields);
            assert_eq!(contract_from_tuple(&t), Err(VmError::Fields));
        }
    }

    #[test]
    fn display_matches_assembler_literals() {
        let t = Item::Tuple(Tuple::new(vec![
            Item::Bytes(Bytes::from("N")),
            Item::Bytes(Bytes::from([0u8, 1])),
            Item::Int(20),
        ]));
        assert_eq!(t.to_string(), "{'N', x'0001', 20}");
    }

    #[test]
    fn truthiness() {
        assert!(!Item::Int(0).is_true());
        assert!(Item::Int(-5).is_true());
        assert!(Item::Bytes(Bytes::default()).is_true());
        assert!(Item::Tuple(Tuple::default()).is_true());
    }
}

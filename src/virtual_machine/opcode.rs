//! Opcode table.
//!
//! The instruction space has three regions: opcodes `0x00..=0x1f` push their
//! own value as an Int, `0x20..=0x5e` are the 63 named instructions, and
//! `0x5f` upward is the pushdata range (the opcode byte encodes the payload
//! length, with an escape for long strings).
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! list and invokes a callback macro, so the assembler and disassembler can
//! generate their mnemonic tables without duplicating definitions.

/// Smallest self-pushing small-int opcode.
pub const MIN_SMALL_INT: u8 = 0x00;
/// Largest self-pushing small-int opcode.
pub const MAX_SMALL_INT: u8 = 0x1f;
/// First pushdata opcode; `op - MIN_PUSHDATA` is the payload length.
pub const MIN_PUSHDATA: u8 = 0x5f;
/// Pushdata escape for payloads too long for a single opcode byte; a LEB128
/// length follows the opcode.
pub const LONG_PUSHDATA: u8 = 0xff;
/// Longest payload expressible with a single pushdata opcode byte.
pub const MAX_SHORT_PUSHDATA: usize = (LONG_PUSHDATA - MIN_PUSHDATA - 1) as usize;

/// Invokes a callback macro with the complete named-opcode list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // Numeric and boolean
            INT = 0x20, "int",
            ADD = 0x21, "add",
            NEG = 0x22, "neg",
            MUL = 0x23, "mul",
            DIV = 0x24, "div",
            MOD = 0x25, "mod",
            GT = 0x26, "gt",
            NOT = 0x27, "not",
            AND = 0x28, "and",
            OR = 0x29, "or",
            // Stack
            ROLL = 0x2a, "roll",
            BURY = 0x2b, "bury",
            REVERSE = 0x2c, "reverse",
            GET = 0x2d, "get",
            PUT = 0x2e, "put",
            DEPTH = 0x2f, "depth",
            // Value
            NONCE = 0x30, "nonce",
            MERGE = 0x31, "merge",
            SPLIT = 0x32, "split",
            ISSUE = 0x33, "issue",
            RETIRE = 0x34, "retire",
            AMOUNT = 0x35, "amount",
            ASSETID = 0x36, "assetid",
            ANCHOR = 0x37, "anchor",
            // Crypto
            VMHASH = 0x38, "vmhash",
            SHA256 = 0x39, "sha256",
            SHA3 = 0x3a, "sha3",
            CHECKSIG = 0x3b, "checksig",
            // Log
            LOG = 0x3c, "log",
            PEEKLOG = 0x3d, "peeklog",
            TXID = 0x3e, "txid",
            FINALIZE = 0x3f, "finalize",
            // Control flow
            VERIFY = 0x40, "verify",
            JUMPIF = 0x41, "jumpif",
            EXEC = 0x42, "exec",
            CALL = 0x43, "call",
            YIELD = 0x44, "yield",
            WRAP = 0x45, "wrap",
            INPUT = 0x46, "input",
            OUTPUT = 0x47, "output",
            CONTRACT = 0x48, "contract",
            SEED = 0x49, "seed",
            SELF = 0x4a, "self",
            CALLER = 0x4b, "caller",
            CONTRACTPROGRAM = 0x4c, "contractprogram",
            TIMERANGE = 0x4d, "timerange",
            // Reserved
            PRV = 0x4e, "prv",
            EXT = 0x4f, "ext",
            // Data
            EQ = 0x50, "eq",
            DUP = 0x51, "dup",
            DROP = 0x52, "drop",
            PEEK = 0x53, "peek",
            TUPLE = 0x54, "tuple",
            UNTUPLE = 0x55, "untuple",
            LEN = 0x56, "len",
            FIELD = 0x57, "field",
            ENCODE = 0x58, "encode",
            CAT = 0x59, "cat",
            SLICE = 0x5a, "slice",
            BITNOT = 0x5b, "bitnot",
            BITAND = 0x5c, "bitand",
            BITOR = 0x5d, "bitor",
            BITXOR = 0x5e, "bitxor",
        }
    };
}

macro_rules! define_opcodes {
    ( $( $name:ident = $byte:expr, $mnemonic:literal, )* ) => {
        $( pub const $name: u8 = $byte; )*

        /// Returns the mnemonic for a named opcode, if `op` is one.
        pub fn mnemonic(op: u8) -> Option<&'static str> {
            match op {
                $( $byte => Some($mnemonic), )*
                _ => None,
            }
        }

        /// Returns the opcode for a mnemonic, if one exists.
        pub fn from_mnemonic(name: &str) -> Option<u8> {
            match name {
                $( $mnemonic => Some($byte), )*
                _ => None,
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// Returns true if `op` pushes its own value as a small Int.
pub fn is_small_int(op: u8) -> bool {
    op <= MAX_SMALL_INT
}

/// Returns true if `op` starts a pushdata instruction.
pub fn is_pushdata(op: u8) -> bool {
    op >= MIN_PUSHDATA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_pinned() {
        assert_eq!(INT, 0x20);
        assert_eq!(OR, 0x29);
        assert_eq!(DEPTH, 0x2f);
        assert_eq!(NONCE, 0x30);
        assert_eq!(ANCHOR, 0x37);
        assert_eq!(CHECKSIG, 0x3b);
        assert_eq!(FINALIZE, 0x3f);
        assert_eq!(TIMERANGE, 0x4d);
        assert_eq!(EXT, 0x4f);
        assert_eq!(EQ, 0x50);
        assert_eq!(TUPLE, 0x54);
        assert_eq!(BITXOR, 0x5e);
        assert_eq!(MAX_SMALL_INT, 0x1f);
        assert_eq!(MIN_PUSHDATA, 0x5f);
    }

    #[test]
    fn typecode_bytes_reuse_opcode_space() {
        // The item typecodes are the ASCII letters that happen to be the
        // tuple/value/contract opcodes.
        assert_eq!(TUPLE, b'T');
        assert_eq!(LEN, b'V');
        assert_eq!(PEEK, b'S');
        assert_eq!(SLICE, b'Z');
        assert_eq!(CALL, b'C');
        assert_eq!(WRAP, b'W');
    }

    #[test]
    fn mnemonic_lookup_is_inverse() {
        for op in 0x20..=0x5eu8 {
            let name = mnemonic(op).expect("named opcode");
            assert_eq!(from_mnemonic(name), Some(op));
        }
        assert_eq!(mnemonic(0x00), None);
        assert_eq!(mnemonic(MIN_PUSHDATA), None);
        assert_eq!(from_mnemonic("bogus"), None);
    }
}

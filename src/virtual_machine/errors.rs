//! VM fault taxonomy.

use txvm_derive::Error;

/// Errors that can abort transaction execution.
///
/// Grouped by family: static program misuse, resource-accounting misuse,
/// crypto failures, and control-flow violations. Every fault rolls back all
/// effects of the transaction being validated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    // Program errors: static misuse of the instruction set.
    /// Operand has the wrong item type.
    #[error("wrong item type for operation")]
    Type,
    /// Stack popped while empty.
    #[error("stack underflow")]
    Underflow,
    /// Index out of range (tuple field, log position).
    #[error("index out of range")]
    Range,
    /// Stack index out of range (roll, bury, reverse).
    #[error("stack index out of range")]
    StackRange,
    /// Malformed varint passed to `int`.
    #[error("invalid varint")]
    Int,
    /// 64-bit integer overflow (also raised by division by zero).
    #[error("integer overflow")]
    IntOverflow,
    /// Slice bounds out of range or inverted.
    #[error("slice bounds out of range")]
    SliceRange,
    /// Truncated or malformed pushdata at the end of a program.
    #[error("truncated program")]
    Truncated,
    /// The transaction exhausted its runlimit.
    #[error("runlimit exhausted")]
    Runlimit,

    // Value errors: resource-accounting misuse.
    /// `merge` of two values with different asset IDs.
    #[error("cannot merge different assets")]
    MergeAsset,
    /// Negative amount passed to `issue` or `split`.
    #[error("negative amount")]
    NegAmount,
    /// A zero-amount anchor value was required but not supplied.
    #[error("expected zero-amount value")]
    AnchorVal,
    /// `split` amount exceeds the value being split.
    #[error("split amount exceeds value")]
    Split,

    // Crypto errors.
    /// Signature verification failed on a non-empty signature.
    #[error("signature check failed")]
    Signature,
    /// Public key is not 32 bytes.
    #[error("bad public key length")]
    PubSize,
    /// Non-empty signature is not 64 bytes.
    #[error("bad signature length")]
    SigSize,
    /// Reserved extension opcode, or nonzero checksig extension code.
    #[error("extension not enabled")]
    Ext,
    /// Reserved private opcode.
    #[error("reserved opcode")]
    Prv,

    // Flow errors.
    /// `verify` popped a false value.
    #[error("verify failed")]
    VerifyFail,
    /// Jump destination outside the current program.
    #[error("bad jump destination")]
    Jump,
    /// A stack that must be empty is not (callee return, finalize).
    #[error("stack not empty")]
    NonEmpty,
    /// `output` or `wrap` captured a non-portable item.
    #[error("item is not portable")]
    Unportable,
    /// Log-appending opcode executed after `finalize`.
    #[error("transaction already finalized")]
    Finalized,
    /// `txid` executed before `finalize`.
    #[error("transaction not finalized")]
    Unfinalized,
    /// Malformed contract tuple passed to `input`.
    #[error("malformed contract tuple")]
    Fields,
}

/// A VM fault together with the diagnostic dump captured where it happened.
#[derive(Debug, Clone)]
pub struct Fault {
    /// The underlying fault.
    pub error: VmError,
    /// Opcode being executed, if the fault happened inside an instruction.
    pub opcode: Option<u8>,
    /// Program counter within the faulting run.
    pub pc: usize,
    /// Rendering of the contract stack at the fault site.
    pub stack: String,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode {
            Some(op) => write!(
                f,
                "{} (opcode 0x{:02x} at pc {}, stack {})",
                self.error, op, self.pc, self.stack
            ),
            None => write!(f, "{} (at pc {}, stack {})", self.error, self.pc, self.stack),
        }
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_includes_opcode_and_pc() {
        let fault = Fault {
            error: VmError::Underflow,
            opcode: Some(0x21),
            pc: 7,
            stack: "{}".to_string(),
        };
        let s = fault.to_string();
        assert!(s.contains("stack underflow"));
        assert!(s.contains("0x21"));
        assert!(s.contains("pc 7"));
    }
}

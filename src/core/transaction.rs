//! Validated transactions and their commitments.
//!
//! A [`Tx`] is a raw program triple plus everything validation derived from
//! it: the log, the ID, and the typed value-flow records the state layer
//! consumes. Constructing a `Tx` runs the VM; the result is immutable.

use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::item::{encode_int, write_pushdata, Tuple};
use crate::virtual_machine::vm::{
    ContractAction, InputRecord, IssuanceRecord, NonceRecord, OutputRecord, RetirementRecord,
    TimerangeRecord, ValidateOptions, Vm,
};
use txvm_derive::Error;

/// Errors from transaction validation.
#[derive(Debug, Error)]
pub enum TxError {
    /// The program faulted.
    #[error("{0}")]
    Vm(Fault),
    /// The program ran to completion without finalizing.
    #[error("transaction is not finalized")]
    Unfinalized,
}

impl From<Fault> for TxError {
    fn from(fault: Fault) -> TxError {
        TxError::Vm(fault)
    }
}

/// A validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub version: u64,
    pub runlimit: i64,
    pub program: Bytes,

    /// The transaction ID; meaningful only when `finalized` is true.
    pub id: Hash,
    pub finalized: bool,
    pub log: Vec<Tuple>,

    /// Inputs consumed and outputs created, in execution order.
    pub contracts: Vec<ContractAction>,
    /// The anchor recorded at finalization.
    pub anchor: Option<Bytes>,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
    pub issuances: Vec<IssuanceRecord>,
    pub retirements: Vec<RetirementRecord>,
    pub nonces: Vec<NonceRecord>,
    pub timeranges: Vec<TimerangeRecord>,
}

impl Tx {
    /// Validates `program` and derives the transaction's records.
    ///
    /// A program that never finalizes still produces a `Tx` (with
    /// `finalized` false and a zero ID); block deserialization rejects
    /// those, but callers computing IDs for signing need the partial form.
    pub fn new(program: &[u8], version: u64, runlimit: i64) -> Result<Tx, TxError> {
        let vm = Vm::validate(program, version, runlimit)?;
        Ok(Self::from_vm(program, version, runlimit, vm))
    }

    /// Like [`new`](Self::new) but stops right after `finalize`, skipping
    /// any trailing signature-check calls. Used to learn the ID that those
    /// very signatures must commit to.
    pub fn new_stopping_at_finalize(
        program: &[u8],
        version: u64,
        runlimit: i64,
    ) -> Result<Tx, TxError> {
        let vm = Vm::validate_with(
            program,
            version,
            runlimit,
            ValidateOptions {
                stop_after_finalize: true,
            },
        )?;
        Ok(Self::from_vm(program, version, runlimit, vm))
    }

    fn from_vm(program: &[u8], version: u64, runlimit: i64, vm: Vm) -> Tx {
        Tx {
            version,
            runlimit,
            program: Bytes::from(program),
            id: vm.tx_id().unwrap_or_else(Hash::zero),
            finalized: vm.finalized(),
            log: vm.log().to_vec(),
            contracts: vm.contract_actions().to_vec(),
            anchor: vm.anchor().cloned(),
            inputs: vm.inputs().to_vec(),
            outputs: vm.outputs().to_vec(),
            issuances: vm.issuances().to_vec(),
            retirements: vm.retirements().to_vec(),
            nonces: vm.nonces().to_vec(),
            timeranges: vm.timeranges().to_vec(),
        }
    }

    /// Computes the witness commitment, the leaf fed to the block Merkle
    /// tree: `SHA256(encode(version) ‖ encode(runlimit) ‖ encode(program))`.
    pub fn witness_commitment(&self) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(self.program.len() + 24);
        encode_int(self.version as i64, &mut preimage);
        encode_int(self.runlimit, &mut preimage);
        write_pushdata(&mut preimage, &self.program);
        Hash::sha256().chain(&preimage).finalize().0
    }
}

/// A transaction paired with its precomputed witness commitment.
///
/// The commitment is needed on every block-building and merkle path, so the
/// pairing is computed once up front; the raw [`Tx`] APIs compute it inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentsTx {
    pub tx: Tx,
    pub witness_commitment: [u8; 32],
}

impl CommitmentsTx {
    pub fn new(tx: Tx) -> CommitmentsTx {
        let witness_commitment = tx.witness_commitment();
        CommitmentsTx {
            tx,
            witness_commitment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::empty_tx_program;
    use crate::virtual_machine::errors::VmError;
    use crate::virtual_machine::opcode as op;
    use crate::virtual_machine::vm::ContractAction;

    #[test]
    fn validation_is_bitwise_deterministic() {
        let prog = empty_tx_program(42);
        let a = Tx::new(&prog, 3, 2000).unwrap();
        let b = Tx::new(&prog, 3, 2000).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.log, b.log);
        assert_eq!(a, b);
    }

    #[test]
    fn different_nonces_produce_different_ids() {
        let a = Tx::new(&empty_tx_program(1), 3, 2000).unwrap();
        let b = Tx::new(&empty_tx_program(2), 3, 2000).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn faults_carry_the_vm_dump() {
        let err = Tx::new(&[op::ADD], 3, 2000).unwrap_err();
        match err {
            TxError::Vm(fault) => {
                assert_eq!(fault.error, VmError::Underflow);
                assert_eq!(fault.opcode, Some(op::ADD));
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn unfinalized_program_yields_partial_tx() {
        let tx = Tx::new(&[0x01, op::DROP], 3, 2000).unwrap();
        assert!(!tx.finalized);
        assert_eq!(tx.id, Hash::zero());
    }

    #[test]
    fn derived_records_cover_the_empty_tx() {
        let tx = Tx::new(&empty_tx_program(9), 3, 2000).unwrap();
        assert!(tx.finalized);
        assert_eq!(tx.nonces.len(), 1);
        assert_eq!(tx.timeranges.len(), 1);
        assert!(tx.inputs.is_empty());
        assert!(tx.outputs.is_empty());
        assert!(tx.contracts.iter().all(|a| matches!(a, ContractAction::Input(_))) || tx.contracts.is_empty());
        assert_eq!(tx.anchor.as_ref().map(|a| a.len()), Some(32));
    }

    #[test]
    fn witness_commitment_depends_on_all_three_fields() {
        let prog = empty_tx_program(3);
        let base = Tx::new(&prog, 3, 2000).unwrap();

        let other_limit = Tx::new(&prog, 3, 2001).unwrap();
        assert_ne!(base.witness_commitment(), other_limit.witness_commitment());

        let other_prog = Tx::new(&empty_tx_program(4), 3, 2000).unwrap();
        assert_ne!(base.witness_commitment(), other_prog.witness_commitment());

        // And it is stable.
        assert_eq!(base.witness_commitment(), base.witness_commitment());
    }

    #[test]
    fn commitments_tx_precomputes_the_commitment() {
        let tx = Tx::new(&empty_tx_program(5), 3, 2000).unwrap();
        let wrapped = CommitmentsTx::new(tx.clone());
        assert_eq!(wrapped.witness_commitment, tx.witness_commitment());
    }
}

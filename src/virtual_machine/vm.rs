//! The transaction virtual machine.
//!
//! Executing a program *is* validating a transaction: the machine's append-
//! only log, the value-flow records derived while executing, and the final
//! transaction ID fully define the transaction's effects. Execution is
//! strictly deterministic - no opcode reads time, randomness, or external
//! state - and every opcode debits the runlimit before doing work.
//!
//! Each contract runs in its own frame holding a private stack; frames are
//! entered with `call` and communicate over the shared argument stack.
//! Dispatch is a flat match on the opcode byte; the three instruction-space
//! regions (small ints, named opcodes, pushdata) are resolved before
//! dispatch.

use crate::crypto::key_pair::{self, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::types::bytes::Bytes;
use crate::types::hash::{vm_hash, Hash, HASH_LEN};
use crate::virtual_machine::errors::{Fault, VmError};
use crate::virtual_machine::item::{
    self, ContractKind, ContractRecord, Item, Tuple, Value,
};
use crate::virtual_machine::opcode as op;
use crate::virtual_machine::runlimit::{self, bytes_cost, Runlimit};
use crate::virtual_machine::stack::Stack;

/// Domain tag for contract seeds derived from programs.
pub const CONTRACT_SEED_TAG: &[u8] = b"ContractSeed";
/// Domain tag for contract snapshot IDs (the UTXO handle).
pub const SNAPSHOT_TAG: &[u8] = b"Snapshot";
/// Domain tag for asset IDs.
pub const ASSET_ID_TAG: &[u8] = b"AssetID";
/// Domain tag for nonce anchors.
pub const ANCHOR_TAG: &[u8] = b"Anchor";
/// Domain tags for the two halves of a split value.
const SPLIT1_TAG: &[u8] = b"Split1";
const SPLIT2_TAG: &[u8] = b"Split2";
/// Domain tag for merged value anchors.
const MERGE_TAG: &[u8] = b"Merge";

/// Log entry domain codes.
pub const INPUT_LOG_CODE: u8 = b'I';
pub const OUTPUT_LOG_CODE: u8 = b'O';
pub const LOG_LOG_CODE: u8 = b'L';
pub const NONCE_LOG_CODE: u8 = b'N';
pub const TIMERANGE_LOG_CODE: u8 = b'R';
pub const ISSUE_LOG_CODE: u8 = b'A';
pub const RETIRE_LOG_CODE: u8 = b'X';
pub const FINALIZE_LOG_CODE: u8 = b'F';

/// Computes the seed identifying `program`, independent of any state.
pub fn contract_seed(program: &[u8]) -> Hash {
    vm_hash(CONTRACT_SEED_TAG, program)
}

/// An input consumed or an output created, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractAction {
    Input(Hash),
    Output(Hash),
}

/// A spent output, reconstructed by `input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub id: Hash,
    pub seed: Bytes,
    pub program: Bytes,
    pub stack: Vec<Item>,
    pub log_pos: usize,
}

/// A created output, persisted by `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub id: Hash,
    pub seed: Bytes,
    pub program: Bytes,
    pub stack: Vec<Item>,
    pub log_pos: usize,
}

/// Units minted by `issue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRecord {
    pub amount: i64,
    pub asset_id: Bytes,
    pub anchor: Bytes,
    pub log_pos: usize,
}

/// Units burned by `retire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetirementRecord {
    pub amount: i64,
    pub asset_id: Bytes,
    pub anchor: Bytes,
    pub log_pos: usize,
}

/// A replay-prevention nonce created by `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    /// The nonce anchor, which doubles as its unique ID.
    pub id: Hash,
    /// Block the nonce is anchored to; all-zero means unanchored.
    pub block_id: Hash,
    pub exp_ms: u64,
    pub log_pos: usize,
}

/// A time window constraining when the transaction may land in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerangeRecord {
    pub min_ms: i64,
    pub max_ms: i64,
}

/// Options for [`Vm::validate_with`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidateOptions {
    /// Stop execution immediately after `finalize` completes. Used when
    /// computing a transaction ID that deferred signature programs will
    /// sign, before the signatures exist.
    pub stop_after_finalize: bool,
}

/// One contract frame: the executing contract and its private stack.
#[derive(Debug)]
struct Frame {
    kind: ContractKind,
    seed: Bytes,
    program: Bytes,
    stack: Stack,
    /// Set by `yield`, `wrap`, and `output`: the frame terminated by
    /// transferring itself rather than by running off the end.
    complete: bool,
}

/// The transaction virtual machine.
#[derive(Debug)]
pub struct Vm {
    tx_version: u64,
    runlimit: Runlimit,

    contract: Frame,
    caller: Bytes,
    argstack: Stack,

    log: Vec<Tuple>,
    finalized: bool,
    tx_id: Option<Hash>,
    anchor: Option<Bytes>,

    contract_actions: Vec<ContractAction>,
    inputs: Vec<InputRecord>,
    outputs: Vec<OutputRecord>,
    issuances: Vec<IssuanceRecord>,
    retirements: Vec<RetirementRecord>,
    nonces: Vec<NonceRecord>,
    timeranges: Vec<TimerangeRecord>,

    stop_after_finalize: bool,
    stopped: bool,
    /// Last opcode and pc seen, for fault dumps.
    trace: (Option<u8>, usize),
}

impl Vm {
    /// Validates `program` by executing it to completion.
    ///
    /// Returns the finished machine; a program that never finalizes is not
    /// itself a fault (callers that require finalization check
    /// [`finalized`](Self::finalized)).
    pub fn validate(program: &[u8], tx_version: u64, runlimit: i64) -> Result<Vm, Fault> {
        Self::validate_with(program, tx_version, runlimit, ValidateOptions::default())
    }

    /// Validates `program` with explicit options.
    pub fn validate_with(
        program: &[u8],
        tx_version: u64,
        runlimit: i64,
        options: ValidateOptions,
    ) -> Result<Vm, Fault> {
        let mut vm = Vm::new(program, tx_version, runlimit);
        vm.stop_after_finalize = options.stop_after_finalize;
        let prog = vm.contract.program.clone();
        match vm.exec_program(&prog) {
            Ok(()) => Ok(vm),
            Err(error) => Err(vm.fault(error)),
        }
    }

    fn new(program: &[u8], tx_version: u64, runlimit: i64) -> Vm {
        Vm {
            tx_version,
            runlimit: Runlimit::new(runlimit),
            contract: Frame {
                kind: ContractKind::Plain,
                seed: Bytes::from([0u8; HASH_LEN]),
                program: Bytes::from(program),
                stack: Stack::new(),
                complete: false,
            },
            caller: Bytes::from([0u8; HASH_LEN]),
            argstack: Stack::new(),
            log: Vec::new(),
            finalized: false,
            tx_id: None,
            anchor: None,
            contract_actions: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            issuances: Vec::new(),
            retirements: Vec::new(),
            nonces: Vec::new(),
            timeranges: Vec::new(),
            stop_after_finalize: false,
            stopped: false,
            trace: (None, 0),
        }
    }

    // Accessors for the finished machine.

    /// The append-only transaction log.
    pub fn log(&self) -> &[Tuple] {
        &self.log
    }

    /// The transaction ID; `None` until finalized.
    pub fn tx_id(&self) -> Option<Hash> {
        self.tx_id
    }

    /// Whether `finalize` ran.
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// The anchor recorded by `finalize`.
    pub fn anchor(&self) -> Option<&Bytes> {
        self.anchor.as_ref()
    }

    /// Unspent runlimit.
    pub fn runlimit_remaining(&self) -> i64 {
        self.runlimit.remaining()
    }

    /// Inputs and outputs in execution order.
    pub fn contract_actions(&self) -> &[ContractAction] {
        &self.contract_actions
    }

    pub fn inputs(&self) -> &[InputRecord] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputRecord] {
        &self.outputs
    }

    pub fn issuances(&self) -> &[IssuanceRecord] {
        &self.issuances
    }

    pub fn retirements(&self) -> &[RetirementRecord] {
        &self.retirements
    }

    pub fn nonces(&self) -> &[NonceRecord] {
        &self.nonces
    }

    pub fn timeranges(&self) -> &[TimerangeRecord] {
        &self.timeranges
    }

    fn fault(&self, error: VmError) -> Fault {
        Fault {
            error,
            opcode: self.trace.0,
            pc: self.trace.1,
            stack: self.contract.stack.to_string(),
        }
    }

    /// Runs `prog` to completion within the current frame.
    ///
    /// `exec` and `call` re-enter here; a frame that terminates via `yield`,
    /// `wrap`, or `output` unwinds every nested run of that frame.
    fn exec_program(&mut self, prog: &[u8]) -> Result<(), VmError> {
        let mut pc = 0usize;
        while pc < prog.len() {
            if self.contract.complete || self.stopped {
                break;
            }
            let opcode = prog[pc];
            self.trace = (Some(opcode), pc);
            pc += 1;

            if op::is_small_int(opcode) {
                self.runlimit.charge(runlimit::BASE_COST)?;
                self.contract.stack.push(Item::Int(opcode as i64));
            } else if op::is_pushdata(opcode) {
                let (payload, consumed) = item::pushdata_payload(opcode, &prog[pc..])
                    .ok_or(VmError::Truncated)?;
                self.runlimit
                    .charge(runlimit::BASE_COST + payload.len() as i64)?;
                let payload = Bytes::from(payload);
                pc += consumed;
                self.contract.stack.push(Item::Bytes(payload));
            } else {
                self.step(opcode, prog.len(), &mut pc)?;
            }
        }
        Ok(())
    }

    /// Dispatches one named opcode.
    fn step(&mut self, opcode: u8, prog_len: usize, pc: &mut usize) -> Result<(), VmError> {
        match opcode {
            op::INT => self.op_int(),
            op::ADD => self.op_binary_int(|a, b| a.checked_add(b)),
            op::NEG => self.op_neg(),
            op::MUL => self.op_binary_int(|a, b| a.checked_mul(b)),
            op::DIV => self.op_binary_int(|a, b| if b == 0 { None } else { a.checked_div(b) }),
            op::MOD => self.op_binary_int(|a, b| if b == 0 { None } else { a.checked_rem(b) }),
            op::GT => self.op_gt(),
            op::NOT => self.op_not(),
            op::AND => self.op_bool(|a, b| a && b),
            op::OR => self.op_bool(|a, b| a || b),

            op::ROLL => self.op_roll(),
            op::BURY => self.op_bury(),
            op::REVERSE => self.op_reverse(),
            op::GET => self.op_get(),
            op::PUT => self.op_put(),
            op::DEPTH => self.op_depth(),

            op::NONCE => self.op_nonce(),
            op::MERGE => self.op_merge(),
            op::SPLIT => self.op_split(),
            op::ISSUE => self.op_issue(),
            op::RETIRE => self.op_retire(),
            op::AMOUNT => self.op_amount(),
            op::ASSETID => self.op_assetid(),
            op::ANCHOR => self.op_anchor(),

            op::VMHASH => self.op_vmhash(),
            op::SHA256 => self.op_hash(|data| Hash::sha256().chain(data).finalize()),
            op::SHA3 => self.op_hash(|data| Hash::sha3().chain(data).finalize()),
            op::CHECKSIG => self.op_checksig(),

            op::LOG => self.op_log(),
            op::PEEKLOG => self.op_peeklog(),
            op::TXID => self.op_txid(),
            op::FINALIZE => self.op_finalize(),

            op::VERIFY => self.op_verify(),
            op::JUMPIF => self.op_jumpif(prog_len, pc),
            op::EXEC => self.op_exec(),
            op::CALL => self.op_call(),
            op::YIELD => self.op_yield(ContractKind::Plain),
            op::WRAP => self.op_yield(ContractKind::Wrapped),
            op::INPUT => self.op_input(),
            op::OUTPUT => self.op_output(),
            op::CONTRACT => self.op_contract(),
            op::SEED => self.op_seed(),
            op::SELF => self.op_self(),
            op::CALLER => self.op_caller(),
            op::CONTRACTPROGRAM => self.op_contractprogram(),
            op::TIMERANGE => self.op_timerange(),

            op::PRV => Err(VmError::Prv),
            op::EXT => Err(VmError::Ext),

            op::EQ => self.op_eq(),
            op::DUP => self.op_dup(),
            op::DROP => self.op_drop(),
            op::PEEK => self.op_peek(),
            op::TUPLE => self.op_tuple(),
            op::UNTUPLE => self.op_untuple(),
            op::LEN => self.op_len(),
            op::FIELD => self.op_field(),
            op::ENCODE => self.op_encode(),
            op::CAT => self.op_cat(),
            op::SLICE => self.op_slice(),
            op::BITNOT => self.op_bitnot(),
            op::BITAND => self.op_bitwise(|a, b| a & b),
            op::BITOR => self.op_bitwise(|a, b| a | b),
            op::BITXOR => self.op_bitwise(|a, b| a ^ b),

            // The opcode space is fully covered: everything below
            // MIN_PUSHDATA that is not a small int is named.
            _ => unreachable!("opcode {:#04x} has no dispatch entry", opcode),
        }
    }

    // Typed pops.

    fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.contract.stack.pop()? {
            Item::Int(n) => Ok(n),
            _ => Err(VmError::Type),
        }
    }

    fn pop_bytes(&mut self) -> Result<Bytes, VmError> {
        match self.contract.stack.pop()? {
            Item::Bytes(b) => Ok(b),
            _ => Err(VmError::Type),
        }
    }

    fn pop_tuple(&mut self) -> Result<Tuple, VmError> {
        match self.contract.stack.pop()? {
            Item::Tuple(t) => Ok(t),
            _ => Err(VmError::Type),
        }
    }

    fn pop_value(&mut self) -> Result<Value, VmError> {
        match self.contract.stack.pop()? {
            Item::Value(v) => Ok(v),
            _ => Err(VmError::Type),
        }
    }

    fn pop_data(&mut self) -> Result<Item, VmError> {
        let item = self.contract.stack.pop()?;
        if !item.is_data() {
            return Err(VmError::Type);
        }
        Ok(item)
    }

    // Log plumbing.

    /// Appends a log entry, enforcing the finalize gate: once `finalize`
    /// runs, nothing more may be logged.
    fn log_append(&mut self, entry: Tuple) -> Result<usize, VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        self.log.push(entry);
        Ok(self.log.len() - 1)
    }

    fn caller_bytes(&self) -> Item {
        Item::Bytes(self.caller.clone())
    }

    fn code_bytes(code: u8) -> Item {
        Item::Bytes(Bytes::from([code]))
    }

    /// Memory charge for copying `item` onto a stack.
    fn copy_cost(item: &Item) -> i64 {
        match item {
            Item::Int(_) => 0,
            Item::Bytes(b) => bytes_cost(b.len()),
            other => other.encoded_len() as i64,
        }
    }

    // Numeric and boolean.

    fn op_int(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let bytes = self.pop_bytes()?;
        match item::read_uvarint(&bytes) {
            Some((v, n)) if n == bytes.len() => {
                self.contract.stack.push(Item::Int(v as i64));
                Ok(())
            }
            _ => Err(VmError::Int),
        }
    }

    fn op_binary_int(&mut self, f: impl FnOnce(i64, i64) -> Option<i64>) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = f(a, b).ok_or(VmError::IntOverflow)?;
        self.contract.stack.push(Item::Int(result));
        Ok(())
    }

    fn op_neg(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let n = self.pop_int()?;
        let result = n.checked_neg().ok_or(VmError::IntOverflow)?;
        self.contract.stack.push(Item::Int(result));
        Ok(())
    }

    fn op_gt(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.contract.stack.push(Item::Int((a > b) as i64));
        Ok(())
    }

    fn op_not(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let item = self.pop_data()?;
        self.contract.stack.push(Item::Int(!item.is_true() as i64));
        Ok(())
    }

    fn op_bool(&mut self, f: impl FnOnce(bool, bool) -> bool) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let b = self.pop_data()?;
        let a = self.pop_data()?;
        self.contract
            .stack
            .push(Item::Int(f(a.is_true(), b.is_true()) as i64));
        Ok(())
    }

    // Stack manipulation.

    fn op_roll(&mut self) -> Result<(), VmError> {
        let n = self.pop_int()?;
        self.contract.stack.roll(n)?;
        self.runlimit.charge(runlimit::BASE_COST + n)
    }

    fn op_bury(&mut self) -> Result<(), VmError> {
        let n = self.pop_int()?;
        self.contract.stack.bury(n)?;
        self.runlimit.charge(runlimit::BASE_COST + n)
    }

    fn op_reverse(&mut self) -> Result<(), VmError> {
        let n = self.pop_int()?;
        self.contract.stack.reverse(n)?;
        self.runlimit.charge(runlimit::BASE_COST + n)
    }

    fn op_get(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let item = self.argstack.pop()?;
        self.contract.stack.push(item);
        Ok(())
    }

    fn op_put(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let item = self.contract.stack.pop()?;
        self.argstack.push(item);
        Ok(())
    }

    fn op_depth(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        self.contract
            .stack
            .push(Item::Int(self.argstack.len() as i64));
        Ok(())
    }

    // Values.

    fn op_nonce(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        let exp_ms = self.pop_int()?;
        let block_id = self.pop_bytes()?;
        self.runlimit.charge(
            runlimit::BASE_COST
                + runlimit::CREATE_COST
                + runlimit::NONCE_RECORD_COST
                + runlimit::TIMERANGE_RECORD_COST,
        )?;

        let nonce_tuple = Tuple::new(vec![
            Self::code_bytes(NONCE_LOG_CODE),
            self.caller_bytes(),
            Item::Bytes(self.contract.seed.clone()),
            Item::Bytes(block_id.clone()),
            Item::Int(exp_ms),
        ]);
        let anchor = vm_hash(ANCHOR_TAG, &Item::Tuple(nonce_tuple.clone()).encoded());

        let log_pos = self.log_append(nonce_tuple)?;
        self.log_append(Tuple::new(vec![
            Self::code_bytes(TIMERANGE_LOG_CODE),
            self.caller_bytes(),
            Item::Int(0),
            Item::Int(exp_ms),
        ]))?;

        self.nonces.push(NonceRecord {
            id: anchor,
            block_id: Hash::from_bytes_padded(&block_id),
            exp_ms: exp_ms as u64,
            log_pos,
        });
        self.timeranges.push(TimerangeRecord {
            min_ms: 0,
            max_ms: exp_ms,
        });

        self.contract.stack.push(Item::Value(Value {
            amount: 0,
            asset_id: Bytes::from([0u8; HASH_LEN]),
            anchor: Bytes::from(anchor.0),
        }));
        Ok(())
    }

    fn op_merge(&mut self) -> Result<(), VmError> {
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::CREATE_COST)?;
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        if a.asset_id != b.asset_id {
            return Err(VmError::MergeAsset);
        }
        let amount = a.amount.checked_add(b.amount).ok_or(VmError::IntOverflow)?;
        let preimage: Vec<u8> = [a.anchor.as_slice(), b.anchor.as_slice()].concat();
        let anchor = vm_hash(MERGE_TAG, &preimage);
        self.contract.stack.push(Item::Value(Value {
            amount,
            asset_id: a.asset_id,
            anchor: Bytes::from(anchor.0),
        }));
        Ok(())
    }

    fn op_split(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let amount = self.pop_int()?;
        let value = self.pop_value()?;
        if amount < 0 {
            return Err(VmError::NegAmount);
        }
        if amount > value.amount {
            return Err(VmError::Split);
        }
        let remainder = Value {
            amount: value.amount - amount,
            asset_id: value.asset_id.clone(),
            anchor: Bytes::from(vm_hash(SPLIT1_TAG, &value.anchor).0),
        };
        let split_off = Value {
            amount,
            asset_id: value.asset_id,
            anchor: Bytes::from(vm_hash(SPLIT2_TAG, &value.anchor).0),
        };
        self.contract.stack.push(Item::Value(remainder));
        self.contract.stack.push(Item::Value(split_off));
        Ok(())
    }

    fn op_issue(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        let tag = self.pop_bytes()?;
        let amount = self.pop_int()?;
        let anchor_value = self.pop_value()?;
        if !anchor_value.is_zero() {
            return Err(VmError::AnchorVal);
        }
        if amount < 0 {
            return Err(VmError::NegAmount);
        }
        self.runlimit.charge(
            runlimit::BASE_COST + runlimit::CREATE_COST + runlimit::ISSUE_RECORD_COST,
        )?;

        let id_tuple = Item::Tuple(Tuple::new(vec![
            Item::Bytes(self.contract.seed.clone()),
            Item::Bytes(tag),
        ]));
        let asset_id = Bytes::from(vm_hash(ASSET_ID_TAG, &id_tuple.encoded()).0);

        let log_pos = self.log_append(Tuple::new(vec![
            Self::code_bytes(ISSUE_LOG_CODE),
            self.caller_bytes(),
            Item::Int(amount),
            Item::Bytes(asset_id.clone()),
            Item::Bytes(anchor_value.anchor.clone()),
        ]))?;
        self.issuances.push(IssuanceRecord {
            amount,
            asset_id: asset_id.clone(),
            anchor: anchor_value.anchor.clone(),
            log_pos,
        });

        self.contract.stack.push(Item::Value(Value {
            amount,
            asset_id,
            anchor: anchor_value.anchor,
        }));
        Ok(())
    }

    fn op_retire(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::RETIRE_RECORD_COST)?;
        let value = self.pop_value()?;
        let log_pos = self.log_append(Tuple::new(vec![
            Self::code_bytes(RETIRE_LOG_CODE),
            self.caller_bytes(),
            Item::Int(value.amount),
            Item::Bytes(value.asset_id.clone()),
            Item::Bytes(value.anchor.clone()),
        ]))?;
        self.retirements.push(RetirementRecord {
            amount: value.amount,
            asset_id: value.asset_id,
            anchor: value.anchor,
            log_pos,
        });
        Ok(())
    }

    fn peek_value(&self) -> Result<&Value, VmError> {
        match self.contract.stack.peek(0).map_err(|_| VmError::Underflow)? {
            Item::Value(v) => Ok(v),
            _ => Err(VmError::Type),
        }
    }

    fn op_amount(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let amount = self.peek_value()?.amount;
        self.contract.stack.push(Item::Int(amount));
        Ok(())
    }

    fn op_assetid(&mut self) -> Result<(), VmError> {
        let asset_id = self.peek_value()?.asset_id.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(asset_id.len()))?;
        self.contract.stack.push(Item::Bytes(asset_id));
        Ok(())
    }

    fn op_anchor(&mut self) -> Result<(), VmError> {
        let anchor = self.peek_value()?.anchor.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(anchor.len()))?;
        self.contract.stack.push(Item::Bytes(anchor));
        Ok(())
    }

    // Crypto.

    fn op_vmhash(&mut self) -> Result<(), VmError> {
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::HASH_PUSH_COST)?;
        let data = self.pop_bytes()?;
        let tag = self.pop_bytes()?;
        let hash = vm_hash(&tag, &data);
        self.contract.stack.push(Item::Bytes(Bytes::from(hash.0)));
        Ok(())
    }

    fn op_hash(&mut self, f: impl FnOnce(&[u8]) -> Hash) -> Result<(), VmError> {
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::HASH_PUSH_COST)?;
        let data = self.pop_bytes()?;
        let hash = f(&data);
        self.contract.stack.push(Item::Bytes(Bytes::from(hash.0)));
        Ok(())
    }

    fn op_checksig(&mut self) -> Result<(), VmError> {
        let ext = self.pop_int()?;
        let sig = self.pop_bytes()?;
        let pubkey = self.pop_bytes()?;
        let msg = self.pop_bytes()?;
        if ext != 0 {
            return Err(VmError::Ext);
        }
        // An empty signature is a negative answer, not a fault; it lets
        // multisig programs count missing signatures.
        if sig.is_empty() {
            self.runlimit.charge(runlimit::BASE_COST)?;
            self.contract.stack.push(Item::Int(0));
            return Ok(());
        }
        if pubkey.len() != PUBLIC_KEY_LEN {
            return Err(VmError::PubSize);
        }
        if sig.len() != SIGNATURE_LEN {
            return Err(VmError::SigSize);
        }
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::CHECKSIG_COST)?;
        if !key_pair::verify(&pubkey, &msg, &sig) {
            return Err(VmError::Signature);
        }
        self.contract.stack.push(Item::Int(1));
        Ok(())
    }

    // Log and transaction ID.

    fn op_log(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        let item = self.pop_data()?;
        self.runlimit
            .charge(runlimit::BASE_COST + item.encoded_len() as i64)?;
        let entry = Tuple::new(vec![
            Self::code_bytes(LOG_LOG_CODE),
            Item::Bytes(self.contract.seed.clone()),
            item,
        ]);
        self.log_append(entry)?;
        Ok(())
    }

    fn op_peeklog(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let i = self.pop_int()?;
        if i < 0 || i as usize >= self.log.len() {
            return Err(VmError::Range);
        }
        let entry = Item::Tuple(self.log[i as usize].clone());
        self.runlimit.charge(Self::copy_cost(&entry))?;
        self.contract.stack.push(entry);
        Ok(())
    }

    fn op_txid(&mut self) -> Result<(), VmError> {
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::HASH_PUSH_COST)?;
        let tx_id = self.tx_id.ok_or(VmError::Unfinalized)?;
        self.contract.stack.push(Item::Bytes(Bytes::from(tx_id.0)));
        Ok(())
    }

    fn op_finalize(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::FINALIZE_RECORD_COST)?;
        let anchor_value = self.pop_value()?;
        if !anchor_value.is_zero() {
            return Err(VmError::AnchorVal);
        }
        if !self.argstack.is_empty() {
            return Err(VmError::NonEmpty);
        }

        self.log_append(Tuple::new(vec![
            Self::code_bytes(FINALIZE_LOG_CODE),
            self.caller_bytes(),
            Item::Int(self.tx_version as i64),
            Item::Bytes(anchor_value.anchor.clone()),
        ]))?;
        self.finalized = true;
        self.anchor = Some(anchor_value.anchor);

        // The transaction ID commits to the full log.
        let mut hasher = Hash::sha3();
        for entry in &self.log {
            hasher.update(&Item::Tuple(entry.clone()).encoded());
        }
        self.tx_id = Some(hasher.finalize());

        if self.stop_after_finalize {
            self.stopped = true;
        }
        Ok(())
    }

    // Control flow.

    fn op_verify(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let item = self.pop_data()?;
        if !item.is_true() {
            return Err(VmError::VerifyFail);
        }
        Ok(())
    }

    fn op_jumpif(&mut self, prog_len: usize, pc: &mut usize) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let offset = self.pop_int()?;
        let cond = self.pop_data()?;
        if !cond.is_true() {
            return Ok(());
        }
        let dest = (*pc as i64).checked_add(offset).ok_or(VmError::IntOverflow)?;
        if dest < 0 || dest as usize > prog_len {
            return Err(VmError::Jump);
        }
        *pc = dest as usize;
        Ok(())
    }

    fn op_exec(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let prog = self.pop_bytes()?;
        self.exec_program(&prog)
    }

    fn op_call(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let callee = match self.contract.stack.pop()? {
            // A wrapped contract cannot be re-entered directly; it has to
            // round-trip through the snapshot via output and input.
            Item::Contract(c) if c.kind == ContractKind::Plain => c,
            _ => return Err(VmError::Type),
        };

        let frame = Frame {
            kind: callee.kind,
            seed: callee.seed,
            program: callee.program,
            stack: Stack::from(callee.stack),
            complete: false,
        };
        let saved_frame = std::mem::replace(&mut self.contract, frame);
        let saved_caller = std::mem::replace(&mut self.caller, saved_frame.seed.clone());

        let prog = self.contract.program.clone();
        self.exec_program(&prog)?;

        // A callee that ran off the end of its program must have consumed
        // its whole stack; one that terminated via yield/wrap/output moved
        // the stack elsewhere.
        if !self.contract.complete && !self.stopped && !self.contract.stack.is_empty() {
            return Err(VmError::NonEmpty);
        }

        self.contract = saved_frame;
        self.caller = saved_caller;
        Ok(())
    }

    /// `yield` and `wrap`: terminate the current frame, moving it (with its
    /// remaining stack and a replacement program) onto the argument stack.
    fn op_yield(&mut self, kind: ContractKind) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let program = self.pop_bytes()?;
        if kind == ContractKind::Wrapped {
            for item in self.contract.stack.iter() {
                if !item.is_portable() {
                    return Err(VmError::Unportable);
                }
            }
        }
        let record = ContractRecord {
            kind,
            seed: self.contract.seed.clone(),
            program,
            stack: self.contract.stack.take_all(),
        };
        self.argstack.push(Item::Contract(record));
        self.contract.complete = true;
        Ok(())
    }

    fn op_input(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        let tuple = self.pop_tuple()?;
        let record = item::contract_from_tuple(&tuple)?;
        self.runlimit.charge(
            runlimit::BASE_COST + runlimit::CREATE_COST + runlimit::INPUT_RECORD_COST,
        )?;

        let id = vm_hash(SNAPSHOT_TAG, &Item::Tuple(tuple).encoded());
        let log_pos = self.log_append(Tuple::new(vec![
            Self::code_bytes(INPUT_LOG_CODE),
            self.caller_bytes(),
            Item::Bytes(Bytes::from(id.0)),
        ]))?;

        self.contract_actions.push(ContractAction::Input(id));
        self.inputs.push(InputRecord {
            id,
            seed: record.seed.clone(),
            program: record.program.clone(),
            stack: record.stack.clone(),
            log_pos,
        });
        self.contract.stack.push(Item::Contract(record));
        Ok(())
    }

    fn op_output(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        let program = self.pop_bytes()?;
        for item in self.contract.stack.iter() {
            if !item.is_portable() {
                return Err(VmError::Unportable);
            }
        }
        let record = ContractRecord {
            kind: self.contract.kind,
            seed: self.contract.seed.clone(),
            program,
            stack: self.contract.stack.take_all(),
        };
        let snapshot = Item::Contract(record);
        let encoded = snapshot.inspect().encoded();
        let record = match snapshot {
            Item::Contract(r) => r,
            _ => unreachable!(),
        };
        self.runlimit.charge(
            runlimit::BASE_COST
                + runlimit::OUTPUT_RECORD_COST
                + bytes_cost(encoded.len()),
        )?;

        let id = vm_hash(SNAPSHOT_TAG, &encoded);
        let log_pos = self.log_append(Tuple::new(vec![
            Self::code_bytes(OUTPUT_LOG_CODE),
            self.caller_bytes(),
            Item::Bytes(Bytes::from(id.0)),
        ]))?;

        self.contract_actions.push(ContractAction::Output(id));
        self.outputs.push(OutputRecord {
            id,
            seed: record.seed,
            program: record.program,
            stack: record.stack,
            log_pos,
        });
        self.contract.complete = true;
        Ok(())
    }

    fn op_contract(&mut self) -> Result<(), VmError> {
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::CREATE_COST)?;
        let program = self.pop_bytes()?;
        let seed = contract_seed(&program);
        self.contract.stack.push(Item::Contract(ContractRecord {
            kind: ContractKind::Plain,
            seed: Bytes::from(seed.0),
            program,
            stack: Vec::new(),
        }));
        Ok(())
    }

    fn op_seed(&mut self) -> Result<(), VmError> {
        let seed = match self.contract.stack.peek(0).map_err(|_| VmError::Underflow)? {
            Item::Contract(c) => c.seed.clone(),
            _ => return Err(VmError::Type),
        };
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(seed.len()))?;
        self.contract.stack.push(Item::Bytes(seed));
        Ok(())
    }

    fn op_self(&mut self) -> Result<(), VmError> {
        let seed = self.contract.seed.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(seed.len()))?;
        self.contract.stack.push(Item::Bytes(seed));
        Ok(())
    }

    fn op_caller(&mut self) -> Result<(), VmError> {
        let caller = self.caller.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(caller.len()))?;
        self.contract.stack.push(Item::Bytes(caller));
        Ok(())
    }

    fn op_contractprogram(&mut self) -> Result<(), VmError> {
        let program = self.contract.program.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(program.len()))?;
        self.contract.stack.push(Item::Bytes(program));
        Ok(())
    }

    fn op_timerange(&mut self) -> Result<(), VmError> {
        if self.finalized {
            return Err(VmError::Finalized);
        }
        self.runlimit
            .charge(runlimit::BASE_COST + runlimit::TIMERANGE_RECORD_COST)?;
        let max_ms = self.pop_int()?;
        let min_ms = self.pop_int()?;
        self.log_append(Tuple::new(vec![
            Self::code_bytes(TIMERANGE_LOG_CODE),
            self.caller_bytes(),
            Item::Int(min_ms),
            Item::Int(max_ms),
        ]))?;
        self.timeranges.push(TimerangeRecord { min_ms, max_ms });
        Ok(())
    }

    // Data.

    fn op_eq(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let b = self.pop_data()?;
        let a = self.pop_data()?;
        // Only scalars compare equal; tuples always compare false so that
        // programs cannot branch on deep structure cheaply.
        let equal = match (&a, &b) {
            (Item::Int(x), Item::Int(y)) => x == y,
            (Item::Bytes(x), Item::Bytes(y)) => x == y,
            _ => false,
        };
        self.contract.stack.push(Item::Int(equal as i64));
        Ok(())
    }

    fn op_dup(&mut self) -> Result<(), VmError> {
        let item = self.contract.stack.peek(0).map_err(|_| VmError::Underflow)?;
        if !item.is_data() {
            return Err(VmError::Type);
        }
        let copy = item.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + Self::copy_cost(&copy))?;
        self.contract.stack.push(copy);
        Ok(())
    }

    fn op_drop(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        match self.contract.stack.pop()? {
            item if item.is_data() => Ok(()),
            Item::Value(v) if v.is_zero() => Ok(()),
            _ => Err(VmError::Type),
        }
    }

    fn op_peek(&mut self) -> Result<(), VmError> {
        let n = self.pop_int()?;
        let item = self.contract.stack.peek(n).map_err(|_| VmError::Underflow)?;
        if !item.is_data() {
            return Err(VmError::Type);
        }
        let copy = item.clone();
        self.runlimit
            .charge(runlimit::BASE_COST + Self::copy_cost(&copy))?;
        self.contract.stack.push(copy);
        Ok(())
    }

    fn op_tuple(&mut self) -> Result<(), VmError> {
        let n = self.pop_int()?;
        if n < 0 {
            return Err(VmError::StackRange);
        }
        self.runlimit.charge(runlimit::BASE_COST + n + 1)?;
        let mut items = Vec::with_capacity(n as usize);
        for _ in 0..n {
            items.push(self.pop_data()?);
        }
        items.reverse();
        self.contract.stack.push(Item::Tuple(Tuple::new(items)));
        Ok(())
    }

    fn op_untuple(&mut self) -> Result<(), VmError> {
        let tuple = self.pop_tuple()?;
        let n = tuple.len() as i64;
        self.runlimit.charge(runlimit::BASE_COST + n)?;
        for item in tuple.iter() {
            self.contract.stack.push(item.clone());
        }
        self.contract.stack.push(Item::Int(n));
        Ok(())
    }

    fn op_len(&mut self) -> Result<(), VmError> {
        self.runlimit.charge(runlimit::BASE_COST)?;
        let len = match self.pop_data()? {
            Item::Bytes(b) => b.len(),
            Item::Tuple(t) => t.len(),
            Item::Int(_) => return Err(VmError::Type),
            _ => unreachable!("pop_data returned a resource"),
        };
        self.contract.stack.push(Item::Int(len as i64));
        Ok(())
    }

    fn op_field(&mut self) -> Result<(), VmError> {
        let i = self.pop_int()?;
        let tuple = self.pop_tuple()?;
        if i < 0 || i as usize >= tuple.len() {
            return Err(VmError::Range);
        }
        let item = tuple.get(i as usize).cloned().expect("index checked");
        self.runlimit
            .charge(runlimit::BASE_COST + Self::copy_cost(&item))?;
        self.contract.stack.push(item);
        Ok(())
    }

    fn op_encode(&mut self) -> Result<(), VmError> {
        let item = self.pop_data()?;
        let encoded = item.encoded();
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(encoded.len()))?;
        self.contract.stack.push(Item::Bytes(Bytes::from_vec(encoded)));
        Ok(())
    }

    fn op_cat(&mut self) -> Result<(), VmError> {
        let b = self.pop_bytes()?;
        let a = self.pop_bytes()?;
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(a.len() + b.len()))?;
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);
        self.contract.stack.push(Item::Bytes(Bytes::from_vec(joined)));
        Ok(())
    }

    fn op_slice(&mut self) -> Result<(), VmError> {
        let end = self.pop_int()?;
        let start = self.pop_int()?;
        let bytes = self.pop_bytes()?;
        if start < 0 || end < start || end as usize > bytes.len() {
            return Err(VmError::SliceRange);
        }
        let slice = &bytes[start as usize..end as usize];
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(slice.len()))?;
        self.contract.stack.push(Item::Bytes(Bytes::from(slice)));
        Ok(())
    }

    fn op_bitnot(&mut self) -> Result<(), VmError> {
        let bytes = self.pop_bytes()?;
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(bytes.len()))?;
        let inverted: Vec<u8> = bytes.iter().map(|b| !b).collect();
        self.contract
            .stack
            .push(Item::Bytes(Bytes::from_vec(inverted)));
        Ok(())
    }

    fn op_bitwise(&mut self, f: impl Fn(u8, u8) -> u8) -> Result<(), VmError> {
        let b = self.pop_bytes()?;
        let a = self.pop_bytes()?;
        if a.len() != b.len() {
            return Err(VmError::Range);
        }
        self.runlimit
            .charge(runlimit::BASE_COST + bytes_cost(a.len()))?;
        let combined: Vec<u8> = a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect();
        self.contract
            .stack
            .push(Item::Bytes(Bytes::from_vec(combined)));
        Ok(())
    }
}

//! Parses a finished transaction's log back into typed records.
//!
//! The standard contracts annotate their value-flow records with `L`
//! entries carrying a refdata payload; this module recognizes those
//! annotations by the contract seeds exported from
//! [`standard`](crate::contracts::standard) and reassembles outputs,
//! inputs, issuances, and retirements into structures a wallet or indexer
//! can use. Records produced by non-standard contracts still appear, just
//! without the optional annotation-derived fields.

use crate::contracts::standard;
use crate::core::transaction::Tx;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::virtual_machine::item::{Item, Tuple};
use crate::virtual_machine::vm::{LOG_LOG_CODE, NONCE_LOG_CODE, TIMERANGE_LOG_CODE};

/// A value triple parsed from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub asset_id: Bytes,
    pub amount: i64,
    pub anchor: Bytes,
}

/// An output created by the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub log_pos: usize,
    pub output_id: Hash,
    /// The locked value, when the output follows the standard layout.
    pub value: Option<Value>,
    /// Quorum and pubkeys, when the output follows the standard layout.
    pub quorum: Option<i64>,
    pub pubkeys: Vec<Bytes>,
    /// The lock annotation, when present.
    pub ref_data: Option<Bytes>,
}

/// An output spent by the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub output_id: Hash,
    pub value: Option<Value>,
    pub quorum: Option<i64>,
    pub pubkeys: Vec<Bytes>,
    pub ref_data: Option<Bytes>,
}

/// Units minted by the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuance {
    pub value: Value,
    /// Caller and self seeds recorded by the anchoring nonce, when the
    /// issuance immediately follows one.
    pub nonce_caller_seed: Option<Bytes>,
    pub nonce_self_seed: Option<Bytes>,
    pub nonce_block_id: Option<Bytes>,
    pub nonce_exp_ms: Option<i64>,
    pub timerange_min_ms: Option<i64>,
    pub timerange_max_ms: Option<i64>,
    pub ref_data: Option<Bytes>,
}

/// Units burned by the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retirement {
    pub value: Value,
    pub ref_data: Option<Bytes>,
}

/// Everything parseable from one transaction's log.
#[derive(Debug, Clone, Default)]
pub struct TxResult {
    pub outputs: Vec<Output>,
    pub inputs: Vec<Input>,
    pub issuances: Vec<Issuance>,
    pub retirements: Vec<Retirement>,
}

impl TxResult {
    /// Parses `tx`'s records and annotations.
    pub fn parse(tx: &Tx) -> TxResult {
        let mut result = TxResult::default();

        for out in &tx.outputs {
            let mut parsed = Output {
                log_pos: out.log_pos,
                output_id: out.id,
                value: None,
                quorum: None,
                pubkeys: Vec::new(),
                ref_data: None,
            };
            if out.seed.as_slice() == standard::pay_to_multisig_seed().as_slice() {
                if let Some((quorum, pubkeys, value)) = parse_multisig_stack(&out.stack) {
                    parsed.quorum = Some(quorum);
                    parsed.pubkeys = pubkeys;
                    parsed.value = Some(value);
                }
                // The lock annotation lands immediately before the output
                // record.
                parsed.ref_data = out
                    .log_pos
                    .checked_sub(1)
                    .and_then(|pos| annotation(tx, pos, Some(&out.seed)));
            }
            result.outputs.push(parsed);
        }

        for input in &tx.inputs {
            let mut parsed = Input {
                output_id: input.id,
                value: None,
                quorum: None,
                pubkeys: Vec::new(),
                ref_data: None,
            };
            if input.seed.as_slice() == standard::pay_to_multisig_seed().as_slice() {
                if let Some((quorum, pubkeys, value)) = parse_multisig_stack(&input.stack) {
                    parsed.quorum = Some(quorum);
                    parsed.pubkeys = pubkeys;
                    parsed.value = Some(value);
                }
                // The spend annotation follows the input record.
                parsed.ref_data = annotation(tx, input.log_pos + 1, Some(&input.seed));
            }
            result.inputs.push(parsed);
        }

        for issuance in &tx.issuances {
            let mut parsed = Issuance {
                value: Value {
                    asset_id: issuance.asset_id.clone(),
                    amount: issuance.amount,
                    anchor: issuance.anchor.clone(),
                },
                nonce_caller_seed: None,
                nonce_self_seed: None,
                nonce_block_id: None,
                nonce_exp_ms: None,
                timerange_min_ms: None,
                timerange_max_ms: None,
                ref_data: annotation(tx, issuance.log_pos + 1, None),
            };
            // A standard issuance is anchored by a nonce two entries back
            // (the nonce's own entry, then its time range).
            if issuance.log_pos >= 2 {
                if let Some(nonce) = nonce_entry(tx, issuance.log_pos - 2) {
                    parsed.nonce_caller_seed = Some(nonce.0);
                    parsed.nonce_self_seed = Some(nonce.1);
                    parsed.nonce_block_id = Some(nonce.2);
                    parsed.nonce_exp_ms = Some(nonce.3);
                }
                if let Some((min_ms, max_ms)) = timerange_entry(tx, issuance.log_pos - 1) {
                    parsed.timerange_min_ms = Some(min_ms);
                    parsed.timerange_max_ms = Some(max_ms);
                }
            }
            result.issuances.push(parsed);
        }

        for retirement in &tx.retirements {
            result.retirements.push(Retirement {
                value: Value {
                    asset_id: retirement.asset_id.clone(),
                    amount: retirement.amount,
                    anchor: retirement.anchor.clone(),
                },
                ref_data: annotation(
                    tx,
                    retirement.log_pos + 1,
                    Some(&Bytes::from(standard::retire_seed().0)),
                ),
            });
        }

        result
    }
}

/// Parses the persisted stack of a standard output:
/// `[QUORUM PUBKEYn ... PUBKEY1 N VALUE]`.
fn parse_multisig_stack(stack: &[Item]) -> Option<(i64, Vec<Bytes>, Value)> {
    if stack.len() < 3 {
        return None;
    }
    let quorum = match stack.first() {
        Some(Item::Int(q)) => *q,
        _ => return None,
    };
    let value = match stack.last() {
        Some(Item::Value(v)) => Value {
            asset_id: v.asset_id.clone(),
            amount: v.amount,
            anchor: v.anchor.clone(),
        },
        _ => return None,
    };
    let n = match stack.get(stack.len() - 2) {
        Some(Item::Int(n)) => *n,
        _ => return None,
    };
    let key_items = &stack[1..stack.len() - 2];
    if key_items.len() != n as usize {
        return None;
    }
    let mut pubkeys = Vec::with_capacity(key_items.len());
    // The stack holds PUBKEYn first; report them in ascending order.
    for item in key_items.iter().rev() {
        match item {
            Item::Bytes(pk) => pubkeys.push(pk.clone()),
            _ => return None,
        }
    }
    Some((quorum, pubkeys, value))
}

/// Reads the refdata out of an `L` annotation entry at `pos`, optionally
/// requiring the emitting seed.
fn annotation(tx: &Tx, pos: usize, want_seed: Option<&Bytes>) -> Option<Bytes> {
    let entry = tx.log.get(pos)?;
    if !entry_has_code(entry, LOG_LOG_CODE) || entry.len() != 3 {
        return None;
    }
    if let Some(want) = want_seed {
        match entry.get(1) {
            Some(Item::Bytes(seed)) if seed == want => {}
            _ => return None,
        }
    }
    match entry.get(2) {
        Some(Item::Bytes(data)) => Some(data.clone()),
        _ => None,
    }
}

/// Reads `(caller, self, block_id, exp_ms)` from an `N` entry at `pos`.
fn nonce_entry(tx: &Tx, pos: usize) -> Option<(Bytes, Bytes, Bytes, i64)> {
    let entry = tx.log.get(pos)?;
    if !entry_has_code(entry, NONCE_LOG_CODE) || entry.len() != 5 {
        return None;
    }
    match (entry.get(1), entry.get(2), entry.get(3), entry.get(4)) {
        (
            Some(Item::Bytes(caller)),
            Some(Item::Bytes(own)),
            Some(Item::Bytes(block_id)),
            Some(Item::Int(exp_ms)),
        ) => Some((caller.clone(), own.clone(), block_id.clone(), *exp_ms)),
        _ => None,
    }
}

/// Reads `(min_ms, max_ms)` from an `R` entry at `pos`.
fn timerange_entry(tx: &Tx, pos: usize) -> Option<(i64, i64)> {
    let entry = tx.log.get(pos)?;
    if !entry_has_code(entry, TIMERANGE_LOG_CODE) || entry.len() != 4 {
        return None;
    }
    match (entry.get(2), entry.get(3)) {
        (Some(Item::Int(min_ms)), Some(Item::Int(max_ms))) => Some((*min_ms, *max_ms)),
        _ => None,
    }
}

fn entry_has_code(entry: &Tuple, code: u8) -> bool {
    matches!(entry.get(0), Some(Item::Bytes(c)) if c.as_slice() == [code])
}

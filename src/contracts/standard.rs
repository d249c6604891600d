//! The standard contract library: pay-to-multisig locking, issuance, and
//! retirement programs, plus their identifying seeds.
//!
//! All signature checking is deferred: a contract that needs signatures
//! yields a check clause onto the argument stack, the transaction
//! finalizes, and only then are signatures (over a caller-chosen program,
//! typically a pay-to-txid check) supplied and the clause called. That way
//! the signed message can commit to the final transaction ID.
//!
//! Each program logs a caller-supplied refdata annotation next to the
//! record it produces; [`crate::contracts::result`] finds those annotations
//! by the seeds exported here.

use crate::types::bytes::Bytes;
use crate::types::hash::{vm_hash, Hash};
use crate::utils::hex;
use crate::virtual_machine::assembler::assemble;
use crate::virtual_machine::item::{Item, Tuple};
use crate::virtual_machine::vm::{contract_seed, ASSET_ID_TAG};
use std::sync::OnceLock;

/// The deferred multisig check clause.
///
/// Runs with `[QUORUM PUBKEYn ... PUBKEY1 N]` on the contract stack and
/// `[SIGn ... SIG1 PROGRAM]` on the argument stack: counts valid signatures
/// over PROGRAM, requires the count to equal the quorum, then executes
/// PROGRAM.
const MULTISIG_CLAUSE_SRC: &str = "
    get          # con: [QUORUM PUBKEYn ... PUBKEY1 N PROGRAM]
    0            # running count of valid signatures
    2 roll       # con: [QUORUM PUBKEYn ... PUBKEY1 PROGRAM 0 N]
    $sigstart
        dup 0 eq
        jumpif:$sigend
        2 peek   # the program is the signed message
        4 roll   # next pubkey
        get      # next signature
        0 checksig
        2 roll add
        swap 1 sub
        jump:$sigstart
    $sigend
    drop
    2 roll       # con: [PROGRAM <count> QUORUM]
    eq verify
    exec
";

fn multisig_clause_hex() -> &'static str {
    static CLAUSE: OnceLock<String> = OnceLock::new();
    CLAUSE.get_or_init(|| {
        let prog = assemble(MULTISIG_CLAUSE_SRC).expect("clause source is well-formed");
        hex::encode(&prog)
    })
}

/// The program persisted inside every standard output.
///
/// Spending it (via `input` and `call`) logs the spend refdata, exports the
/// locked value, and yields the multisig clause over the recorded quorum
/// and pubkeys.
pub fn unlock_program() -> &'static [u8] {
    static PROG: OnceLock<Vec<u8>> = OnceLock::new();
    PROG.get_or_init(|| {
        let src = format!(
            "
            get log      # spend refdata annotation
            put          # export the locked value
            [{clause}] yield
            ",
            clause = MULTISIG_CLAUSE_SRC
        );
        assemble(&src).expect("unlock source is well-formed")
    })
}

/// The pay-to-multisig locking program.
///
/// Expects `[VALUE PUBKEY1 ... PUBKEYn N QUORUM REFDATA]` on the argument
/// stack: logs the refdata annotation, gathers the quorum and pubkeys onto
/// the contract stack, takes the value, and persists everything as an
/// output whose program is [`unlock_program`].
pub fn pay_to_multisig_program() -> &'static [u8] {
    static PROG: OnceLock<Vec<u8>> = OnceLock::new();
    PROG.get_or_init(|| {
        let src = format!(
            "
            get log       # lock refdata annotation
            get get       # con: [QUORUM N]
            dup
            $pkstart
                dup 0 eq
                jumpif:$pkend
                get 2 bury    # pull the next pubkey under the counters
                1 sub
                jump:$pkstart
            $pkend
            drop get      # con: [QUORUM PUBKEYn ... PUBKEY1 N VALUE]
            x'{unlock}' output
            ",
            unlock = hex::encode(unlock_program())
        );
        assemble(&src).expect("lock source is well-formed")
    })
}

/// Seed identifying standard outputs (and their spends) in the log.
pub fn pay_to_multisig_seed() -> Hash {
    static SEED: OnceLock<Hash> = OnceLock::new();
    *SEED.get_or_init(|| contract_seed(pay_to_multisig_program()))
}

/// The issuance program for a fixed signer set.
///
/// The quorum and pubkeys are baked into the program, so the contract seed
/// - and with it the asset ID - commits to the issuance policy. Expects
/// `[REFDATA TAG AMOUNT ZEROVAL]` on the argument stack.
pub fn issue_program(quorum: i32, pubkeys: &[[u8; 32]]) -> Vec<u8> {
    let mut pushes = String::new();
    for pk in pubkeys.iter().rev() {
        pushes.push_str(&format!("x'{}' ", hex::encode(pk)));
    }
    let src = format!(
        "
        get get get issue   # mint against this contract's seed
        get log             # issue refdata annotation
        put                 # export the minted value
        {quorum} {pushes}{n}
        [{clause}] yield
        ",
        quorum = quorum,
        pushes = pushes,
        n = pubkeys.len(),
        clause = MULTISIG_CLAUSE_SRC
    );
    assemble(&src).expect("issue source is well-formed")
}

/// Seed of the issuance contract for a signer set.
pub fn issue_seed(quorum: i32, pubkeys: &[[u8; 32]]) -> Hash {
    contract_seed(&issue_program(quorum, pubkeys))
}

/// The asset ID minted by the standard issuance contract for the given
/// signer set and asset tag.
pub fn asset_id(quorum: i32, pubkeys: &[[u8; 32]], tag: &[u8]) -> Hash {
    let seed = issue_seed(quorum, pubkeys);
    let id_tuple = Item::Tuple(Tuple::new(vec![
        Item::Bytes(Bytes::from(seed.0)),
        Item::Bytes(Bytes::from(tag)),
    ]));
    vm_hash(ASSET_ID_TAG, &id_tuple.encoded())
}

/// The retirement program.
///
/// Expects `[REFDATA VALUE]` on the argument stack: burns the value and
/// logs the refdata annotation right after the retirement record.
pub fn retire_program() -> &'static [u8] {
    static PROG: OnceLock<Vec<u8>> = OnceLock::new();
    PROG.get_or_init(|| assemble("get retire get log").expect("retire source is well-formed"))
}

/// Seed identifying standard retirements in the log.
pub fn retire_seed() -> Hash {
    static SEED: OnceLock<Hash> = OnceLock::new();
    *SEED.get_or_init(|| contract_seed(retire_program()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::transaction::Tx;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::keypair;
    use crate::virtual_machine::vm::ContractAction;

    pub(crate) const RUNLIMIT: i64 = 1_000_000;

    /// Assembles and fully validates a transaction whose deferred clause
    /// signatures are supplied by `signers`, pay-to-txid style: first runs
    /// the source up to `finalize` to learn the ID, then appends the signed
    /// program and the clause call.
    pub(crate) fn finish_with_signatures(src: &str, signers: &[&PrivateKey]) -> Tx {
        let partial = assemble(src).expect("source assembles");
        let tx = Tx::new_stopping_at_finalize(&partial, 3, RUNLIMIT).expect("prefix validates");
        assert!(tx.finalized, "prefix must finalize");

        let check_src = format!("txid x'{}' eq verify", tx.id);
        let check_prog = assemble(&check_src).unwrap();

        let mut full = src.to_string();
        // The clause pops signatures after the program, so push them first.
        for signer in signers.iter().rev() {
            full.push_str(&format!(" x'{}' put", hex::encode(&signer.sign(&check_prog))));
        }
        full.push_str(&format!(" [{}] put call", check_src));

        let full_prog = assemble(&full).expect("full source assembles");
        Tx::new(&full_prog, 3, RUNLIMIT).expect("full transaction validates")
    }

    pub(crate) fn issuance_source(key: &PrivateKey, tag: &str, amount: u64) -> String {
        let pk = key.public_key().to_bytes();
        format!(
            "
            'issue refdata' put
            '{tag}' put
            {amount} put
            x'{blockid}' 20 nonce put
            x'{issue}' contract call

            get get             # con: [CLAUSE VALUE]
            splitzero swap      # con: [CLAUSE ZEROVAL VALUE]
            put                 # arg: [VALUE]
            x'{recipient}' put 1 put 1 put
            'lock refdata' put
            x'{lock}' contract call

            finalize
            ",
            tag = tag,
            amount = amount,
            blockid = hex::encode(&[0u8; 32]),
            issue = hex::encode(&issue_program(1, &[pk])),
            recipient = hex::encode(&[0x11u8; 32]),
            lock = hex::encode(pay_to_multisig_program()),
        )
    }

    #[test]
    fn programs_assemble_and_seeds_are_stable() {
        assert!(!unlock_program().is_empty());
        assert!(!pay_to_multisig_program().is_empty());
        assert!(!retire_program().is_empty());
        assert_eq!(pay_to_multisig_seed(), pay_to_multisig_seed());
        assert_ne!(pay_to_multisig_seed(), retire_seed());
    }

    #[test]
    fn asset_id_commits_to_the_signer_set_and_tag() {
        let a = keypair(1).public_key().to_bytes();
        let b = keypair(2).public_key().to_bytes();
        assert_eq!(asset_id(1, &[a], b"x"), asset_id(1, &[a], b"x"));
        assert_ne!(asset_id(1, &[a], b"x"), asset_id(1, &[a], b"y"));
        assert_ne!(asset_id(1, &[a], b"x"), asset_id(1, &[b], b"x"));
        assert_ne!(asset_id(1, &[a, b], b"x"), asset_id(2, &[a, b], b"x"));
    }

    #[test]
    fn issuance_roundtrip_mints_and_locks() {
        let issuer = keypair(7);
        let tx = finish_with_signatures(&issuance_source(&issuer, "tag", 10), &[&issuer]);

        assert!(tx.finalized);
        assert_eq!(tx.issuances.len(), 1);
        assert_eq!(tx.issuances[0].amount, 10);
        let want_asset = asset_id(1, &[issuer.public_key().to_bytes()], b"tag");
        assert_eq!(tx.issuances[0].asset_id, Bytes::from(want_asset.0));

        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].seed, Bytes::from(pay_to_multisig_seed().0));
        assert_eq!(
            tx.contracts,
            vec![ContractAction::Output(tx.outputs[0].id)]
        );
    }

    #[test]
    fn issuance_with_a_wrong_signature_faults() {
        let issuer = keypair(7);
        let stranger = keypair(8);
        let src = issuance_source(&issuer, "tag", 10);

        let partial = assemble(&src).unwrap();
        let tx = Tx::new_stopping_at_finalize(&partial, 3, RUNLIMIT).unwrap();
        let check_src = format!("txid x'{}' eq verify", tx.id);
        let check_prog = assemble(&check_src).unwrap();

        let full = format!(
            "{} x'{}' put [{}] put call",
            src,
            hex::encode(&stranger.sign(&check_prog)),
            check_src
        );
        let full_prog = assemble(&full).unwrap();
        assert!(Tx::new(&full_prog, 3, RUNLIMIT).is_err());
    }

    #[test]
    fn spend_unlocks_value_and_relocks_it() {
        let owner = keypair(3);
        let owner_pk = owner.public_key().to_bytes();
        let asset = asset_id(1, &[owner_pk], b"tag");

        // Fabricate the inspection tuple of a standard output holding 10
        // units for `owner`, as if it were already in the UTXO set.
        let output_tuple = format!(
            "{{'C', x'{seed}', x'{unlock}', {{'Z', 1}}, {{'S', x'{pk}'}}, {{'Z', 1}}, \
             {{'V', 10, x'{asset}', 'anchoranchoranchoranchoranchoran'}}}}",
            seed = pay_to_multisig_seed(),
            unlock = hex::encode(unlock_program()),
            pk = hex::encode(&owner_pk),
            asset = asset,
        );

        let recipient = keypair(4);
        let src = format!(
            "
            'spend refdata' put
            {output} input call

            get get             # con: [CLAUSE VALUE]
            splitzero swap put  # anchor value stays, spent value exported
            x'{new_pk}' put 1 put 1 put
            'relock refdata' put
            x'{lock}' contract call

            finalize
            ",
            output = output_tuple,
            new_pk = hex::encode(&recipient.public_key().to_bytes()),
            lock = hex::encode(pay_to_multisig_program()),
        );
        let tx = finish_with_signatures(&src, &[&owner]);

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].seed, Bytes::from(pay_to_multisig_seed().0));
        assert_eq!(tx.outputs.len(), 1);
        assert!(matches!(tx.contracts[0], ContractAction::Input(_)));
        assert!(matches!(tx.contracts[1], ContractAction::Output(_)));
    }

    #[test]
    fn two_of_three_multisig_spend() {
        let keys = [keypair(11), keypair(12), keypair(13)];
        let pks: Vec<[u8; 32]> = keys.iter().map(|k| k.public_key().to_bytes()).collect();

        let output_tuple = format!(
            "{{'C', x'{seed}', x'{unlock}', {{'Z', 2}}, \
             {{'S', x'{pk3}'}}, {{'S', x'{pk2}'}}, {{'S', x'{pk1}'}}, {{'Z', 3}}, \
             {{'V', 5, x'{asset}', 'anchoranchoranchoranchoranchoran'}}}}",
            seed = pay_to_multisig_seed(),
            unlock = hex::encode(unlock_program()),
            pk1 = hex::encode(&pks[0]),
            pk2 = hex::encode(&pks[1]),
            pk3 = hex::encode(&pks[2]),
            asset = asset_id(1, &[pks[0]], b"t"),
        );

        // Retire the whole value; two signatures satisfy the quorum. An
        // empty signature counts as a missing signer.
        let src = format!(
            "
            'spend refdata' put
            {output} input call
            get get
            splitzero swap
            'retire refdata' put put
            x'{retire}' contract call
            finalize
            ",
            output = output_tuple,
            retire = hex::encode(retire_program()),
        );

        // Clause pops SIG1 first (for PUBKEY1), then SIG2, SIG3.
        let partial = assemble(&src).unwrap();
        let tx = Tx::new_stopping_at_finalize(&partial, 3, RUNLIMIT).unwrap();
        let check_src = format!("txid x'{}' eq verify", tx.id);
        let check_prog = assemble(&check_src).unwrap();

        let full = format!(
            "{} x'{}' put '' put x'{}' put [{}] put call",
            src,
            hex::encode(&keys[2].sign(&check_prog)), // SIG3, pushed first
            hex::encode(&keys[0].sign(&check_prog)), // SIG1, popped first
            check_src,
        );
        let tx = Tx::new(&assemble(&full).unwrap(), 3, RUNLIMIT).unwrap();
        assert_eq!(tx.retirements.len(), 1);
        assert_eq!(tx.retirements[0].amount, 5);
    }
}

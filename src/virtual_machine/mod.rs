//! The deterministic stack machine and its toolchain.

pub mod assembler;
pub mod errors;
pub mod item;
pub mod opcode;
pub mod runlimit;
pub mod stack;
pub mod vm;

#[cfg(test)]
mod runlimit_tests {
    //! Pins the per-opcode runlimit charges, measured the same way the cost
    //! model was derived: validate the setup alone, then the setup plus the
    //! instruction under test, and compare consumption.

    use crate::virtual_machine::assembler::assemble;
    use crate::virtual_machine::vm::Vm;

    const BUDGET: i64 = 1_000_000;

    fn consumed(src: &str) -> i64 {
        let prog = assemble(src).unwrap_or_else(|e| panic!("assemble {:?}: {}", src, e));
        let vm = Vm::validate(&prog, 3, BUDGET)
            .unwrap_or_else(|e| panic!("validate {:?}: {}", src, e));
        BUDGET - vm.runlimit_remaining()
    }

    fn op_cost(pre: &str, src: &str) -> i64 {
        let base = if pre.is_empty() { 0 } else { consumed(pre) };
        consumed(&format!("{} {}", pre, src)) - base
    }

    #[test]
    fn instruction_costs() {
        let zero32 = "x'0000000000000000000000000000000000000000000000000000000000000000'";
        let issue_one = format!("{} 1 nonce 1 '' issue", zero32);

        let cases: Vec<(&str, String, i64)> = vec![
            ("int", "x'01'".into(), 1),
            ("add", "3 4".into(), 1),
            ("neg", "1".into(), 1),
            ("mul", "3 4".into(), 1),
            ("div", "6 2".into(), 1),
            ("mod", "6 4".into(), 1),
            ("gt", "5 6".into(), 1),
            ("not", "0".into(), 1),
            ("and", "1 0".into(), 1),
            ("or", "1 0".into(), 1),
            ("roll", "4 5 6 7 2".into(), 3),
            ("bury", "4 5 6 7 2".into(), 3),
            ("reverse", "4 5 6 7 2".into(), 3),
            ("get", "5 put".into(), 1),
            ("put", "5".into(), 1),
            ("depth", "4 5 6 7".into(), 1),
            ("nonce", format!("{} 1", zero32), 140),
            (
                "merge",
                format!("{} 1 nonce 1 '' issue {} 2 nonce 2 '' issue", zero32, zero32),
                129,
            ),
            ("split", format!("{} 2", issue_one), 1),
            ("issue", format!("{} 1 nonce 1 ''", zero32), 135),
            ("retire", issue_one.clone(), 7),
            ("amount", issue_one.clone(), 1),
            ("assetid", issue_one.clone(), 34),
            ("anchor", issue_one.clone(), 34),
            ("vmhash", "'foo' 'bar'".into(), 34),
            ("sha256", "'foo'".into(), 34),
            ("sha3", "'foo'".into(), 34),
            (
                "checksig",
                "x'f6c0dadc897db49d891190d6cd9a41f614c17db8189320bfa7dc8d55758ed4ce' \
                 x'4a771e03af3f5705ec280ac8761d568776fb2b650da9067d3f3ef7010b588d41' \
                 x'502a55ab70f4f921cb88650db040dcc93dc07707892aab41b3c12e5a929e2e2750fe557b197ce9bec337fbee8c020c1aa59d7790c3139728ed8ad54708be710e' \
                 0"
                .into(),
                2049,
            ),
            (
                "checksig",
                "x'f6c0dadc897db49d891190d6cd9a41f614c17db8189320bfa7dc8d55758ed4ce' \
                 x'4a771e03af3f5705ec280ac8761d568776fb2b650da9067d3f3ef7010b588d41' \
                 '' 0"
                .into(),
                1,
            ),
            ("log", "'foo'".into(), 5),
            ("txid", format!("{} 1 nonce finalize", zero32), 34),
            ("finalize", format!("{} 1 nonce", zero32), 6),
            ("verify", "1".into(), 1),
            ("jumpif", "1 0".into(), 1),
            ("exec", "''".into(), 1),
            ("call", "'' contract".into(), 1),
            (
                "input",
                "{'C', '', x'2a80d7b52d4abec170d260e79083bc5c97cf17a04dcc0209ca48d02d22b28f6d'}"
                    .into(),
                133,
            ),
            ("contract", "''".into(), 129),
            ("seed", "'' contract".into(), 34),
            ("self", "".into(), 34),
            ("caller", "".into(), 34),
            ("contractprogram", "".into(), 3),
            ("timerange", "1 2".into(), 6),
            ("eq", "2 3".into(), 1),
            ("dup", "5".into(), 1),
            ("drop", "5 6".into(), 1),
            ("peek", "4 5 6 7 0".into(), 1),
            ("tuple", "'a' 'b' 'c' 3".into(), 5),
            ("untuple", "{'a', 'b', 'c'}".into(), 4),
            ("len", "{'a', 'b', 'c'}".into(), 1),
            ("field", "{'a', 'b', 'c'} 0".into(), 3),
            ("encode", "1".into(), 3),
            ("cat", "'foo' 'bar'".into(), 8),
            ("slice", "'foobar' 2 3".into(), 3),
            ("bitnot", "x'01'".into(), 3),
            ("bitand", "x'01' x'02'".into(), 3),
            ("bitor", "x'01' x'02'".into(), 3),
            ("bitxor", "x'01' x'02'".into(), 3),
        ];

        for (src, pre, want) in cases {
            assert_eq!(op_cost(&pre, src), want, "cost of {} after {:?}", src, pre);
        }
    }
}

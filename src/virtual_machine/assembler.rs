//! Assembler and disassembler for VM programs.
//!
//! The text form is a whitespace-separated sequence of:
//!
//! - opcode mnemonics (`add`, `verify`, ...) and a few composite mnemonics
//!   (`bool`, `swap`, `sub`, `splitzero`)
//! - decimal numbers, pushed in canonical int form
//! - byte strings: `'text'`, `"text"`, or hex `x'00ff'`
//! - bracketed subprograms `[ ... ]`, pushed as byte strings
//! - brace tuples `{1, 'a', {2}}`, built with `tuple`
//! - labels `$name` and jumps `jump:$name` / `jumpif:$name`
//! - comments from `#` to end of line
//!
//! Assembly is two-phase: parsing emits fixed byte runs and jump
//! placeholders, then label offsets are resolved iteratively (a placeholder
//! grows from a small-int push to a pushdata form only when its displacement
//! requires it, and growing one can lengthen another, so sizing repeats
//! until stable). Offsets are signed: backward jumps push the magnitude and
//! negate it, since the canonical int form is cheapest for small
//! non-negative values.
//!
//! The disassembler is the left inverse on well-formed programs: it cannot
//! recover labels, so jumps reappear as explicit pushes, but reassembling
//! its output always reproduces the input bytes.

use crate::virtual_machine::item::{self, pushdata_payload};
use crate::virtual_machine::opcode as op;
use std::collections::HashMap;
use std::fmt::Write as _;
use txvm_derive::Error;

/// Errors produced while assembling or disassembling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    /// Unexpected character in the source.
    #[error("line {0}: unexpected character {1:?}")]
    UnexpectedChar(usize, char),
    /// A string or hex literal was not closed.
    #[error("line {0}: unterminated literal")]
    UnterminatedLiteral(usize),
    /// Hex literal with invalid digits or odd length.
    #[error("line {0}: invalid hex literal")]
    BadHex(usize),
    /// Number does not fit a 64-bit signed integer.
    #[error("line {0}: invalid number {1}")]
    BadNumber(usize, String),
    /// Identifier is not an opcode or composite mnemonic.
    #[error("line {0}: unknown opcode {1}")]
    UnknownOpcode(usize, String),
    /// Token is not valid at this position.
    #[error("line {0}: unexpected token {1}")]
    UnexpectedToken(usize, String),
    /// Bracket or brace without a matching opener.
    #[error("line {0}: unbalanced delimiter")]
    Unbalanced(usize),
    /// A label was defined twice.
    #[error("duplicate label {0}")]
    DuplicateLabel(String),
    /// A jump referenced a label that is never defined.
    #[error("undefined label {0}")]
    UndefinedLabel(String),
    /// Bytecode ends inside a pushdata payload.
    #[error("truncated pushdata at offset {0}")]
    Truncated(usize),
}

// ---------------------------------------------------------------- scanner

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Str(Vec<u8>),
    Ident(String),
    Label(String),
    Jump(String),
    JumpIf(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Scanner<'a> {
        Scanner {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_noise(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'#' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn quoted(&mut self, quote: u8) -> Result<Vec<u8>, AsmError> {
        let start_line = self.line;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(AsmError::UnterminatedLiteral(start_line)),
            }
        }
    }

    fn ident(&mut self, first: u8) -> String {
        let mut name = String::new();
        name.push(first as char);
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                name.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn next(&mut self) -> Result<Option<Token>, AsmError> {
        self.skip_noise();
        let line = self.line;
        let c = match self.bump() {
            None => return Ok(None),
            Some(c) => c,
        };
        let token = match c {
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b',' => Token::Comma,
            // A colon may trail a label definition; it carries no meaning.
            b':' => return self.next(),
            b'\'' | b'"' => Token::Str(self.quoted(c)?),
            b'x' if matches!(self.peek(), Some(b'\'') | Some(b'"')) => {
                let quote = self.bump().expect("peeked");
                let raw = self.quoted(quote)?;
                let text = String::from_utf8(raw).map_err(|_| AsmError::BadHex(line))?;
                let bytes =
                    crate::utils::hex::decode(&text).ok_or(AsmError::BadHex(line))?;
                Token::Str(bytes)
            }
            b'$' => {
                let name = self.ident(b'$');
                Token::Label(name)
            }
            b'-' | b'0'..=b'9' => {
                let mut text = String::new();
                text.push(c as char);
                while let Some(d) = self.peek() {
                    if d.is_ascii_digit() {
                        text.push(d as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let n: i64 = text
                    .parse()
                    .map_err(|_| AsmError::BadNumber(line, text.clone()))?;
                Token::Number(n)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let name = self.ident(c);
                // jump:$l and jumpif:$l are single tokens.
                if (name == "jump" || name == "jumpif") && self.peek() == Some(b':') {
                    self.bump();
                    match self.bump() {
                        Some(b'$') => {
                            let label = self.ident(b'$');
                            if name == "jump" {
                                Token::Jump(label)
                            } else {
                                Token::JumpIf(label)
                            }
                        }
                        _ => return Err(AsmError::UnexpectedToken(line, name + ":")),
                    }
                } else {
                    Token::Ident(name)
                }
            }
            other => return Err(AsmError::UnexpectedChar(line, other as char)),
        };
        Ok(Some(token))
    }
}

// ---------------------------------------------------------------- emitter

/// One parsed element of a program: either fixed bytes or a jump whose
/// encoding depends on the final label layout.
enum Emit {
    Bytes(Vec<u8>),
    Jump {
        label: String,
        /// Unconditional jumps push a leading true value.
        unconditional: bool,
    },
}

#[derive(Default)]
struct Program {
    emits: Vec<Emit>,
    /// Label name to index into `emits` (the label sits before that emit).
    labels: HashMap<String, usize>,
}

/// Assembles source text into bytecode.
pub fn assemble(src: &str) -> Result<Vec<u8>, AsmError> {
    let mut scanner = Scanner::new(src);
    let program = parse(&mut scanner, None)?;
    resolve(program)
}

fn parse(scanner: &mut Scanner, terminator: Option<Token>) -> Result<Program, AsmError> {
    let mut program = Program::default();
    loop {
        let line = scanner.line;
        let token = match scanner.next()? {
            None => {
                if terminator.is_none() {
                    return Ok(program);
                }
                return Err(AsmError::Unbalanced(line));
            }
            Some(t) => t,
        };
        if Some(&token) == terminator.as_ref() {
            return Ok(program);
        }
        match token {
            Token::Number(n) => {
                let mut out = Vec::new();
                emit_number(&mut out, n);
                program.emits.push(Emit::Bytes(out));
            }
            Token::Str(data) => {
                let mut out = Vec::new();
                item::write_pushdata(&mut out, &data);
                program.emits.push(Emit::Bytes(out));
            }
            Token::Ident(name) => {
                let mut out = Vec::new();
                emit_ident(&mut out, &name).ok_or(AsmError::UnknownOpcode(line, name))?;
                program.emits.push(Emit::Bytes(out));
            }
            Token::Label(name) => {
                let at = program.emits.len();
                if program.labels.insert(name.clone(), at).is_some() {
                    return Err(AsmError::DuplicateLabel(name));
                }
            }
            Token::Jump(label) => program.emits.push(Emit::Jump {
                label,
                unconditional: true,
            }),
            Token::JumpIf(label) => program.emits.push(Emit::Jump {
                label,
                unconditional: false,
            }),
            Token::LBracket => {
                // A bracketed subprogram has its own label namespace.
                let inner = parse(scanner, Some(Token::RBracket))?;
                let bytes = resolve(inner)?;
                let mut out = Vec::new();
                item::write_pushdata(&mut out, &bytes);
                program.emits.push(Emit::Bytes(out));
            }
            Token::LBrace => {
                let mut out = Vec::new();
                parse_tuple(scanner, &mut out)?;
                program.emits.push(Emit::Bytes(out));
            }
            Token::RBracket | Token::RBrace | Token::Comma => {
                return Err(AsmError::Unbalanced(line));
            }
        }
    }
}

/// Parses a brace tuple (after the opening brace), emitting the element
/// pushes followed by the arity and `tuple`.
fn parse_tuple(scanner: &mut Scanner, out: &mut Vec<u8>) -> Result<(), AsmError> {
    let mut arity: i64 = 0;
    loop {
        let line = scanner.line;
        let token = scanner
            .next()?
            .ok_or(AsmError::Unbalanced(line))?;
        match token {
            Token::RBrace => break,
            Token::Comma => continue,
            Token::Number(n) => {
                emit_number(out, n);
                arity += 1;
            }
            Token::Str(data) => {
                item::write_pushdata(out, &data);
                arity += 1;
            }
            Token::LBrace => {
                parse_tuple(scanner, out)?;
                arity += 1;
            }
            Token::LBracket => {
                let inner = parse(scanner, Some(Token::RBracket))?;
                let bytes = resolve(inner)?;
                item::write_pushdata(out, &bytes);
                arity += 1;
            }
            other => {
                return Err(AsmError::UnexpectedToken(line, format!("{:?}", other)));
            }
        }
    }
    emit_number(out, arity);
    out.push(op::TUPLE);
    Ok(())
}

/// Emits a number push, preferring `n neg` over a ten-byte varint for
/// negative values.
fn emit_number(out: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        item::encode_int(n, out);
    } else if n == i64::MIN {
        item::encode_int(n, out);
    } else {
        item::encode_int(-n, out);
        out.push(op::NEG);
    }
}

/// Emits an opcode or composite mnemonic. Returns `None` if unknown.
fn emit_ident(out: &mut Vec<u8>, name: &str) -> Option<()> {
    match name {
        "bool" => out.extend_from_slice(&[op::NOT, op::NOT]),
        "swap" => out.extend_from_slice(&[0x01, op::ROLL]),
        "sub" => out.extend_from_slice(&[op::NEG, op::ADD]),
        "splitzero" => out.extend_from_slice(&[0x00, op::SPLIT]),
        _ => out.push(op::from_mnemonic(name)?),
    }
    Some(())
}

/// Lays out the emits, growing jump placeholders until offsets stabilize.
fn resolve(program: Program) -> Result<Vec<u8>, AsmError> {
    // Current encoded form of each jump placeholder.
    let mut jump_bytes: Vec<Vec<u8>> = Vec::new();
    for emit in &program.emits {
        if let Emit::Jump { unconditional, .. } = emit {
            // Smallest possible form: optional `1`, 1-byte offset, jumpif.
            let mut bytes = Vec::new();
            if *unconditional {
                bytes.push(0x01);
            }
            bytes.push(0x00);
            bytes.push(op::JUMPIF);
            jump_bytes.push(bytes);
        }
    }

    loop {
        // Compute emit offsets under the current sizing.
        let mut offsets = Vec::with_capacity(program.emits.len() + 1);
        let mut pos = 0usize;
        let mut jump_index = 0usize;
        for emit in &program.emits {
            offsets.push(pos);
            pos += match emit {
                Emit::Bytes(b) => b.len(),
                Emit::Jump { .. } => {
                    let len = jump_bytes[jump_index].len();
                    jump_index += 1;
                    len
                }
            };
        }
        offsets.push(pos);

        // Re-encode every jump against the label positions.
        let mut changed = false;
        let mut jump_index = 0usize;
        for (i, emit) in program.emits.iter().enumerate() {
            let (label, unconditional) = match emit {
                Emit::Jump {
                    label,
                    unconditional,
                } => (label, *unconditional),
                Emit::Bytes(_) => continue,
            };
            let target = *program
                .labels
                .get(label)
                .ok_or_else(|| AsmError::UndefinedLabel(label.clone()))?;
            let target_pos = offsets[target];
            let end_pos = offsets[i] + jump_bytes[jump_index].len();

            let mut bytes = Vec::new();
            if unconditional {
                bytes.push(0x01);
            }
            if target_pos >= end_pos {
                item::encode_int((target_pos - end_pos) as i64, &mut bytes);
            } else {
                item::encode_int((end_pos - target_pos) as i64, &mut bytes);
                bytes.push(op::NEG);
            }
            bytes.push(op::JUMPIF);

            if bytes != jump_bytes[jump_index] {
                jump_bytes[jump_index] = bytes;
                changed = true;
            }
            jump_index += 1;
        }

        if !changed {
            break;
        }
    }

    let mut out = Vec::new();
    let mut jump_index = 0usize;
    for emit in &program.emits {
        match emit {
            Emit::Bytes(b) => out.extend_from_slice(b),
            Emit::Jump { .. } => {
                out.extend_from_slice(&jump_bytes[jump_index]);
                jump_index += 1;
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------- disassembler

/// Disassembles bytecode into source text.
///
/// Labels cannot be recovered, so jump offsets reappear as explicit pushes;
/// reassembling the output reproduces the input bytes exactly.
pub fn disassemble(prog: &[u8]) -> Result<String, AsmError> {
    let mut out = String::new();
    let mut pc = 0usize;
    while pc < prog.len() {
        if !out.is_empty() {
            out.push(' ');
        }
        let opcode = prog[pc];
        pc += 1;
        if op::is_small_int(opcode) {
            let _ = write!(out, "{}", opcode);
        } else if op::is_pushdata(opcode) {
            let (payload, consumed) =
                pushdata_payload(opcode, &prog[pc..]).ok_or(AsmError::Truncated(pc - 1))?;
            let _ = write!(out, "x'{}'", crate::utils::hex::encode(payload));
            pc += consumed;
        } else {
            // The named-opcode region is fully covered.
            let name = op::mnemonic(opcode).expect("every non-push opcode is named");
            out.push_str(name);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::opcode as op;

    fn must(src: &str) -> Vec<u8> {
        assemble(src).unwrap_or_else(|e| panic!("assemble({:?}): {}", src, e))
    }

    #[test]
    fn assembles_reference_cases() {
        let cases: Vec<(&str, Vec<u8>)> = vec![
            ("verify", vec![op::VERIFY]),
            ("0", vec![0]),
            ("31", vec![31]),
            ("32", vec![op::MIN_PUSHDATA + 1, 32, op::INT]),
            ("-1", vec![1, op::NEG]),
            ("bool", vec![op::NOT, op::NOT]),
            ("1 dup 1", vec![1, op::DUP, 1]),
            ("x'00010203'", vec![op::MIN_PUSHDATA + 4, 0, 1, 2, 3]),
            ("'abcd'", vec![op::MIN_PUSHDATA + 4, 0x61, 0x62, 0x63, 0x64]),
            ("[verify]", vec![op::MIN_PUSHDATA + 1, op::VERIFY]),
            (
                "2 [1 dup 1] 2",
                vec![2, op::MIN_PUSHDATA + 3, 1, op::DUP, 1, 2],
            ),
            ("{}", vec![0, op::TUPLE]),
            ("{1, 2}", vec![1, 2, 2, op::TUPLE]),
            (
                "{'abc', {5}, 'def'}",
                vec![
                    op::MIN_PUSHDATA + 3,
                    0x61,
                    0x62,
                    0x63,
                    5,
                    1,
                    op::TUPLE,
                    op::MIN_PUSHDATA + 3,
                    0x64,
                    0x65,
                    0x66,
                    3,
                    op::TUPLE,
                ],
            ),
            ("jumpif", vec![op::JUMPIF]),
            ("jumpif:$a $a", vec![0, op::JUMPIF]),
            ("jumpif:$a 5 $a", vec![1, op::JUMPIF, 5]),
            ("$a jumpif:$a", vec![3, op::NEG, op::JUMPIF]),
            ("$a 5 jumpif:$a", vec![5, 4, op::NEG, op::JUMPIF]),
            ("jump:$a $a", vec![1, 0, op::JUMPIF]),
            ("jump:$a 5 $a", vec![1, 1, op::JUMPIF, 5]),
            ("$a jump:$a", vec![1, 4, op::NEG, op::JUMPIF]),
            ("$a 5 jump:$a", vec![5, 1, 5, op::NEG, op::JUMPIF]),
            (
                "$a 5 jump:$b 6 jump:$a $b",
                vec![5, 1, 5, op::JUMPIF, 6, 1, 9, op::NEG, op::JUMPIF],
            ),
            (
                "[1 verify] contract",
                vec![op::MIN_PUSHDATA + 2, 1, op::VERIFY, op::CONTRACT],
            ),
            (
                "[1 verify] exec",
                vec![op::MIN_PUSHDATA + 2, 1, op::VERIFY, op::EXEC],
            ),
            (
                "[1 verify] output",
                vec![op::MIN_PUSHDATA + 2, 1, op::VERIFY, op::OUTPUT],
            ),
        ];
        for (src, want) in cases {
            assert_eq!(must(src), want, "src {:?}", src);
        }
    }

    #[test]
    fn assemble_disassemble_assemble_is_stable() {
        let sources = [
            "verify",
            "32",
            "-1",
            "2 [1 dup 1] 2",
            "{'abc', {5}, 'def'}",
            "$a 5 jump:$b 6 jump:$a $b",
            "'blockid' 20 nonce finalize",
        ];
        for src in sources {
            let first = must(src);
            let text = disassemble(&first).unwrap();
            let second = assemble(&text)
                .unwrap_or_else(|e| panic!("reassemble {:?}: {}", text, e));
            assert_eq!(first, second, "src {:?} -> {:?}", src, text);
        }
    }

    #[test]
    fn comments_and_whitespace_are_ignored() {
        let src = "
            1 2 add   # adds the two
            verify
        ";
        assert_eq!(must(src), vec![1, 2, op::ADD, op::VERIFY]);
    }

    #[test]
    fn composite_mnemonics() {
        assert_eq!(must("swap"), vec![1, op::ROLL]);
        assert_eq!(must("sub"), vec![op::NEG, op::ADD]);
        assert_eq!(must("splitzero"), vec![0, op::SPLIT]);
    }

    #[test]
    fn forward_jump_past_a_long_body_grows_the_offset_push() {
        // 40 bytes of body forces the offset out of the small-int range.
        let mut src = String::from("jumpif:$end ");
        for _ in 0..40 {
            src.push_str("0 ");
        }
        src.push_str("$end");
        let prog = must(&src);
        // [pushdata(1), 40, int, jumpif] then forty zero pushes.
        assert_eq!(
            &prog[..4],
            &[op::MIN_PUSHDATA + 1, 40, op::INT, op::JUMPIF]
        );
        assert_eq!(prog.len(), 4 + 40);
    }

    #[test]
    fn label_errors() {
        assert_eq!(
            assemble("jump:$nowhere"),
            Err(AsmError::UndefinedLabel("$nowhere".to_string()))
        );
        assert_eq!(
            assemble("$a $a"),
            Err(AsmError::DuplicateLabel("$a".to_string()))
        );
    }

    #[test]
    fn labels_are_local_to_bracketed_programs() {
        // The inner $a must not collide with the outer one.
        let prog = must("$a [$a jump:$a] drop jump:$a");
        assert!(!prog.is_empty());
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(assemble("'abc"), Err(AsmError::UnterminatedLiteral(_))));
        assert!(matches!(assemble("x'0g'"), Err(AsmError::BadHex(_))));
        assert!(matches!(assemble("bogus"), Err(AsmError::UnknownOpcode(_, _))));
        assert!(matches!(assemble("]"), Err(AsmError::Unbalanced(_))));
        assert!(matches!(assemble("[1"), Err(AsmError::Unbalanced(_))));
    }

    #[test]
    fn disassemble_rejects_truncated_pushdata() {
        assert!(matches!(
            disassemble(&[op::MIN_PUSHDATA + 4, 0, 1]),
            Err(AsmError::Truncated(0))
        ));
    }

    #[test]
    fn string_quotes_nest() {
        let mut want = Vec::new();
        item::write_pushdata(&mut want, b"  'hello'  ");
        assert_eq!(must("\"  'hello'  \""), want);
    }
}

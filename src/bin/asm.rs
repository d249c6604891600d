//! Assembles VM source from stdin into bytecode on stdout, or with `-d`
//! disassembles bytecode from stdin into source on stdout.

use std::io::{Read, Write};
use std::process::exit;
use txvm::virtual_machine::assembler::{assemble, disassemble};

fn main() {
    let mut disassemble_mode = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-d" => disassemble_mode = true,
            "-h" | "--help" => {
                usage(0);
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                usage(1);
            }
        }
    }

    let mut input = Vec::new();
    if let Err(err) = std::io::stdin().read_to_end(&mut input) {
        eprintln!("error reading stdin: {}", err);
        exit(1);
    }

    if disassemble_mode {
        match disassemble(&input) {
            Ok(src) => println!("{}", src),
            Err(err) => {
                eprintln!("error: {}", err);
                exit(1);
            }
        }
        return;
    }

    let src = match String::from_utf8(input) {
        Ok(src) => src,
        Err(_) => {
            eprintln!("error: source is not valid UTF-8");
            exit(1);
        }
    };
    match assemble(&src) {
        Ok(prog) => {
            if let Err(err) = std::io::stdout().write_all(&prog) {
                eprintln!("error writing stdout: {}", err);
                exit(1);
            }
        }
        Err(err) => {
            eprintln!("error: {}", err);
            exit(1);
        }
    }
}

fn usage(exitval: i32) -> ! {
    eprintln!("Usage:");
    eprintln!("  asm      assemble source on stdin to bytecode on stdout");
    eprintln!("  asm -d   disassemble bytecode on stdin to source on stdout");
    exit(exitval);
}

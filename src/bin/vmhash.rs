//! Prints the domain-tagged VM hash of its arguments:
//! `vmhash <tag> <hexdata>`.

use std::process::exit;
use txvm::types::hash::vm_hash;
use txvm::utils::hex;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 2 {
        eprintln!("Usage:");
        eprintln!("  vmhash <tag> <hexdata>");
        exit(1);
    }
    let data = match hex::decode(&args[1]) {
        Some(data) => data,
        None => {
            eprintln!("error: data is not valid hex");
            exit(1);
        }
    };
    println!("{}", vm_hash(args[0].as_bytes(), &data));
}

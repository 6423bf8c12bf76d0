//! Structure dump for PDF files.
//!
//! Usage: `inspect_pdf <file.pdf> [--entries]`
//!
//! Prints the declared version, trailer fields, and object table summary;
//! `--entries` lists every cross-reference entry.

use std::process::ExitCode;

use pdf_forge::{Document, Object, Usage};

fn print_trailer(doc: &Document) {
    let mut keys: Vec<&String> = doc.trailer().keys().collect();
    keys.sort();
    for key in keys {
        match &doc.trailer()[key] {
            Object::String(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                println!("  /{} <{}>", key, hex);
            },
            other => println!("  /{} {:?}", key, other),
        }
    }
}

fn run(path: &str, list_entries: bool) -> pdf_forge::Result<()> {
    let doc = Document::open(path)?;
    println!("{}", path);
    println!("version: {}", doc.version());
    println!("max object number: {}", doc.max_number());
    println!("trailer:");
    print_trailer(&doc);

    let mut in_use = 0usize;
    let mut compressed = 0usize;
    let mut free = 0usize;
    for entry in doc.xref_entries() {
        match entry.usage {
            Usage::InUse { .. } => in_use += 1,
            Usage::InUseCompressed { .. } => compressed += 1,
            Usage::Free { .. } => free += 1,
        }
    }
    println!(
        "entries: {} inline, {} compressed, {} free",
        in_use, compressed, free
    );

    if list_entries {
        for entry in doc.xref_entries() {
            match entry.usage {
                Usage::InUse { offset } => {
                    println!("{:>6} {:>5} at offset {}", entry.number, entry.generation, offset);
                },
                Usage::InUseCompressed { container, index } => {
                    println!(
                        "{:>6} {:>5} in stream {} slot {}",
                        entry.number, entry.generation, container, index
                    );
                },
                Usage::Free { next_free } => {
                    println!(
                        "{:>6} {:>5} free, next {}",
                        entry.number, entry.generation, next_free
                    );
                },
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let list_entries = args.iter().any(|a| a == "--entries");
    let path = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => path,
        None => {
            eprintln!("usage: inspect_pdf <file.pdf> [--entries]");
            return ExitCode::FAILURE;
        },
    };

    match run(path, list_entries) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            ExitCode::FAILURE
        },
    }
}

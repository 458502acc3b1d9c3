//! CLI for inspecting kernel images
//!
//! Decodes the code section of an ELF-packaged kernel image and reports
//! instruction and control-flow statistics.
//!
//! # Usage
//!
//! ```bash
//! inspect kernel.o
//! ```

use std::{env, fs, process};

use isa::decode_function;
use object::{Object, ObjectSection};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <kernel-image>", args[0]);
        process::exit(1);
    }

    let path = &args[1];

    let data = fs::read(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        process::exit(1);
    });

    // Parse the image
    let file = object::File::parse(&*data).unwrap_or_else(|e| {
        eprintln!("Failed to parse image: {}", e);
        process::exit(1);
    });

    // Find the code section
    let text_section = file
        .section_by_name(".text")
        .or_else(|| file.section_by_name("__text"))
        .unwrap_or_else(|| {
            eprintln!("No code section found");
            process::exit(1);
        });

    let code = text_section.data().unwrap_or_else(|e| {
        eprintln!("Failed to read code section: {}", e);
        process::exit(1);
    });

    println!(
        "Code section: {} bytes ({} instructions)",
        code.len(),
        code.len() / isa::WORD_BYTES
    );

    // Decode instructions
    let instructions = decode_function(code).unwrap_or_else(|e| {
        eprintln!("Decode error: {}", e);
        process::exit(1);
    });

    let graph = cfg::build_cfg(&instructions);

    let branch_count = instructions.iter().filter(|i| i.op.is_branch()).count();
    let load_count = instructions.iter().filter(|i| i.is_load()).count();
    let store_count = instructions.iter().filter(|i| i.is_store()).count();

    println!("Decoded {} instructions", instructions.len());
    println!("  Basic blocks: {}", graph.block_count());
    println!("  Branches: {}", branch_count);
    println!("  Loads: {}  Stores: {}", load_count, store_count);
    if graph.is_degenerate() {
        println!("  CFG is degenerate (register-indexed branches present)");
    }

    println!("\nFirst 20 instructions:");
    for instruction in instructions.iter().take(20) {
        println!("  {:04x}: {}", instruction.offset, instruction);
    }
}

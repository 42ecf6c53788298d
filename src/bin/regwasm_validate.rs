use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use regwasm::Module;

#[derive(Parser, Debug)]
#[command(name = "regwasm-validate")]
#[command(about = "Validate WebAssembly modules for correctness")]
#[command(long_about = "
regwasm validate - decode, type check and compile WebAssembly modules

Every error found in a module is reported with the byte offset where it was
detected, not only the first one.

Examples:
  # Validate a single module
  regwasm-validate module.wasm

  # Validate multiple modules
  regwasm-validate module1.wasm module2.wasm module3.wasm

  # Quiet mode (only show errors)
  regwasm-validate module.wasm --quiet
")]
struct Args {
    /// Path(s) to WebAssembly module file(s)
    #[arg(required = true)]
    wasm_files: Vec<PathBuf>,

    /// Show verbose validation details
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long)]
    quiet: bool,
}

/// Returns the number of errors found in `path`.
fn validate_file(path: &Path, verbose: bool, quiet: bool) -> Result<usize, String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    if verbose {
        println!("Validating: {} ({} bytes)", path.display(), bytes.len());
    }

    let module = Module::new(&bytes);
    if verbose {
        println!("  Sections: {}", module.toc.len());
        println!("  Functions: {}", module.functions.len());
        println!("  Imports: {}", module.imports.len());
        println!("  Exports: {}", module.exports.len());
    }

    for err in module.errors() {
        eprintln!("INVALID: {} - {}", path.display(), err);
    }
    if !module.has_errors() && !quiet {
        println!("VALID: {}", path.display());
    }
    Ok(module.errors().len())
}

fn main() {
    let args = Args::parse();

    let mut invalid = 0;
    for path in &args.wasm_files {
        match validate_file(path, args.verbose, args.quiet) {
            Ok(0) => {}
            Ok(_) => invalid += 1,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                invalid += 1;
            }
        }
    }

    if args.wasm_files.len() > 1 && !args.quiet {
        println!("\nSummary:");
        println!("  Valid: {}/{}", args.wasm_files.len() - invalid, args.wasm_files.len());
        if invalid > 0 {
            println!("  Invalid: {}/{}", invalid, args.wasm_files.len());
        }
    }

    if invalid > 0 {
        std::process::exit(1);
    }
}

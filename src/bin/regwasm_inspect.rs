use clap::Parser;
use std::path::PathBuf;

use regwasm::module::{Export, Import, SectionEntry};
use regwasm::{disassemble, FuncType, GlobalType, Limits, Module, TableType};
use serde::Serialize;

mod utils;
use utils::load_module;

#[derive(Parser, Debug)]
#[command(name = "regwasm-inspect")]
#[command(about = "Inspect WebAssembly modules to understand their structure")]
#[command(long_about = "
regwasm inspect - show the structure of a WebAssembly module

Examples:
  # Sections, imports, exports and functions
  regwasm-inspect module.wasm

  # Include the compiled register bytecode of every function
  regwasm-inspect module.wasm --code

  # Machine readable summary
  regwasm-inspect module.wasm --json
")]
struct Args {
    /// Path to the WebAssembly module file
    wasm_file: PathBuf,

    /// Print a JSON summary instead of text
    #[arg(long)]
    json: bool,

    /// Disassemble the compiled bytecode of each function
    #[arg(long)]
    code: bool,
}

#[derive(Serialize)]
struct FunctionSummary<'a> {
    index: usize,
    name: Option<&'a str>,
    ty: &'a FuncType,
    imported: bool,
    registers: u32,
    code_cells: usize,
}

#[derive(Serialize)]
struct Summary<'a> {
    sections: &'a [SectionEntry],
    types: &'a [FuncType],
    imports: &'a [Import],
    exports: &'a [Export],
    functions: Vec<FunctionSummary<'a>>,
    tables: Vec<TableType>,
    memories: Vec<Limits>,
    globals: Vec<GlobalType>,
    start: Option<u32>,
}

fn summarize(module: &Module) -> Summary<'_> {
    Summary {
        sections: &module.toc,
        types: &module.types,
        imports: &module.imports,
        exports: &module.exports,
        functions: module
            .functions
            .iter()
            .enumerate()
            .map(|(index, f)| FunctionSummary {
                index,
                name: f.name.as_deref(),
                ty: &f.ty,
                imported: f.is_imported(),
                registers: f.reg_count,
                code_cells: f.code.len(),
            })
            .collect(),
        tables: module.tables.iter().map(|t| t.ty).collect(),
        memories: module.memories.iter().map(|m| m.limits).collect(),
        globals: module.globals.iter().map(|g| g.ty).collect(),
        start: module.start,
    }
}

fn section_name(id: u8) -> &'static str {
    match id {
        0 => "custom",
        1 => "type",
        2 => "import",
        3 => "function",
        4 => "table",
        5 => "memory",
        6 => "global",
        7 => "export",
        8 => "start",
        9 => "element",
        10 => "code",
        11 => "data",
        12 => "datacount",
        _ => "unknown",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let module = load_module(&args.wasm_file)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summarize(&module))?);
        return Ok(());
    }

    println!("Module: {}", args.wasm_file.display());
    println!();
    println!("Sections:");
    for s in &module.toc {
        println!("  {:<10} offset 0x{:06x} size {}", section_name(s.id), s.offset, s.len);
    }

    if module.imports.is_empty() {
        println!("\nImports: none");
    } else {
        println!("\nImports:");
        for import in &module.imports {
            println!("  {}.{} ({:?} {})", import.module, import.field, import.kind, import.index);
        }
    }

    if module.exports.is_empty() {
        println!("\nExports: none");
    } else {
        println!("\nExports:");
        for export in &module.exports {
            println!("  {} ({:?} {})", export.name, export.kind, export.index);
        }
    }

    println!("\nFunctions:");
    for (i, f) in module.functions.iter().enumerate() {
        let name = f.name.as_deref().unwrap_or("");
        if f.is_imported() {
            println!("  [{}] {} {} imported", i, name, f.ty);
            continue;
        }
        println!("  [{}] {} {} registers {} cells {}", i, name, f.ty, f.reg_count, f.code.len());
        if args.code {
            for line in disassemble(&f.code).lines() {
                println!("      {}", line);
            }
        }
    }

    for (i, t) in module.tables.iter().enumerate() {
        println!("\nTable {}: {} min {} max {:?}", i, t.ty.elem, t.ty.limits.min, t.ty.limits.max);
    }
    for (i, m) in module.memories.iter().enumerate() {
        println!("\nMemory {}: min {} max {:?} pages", i, m.limits.min, m.limits.max);
    }
    if let Some(start) = module.start {
        println!("\nStart function: {}", start);
    }
    Ok(())
}

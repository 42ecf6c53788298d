use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;

use regwasm::{Config, ExportValue, Imports, Instance, Interpreter};

mod utils;
use utils::{format_results, load_module, typed_args};

#[derive(Parser, Debug)]
#[command(name = "regwasm-run")]
#[command(about = "Execute WebAssembly modules with the regwasm register interpreter")]
#[command(long_about = "
regwasm run - execute a WebAssembly module from the command line

Examples:
  # Instantiate the module and run its start function
  regwasm-run module.wasm

  # Invoke an exported function with no arguments
  regwasm-run module.wasm --invoke main

  # Invoke a function with arguments (i32, i64, f32, f64 supported)
  regwasm-run module.wasm --invoke add --args 10:i32 20:i32

  # List the exported functions
  regwasm-run module.wasm --list-exports
")]
struct Args {
    /// Path to the WebAssembly module file
    wasm_file: PathBuf,

    /// Exported function to invoke
    #[arg(short, long)]
    invoke: Option<String>,

    /// Arguments to pass to the function (format: value:type, e.g., 42:i32, 3.14:f32)
    #[arg(short, long, num_args = 0..)]
    args: Vec<String>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// List all exported functions instead of running
    #[arg(short, long)]
    list_exports: bool,

    /// Maximum call depth
    #[arg(long, default_value_t = Config::DEFAULT_CONTROL_STACK_SIZE)]
    max_depth: usize,

    /// Number of register slots shared by all frames
    #[arg(long, default_value_t = Config::DEFAULT_LOCALS_BUFFER_SIZE)]
    locals: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.debug {
        eprintln!("Loading module from: {}", args.wasm_file.display());
    }
    let module = load_module(&args.wasm_file)?;
    let instance = Instance::instantiate(Rc::clone(&module), &Imports::new())
        .map_err(|e| format!("Failed to instantiate module: {}", e))?;

    if args.list_exports {
        println!("Exported functions:");
        let mut names: Vec<_> = instance
            .exports()
            .into_iter()
            .filter_map(|(name, export)| match export {
                ExportValue::Function(f) => Some((name, f.ty().clone())),
                _ => None,
            })
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, ty) in names {
            println!("  {} {}", name, ty);
        }
        return Ok(());
    }

    let Some(name) = args.invoke.as_deref() else {
        if args.debug {
            eprintln!("No function to invoke; instantiation completed");
        }
        return Ok(());
    };

    let func = instance.find_function(name).ok_or_else(|| format!("Function '{}' not found in exports", name))?;
    let ty = instance.function_type(func).cloned().unwrap_or_default();
    let wasm_args = typed_args(&args.args, &ty.params)?;

    if args.debug {
        eprintln!("Invoking {} {} with {} arguments", name, ty, wasm_args.len());
    }

    let config = Config { control_stack_size: args.max_depth, locals_buffer_size: args.locals, ..Config::default() };
    let mut interp = Interpreter::with_config(config);
    let results = interp.invoke(&instance, func, &wasm_args).map_err(|e| format!("Execution failed: {}", e))?;

    if !results.is_empty() {
        println!("{}", format_results(&results, &ty.returns));
    } else if args.debug {
        eprintln!("Function completed successfully (no return value)");
    }
    Ok(())
}

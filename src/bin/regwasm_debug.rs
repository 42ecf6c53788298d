use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;

use regwasm::{Imports, Instance, Interpreter, Status};

mod utils;
use utils::{format_results, load_module, typed_args};

#[derive(Parser, Debug)]
#[command(name = "regwasm-debug")]
#[command(about = "Step through the execution of an exported function")]
#[command(long_about = "
regwasm debug - run a function under the debugger overlay

Breakpoints are given as function:offset where offset is a bytecode offset
(see regwasm-inspect --code). At every stop the current location, the
originating wasm instruction offset and the live registers are printed.

Examples:
  # Single step the first 20 instructions
  regwasm-debug module.wasm --invoke fib --args 10:i32 --steps 20

  # Stop at bytecode offset 7 of function 1
  regwasm-debug module.wasm --invoke main --break 1:7
")]
struct Args {
    /// Path to the WebAssembly module file
    wasm_file: PathBuf,

    /// Exported function to invoke
    #[arg(short, long)]
    invoke: String,

    /// Arguments to pass to the function (format: value:type)
    #[arg(short, long, num_args = 0..)]
    args: Vec<String>,

    /// Breakpoints (format: function:offset)
    #[arg(short, long = "break", num_args = 0..)]
    breakpoints: Vec<String>,

    /// Number of instructions to single step before running freely
    #[arg(short, long, default_value_t = 0)]
    steps: usize,
}

fn parse_breakpoint(arg: &str) -> Result<(u32, usize), String> {
    let (func, offset) = arg.split_once(':').ok_or_else(|| format!("Invalid breakpoint '{}'", arg))?;
    let func = func.parse().map_err(|_| format!("Invalid function index '{}'", func))?;
    let offset = offset.parse().map_err(|_| format!("Invalid offset '{}'", offset))?;
    Ok((func, offset))
}

fn print_stop(instance: &Instance, interp: &Interpreter, status: Status) {
    let Some((func, pc)) = interp.location() else { return };
    let function = &instance.module.functions[func as usize];
    let wasm = function.debug.wasm_offset(pc).map(|w| format!("0x{:x}", w)).unwrap_or_else(|| "?".to_string());
    println!("{:?} at function {} offset {} (wasm {}) depth {}", status, func, pc, wasm, interp.call_depth());
    let registers = interp.registers();
    for (reg, ty) in function.debug.live_registers(pc) {
        if let Some(value) = registers.get(reg as usize) {
            println!("  r{} = {}:{}", reg, value.display(ty), ty);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let module = load_module(&args.wasm_file)?;
    let instance = Instance::instantiate(Rc::clone(&module), &Imports::new())
        .map_err(|e| format!("Failed to instantiate module: {}", e))?;

    let func = instance
        .find_function(&args.invoke)
        .ok_or_else(|| format!("Function '{}' not found in exports", args.invoke))?;
    let ty = instance.function_type(func).cloned().unwrap_or_default();
    let wasm_args = typed_args(&args.args, &ty.params)?;

    let mut interp = Interpreter::new();
    for bp in &args.breakpoints {
        let (f, offset) = parse_breakpoint(bp)?;
        interp.add_breakpoint(f, offset);
    }

    interp.start(&instance, func, &wasm_args)?;
    let mut remaining = args.steps;
    loop {
        let status = if remaining > 0 {
            remaining -= 1;
            interp.step()?
        } else {
            interp.run()?
        };
        match status {
            Status::Done => break,
            Status::Step | Status::Breakpoint | Status::Suspended => print_stop(&instance, &interp, status),
        }
    }

    println!("{}", format_results(interp.results(), &ty.returns));
    Ok(())
}

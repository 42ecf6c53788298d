#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::rc::Rc;

use regwasm::{Module, ValType, WasmValue};

/// Parses a command line argument of the form `value:type`.
pub fn parse_value(arg: &str) -> Result<(WasmValue, ValType), String> {
    let (value_str, type_str) = arg
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid argument format '{}'. Expected format: value:type (e.g., 42:i32)", arg))?;

    let parsed = match type_str {
        "i32" => value_str.parse::<i32>().map(|v| (WasmValue::from_i32(v), ValType::I32)).ok(),
        "i64" => value_str.parse::<i64>().map(|v| (WasmValue::from_i64(v), ValType::I64)).ok(),
        "f32" => value_str.parse::<f32>().map(|v| (WasmValue::from_f32(v), ValType::F32)).ok(),
        "f64" => value_str.parse::<f64>().map(|v| (WasmValue::from_f64(v), ValType::F64)).ok(),
        _ => return Err(format!("Unknown type '{}'. Supported types: i32, i64, f32, f64", type_str)),
    };
    parsed.ok_or_else(|| format!("Failed to parse '{}' as {}", value_str, type_str))
}

/// Checks `args` against `params` and strips the type annotations.
pub fn typed_args(args: &[String], params: &[ValType]) -> Result<Vec<WasmValue>, String> {
    if args.len() != params.len() {
        return Err(format!("Function expects {} arguments, but {} provided", params.len(), args.len()));
    }
    args.iter()
        .zip(params)
        .map(|(arg, &expected)| {
            let (value, ty) = parse_value(arg)?;
            if ty != expected {
                return Err(format!("Argument '{}' has type {}, expected {}", arg, ty, expected));
            }
            Ok(value)
        })
        .collect()
}

/// Reads and compiles a module, printing every recorded error on failure.
pub fn load_module(path: &Path) -> Result<Rc<Module>, String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let module = Module::new(&bytes);
    if module.has_errors() {
        for err in module.errors() {
            eprintln!("{}: {}", path.display(), err);
        }
        return Err(format!("{} has {} error(s)", path.display(), module.errors().len()));
    }
    Ok(Rc::new(module))
}

pub fn format_results(results: &[WasmValue], types: &[ValType]) -> String {
    results
        .iter()
        .zip(types)
        .map(|(v, &ty)| format!("{}:{}", v.display(ty), ty))
        .collect::<Vec<_>>()
        .join(" ")
}

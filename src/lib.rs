#![deny(unsafe_code)]

pub mod compiler;
pub mod config;
pub mod debug;
pub mod error;
pub mod instance;
pub mod interpreter;
pub mod leb128;
pub mod module;
pub mod opcodes;
mod parser;
pub mod reader;
pub mod types;
pub mod wasm_memory;

// Debug macro that only prints when wasm_debug feature is enabled
#[cfg(feature = "wasm_debug")]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(feature = "wasm_debug"))]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_println;

pub use config::Config;
pub use debug::{disassemble, DebugInfo, RegisterRange};
pub use error::{Error, ModuleError};
pub use instance::{ExportValue, Imports, Instance, ModuleImports, RuntimeFunction, WasmGlobal, WasmTable, WasmValue};
pub use interpreter::{Interpreter, Status, SuspendHandle};
pub use module::Module;
pub use parser::{MAGIC_HEADER, VERSION};
pub use types::{ExternKind, FuncType, GlobalType, Limits, TableType, ValType};
pub use wasm_memory::WasmMemory;

use std::fmt::Write;

use serde::Serialize;

use crate::opcodes::Op;
use crate::types::ValType;

/// Inclusive range of bytecode offsets over which a register holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterRange {
    pub start: usize,
    pub end: usize,
    pub ty: ValType,
}

impl RegisterRange {
    pub fn contains(&self, offset: usize) -> bool { self.start <= offset && offset <= self.end }
}

/// Debugger side tables produced while compiling a function.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugInfo {
    /// Live ranges per register index.
    pub registers: Vec<Vec<RegisterRange>>,
    /// (bytecode offset, wasm offset) for every emitted opcode, ascending.
    pub code_to_wasm: Vec<(usize, usize)>,
    /// (wasm offset, bytecode offset) for every wasm instruction, ascending.
    pub wasm_to_code: Vec<(usize, usize)>,
}

impl DebugInfo {
    pub(crate) fn push_range(&mut self, register: u32, range: RegisterRange) {
        let register = register as usize;
        if self.registers.len() <= register {
            self.registers.resize_with(register + 1, Vec::new);
        }
        self.registers[register].push(range);
    }

    /// Wasm offset of the instruction that emitted the opcode at or before
    /// bytecode offset `code`.
    pub fn wasm_offset(&self, code: usize) -> Option<usize> {
        let i = self.code_to_wasm.partition_point(|&(c, _)| c <= code);
        i.checked_sub(1).map(|i| self.code_to_wasm[i].1)
    }

    /// First bytecode offset belonging to the wasm instruction at `wasm`, or
    /// to the next instruction after it.
    pub fn code_offset(&self, wasm: usize) -> Option<usize> {
        let i = self.wasm_to_code.partition_point(|&(w, _)| w < wasm);
        self.wasm_to_code.get(i).map(|&(_, c)| c)
    }

    /// Registers holding a value at bytecode offset `code`.
    pub fn live_registers(&self, code: usize) -> Vec<(u32, ValType)> {
        self.registers
            .iter()
            .enumerate()
            .filter_map(|(reg, ranges)| ranges.iter().find(|r| r.contains(code)).map(|r| (reg as u32, r.ty)))
            .collect()
    }
}

fn operand(cell: u64) -> String {
    if cell == u32::MAX as u64 { "?".to_string() } else { cell.to_string() }
}

/// Renders compiled bytecode one instruction per line. Jump deltas are shown
/// with their resolved targets.
pub fn disassemble(code: &[u64]) -> String {
    let mut out = String::new();
    let mut pc = 0;
    while pc < code.len() {
        let Some(op) = Op::from_cell(code[pc]) else {
            let _ = writeln!(out, "{pc:5}: <invalid {}>", code[pc]);
            pc += 1;
            continue;
        };
        let count = op.operand_cells(code.get(pc + 1).copied());
        let end = (pc + 1 + count).min(code.len());
        let cells = &code[pc + 1..end];
        let _ = write!(out, "{pc:5}: {}", op.name());
        match op {
            Op::Jump | Op::JumpIfZero => {
                if let Some(&delta) = cells.first() {
                    let target = (pc as i64 + 2).wrapping_add(delta as i64);
                    let _ = write!(out, " -> {target}");
                }
                for &c in cells.iter().skip(1) {
                    let _ = write!(out, " r{}", operand(c));
                }
            }
            Op::JumpTable => {
                if let Some(&idx) = cells.get(1) {
                    let _ = write!(out, " r{} [", operand(idx));
                }
                for (i, &delta) in cells.iter().enumerate().skip(2) {
                    let cell = pc + 1 + i;
                    let sep = if i == 2 { "" } else { " " };
                    let _ = write!(out, "{sep}{}", (cell as i64 + 1).wrapping_add(delta as i64));
                }
                out.push(']');
            }
            _ => {
                for &c in cells {
                    let _ = write!(out, " {}", operand(c));
                }
            }
        }
        out.push('\n');
        pc = end;
    }
    out
}

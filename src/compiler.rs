use crate::config::Config;
use crate::debug::{DebugInfo, RegisterRange};
use crate::error::*;
use crate::module::{ConstExpr, Function, Module};
use crate::opcodes::{ImmKind, Immediate, Instr, Op};
use crate::types::{FuncType, ValType};

/// Register index of an operand produced by unreachable code.
pub const UNKNOWN: u32 = u32::MAX;

/// Output of compiling one function body or constant expression.
pub struct Compiled {
    pub code: Vec<u64>,
    pub reg_count: u32,
    pub debug: DebugInfo,
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Live { ref_count: u32, ty: ValType, start: usize },
    Free { next: Option<u32> },
}

#[derive(Clone, Copy, Debug)]
struct Operand {
    index: u32,
    ty: ValType,
}

impl Operand {
    const UNKNOWN: Operand = Operand { index: UNKNOWN, ty: ValType::Unknown };
}

struct Block {
    op: Op,
    ty: FuncType,
    begin_offset: usize,
    else_offset: usize,
    has_else: bool,
    scope_base: usize,
    polymorphic: bool,
    prev_polymorphic: bool,
    jump_targets: Vec<usize>,
}

/// Natural alignment (log2 of the access width) of memory access instructions.
fn natural_alignment(op: Op) -> Option<u32> {
    use Op::*;
    match op {
        I32Load8S | I32Load8U | I64Load8S | I64Load8U | I32Store8 | I64Store8 => Some(0),
        I32Load16S | I32Load16U | I64Load16S | I64Load16U | I32Store16 | I64Store16 => Some(1),
        I32Load | F32Load | I64Load32S | I64Load32U | I32Store | F32Store | I64Store32 => Some(2),
        I64Load | F64Load | I64Store | F64Store => Some(3),
        _ => None,
    }
}

struct Compiler<'m, 'e> {
    module: &'m Module,
    func: Option<&'m Function>,
    local_count: u32,
    max_global: u32,
    max_slots: usize,
    expr_type: FuncType,

    code: Vec<u64>,
    regs: Vec<Slot>,
    first_free: Option<u32>,
    /// Frame size needed by registers outside the slot file: call arguments
    /// and scratch registers of parallel moves.
    reg_high: usize,
    stack: Vec<u32>,
    control: Vec<Block>,

    instrs: &'m [Instr],
    current: usize,
    code_index: Vec<Option<usize>>,
    debug: DebugInfo,
    errors: &'e mut Vec<ModuleError>,
}

impl<'m, 'e> Compiler<'m, 'e> {
    fn new(
        module: &'m Module,
        func: Option<&'m Function>,
        instrs: &'m [Instr],
        expr_type: FuncType,
        config: &Config,
        errors: &'e mut Vec<ModuleError>,
    ) -> Self {
        let locals: &[ValType] = func.map(|f| f.locals.as_slice()).unwrap_or(&[]);
        let regs = locals.iter().map(|&ty| Slot::Live { ref_count: 0, ty, start: 0 }).collect();
        Self {
            module,
            func,
            local_count: locals.len() as u32,
            max_global: module.globals.len() as u32,
            max_slots: config.max_slot_count,
            expr_type,
            code: Vec::new(),
            regs,
            first_free: None,
            reg_high: 0,
            stack: Vec::new(),
            control: Vec::new(),
            instrs,
            current: 0,
            code_index: vec![None; instrs.len()],
            debug: DebugInfo::default(),
            errors,
        }
    }

    fn error(&mut self, error: Error) {
        let offset = self.instrs.get(self.current).map(|i| i.offset).unwrap_or(0);
        crate::debug_println!("compile error at 0x{:x}: {}", offset, error);
        self.errors.push(ModuleError { error, offset });
    }

    // ---------------- Registers ----------------

    fn reg_type(&self, index: u32) -> ValType {
        match self.regs.get(index as usize) {
            Some(Slot::Live { ty, .. }) => *ty,
            _ => ValType::Unknown,
        }
    }

    /// Takes the most recently freed slot or grows the slot file. The slot
    /// limit is checked once the whole function has been compiled.
    fn allocate(&mut self, ty: ValType) -> u32 {
        let index = match self.first_free {
            Some(index) => {
                self.first_free = match self.regs[index as usize] {
                    Slot::Free { next } => next,
                    Slot::Live { .. } => None,
                };
                index
            }
            None => {
                self.regs.push(Slot::Free { next: None });
                (self.regs.len() - 1) as u32
            }
        };
        self.regs[index as usize] = Slot::Live { ref_count: 0, ty, start: self.code.len() };
        index
    }

    fn retain(&mut self, index: u32) {
        if let Some(Slot::Live { ref_count, .. }) = self.regs.get_mut(index as usize) {
            *ref_count += 1;
        }
    }

    fn release(&mut self, index: u32) {
        let Some(Slot::Live { ref_count, ty, start }) = self.regs.get_mut(index as usize) else { return };
        *ref_count = ref_count.saturating_sub(1);
        if index >= self.local_count && *ref_count == 0 {
            // ranges are inclusive and start after the defining instruction
            let range = RegisterRange { start: *start + 1, end: self.code.len(), ty: *ty };
            self.debug.push_range(index, range);
            self.regs[index as usize] = Slot::Free { next: self.first_free };
            self.first_free = Some(index);
        }
    }

    fn unlink_free(&mut self, index: u32) {
        let mut prev: Option<u32> = None;
        let mut cur = self.first_free;
        while let Some(i) = cur {
            let next = match self.regs[i as usize] {
                Slot::Free { next } => next,
                Slot::Live { .. } => None,
            };
            if i == index {
                match prev {
                    Some(p) => self.regs[p as usize] = Slot::Free { next },
                    None => self.first_free = next,
                }
                return;
            }
            prev = Some(i);
            cur = next;
        }
    }

    // ---------------- Operand stack ----------------

    fn top(&self) -> &Block {
        // the function or expression entry is only popped by its final `end`
        &self.control[self.control.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Block {
        let last = self.control.len() - 1;
        &mut self.control[last]
    }

    fn scope_size(&self) -> usize { self.stack.len() - self.top().scope_base }

    fn push(&mut self, index: u32) {
        self.stack.push(index);
        if index != UNKNOWN { self.retain(index); }
    }

    fn push_reg(&mut self, ty: ValType) -> u32 {
        let index = self.allocate(ty);
        self.push(index);
        index
    }

    fn lookup(&self, depth: usize) -> Option<Operand> {
        if depth < self.scope_size() {
            let index = self.stack[self.stack.len() - depth - 1];
            if index == UNKNOWN { return Some(Operand::UNKNOWN); }
            Some(Operand { index, ty: self.reg_type(index) })
        } else if self.top().polymorphic {
            Some(Operand::UNKNOWN)
        } else {
            None
        }
    }

    fn pop(&mut self) -> Option<Operand> {
        let opd = self.lookup(0);
        if self.stack.len() > self.top().scope_base {
            if let Some(index) = self.stack.pop() { self.release(index); }
        }
        opd
    }

    fn pop_scope(&mut self) {
        while self.stack.len() > self.top().scope_base {
            self.pop();
        }
    }

    /// Type checks the top `types.len()` operands, popping them if `pop` is set.
    fn get_operands(&mut self, types: &[ValType], pop: bool) -> Vec<Operand> {
        let count = types.len();
        let mut opds = vec![Operand::UNKNOWN; count];
        for i in 0..count {
            let k = count - 1 - i;
            let opd = if pop { self.pop() } else { self.lookup(i) };
            match opd {
                None => {
                    self.error(Error::Validation(UNBALANCED_STACK));
                    break;
                }
                Some(opd) => {
                    opds[k] = opd;
                    if !opd.ty.is_compatible(types[k]) {
                        self.error(Error::Validation(TYPE_MISMATCH));
                        break;
                    }
                }
            }
        }
        opds
    }

    fn set_polymorphic(&mut self) {
        self.top_mut().polymorphic = true;
        self.pop_scope();
    }

    // ---------------- Emission ----------------

    fn emit_op(&mut self, op: Op) {
        let index = self.code.len();
        if self.func.is_some() {
            let wasm = self.instrs[self.current].offset;
            self.debug.code_to_wasm.push((index, wasm));
        }
        self.code_index[self.current] = Some(index);
        self.code.push(op.cell());
    }

    #[inline]
    fn emit(&mut self, cell: u64) { self.code.push(cell); }

    #[inline]
    fn emit_index(&mut self, index: u32) { self.code.push(index as u64); }

    /// Points the delta cell at `cell` to `target`. Deltas are relative to
    /// the cell following the delta cell.
    fn patch(&mut self, cell: usize, target: usize) {
        self.code[cell] = (target as i64 - (cell as i64 + 1)) as u64;
    }

    fn emit_move(&mut self, src: u32, dst: u32) {
        self.emit_op(Op::Move);
        self.emit_index(src);
        self.emit_index(dst);
    }

    /// Emits `dsts[i] = srcs[i]` for every `i` as one parallel assignment.
    /// A destination still read by a later source is saved to a scratch
    /// register above every register in use. The operand stack is left
    /// untouched, so conditional branches keep the fall-through values.
    fn emit_moves(&mut self, mut srcs: Vec<u32>, dsts: &[u32]) {
        let top_dst = dsts.iter().filter(|&&d| d != UNKNOWN).map(|&d| d as usize + 1).max().unwrap_or(0);
        let mut scratch = self.regs.len().max(self.reg_high).max(top_dst);
        for (i, &dst) in dsts.iter().enumerate() {
            let src = srcs[i];
            if src == dst || src == UNKNOWN || dst == UNKNOWN { continue; }
            if srcs[i + 1..].contains(&dst) {
                let temp = scratch as u32;
                scratch += 1;
                self.emit_move(dst, temp);
                for later in &mut srcs[i + 1..] {
                    if *later == dst { *later = temp; }
                }
            }
            self.emit_move(src, dst);
        }
        self.reg_high = self.reg_high.max(scratch);
    }

    // ---------------- Register moves ----------------

    /// Redirects every use of `slot` among the top `count` operands of the
    /// current scope to a fresh register holding a copy of it.
    fn move_register_if_used_in_stack_range(&mut self, slot: u32, count: usize) {
        let scope_len = self.scope_size();
        let len = self.stack.len();
        let mut new_reg = UNKNOWN;
        for from_top in (0..count).rev() {
            if from_top >= scope_len { continue; }
            let stack_index = len - 1 - from_top;
            if self.stack[stack_index] != slot { continue; }
            if new_reg == UNKNOWN {
                new_reg = self.allocate(self.reg_type(slot));
            }
            self.retain(new_reg);
            self.release(slot);
            self.stack[stack_index] = new_reg;
        }
        if new_reg != UNKNOWN {
            self.emit_move(slot, new_reg);
        }
    }

    fn move_local_if_used(&mut self, local: u32) {
        let count = self.scope_size();
        self.move_register_if_used_in_stack_range(local, count);
    }

    fn move_locals_to_registers(&mut self) {
        for i in 0..self.stack.len() {
            let index = self.stack[i];
            if index < self.local_count {
                self.move_local_if_used(index);
            }
        }
    }

    // ---------------- Blocks ----------------

    fn push_control(&mut self, op: Op, ty: FuncType) {
        let prev_polymorphic = self.control.last().map(|b| b.polymorphic).unwrap_or(false);
        self.control.push(Block {
            op,
            ty,
            begin_offset: self.code.len(),
            else_offset: 0,
            has_else: false,
            scope_base: self.stack.len(),
            polymorphic: false,
            prev_polymorphic,
            jump_targets: Vec::new(),
        });
    }

    /// Re-pushes the block parameters, which sit below the reserved result
    /// slots, on top of the new scope.
    fn push_block_inputs(&mut self, ty: &FuncType) {
        let n_params = ty.params.len();
        let prev_base = self.control[self.control.len() - 2].scope_base;
        let input_end = self.stack.len() - ty.returns.len();
        let available = input_end.saturating_sub(prev_base);
        let copy_start = n_params.saturating_sub(available);
        for i in 0..n_params {
            if i < copy_start {
                self.push(UNKNOWN);
            } else {
                let index = self.stack[input_end - n_params + i];
                self.push(index);
            }
        }
    }

    fn block_begin(&mut self, op: Op, ty: FuncType) {
        self.get_operands(&ty.params, false);
        for &ret in &ty.returns {
            self.push_reg(ret);
        }
        self.push_control(op, ty.clone());
        self.push_block_inputs(&ty);
    }

    fn move_results_to_input_slots(&mut self, block: usize) {
        let ty = self.control[block].ty.clone();
        let opds = self.get_operands(&ty.params, false);
        let b = &self.control[block];
        if b.polymorphic || b.prev_polymorphic { return; }
        let Some(base) = b.scope_base.checked_sub(ty.returns.len() + ty.params.len()) else { return };
        let dsts = self.stack[base..base + opds.len()].to_vec();
        self.emit_moves(opds.iter().map(|o| o.index).collect(), &dsts);
    }

    fn move_results_to_output_slots(&mut self, block: usize) {
        let ty = self.control[block].ty.clone();
        let opds = self.get_operands(&ty.returns, false);
        let b = &self.control[block];
        if b.polymorphic || b.prev_polymorphic { return; }
        let Some(base) = b.scope_base.checked_sub(ty.returns.len()) else { return };
        let dsts = self.stack[base..base + opds.len()].to_vec();
        self.emit_moves(opds.iter().map(|o| o.index).collect(), &dsts);
    }

    fn check_no_extra_operands(&mut self, expected: usize) {
        if self.scope_size() > expected {
            self.error(Error::Validation(TYPE_MISMATCH));
        }
    }

    /// Closes the then-branch of an `if` and starts its else-branch.
    fn begin_else(&mut self) {
        let top = self.control.len() - 1;
        let ty = self.control[top].ty.clone();
        self.move_results_to_output_slots(top);
        self.check_no_extra_operands(ty.returns.len());
        self.pop_scope();
        self.push_block_inputs(&ty);

        self.emit_op(Op::Jump);
        self.emit(0);

        let else_offset = self.code.len();
        let block = self.top_mut();
        block.polymorphic = false;
        block.has_else = true;
        block.else_offset = else_offset;
    }

    /// Closes the innermost nested block. The function entry is closed by the
    /// final `end` in `compile_instr` instead.
    fn block_end(&mut self) -> Option<Block> {
        if self.control.len() < 2 {
            self.error(Error::Malformed(UNEXPECTED_END));
            return None;
        }
        if self.top().op == Op::If && !self.top().has_else {
            // the empty else-branch still has to forward inputs to outputs
            self.begin_else();
        }
        let top = self.control.len() - 1;
        self.move_results_to_output_slots(top);
        self.check_no_extra_operands(self.control[top].ty.returns.len());
        self.pop_scope();
        let block = self.control.pop()?;

        // keep the reserved result slots, drop the parameters below them
        let n_ret = block.ty.returns.len();
        let results = self.stack.split_off(self.stack.len() - n_ret);
        for _ in 0..block.ty.params.len() {
            self.pop();
        }
        self.stack.extend(results);

        if block.op == Op::If {
            self.patch(block.begin_offset + 1, block.else_offset);
            self.patch(block.else_offset - 1, self.code.len());
        }
        Some(block)
    }

    fn patch_jump_targets(&mut self, block: &Block) {
        let target = self.code.len();
        for &cell in &block.jump_targets {
            self.patch(cell, target);
        }
    }

    // ---------------- Branches ----------------

    /// Moves the return operands to registers `0..n` and returns. Used for
    /// conditional branches too, so the operand stack must stay as it is.
    fn compile_return(&mut self) {
        let returns = self.expr_type.returns.clone();
        let srcs = self.get_operands(&returns, false).iter().map(|o| o.index).collect();
        let dsts: Vec<u32> = (0..returns.len() as u32).collect();
        self.emit_moves(srcs, &dsts);
        self.emit_op(Op::Return);
    }

    fn compile_branch(&mut self, label: u32) {
        let label = label as usize;
        if label + 1 == self.control.len() {
            self.compile_return();
            return;
        }
        if label >= self.control.len() {
            self.error(Error::Validation(UNKNOWN_LABEL));
            return;
        }
        let target = self.control.len() - 1 - label;
        match self.control[target].op {
            Op::Loop => {
                self.move_results_to_input_slots(target);
                self.emit_op(Op::Jump);
                let cell = self.code.len();
                self.emit(0);
                let begin = self.control[target].begin_offset;
                self.patch(cell, begin);
            }
            _ => {
                self.move_results_to_output_slots(target);
                self.emit_op(Op::Jump);
                let cell = self.code.len();
                self.control[target].jump_targets.push(cell);
                self.emit(0);
            }
        }
    }

    // ---------------- Immediates ----------------

    fn validate_immediates(&mut self, instr: &Instr) -> bool {
        let module = self.module;
        let kinds = instr.op.info().imms;
        let mut ok = true;
        let mut fail = |c: &mut Self, e: Error| {
            c.error(e);
            ok = false;
        };
        for (i, imm) in instr.imm.iter().enumerate() {
            let kind = match instr.op {
                Op::BrTable => ImmKind::Label,
                _ => kinds.get(i).copied().unwrap_or(ImmKind::Zero),
            };
            let index = imm.index() as usize;
            match (kind, *imm) {
                (ImmKind::Zero, Immediate::Zero(b)) if b != 0 => fail(self, Error::Validation(NON_ZERO_IMMEDIATE)),
                (ImmKind::ValTypes, Immediate::Type(b)) => match ValType::from_byte(b) {
                    None => fail(self, Error::Validation(INVALID_IMMEDIATE_TYPE)),
                    Some(ValType::V128) => fail(self, Error::Validation(VECTOR_UNSUPPORTED)),
                    Some(_) => {}
                },
                (ImmKind::RefType, Immediate::Type(b)) if ValType::ref_from_byte(b).is_none() => {
                    fail(self, Error::Validation(INVALID_IMMEDIATE_TYPE))
                }
                (ImmKind::Local, _) if index >= self.local_count as usize => fail(self, Error::Validation(UNKNOWN_LOCAL)),
                (ImmKind::Func, _) if index >= module.functions.len() => fail(self, Error::Validation(UNKNOWN_FUNC)),
                (ImmKind::Global, _) if index >= self.max_global as usize => fail(self, Error::Validation(UNKNOWN_GLOBAL)),
                (ImmKind::Type, _) if index >= module.types.len() => fail(self, Error::Validation(UNKNOWN_TYPE)),
                (ImmKind::Table, _) if index >= module.tables.len() => fail(self, Error::Validation(UNKNOWN_TABLE)),
                (ImmKind::Elem, _) if index >= module.elements.len() => fail(self, Error::Validation(UNKNOWN_ELEM)),
                (ImmKind::Data, _) => match module.data_count {
                    None => fail(self, Error::Malformed(DATA_COUNT_REQUIRED)),
                    Some(n) if index >= n as usize => fail(self, Error::Validation(UNKNOWN_DATA)),
                    Some(_) => {}
                },
                (ImmKind::Label, _) if index >= self.control.len() => fail(self, Error::Validation(UNKNOWN_LABEL)),
                (ImmKind::MemArg, Immediate::MemArg { align, .. }) => {
                    if matches!(natural_alignment(instr.op), Some(natural) if align > natural) {
                        fail(self, Error::Validation(ALIGNMENT_TOO_LARGE));
                    }
                }
                _ => {}
            }
        }
        ok
    }

    // ---------------- Instructions ----------------

    fn compile(mut self) -> Compiled {
        let instrs = self.instrs;
        let expr_type = self.expr_type.clone();
        self.push_control(Op::Block, expr_type);

        let mut prev_op: Option<Op> = None;
        for (i, instr) in instrs.iter().enumerate() {
            self.current = i;
            if self.control.is_empty() { break; }
            if self.validate_immediates(instr) {
                self.compile_instr(instr, prev_op);
            }
            prev_op = Some(instr.op);
        }
        self.finish()
    }

    fn compile_instr(&mut self, instr: &Instr, prev_op: Option<Op>) {
        match instr.op {
            Op::Block | Op::Loop => {
                self.move_locals_to_registers();
                self.block_begin(instr.op, instr.block_type.clone().unwrap_or_default());
            }
            Op::If => {
                self.move_locals_to_registers();
                let cond = self.get_operands(&[ValType::I32], true)[0];
                self.block_begin(Op::If, instr.block_type.clone().unwrap_or_default());
                self.emit_op(Op::JumpIfZero);
                self.emit(0);
                self.emit_index(cond.index);
            }
            Op::Else => {
                if self.top().op != Op::If || self.top().has_else {
                    self.error(Error::Validation(UNEXPECTED_ELSE));
                } else {
                    self.begin_else();
                }
            }
            Op::End => {
                if self.control.len() == 1 {
                    self.check_no_extra_operands(self.expr_type.returns.len());
                    if prev_op != Some(Op::Return) {
                        self.compile_return();
                    }
                    self.pop_scope();
                    if let Some(block) = self.control.pop() {
                        self.patch_jump_targets(&block);
                    }
                } else if let Some(block) = self.block_end() {
                    self.patch_jump_targets(&block);
                }
                self.code_index[self.current] = Some(self.code.len());
            }
            Op::Br => {
                self.compile_branch(instr.imm[0].index());
                self.set_polymorphic();
            }
            Op::BrIf => {
                let cond = self.get_operands(&[ValType::I32], true)[0];
                self.emit_op(Op::JumpIfZero);
                let cell = self.code.len();
                self.emit(0);
                self.emit_index(cond.index);
                self.compile_branch(instr.imm[0].index());
                self.patch(cell, self.code.len());
            }
            Op::BrTable => {
                let cond = self.get_operands(&[ValType::I32], true)[0];
                self.emit_op(Op::JumpTable);
                self.emit(instr.imm.len() as u64);
                self.emit_index(cond.index);
                let first = self.code.len();
                for _ in &instr.imm {
                    self.emit(0);
                }
                // each entry jumps to a trampoline moving the results for its target
                for (i, label) in instr.imm.iter().enumerate() {
                    self.patch(first + i, self.code.len());
                    self.compile_branch(label.index());
                }
                self.set_polymorphic();
            }
            Op::Call | Op::CallIndirect => self.compile_call(instr),
            Op::Return => {
                self.compile_return();
                self.set_polymorphic();
            }
            _ => self.compile_generic(instr),
        }
    }

    fn compile_call(&mut self, instr: &Instr) {
        let mut max_used = self.local_count as i64 - 1;
        for &index in &self.stack {
            if index != UNKNOWN { max_used = max_used.max(index as i64); }
        }
        let base = (max_used + 1) as u32;

        let (ty, indirect) = if instr.op == Op::Call {
            (self.module.functions[instr.imm[0].index() as usize].ty.clone(), None)
        } else {
            let table = &self.module.tables[instr.imm[1].index() as usize];
            if table.ty.elem != ValType::FuncRef {
                self.error(Error::Validation(TYPE_MISMATCH));
            }
            let index = self.get_operands(&[ValType::I32], true)[0];
            (self.module.types[instr.imm[0].index() as usize].clone(), Some(index))
        };

        let args = self.get_operands(&ty.params, true);
        for (i, arg) in args.iter().enumerate() {
            self.emit_move(arg.index, base + i as u32);
        }

        self.emit_op(instr.op);
        match indirect {
            None => {
                self.emit_index(instr.imm[0].index());
                self.emit_index(base);
            }
            Some(index) => {
                self.emit_index(instr.imm[0].index());
                self.emit_index(instr.imm[1].index());
                self.emit_index(base);
                self.emit_index(index.index);
            }
        }
        // argument registers past the result slots belong to the frame too
        let frame = base as usize + ty.params.len().max(ty.returns.len());
        self.reg_high = self.reg_high.max(frame);
        self.push_return_slots(base, &ty.returns);
    }

    /// Reserves the callee's result slots, which start at the argument base.
    /// Every slot from `base` up is free, since `base` lies past all live
    /// registers.
    fn push_return_slots(&mut self, base: u32, returns: &[ValType]) {
        for (i, &ty) in returns.iter().enumerate() {
            let slot = base + i as u32;
            let live = Slot::Live { ref_count: 0, ty, start: self.code.len() };
            if (slot as usize) < self.regs.len() {
                self.unlink_free(slot);
                self.regs[slot as usize] = live;
            } else {
                self.regs.push(live);
            }
            self.push(slot);
        }
    }

    fn compile_generic(&mut self, instr: &Instr) {
        let module = self.module;
        let op = instr.op;
        let info = op.info();
        let mut inputs: Vec<ValType> = info.inputs.to_vec();
        let mut outputs: Vec<ValType> = info.outputs.to_vec();

        let index = instr.imm.first().map(|i| i.index()).unwrap_or(0) as usize;
        let func = self.func;
        let local_type = |i: usize| func.map(|f| f.locals[i]).unwrap_or(ValType::Unknown);
        let table_type = |i: usize| module.tables[i].ty.elem;

        match op {
            Op::SelectT => {
                let ty = match instr.imm[0] {
                    Immediate::Type(b) => ValType::from_byte(b).unwrap_or(ValType::Unknown),
                    _ => ValType::Unknown,
                };
                inputs = vec![ty, ty, ValType::I32];
            }
            Op::LocalGet => outputs = vec![local_type(index)],
            Op::LocalSet => {
                inputs = vec![local_type(index)];
                // save the old value before the operand could be written over it
                self.move_local_if_used(index as u32);
            }
            Op::LocalTee => {
                inputs = vec![local_type(index)];
                outputs = vec![local_type(index)];
                self.move_local_if_used(index as u32);
            }
            Op::GlobalGet => outputs = vec![module.globals[index].ty.ty],
            Op::GlobalSet => {
                inputs = vec![module.globals[index].ty.ty];
                if !module.globals[index].ty.mutable {
                    self.error(Error::Validation(GLOBAL_IMMUTABLE));
                }
            }
            Op::RefNull => {
                let ty = match instr.imm[0] {
                    Immediate::Type(b) => ValType::ref_from_byte(b).unwrap_or(ValType::Unknown),
                    _ => ValType::Unknown,
                };
                outputs = vec![ty];
            }
            Op::TableGet => outputs = vec![table_type(index)],
            Op::TableSet => inputs = vec![ValType::I32, table_type(index)],
            Op::TableGrow => inputs = vec![table_type(index), ValType::I32],
            Op::TableFill => inputs = vec![ValType::I32, table_type(index), ValType::I32],
            Op::TableInit => {
                let elem = module.elements[index].elem_type;
                if elem != table_type(instr.imm[1].index() as usize) {
                    self.error(Error::Validation(TYPE_MISMATCH));
                }
            }
            Op::TableCopy => {
                if table_type(index) != table_type(instr.imm[1].index() as usize) {
                    self.error(Error::Validation(TYPE_MISMATCH));
                }
            }
            _ => {}
        }

        let opds = self.get_operands(&inputs, true);

        if op.uses_memory() && module.memories.is_empty() {
            self.error(Error::Validation(NO_MEMORY));
        }

        match op {
            Op::Unreachable => {
                self.emit_op(Op::Unreachable);
                self.set_polymorphic();
            }
            Op::Drop | Op::Nop => {
                self.code_index[self.current] = Some(self.code.len());
            }
            Op::Select | Op::SelectT => {
                if !opds[0].ty.is_compatible(opds[1].ty) {
                    self.error(Error::Validation(SELECT_TYPE_MISMATCH));
                }
                let ty = if opds[0].ty == ValType::Unknown { opds[1].ty } else { opds[0].ty };
                let dst = self.push_reg(ty);
                self.emit_op(Op::Select);
                self.emit_index(opds[0].index);
                self.emit_index(opds[1].index);
                self.emit_index(opds[2].index);
                self.emit_index(dst);
            }
            Op::LocalGet => {
                self.push(index as u32);
                self.code_index[self.current] = Some(self.code.len());
            }
            Op::LocalSet | Op::LocalTee => {
                self.emit_move(opds[0].index, index as u32);
                if op == Op::LocalTee {
                    self.push(index as u32);
                }
            }
            Op::GlobalGet => {
                let dst = self.push_reg(outputs[0]);
                self.emit_op(Op::GlobalGet);
                self.emit_index(index as u32);
                self.emit_index(dst);
            }
            Op::GlobalSet => {
                self.emit_op(Op::GlobalSet);
                self.emit_index(index as u32);
                self.emit_index(opds[0].index);
            }
            _ => {
                self.emit_op(op);
                for (kind, imm) in info.imms.iter().zip(&instr.imm) {
                    if kind.is_emitted() {
                        self.emit(imm.cell());
                    }
                }
                for opd in &opds {
                    self.emit_index(opd.index);
                }
                for &ty in &outputs {
                    let dst = self.push_reg(ty);
                    self.emit_index(dst);
                }
            }
        }
    }

    fn finish(mut self) -> Compiled {
        let reg_count = self.regs.len().max(self.reg_high);
        if reg_count > self.max_slots {
            self.current = self.instrs.len().saturating_sub(1);
            self.error(Error::Validation(TOO_MANY_REGISTERS));
        }

        if self.func.is_some() {
            let code_len = self.code.len();
            let mut code_index = code_len.saturating_sub(1);
            let mut wasm_to_code = Vec::with_capacity(self.instrs.len());
            for (instr, index) in self.instrs.iter().zip(&self.code_index).rev() {
                if let Some(index) = index { code_index = *index; }
                wasm_to_code.push((instr.offset, code_index));
            }
            wasm_to_code.reverse();
            self.debug.wasm_to_code = wasm_to_code;

            for local in 0..self.local_count {
                let ty = self.reg_type(local);
                self.debug.push_range(local, RegisterRange { start: 0, end: code_len, ty });
            }
        }

        Compiled { code: self.code, reg_count: reg_count as u32, debug: self.debug }
    }
}

/// Compiles the body of the defined function `func_idx`.
pub fn compile_function(module: &Module, func_idx: u32, config: &Config, errors: &mut Vec<ModuleError>) -> Compiled {
    let func = &module.functions[func_idx as usize];
    Compiler::new(module, Some(func), &func.body, func.ty.clone(), config, errors).compile()
}

/// Compiles a constant expression producing one value of type `ty`. Only
/// globals below `max_global` may be read.
pub fn compile_const_expr(
    module: &Module,
    expr: &ConstExpr,
    ty: ValType,
    max_global: u32,
    config: &Config,
    errors: &mut Vec<ModuleError>,
) -> Compiled {
    let mut compiler = Compiler::new(module, None, &expr.instrs, FuncType::new(vec![], vec![ty]), config, errors);
    compiler.max_global = max_global;
    compiler.compile()
}

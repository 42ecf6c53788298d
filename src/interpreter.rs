use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nohash_hasher::IntSet;
use paste::paste;

use crate::config::Config;
use crate::debug_println;
use crate::error::*;
use crate::instance::{func_ref, resolve_func_ref, Instance, RuntimeFunction, WasmValue};
use crate::module::ConstExpr;
use crate::opcodes::Op;

/// Why [`Interpreter::run`] or [`Interpreter::step`] returned without a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The outermost call returned; see [`Interpreter::results`].
    Done,
    /// Stopped before an instruction with a breakpoint.
    Breakpoint,
    /// One instruction was executed in single step mode.
    Step,
    /// Stopped because suspension was requested.
    Suspended,
}

/// Requests suspension of a running interpreter, possibly from another thread.
#[derive(Debug, Clone, Default)]
pub struct SuspendHandle(Arc<AtomicBool>);

impl SuspendHandle {
    pub fn suspend(&self) { self.0.store(true, Ordering::Relaxed) }

    #[inline(always)]
    fn take(&self) -> bool {
        self.0.load(Ordering::Relaxed) && self.0.swap(false, Ordering::Relaxed)
    }
}

struct Frame {
    instance: Rc<Instance>,
    /// `None` while evaluating a constant expression.
    func: Option<u32>,
    code: Rc<[u64]>,
    reg_count: usize,
    return_pc: usize,
    return_base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    /// Finished without executing bytecode (host function); `Done` not yet reported.
    Returned,
    Terminated,
}

#[inline(always)]
fn breakpoint_key(func: u32, offset: usize) -> u64 { ((func as u64) << 32) | offset as u64 }

/// Executes compiled bytecode with an explicit frame stack. All frames share
/// one register buffer; a frame's registers start at its base.
pub struct Interpreter {
    config: Config,
    frames: Vec<Frame>,
    locals: Vec<WasmValue>,
    pc: usize,
    base: usize,
    state: State,
    result_count: usize,
    results: Vec<WasmValue>,
    breakpoints: IntSet<u64>,
    at_breakpoint: bool,
    suspend: SuspendHandle,
}

impl Default for Interpreter {
    fn default() -> Self { Self::new() }
}

impl Interpreter {
    pub fn new() -> Self { Self::with_config(Config::default()) }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            frames: Vec::new(),
            locals: Vec::new(),
            pc: 0,
            base: 0,
            state: State::Idle,
            result_count: 0,
            results: Vec::new(),
            breakpoints: IntSet::default(),
            at_breakpoint: false,
            suspend: SuspendHandle::default(),
        }
    }

    pub fn suspend_handle(&self) -> SuspendHandle { self.suspend.clone() }

    pub fn results(&self) -> &[WasmValue] { &self.results }

    pub fn call_depth(&self) -> usize { self.frames.len() }

    pub fn is_finished(&self) -> bool { matches!(self.state, State::Idle | State::Terminated) }

    // ---------------- Breakpoints ----------------

    pub fn add_breakpoint(&mut self, func: u32, offset: usize) { self.breakpoints.insert(breakpoint_key(func, offset)); }

    pub fn remove_breakpoint(&mut self, func: u32, offset: usize) -> bool {
        self.breakpoints.remove(&breakpoint_key(func, offset))
    }

    pub fn clear_breakpoints(&mut self) { self.breakpoints.clear(); }

    /// Function index and bytecode offset of the next instruction to execute.
    pub fn location(&self) -> Option<(u32, usize)> {
        let frame = self.frames.last()?;
        Some((frame.func?, self.pc))
    }

    /// Register window of the innermost frame.
    pub fn registers(&self) -> &[WasmValue] {
        match self.frames.last() {
            Some(frame) => {
                let end = (self.base + frame.reg_count).min(self.locals.len());
                &self.locals[self.base.min(end)..end]
            }
            None => &[],
        }
    }

    // ---------------- Calls ----------------

    fn reset(&mut self) {
        self.frames.clear();
        self.pc = 0;
        self.base = 0;
        self.at_breakpoint = false;
        self.state = State::Terminated;
    }

    /// Sets up a frame for `code` with `reg_count` registers at `base`, zeroing
    /// the frame-relative registers in `zero`.
    #[allow(clippy::too_many_arguments)]
    fn push_frame(
        &mut self,
        instance: Rc<Instance>,
        func: Option<u32>,
        code: Rc<[u64]>,
        reg_count: usize,
        base: usize,
        zero: std::ops::Range<usize>,
        return_pc: usize,
    ) -> Result<(), Error> {
        if self.frames.len() >= self.config.control_stack_size {
            return Err(Error::trap(STACK_EXHAUSTED));
        }
        let needed = base + reg_count;
        if needed > self.config.locals_buffer_size {
            return Err(Error::trap(STACK_EXHAUSTED));
        }
        if self.locals.len() < needed {
            self.locals.resize(needed, WasmValue::default());
        }
        self.locals[base + zero.start..base + zero.end].fill(WasmValue::default());
        self.frames.push(Frame { instance, func, code, reg_count, return_pc, return_base: self.base });
        self.pc = 0;
        self.base = base;
        Ok(())
    }

    fn push_function(&mut self, instance: Rc<Instance>, index: u32, base: usize, return_pc: usize) -> Result<(), Error> {
        let module = instance.module.clone();
        let function = &module.functions[index as usize];
        debug_println!("call function {} at base {}", index, base);
        self.push_frame(
            instance,
            Some(index),
            function.code.clone(),
            function.reg_count as usize,
            base,
            function.ty.params.len()..function.locals.len(),
            return_pc,
        )
    }

    /// Prepares a call of `func` of `instance`. Host functions run immediately.
    pub fn start(&mut self, instance: &Rc<Instance>, func: u32, args: &[WasmValue]) -> Result<(), Error> {
        self.reset();
        self.results.clear();
        let function = instance.functions.get(func as usize).ok_or(Error::validation(UNKNOWN_FUNC))?;
        let ty = function.ty();
        if args.len() != ty.params.len() {
            return Err(Error::trap(INVALID_NUM_ARG));
        }
        self.result_count = ty.returns.len();
        match function {
            RuntimeFunction::Host(host) => {
                self.results = host.call(args)?;
                self.state = State::Returned;
            }
            RuntimeFunction::Wasm { instance: owner, index, .. } => {
                let owner = owner.upgrade().ok_or(Error::trap(DEAD_INSTANCE))?;
                self.push_function(owner, *index, 0, 0)?;
                self.locals[..args.len()].copy_from_slice(args);
                self.state = State::Running;
            }
        }
        Ok(())
    }

    /// Starts a call and runs it until it finishes or stops.
    pub fn call(&mut self, instance: &Rc<Instance>, func: u32, args: &[WasmValue]) -> Result<Status, Error> {
        self.start(instance, func, args)?;
        self.run()
    }

    /// Runs a call to completion, resuming over breakpoints and suspensions.
    pub fn invoke(&mut self, instance: &Rc<Instance>, func: u32, args: &[WasmValue]) -> Result<Vec<WasmValue>, Error> {
        let mut status = self.call(instance, func, args)?;
        while status != Status::Done {
            status = self.run()?;
        }
        Ok(self.results.clone())
    }

    /// Continues until the call finishes, a breakpoint is reached or
    /// suspension is requested.
    pub fn run(&mut self) -> Result<Status, Error> { self.resume(false) }

    /// Executes a single instruction.
    pub fn step(&mut self) -> Result<Status, Error> { self.resume(true) }

    fn resume(&mut self, single_step: bool) -> Result<Status, Error> {
        match self.state {
            State::Idle => Err(Error::trap(NOTHING_TO_RUN)),
            State::Terminated => Err(Error::trap(INTERPRETER_TERMINATED)),
            State::Returned => {
                self.state = State::Terminated;
                Ok(Status::Done)
            }
            State::Running => {
                let result = self.execute(single_step);
                match result {
                    Ok(Status::Breakpoint) => self.at_breakpoint = true,
                    Ok(Status::Done) => self.state = State::Terminated,
                    Ok(_) => {}
                    Err(_e) => {
                        debug_println!("trap: {}", _e);
                        self.reset();
                    }
                }
                result
            }
        }
    }

    /// Evaluates a compiled constant expression in the context of `instance`.
    pub(crate) fn eval_const(&mut self, instance: &Rc<Instance>, expr: &ConstExpr) -> Result<WasmValue, Error> {
        self.reset();
        self.result_count = 1;
        self.push_frame(instance.clone(), None, expr.code.clone(), (expr.reg_count as usize).max(1), 0, 0..0, 0)?;
        self.state = State::Running;
        while self.run()? != Status::Done {}
        self.results.first().copied().ok_or(Error::trap(INVALID_NUM_ARG))
    }

    fn finish(&mut self) {
        let end = self.result_count.min(self.locals.len());
        self.results = self.locals[..end].to_vec();
        self.frames.clear();
    }

    // ---------------- Dispatch ----------------

    fn execute(&mut self, single_step: bool) -> Result<Status, Error> {
        let Some(frame) = self.frames.last() else { return Err(Error::trap(NOTHING_TO_RUN)) };
        let mut code = frame.code.clone();
        let mut inst = frame.instance.clone();
        let mut func = frame.func;
        let mut pc = self.pc;
        let mut base = self.base;
        let mut skip_breakpoint = std::mem::take(&mut self.at_breakpoint);
        let mut executed = false;

        macro_rules! cell { ($i:expr) => { code[pc + $i] } }
        macro_rules! reg { ($i:expr) => { self.locals[base + code[pc + $i] as usize] } }
        macro_rules! save { () => {{ self.pc = pc; self.base = base; }} }
        macro_rules! jump { ($delta_cell:expr) => {{
            let cell = $delta_cell;
            pc = cell.wrapping_add(1).wrapping_add(code[cell] as usize);
        }} }
        // re-reads the innermost frame after a call or return
        macro_rules! load_frame { () => {{
            if let Some(frame) = self.frames.last() {
                code = frame.code.clone();
                inst = frame.instance.clone();
                func = frame.func;
            }
            pc = self.pc;
            base = self.base;
        }} }
        macro_rules! memory { () => { inst.memories[0] } }

        macro_rules! binary {
            ($type:ident, $op:tt) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                reg!(2) = WasmValue::[<from_ $type>](a $op b);
                pc += 3;
            }}};
            ($type:ident, .$method:ident) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                reg!(2) = WasmValue::[<from_ $type>](a.$method(b));
                pc += 3;
            }}};
        }
        // shifts and rotations take the count as u32 and reduce it modulo the width
        macro_rules! shift {
            ($type:ident, $method:ident) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).as_u32();
                reg!(2) = WasmValue::[<from_ $type>](a.$method(b));
                pc += 3;
            }}};
        }
        macro_rules! compare {
            ($type:ident, $op:tt) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                reg!(2) = WasmValue::from_u32((a $op b) as u32);
                pc += 3;
            }}};
        }
        macro_rules! unary {
            ($src:ident -> $dst:ident, $f:expr) => {{ paste! {
                let a = reg!(0).[<as_ $src>]();
                reg!(1) = WasmValue::[<from_ $dst>]($f(a));
                pc += 2;
            }}};
        }
        macro_rules! convert {
            ($src:ident -> $dst:ident) => {{ paste! {
                let a = reg!(0).[<as_ $src>]();
                reg!(1) = WasmValue::[<from_ $dst>](a as $dst);
                pc += 2;
            }}};
        }
        macro_rules! trunc {
            ($src:ident -> $dst:ident : $min:expr, $max:expr) => {{ paste! {
                let x = reg!(0).[<as_ $src>]();
                if x.is_nan() { return Err(Error::trap(INVALID_CONV_TO_INT)); }
                if x <= $min || x >= $max { return Err(Error::trap(INTEGER_OVERFLOW)); }
                reg!(1) = WasmValue::[<from_ $dst>](x as $dst);
                pc += 2;
            }}};
        }
        macro_rules! minmax {
            ($type:ident, min) => {{ minmax!(@impl $type, min, true) }};
            ($type:ident, max) => {{ minmax!(@impl $type, max, false) }};
            (@impl $type:ident, $op:ident, $want_negative:literal) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                let result = if a.is_nan() {
                    a
                } else if b.is_nan() {
                    b
                } else if a == b && a == 0.0 {
                    if a.is_sign_negative() == $want_negative { a } else { b }
                } else {
                    a.$op(b)
                };
                reg!(2) = WasmValue::[<from_ $type>](result);
                pc += 3;
            }}};
        }
        macro_rules! div {
            ($type:ident, signed) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                if b == 0 { return Err(Error::trap(DIVIDE_BY_ZERO)); }
                if a == $type::MIN && b == -1 { return Err(Error::trap(INTEGER_OVERFLOW)); }
                reg!(2) = WasmValue::[<from_ $type>](a / b);
                pc += 3;
            }}};
            ($type:ident, unsigned) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                if b == 0 { return Err(Error::trap(DIVIDE_BY_ZERO)); }
                reg!(2) = WasmValue::[<from_ $type>](a / b);
                pc += 3;
            }}};
        }
        macro_rules! rem {
            ($type:ident) => {{ paste! {
                let a = reg!(0).[<as_ $type>]();
                let b = reg!(1).[<as_ $type>]();
                if b == 0 { return Err(Error::trap(DIVIDE_BY_ZERO)); }
                reg!(2) = WasmValue::[<from_ $type>](a.wrapping_rem(b));
                pc += 3;
            }}};
        }
        macro_rules! load {
            ($method:ident, $conv:expr) => {{
                let offset = cell!(0) as u32;
                let addr = reg!(1).as_u32();
                let v = memory!().borrow().$method(addr, offset)?;
                reg!(2) = ($conv)(v);
                pc += 3;
            }};
        }
        macro_rules! store {
            ($method:ident, $conv:expr) => {{
                let offset = cell!(0) as u32;
                let addr = reg!(1).as_u32();
                let v = ($conv)(reg!(2));
                memory!().borrow_mut().$method(addr, offset, v)?;
                pc += 3;
            }};
        }

        loop {
            if single_step && executed {
                save!();
                return Ok(Status::Step);
            }
            if !self.breakpoints.is_empty() && !skip_breakpoint {
                if let Some(f) = func {
                    if self.breakpoints.contains(&breakpoint_key(f, pc)) {
                        debug_println!("breakpoint at function {} offset {}", f, pc);
                        save!();
                        return Ok(Status::Breakpoint);
                    }
                }
            }
            if self.suspend.take() {
                save!();
                return Ok(Status::Suspended);
            }
            skip_breakpoint = false;
            executed = true;

            let op = Op::from_cell(code[pc]).ok_or(Error::trap(INVALID_OP))?;
            pc += 1;
            match op {
                Op::Unreachable => return Err(Error::trap(UNREACHABLE)),
                Op::Nop => {}
                Op::Move => {
                    reg!(1) = reg!(0);
                    pc += 2;
                }
                Op::Jump => jump!(pc),
                Op::JumpIfZero => {
                    if reg!(1).as_u32() == 0 { jump!(pc) } else { pc += 2 }
                }
                Op::JumpTable => {
                    let count = cell!(0) as usize;
                    let index = (reg!(1).as_u32() as usize).min(count.saturating_sub(1));
                    jump!(pc + 2 + index);
                }
                Op::Call => {
                    let callee = inst.functions[cell!(0) as usize].clone();
                    let call_base = base + cell!(1) as usize;
                    pc += 2;
                    self.pc = pc;
                    self.call_function(&callee, call_base, pc)?;
                    load_frame!();
                }
                Op::CallIndirect => {
                    let expected = &inst.module.types[cell!(0) as usize];
                    let index = reg!(3).as_u32();
                    let handle = inst.tables[cell!(1) as usize].borrow().get(index)?;
                    let (owner, f) = resolve_func_ref(handle.0)?;
                    let callee = owner.functions[f as usize].clone();
                    if callee.ty() != expected {
                        return Err(Error::trap(INDIRECT_CALL_MISMATCH));
                    }
                    let call_base = base + cell!(2) as usize;
                    pc += 4;
                    self.pc = pc;
                    self.call_function(&callee, call_base, pc)?;
                    load_frame!();
                }
                Op::Return => {
                    let Some(frame) = self.frames.pop() else { return Err(Error::trap(NOTHING_TO_RUN)) };
                    if self.frames.is_empty() {
                        self.base = base;
                        self.finish();
                        debug_println!("return from outermost frame");
                        return Ok(Status::Done);
                    }
                    self.pc = frame.return_pc;
                    self.base = frame.return_base;
                    load_frame!();
                }
                Op::Select => {
                    reg!(3) = if reg!(2).as_u32() != 0 { reg!(0) } else { reg!(1) };
                    pc += 4;
                }
                Op::GlobalGet => {
                    reg!(1) = inst.globals[cell!(0) as usize].get();
                    pc += 2;
                }
                Op::GlobalSet => {
                    inst.globals[cell!(0) as usize].set(reg!(1));
                    pc += 2;
                }
                Op::TableGet => {
                    let v = inst.tables[cell!(0) as usize].borrow().get(reg!(1).as_u32())?;
                    reg!(2) = v;
                    pc += 3;
                }
                Op::TableSet => {
                    inst.tables[cell!(0) as usize].borrow_mut().set(reg!(1).as_u32(), reg!(2))?;
                    pc += 3;
                }

                Op::I32Load => load!(load_u32, WasmValue::from_u32),
                Op::I64Load => load!(load_u64, WasmValue::from_u64),
                Op::F32Load => load!(load_f32, WasmValue::from_f32),
                Op::F64Load => load!(load_f64, WasmValue::from_f64),
                Op::I32Load8S => load!(load_i8, |v: i8| WasmValue::from_i32(v as i32)),
                Op::I32Load8U => load!(load_u8, |v: u8| WasmValue::from_u32(v as u32)),
                Op::I32Load16S => load!(load_i16, |v: i16| WasmValue::from_i32(v as i32)),
                Op::I32Load16U => load!(load_u16, |v: u16| WasmValue::from_u32(v as u32)),
                Op::I64Load8S => load!(load_i8, |v: i8| WasmValue::from_i64(v as i64)),
                Op::I64Load8U => load!(load_u8, |v: u8| WasmValue::from_u64(v as u64)),
                Op::I64Load16S => load!(load_i16, |v: i16| WasmValue::from_i64(v as i64)),
                Op::I64Load16U => load!(load_u16, |v: u16| WasmValue::from_u64(v as u64)),
                Op::I64Load32S => load!(load_i32, |v: i32| WasmValue::from_i64(v as i64)),
                Op::I64Load32U => load!(load_u32, |v: u32| WasmValue::from_u64(v as u64)),
                Op::I32Store => store!(store_u32, WasmValue::as_u32),
                Op::I64Store => store!(store_u64, WasmValue::as_u64),
                Op::F32Store => store!(store_f32, WasmValue::as_f32),
                Op::F64Store => store!(store_f64, WasmValue::as_f64),
                Op::I32Store8 | Op::I64Store8 => store!(store_u8, |w: WasmValue| w.0 as u8),
                Op::I32Store16 | Op::I64Store16 => store!(store_u16, |w: WasmValue| w.0 as u16),
                Op::I64Store32 => store!(store_u32, |w: WasmValue| w.0 as u32),
                Op::MemorySize => {
                    reg!(0) = WasmValue::from_u32(memory!().borrow().size());
                    pc += 1;
                }
                Op::MemoryGrow => {
                    let delta = reg!(0).as_u32();
                    reg!(1) = WasmValue::from_u32(memory!().borrow_mut().grow(delta));
                    pc += 2;
                }

                Op::I32Const | Op::I64Const | Op::F32Const | Op::F64Const => {
                    reg!(1) = WasmValue(cell!(0));
                    pc += 2;
                }

                Op::I32Eqz => unary!(u32 -> u32, |x: u32| (x == 0) as u32),
                Op::I32Eq => compare!(u32, ==),
                Op::I32Ne => compare!(u32, !=),
                Op::I32LtS => compare!(i32, <),
                Op::I32LtU => compare!(u32, <),
                Op::I32GtS => compare!(i32, >),
                Op::I32GtU => compare!(u32, >),
                Op::I32LeS => compare!(i32, <=),
                Op::I32LeU => compare!(u32, <=),
                Op::I32GeS => compare!(i32, >=),
                Op::I32GeU => compare!(u32, >=),
                Op::I64Eqz => unary!(u64 -> u32, |x: u64| (x == 0) as u32),
                Op::I64Eq => compare!(u64, ==),
                Op::I64Ne => compare!(u64, !=),
                Op::I64LtS => compare!(i64, <),
                Op::I64LtU => compare!(u64, <),
                Op::I64GtS => compare!(i64, >),
                Op::I64GtU => compare!(u64, >),
                Op::I64LeS => compare!(i64, <=),
                Op::I64LeU => compare!(u64, <=),
                Op::I64GeS => compare!(i64, >=),
                Op::I64GeU => compare!(u64, >=),
                Op::F32Eq => compare!(f32, ==),
                Op::F32Ne => compare!(f32, !=),
                Op::F32Lt => compare!(f32, <),
                Op::F32Gt => compare!(f32, >),
                Op::F32Le => compare!(f32, <=),
                Op::F32Ge => compare!(f32, >=),
                Op::F64Eq => compare!(f64, ==),
                Op::F64Ne => compare!(f64, !=),
                Op::F64Lt => compare!(f64, <),
                Op::F64Gt => compare!(f64, >),
                Op::F64Le => compare!(f64, <=),
                Op::F64Ge => compare!(f64, >=),

                Op::I32Clz => unary!(u32 -> u32, u32::leading_zeros),
                Op::I32Ctz => unary!(u32 -> u32, u32::trailing_zeros),
                Op::I32Popcnt => unary!(u32 -> u32, u32::count_ones),
                Op::I32Add => binary!(u32, .wrapping_add),
                Op::I32Sub => binary!(u32, .wrapping_sub),
                Op::I32Mul => binary!(u32, .wrapping_mul),
                Op::I32DivS => div!(i32, signed),
                Op::I32DivU => div!(u32, unsigned),
                Op::I32RemS => rem!(i32),
                Op::I32RemU => rem!(u32),
                Op::I32And => binary!(u32, &),
                Op::I32Or => binary!(u32, |),
                Op::I32Xor => binary!(u32, ^),
                Op::I32Shl => shift!(u32, wrapping_shl),
                Op::I32ShrS => shift!(i32, wrapping_shr),
                Op::I32ShrU => shift!(u32, wrapping_shr),
                Op::I32Rotl => shift!(u32, rotate_left),
                Op::I32Rotr => shift!(u32, rotate_right),
                Op::I64Clz => unary!(u64 -> u64, |x: u64| x.leading_zeros() as u64),
                Op::I64Ctz => unary!(u64 -> u64, |x: u64| x.trailing_zeros() as u64),
                Op::I64Popcnt => unary!(u64 -> u64, |x: u64| x.count_ones() as u64),
                Op::I64Add => binary!(u64, .wrapping_add),
                Op::I64Sub => binary!(u64, .wrapping_sub),
                Op::I64Mul => binary!(u64, .wrapping_mul),
                Op::I64DivS => div!(i64, signed),
                Op::I64DivU => div!(u64, unsigned),
                Op::I64RemS => rem!(i64),
                Op::I64RemU => rem!(u64),
                Op::I64And => binary!(u64, &),
                Op::I64Or => binary!(u64, |),
                Op::I64Xor => binary!(u64, ^),
                Op::I64Shl => shift!(u64, wrapping_shl),
                Op::I64ShrS => shift!(i64, wrapping_shr),
                Op::I64ShrU => shift!(u64, wrapping_shr),
                Op::I64Rotl => shift!(u64, rotate_left),
                Op::I64Rotr => shift!(u64, rotate_right),

                Op::F32Abs => unary!(f32 -> f32, f32::abs),
                Op::F32Neg => unary!(f32 -> f32, |x: f32| -x),
                Op::F32Ceil => unary!(f32 -> f32, f32::ceil),
                Op::F32Floor => unary!(f32 -> f32, f32::floor),
                Op::F32Trunc => unary!(f32 -> f32, f32::trunc),
                Op::F32Nearest => unary!(f32 -> f32, f32::round_ties_even),
                Op::F32Sqrt => unary!(f32 -> f32, f32::sqrt),
                Op::F32Add => binary!(f32, +),
                Op::F32Sub => binary!(f32, -),
                Op::F32Mul => binary!(f32, *),
                Op::F32Div => binary!(f32, /),
                Op::F32Min => minmax!(f32, min),
                Op::F32Max => minmax!(f32, max),
                Op::F32Copysign => binary!(f32, .copysign),
                Op::F64Abs => unary!(f64 -> f64, f64::abs),
                Op::F64Neg => unary!(f64 -> f64, |x: f64| -x),
                Op::F64Ceil => unary!(f64 -> f64, f64::ceil),
                Op::F64Floor => unary!(f64 -> f64, f64::floor),
                Op::F64Trunc => unary!(f64 -> f64, f64::trunc),
                Op::F64Nearest => unary!(f64 -> f64, f64::round_ties_even),
                Op::F64Sqrt => unary!(f64 -> f64, f64::sqrt),
                Op::F64Add => binary!(f64, +),
                Op::F64Sub => binary!(f64, -),
                Op::F64Mul => binary!(f64, *),
                Op::F64Div => binary!(f64, /),
                Op::F64Min => minmax!(f64, min),
                Op::F64Max => minmax!(f64, max),
                Op::F64Copysign => binary!(f64, .copysign),

                Op::I32WrapI64 => convert!(u64 -> u32),
                Op::I32TruncF32S => trunc!(f32 -> i32 : -2147483777.0, 2147483648.0),
                Op::I32TruncF32U => trunc!(f32 -> u32 : -1.0, 4294967296.0),
                Op::I32TruncF64S => trunc!(f64 -> i32 : -2147483649.0, 2147483648.0),
                Op::I32TruncF64U => trunc!(f64 -> u32 : -1.0, 4294967296.0),
                Op::I64ExtendI32S => convert!(i32 -> i64),
                Op::I64ExtendI32U => convert!(u32 -> u64),
                Op::I64TruncF32S => trunc!(f32 -> i64 : -9223373136366404000.0, 9223372036854775808.0),
                Op::I64TruncF32U => trunc!(f32 -> u64 : -1.0, 18446744073709551616.0),
                Op::I64TruncF64S => trunc!(f64 -> i64 : -9223372036854777856.0, 9223372036854775808.0),
                Op::I64TruncF64U => trunc!(f64 -> u64 : -1.0, 18446744073709551616.0),
                Op::F32ConvertI32S => convert!(i32 -> f32),
                Op::F32ConvertI32U => convert!(u32 -> f32),
                Op::F32ConvertI64S => convert!(i64 -> f32),
                Op::F32ConvertI64U => convert!(u64 -> f32),
                Op::F32DemoteF64 => convert!(f64 -> f32),
                Op::F64ConvertI32S => convert!(i32 -> f64),
                Op::F64ConvertI32U => convert!(u32 -> f64),
                Op::F64ConvertI64S => convert!(i64 -> f64),
                Op::F64ConvertI64U => convert!(u64 -> f64),
                Op::F64PromoteF32 => convert!(f32 -> f64),
                // registers hold raw bits
                Op::I32ReinterpretF32 | Op::F32ReinterpretI32 | Op::I64ReinterpretF64 | Op::F64ReinterpretI64 => {
                    reg!(1) = reg!(0);
                    pc += 2;
                }
                Op::I32Extend8S => unary!(u32 -> u32, |x: u32| x as i8 as i32 as u32),
                Op::I32Extend16S => unary!(u32 -> u32, |x: u32| x as i16 as i32 as u32),
                Op::I64Extend8S => unary!(u64 -> u64, |x: u64| x as i8 as i64 as u64),
                Op::I64Extend16S => unary!(u64 -> u64, |x: u64| x as i16 as i64 as u64),
                Op::I64Extend32S => unary!(u64 -> u64, |x: u64| x as i32 as i64 as u64),

                // `as` saturates and maps NaN to zero
                Op::I32TruncSatF32S => convert!(f32 -> i32),
                Op::I32TruncSatF32U => convert!(f32 -> u32),
                Op::I32TruncSatF64S => convert!(f64 -> i32),
                Op::I32TruncSatF64U => convert!(f64 -> u32),
                Op::I64TruncSatF32S => convert!(f32 -> i64),
                Op::I64TruncSatF32U => convert!(f32 -> u64),
                Op::I64TruncSatF64S => convert!(f64 -> i64),
                Op::I64TruncSatF64U => convert!(f64 -> u64),

                Op::RefNull => {
                    reg!(0) = WasmValue::NULL;
                    pc += 1;
                }
                Op::RefIsNull => {
                    reg!(1) = WasmValue::from_u32((reg!(0).0 == 0) as u32);
                    pc += 2;
                }
                Op::RefFunc => {
                    reg!(1) = WasmValue(func_ref(inst.id, cell!(0) as u32));
                    pc += 2;
                }

                Op::MemoryInit => {
                    let segment = inst.data.borrow()[cell!(0) as usize].clone();
                    let (dst, src, n) = (reg!(1).as_u32(), reg!(2).as_u32(), reg!(3).as_u32());
                    let end = (src as usize).checked_add(n as usize).filter(|&e| e <= segment.len());
                    let Some(end) = end else { return Err(Error::trap(OOB_MEMORY_ACCESS)) };
                    memory!().borrow_mut().write_bytes(dst, &segment[src as usize..end])?;
                    pc += 4;
                }
                Op::DataDrop => {
                    inst.data.borrow_mut()[cell!(0) as usize] = Rc::from(Vec::new());
                    pc += 1;
                }
                Op::MemoryCopy => {
                    memory!().borrow_mut().copy_within(reg!(0).as_u32(), reg!(1).as_u32(), reg!(2).as_u32())?;
                    pc += 3;
                }
                Op::MemoryFill => {
                    memory!().borrow_mut().fill(reg!(0).as_u32(), reg!(1).0 as u8, reg!(2).as_u32())?;
                    pc += 3;
                }
                Op::TableInit => {
                    let segment = inst.elements.borrow()[cell!(0) as usize].clone();
                    let (dst, src, n) = (reg!(2).as_u32(), reg!(3).as_u32(), reg!(4).as_u32());
                    let end = (src as usize).checked_add(n as usize).filter(|&e| e <= segment.len());
                    let Some(end) = end else { return Err(Error::trap(OOB_TABLE_ACCESS)) };
                    inst.tables[cell!(1) as usize].borrow_mut().write(dst, &segment[src as usize..end])?;
                    pc += 5;
                }
                Op::ElemDrop => {
                    inst.elements.borrow_mut()[cell!(0) as usize] = Rc::from(Vec::new());
                    pc += 1;
                }
                Op::TableCopy => {
                    let (dst_table, src_table) = (cell!(0) as usize, cell!(1) as usize);
                    let (dst, src, n) = (reg!(2).as_u32(), reg!(3).as_u32(), reg!(4).as_u32());
                    if Rc::ptr_eq(&inst.tables[dst_table], &inst.tables[src_table]) {
                        inst.tables[dst_table].borrow_mut().copy_within(dst, src, n)?;
                    } else {
                        let values = inst.tables[src_table].borrow().read(src, n)?.to_vec();
                        inst.tables[dst_table].borrow_mut().write(dst, &values)?;
                    }
                    pc += 5;
                }
                Op::TableGrow => {
                    let (value, delta) = (reg!(1), reg!(2).as_u32());
                    reg!(3) = WasmValue::from_u32(inst.tables[cell!(0) as usize].borrow_mut().grow(delta, value));
                    pc += 4;
                }
                Op::TableSize => {
                    reg!(1) = WasmValue::from_u32(inst.tables[cell!(0) as usize].borrow().size());
                    pc += 2;
                }
                Op::TableFill => {
                    let (offset, value, n) = (reg!(1).as_u32(), reg!(2), reg!(3).as_u32());
                    inst.tables[cell!(0) as usize].borrow_mut().fill(offset, value, n)?;
                    pc += 4;
                }

                // structured control flow is resolved by the compiler
                Op::Block | Op::Loop | Op::If | Op::Else | Op::End | Op::Br | Op::BrIf | Op::BrTable
                | Op::Drop | Op::SelectT | Op::LocalGet | Op::LocalSet | Op::LocalTee => {
                    return Err(Error::trap(INVALID_OP));
                }
            }
        }
    }

    /// Calls `callee` with arguments in registers `base..`. Wasm callees get a
    /// new frame; host functions run to completion.
    fn call_function(&mut self, callee: &RuntimeFunction, base: usize, return_pc: usize) -> Result<(), Error> {
        match callee {
            RuntimeFunction::Wasm { instance, index, .. } => {
                let owner = instance.upgrade().ok_or(Error::trap(DEAD_INSTANCE))?;
                self.push_function(owner, *index, base, return_pc)
            }
            RuntimeFunction::Host(host) => {
                let n = host.ty.params.len();
                let end = base + n.max(host.ty.returns.len());
                if end > self.locals.len() { return Err(Error::trap(STACK_EXHAUSTED)); }
                let results = host.call(&self.locals[base..base + n])?;
                self.locals[base..base + results.len()].copy_from_slice(&results);
                Ok(())
            }
        }
    }
}

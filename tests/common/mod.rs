//! Small assembler for test modules, so tests do not depend on external tools.
#![allow(dead_code)]

use regwasm::ValType;

pub fn uleb(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(mut v: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn valtype(ty: ValType) -> u8 {
    match ty {
        ValType::I32 => 0x7f,
        ValType::I64 => 0x7e,
        ValType::F32 => 0x7d,
        ValType::F64 => 0x7c,
        ValType::V128 => 0x7b,
        ValType::FuncRef => 0x70,
        ValType::ExternRef => 0x6f,
        other => panic!("no encoding for {other}"),
    }
}

fn name(s: &str, out: &mut Vec<u8>) {
    uleb(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn limits(min: u32, max: Option<u32>, out: &mut Vec<u8>) {
    match max {
        None => {
            out.push(0);
            uleb(min as u64, out);
        }
        Some(max) => {
            out.push(1);
            uleb(min as u64, out);
            uleb(max as u64, out);
        }
    }
}

/// Opcode bytes used by the tests.
pub mod op {
    pub const UNREACHABLE: u8 = 0x00;
    pub const NOP: u8 = 0x01;
    pub const BLOCK: u8 = 0x02;
    pub const LOOP: u8 = 0x03;
    pub const IF: u8 = 0x04;
    pub const ELSE: u8 = 0x05;
    pub const END: u8 = 0x0b;
    pub const BR: u8 = 0x0c;
    pub const BR_IF: u8 = 0x0d;
    pub const BR_TABLE: u8 = 0x0e;
    pub const RETURN: u8 = 0x0f;
    pub const CALL: u8 = 0x10;
    pub const CALL_INDIRECT: u8 = 0x11;
    pub const DROP: u8 = 0x1a;
    pub const SELECT: u8 = 0x1b;
    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const GLOBAL_SET: u8 = 0x24;
    pub const I32_LOAD: u8 = 0x28;
    pub const I64_LOAD: u8 = 0x29;
    pub const I32_LOAD8_S: u8 = 0x2c;
    pub const I32_LOAD8_U: u8 = 0x2d;
    pub const I32_STORE: u8 = 0x36;
    pub const I64_STORE: u8 = 0x37;
    pub const I32_STORE8: u8 = 0x3a;
    pub const MEMORY_SIZE: u8 = 0x3f;
    pub const MEMORY_GROW: u8 = 0x40;
    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const F32_CONST: u8 = 0x43;
    pub const F64_CONST: u8 = 0x44;
    pub const I32_EQZ: u8 = 0x45;
    pub const I32_EQ: u8 = 0x46;
    pub const I32_LT_S: u8 = 0x48;
    pub const I32_LT_U: u8 = 0x49;
    pub const I32_GT_S: u8 = 0x4a;
    pub const I32_LE_S: u8 = 0x4c;
    pub const I64_EQ: u8 = 0x51;
    pub const F64_LT: u8 = 0x63;
    pub const I32_CLZ: u8 = 0x67;
    pub const I32_ADD: u8 = 0x6a;
    pub const I32_SUB: u8 = 0x6b;
    pub const I32_MUL: u8 = 0x6c;
    pub const I32_DIV_S: u8 = 0x6d;
    pub const I32_DIV_U: u8 = 0x6e;
    pub const I32_REM_S: u8 = 0x6f;
    pub const I32_AND: u8 = 0x71;
    pub const I32_SHL: u8 = 0x74;
    pub const I32_ROTL: u8 = 0x77;
    pub const I64_ADD: u8 = 0x7c;
    pub const I64_MUL: u8 = 0x7e;
    pub const I64_DIV_S: u8 = 0x7f;
    pub const F32_ADD: u8 = 0x92;
    pub const F32_MIN: u8 = 0x96;
    pub const F64_ADD: u8 = 0xa0;
    pub const F64_DIV: u8 = 0xa3;
    pub const F64_MIN: u8 = 0xa4;
    pub const F64_MAX: u8 = 0xa5;
    pub const F32_NEAREST: u8 = 0x90;
    pub const I32_WRAP_I64: u8 = 0xa7;
    pub const I32_TRUNC_F32_S: u8 = 0xa8;
    pub const I32_TRUNC_F64_S: u8 = 0xaa;
    pub const I32_TRUNC_F64_U: u8 = 0xab;
    pub const I64_EXTEND_I32_S: u8 = 0xac;
    pub const I64_EXTEND_I32_U: u8 = 0xad;
    pub const F64_CONVERT_I32_S: u8 = 0xb7;
    pub const I32_REINTERPRET_F32: u8 = 0xbc;
    pub const I32_EXTEND8_S: u8 = 0xc0;
    pub const REF_NULL: u8 = 0xd0;
    pub const REF_IS_NULL: u8 = 0xd1;
    pub const REF_FUNC: u8 = 0xd2;
    pub const TABLE_GET: u8 = 0x25;
    pub const TABLE_SET: u8 = 0x26;
    pub const PREFIX: u8 = 0xfc;
    // 0xfc sub-opcodes
    pub const I32_TRUNC_SAT_F64_S: u32 = 2;
    pub const MEMORY_INIT: u32 = 8;
    pub const DATA_DROP: u32 = 9;
    pub const MEMORY_COPY: u32 = 10;
    pub const MEMORY_FILL: u32 = 11;
    pub const TABLE_INIT: u32 = 12;
    pub const ELEM_DROP: u32 = 13;
    pub const TABLE_COPY: u32 = 14;
    pub const TABLE_GROW: u32 = 15;
    pub const TABLE_SIZE: u32 = 16;
    pub const TABLE_FILL: u32 = 17;
}

/// Function body assembler. `finish` appends the final `end`.
#[derive(Default, Clone)]
pub struct Body {
    bytes: Vec<u8>,
}

impl Body {
    pub fn new() -> Self { Self::default() }

    pub fn op(mut self, byte: u8) -> Self {
        self.bytes.push(byte);
        self
    }

    pub fn ext(mut self, sub: u32) -> Self {
        self.bytes.push(op::PREFIX);
        uleb(sub as u64, &mut self.bytes);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// An unsigned LEB128 immediate.
    pub fn idx(mut self, v: u32) -> Self {
        uleb(v as u64, &mut self.bytes);
        self
    }

    pub fn i32_const(mut self, v: i32) -> Self {
        self.bytes.push(op::I32_CONST);
        sleb(v as i64, &mut self.bytes);
        self
    }

    pub fn i64_const(mut self, v: i64) -> Self {
        self.bytes.push(op::I64_CONST);
        sleb(v, &mut self.bytes);
        self
    }

    pub fn f32_const(mut self, v: f32) -> Self {
        self.bytes.push(op::F32_CONST);
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64_const(mut self, v: f64) -> Self {
        self.bytes.push(op::F64_CONST);
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn local_get(self, i: u32) -> Self { self.op(op::LOCAL_GET).idx(i) }
    pub fn local_set(self, i: u32) -> Self { self.op(op::LOCAL_SET).idx(i) }
    pub fn local_tee(self, i: u32) -> Self { self.op(op::LOCAL_TEE).idx(i) }
    pub fn global_get(self, i: u32) -> Self { self.op(op::GLOBAL_GET).idx(i) }
    pub fn global_set(self, i: u32) -> Self { self.op(op::GLOBAL_SET).idx(i) }
    pub fn call(self, f: u32) -> Self { self.op(op::CALL).idx(f) }
    pub fn call_indirect(self, ty: u32, table: u32) -> Self { self.op(op::CALL_INDIRECT).idx(ty).idx(table) }
    pub fn br(self, depth: u32) -> Self { self.op(op::BR).idx(depth) }
    pub fn br_if(self, depth: u32) -> Self { self.op(op::BR_IF).idx(depth) }

    pub fn br_table(mut self, targets: &[u32], default: u32) -> Self {
        self.bytes.push(op::BR_TABLE);
        uleb(targets.len() as u64, &mut self.bytes);
        for &t in targets {
            uleb(t as u64, &mut self.bytes);
        }
        uleb(default as u64, &mut self.bytes);
        self
    }

    /// `block`, `loop` or `if` with an empty or single-value block type.
    pub fn block(mut self, opcode: u8, result: Option<ValType>) -> Self {
        self.bytes.push(opcode);
        self.bytes.push(result.map(valtype).unwrap_or(0x40));
        self
    }

    /// `block`, `loop` or `if` with a type-index block type.
    pub fn block_typed(mut self, opcode: u8, ty: u32) -> Self {
        self.bytes.push(opcode);
        sleb(ty as i64, &mut self.bytes);
        self
    }

    /// Memory access with alignment exponent `align` and `offset`.
    pub fn mem(mut self, opcode: u8, align: u32, offset: u32) -> Self {
        self.bytes.push(opcode);
        uleb(align as u64, &mut self.bytes);
        uleb(offset as u64, &mut self.bytes);
        self
    }

    pub fn end(self) -> Self { self.op(op::END) }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.push(op::END);
        self.bytes
    }
}

struct Func {
    ty: u32,
    locals: Vec<(u32, ValType)>,
    body: Vec<u8>,
}

enum Segment {
    Active(Vec<u8>),
    Passive,
    Declarative,
}

#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
    imports: Vec<u8>,
    import_count: u32,
    imported_funcs: u32,
    funcs: Vec<Func>,
    tables: Vec<u8>,
    table_count: u32,
    defined_tables: u32,
    memories: Vec<u8>,
    defined_memories: u32,
    globals: Vec<u8>,
    global_count: u32,
    defined_globals: u32,
    exports: Vec<u8>,
    export_count: u32,
    start: Option<u32>,
    elements: Vec<(Segment, Vec<u32>)>,
    data: Vec<(Segment, Vec<u8>)>,
    data_count: bool,
    names: Vec<(u32, String)>,
}

impl ModuleBuilder {
    pub fn new() -> Self { Self::default() }

    /// Adds (or reuses) a function type and returns its index.
    pub fn ty(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let key = (params.to_vec(), results.to_vec());
        if let Some(i) = self.types.iter().position(|t| *t == key) {
            return i as u32;
        }
        self.types.push(key);
        self.types.len() as u32 - 1
    }

    pub fn import_func(&mut self, module: &str, field: &str, params: &[ValType], results: &[ValType]) -> u32 {
        assert!(self.funcs.is_empty(), "imports must be declared before functions");
        let ty = self.ty(params, results);
        name(module, &mut self.imports);
        name(field, &mut self.imports);
        self.imports.push(0x00);
        uleb(ty as u64, &mut self.imports);
        self.import_count += 1;
        self.imported_funcs += 1;
        self.imported_funcs - 1
    }

    pub fn import_memory(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) {
        name(module, &mut self.imports);
        name(field, &mut self.imports);
        self.imports.push(0x02);
        limits(min, max, &mut self.imports);
        self.import_count += 1;
    }

    pub fn import_global(&mut self, module: &str, field: &str, ty: ValType, mutable: bool) -> u32 {
        name(module, &mut self.imports);
        name(field, &mut self.imports);
        self.imports.push(0x03);
        self.imports.push(valtype(ty));
        self.imports.push(mutable as u8);
        self.import_count += 1;
        self.global_count += 1;
        self.global_count - 1
    }

    pub fn import_table(&mut self, module: &str, field: &str, elem: ValType, min: u32, max: Option<u32>) -> u32 {
        name(module, &mut self.imports);
        name(field, &mut self.imports);
        self.imports.push(0x01);
        self.imports.push(valtype(elem));
        limits(min, max, &mut self.imports);
        self.import_count += 1;
        self.table_count += 1;
        self.table_count - 1
    }

    /// Defines a function; `body` must end with `end` (see [`Body::finish`]).
    pub fn func(&mut self, params: &[ValType], results: &[ValType], locals: &[(u32, ValType)], body: Vec<u8>) -> u32 {
        let ty = self.ty(params, results);
        self.funcs.push(Func { ty, locals: locals.to_vec(), body });
        self.imported_funcs + self.funcs.len() as u32 - 1
    }

    pub fn name_func(&mut self, index: u32, func_name: &str) { self.names.push((index, func_name.to_string())); }

    pub fn table(&mut self, elem: ValType, min: u32, max: Option<u32>) -> u32 {
        self.tables.push(valtype(elem));
        limits(min, max, &mut self.tables);
        self.table_count += 1;
        self.defined_tables += 1;
        self.table_count - 1
    }

    pub fn memory(&mut self, min: u32, max: Option<u32>) {
        limits(min, max, &mut self.memories);
        self.defined_memories += 1;
    }

    /// Defines a global; `init` is a constant expression including its `end`.
    pub fn global(&mut self, ty: ValType, mutable: bool, init: Vec<u8>) -> u32 {
        self.globals.push(valtype(ty));
        self.globals.push(mutable as u8);
        self.globals.extend_from_slice(&init);
        self.global_count += 1;
        self.defined_globals += 1;
        self.global_count - 1
    }

    pub fn export(&mut self, export_name: &str, kind: u8, index: u32) {
        name(export_name, &mut self.exports);
        self.exports.push(kind);
        uleb(index as u64, &mut self.exports);
        self.export_count += 1;
    }

    pub fn export_func(&mut self, export_name: &str, index: u32) { self.export(export_name, 0x00, index) }

    pub fn start(&mut self, index: u32) { self.start = Some(index); }

    /// Active element segment for table 0 at constant offset `offset`.
    pub fn elem_active(&mut self, offset: i32, funcs: &[u32]) {
        self.elements.push((Segment::Active(Body::new().i32_const(offset).finish()), funcs.to_vec()));
    }

    pub fn elem_passive(&mut self, funcs: &[u32]) { self.elements.push((Segment::Passive, funcs.to_vec())); }

    pub fn elem_declarative(&mut self, funcs: &[u32]) { self.elements.push((Segment::Declarative, funcs.to_vec())); }

    /// Active data segment for memory 0 with offset expression `offset` (including `end`).
    pub fn data_active_expr(&mut self, offset: Vec<u8>, bytes: &[u8]) {
        self.data.push((Segment::Active(offset), bytes.to_vec()));
    }

    pub fn data_active(&mut self, offset: i32, bytes: &[u8]) {
        self.data_active_expr(Body::new().i32_const(offset).finish(), bytes)
    }

    pub fn data_passive(&mut self, bytes: &[u8]) {
        self.data.push((Segment::Passive, bytes.to_vec()));
        self.data_count = true;
    }

    fn section(out: &mut Vec<u8>, id: u8, count: u32, payload: &[u8]) {
        let mut content = Vec::new();
        uleb(count as u64, &mut content);
        content.extend_from_slice(payload);
        out.push(id);
        uleb(content.len() as u64, out);
        out.extend_from_slice(&content);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"\0asm".to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());

        if !self.types.is_empty() {
            let mut p = Vec::new();
            for (params, results) in &self.types {
                p.push(0x60);
                uleb(params.len() as u64, &mut p);
                p.extend(params.iter().map(|&t| valtype(t)));
                uleb(results.len() as u64, &mut p);
                p.extend(results.iter().map(|&t| valtype(t)));
            }
            Self::section(&mut out, 1, self.types.len() as u32, &p);
        }
        if self.import_count > 0 {
            Self::section(&mut out, 2, self.import_count, &self.imports);
        }
        if !self.funcs.is_empty() {
            let mut p = Vec::new();
            for f in &self.funcs {
                uleb(f.ty as u64, &mut p);
            }
            Self::section(&mut out, 3, self.funcs.len() as u32, &p);
        }
        if self.defined_tables > 0 {
            Self::section(&mut out, 4, self.defined_tables, &self.tables);
        }
        if self.defined_memories > 0 {
            Self::section(&mut out, 5, self.defined_memories, &self.memories);
        }
        if self.defined_globals > 0 {
            Self::section(&mut out, 6, self.defined_globals, &self.globals);
        }
        if self.export_count > 0 {
            Self::section(&mut out, 7, self.export_count, &self.exports);
        }
        if let Some(start) = self.start {
            let mut p = Vec::new();
            uleb(start as u64, &mut p);
            out.push(8);
            uleb(p.len() as u64, &mut out);
            out.extend_from_slice(&p);
        }
        if !self.elements.is_empty() {
            let mut p = Vec::new();
            for (mode, funcs) in &self.elements {
                match mode {
                    Segment::Active(offset) => {
                        p.push(0);
                        p.extend_from_slice(offset);
                    }
                    Segment::Passive => p.extend_from_slice(&[1, 0]),
                    Segment::Declarative => p.extend_from_slice(&[3, 0]),
                }
                uleb(funcs.len() as u64, &mut p);
                for &f in funcs {
                    uleb(f as u64, &mut p);
                }
            }
            Self::section(&mut out, 9, self.elements.len() as u32, &p);
        }
        if self.data_count {
            let mut p = Vec::new();
            uleb(self.data.len() as u64, &mut p);
            out.push(12);
            uleb(p.len() as u64, &mut out);
            out.extend_from_slice(&p);
        }
        if !self.funcs.is_empty() {
            let mut p = Vec::new();
            for f in &self.funcs {
                let mut entry = Vec::new();
                uleb(f.locals.len() as u64, &mut entry);
                for &(n, ty) in &f.locals {
                    uleb(n as u64, &mut entry);
                    entry.push(valtype(ty));
                }
                entry.extend_from_slice(&f.body);
                uleb(entry.len() as u64, &mut p);
                p.extend_from_slice(&entry);
            }
            Self::section(&mut out, 10, self.funcs.len() as u32, &p);
        }
        if !self.data.is_empty() {
            let mut p = Vec::new();
            for (mode, bytes) in &self.data {
                match mode {
                    Segment::Active(offset) => {
                        p.push(0);
                        p.extend_from_slice(offset);
                    }
                    Segment::Passive | Segment::Declarative => p.push(1),
                }
                uleb(bytes.len() as u64, &mut p);
                p.extend_from_slice(bytes);
            }
            Self::section(&mut out, 11, self.data.len() as u32, &p);
        }
        if !self.names.is_empty() {
            let mut sub = Vec::new();
            uleb(self.names.len() as u64, &mut sub);
            for (index, func_name) in &self.names {
                uleb(*index as u64, &mut sub);
                name(func_name, &mut sub);
            }
            let mut p = Vec::new();
            name("name", &mut p);
            p.push(1);
            uleb(sub.len() as u64, &mut p);
            p.extend_from_slice(&sub);
            out.push(0);
            uleb(p.len() as u64, &mut out);
            out.extend_from_slice(&p);
        }
        out
    }
}

use crate::debug_println;
use crate::error::*;
use crate::module::*;
use crate::opcodes::{ImmKind, Immediate, Instr, Op};
use crate::reader::BinaryReader;
use crate::types::*;

pub const MAGIC_HEADER: &[u8] = b"\0asm";
pub const VERSION: u32 = 1;

const SECTION_CUSTOM: u8 = 0;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATA_COUNT: u8 = 12;

/// Position of a section id in the canonical section order.
fn section_rank(id: u8) -> u8 {
    match id {
        SECTION_DATA_COUNT => 10,
        SECTION_CODE => 11,
        SECTION_DATA => 12,
        id => id,
    }
}

/// Decodes a module binary into a [`Module`], recording every problem it
/// finds and continuing with the next section or function body.
pub(crate) struct Parser<'a, 'm> {
    module: &'m mut Module,
    bytes: &'a [u8],
}

impl<'a, 'm> Parser<'a, 'm> {
    pub fn new(module: &'m mut Module, bytes: &'a [u8]) -> Self { Self { module, bytes } }

    pub fn parse(mut self) {
        let bytes = self.bytes;
        if bytes.len() < 4 || &bytes[0..4] != MAGIC_HEADER {
            self.module.error(0, Error::Malformed(NO_MAGIC_HEADER));
            return;
        }
        let mut r = BinaryReader::new(bytes);
        if let Err(e) = r.skip(4) { return self.module.error(r.offset(), e); }
        match r.read_u32() {
            Ok(VERSION) => {}
            Ok(_) => return self.module.error(4, Error::Malformed(UNKNOWN_BINARY_VERSION)),
            Err(e) => return self.module.error(r.offset(), e),
        }

        if let Err(e) = self.read_toc(&mut r) {
            self.module.error(r.offset(), e);
        }

        let toc = self.module.toc.clone();
        for entry in toc.iter().filter(|e| e.id != SECTION_CUSTOM) {
            self.parse_section(entry);
        }
        self.check_counts(&toc);
        for entry in toc.iter().filter(|e| e.id == SECTION_CUSTOM) {
            self.parse_custom(entry);
        }
    }

    // ---------------- Table of contents ----------------

    fn read_toc(&mut self, r: &mut BinaryReader<'a>) -> Result<(), Error> {
        let mut seen = [false; 13];
        let mut last_rank = 0;
        while r.has_more() {
            let start = r.offset();
            let id = r.read_u8()?;
            let len = r.read_leb_u32()? as usize;
            let offset = r.offset();
            if len > r.remaining() { return Err(Error::Malformed(SECTION_OUT_OF_BOUNDS)); }
            r.skip(len)?;
            debug_println!("section {} at 0x{:x}, {} bytes", id, offset, len);

            let entry = SectionEntry { id, offset, len };
            if id == SECTION_CUSTOM {
                self.module.toc.push(entry);
                continue;
            }
            if id > SECTION_DATA_COUNT {
                self.module.error(start, Error::Malformed(INVALID_SECTION_ID));
                return Ok(());
            }
            if seen[id as usize] {
                self.module.error(start, Error::Malformed(SECTION_REDECLARED));
                continue;
            }
            if id == SECTION_DATA_COUNT && seen[SECTION_CODE as usize] {
                self.module.error(start, Error::Malformed(DATA_COUNT_AFTER_CODE));
                continue;
            }
            if section_rank(id) < last_rank {
                self.module.error(start, Error::Malformed(SECTION_OUT_OF_ORDER));
                continue;
            }
            seen[id as usize] = true;
            last_rank = section_rank(id);
            self.module.toc.push(entry);
        }
        Ok(())
    }

    fn section_reader(&self, entry: &SectionEntry) -> Result<BinaryReader<'a>, Error> {
        let mut r = BinaryReader::new(self.bytes);
        r.seek(entry.offset)?;
        r.subreader(entry.len)
    }

    fn parse_section(&mut self, entry: &SectionEntry) {
        let mut r = match self.section_reader(entry) {
            Ok(r) => r,
            Err(e) => return self.module.error(entry.offset, e),
        };
        let result = match entry.id {
            1 => self.parse_type_section(&mut r),
            2 => self.parse_import_section(&mut r),
            3 => self.parse_function_section(&mut r),
            4 => self.parse_table_section(&mut r),
            5 => self.parse_memory_section(&mut r),
            6 => self.parse_global_section(&mut r),
            7 => self.parse_export_section(&mut r),
            8 => self.parse_start_section(&mut r),
            9 => self.parse_element_section(&mut r),
            10 => self.parse_code_section(&mut r),
            11 => self.parse_data_section(&mut r),
            12 => self.parse_data_count_section(&mut r),
            _ => Err(Error::Malformed(INVALID_SECTION_ID)),
        };
        match result {
            Err(e) => self.module.error(r.offset(), e),
            Ok(()) if r.has_more() => self.module.error(r.offset(), Error::Malformed(SECTION_SIZE_MISMATCH)),
            Ok(()) => {}
        }
    }

    fn check_counts(&mut self, toc: &[SectionEntry]) {
        let has = |id: u8| toc.iter().any(|e| e.id == id);
        let defined = self.module.functions.len() - self.module.num_imported_functions();
        if defined > 0 && !has(SECTION_CODE) {
            self.module.error(self.bytes.len(), Error::Malformed(FUNC_CODE_INCONSISTENT));
        }
        if matches!(self.module.data_count, Some(n) if n > 0) && !has(SECTION_DATA) {
            self.module.error(self.bytes.len(), Error::Malformed(DATA_COUNT_MISMATCH));
        }
    }

    // ---------------- Helpers ----------------

    /// Reads a vector length. Every element takes at least one byte.
    fn read_count(r: &mut BinaryReader) -> Result<u32, Error> {
        let n = r.read_leb_u32()?;
        if n as usize > r.remaining() { return Err(Error::Malformed(LENGTH_OUT_OF_BOUNDS)); }
        Ok(n)
    }

    fn read_val_type(r: &mut BinaryReader) -> Result<ValType, Error> {
        match ValType::from_byte(r.read_u8()?) {
            Some(ValType::V128) => Err(Error::Validation(VECTOR_UNSUPPORTED)),
            Some(ty) => Ok(ty),
            None => Err(Error::Malformed(INVALID_VALUE_TYPE)),
        }
    }

    fn read_val_types(r: &mut BinaryReader) -> Result<Vec<ValType>, Error> {
        let n = Self::read_count(r)?;
        (0..n).map(|_| Self::read_val_type(r)).collect()
    }

    fn read_ref_type(r: &mut BinaryReader) -> Result<ValType, Error> {
        ValType::ref_from_byte(r.read_u8()?).ok_or(Error::Malformed(MALFORMED_REF_TYPE))
    }

    fn read_limits(r: &mut BinaryReader) -> Result<Limits, Error> {
        match r.read_u8()? {
            0x00 => Ok(Limits { min: r.read_leb_u32()?, max: None }),
            0x01 => Ok(Limits { min: r.read_leb_u32()?, max: Some(r.read_leb_u32()?) }),
            _ => Err(Error::Malformed(INVALID_LIMITS_KIND)),
        }
    }

    fn read_table_type(&mut self, r: &mut BinaryReader) -> Result<TableType, Error> {
        let elem = Self::read_ref_type(r)?;
        let offset = r.offset();
        let limits = Self::read_limits(r)?;
        if matches!(limits.max, Some(max) if limits.min > max) {
            self.module.error(offset, Error::Validation(MIN_GREATER_THAN_MAX));
        }
        Ok(TableType { elem, limits })
    }

    fn read_memory_type(&mut self, r: &mut BinaryReader) -> Result<Limits, Error> {
        let offset = r.offset();
        let limits = Self::read_limits(r)?;
        if limits.min > Module::MAX_PAGES || matches!(limits.max, Some(max) if max > Module::MAX_PAGES) {
            self.module.error(offset, Error::Validation(MEMORY_SIZE_LIMIT));
        }
        if matches!(limits.max, Some(max) if limits.min > max) {
            self.module.error(offset, Error::Validation(MIN_GREATER_THAN_MAX));
        }
        Ok(limits)
    }

    fn read_global_type(r: &mut BinaryReader) -> Result<GlobalType, Error> {
        let ty = Self::read_val_type(r)?;
        let mutable = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(Error::Malformed(INVALID_MUTABILITY)),
        };
        Ok(GlobalType { ty, mutable })
    }

    /// Resolves a type index, recording an error and substituting an empty
    /// signature when it is out of range.
    fn func_type(&mut self, idx: u32, offset: usize) -> FuncType {
        match self.module.types.get(idx as usize) {
            Some(ty) => ty.clone(),
            None => {
                self.module.error(offset, Error::Validation(UNKNOWN_TYPE));
                FuncType::default()
            }
        }
    }

    // ---------------- Sections ----------------

    fn parse_type_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        self.module.types.reserve_exact(n as usize);
        for _ in 0..n {
            if r.read_u8()? != 0x60 { return Err(Error::Malformed(INVALID_FUNC_TYPE_PREFIX)); }
            let params = Self::read_val_types(r)?;
            let returns = Self::read_val_types(r)?;
            self.module.types.push(FuncType { params, returns });
        }
        Ok(())
    }

    fn parse_import_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let module = r.read_name()?;
            let field = r.read_name()?;
            let kind = ExternKind::from_byte(r.read_u8()?).ok_or(Error::Malformed(MALFORMED_IMPORT_KIND))?;
            let import = Some(ImportRef { module: module.clone(), field: field.clone() });
            let index = match kind {
                ExternKind::Func => {
                    let offset = r.offset();
                    let type_idx = r.read_leb_u32()?;
                    let ty = self.func_type(type_idx, offset);
                    self.module.functions.push(Function::new(type_idx, ty, import));
                    self.module.functions.len() - 1
                }
                ExternKind::Table => {
                    let ty = self.read_table_type(r)?;
                    self.module.tables.push(Table { ty, import });
                    self.module.tables.len() - 1
                }
                ExternKind::Memory => {
                    let limits = self.read_memory_type(r)?;
                    self.module.memories.push(Memory { limits, import });
                    self.module.memories.len() - 1
                }
                ExternKind::Global => {
                    let ty = Self::read_global_type(r)?;
                    self.module.globals.push(Global { ty, init: None, import });
                    self.module.globals.len() - 1
                }
            };
            self.module.imports.push(Import { module, field, kind, index: index as u32 });
        }
        Ok(())
    }

    fn parse_function_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        self.module.functions.reserve(n as usize);
        for _ in 0..n {
            let offset = r.offset();
            let type_idx = r.read_leb_u32()?;
            let ty = self.func_type(type_idx, offset);
            self.module.functions.push(Function::new(type_idx, ty, None));
        }
        Ok(())
    }

    fn parse_table_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let ty = self.read_table_type(r)?;
            self.module.tables.push(Table { ty, import: None });
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let limits = self.read_memory_type(r)?;
            self.module.memories.push(Memory { limits, import: None });
        }
        Ok(())
    }

    fn parse_global_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let ty = Self::read_global_type(r)?;
            let init = self.read_const_expr(r)?;
            self.module.globals.push(Global { ty, init: Some(init), import: None });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let offset = r.offset();
            let name = r.read_name()?;
            let kind = ExternKind::from_byte(r.read_u8()?).ok_or(Error::Malformed(INVALID_EXPORT_KIND))?;
            let index = r.read_leb_u32()?;
            let (len, unknown) = match kind {
                ExternKind::Func => (self.module.functions.len(), UNKNOWN_FUNC),
                ExternKind::Table => (self.module.tables.len(), UNKNOWN_TABLE),
                ExternKind::Memory => (self.module.memories.len(), UNKNOWN_MEMORY),
                ExternKind::Global => (self.module.globals.len(), UNKNOWN_GLOBAL),
            };
            if index as usize >= len {
                self.module.error(offset, Error::Validation(unknown));
                continue;
            }
            if self.module.export(&name).is_some() {
                self.module.error(offset, Error::Validation(DUPLICATE_EXPORT));
                continue;
            }
            self.module.exports.push(Export { name, kind, index });
        }
        Ok(())
    }

    fn parse_start_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let offset = r.offset();
        let start = r.read_leb_u32()?;
        match self.module.functions.get(start as usize) {
            None => self.module.error(offset, Error::Validation(UNKNOWN_FUNC)),
            Some(f) if !f.ty.params.is_empty() || !f.ty.returns.is_empty() => {
                self.module.error(offset, Error::Validation(START_FUNC_TYPE))
            }
            Some(_) => self.module.start = Some(start),
        }
        Ok(())
    }

    fn read_elem_kind(r: &mut BinaryReader) -> Result<ValType, Error> {
        match r.read_u8()? {
            0x00 => Ok(ValType::FuncRef),
            _ => Err(Error::Malformed(INVALID_ELEM_KIND)),
        }
    }

    /// Function index payloads become `ref.func idx; end` expressions.
    fn read_func_indices(r: &mut BinaryReader) -> Result<Vec<ConstExpr>, Error> {
        let n = Self::read_count(r)?;
        (0..n)
            .map(|_| {
                let offset = r.offset();
                let idx = r.read_leb_u32()?;
                let mut ref_func = Instr::new(Op::RefFunc, offset);
                ref_func.imm.push(Immediate::Index(idx));
                Ok(ConstExpr::new(vec![ref_func, Instr::new(Op::End, r.offset())], offset))
            })
            .collect()
    }

    fn read_expr_vec(&mut self, r: &mut BinaryReader) -> Result<Vec<ConstExpr>, Error> {
        let n = Self::read_count(r)?;
        (0..n).map(|_| self.read_const_expr(r)).collect()
    }

    fn parse_element_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)?;
        for _ in 0..n {
            let prefix = r.read_leb_u32()?;
            let (elem_type, mode, inits) = match prefix {
                0 => {
                    let offset = self.read_const_expr(r)?;
                    (ValType::FuncRef, SegmentMode::Active { index: 0, offset }, Self::read_func_indices(r)?)
                }
                1 => {
                    let ty = Self::read_elem_kind(r)?;
                    (ty, SegmentMode::Passive, Self::read_func_indices(r)?)
                }
                2 => {
                    let index = r.read_leb_u32()?;
                    let offset = self.read_const_expr(r)?;
                    let ty = Self::read_elem_kind(r)?;
                    (ty, SegmentMode::Active { index, offset }, Self::read_func_indices(r)?)
                }
                3 => {
                    let ty = Self::read_elem_kind(r)?;
                    (ty, SegmentMode::Declarative, Self::read_func_indices(r)?)
                }
                4 => {
                    let offset = self.read_const_expr(r)?;
                    (ValType::FuncRef, SegmentMode::Active { index: 0, offset }, self.read_expr_vec(r)?)
                }
                5 => {
                    let ty = Self::read_ref_type(r)?;
                    (ty, SegmentMode::Passive, self.read_expr_vec(r)?)
                }
                6 => {
                    let index = r.read_leb_u32()?;
                    let offset = self.read_const_expr(r)?;
                    let ty = Self::read_ref_type(r)?;
                    (ty, SegmentMode::Active { index, offset }, self.read_expr_vec(r)?)
                }
                7 => {
                    let ty = Self::read_ref_type(r)?;
                    (ty, SegmentMode::Declarative, self.read_expr_vec(r)?)
                }
                _ => return Err(Error::Malformed(INVALID_ELEM_PREFIX)),
            };
            self.module.elements.push(ElementSegment { elem_type, mode, inits });
        }
        Ok(())
    }

    fn parse_data_count_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        self.module.data_count = Some(r.read_leb_u32()?);
        Ok(())
    }

    fn parse_code_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let n = Self::read_count(r)? as usize;
        let imported = self.module.num_imported_functions();
        if imported + n != self.module.functions.len() {
            return Err(Error::Malformed(FUNC_CODE_INCONSISTENT));
        }
        for i in 0..n {
            let size = r.read_leb_u32()? as usize;
            let mut body = r.subreader(size)?;
            r.skip(size)?;
            if let Err(e) = self.parse_body(&mut body, imported + i) {
                self.module.error(body.offset(), e);
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, r: &mut BinaryReader, idx: usize) -> Result<(), Error> {
        let mut locals = self.module.functions[idx].ty.params.clone();
        let n_decls = Self::read_count(r)?;
        for _ in 0..n_decls {
            let count = r.read_leb_u32()? as usize;
            if locals.len() + count > Module::MAX_LOCALS { return Err(Error::Malformed(TOO_MANY_LOCALS)); }
            let ty = Self::read_val_type(r)?;
            locals.resize(locals.len() + count, ty);
        }
        let body_offset = r.offset();
        let body = self.read_instrs(r, false)?;
        if r.has_more() { return Err(Error::Malformed(CODE_SIZE_MISMATCH)); }

        let function = &mut self.module.functions[idx];
        function.locals = locals;
        function.body = body;
        function.body_offset = body_offset;
        Ok(())
    }

    fn parse_data_section(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        let offset = r.offset();
        let n = Self::read_count(r)?;
        if matches!(self.module.data_count, Some(count) if count != n) {
            self.module.error(offset, Error::Malformed(DATA_COUNT_MISMATCH));
        }
        for _ in 0..n {
            let mode = match r.read_leb_u32()? {
                0 => SegmentMode::Active { index: 0, offset: self.read_const_expr(r)? },
                1 => SegmentMode::Passive,
                2 => {
                    let index = r.read_leb_u32()?;
                    SegmentMode::Active { index, offset: self.read_const_expr(r)? }
                }
                _ => return Err(Error::Malformed(INVALID_DATA_PREFIX)),
            };
            let len = r.read_leb_u32()? as usize;
            let bytes = r.read_bytes(len)?.to_vec();
            self.module.data.push(DataSegment { mode, bytes });
        }
        Ok(())
    }

    fn parse_custom(&mut self, entry: &SectionEntry) {
        let mut r = match self.section_reader(entry) {
            Ok(r) => r,
            Err(e) => return self.module.error(entry.offset, e),
        };
        match r.read_name() {
            Ok(name) if name == "name" => {
                // A broken name section only loses the names.
                let _ = self.parse_names(&mut r);
            }
            Ok(_) => {}
            Err(e) => self.module.error(r.offset(), e),
        }
    }

    fn parse_names(&mut self, r: &mut BinaryReader) -> Result<(), Error> {
        while r.has_more() {
            let id = r.read_u8()?;
            let size = r.read_leb_u32()? as usize;
            let mut sub = r.subreader(size)?;
            r.skip(size)?;
            if id != 1 { continue; }
            let n = Self::read_count(&mut sub)?;
            for _ in 0..n {
                let idx = sub.read_leb_u32()? as usize;
                let name = sub.read_name()?;
                if let Some(f) = self.module.functions.get_mut(idx) { f.name = Some(name); }
            }
        }
        Ok(())
    }

    // ---------------- Instructions ----------------

    fn read_const_expr(&mut self, r: &mut BinaryReader) -> Result<ConstExpr, Error> {
        let offset = r.offset();
        let instrs = self.read_instrs(r, true)?;
        Ok(ConstExpr::new(instrs, offset))
    }

    fn read_opcode(r: &mut BinaryReader) -> Result<Op, Error> {
        if !r.has_more() { return Err(Error::Malformed(END_EXPECTED)); }
        match r.read_u8()? {
            0xfc => Op::decode_extended(r.read_leb_u32()?).ok_or(Error::Malformed(UNKNOWN_INSTRUCTION)),
            0xfd => Err(Error::Validation(VECTOR_UNSUPPORTED)),
            byte => Op::decode_basic(byte).ok_or(Error::Malformed(UNKNOWN_INSTRUCTION)),
        }
    }

    /// Decodes instructions up to and including the `end` closing the
    /// sequence, linking every block to its `else` and `end` by index.
    fn read_instrs(&mut self, r: &mut BinaryReader, const_expr: bool) -> Result<Vec<Instr>, Error> {
        let mut instrs: Vec<Instr> = Vec::new();
        let mut blocks: Vec<usize> = Vec::new();
        loop {
            let offset = r.offset();
            let op = Self::read_opcode(r)?;
            if const_expr && !op.is_const_expr_op() { return Err(Error::Malformed(CONST_EXPR_REQUIRED)); }
            let mut instr = Instr::new(op, offset);
            self.read_immediates(r, &mut instr)?;

            let idx = instrs.len();
            match op {
                Op::Block | Op::Loop | Op::If => blocks.push(idx),
                Op::Else => {
                    if let Some(&b) = blocks.last() {
                        if instrs[b].op == Op::If && instrs[b].else_index.is_none() {
                            instrs[b].else_index = Some(idx);
                        }
                    }
                }
                Op::End => match blocks.pop() {
                    Some(b) => instrs[b].end_index = Some(idx),
                    None => {
                        instrs.push(instr);
                        return Ok(instrs);
                    }
                },
                _ => {}
            }
            instrs.push(instr);
        }
    }

    fn read_block_type(&mut self, r: &mut BinaryReader) -> Result<FuncType, Error> {
        let byte = r.peek_u8()?;
        if byte == 0x40 {
            r.read_u8()?;
            return Ok(FuncType::default());
        }
        if ValType::from_byte(byte).is_some() {
            return Ok(FuncType::block(Some(Self::read_val_type(r)?)));
        }
        let offset = r.offset();
        let idx = r.read_leb_i33()?;
        if idx < 0 { return Err(Error::Malformed(INVALID_VALUE_TYPE)); }
        Ok(self.func_type(idx as u32, offset))
    }

    fn read_immediates(&mut self, r: &mut BinaryReader, instr: &mut Instr) -> Result<(), Error> {
        for &kind in instr.op.info().imms {
            match kind {
                ImmKind::Zero => instr.imm.push(Immediate::Zero(r.read_u8()?)),
                ImmKind::I32 => instr.imm.push(Immediate::I32(r.read_leb_i32()?)),
                ImmKind::I64 => instr.imm.push(Immediate::I64(r.read_leb_i64()?)),
                ImmKind::F32 => instr.imm.push(Immediate::F32(r.read_f32_bits()?)),
                ImmKind::F64 => instr.imm.push(Immediate::F64(r.read_f64_bits()?)),
                ImmKind::ValTypes => {
                    if r.read_leb_u32()? != 1 { return Err(Error::Malformed(SELECT_ARITY)); }
                    instr.imm.push(Immediate::Type(r.read_u8()?));
                }
                ImmKind::RefType => instr.imm.push(Immediate::Type(r.read_u8()?)),
                ImmKind::Local
                | ImmKind::Global
                | ImmKind::Func
                | ImmKind::Type
                | ImmKind::Table
                | ImmKind::Elem
                | ImmKind::Data
                | ImmKind::Label => instr.imm.push(Immediate::Index(r.read_leb_u32()?)),
                ImmKind::MemArg => {
                    let align = r.read_leb_u32()?;
                    let offset = r.read_leb_u32()?;
                    instr.imm.push(Immediate::MemArg { align, offset });
                }
                ImmKind::Labels => {
                    let n = Self::read_count(r)?;
                    instr.imm.reserve(n as usize + 1);
                    for _ in 0..=n {
                        instr.imm.push(Immediate::Index(r.read_leb_u32()?));
                    }
                }
                ImmKind::Block => instr.block_type = Some(self.read_block_type(r)?),
            }
        }
        Ok(())
    }
}

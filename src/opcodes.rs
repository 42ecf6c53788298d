use std::sync::LazyLock;

use crate::types::{FuncType, ValType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Single byte opcode.
    Basic(u8),
    /// `0xfc` prefix followed by a LEB128 sub-opcode.
    Extended(u32),
    /// Only produced by the bytecode compiler.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    Zero,
    I32,
    I64,
    F32,
    F64,
    ValTypes,
    RefType,
    Local,
    Global,
    Func,
    Type,
    Table,
    Elem,
    Data,
    MemArg,
    Label,
    Labels,
    Block,
}

impl ImmKind {
    /// Whether the compiler copies this immediate into the bytecode.
    pub fn is_emitted(self) -> bool {
        matches!(
            self,
            ImmKind::I32 | ImmKind::I64 | ImmKind::F32 | ImmKind::F64 | ImmKind::Global | ImmKind::Func
                | ImmKind::Type | ImmKind::Table | ImmKind::Elem | ImmKind::Data | ImmKind::MemArg
        )
    }
}

pub struct OpInfo {
    pub name: &'static str,
    pub encoding: Encoding,
    pub imms: &'static [ImmKind],
    pub inputs: &'static [ValType],
    pub outputs: &'static [ValType],
}

macro_rules! opcodes {
    ($($op:ident $name:literal $enc:expr, [$($imm:ident)*], [$($in:ident)*], [$($out:ident)*];)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op { $($op,)* }

        static OP_INFO: &[OpInfo] = &[
            $(OpInfo {
                name: $name,
                encoding: $enc,
                imms: &[$(ImmKind::$imm),*],
                inputs: &[$(ValType::$in),*],
                outputs: &[$(ValType::$out),*],
            },)*
        ];

        static ALL_OPS: &[Op] = &[$(Op::$op,)*];
    };
}

use Encoding::{Basic, Extended, Internal};

opcodes! {
    // control
    Unreachable "unreachable" Basic(0x00), [], [], [];
    Nop "nop" Basic(0x01), [], [], [];
    Block "block" Basic(0x02), [Block], [], [];
    Loop "loop" Basic(0x03), [Block], [], [];
    If "if" Basic(0x04), [Block], [], [];
    Else "else" Basic(0x05), [], [], [];
    End "end" Basic(0x0b), [], [], [];
    Br "br" Basic(0x0c), [Label], [], [];
    BrIf "br_if" Basic(0x0d), [Label], [], [];
    BrTable "br_table" Basic(0x0e), [Labels], [], [];
    Return "return" Basic(0x0f), [], [], [];
    Call "call" Basic(0x10), [Func], [], [];
    CallIndirect "call_indirect" Basic(0x11), [Type Table], [], [];
    // parametric
    Drop "drop" Basic(0x1a), [], [Any], [];
    Select "select" Basic(0x1b), [], [NumOrVec NumOrVec I32], [Any];
    SelectT "select_t" Basic(0x1c), [ValTypes], [Any Any I32], [Any];
    // variables
    LocalGet "local.get" Basic(0x20), [Local], [], [Any];
    LocalSet "local.set" Basic(0x21), [Local], [Any], [];
    LocalTee "local.tee" Basic(0x22), [Local], [Any], [Any];
    GlobalGet "global.get" Basic(0x23), [Global], [], [Any];
    GlobalSet "global.set" Basic(0x24), [Global], [Any], [];
    TableGet "table.get" Basic(0x25), [Table], [I32], [Ref];
    TableSet "table.set" Basic(0x26), [Table], [I32 Ref], [];
    // memory
    I32Load "i32.load" Basic(0x28), [MemArg], [I32], [I32];
    I64Load "i64.load" Basic(0x29), [MemArg], [I32], [I64];
    F32Load "f32.load" Basic(0x2a), [MemArg], [I32], [F32];
    F64Load "f64.load" Basic(0x2b), [MemArg], [I32], [F64];
    I32Load8S "i32.load8_s" Basic(0x2c), [MemArg], [I32], [I32];
    I32Load8U "i32.load8_u" Basic(0x2d), [MemArg], [I32], [I32];
    I32Load16S "i32.load16_s" Basic(0x2e), [MemArg], [I32], [I32];
    I32Load16U "i32.load16_u" Basic(0x2f), [MemArg], [I32], [I32];
    I64Load8S "i64.load8_s" Basic(0x30), [MemArg], [I32], [I64];
    I64Load8U "i64.load8_u" Basic(0x31), [MemArg], [I32], [I64];
    I64Load16S "i64.load16_s" Basic(0x32), [MemArg], [I32], [I64];
    I64Load16U "i64.load16_u" Basic(0x33), [MemArg], [I32], [I64];
    I64Load32S "i64.load32_s" Basic(0x34), [MemArg], [I32], [I64];
    I64Load32U "i64.load32_u" Basic(0x35), [MemArg], [I32], [I64];
    I32Store "i32.store" Basic(0x36), [MemArg], [I32 I32], [];
    I64Store "i64.store" Basic(0x37), [MemArg], [I32 I64], [];
    F32Store "f32.store" Basic(0x38), [MemArg], [I32 F32], [];
    F64Store "f64.store" Basic(0x39), [MemArg], [I32 F64], [];
    I32Store8 "i32.store8" Basic(0x3a), [MemArg], [I32 I32], [];
    I32Store16 "i32.store16" Basic(0x3b), [MemArg], [I32 I32], [];
    I64Store8 "i64.store8" Basic(0x3c), [MemArg], [I32 I64], [];
    I64Store16 "i64.store16" Basic(0x3d), [MemArg], [I32 I64], [];
    I64Store32 "i64.store32" Basic(0x3e), [MemArg], [I32 I64], [];
    MemorySize "memory.size" Basic(0x3f), [Zero], [], [I32];
    MemoryGrow "memory.grow" Basic(0x40), [Zero], [I32], [I32];
    // constants
    I32Const "i32.const" Basic(0x41), [I32], [], [I32];
    I64Const "i64.const" Basic(0x42), [I64], [], [I64];
    F32Const "f32.const" Basic(0x43), [F32], [], [F32];
    F64Const "f64.const" Basic(0x44), [F64], [], [F64];
    // i32 comparisons
    I32Eqz "i32.eqz" Basic(0x45), [], [I32], [I32];
    I32Eq "i32.eq" Basic(0x46), [], [I32 I32], [I32];
    I32Ne "i32.ne" Basic(0x47), [], [I32 I32], [I32];
    I32LtS "i32.lt_s" Basic(0x48), [], [I32 I32], [I32];
    I32LtU "i32.lt_u" Basic(0x49), [], [I32 I32], [I32];
    I32GtS "i32.gt_s" Basic(0x4a), [], [I32 I32], [I32];
    I32GtU "i32.gt_u" Basic(0x4b), [], [I32 I32], [I32];
    I32LeS "i32.le_s" Basic(0x4c), [], [I32 I32], [I32];
    I32LeU "i32.le_u" Basic(0x4d), [], [I32 I32], [I32];
    I32GeS "i32.ge_s" Basic(0x4e), [], [I32 I32], [I32];
    I32GeU "i32.ge_u" Basic(0x4f), [], [I32 I32], [I32];
    // i64 comparisons
    I64Eqz "i64.eqz" Basic(0x50), [], [I64], [I32];
    I64Eq "i64.eq" Basic(0x51), [], [I64 I64], [I32];
    I64Ne "i64.ne" Basic(0x52), [], [I64 I64], [I32];
    I64LtS "i64.lt_s" Basic(0x53), [], [I64 I64], [I32];
    I64LtU "i64.lt_u" Basic(0x54), [], [I64 I64], [I32];
    I64GtS "i64.gt_s" Basic(0x55), [], [I64 I64], [I32];
    I64GtU "i64.gt_u" Basic(0x56), [], [I64 I64], [I32];
    I64LeS "i64.le_s" Basic(0x57), [], [I64 I64], [I32];
    I64LeU "i64.le_u" Basic(0x58), [], [I64 I64], [I32];
    I64GeS "i64.ge_s" Basic(0x59), [], [I64 I64], [I32];
    I64GeU "i64.ge_u" Basic(0x5a), [], [I64 I64], [I32];
    // float comparisons
    F32Eq "f32.eq" Basic(0x5b), [], [F32 F32], [I32];
    F32Ne "f32.ne" Basic(0x5c), [], [F32 F32], [I32];
    F32Lt "f32.lt" Basic(0x5d), [], [F32 F32], [I32];
    F32Gt "f32.gt" Basic(0x5e), [], [F32 F32], [I32];
    F32Le "f32.le" Basic(0x5f), [], [F32 F32], [I32];
    F32Ge "f32.ge" Basic(0x60), [], [F32 F32], [I32];
    F64Eq "f64.eq" Basic(0x61), [], [F64 F64], [I32];
    F64Ne "f64.ne" Basic(0x62), [], [F64 F64], [I32];
    F64Lt "f64.lt" Basic(0x63), [], [F64 F64], [I32];
    F64Gt "f64.gt" Basic(0x64), [], [F64 F64], [I32];
    F64Le "f64.le" Basic(0x65), [], [F64 F64], [I32];
    F64Ge "f64.ge" Basic(0x66), [], [F64 F64], [I32];
    // i32 arithmetic
    I32Clz "i32.clz" Basic(0x67), [], [I32], [I32];
    I32Ctz "i32.ctz" Basic(0x68), [], [I32], [I32];
    I32Popcnt "i32.popcnt" Basic(0x69), [], [I32], [I32];
    I32Add "i32.add" Basic(0x6a), [], [I32 I32], [I32];
    I32Sub "i32.sub" Basic(0x6b), [], [I32 I32], [I32];
    I32Mul "i32.mul" Basic(0x6c), [], [I32 I32], [I32];
    I32DivS "i32.div_s" Basic(0x6d), [], [I32 I32], [I32];
    I32DivU "i32.div_u" Basic(0x6e), [], [I32 I32], [I32];
    I32RemS "i32.rem_s" Basic(0x6f), [], [I32 I32], [I32];
    I32RemU "i32.rem_u" Basic(0x70), [], [I32 I32], [I32];
    I32And "i32.and" Basic(0x71), [], [I32 I32], [I32];
    I32Or "i32.or" Basic(0x72), [], [I32 I32], [I32];
    I32Xor "i32.xor" Basic(0x73), [], [I32 I32], [I32];
    I32Shl "i32.shl" Basic(0x74), [], [I32 I32], [I32];
    I32ShrS "i32.shr_s" Basic(0x75), [], [I32 I32], [I32];
    I32ShrU "i32.shr_u" Basic(0x76), [], [I32 I32], [I32];
    I32Rotl "i32.rotl" Basic(0x77), [], [I32 I32], [I32];
    I32Rotr "i32.rotr" Basic(0x78), [], [I32 I32], [I32];
    // i64 arithmetic
    I64Clz "i64.clz" Basic(0x79), [], [I64], [I64];
    I64Ctz "i64.ctz" Basic(0x7a), [], [I64], [I64];
    I64Popcnt "i64.popcnt" Basic(0x7b), [], [I64], [I64];
    I64Add "i64.add" Basic(0x7c), [], [I64 I64], [I64];
    I64Sub "i64.sub" Basic(0x7d), [], [I64 I64], [I64];
    I64Mul "i64.mul" Basic(0x7e), [], [I64 I64], [I64];
    I64DivS "i64.div_s" Basic(0x7f), [], [I64 I64], [I64];
    I64DivU "i64.div_u" Basic(0x80), [], [I64 I64], [I64];
    I64RemS "i64.rem_s" Basic(0x81), [], [I64 I64], [I64];
    I64RemU "i64.rem_u" Basic(0x82), [], [I64 I64], [I64];
    I64And "i64.and" Basic(0x83), [], [I64 I64], [I64];
    I64Or "i64.or" Basic(0x84), [], [I64 I64], [I64];
    I64Xor "i64.xor" Basic(0x85), [], [I64 I64], [I64];
    I64Shl "i64.shl" Basic(0x86), [], [I64 I64], [I64];
    I64ShrS "i64.shr_s" Basic(0x87), [], [I64 I64], [I64];
    I64ShrU "i64.shr_u" Basic(0x88), [], [I64 I64], [I64];
    I64Rotl "i64.rotl" Basic(0x89), [], [I64 I64], [I64];
    I64Rotr "i64.rotr" Basic(0x8a), [], [I64 I64], [I64];
    // f32 arithmetic
    F32Abs "f32.abs" Basic(0x8b), [], [F32], [F32];
    F32Neg "f32.neg" Basic(0x8c), [], [F32], [F32];
    F32Ceil "f32.ceil" Basic(0x8d), [], [F32], [F32];
    F32Floor "f32.floor" Basic(0x8e), [], [F32], [F32];
    F32Trunc "f32.trunc" Basic(0x8f), [], [F32], [F32];
    F32Nearest "f32.nearest" Basic(0x90), [], [F32], [F32];
    F32Sqrt "f32.sqrt" Basic(0x91), [], [F32], [F32];
    F32Add "f32.add" Basic(0x92), [], [F32 F32], [F32];
    F32Sub "f32.sub" Basic(0x93), [], [F32 F32], [F32];
    F32Mul "f32.mul" Basic(0x94), [], [F32 F32], [F32];
    F32Div "f32.div" Basic(0x95), [], [F32 F32], [F32];
    F32Min "f32.min" Basic(0x96), [], [F32 F32], [F32];
    F32Max "f32.max" Basic(0x97), [], [F32 F32], [F32];
    F32Copysign "f32.copysign" Basic(0x98), [], [F32 F32], [F32];
    // f64 arithmetic
    F64Abs "f64.abs" Basic(0x99), [], [F64], [F64];
    F64Neg "f64.neg" Basic(0x9a), [], [F64], [F64];
    F64Ceil "f64.ceil" Basic(0x9b), [], [F64], [F64];
    F64Floor "f64.floor" Basic(0x9c), [], [F64], [F64];
    F64Trunc "f64.trunc" Basic(0x9d), [], [F64], [F64];
    F64Nearest "f64.nearest" Basic(0x9e), [], [F64], [F64];
    F64Sqrt "f64.sqrt" Basic(0x9f), [], [F64], [F64];
    F64Add "f64.add" Basic(0xa0), [], [F64 F64], [F64];
    F64Sub "f64.sub" Basic(0xa1), [], [F64 F64], [F64];
    F64Mul "f64.mul" Basic(0xa2), [], [F64 F64], [F64];
    F64Div "f64.div" Basic(0xa3), [], [F64 F64], [F64];
    F64Min "f64.min" Basic(0xa4), [], [F64 F64], [F64];
    F64Max "f64.max" Basic(0xa5), [], [F64 F64], [F64];
    F64Copysign "f64.copysign" Basic(0xa6), [], [F64 F64], [F64];
    // conversions
    I32WrapI64 "i32.wrap_i64" Basic(0xa7), [], [I64], [I32];
    I32TruncF32S "i32.trunc_f32_s" Basic(0xa8), [], [F32], [I32];
    I32TruncF32U "i32.trunc_f32_u" Basic(0xa9), [], [F32], [I32];
    I32TruncF64S "i32.trunc_f64_s" Basic(0xaa), [], [F64], [I32];
    I32TruncF64U "i32.trunc_f64_u" Basic(0xab), [], [F64], [I32];
    I64ExtendI32S "i64.extend_i32_s" Basic(0xac), [], [I32], [I64];
    I64ExtendI32U "i64.extend_i32_u" Basic(0xad), [], [I32], [I64];
    I64TruncF32S "i64.trunc_f32_s" Basic(0xae), [], [F32], [I64];
    I64TruncF32U "i64.trunc_f32_u" Basic(0xaf), [], [F32], [I64];
    I64TruncF64S "i64.trunc_f64_s" Basic(0xb0), [], [F64], [I64];
    I64TruncF64U "i64.trunc_f64_u" Basic(0xb1), [], [F64], [I64];
    F32ConvertI32S "f32.convert_i32_s" Basic(0xb2), [], [I32], [F32];
    F32ConvertI32U "f32.convert_i32_u" Basic(0xb3), [], [I32], [F32];
    F32ConvertI64S "f32.convert_i64_s" Basic(0xb4), [], [I64], [F32];
    F32ConvertI64U "f32.convert_i64_u" Basic(0xb5), [], [I64], [F32];
    F32DemoteF64 "f32.demote_f64" Basic(0xb6), [], [F64], [F32];
    F64ConvertI32S "f64.convert_i32_s" Basic(0xb7), [], [I32], [F64];
    F64ConvertI32U "f64.convert_i32_u" Basic(0xb8), [], [I32], [F64];
    F64ConvertI64S "f64.convert_i64_s" Basic(0xb9), [], [I64], [F64];
    F64ConvertI64U "f64.convert_i64_u" Basic(0xba), [], [I64], [F64];
    F64PromoteF32 "f64.promote_f32" Basic(0xbb), [], [F32], [F64];
    I32ReinterpretF32 "i32.reinterpret_f32" Basic(0xbc), [], [F32], [I32];
    I64ReinterpretF64 "i64.reinterpret_f64" Basic(0xbd), [], [F64], [I64];
    F32ReinterpretI32 "f32.reinterpret_i32" Basic(0xbe), [], [I32], [F32];
    F64ReinterpretI64 "f64.reinterpret_i64" Basic(0xbf), [], [I64], [F64];
    // sign extension
    I32Extend8S "i32.extend8_s" Basic(0xc0), [], [I32], [I32];
    I32Extend16S "i32.extend16_s" Basic(0xc1), [], [I32], [I32];
    I64Extend8S "i64.extend8_s" Basic(0xc2), [], [I64], [I64];
    I64Extend16S "i64.extend16_s" Basic(0xc3), [], [I64], [I64];
    I64Extend32S "i64.extend32_s" Basic(0xc4), [], [I64], [I64];
    // references
    RefNull "ref.null" Basic(0xd0), [RefType], [], [Ref];
    RefIsNull "ref.is_null" Basic(0xd1), [], [Ref], [I32];
    RefFunc "ref.func" Basic(0xd2), [Func], [], [FuncRef];
    // saturating truncation
    I32TruncSatF32S "i32.trunc_sat_f32_s" Extended(0), [], [F32], [I32];
    I32TruncSatF32U "i32.trunc_sat_f32_u" Extended(1), [], [F32], [I32];
    I32TruncSatF64S "i32.trunc_sat_f64_s" Extended(2), [], [F64], [I32];
    I32TruncSatF64U "i32.trunc_sat_f64_u" Extended(3), [], [F64], [I32];
    I64TruncSatF32S "i64.trunc_sat_f32_s" Extended(4), [], [F32], [I64];
    I64TruncSatF32U "i64.trunc_sat_f32_u" Extended(5), [], [F32], [I64];
    I64TruncSatF64S "i64.trunc_sat_f64_s" Extended(6), [], [F64], [I64];
    I64TruncSatF64U "i64.trunc_sat_f64_u" Extended(7), [], [F64], [I64];
    // bulk memory and tables
    MemoryInit "memory.init" Extended(8), [Data Zero], [I32 I32 I32], [];
    DataDrop "data.drop" Extended(9), [Data], [], [];
    MemoryCopy "memory.copy" Extended(10), [Zero Zero], [I32 I32 I32], [];
    MemoryFill "memory.fill" Extended(11), [Zero], [I32 I32 I32], [];
    TableInit "table.init" Extended(12), [Elem Table], [I32 I32 I32], [];
    ElemDrop "elem.drop" Extended(13), [Elem], [], [];
    TableCopy "table.copy" Extended(14), [Table Table], [I32 I32 I32], [];
    TableGrow "table.grow" Extended(15), [Table], [Ref I32], [I32];
    TableSize "table.size" Extended(16), [Table], [], [I32];
    TableFill "table.fill" Extended(17), [Table], [I32 Ref I32], [];
    // bytecode only
    Move "move" Internal, [], [], [];
    Jump "jump" Internal, [], [], [];
    JumpIfZero "jump_if_zero" Internal, [], [], [];
    JumpTable "jump_table" Internal, [], [], [];
}

static BASIC_DECODE: LazyLock<[Option<Op>; 256]> = LazyLock::new(|| {
    let mut table = [None; 256];
    for &op in ALL_OPS {
        if let Encoding::Basic(byte) = op.info().encoding {
            table[byte as usize] = Some(op);
        }
    }
    table
});

static EXTENDED_DECODE: LazyLock<Vec<Option<Op>>> = LazyLock::new(|| {
    let mut table = Vec::new();
    for &op in ALL_OPS {
        if let Encoding::Extended(code) = op.info().encoding {
            let code = code as usize;
            if table.len() <= code { table.resize(code + 1, None); }
            table[code] = Some(op);
        }
    }
    table
});

impl Op {
    #[inline(always)]
    pub fn info(self) -> &'static OpInfo { &OP_INFO[self as usize] }

    #[inline(always)]
    pub fn name(self) -> &'static str { self.info().name }

    pub fn decode_basic(byte: u8) -> Option<Op> { BASIC_DECODE[byte as usize] }

    pub fn decode_extended(code: u32) -> Option<Op> {
        EXTENDED_DECODE.get(code as usize).copied().flatten()
    }

    /// The bytecode cell representation of this opcode.
    #[inline(always)]
    pub fn cell(self) -> u64 { self as u64 }

    #[inline(always)]
    pub fn from_cell(cell: u64) -> Option<Op> { ALL_OPS.get(usize::try_from(cell).ok()?).copied() }

    pub fn is_load(self) -> bool { (Op::I32Load as usize..=Op::I64Load32U as usize).contains(&(self as usize)) }

    pub fn uses_memory(self) -> bool {
        (Op::I32Load as usize..=Op::MemoryGrow as usize).contains(&(self as usize))
            || matches!(self, Op::MemoryInit | Op::MemoryCopy | Op::MemoryFill)
    }

    pub fn is_const_expr_op(self) -> bool {
        matches!(
            self,
            Op::I32Const | Op::I64Const | Op::F32Const | Op::F64Const | Op::RefNull | Op::RefFunc | Op::GlobalGet | Op::End
        )
    }

    /// Number of operand cells following the opcode cell in compiled
    /// bytecode. `next` is the first operand cell, needed for `jump_table`.
    pub fn operand_cells(self, next: Option<u64>) -> usize {
        match self {
            Op::Move => 2,
            Op::Jump => 1,
            Op::JumpIfZero => 2,
            Op::JumpTable => 2 + next.unwrap_or(0) as usize,
            Op::Call => 2,
            Op::CallIndirect => 4,
            Op::Return | Op::Unreachable => 0,
            _ => {
                let info = self.info();
                info.imms.iter().filter(|k| k.is_emitted()).count() + info.inputs.len() + info.outputs.len()
            }
        }
    }
}

/// A decoded immediate operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    Index(u32),
    MemArg { align: u32, offset: u32 },
    /// Raw value or reference type byte, validated by the compiler.
    Type(u8),
    /// Raw reserved byte, validated by the compiler.
    Zero(u8),
}

impl Immediate {
    pub fn index(&self) -> u32 {
        match *self {
            Immediate::Index(i) => i,
            _ => u32::MAX,
        }
    }

    /// Bytecode cell holding this immediate.
    pub fn cell(&self) -> u64 {
        match *self {
            Immediate::I32(v) => v as u32 as u64,
            Immediate::I64(v) => v as u64,
            Immediate::F32(bits) => bits as u64,
            Immediate::F64(bits) => bits,
            Immediate::Index(i) => i as u64,
            Immediate::MemArg { offset, .. } => offset as u64,
            Immediate::Type(b) | Immediate::Zero(b) => b as u64,
        }
    }
}

/// One decoded wasm instruction of a function body or constant expression.
#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Op,
    pub imm: Vec<Immediate>,
    pub block_type: Option<FuncType>,
    /// Offset of the opcode in the module binary.
    pub offset: usize,
    /// For `if`: index of the matching `else`, if any.
    pub else_index: Option<usize>,
    /// For `block`, `loop` and `if`: index of the matching `end`.
    pub end_index: Option<usize>,
}

impl Instr {
    pub fn new(op: Op, offset: usize) -> Self {
        Self { op, imm: Vec::new(), block_type: None, offset, else_index: None, end_index: None }
    }
}

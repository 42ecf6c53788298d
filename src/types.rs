use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Value types of the binary format, plus the pseudo types used while
/// type-checking polymorphic instructions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
    /// Produced by unreachable code; compatible with everything.
    Unknown,
    Any,
    /// Either reference type.
    Ref,
    NumOrVec,
}

impl ValType {
    pub fn from_byte(byte: u8) -> Option<ValType> {
        match byte {
            0x7f => Some(ValType::I32),
            0x7e => Some(ValType::I64),
            0x7d => Some(ValType::F32),
            0x7c => Some(ValType::F64),
            0x7b => Some(ValType::V128),
            0x70 => Some(ValType::FuncRef),
            0x6f => Some(ValType::ExternRef),
            _ => None,
        }
    }

    pub fn ref_from_byte(byte: u8) -> Option<ValType> {
        match byte {
            0x70 => Some(ValType::FuncRef),
            0x6f => Some(ValType::ExternRef),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
    }

    pub fn is_ref(self) -> bool { matches!(self, ValType::FuncRef | ValType::ExternRef) }

    /// Whether an operand of type `self` may be used where `other` is expected.
    pub fn is_compatible(self, other: ValType) -> bool {
        use ValType::*;
        self == other
            || matches!(self, Unknown | Any)
            || matches!(other, Unknown | Any)
            || (self == Ref && other.is_ref())
            || (other == Ref && self.is_ref())
            || (self == NumOrVec && (other.is_numeric() || other == V128))
            || (other == NumOrVec && (self.is_numeric() || self == V128))
    }

    pub fn name(self) -> &'static str {
        match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
            ValType::Unknown => "unknown",
            ValType::Any => "any",
            ValType::Ref => "ref",
            ValType::NumOrVec => "num_or_vec",
        }
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// Function signature. Equality is structural.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub returns: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, returns: Vec<ValType>) -> Self { Self { params, returns } }

    /// Signature of a block type given by a single optional value type.
    pub fn block(result: Option<ValType>) -> Self {
        Self { params: Vec::new(), returns: result.into_iter().collect() }
    }
}

impl Display for FuncType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let join = |v: &[ValType]| v.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ");
        write!(f, "({}) -> ({})", join(&self.params), join(&self.returns))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    /// Import compatibility: the provided limits must fit inside the declared ones.
    pub fn is_subset_of(&self, declared: &Limits) -> bool {
        self.min >= declared.min
            && match (declared.max, self.max) {
                (None, _) => true,
                (Some(dmax), Some(imax)) => imax <= dmax,
                (Some(_), None) => false,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableType {
    pub elem: ValType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalType {
    pub ty: ValType,
    pub mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternKind {
    Func = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
}

impl ExternKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ExternKind::Func),
            1 => Some(ExternKind::Table),
            2 => Some(ExternKind::Memory),
            3 => Some(ExternKind::Global),
            _ => None,
        }
    }
}

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Malformed(&'static str),
    Validation(&'static str),
    Trap(&'static str),
    Link(&'static str),
}

impl Error {
    #[inline(always)]
    pub fn malformed(msg: &'static str) -> Self { Error::Malformed(msg) }
    #[inline(always)]
    pub fn validation(msg: &'static str) -> Self { Error::Validation(msg) }
    #[inline(always)]
    pub fn trap(msg: &'static str) -> Self { Error::Trap(msg) }
    #[inline(always)]
    pub fn link(msg: &'static str) -> Self { Error::Link(msg) }

    pub fn message(&self) -> &'static str {
        match self {
            Error::Malformed(s) | Error::Validation(s) | Error::Trap(s) | Error::Link(s) => s,
        }
    }

    pub fn is_trap(&self) -> bool { matches!(self, Error::Trap(_)) }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Error {}

/// An error recorded while building a module, with the byte offset in the
/// binary where it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleError {
    pub error: Error,
    pub offset: usize,
}

impl Display for ModuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}: {}", self.offset, self.error)
    }
}

impl std::error::Error for ModuleError {}

// Malformed errors
pub const NO_MAGIC_HEADER: &str = "magic header not detected";
pub const UNKNOWN_BINARY_VERSION: &str = "unknown binary version";
pub const UNEXPECTED_END: &str = "unexpected end of section or function";
pub const INT_TOO_LONG: &str = "integer representation too long";
pub const INT_TOO_LARGE: &str = "integer too large";
pub const SECTION_SIZE_MISMATCH: &str = "size of section does not match declared size";
pub const SECTION_OUT_OF_BOUNDS: &str = "section length out of bounds";
pub const INVALID_SECTION_ID: &str = "invalid section id";
pub const SECTION_REDECLARED: &str = "redeclared section";
pub const SECTION_OUT_OF_ORDER: &str = "section out of order";
pub const DATA_COUNT_AFTER_CODE: &str = "data count section must precede code section";
pub const LENGTH_OUT_OF_BOUNDS: &str = "length out of bounds";
pub const INVALID_FUNC_TYPE_PREFIX: &str = "invalid function type prefix";
pub const INVALID_VALUE_TYPE: &str = "invalid value type";
pub const MALFORMED_REF_TYPE: &str = "malformed reference type";
pub const MALFORMED_IMPORT_KIND: &str = "malformed import kind";
pub const INVALID_EXPORT_KIND: &str = "malformed export kind";
pub const INVALID_LIMITS_KIND: &str = "malformed limits flags";
pub const INVALID_MUTABILITY: &str = "malformed mutability";
pub const INVALID_ELEM_PREFIX: &str = "malformed elements segment kind";
pub const INVALID_ELEM_KIND: &str = "malformed element kind";
pub const INVALID_DATA_PREFIX: &str = "malformed data segment kind";
pub const DATA_COUNT_MISMATCH: &str = "data count and data section have inconsistent lengths";
pub const FUNC_CODE_INCONSISTENT: &str = "function and code section have inconsistent lengths";
pub const CODE_SIZE_MISMATCH: &str = "size of code entry does not match declared size";
pub const TOO_MANY_LOCALS: &str = "too many locals";
pub const UNKNOWN_INSTRUCTION: &str = "illegal opcode";
pub const END_EXPECTED: &str = "END opcode expected";
pub const CONST_EXPR_REQUIRED: &str = "constant expression required";
pub const DATA_COUNT_REQUIRED: &str = "data count section required";
pub const SELECT_ARITY: &str = "invalid result arity";
// UTF-8 failure reasons
pub const UTF8_OUT_OF_BOUNDS: &str = "malformed UTF-8 encoding: out of bounds";
pub const UTF8_UNEXPECTED_CONTINUATION: &str = "malformed UTF-8 encoding: unexpected continuation byte";
pub const UTF8_UNEXPECTED_LEADING: &str = "malformed UTF-8 encoding: unexpected leading byte";
pub const UTF8_INVALID_BYTE: &str = "malformed UTF-8 encoding: invalid byte";
pub const UTF8_INVALID_CODEPOINT: &str = "malformed UTF-8 encoding: invalid codepoint";
pub const UTF8_OVERLONG: &str = "malformed UTF-8 encoding: overlong encoding";
// Validation errors
pub const TYPE_MISMATCH: &str = "type mismatch";
pub const UNBALANCED_STACK: &str = "unbalanced stack";
pub const SELECT_TYPE_MISMATCH: &str = "select operands must be of same type";
pub const UNEXPECTED_ELSE: &str = "unexpected else block";
pub const UNKNOWN_LABEL: &str = "unknown label";
pub const UNKNOWN_LOCAL: &str = "unknown local";
pub const UNKNOWN_FUNC: &str = "unknown function";
pub const UNKNOWN_GLOBAL: &str = "unknown global";
pub const UNKNOWN_TYPE: &str = "unknown type";
pub const UNKNOWN_TABLE: &str = "unknown table";
pub const UNKNOWN_MEMORY: &str = "unknown memory";
pub const UNKNOWN_ELEM: &str = "unknown elem segment";
pub const UNKNOWN_DATA: &str = "unknown data segment";
pub const DUPLICATE_EXPORT: &str = "duplicate export name";
pub const NON_ZERO_IMMEDIATE: &str = "non zero value in zero immediate";
pub const INVALID_IMMEDIATE_TYPE: &str = "invalid value type immediate";
pub const ALIGNMENT_TOO_LARGE: &str = "alignment must not be larger than natural";
pub const GLOBAL_IMMUTABLE: &str = "global is immutable";
pub const NO_MEMORY: &str = "memory instruction without declared memory";
pub const TOO_MANY_REGISTERS: &str = "too many register slots";
pub const MIN_GREATER_THAN_MAX: &str = "size minimum must not be greater than maximum";
pub const MEMORY_SIZE_LIMIT: &str = "memory size must be at most 65536 pages (4GiB)";
pub const START_FUNC_TYPE: &str = "start function must have no parameters or results";
pub const VECTOR_UNSUPPORTED: &str = "vector instructions not supported";
// Trap errors
pub const UNREACHABLE: &str = "unreachable";
pub const INVALID_OP: &str = "invalid opcode";
pub const DIVIDE_BY_ZERO: &str = "integer divide by zero";
pub const INTEGER_OVERFLOW: &str = "integer overflow";
pub const INVALID_CONV_TO_INT: &str = "invalid conversion to integer";
pub const STACK_EXHAUSTED: &str = "call stack exhausted";
pub const OOB_MEMORY_ACCESS: &str = "out of bounds memory access";
pub const OOB_TABLE_ACCESS: &str = "out of bounds table access";
pub const NULL_REFERENCE: &str = "uninitialized element";
pub const INDIRECT_CALL_MISMATCH: &str = "indirect call type mismatch";
pub const INVALID_NUM_ARG: &str = "invalid number of arguments";
pub const INTERPRETER_TERMINATED: &str = "interpreter already terminated";
pub const NOTHING_TO_RUN: &str = "interpreter has no call in progress";
pub const DEAD_INSTANCE: &str = "function owner was dropped";
// Link errors
pub const UNKNOWN_IMPORT: &str = "unknown import";
pub const INCOMPATIBLE_IMPORT: &str = "incompatible import type";
pub const UNKNOWN_EXPORT: &str = "unknown export";
pub const MODULE_HAS_ERRORS: &str = "module has errors";

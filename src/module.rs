use std::rc::Rc;

use serde::Serialize;

use crate::compiler::{self, Compiled};
use crate::config::Config;
use crate::debug::DebugInfo;
use crate::debug_println;
use crate::error::*;
use crate::opcodes::Instr;
use crate::parser::Parser;
use crate::types::*;

// ---------------- Import/Export related ----------------
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportRef { pub module: String, pub field: String }

/// One entry of the import section. `index` points into the merged
/// function / table / memory / global index space of `kind`.
#[derive(Clone, Debug, Serialize)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ExternKind,
    pub index: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

/// Table of contents entry: section id and the absolute range of its content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SectionEntry {
    pub id: u8,
    pub offset: usize,
    pub len: usize,
}

// ---------------- Structures ----------------

/// A constant expression (global initializer, segment offset or element
/// item) together with its compiled bytecode. The value is left in slot 0.
#[derive(Clone, Debug)]
pub struct ConstExpr {
    pub instrs: Vec<Instr>,
    pub offset: usize,
    pub code: Rc<[u64]>,
    pub reg_count: u32,
}

impl ConstExpr {
    pub fn new(instrs: Vec<Instr>, offset: usize) -> Self {
        Self { instrs, offset, code: Rc::from(Vec::new()), reg_count: 0 }
    }

    fn set_compiled(&mut self, c: Compiled) {
        self.code = c.code.into();
        self.reg_count = c.reg_count;
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub type_idx: u32,
    pub ty: FuncType,
    /// Parameters followed by declared locals.
    pub locals: Vec<ValType>,
    pub import: Option<ImportRef>,
    pub name: Option<String>,
    pub body: Vec<Instr>,
    pub body_offset: usize,
    pub code: Rc<[u64]>,
    pub reg_count: u32,
    pub debug: DebugInfo,
}

impl Function {
    pub fn new(type_idx: u32, ty: FuncType, import: Option<ImportRef>) -> Self {
        Self {
            type_idx,
            locals: ty.params.clone(),
            ty,
            import,
            name: None,
            body: Vec::new(),
            body_offset: 0,
            code: Rc::from(Vec::new()),
            reg_count: 0,
            debug: DebugInfo::default(),
        }
    }

    pub fn is_imported(&self) -> bool { self.import.is_some() }
}

#[derive(Clone, Debug)]
pub struct Table { pub ty: TableType, pub import: Option<ImportRef> }

#[derive(Clone, Debug)]
pub struct Memory { pub limits: Limits, pub import: Option<ImportRef> }

#[derive(Clone, Debug)]
pub struct Global {
    pub ty: GlobalType,
    pub init: Option<ConstExpr>,
    pub import: Option<ImportRef>,
}

#[derive(Clone, Debug)]
pub enum SegmentMode {
    Passive,
    Active { index: u32, offset: ConstExpr },
    Declarative,
}

impl SegmentMode {
    pub fn name(&self) -> &'static str {
        match self {
            SegmentMode::Passive => "passive",
            SegmentMode::Active { .. } => "active",
            SegmentMode::Declarative => "declarative",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ElementSegment {
    pub elem_type: ValType,
    pub mode: SegmentMode,
    pub inits: Vec<ConstExpr>,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub mode: SegmentMode,
    pub bytes: Vec<u8>,
}

// ---------------- Module Structure ----------------
pub struct Module {
    pub toc: Vec<SectionEntry>,
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub start: Option<u32>,
    pub data_count: Option<u32>,
    pub(crate) errors: Vec<ModuleError>,
}

impl Module {
    pub const MAX_PAGES: u32 = 65536;
    pub const MAX_LOCALS: usize = 50000;

    fn empty() -> Self {
        Module {
            toc: Vec::new(),
            types: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            elements: Vec::new(),
            data: Vec::new(),
            start: None,
            data_count: None,
            errors: Vec::new(),
        }
    }

    /// Parses, validates and compiles a module. Problems are accumulated in
    /// [`Module::errors`]; a module with errors cannot be instantiated.
    pub fn new(bytes: &[u8]) -> Self { Self::with_config(bytes, &Config::default()) }

    pub fn with_config(bytes: &[u8], config: &Config) -> Self {
        let mut module = Module::empty();
        Parser::new(&mut module, bytes).parse();
        module.validate_segments();
        module.compile_code(config);
        debug_println!(
            "module: {} types, {} functions, {} errors",
            module.types.len(),
            module.functions.len(),
            module.errors.len()
        );
        module
    }

    /// Like [`Module::new`] but fails with the first recorded error.
    pub fn compile(bytes: &[u8]) -> Result<Self, ModuleError> {
        let module = Self::new(bytes);
        match module.errors.first() {
            Some(err) => Err(*err),
            None => Ok(module),
        }
    }

    pub fn has_errors(&self) -> bool { !self.errors.is_empty() }

    pub fn errors(&self) -> &[ModuleError] { &self.errors }

    pub(crate) fn error(&mut self, offset: usize, error: Error) {
        debug_println!("module error at 0x{:x}: {}", offset, error);
        self.errors.push(ModuleError { error, offset });
    }

    pub fn export(&self, name: &str) -> Option<&Export> { self.exports.iter().find(|e| e.name == name) }

    pub fn num_imported_functions(&self) -> usize { self.functions.iter().take_while(|f| f.is_imported()).count() }

    /// Looks a function up by its name from the name section, falling back
    /// to the export names.
    pub fn function_by_name(&self, name: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
            .map(|i| i as u32)
            .or_else(|| {
                self.export(name).filter(|e| e.kind == ExternKind::Func).map(|e| e.index)
            })
    }

    fn validate_segments(&mut self) {
        let mut errors = Vec::new();
        for seg in &self.elements {
            if let SegmentMode::Active { index, offset } = &seg.mode {
                match self.tables.get(*index as usize) {
                    None => errors.push(ModuleError { error: Error::Validation(UNKNOWN_TABLE), offset: offset.offset }),
                    Some(t) if t.ty.elem != seg.elem_type => {
                        errors.push(ModuleError { error: Error::Validation(TYPE_MISMATCH), offset: offset.offset })
                    }
                    Some(_) => {}
                }
            }
        }
        for seg in &self.data {
            if let SegmentMode::Active { index, offset } = &seg.mode {
                if *index as usize >= self.memories.len() {
                    errors.push(ModuleError { error: Error::Validation(UNKNOWN_MEMORY), offset: offset.offset });
                }
            }
        }
        self.errors.extend(errors);
    }

    fn compile_code(&mut self, config: &Config) {
        let mut errors = Vec::new();

        let globals: Vec<Option<Compiled>> = self
            .globals
            .iter()
            .enumerate()
            .map(|(i, g)| {
                g.init.as_ref().map(|init| compiler::compile_const_expr(self, init, g.ty.ty, i as u32, config, &mut errors))
            })
            .collect();

        let num_globals = self.globals.len() as u32;
        let elements: Vec<(Option<Compiled>, Vec<Compiled>)> = self
            .elements
            .iter()
            .map(|seg| {
                let offset = match &seg.mode {
                    SegmentMode::Active { offset, .. } => {
                        Some(compiler::compile_const_expr(self, offset, ValType::I32, num_globals, config, &mut errors))
                    }
                    _ => None,
                };
                let inits = seg
                    .inits
                    .iter()
                    .map(|e| compiler::compile_const_expr(self, e, seg.elem_type, num_globals, config, &mut errors))
                    .collect();
                (offset, inits)
            })
            .collect();

        let data: Vec<Option<Compiled>> = self
            .data
            .iter()
            .map(|seg| match &seg.mode {
                SegmentMode::Active { offset, .. } => {
                    Some(compiler::compile_const_expr(self, offset, ValType::I32, num_globals, config, &mut errors))
                }
                _ => None,
            })
            .collect();

        let functions: Vec<Option<Compiled>> = (0..self.functions.len())
            .map(|i| {
                let f = &self.functions[i];
                if f.is_imported() || f.body.is_empty() { return None; }
                Some(compiler::compile_function(self, i as u32, config, &mut errors))
            })
            .collect();

        for (g, c) in self.globals.iter_mut().zip(globals) {
            if let (Some(init), Some(c)) = (g.init.as_mut(), c) { init.set_compiled(c); }
        }
        for (seg, (offset, inits)) in self.elements.iter_mut().zip(elements) {
            if let (SegmentMode::Active { offset: expr, .. }, Some(c)) = (&mut seg.mode, offset) {
                expr.set_compiled(c);
            }
            for (expr, c) in seg.inits.iter_mut().zip(inits) { expr.set_compiled(c); }
        }
        for (seg, c) in self.data.iter_mut().zip(data) {
            if let (SegmentMode::Active { offset: expr, .. }, Some(c)) = (&mut seg.mode, c) {
                expr.set_compiled(c);
            }
        }
        for (f, c) in self.functions.iter_mut().zip(functions) {
            if let Some(c) = c {
                debug_println!("compiled function: {} cells, {} registers", c.code.len(), c.reg_count);
                f.code = c.code.into();
                f.reg_count = c.reg_count;
                f.debug = c.debug;
            }
        }
        self.errors.extend(errors);
    }
}

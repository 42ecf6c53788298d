use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use nohash_hasher::IntMap;

use crate::debug_println;
use crate::error::*;
use crate::interpreter::Interpreter;
use crate::module::{ImportRef, Module, SegmentMode};
use crate::types::*;
use crate::wasm_memory::WasmMemory;

/// Untyped value of a register, global or table slot. Floats are kept as
/// their bit patterns and references as opaque handles (0 is null).
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct WasmValue(pub u64);

impl WasmValue {
    pub const NULL: WasmValue = WasmValue(0);

    #[inline] pub fn from_i32(v: i32) -> Self { Self(v as u32 as u64) }
    #[inline] pub fn as_i32(self) -> i32 { self.0 as u32 as i32 }
    #[inline] pub fn from_u32(v: u32) -> Self { Self(v as u64) }
    #[inline] pub fn as_u32(self) -> u32 { self.0 as u32 }
    #[inline] pub fn from_i64(v: i64) -> Self { Self(v as u64) }
    #[inline] pub fn as_i64(self) -> i64 { self.0 as i64 }
    #[inline] pub fn from_u64(v: u64) -> Self { Self(v) }
    #[inline] pub fn as_u64(self) -> u64 { self.0 }
    #[inline] pub fn from_f32(v: f32) -> Self { Self(v.to_bits() as u64) }
    #[inline] pub fn as_f32(self) -> f32 { f32::from_bits(self.0 as u32) }
    #[inline] pub fn from_f64(v: f64) -> Self { Self(v.to_bits()) }
    #[inline] pub fn as_f64(self) -> f64 { f64::from_bits(self.0) }

    /// Renders the value as `ty`, the way the command line tools print it.
    pub fn display(self, ty: ValType) -> String {
        match ty {
            ValType::I32 => self.as_i32().to_string(),
            ValType::I64 => self.as_i64().to_string(),
            ValType::F32 => format!("{}", self.as_f32()),
            ValType::F64 => format!("{}", self.as_f64()),
            ValType::FuncRef | ValType::ExternRef if self.0 == 0 => "null".to_string(),
            _ => format!("0x{:x}", self.0),
        }
    }
}

// ---------------- Function references ----------------

struct Registry {
    instances: IntMap<u32, Weak<Instance>>,
    next_id: u32,
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry { instances: IntMap::default(), next_id: 1 });
}

fn allocate_id() -> u32 {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        let id = r.next_id;
        r.next_id += 1;
        id
    })
}

/// Table representation of a reference to function `func` of instance `id`.
#[inline]
pub fn func_ref(id: u32, func: u32) -> u64 { ((id as u64) << 32) | (func as u64 + 1) }

/// Resolves a function reference to its owning instance and function index.
pub fn resolve_func_ref(handle: u64) -> Result<(Rc<Instance>, u32), Error> {
    if handle == 0 { return Err(Error::trap(NULL_REFERENCE)); }
    let id = (handle >> 32) as u32;
    let func = (handle as u32).wrapping_sub(1);
    let instance = REGISTRY
        .with(|r| r.borrow().instances.get(&id).and_then(Weak::upgrade))
        .ok_or(Error::trap(DEAD_INSTANCE))?;
    if func as usize >= instance.functions.len() { return Err(Error::trap(DEAD_INSTANCE)); }
    Ok((instance, func))
}

// ---------------- Runtime objects ----------------

pub struct WasmTable {
    elements: Vec<u64>,
    elem: ValType,
    maximum: u32,
    declared_max: Option<u32>,
}

impl WasmTable {
    pub fn new(ty: TableType) -> Self {
        Self {
            elements: vec![0; ty.limits.min as usize],
            elem: ty.elem,
            maximum: ty.limits.max.unwrap_or(u32::MAX),
            declared_max: ty.limits.max,
        }
    }

    pub fn size(&self) -> u32 { self.elements.len() as u32 }
    pub fn max(&self) -> u32 { self.maximum }
    pub fn elem_type(&self) -> ValType { self.elem }
    pub fn limits(&self) -> Limits { Limits { min: self.size(), max: self.declared_max } }

    /// Grows by `delta` entries set to `value`, returning the old size or
    /// `u32::MAX` (-1) if the maximum would be exceeded.
    pub fn grow(&mut self, delta: u32, value: WasmValue) -> u32 {
        let old = self.size();
        if delta > self.maximum.saturating_sub(old) { return u32::MAX; }
        self.elements.resize(old as usize + delta as usize, value.0);
        old
    }

    fn range(&self, start: u32, len: u32) -> Result<std::ops::Range<usize>, Error> {
        let start = start as usize;
        let end = start.checked_add(len as usize).ok_or(Error::trap(OOB_TABLE_ACCESS))?;
        if end > self.elements.len() { return Err(Error::trap(OOB_TABLE_ACCESS)); }
        Ok(start..end)
    }

    pub fn get(&self, idx: u32) -> Result<WasmValue, Error> {
        self.elements.get(idx as usize).map(|&v| WasmValue(v)).ok_or(Error::trap(OOB_TABLE_ACCESS))
    }

    pub fn set(&mut self, idx: u32, value: WasmValue) -> Result<(), Error> {
        let slot = self.elements.get_mut(idx as usize).ok_or(Error::trap(OOB_TABLE_ACCESS))?;
        *slot = value.0;
        Ok(())
    }

    pub fn fill(&mut self, offset: u32, value: WasmValue, len: u32) -> Result<(), Error> {
        let range = self.range(offset, len)?;
        self.elements[range].fill(value.0);
        Ok(())
    }

    pub fn read(&self, offset: u32, len: u32) -> Result<&[u64], Error> {
        let range = self.range(offset, len)?;
        Ok(&self.elements[range])
    }

    pub fn write(&mut self, offset: u32, values: &[u64]) -> Result<(), Error> {
        let range = self.range(offset, values.len() as u32)?;
        self.elements[range].copy_from_slice(values);
        Ok(())
    }

    /// `table.copy` within one table; the ranges may overlap.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Error> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.elements.copy_within(src, dst.start);
        Ok(())
    }
}

pub struct WasmGlobal {
    pub ty: GlobalType,
    pub value: Cell<WasmValue>,
}

impl WasmGlobal {
    pub fn new(ty: GlobalType, value: WasmValue) -> Self { Self { ty, value: Cell::new(value) } }
    pub fn get(&self) -> WasmValue { self.value.get() }
    pub fn set(&self, value: WasmValue) { self.value.set(value) }
}

// ---------------- Functions, imports and exports ----------------

pub type HostCallback = dyn Fn(&[WasmValue]) -> Result<Vec<WasmValue>, Error>;

pub struct HostFunction {
    pub ty: FuncType,
    callback: Box<HostCallback>,
}

impl HostFunction {
    pub fn call(&self, args: &[WasmValue]) -> Result<Vec<WasmValue>, Error> {
        let results = (self.callback)(args)?;
        if results.len() != self.ty.returns.len() { return Err(Error::trap(INVALID_NUM_ARG)); }
        Ok(results)
    }
}

#[derive(Clone)]
pub enum RuntimeFunction {
    /// Function `index` of the module of `instance`. Weak so that an instance
    /// does not keep itself alive.
    Wasm { instance: Weak<Instance>, index: u32, ty: FuncType },
    Host(Rc<HostFunction>),
}

impl RuntimeFunction {
    pub fn new_host(
        params: Vec<ValType>,
        returns: Vec<ValType>,
        callback: impl Fn(&[WasmValue]) -> Result<Vec<WasmValue>, Error> + 'static,
    ) -> Self {
        RuntimeFunction::Host(Rc::new(HostFunction { ty: FuncType::new(params, returns), callback: Box::new(callback) }))
    }

    pub fn ty(&self) -> &FuncType {
        match self {
            RuntimeFunction::Wasm { ty, .. } => ty,
            RuntimeFunction::Host(host) => &host.ty,
        }
    }
}

impl fmt::Debug for RuntimeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFunction::Wasm { index, ty, .. } => write!(f, "wasm function {index} {ty}"),
            RuntimeFunction::Host(host) => write!(f, "host function {}", host.ty),
        }
    }
}

#[derive(Clone)]
pub enum ExportValue {
    Function(RuntimeFunction),
    Table(Rc<RefCell<WasmTable>>),
    Memory(Rc<RefCell<WasmMemory>>),
    Global(Rc<WasmGlobal>),
}

pub type ModuleImports = HashMap<String, ExportValue>;
pub type Imports = HashMap<String, ModuleImports>;

fn lookup_import<'a>(imports: &'a Imports, import: &ImportRef) -> Result<&'a ExportValue, Error> {
    imports.get(&import.module).and_then(|m| m.get(&import.field)).ok_or_else(|| {
        debug_println!("unknown import {}.{}", import.module, import.field);
        Error::link(UNKNOWN_IMPORT)
    })
}

// ---------------- Instance ----------------

pub struct Instance {
    pub id: u32,
    pub module: Rc<Module>,
    pub functions: Vec<RuntimeFunction>,
    pub tables: Vec<Rc<RefCell<WasmTable>>>,
    pub memories: Vec<Rc<RefCell<WasmMemory>>>,
    pub globals: Vec<Rc<WasmGlobal>>,
    /// Element payloads for `table.init`, emptied by `elem.drop`.
    pub(crate) elements: RefCell<Vec<Rc<[u64]>>>,
    /// Data payloads for `memory.init`, emptied by `data.drop`.
    pub(crate) data: RefCell<Vec<Rc<[u8]>>>,
}

impl Instance {
    /// Links `module` against `imports`, then initializes globals, tables and
    /// memories and runs the start function. Traps raised while doing so are
    /// returned as [`Error::Trap`].
    pub fn instantiate(module: Rc<Module>, imports: &Imports) -> Result<Rc<Instance>, Error> {
        if module.has_errors() { return Err(Error::link(MODULE_HAS_ERRORS)); }

        let mut imported_functions = Vec::new();
        for function in module.functions.iter() {
            let Some(import) = &function.import else { break };
            match lookup_import(imports, import)? {
                ExportValue::Function(f) if *f.ty() == function.ty => imported_functions.push(f.clone()),
                _ => return Err(Error::link(INCOMPATIBLE_IMPORT)),
            }
        }

        let mut tables = Vec::with_capacity(module.tables.len());
        for table in &module.tables {
            match &table.import {
                Some(import) => match lookup_import(imports, import)? {
                    ExportValue::Table(t) => {
                        let provided = t.borrow();
                        if provided.elem_type() != table.ty.elem || !provided.limits().is_subset_of(&table.ty.limits) {
                            return Err(Error::link(INCOMPATIBLE_IMPORT));
                        }
                        drop(provided);
                        tables.push(t.clone());
                    }
                    _ => return Err(Error::link(INCOMPATIBLE_IMPORT)),
                },
                None => tables.push(Rc::new(RefCell::new(WasmTable::new(table.ty)))),
            }
        }

        let mut memories = Vec::with_capacity(module.memories.len());
        for memory in &module.memories {
            match &memory.import {
                Some(import) => match lookup_import(imports, import)? {
                    ExportValue::Memory(m) if m.borrow().limits().is_subset_of(&memory.limits) => memories.push(m.clone()),
                    _ => return Err(Error::link(INCOMPATIBLE_IMPORT)),
                },
                None => memories.push(Rc::new(RefCell::new(WasmMemory::new(memory.limits)))),
            }
        }

        let mut globals = Vec::with_capacity(module.globals.len());
        for global in &module.globals {
            match &global.import {
                Some(import) => match lookup_import(imports, import)? {
                    ExportValue::Global(g) if g.ty == global.ty => globals.push(g.clone()),
                    _ => return Err(Error::link(INCOMPATIBLE_IMPORT)),
                },
                // set once the instance exists, initializers may contain ref.func
                None => globals.push(Rc::new(WasmGlobal::new(global.ty, WasmValue::default()))),
            }
        }

        let id = allocate_id();
        let instance = Rc::new_cyclic(|weak: &Weak<Instance>| {
            let mut functions = imported_functions;
            for (index, function) in module.functions.iter().enumerate().skip(functions.len()) {
                functions.push(RuntimeFunction::Wasm { instance: weak.clone(), index: index as u32, ty: function.ty.clone() });
            }
            let data: Vec<Rc<[u8]>> = module
                .data
                .iter()
                .map(|seg| match seg.mode {
                    SegmentMode::Passive => Rc::from(seg.bytes.as_slice()),
                    _ => Rc::from(Vec::new()),
                })
                .collect();
            Instance {
                id,
                module: module.clone(),
                functions,
                tables,
                memories,
                globals,
                elements: RefCell::new(Vec::new()),
                data: RefCell::new(data),
            }
        });
        REGISTRY.with(|r| r.borrow_mut().instances.insert(id, Rc::downgrade(&instance)));
        debug_println!("instance {}: linked {} imports", id, module.imports.len());

        let mut interp = Interpreter::new();
        for (global, value) in module.globals.iter().zip(&instance.globals) {
            if let Some(init) = &global.init {
                value.set(interp.eval_const(&instance, init)?);
            }
        }

        let mut elements: Vec<Rc<[u64]>> = Vec::with_capacity(module.elements.len());
        for seg in &module.elements {
            let mut values = Vec::with_capacity(seg.inits.len());
            for init in &seg.inits {
                values.push(interp.eval_const(&instance, init)?.0);
            }
            match &seg.mode {
                SegmentMode::Active { index, offset } => {
                    let offset = interp.eval_const(&instance, offset)?.as_u32();
                    instance.tables[*index as usize].borrow_mut().write(offset, &values)?;
                    elements.push(Rc::from(Vec::new()));
                }
                SegmentMode::Declarative => elements.push(Rc::from(Vec::new())),
                SegmentMode::Passive => elements.push(Rc::from(values)),
            }
        }
        *instance.elements.borrow_mut() = elements;

        for seg in &module.data {
            if let SegmentMode::Active { index, offset } = &seg.mode {
                let offset = interp.eval_const(&instance, offset)?.as_u32();
                instance.memories[*index as usize].borrow_mut().write_bytes(offset, &seg.bytes)?;
            }
        }

        if let Some(start) = module.start {
            debug_println!("instance {}: running start function {}", id, start);
            interp.invoke(&instance, start, &[])?;
        }
        Ok(instance)
    }

    fn export_index(&self, name: &str, kind: ExternKind) -> Option<usize> {
        self.module.export(name).filter(|e| e.kind == kind).map(|e| e.index as usize)
    }

    pub fn find_function(&self, name: &str) -> Option<u32> {
        self.export_index(name, ExternKind::Func).map(|i| i as u32)
    }

    pub fn find_global(&self, name: &str) -> Option<Rc<WasmGlobal>> {
        self.export_index(name, ExternKind::Global).map(|i| self.globals[i].clone())
    }

    pub fn find_memory(&self, name: &str) -> Option<Rc<RefCell<WasmMemory>>> {
        self.export_index(name, ExternKind::Memory).map(|i| self.memories[i].clone())
    }

    pub fn find_table(&self, name: &str) -> Option<Rc<RefCell<WasmTable>>> {
        self.export_index(name, ExternKind::Table).map(|i| self.tables[i].clone())
    }

    pub fn export(&self, name: &str) -> Option<ExportValue> {
        let export = self.module.export(name)?;
        let i = export.index as usize;
        Some(match export.kind {
            ExternKind::Func => ExportValue::Function(self.functions[i].clone()),
            ExternKind::Table => ExportValue::Table(self.tables[i].clone()),
            ExternKind::Memory => ExportValue::Memory(self.memories[i].clone()),
            ExternKind::Global => ExportValue::Global(self.globals[i].clone()),
        })
    }

    /// All exports by name, usable as the import bindings of another module.
    pub fn exports(&self) -> ModuleImports {
        self.module
            .exports
            .iter()
            .filter_map(|e| Some((e.name.clone(), self.export(&e.name)?)))
            .collect()
    }

    pub fn function_type(&self, func: u32) -> Option<&FuncType> {
        self.functions.get(func as usize).map(RuntimeFunction::ty)
    }

    /// Calls `func` to completion on a fresh interpreter.
    pub fn invoke(self: &Rc<Self>, func: u32, args: &[WasmValue]) -> Result<Vec<WasmValue>, Error> {
        Interpreter::new().invoke(self, func, args)
    }

    pub fn invoke_export(self: &Rc<Self>, name: &str, args: &[WasmValue]) -> Result<Vec<WasmValue>, Error> {
        let func = self.find_function(name).ok_or(Error::link(UNKNOWN_EXPORT))?;
        self.invoke(func, args)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // the registry may already be gone during thread teardown
        let _ = REGISTRY.try_with(|r| r.borrow_mut().instances.remove(&self.id));
    }
}

mod common;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use common::{op, Body, ModuleBuilder};
use regwasm::error::*;
use regwasm::ValType::{FuncRef, I32};
use regwasm::{
    Error, ExportValue, GlobalType, Imports, Instance, Limits, Module, ModuleImports, RuntimeFunction, WasmGlobal,
    WasmMemory, WasmValue,
};

fn module(builder: &ModuleBuilder) -> Rc<Module> {
    let module = Module::new(&builder.build());
    assert!(!module.has_errors(), "{:?}", module.errors());
    Rc::new(module)
}

fn imports(name: &str, exports: ModuleImports) -> Imports {
    let mut imports = Imports::new();
    imports.insert(name.to_string(), exports);
    imports
}

fn env(entries: Vec<(&str, ExportValue)>) -> Imports {
    imports("env", entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn double_host() -> ExportValue {
    ExportValue::Function(RuntimeFunction::new_host(vec![I32], vec![I32], |args| {
        Ok(vec![WasmValue::from_i32(args[0].as_i32() * 2)])
    }))
}

/// Imports `env.double` and exports `f(x) = double(x) + 1`.
fn host_caller() -> ModuleBuilder {
    let mut b = ModuleBuilder::new();
    let double = b.import_func("env", "double", &[I32], &[I32]);
    let f = b.func(&[I32], &[I32], &[], Body::new().local_get(0).call(double).i32_const(1).op(op::I32_ADD).finish());
    b.export_func("f", f);
    b.export_func("double", double);
    b
}

#[test]
fn calls_host_functions() {
    let instance = Instance::instantiate(module(&host_caller()), &env(vec![("double", double_host())])).unwrap();
    let r = instance.invoke_export("f", &[WasmValue::from_i32(20)]).unwrap();
    assert_eq!(r, vec![WasmValue::from_i32(41)]);
    // an imported host function can be invoked directly as well
    let r = instance.invoke_export("double", &[WasmValue::from_i32(4)]).unwrap();
    assert_eq!(r, vec![WasmValue::from_i32(8)]);
}

#[test]
fn host_calls_with_more_parameters_than_results() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let sink = RuntimeFunction::new_host(vec![I32, I32], vec![], move |args| {
        log.borrow_mut().push((args[0].as_i32(), args[1].as_i32()));
        Ok(vec![])
    });
    let mut b = ModuleBuilder::new();
    let sink_idx = b.import_func("env", "sink", &[I32, I32], &[]);
    let body = Body::new().local_get(0).local_get(0).i32_const(1).op(op::I32_ADD).call(sink_idx).local_get(0).finish();
    let f = b.func(&[I32], &[I32], &[], body);
    b.export_func("f", f);
    let instance = Instance::instantiate(module(&b), &env(vec![("sink", ExportValue::Function(sink))])).unwrap();
    assert_eq!(instance.invoke_export("f", &[WasmValue::from_i32(4)]).unwrap(), vec![WasmValue::from_i32(4)]);
    assert_eq!(*seen.borrow(), vec![(4, 5)]);
}

#[test]
fn host_traps_propagate() {
    let failing = RuntimeFunction::new_host(vec![I32], vec![I32], |_| Err(Error::trap(UNREACHABLE)));
    let instance =
        Instance::instantiate(module(&host_caller()), &env(vec![("double", ExportValue::Function(failing))])).unwrap();
    assert_eq!(instance.invoke_export("f", &[WasmValue::from_i32(1)]), Err(Error::trap(UNREACHABLE)));
}

#[test]
fn host_state_is_shared_with_the_embedder() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    let host = RuntimeFunction::new_host(vec![I32], vec![I32], move |args| {
        log.borrow_mut().push(args[0].as_i32());
        Ok(vec![args[0]])
    });
    let instance = Instance::instantiate(module(&host_caller()), &env(vec![("double", ExportValue::Function(host))])).unwrap();
    instance.invoke_export("f", &[WasmValue::from_i32(3)]).unwrap();
    instance.invoke_export("f", &[WasmValue::from_i32(5)]).unwrap();
    assert_eq!(*calls.borrow(), vec![3, 5]);
}

#[test]
fn missing_and_mismatched_imports() {
    let m = module(&host_caller());
    assert_eq!(Instance::instantiate(m.clone(), &Imports::new()).err(), Some(Error::link(UNKNOWN_IMPORT)));

    let wrong = RuntimeFunction::new_host(vec![], vec![I32], |_| Ok(vec![WasmValue::from_i32(0)]));
    let result = Instance::instantiate(m.clone(), &env(vec![("double", ExportValue::Function(wrong))]));
    assert_eq!(result.err(), Some(Error::link(INCOMPATIBLE_IMPORT)));

    let not_a_function = ExportValue::Global(Rc::new(WasmGlobal::new(
        GlobalType { ty: I32, mutable: false },
        WasmValue::from_i32(1),
    )));
    let result = Instance::instantiate(m, &env(vec![("double", not_a_function)]));
    assert_eq!(result.err(), Some(Error::link(INCOMPATIBLE_IMPORT)));
}

#[test]
fn modules_with_errors_cannot_be_instantiated() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[I32], &[], Body::new().finish());
    let m = Module::new(&b.build());
    assert!(m.has_errors());
    assert_eq!(Instance::instantiate(Rc::new(m), &Imports::new()).err(), Some(Error::link(MODULE_HAS_ERRORS)));
}

#[test]
fn imported_globals_are_read() {
    let mut b = ModuleBuilder::new();
    let g = b.import_global("env", "base", I32, false);
    let mine = b.global(I32, false, Body::new().global_get(g).i32_const(2).op(op::I32_MUL).finish());
    let get = b.func(&[], &[I32], &[], Body::new().global_get(mine).finish());
    b.export_func("get", get);

    let base = Rc::new(WasmGlobal::new(GlobalType { ty: I32, mutable: false }, WasmValue::from_i32(21)));
    let instance = Instance::instantiate(module(&b), &env(vec![("base", ExportValue::Global(base))])).unwrap();
    assert_eq!(instance.invoke_export("get", &[]).unwrap(), vec![WasmValue::from_i32(42)]);

    let mutable = Rc::new(WasmGlobal::new(GlobalType { ty: I32, mutable: true }, WasmValue::from_i32(21)));
    let result = Instance::instantiate(module(&b), &env(vec![("base", ExportValue::Global(mutable))]));
    assert_eq!(result.err(), Some(Error::link(INCOMPATIBLE_IMPORT)));
}

#[test]
fn memories_are_shared_between_instances() {
    let mut a = ModuleBuilder::new();
    a.memory(1, Some(4));
    a.export("mem", 0x02, 0);
    let load = a.func(&[I32], &[I32], &[], Body::new().local_get(0).mem(op::I32_LOAD, 2, 0).finish());
    a.export_func("load", load);
    let owner = Instance::instantiate(module(&a), &Imports::new()).unwrap();

    let mut b = ModuleBuilder::new();
    b.import_memory("a", "mem", 1, Some(4));
    b.data_active(8, &[0x2a, 0, 0, 0]);
    let user = Instance::instantiate(module(&b), &imports("a", owner.exports())).unwrap();
    drop(user);

    assert_eq!(owner.invoke_export("load", &[WasmValue::from_i32(8)]).unwrap(), vec![WasmValue::from_i32(42)]);
    assert_eq!(owner.find_memory("mem").unwrap().borrow().load_u32(8, 0), Ok(42));

    let mut c = ModuleBuilder::new();
    c.import_memory("a", "mem", 2, None);
    assert_eq!(
        Instance::instantiate(module(&c), &imports("a", owner.exports())).err(),
        Some(Error::link(INCOMPATIBLE_IMPORT))
    );
}

#[test]
fn host_memories_can_be_imported() {
    let memory = Rc::new(RefCell::new(WasmMemory::new(Limits { min: 1, max: None })));
    let mut b = ModuleBuilder::new();
    b.import_memory("env", "memory", 1, None);
    b.data_active(0, b"abc");
    Instance::instantiate(module(&b), &env(vec![("memory", ExportValue::Memory(memory.clone()))])).unwrap();
    assert_eq!(memory.borrow().read_bytes(0, 3).unwrap(), b"abc");
}

#[test]
fn out_of_bounds_segments_trap_during_instantiation() {
    let mut b = ModuleBuilder::new();
    b.memory(1, None);
    b.data_active(65535, &[1, 2]);
    assert_eq!(Instance::instantiate(module(&b), &Imports::new()).err(), Some(Error::trap(OOB_MEMORY_ACCESS)));

    let mut b = ModuleBuilder::new();
    b.table(FuncRef, 1, None);
    let f = b.func(&[], &[], &[], Body::new().finish());
    b.elem_active(1, &[f]);
    assert_eq!(Instance::instantiate(module(&b), &Imports::new()).err(), Some(Error::trap(OOB_TABLE_ACCESS)));
}

#[test]
fn start_function_traps_fail_instantiation() {
    let mut b = ModuleBuilder::new();
    let f = b.func(&[], &[], &[], Body::new().op(op::UNREACHABLE).finish());
    b.start(f);
    assert_eq!(Instance::instantiate(module(&b), &Imports::new()).err(), Some(Error::trap(UNREACHABLE)));
}

fn adder() -> ModuleBuilder {
    let mut b = ModuleBuilder::new();
    let add = b.func(&[I32, I32], &[I32], &[], Body::new().local_get(0).local_get(1).op(op::I32_ADD).finish());
    b.export_func("add", add);
    b
}

#[test]
fn functions_can_be_reexported() {
    let a = Instance::instantiate(module(&adder()), &Imports::new()).unwrap();

    let mut b = ModuleBuilder::new();
    let add = b.import_func("a", "add", &[I32, I32], &[I32]);
    b.export_func("plus", add);
    let b_inst = Instance::instantiate(module(&b), &imports("a", a.exports())).unwrap();

    let mut c = ModuleBuilder::new();
    let plus = c.import_func("b", "plus", &[I32, I32], &[I32]);
    let twice = c.func(
        &[I32],
        &[I32],
        &[],
        Body::new().local_get(0).local_get(0).call(plus).finish(),
    );
    c.export_func("twice", twice);
    let c_inst = Instance::instantiate(module(&c), &imports("b", b_inst.exports())).unwrap();
    assert_eq!(c_inst.invoke_export("twice", &[WasmValue::from_i32(21)]).unwrap(), vec![WasmValue::from_i32(42)]);
}

#[test]
fn calls_into_dropped_instances_trap() {
    let a = Instance::instantiate(module(&adder()), &Imports::new()).unwrap();
    let mut b = ModuleBuilder::new();
    let add = b.import_func("a", "add", &[I32, I32], &[I32]);
    let f = b.func(&[], &[I32], &[], Body::new().i32_const(1).i32_const(2).call(add).finish());
    b.export_func("f", f);
    let b_inst = Instance::instantiate(module(&b), &imports("a", a.exports())).unwrap();
    assert_eq!(b_inst.invoke_export("f", &[]).unwrap(), vec![WasmValue::from_i32(3)]);

    drop(a);
    assert_eq!(b_inst.invoke_export("f", &[]), Err(Error::trap(DEAD_INSTANCE)));
}

#[test]
fn tables_hold_functions_of_other_instances() {
    let mut a = ModuleBuilder::new();
    a.table(FuncRef, 2, None);
    let seven = a.func(&[], &[I32], &[], Body::new().i32_const(7).finish());
    a.elem_active(1, &[seven]);
    a.export("table", 0x01, 0);
    let owner = Instance::instantiate(module(&a), &Imports::new()).unwrap();

    let mut b = ModuleBuilder::new();
    b.import_table("a", "table", FuncRef, 2, None);
    let ty = b.ty(&[], &[I32]);
    let dispatch = b.func(&[I32], &[I32], &[], Body::new().local_get(0).call_indirect(ty, 0).finish());
    b.export_func("dispatch", dispatch);
    let user = Instance::instantiate(module(&b), &imports("a", owner.exports())).unwrap();

    assert_eq!(user.invoke_export("dispatch", &[WasmValue::from_i32(1)]).unwrap(), vec![WasmValue::from_i32(7)]);
    assert_eq!(user.invoke_export("dispatch", &[WasmValue::from_i32(0)]), Err(Error::trap(NULL_REFERENCE)));

    let table = owner.find_table("table").unwrap();
    assert_eq!(table.borrow().size(), 2);
    assert_eq!(table.borrow().get(0), Ok(WasmValue::NULL));
}

#[test]
fn exports_are_listed_by_name() {
    let a = Instance::instantiate(module(&adder()), &Imports::new()).unwrap();
    let exports: HashMap<_, _> = a.exports();
    assert_eq!(exports.len(), 1);
    assert!(matches!(exports.get("add"), Some(ExportValue::Function(_))));
    assert_eq!(a.find_function("add"), Some(0));
    assert!(a.find_function("sub").is_none());
    assert!(a.find_memory("add").is_none());
    assert_eq!(a.function_type(0).map(|t| t.params.len()), Some(2));
}

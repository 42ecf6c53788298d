mod common;

use common::{op, Body, ModuleBuilder};
use regwasm::error::*;
use regwasm::ValType::{F32, I32, I64};
use regwasm::{Config, Error, Module};

fn errors(bytes: &[u8]) -> Vec<Error> { Module::new(bytes).errors().iter().map(|e| e.error).collect() }

fn header() -> Vec<u8> {
    let mut bytes = b"\0asm".to_vec();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes
}

#[test]
fn rejects_bad_headers() {
    let m = Module::new(b"\0asn\x01\0\0\0");
    assert_eq!(m.errors().len(), 1);
    assert_eq!(m.errors()[0].error, Error::malformed(NO_MAGIC_HEADER));
    assert_eq!(m.errors()[0].offset, 0);

    let m = Module::new(b"\0asm\x02\0\0\0");
    assert_eq!(m.errors()[0].error, Error::malformed(UNKNOWN_BINARY_VERSION));
    assert_eq!(m.errors()[0].offset, 4);

    assert_eq!(errors(b"\0as"), vec![Error::malformed(NO_MAGIC_HEADER)]);
}

#[test]
fn rejects_truncated_sections() {
    let mut bytes = header();
    bytes.extend_from_slice(&[0x01, 0x0a, 0x00]);
    assert_eq!(errors(&bytes).first(), Some(&Error::malformed(SECTION_OUT_OF_BOUNDS)));
}

#[test]
fn rejects_sections_out_of_order() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[], &[], Body::new().finish());
    let mut bytes = b.build();
    // an empty memory section after the code section
    bytes.extend_from_slice(&[0x05, 0x01, 0x00]);
    assert!(errors(&bytes).contains(&Error::malformed(SECTION_OUT_OF_ORDER)));
}

#[test]
fn reports_type_mismatches_with_offsets() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[I32], &[], Body::new().i64_const(1).finish());
    let m = Module::new(&b.build());
    assert_eq!(m.errors().len(), 1);
    assert_eq!(m.errors()[0].error, Error::validation(TYPE_MISMATCH));
    assert!(m.errors()[0].offset > 8);
    assert_eq!(Module::compile(&b.build()).err().map(|e| e.error), Some(Error::validation(TYPE_MISMATCH)));
}

#[test]
fn keeps_going_after_the_first_error() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[I32], &[], Body::new().f32_const(1.0).finish());
    b.func(&[], &[], &[], Body::new().finish());
    b.func(&[I64], &[I32], &[], Body::new().local_get(0).finish());
    let m = Module::new(&b.build());
    let found: Vec<_> = m.errors().iter().map(|e| e.error).collect();
    assert_eq!(found, vec![Error::validation(TYPE_MISMATCH), Error::validation(TYPE_MISMATCH)]);
    assert!(m.errors()[0].offset < m.errors()[1].offset);
}

#[test]
fn checks_immediate_indices() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[], &[], Body::new().local_get(3).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(UNKNOWN_LOCAL)]);

    let mut b = ModuleBuilder::new();
    b.func(&[], &[], &[], Body::new().call(9).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(UNKNOWN_FUNC)]);

    let mut b = ModuleBuilder::new();
    b.func(&[], &[], &[], Body::new().br(1).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(UNKNOWN_LABEL)]);
}

#[test]
fn rejects_writes_to_immutable_globals() {
    let mut b = ModuleBuilder::new();
    let g = b.global(I32, false, Body::new().i32_const(1).finish());
    b.func(&[], &[], &[], Body::new().i32_const(2).global_set(g).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(GLOBAL_IMMUTABLE)]);
}

#[test]
fn memory_instructions_need_a_memory() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[I32], &[], Body::new().i32_const(0).mem(op::I32_LOAD, 2, 0).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(NO_MEMORY)]);

    let mut b = ModuleBuilder::new();
    b.memory(1, None);
    b.func(&[], &[I32], &[], Body::new().i32_const(0).mem(op::I32_LOAD, 3, 0).finish());
    assert_eq!(errors(&b.build()), vec![Error::validation(ALIGNMENT_TOO_LARGE)]);
}

#[test]
fn unreachable_code_is_polymorphic() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[I32], &[], Body::new().op(op::UNREACHABLE).op(op::I32_ADD).finish());
    b.func(&[], &[F32], &[], Body::new().f32_const(1.0).op(op::RETURN).op(op::DROP).op(op::DROP).finish());
    assert!(errors(&b.build()).is_empty());
}

#[test]
fn rejects_invalid_limits_and_exports() {
    let mut b = ModuleBuilder::new();
    b.memory(2, Some(1));
    assert_eq!(errors(&b.build()), vec![Error::validation(MIN_GREATER_THAN_MAX)]);

    let mut b = ModuleBuilder::new();
    let f = b.func(&[], &[], &[], Body::new().finish());
    b.export_func("f", f);
    b.export_func("f", f);
    assert_eq!(errors(&b.build()), vec![Error::validation(DUPLICATE_EXPORT)]);

    let mut b = ModuleBuilder::new();
    let f = b.func(&[I32], &[], &[], Body::new().finish());
    b.start(f);
    assert_eq!(errors(&b.build()), vec![Error::validation(START_FUNC_TYPE)]);
}

#[test]
fn vector_instructions_are_not_supported() {
    let mut b = ModuleBuilder::new();
    b.func(&[], &[], &[], Body::new().raw(&[0xfd, 0x0c]).finish());
    assert!(errors(&b.build()).contains(&Error::validation(VECTOR_UNSUPPORTED)));
}

#[test]
fn register_file_limit_comes_from_config() {
    let mut b = ModuleBuilder::new();
    b.func(&[I32, I32], &[I32], &[], Body::new().local_get(0).local_get(1).op(op::I32_ADD).finish());
    let bytes = b.build();
    assert!(!Module::new(&bytes).has_errors());
    let tight = Config { max_slot_count: 2, ..Config::default() };
    let m = Module::with_config(&bytes, &tight);
    assert_eq!(m.errors().iter().map(|e| e.error).collect::<Vec<_>>(), vec![Error::validation(TOO_MANY_REGISTERS)]);
}

#[test]
fn name_section_names_functions() {
    let mut b = ModuleBuilder::new();
    let f = b.func(&[], &[], &[], Body::new().finish());
    b.name_func(f, "main");
    let m = Module::compile(&b.build()).unwrap();
    assert_eq!(m.functions[0].name.as_deref(), Some("main"));
    assert_eq!(m.function_by_name("main"), Some(0));
}

//! Engine scenarios
//!
//! The end-to-end behaviors a host program relies on: typed calls, host
//! callbacks, data layout enforcement and lookup failures.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use core_types::{DataLayout, ErrorKind, JitError, SymbolFlags};
use integration_tests::constant_unit;
use jit_cli::samples;
use jit_compiler::{EngineConfig, JitEngine};
use jit_ir::{Builder, CompilationUnit, Context, Function, Linkage, Signature, Type};

static HOST_CALLS: AtomicUsize = AtomicUsize::new(0);
static HOST_ARG: AtomicI32 = AtomicI32::new(0);

extern "C" fn host_cb(value: i32) {
    HOST_CALLS.fetch_add(1, Ordering::SeqCst);
    HOST_ARG.store(value, Ordering::SeqCst);
}

/// `notify(x)`: calls `host_cb(x * 2)` once and returns `x`
fn notify_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("notify", ctx);
    unit.declare_function("host_cb", Signature::new(vec![Type::I32], None));
    let mut func = Function::new("notify", Signature::new(vec![Type::I32], Some(Type::I32)), Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let x = b.param(0);
        let doubled = b.add(x, x);
        b.call("host_cb", None, &[doubled]);
        b.ret(Some(x));
    }
    unit.add_function(func);
    unit
}

fn foreign_layout(engine: &JitEngine) -> DataLayout {
    let candidate: DataLayout = "E-m:o-p:32:32-i64:32-S64".parse().unwrap();
    if candidate != *engine.data_layout() {
        candidate
    } else {
        "e-m:w-p:32:32-i64:64-S32".parse().unwrap()
    }
}

#[test]
fn test_mul_add_returns_1930() {
    let engine = JitEngine::create().unwrap();
    let unit = samples::mul_add_unit(engine.context());
    assert!(unit.verify().is_ok());
    engine.add_module(unit).unwrap();

    let mul_add = unsafe {
        engine
            .get_function::<extern "C" fn(i32, i32, i32) -> i32>("mul_add")
            .unwrap()
    };
    assert_eq!(mul_add(23, 80, 90), 1930);
}

#[test]
fn test_host_callback_called_once() {
    let engine = JitEngine::create().unwrap();
    engine
        .define_absolute("host_cb", host_cb as usize as u64, SymbolFlags::EXPORTED | SymbolFlags::CALLABLE)
        .unwrap();
    engine.add_module(notify_unit(engine.context())).unwrap();

    let notify = unsafe { engine.get_function::<extern "C" fn(i32) -> i32>("notify").unwrap() };
    assert_eq!(HOST_CALLS.load(Ordering::SeqCst), 0);
    assert_eq!(notify(21), 21);
    assert_eq!(HOST_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(HOST_ARG.load(Ordering::SeqCst), 42);
}

#[test]
fn test_layout_mismatch_keeps_earlier_units() {
    let engine = JitEngine::create().unwrap();
    engine.add_module(constant_unit(engine.context(), "unit_a", 7)).unwrap();
    let before = engine.lookup_symbol_address("unit_a").unwrap();

    let unit_b = constant_unit(engine.context(), "unit_b", 8).with_data_layout(foreign_layout(&engine));
    let err = engine.add_module(unit_b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataLayoutMismatch);
    assert!(err.to_string().starts_with("Added modules have incompatible data layouts"));

    assert_eq!(engine.lookup_symbol_address("unit_a").unwrap(), before);
    assert!(matches!(engine.lookup("unit_b"), Err(JitError::SymbolNotFound(_))));
}

#[test]
fn test_layout_mismatch_before_any_lookup() {
    let engine = JitEngine::create().unwrap();
    engine.add_module(constant_unit(engine.context(), "first", 1)).unwrap();
    let unit_b = constant_unit(engine.context(), "second", 2).with_data_layout(foreign_layout(&engine));
    assert!(engine.add_module(unit_b).is_err());

    let first = unsafe { engine.get_function::<extern "C" fn() -> i64>("first").unwrap() };
    assert_eq!(first(), 1);
}

#[test]
fn test_many_units_accepted() {
    let engine = JitEngine::builder()
        .config(EngineConfig::baseline())
        .build()
        .unwrap();
    for i in 0..32 {
        let mut unit = constant_unit(engine.context(), &format!("c{}", i), i);
        if i % 2 == 0 {
            unit.set_data_layout(*engine.data_layout());
        }
        engine.add_module(unit).unwrap();
    }
    assert_eq!(engine.stats().units_added, 32);
    let c31 = unsafe { engine.get_function::<extern "C" fn() -> i64>("c31").unwrap() };
    assert_eq!(c31(), 31);
}

#[test]
fn test_unknown_symbol_is_deterministic() {
    let engine = JitEngine::create().unwrap();
    for _ in 0..3 {
        assert_eq!(
            engine.lookup_symbol_address("no_such_function_in_jit_or_host").unwrap_err(),
            JitError::SymbolNotFound("no_such_function_in_jit_or_host".to_string())
        );
    }
}

#[test]
fn test_host_process_symbols_resolve() {
    let engine = JitEngine::create().unwrap();
    let strlen = unsafe {
        engine
            .get_function::<extern "C" fn(*const u8) -> usize>("strlen")
            .unwrap()
    };
    assert_eq!(strlen(b"jit\0".as_ptr()), 3);
}

#[test]
fn test_sum_array_returns_186() {
    let engine = JitEngine::create().unwrap();
    engine
        .add_module(samples::sum_array_unit(engine.context(), 4))
        .unwrap();
    let sum_array = unsafe {
        engine
            .get_function::<extern "C" fn(*const samples::Point) -> i32>("sum_array")
            .unwrap()
    };
    assert_eq!(sum_array(samples::DEFAULT_POINTS.as_ptr()), 186);
}

#[test]
fn test_jit_code_is_symbolized() {
    let engine = JitEngine::create().unwrap();
    engine.add_module(samples::mul_add_unit(engine.context())).unwrap();
    let address = engine.lookup_symbol_address("mul_add").unwrap();
    let (name, offset) = engine.symbolize(address + 1).unwrap();
    assert_eq!(name, "mul_add");
    assert_eq!(offset, 1);
}

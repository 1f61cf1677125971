//! Contract tests for jit_compiler
//!
//! These tests exercise the public API the way a host program uses it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use core_types::{ErrorKind, JitError, JitResult, SymbolFlags};
use jit_compiler::{
    registered_symbols, EngineConfig, JitEngine, JitEventListener, JitOptimizer, LoadedObject,
    SessionStats,
};
use jit_ir::{
    BinaryOp, Builder, CastOp, CompilationUnit, Context, Function, GlobalData, IntPredicate, Linkage,
    Signature, Type, Value,
};

fn mul_add_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("mul_add", ctx);
    let sig = Signature::new(vec![Type::I32, Type::I32, Type::I32], Some(Type::I32));
    let mut f = Function::new("mul_add", sig, Linkage::External);
    {
        let mut b = Builder::new(&mut f);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let (x, y, z) = (b.param(0), b.param(1), b.param(2));
        let product = b.mul(x, y);
        let sum = b.add(product, z);
        b.ret(Some(sum));
    }
    unit.add_function(f);
    unit
}

/// `zext(lhs op rhs)` over `i1`, from parameters or from the given constants
fn bool_function(
    name: &str,
    constants: Option<(i64, i64)>,
    op: impl FnOnce(&mut Builder<'_>, Value, Value) -> Value,
) -> Function {
    let params = if constants.is_some() { vec![] } else { vec![Type::I1, Type::I1] };
    let mut f = Function::new(name, Signature::new(params, Some(Type::I32)), Linkage::External);
    {
        let mut b = Builder::new(&mut f);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let (x, y) = match constants {
            Some((x, y)) => (b.iconst(Type::I1, x), b.iconst(Type::I1, y)),
            None => (b.param(0), b.param(1)),
        };
        let bit = op(&mut b, x, y);
        let wide = b.cast(CastOp::Zext, bit, Type::I32);
        b.ret(Some(wide));
    }
    f
}

fn bool_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("bools", ctx);
    unit.add_function(bool_function("bool_add", None, |b, x, y| b.add(x, y)));
    unit.add_function(bool_function("bool_shl", None, |b, x, y| b.binary(BinaryOp::Shl, x, y)));
    unit.add_function(bool_function("bool_slt", None, |b, x, y| b.icmp(IntPredicate::Slt, x, y)));
    unit.add_function(bool_function("bool_const_add", Some((1, 1)), |b, x, y| b.add(x, y)));
    unit.add_function(bool_function("bool_const_slt", Some((1, 0)), |b, x, y| {
        b.icmp(IntPredicate::Slt, x, y)
    }));
    unit
}

#[derive(Default)]
struct Recorder {
    units: parking_lot::Mutex<Vec<String>>,
}

impl JitEventListener for Recorder {
    fn notify_object_loaded(&self, object: &LoadedObject) {
        self.units.lock().push(object.unit.clone());
    }
}

#[test]
fn engine_create_uses_host_layout() {
    let engine = JitEngine::create().unwrap();
    assert_eq!(*engine.data_layout(), engine.target().data_layout);
}

#[test]
fn add_module_returns_unit_result() {
    let engine = JitEngine::create().unwrap();
    let result: JitResult<()> = engine.add_module(mul_add_unit(engine.context()));
    assert!(result.is_ok());
    assert_eq!(
        engine.stats(),
        SessionStats {
            units_added: 1,
            ..SessionStats::default()
        }
    );
}

#[test]
fn get_function_calls_native_code() {
    let engine = JitEngine::create().unwrap();
    engine.add_module(mul_add_unit(engine.context())).unwrap();
    let f = unsafe {
        engine
            .get_function::<extern "C" fn(i32, i32, i32) -> i32>("mul_add")
            .unwrap()
    };
    assert_eq!(f(23, 80, 90), 1930);
    assert_eq!(f(-2, 3, 1), -5);
}

#[test]
fn every_opt_level_agrees() {
    for level in 0..=3 {
        let engine = JitEngine::builder()
            .config(EngineConfig::new().with_opt_level(level))
            .build()
            .unwrap();
        engine.add_module(mul_add_unit(engine.context())).unwrap();
        let f = unsafe {
            engine
                .get_function::<extern "C" fn(i32, i32, i32) -> i32>("mul_add")
                .unwrap()
        };
        assert_eq!(f(23, 80, 90), 1930, "opt level {}", level);
    }
}

#[test]
fn custom_transform_counts_materializations() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let optimizer = JitOptimizer::new(2);
    let engine = JitEngine::builder()
        .transform(move |unit: CompilationUnit| {
            counter.fetch_add(1, Ordering::SeqCst);
            jit_compiler::IrTransform::transform(&optimizer, unit)
        })
        .build()
        .unwrap();

    engine.add_module(mul_add_unit(engine.context())).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let first = engine.lookup_symbol_address("mul_add").unwrap();
    let second = engine.lookup_symbol_address("mul_add").unwrap();
    assert_eq!(first, second);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn listeners_see_linked_units() {
    let recorder = Arc::new(Recorder::default());
    let engine = JitEngine::builder()
        .listener(recorder.clone())
        .build()
        .unwrap();
    engine.add_module(mul_add_unit(engine.context())).unwrap();
    engine.lookup("mul_add").unwrap();
    assert_eq!(*recorder.units.lock(), vec!["mul_add".to_string()]);
}

#[test]
fn globals_are_resolvable() {
    let engine = JitEngine::create().unwrap();
    let mut unit = CompilationUnit::new("data", engine.context());
    unit.define_global(GlobalData::constant("magic", 0xfeed_u32.to_le_bytes().to_vec(), 4));
    engine.add_module(unit).unwrap();

    let symbol = engine.lookup("magic").unwrap();
    assert!(symbol.flags.contains(SymbolFlags::EXPORTED));
    assert!(!symbol.flags.contains(SymbolFlags::CALLABLE));
    let value = unsafe { *(symbol.address as usize as *const u32) };
    assert_eq!(u32::from_le(value), 0xfeed);
}

#[test]
fn errors_have_kinds() {
    let engine = JitEngine::create().unwrap();
    let err = engine.lookup_symbol_address("definitely_not_a_symbol").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolNotFound);

    engine.define_absolute("zero", 0, SymbolFlags::NONE).unwrap();
    let err = engine.lookup_symbol_address("zero").unwrap_err();
    assert_eq!(err, JitError::NullSymbolAddress("zero".to_string()));
}

#[test]
fn mangled_names_follow_layout() {
    let engine = JitEngine::create().unwrap();
    let expected = match engine.data_layout().global_prefix() {
        Some(prefix) => format!("{}mul_add", prefix),
        None => "mul_add".to_string(),
    };
    assert_eq!(engine.mangled_name("mul_add"), expected);
    assert_eq!(engine.mangle("mul_add"), engine.mangle("mul_add"));
}

#[test]
fn bool_arithmetic_wraps_to_one_bit_at_every_level() {
    for config in [EngineConfig::baseline(), EngineConfig::new()] {
        let level = config.opt_level;
        let engine = JitEngine::builder().config(config).build().unwrap();
        let unit = bool_unit(engine.context());
        assert!(unit.verify().is_ok());
        engine.add_module(unit).unwrap();

        let (add, shl, slt) = unsafe {
            (
                engine.get_function::<extern "C" fn(bool, bool) -> i32>("bool_add").unwrap(),
                engine.get_function::<extern "C" fn(bool, bool) -> i32>("bool_shl").unwrap(),
                engine.get_function::<extern "C" fn(bool, bool) -> i32>("bool_slt").unwrap(),
            )
        };
        assert_eq!(add(true, true), 0, "opt level {}", level);
        assert_eq!(add(true, false), 1, "opt level {}", level);
        assert_eq!(shl(true, true), 1, "opt level {}", level);
        // a set i1 is -1 under signed comparison
        assert_eq!(slt(true, false), 1, "opt level {}", level);
        assert_eq!(slt(false, true), 0, "opt level {}", level);

        let (const_add, const_slt) = unsafe {
            (
                engine.get_function::<extern "C" fn() -> i32>("bool_const_add").unwrap(),
                engine.get_function::<extern "C" fn() -> i32>("bool_const_slt").unwrap(),
            )
        };
        assert_eq!(const_add(), 0, "opt level {}", level);
        assert_eq!(const_slt(), 1, "opt level {}", level);
    }
}

#[test]
fn linked_functions_are_published_to_debuggers() {
    let engine = JitEngine::create().unwrap();
    let mut unit = CompilationUnit::new("debuggable", engine.context());
    unit.add_function(bool_function("debugger_visible_add", None, |b, x, y| b.add(x, y)));
    engine.add_module(unit).unwrap();

    let visible = |symbols: Vec<(String, u64)>| {
        symbols
            .into_iter()
            .filter(|(name, _)| name == "debugger_visible_add")
            .map(|(_, address)| address)
            .collect::<Vec<u64>>()
    };
    assert!(visible(registered_symbols()).is_empty());

    let address = engine.lookup_symbol_address("debugger_visible_add").unwrap();
    assert_eq!(visible(registered_symbols()), vec![address]);

    drop(engine);
    assert!(visible(registered_symbols()).is_empty());
}

//! Lazy materialization
//!
//! Units compile on first lookup, exactly once, even when several threads
//! ask at the same time; failures stick to the unit that caused them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use core_types::{ErrorKind, JitError};
use integration_tests::{caller_unit, constant_unit};
use jit_compiler::{IrTransform, JitEngine, JitOptimizer};
use jit_ir::CompilationUnit;

fn counting_engine(runs: &Arc<AtomicUsize>) -> JitEngine {
    let counter = Arc::clone(runs);
    let optimizer = JitOptimizer::default();
    JitEngine::builder()
        .transform(move |unit: CompilationUnit| {
            counter.fetch_add(1, Ordering::SeqCst);
            optimizer.transform(unit)
        })
        .build()
        .unwrap()
}

#[test]
fn test_second_lookup_does_not_transform() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = counting_engine(&runs);
    engine.add_module(constant_unit(engine.context(), "f", 5)).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let first = engine.lookup_symbol_address("f").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let second = engine.lookup_symbol_address("f").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
}

#[test]
fn test_unlooked_units_are_never_compiled() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = counting_engine(&runs);
    engine.add_module(constant_unit(engine.context(), "used", 1)).unwrap();
    engine.add_module(constant_unit(engine.context(), "unused", 2)).unwrap();
    engine.lookup("used").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().units_materialized, 1);
}

#[test]
fn test_concurrent_lookups_agree() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(counting_engine(&runs));
    engine.add_module(constant_unit(engine.context(), "shared", 99)).unwrap();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.lookup_symbol_address("shared").unwrap()
            })
        })
        .collect();
    let addresses: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let f = unsafe { engine.get_function::<extern "C" fn() -> i64>("shared").unwrap() };
    assert_eq!(f(), 99);
}

#[test]
fn test_concurrent_chains() {
    let runs = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(counting_engine(&runs));
    engine.add_module(constant_unit(engine.context(), "link0", 0)).unwrap();
    for i in 1..6 {
        engine
            .add_module(caller_unit(engine.context(), &format!("link{}", i), &format!("link{}", i - 1)))
            .unwrap();
    }

    let handles: Vec<_> = (0..6)
        .rev()
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let f = unsafe {
                    engine
                        .get_function::<extern "C" fn() -> i64>(&format!("link{}", i))
                        .unwrap()
                };
                (i, f())
            })
        })
        .collect();
    for h in handles {
        let (i, value) = h.join().unwrap();
        assert_eq!(value, i as i64);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 6);
    assert_eq!(engine.stats().units_materialized, 6);
}

#[test]
fn test_mutual_recursion_across_units() {
    use jit_ir::{Builder, Function, IntPredicate, Linkage, Signature, Type};

    // is_even(n) = n == 0 ? 1 : is_odd(n - 1); is_odd(n) = n == 0 ? 0 : is_even(n - 1)
    fn parity_unit(engine: &JitEngine, name: &str, other: &str, base: i64) -> CompilationUnit {
        let sig = Signature::new(vec![Type::I64], Some(Type::I64));
        let mut unit = CompilationUnit::new(name, engine.context());
        unit.declare_function(other, sig.clone());
        let mut func = Function::new(name, sig, Linkage::External);
        {
            let mut b = Builder::new(&mut func);
            let entry = b.create_block("entry");
            let zero_case = b.create_block("zero");
            let recurse = b.create_block("recurse");
            b.switch_to_block(entry);
            let n = b.param(0);
            let zero = b.iconst(Type::I64, 0);
            let is_zero = b.icmp(IntPredicate::Eq, n, zero);
            b.branch(is_zero, zero_case, &[], recurse, &[]);
            b.switch_to_block(zero_case);
            let result = b.iconst(Type::I64, base);
            b.ret(Some(result));
            b.switch_to_block(recurse);
            let one = b.iconst(Type::I64, 1);
            let m = b.sub(n, one);
            let r = b.call_value(other, Type::I64, &[m]);
            b.ret(Some(r));
        }
        unit.add_function(func);
        unit
    }

    let engine = JitEngine::create().unwrap();
    engine.add_module(parity_unit(&engine, "is_even", "is_odd", 1)).unwrap();
    engine.add_module(parity_unit(&engine, "is_odd", "is_even", 0)).unwrap();

    let is_even = unsafe { engine.get_function::<extern "C" fn(i64) -> i64>("is_even").unwrap() };
    assert_eq!(is_even(10), 1);
    assert_eq!(is_even(7), 0);
    assert_eq!(engine.stats().units_materialized, 2);
}

#[test]
fn test_failed_unit_repeats_error() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let engine = JitEngine::builder()
        .transform(move |unit: CompilationUnit| {
            counter.fetch_add(1, Ordering::SeqCst);
            if unit.name() == "bad" {
                Err(JitError::transform(unit.name(), "refused"))
            } else {
                Ok(unit)
            }
        })
        .build()
        .unwrap();
    engine.add_module(constant_unit(engine.context(), "bad", 1)).unwrap();
    engine.add_module(constant_unit(engine.context(), "good", 2)).unwrap();

    let first = engine.lookup("bad").unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Transform);
    assert_eq!(engine.lookup("bad").unwrap_err(), first);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(engine.lookup("good").is_ok());
    assert_eq!(engine.stats().units_failed, 1);
}

#[test]
fn test_duplicate_unit_rejected_without_side_effects() {
    let engine = JitEngine::create().unwrap();
    engine.add_module(constant_unit(engine.context(), "twice", 1)).unwrap();
    let err = engine
        .add_module(constant_unit(engine.context(), "twice", 2))
        .unwrap_err();
    assert_eq!(err, JitError::DuplicateSymbol("twice".to_string()));

    let f = unsafe { engine.get_function::<extern "C" fn() -> i64>("twice").unwrap() };
    assert_eq!(f(), 1);
}

//! Integration test suite for the JIT engine
//!
//! This crate provides end-to-end tests that verify the engine, the IR and
//! the demo host work together across crate boundaries.

use jit_ir::{Builder, CompilationUnit, Context, Function, Linkage, Signature, Type};

/// Re-export components for test convenience
pub mod components {
    pub use core_types;
    pub use jit_cli;
    pub use jit_compiler;
    pub use jit_ir;
}

/// `name() -> i64` returning `value`
pub fn constant_unit(ctx: &Context, name: &str, value: i64) -> CompilationUnit {
    let mut unit = CompilationUnit::new(name, ctx);
    let mut func = Function::new(name, Signature::new(vec![], Some(Type::I64)), Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let v = b.iconst(Type::I64, value);
        b.ret(Some(v));
    }
    unit.add_function(func);
    unit
}

/// `name() -> i64` returning `callee() + 1`
pub fn caller_unit(ctx: &Context, name: &str, callee: &str) -> CompilationUnit {
    let mut unit = CompilationUnit::new(name, ctx);
    unit.declare_function(callee, Signature::new(vec![], Some(Type::I64)));
    let mut func = Function::new(name, Signature::new(vec![], Some(Type::I64)), Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let v = b.call_value(callee, Type::I64, &[]);
        let one = b.iconst(Type::I64, 1);
        let sum = b.add(v, one);
        b.ret(Some(sum));
    }
    unit.add_function(func);
    unit
}

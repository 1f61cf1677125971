//! Sample compilation unit producers
//!
//! Each producer builds one unit against the engine's context. The engine
//! never depends on these; they are the host program's side of the contract.

use jit_ir::{Builder, CompilationUnit, Context, Function, IntPredicate, Linkage, Signature, Type};

/// Element type of the `sum_array` argument.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    /// Summed coordinate
    pub x: i32,
    /// Ignored coordinate
    pub y: i32,
}

/// The points summed by default: `2 + 3 + 8 + 173 = 186`
pub const DEFAULT_POINTS: [Point; 4] = [
    Point { x: 2, y: 0 },
    Point { x: 3, y: 1 },
    Point { x: 8, y: 0 },
    Point { x: 173, y: 1 },
];

/// `mul_add(x, y, z) = x * y + z` over `i32`
pub fn mul_add_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("mul_add", ctx);
    let sig = Signature::new(vec![Type::I32, Type::I32, Type::I32], Some(Type::I32));
    let mut func = Function::new("mul_add", sig, Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let (x, y, z) = (b.param(0), b.param(1), b.param(2));
        let tmp = b.mul(x, y);
        let tmp2 = b.add(tmp, z);
        b.ret(Some(tmp2));
    }
    unit.add_function(func);
    unit
}

/// `sum_array(points) -> i32`: sum of `points[i].x` for `i < len`.
///
/// The loop counter and the accumulator live in stack slots, and the
/// element type is a packed `{ i32, i32 }` struct named `point` in `ctx`.
/// `len` must be at least 1.
pub fn sum_array_unit(ctx: &Context, len: u32) -> CompilationUnit {
    let point = ctx
        .find_struct("point")
        .unwrap_or_else(|| ctx.create_struct("point", vec![Type::I32, Type::I32], true));

    let mut unit = CompilationUnit::new("sum_array", ctx);
    let sig = Signature::new(vec![Type::Ptr], Some(Type::I32));
    let mut func = Function::new("sum_array", sig, Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        let body = b.create_block("loop");
        let end = b.create_block("end");

        b.switch_to_block(entry);
        let array = b.param(0);
        let inc_addr = b.alloca(Type::I32);
        let zero = b.iconst(Type::I32, 0);
        b.store(zero, inc_addr);
        let result_addr = b.alloca(Type::I32);
        b.store(zero, result_addr);
        b.jump(body, &[]);

        b.switch_to_block(body);
        let inc = b.load(Type::I32, inc_addr);
        let ptr = b.element_ptr(array, Type::Struct(point), inc, Some(0));
        let x = b.load(Type::I32, ptr);
        let result = b.load(Type::I32, result_addr);
        let one = b.iconst(Type::I32, 1);
        let next = b.add(inc, one);
        b.store(next, inc_addr);
        let sum = b.add(result, x);
        b.store(sum, result_addr);
        let limit = b.iconst(Type::I32, i64::from(len));
        let done = b.icmp(IntPredicate::Eq, next, limit);
        b.branch(done, end, &[], body, &[]);

        b.switch_to_block(end);
        let result = b.load(Type::I32, result_addr);
        b.ret(Some(result));
    }
    unit.add_function(func);
    unit
}

/// Handle wrapper `name(hdl)` around one coroutine handle operation
fn handle_wrapper(name: &str, ret: Option<Type>, op: impl FnOnce(&mut Builder<'_>, jit_ir::Value) -> Option<jit_ir::Value>) -> Function {
    let mut func = Function::new(name, Signature::new(vec![Type::Ptr], ret), Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let hdl = b.param(0);
        let value = op(&mut b, hdl);
        b.ret(value);
    }
    func
}

/// `coro_inc(n) -> ptr` plus the `coro_resume`, `coro_destroy` and
/// `coro_done` handle wrappers.
///
/// The coroutine calls the host's `print(i32)` with `n + 1`, suspends,
/// prints `n + 2` when resumed and then reaches its final suspend point.
/// Destroying it frees the frame allocated with `malloc`.
pub fn coro_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("coro", ctx);
    unit.declare_function("malloc", Signature::new(vec![Type::I64], Some(Type::Ptr)));
    unit.declare_function("free", Signature::new(vec![Type::Ptr], None));
    unit.declare_function("print", Signature::new(vec![Type::I32], None));

    unit.add_function(handle_wrapper("coro_resume", None, |b, hdl| {
        b.coro_resume(hdl);
        None
    }));
    unit.add_function(handle_wrapper("coro_destroy", None, |b, hdl| {
        b.coro_destroy(hdl);
        None
    }));
    unit.add_function(handle_wrapper("coro_done", Some(Type::I1), |b, hdl| Some(b.coro_done(hdl))));

    let mut func = Function::new("coro_inc", Signature::new(vec![Type::I32], Some(Type::Ptr)), Linkage::External);
    {
        let mut b = Builder::new(&mut func);
        let entry = b.create_block("entry");
        let resume = b.create_block("resume");
        let cleanup = b.create_block("cleanup");
        let suspend = b.create_block("suspend");
        let trap = b.create_block("trap");

        b.switch_to_block(entry);
        let size = b.coro_size();
        let alloc = b.call_value("malloc", Type::Ptr, &[size]);
        let hdl = b.coro_begin(alloc);
        let n = b.param(0);
        let one = b.iconst(Type::I32, 1);
        let inc = b.add(n, one);
        b.call("print", None, &[inc]);
        b.suspend(false, resume, cleanup);

        b.switch_to_block(resume);
        let one = b.iconst(Type::I32, 1);
        let inc2 = b.add(inc, one);
        b.call("print", None, &[inc2]);
        b.suspend(true, trap, cleanup);

        b.switch_to_block(cleanup);
        let mem = b.coro_free(hdl);
        b.call("free", None, &[mem]);
        b.jump(suspend, &[]);

        b.switch_to_block(trap);
        b.trap();

        b.switch_to_block(suspend);
        b.coro_end(hdl);
        b.ret(Some(hdl));
    }
    unit.add_function(func);
    unit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_verify() {
        let ctx = Context::new();
        for unit in [mul_add_unit(&ctx), sum_array_unit(&ctx, 4), coro_unit(&ctx)] {
            let result = unit.verify();
            assert!(result.is_ok(), "{}: {}", unit.name(), result);
        }
    }

    #[test]
    fn test_point_struct_shared() {
        let ctx = Context::new();
        sum_array_unit(&ctx, 4);
        sum_array_unit(&ctx, 2);
        let id = ctx.find_struct("point").unwrap();
        assert!(ctx.struct_type(id).unwrap().packed);
    }

    #[test]
    fn test_coro_references_host() {
        let ctx = Context::new();
        let refs = coro_unit(&ctx).external_references();
        let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["free", "malloc", "print"]);
    }
}

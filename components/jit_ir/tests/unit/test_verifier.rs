//! Unit tests for the IR verifier

use jit_ir::{
    Builder, CompilationUnit, Context, Function, GlobalData, IntPredicate, Linkage, Signature, Type,
};

#[cfg(test)]
mod verifier_tests {
    use super::*;

    #[test]
    fn test_undeclared_callee() {
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("u", &ctx);
        let mut f = Function::new("f", Signature::default(), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            b.call("mystery", None, &[]);
            b.ret(None);
        }
        unit.add_function(f);
        let result = unit.verify();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("@mystery"));
    }

    #[test]
    fn test_block_argument_mismatch() {
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("u", &ctx);
        let mut f = Function::new("f", Signature::new(vec![Type::I32], Some(Type::I32)), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            let exit = b.create_block("exit");
            let p = b.append_block_param(exit, Type::I32);
            b.switch_to_block(entry);
            let x = b.param(0);
            let zero = b.iconst(Type::I32, 0);
            let c = b.icmp(IntPredicate::Eq, x, zero);
            b.branch(c, exit, &[x], exit, &[]);
            b.switch_to_block(exit);
            b.ret(Some(p));
        }
        unit.add_function(f);
        let result = unit.verify();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("takes 1 arguments, got 0"));
    }

    #[test]
    fn test_suspend_outside_entry_ok_but_begin_is_not() {
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("u", &ctx);
        let mut f = Function::new("c", Signature::new(vec![Type::Ptr], Some(Type::Ptr)), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            let later = b.create_block("later");
            b.switch_to_block(entry);
            b.jump(later, &[]);
            b.switch_to_block(later);
            let mem = b.param(0);
            let hdl = b.coro_begin(mem);
            b.ret(Some(hdl));
        }
        unit.add_function(f);
        let result = unit.verify();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("entry block"));
    }

    #[test]
    fn test_duplicate_definitions() {
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("u", &ctx);
        unit.define_global(GlobalData::zeroed("x", 8, 8));
        unit.define_global(GlobalData::constant("x", vec![1, 2], 3));
        let result = unit.verify();
        assert_eq!(result.errors.len(), 2);
    }
}

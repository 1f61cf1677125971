//! Unit tests for CompilationUnit construction

use core_types::DataLayout;
use jit_ir::{Builder, CompilationUnit, Context, Function, GlobalData, Linkage, Signature, Type};

fn counter_unit(ctx: &Context) -> CompilationUnit {
    let mut unit = CompilationUnit::new("counter", ctx);
    unit.define_global(GlobalData::zeroed("count", 4, 4));

    let mut bump = Function::new("bump", Signature::new(vec![], Some(Type::I32)), Linkage::External);
    {
        let mut b = Builder::new(&mut bump);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let addr = b.global_addr("count");
        let old = b.load(Type::I32, addr);
        let one = b.iconst(Type::I32, 1);
        let new = b.add(old, one);
        b.store(new, addr);
        b.ret(Some(new));
    }
    unit.add_function(bump);
    unit
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_globals_are_exported() {
        let ctx = Context::new();
        let unit = counter_unit(&ctx);
        assert_eq!(unit.exported_symbols(), vec!["bump", "count"]);
        assert!(unit.external_references().is_empty());
        assert!(unit.verify().is_ok());
    }

    #[test]
    fn test_layout_defaults_to_unset() {
        let ctx = Context::new();
        let unit = counter_unit(&ctx);
        assert!(unit.data_layout().is_none());
        let unit = unit.with_data_layout(DataLayout::generic());
        assert_eq!(unit.data_layout(), Some(&DataLayout::generic()));
    }

    #[test]
    fn test_unit_display_lists_globals() {
        let ctx = Context::new();
        let text = counter_unit(&ctx).to_string();
        assert!(text.starts_with("; unit counter\n"));
        assert!(text.contains("external global @count [4 bytes, align 4]"));
        assert!(text.contains("define external @bump() -> i32 {"));
    }

    #[test]
    fn test_context_is_shared() {
        let ctx = Context::new();
        let unit = counter_unit(&ctx);
        assert!(unit.context().same_as(&ctx));
    }
}

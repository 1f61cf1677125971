//! Compile layer
//!
//! Turns the functions of a transformed unit into machine code with
//! relocations. Compilation holds no engine lock: the layer only needs the
//! target ISA and the unit's link-layer ids, so independent units (and the
//! functions inside one unit) compile in parallel on the rayon pool.

use core_types::{JitError, JitResult};
use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::{Context, FinalizedMachReloc};
use cranelift_module::FuncId;
use jit_ir::{CompilationUnit, Function};
use rayon::prelude::*;
use tracing::trace;

use crate::lower::{lower_function, UnitSymbols};

/// Machine code for one function, ready to be linked.
pub struct CompiledFunction {
    /// Function name inside its unit
    pub name: String,
    pub(crate) id: FuncId,
    pub(crate) func: ir::Function,
    pub(crate) bytes: Vec<u8>,
    pub(crate) alignment: u64,
    pub(crate) relocs: Vec<FinalizedMachReloc>,
}

impl CompiledFunction {
    /// Size of the machine code in bytes
    pub fn code_size(&self) -> usize {
        self.bytes.len()
    }
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("name", &self.name)
            .field("code_size", &self.bytes.len())
            .field("relocs", &self.relocs.len())
            .finish()
    }
}

/// Compiles units for the host ISA, optionally in parallel.
#[derive(Clone)]
pub struct ConcurrentIrCompiler {
    isa: OwnedTargetIsa,
    concurrent: bool,
}

impl ConcurrentIrCompiler {
    /// Create a compiler for `isa`
    pub fn new(isa: OwnedTargetIsa, concurrent: bool) -> Self {
        Self { isa, concurrent }
    }

    /// True if functions are compiled on the worker pool
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Compile every function of `unit`
    ///
    /// `symbols` must bind every function the unit defines and every name it
    /// references.
    pub fn compile_unit(
        &self,
        unit: &CompilationUnit,
        symbols: &UnitSymbols,
    ) -> JitResult<Vec<CompiledFunction>> {
        if self.concurrent && unit.functions.len() > 1 {
            unit.functions
                .par_iter()
                .map(|f| self.compile_function(f, unit, symbols))
                .collect()
        } else {
            unit.functions
                .iter()
                .map(|f| self.compile_function(f, unit, symbols))
                .collect()
        }
    }

    fn compile_function(
        &self,
        func: &Function,
        unit: &CompilationUnit,
        symbols: &UnitSymbols,
    ) -> JitResult<CompiledFunction> {
        let id = symbols
            .function(&func.name)
            .ok_or_else(|| JitError::compile(&func.name, "function was not declared"))?;
        let lowered = lower_function(func, unit, symbols, &*self.isa, id)?;

        let mut ctx = Context::for_function(lowered);
        let code = ctx
            .compile(&*self.isa, &mut ControlPlane::default())
            .map_err(|e| JitError::compile(&func.name, e.inner))?;
        let bytes = code.code_buffer().to_vec();
        let relocs = code.buffer.relocs().to_vec();
        let alignment = u64::from(code.buffer.alignment);

        trace!(
            unit = unit.name(),
            function = func.name.as_str(),
            code_size = bytes.len(),
            relocs = relocs.len(),
            "compiled function"
        );

        Ok(CompiledFunction {
            name: func.name.clone(),
            id,
            func: ctx.func,
            bytes,
            alignment,
            relocs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::{native_signature, LinkedName};
    use cranelift_codegen::settings;
    use jit_ir::{Builder, Context as IrContext, Linkage, Signature, Type};

    fn compiler(concurrent: bool) -> ConcurrentIrCompiler {
        let isa = cranelift_native::builder()
            .unwrap()
            .finish(settings::Flags::new(settings::builder()))
            .unwrap();
        ConcurrentIrCompiler::new(isa, concurrent)
    }

    fn constant_fn(name: &str, value: i64) -> Function {
        let mut f = Function::new(name, Signature::new(vec![], Some(Type::I64)), Linkage::External);
        let mut b = Builder::new(&mut f);
        let entry = b.create_block("entry");
        b.switch_to_block(entry);
        let v = b.iconst(Type::I64, value);
        b.ret(Some(v));
        f
    }

    fn unit_with(ctx: &IrContext, compiler: &ConcurrentIrCompiler, count: u32) -> (CompilationUnit, UnitSymbols) {
        let mut unit = CompilationUnit::new("consts", ctx);
        let mut symbols = UnitSymbols::new();
        for i in 0..count {
            let f = constant_fn(&format!("c{}", i), i64::from(i));
            let sig = native_signature(&f.signature, &*compiler.isa).unwrap();
            symbols.insert(f.name.clone(), LinkedName::Function(FuncId::from_u32(i), sig));
            unit.add_function(f);
        }
        (unit, symbols)
    }

    #[test]
    fn test_compile_sequential_and_parallel_agree() {
        let ctx = IrContext::new();
        let seq = compiler(false);
        let par = compiler(true);
        assert!(!seq.is_concurrent());
        assert!(par.is_concurrent());
        let (unit, symbols) = unit_with(&ctx, &seq, 8);

        let a = seq.compile_unit(&unit, &symbols).unwrap();
        let b = par.compile_unit(&unit, &symbols).unwrap();
        assert_eq!(a.len(), 8);
        let names_a: Vec<&str> = a.iter().map(|c| c.name.as_str()).collect();
        let names_b: Vec<&str> = b.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names_a, names_b);
        assert!(a.iter().zip(&b).all(|(x, y)| x.bytes == y.bytes));
    }

    #[test]
    fn test_undeclared_function_fails() {
        let ctx = IrContext::new();
        let c = compiler(false);
        let mut unit = CompilationUnit::new("u", &ctx);
        unit.add_function(constant_fn("orphan", 1));
        let err = c.compile_unit(&unit, &UnitSymbols::new()).unwrap_err();
        assert!(matches!(err, JitError::Compile { .. }));
    }
}

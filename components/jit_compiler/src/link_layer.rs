//! Link layer
//!
//! Owns the executable memory. Compiled functions and global data are
//! declared and defined in a `cranelift_jit::JITModule`, relocated when the
//! batch is finalized, and stay resident until the layer is dropped.
//!
//! Unit-private definitions are declared anonymously so names never collide
//! across units. References to symbols the module does not define are bound
//! through an address table the session fills before finalization.

use std::collections::HashMap;
use std::sync::Arc;

use core_types::{JitError, JitResult};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, Linkage as ModuleLinkage, Module, ModuleError};
use jit_ir::{CompilationUnit, Linkage};
use parking_lot::RwLock;
use tracing::debug;

use crate::compile_layer::CompiledFunction;
use crate::config::EngineConfig;
use crate::lower::{native_signature, LinkedName, UnitSymbols};

/// Build the host ISA with the code generator flags from `config`.
pub fn host_isa(config: &EngineConfig) -> JitResult<OwnedTargetIsa> {
    let mut flags = settings::builder();
    let verifier = if config.verify_generated_code { "true" } else { "false" };
    for (flag, value) in [
        ("opt_level", config.codegen_opt_level()),
        ("is_pic", "false"),
        ("enable_verifier", verifier),
    ] {
        flags
            .set(flag, value)
            .map_err(|e| JitError::TargetDetection(format!("{}={}: {}", flag, value, e)))?;
    }

    let builder = cranelift_native::builder().map_err(|e| JitError::TargetDetection(e.to_string()))?;
    builder
        .finish(settings::Flags::new(flags))
        .map_err(|e| JitError::TargetDetection(e.to_string()))
}

struct ResidentModule(JITModule);

// SAFETY: the module's raw code and data pointers are only dereferenced by
// the module itself, and the layer is only reached through the session's
// link mutex.
unsafe impl Send for ResidentModule {}

/// Maps compiled code into the process.
pub struct ObjectLinkingLayer {
    module: Option<ResidentModule>,
    isa: OwnedTargetIsa,
    externals: Arc<RwLock<HashMap<String, u64>>>,
}

impl ObjectLinkingLayer {
    /// Create a layer targeting the host
    pub fn new(config: &EngineConfig) -> JitResult<Self> {
        let isa = host_isa(config)?;
        let externals: Arc<RwLock<HashMap<String, u64>>> = Arc::new(RwLock::new(HashMap::new()));

        let mut builder = JITBuilder::with_isa(isa.clone(), cranelift_module::default_libcall_names());
        let table = Arc::clone(&externals);
        builder.symbol_lookup_fn(Box::new(move |name| {
            table.read().get(name).map(|address| *address as usize as *const u8)
        }));

        Ok(Self {
            module: Some(ResidentModule(JITModule::new(builder))),
            isa,
            externals,
        })
    }

    /// The target ISA, shareable with the compile layer
    pub fn isa(&self) -> OwnedTargetIsa {
        self.isa.clone()
    }

    fn module(&mut self) -> JitResult<&mut JITModule> {
        self.module
            .as_mut()
            .map(|m| &mut m.0)
            .ok_or_else(|| JitError::Link("link layer has been released".to_string()))
    }

    /// Declare everything `unit` defines or references
    pub fn declare_unit(&mut self, unit: &CompilationUnit) -> JitResult<UnitSymbols> {
        let isa = self.isa.clone();
        let module = self.module()?;
        let mut symbols = UnitSymbols::new();

        for func in &unit.functions {
            let sig = native_signature(&func.signature, &*isa).map_err(|m| JitError::compile(&func.name, m))?;
            let id = match func.linkage {
                Linkage::External => module.declare_function(&func.name, ModuleLinkage::Export, &sig),
                Linkage::Internal => module.declare_anonymous_function(&sig),
            }
            .map_err(link_error)?;
            symbols.insert(func.name.clone(), LinkedName::Function(id, sig));
        }

        for global in &unit.globals {
            let id = match global.linkage {
                Linkage::External => {
                    module.declare_data(&global.name, ModuleLinkage::Export, global.writable, false)
                }
                Linkage::Internal => module.declare_anonymous_data(global.writable, false),
            }
            .map_err(link_error)?;
            symbols.insert(global.name.clone(), LinkedName::Data(id));
        }

        for name in unit.external_references() {
            if unit.references_data(&name) {
                let id = module
                    .declare_data(&name, ModuleLinkage::Import, false, false)
                    .map_err(link_error)?;
                symbols.insert(name, LinkedName::Data(id));
            } else {
                let signature = unit
                    .extern_functions
                    .get(&name)
                    .ok_or_else(|| JitError::Link(format!("'{}' is referenced but never declared", name)))?;
                let sig = native_signature(signature, &*isa).map_err(|m| JitError::compile(&name, m))?;
                let id = module
                    .declare_function(&name, ModuleLinkage::Import, &sig)
                    .map_err(link_error)?;
                symbols.insert(name, LinkedName::Function(id, sig));
            }
        }

        Ok(symbols)
    }

    /// Bind an external name to a resident address
    pub fn bind_external(&self, name: &str, address: u64) {
        self.externals.write().insert(name.to_string(), address);
    }

    /// Define compiled code and the unit's global data
    pub fn define_unit(
        &mut self,
        unit: &CompilationUnit,
        symbols: &UnitSymbols,
        functions: &[CompiledFunction],
    ) -> JitResult<()> {
        let module = self.module()?;
        for compiled in functions {
            module
                .define_function_bytes(
                    compiled.id,
                    &compiled.func,
                    compiled.alignment,
                    &compiled.bytes,
                    &compiled.relocs,
                )
                .map_err(link_error)?;
        }

        for global in &unit.globals {
            let Some(LinkedName::Data(id)) = symbols.get(&global.name) else {
                return Err(JitError::Link(format!("global '{}' was not declared", global.name)));
            };
            let mut desc = DataDescription::new();
            desc.set_align(global.align.max(1));
            match &global.init {
                Some(bytes) => desc.define(bytes.clone().into_boxed_slice()),
                None => desc.define_zeroinit(global.size as usize),
            }
            module.define_data(*id, &desc).map_err(link_error)?;
        }
        Ok(())
    }

    /// Apply relocations and make everything defined so far executable
    pub fn finalize(&mut self) -> JitResult<()> {
        self.module()?.finalize_definitions().map_err(link_error)
    }

    /// Resident address of a finalized definition
    pub fn address_of(&self, symbols: &UnitSymbols, name: &str) -> Option<u64> {
        let module = &self.module.as_ref()?.0;
        match symbols.get(name)? {
            LinkedName::Function(id, _) => Some(module.get_finalized_function(*id) as usize as u64),
            LinkedName::Data(id) => Some(module.get_finalized_data(*id).0 as usize as u64),
        }
    }
}

impl Drop for ObjectLinkingLayer {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            debug!("releasing JIT memory");
            // SAFETY: the engine owning this layer is being dropped, so no
            // lookup can hand out further addresses into this memory.
            unsafe {
                module.0.free_memory();
            }
        }
    }
}

fn link_error(e: ModuleError) -> JitError {
    JitError::Link(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_layer::ConcurrentIrCompiler;
    use jit_ir::{Builder, Context, Function, GlobalData, Signature, Type};

    fn answer_unit(ctx: &Context) -> CompilationUnit {
        let mut unit = CompilationUnit::new("answer", ctx);
        let mut f = Function::new("answer", Signature::new(vec![], Some(Type::I64)), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            let v = b.iconst(Type::I64, 42);
            b.ret(Some(v));
        }
        unit.add_function(f);
        unit.define_global(GlobalData::constant("table", vec![1, 2, 3, 4], 4));
        unit
    }

    #[test]
    fn test_define_and_finalize() {
        let mut layer = ObjectLinkingLayer::new(&EngineConfig::baseline()).unwrap();
        let compiler = ConcurrentIrCompiler::new(layer.isa(), false);
        let ctx = Context::new();
        let unit = answer_unit(&ctx);

        let symbols = layer.declare_unit(&unit).unwrap();
        let compiled = compiler.compile_unit(&unit, &symbols).unwrap();
        layer.define_unit(&unit, &symbols, &compiled).unwrap();
        layer.finalize().unwrap();

        let code = layer.address_of(&symbols, "answer").unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(code as usize) };
        assert_eq!(f(), 42);

        let data = layer.address_of(&symbols, "table").unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(data as usize as *const u8, 4) };
        assert_eq!(bytes, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_undeclared_external_is_link_error() {
        let mut layer = ObjectLinkingLayer::new(&EngineConfig::baseline()).unwrap();
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("u", &ctx);
        let mut f = Function::new("f", Signature::default(), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            b.call("nowhere", None, &[]);
            b.ret(None);
        }
        unit.add_function(f);
        assert!(matches!(layer.declare_unit(&unit), Err(JitError::Link(_))));
    }
}

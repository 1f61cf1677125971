//! Engine facade
//!
//! [`JitEngine`] is the public surface: it checks units against the host
//! data layout and the shared context, hands them to the execution session
//! and turns resolved addresses into typed native functions.

use std::path::PathBuf;
use std::sync::Arc;

use core_types::{DataLayout, EvaluatedSymbol, JitError, JitResult, SymbolFlags, TargetDescription};
use jit_ir::{CompilationUnit, Context};
use tracing::debug;

use crate::compile_layer::ConcurrentIrCompiler;
use crate::config::EngineConfig;
use crate::debug::{DebugRegistry, JitEventListener, PerfMapListener};
use crate::gdb::GdbRegistrationListener;
use crate::link_layer::ObjectLinkingLayer;
use crate::mangle::{MangleAndInterner, SymbolName, SymbolStringPool};
use crate::resolver::{DefinitionGenerator, HostProcessResolver};
use crate::session::{ExecutionSession, SessionParts, SessionStats};
use crate::transform::{IrTransform, JitOptimizer};

/// A native function pointer type that can be produced from a raw address.
///
/// # Safety
///
/// Implementors must be plain function pointer types, so that any non-null
/// address can be reinterpreted as one.
pub unsafe trait NativeSignature: Copy {
    /// Reinterpret `address` as this function type
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of a function whose native
    /// signature and calling convention match `Self`.
    unsafe fn from_address(address: u64) -> Self;
}

macro_rules! native_signature {
    ($($arg:ident),*) => {
        unsafe impl<R, $($arg),*> NativeSignature for extern "C" fn($($arg),*) -> R {
            unsafe fn from_address(address: u64) -> Self {
                std::mem::transmute::<usize, Self>(address as usize)
            }
        }
    };
}

native_signature!();
native_signature!(A1);
native_signature!(A1, A2);
native_signature!(A1, A2, A3);
native_signature!(A1, A2, A3, A4);
native_signature!(A1, A2, A3, A4, A5);
native_signature!(A1, A2, A3, A4, A5, A6);

/// Configures and creates a [`JitEngine`].
pub struct JitEngineBuilder {
    config: EngineConfig,
    transform: Option<Box<dyn IrTransform>>,
    listeners: Vec<Arc<dyn JitEventListener>>,
    libraries: Vec<PathBuf>,
}

impl JitEngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            transform: None,
            listeners: Vec::new(),
            libraries: Vec::new(),
        }
    }

    /// Engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`JitOptimizer`] pipeline
    pub fn transform(mut self, transform: impl IrTransform + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Also notify `listener` about linked code
    pub fn listener(mut self, listener: Arc<dyn JitEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Also search the shared library at `path` for external symbols
    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.libraries.push(path.into());
        self
    }

    /// Detect the host target and create the engine
    pub fn build(self) -> JitResult<JitEngine> {
        let target = TargetDescription::detect_host()?;
        let layout = target.data_layout;
        let mangle = MangleAndInterner::new(SymbolStringPool::new(), &layout);

        let mut resolver = HostProcessResolver::for_current_process(mangle.prefix());
        for path in &self.libraries {
            resolver = resolver.with_library(path)?;
        }
        let generators = vec![Box::new(resolver) as Box<dyn DefinitionGenerator>];

        let linker = ObjectLinkingLayer::new(&self.config)?;
        let compiler = ConcurrentIrCompiler::new(linker.isa(), self.config.concurrent_compile);

        let debug = Arc::new(DebugRegistry::new());
        let mut listeners = vec![debug.clone() as Arc<dyn JitEventListener>];
        if let Some(gdb) = GdbRegistrationListener::for_target(&target) {
            listeners.push(Arc::new(gdb));
        }
        if self.config.perf_map {
            let perf = PerfMapListener::for_current_process()
                .map_err(|e| JitError::Link(format!("failed to open perf map: {}", e)))?;
            listeners.push(Arc::new(perf));
        }
        listeners.extend(self.listeners);

        let transform = self
            .transform
            .unwrap_or_else(|| Box::new(JitOptimizer::new(self.config.opt_level)) as Box<dyn IrTransform>);

        debug!(host = %target, opt_level = self.config.opt_level, "JIT engine created");

        let session = ExecutionSession::new(SessionParts {
            mangle,
            layout,
            transform,
            compiler,
            linker,
            generators,
            listeners,
        });

        Ok(JitEngine {
            target,
            context: Context::new(),
            session,
            debug,
        })
    }
}

/// An in-process lazy JIT.
///
/// # Examples
///
/// ```
/// use jit_compiler::JitEngine;
/// use jit_ir::{Builder, CompilationUnit, Function, Linkage, Signature, Type};
///
/// let engine = JitEngine::create().unwrap();
/// let mut unit = CompilationUnit::new("demo", engine.context());
///
/// let sig = Signature::new(vec![Type::I32, Type::I32, Type::I32], Some(Type::I32));
/// let mut func = Function::new("mul_add", sig, Linkage::External);
/// let mut b = Builder::new(&mut func);
/// let entry = b.create_block("entry");
/// b.switch_to_block(entry);
/// let (x, y, z) = (b.param(0), b.param(1), b.param(2));
/// let product = b.mul(x, y);
/// let sum = b.add(product, z);
/// b.ret(Some(sum));
/// unit.add_function(func);
///
/// engine.add_module(unit).unwrap();
/// let mul_add = unsafe {
///     engine
///         .get_function::<extern "C" fn(i32, i32, i32) -> i32>("mul_add")
///         .unwrap()
/// };
/// assert_eq!(mul_add(23, 80, 90), 1930);
/// ```
pub struct JitEngine {
    target: TargetDescription,
    context: Context,
    session: ExecutionSession,
    debug: Arc<DebugRegistry>,
}

impl JitEngine {
    /// Engine for the host with default configuration
    pub fn create() -> JitResult<Self> {
        Self::builder().build()
    }

    /// Start configuring an engine
    pub fn builder() -> JitEngineBuilder {
        JitEngineBuilder::new()
    }

    /// Context every unit must be built against
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The engine's data layout
    pub fn data_layout(&self) -> &DataLayout {
        self.session.data_layout()
    }

    /// The host target
    pub fn target(&self) -> &TargetDescription {
        &self.target
    }

    /// Submit `unit` for lazy materialization.
    ///
    /// A unit without a data layout adopts the engine's. Nothing is
    /// compiled until one of the unit's symbols is looked up.
    pub fn add_module(&self, mut unit: CompilationUnit) -> JitResult<()> {
        if !unit.context().same_as(&self.context) {
            return Err(JitError::ContextMismatch {
                unit: unit.name().to_string(),
            });
        }

        let expected = self.session.data_layout();
        match unit.data_layout() {
            None => unit.set_data_layout(*expected),
            Some(found) if found == expected => {}
            Some(found) => {
                return Err(JitError::DataLayoutMismatch {
                    unit: unit.name().to_string(),
                    expected: expected.to_string(),
                    found: found.to_string(),
                })
            }
        }

        self.session.add_unit(unit).map(|_| ())
    }

    /// Resolve `name`, compiling its unit on first use
    pub fn lookup(&self, name: &str) -> JitResult<EvaluatedSymbol> {
        self.session.lookup(name)
    }

    /// Resident address of `name`
    pub fn lookup_symbol_address(&self, name: &str) -> JitResult<u64> {
        self.lookup(name).map(|symbol| symbol.address)
    }

    /// Look up `name` as a native function of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must match the native signature of the function bound to `name`.
    pub unsafe fn get_function<F: NativeSignature>(&self, name: &str) -> JitResult<F> {
        let address = self.lookup_symbol_address(name)?;
        Ok(F::from_address(address))
    }

    /// Bind `name` to a host address, bypassing compilation
    pub fn define_absolute(&self, name: &str, address: u64, flags: SymbolFlags) -> JitResult<()> {
        self.session
            .define_absolute(name, EvaluatedSymbol::new(address, flags | SymbolFlags::ABSOLUTE))
    }

    /// Interned mangled form of `name`
    pub fn mangle(&self, name: &str) -> SymbolName {
        self.session.mangler().mangle(name)
    }

    /// Mangled form of `name` as text
    pub fn mangled_name(&self, name: &str) -> String {
        let mangler = self.session.mangler();
        mangler.pool().resolve(mangler.mangle(name)).to_string()
    }

    /// JIT function containing `address`, with the offset into it
    pub fn symbolize(&self, address: u64) -> Option<(String, u64)> {
        self.debug.symbolize(address)
    }

    /// Activity counters
    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }
}

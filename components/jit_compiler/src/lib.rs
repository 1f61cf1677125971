//! In-process lazy JIT engine
//!
//! This crate provides:
//! - [`JitEngine`]: add compilation units, look up symbols, get typed functions
//! - Execution session: lazy, at-most-once materialization with blocking lookups
//! - Transform stage: simplification, inlining and coroutine lowering
//! - Compile layer: IR to machine code through Cranelift, optionally in parallel
//! - Link layer: executable memory, relocation and debugger/profiler hooks
//!   (GDB JIT interface, `perf` map files)
//! - Mangling and host-process symbol resolution
//!
//! # Example
//!
//! ```
//! use jit_compiler::{EngineConfig, JitEngine};
//! use core_types::{JitError, SymbolFlags};
//!
//! let engine = JitEngine::builder()
//!     .config(EngineConfig::baseline())
//!     .build()
//!     .unwrap();
//!
//! engine.define_absolute("host_value", 0x1000, SymbolFlags::EXPORTED).unwrap();
//! assert_eq!(engine.lookup_symbol_address("host_value").unwrap(), 0x1000);
//!
//! let missing = engine.lookup_symbol_address("never_defined_anywhere");
//! assert!(matches!(missing, Err(JitError::SymbolNotFound(_))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compile_layer;
pub mod config;
pub mod debug;
pub mod dylib;
pub mod engine;
pub mod gdb;
pub mod link_layer;
pub mod lower;
pub mod mangle;
pub mod resolver;
pub mod session;
pub mod transform;

// Re-export main types at crate root
pub use compile_layer::{CompiledFunction, ConcurrentIrCompiler};
pub use config::EngineConfig;
pub use debug::{DebugRegistry, JitEventListener, LoadedFunction, LoadedGlobal, LoadedObject, PerfMapListener};
pub use dylib::{JitDylib, SymbolEntry, UnitId};
pub use engine::{JitEngine, JitEngineBuilder, NativeSignature};
pub use gdb::{registered_symbols, GdbRegistrationListener};
pub use link_layer::ObjectLinkingLayer;
pub use mangle::{MangleAndInterner, SymbolName, SymbolStringPool};
pub use resolver::{DefinitionGenerator, HostProcessResolver};
pub use session::{ExecutionSession, SessionParts, SessionStats};
pub use transform::{IrTransform, JitOptimizer};

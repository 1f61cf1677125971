//! Intermediate representation accepted by the JIT engine.
//!
//! This crate provides:
//! - [`Context`]: shared struct-type and metadata definitions
//! - [`Function`] / [`Builder`]: SSA functions with block parameters
//! - [`CompilationUnit`]: functions, globals and external declarations
//!   together with an optional [`core_types::DataLayout`]
//! - A verifier and a textual printer
//!
//! # Example
//!
//! ```
//! use jit_ir::{Builder, CompilationUnit, Context, Function, Linkage, Signature, Type};
//!
//! let ctx = Context::new();
//! let mut unit = CompilationUnit::new("demo", &ctx);
//!
//! let sig = Signature::new(vec![Type::I32, Type::I32, Type::I32], Some(Type::I32));
//! let mut func = Function::new("mul_add", sig, Linkage::External);
//! let mut b = Builder::new(&mut func);
//! let entry = b.create_block("entry");
//! b.switch_to_block(entry);
//! let (x, y, z) = (b.param(0), b.param(1), b.param(2));
//! let tmp = b.mul(x, y);
//! let tmp2 = b.add(tmp, z);
//! b.ret(Some(tmp2));
//!
//! unit.add_function(func);
//! assert!(unit.verify().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod builder;
pub mod context;
mod display;
pub mod function;
pub mod instruction;
pub mod types;
pub mod unit;
pub mod verifier;

pub use builder::Builder;
pub use context::{align_to, Context, StructType};
pub use function::{BlockData, Function, Linkage, ValueData, ValueDef};
pub use instruction::{
    BinaryOp, Block, BlockCall, CastOp, CoroOp, Inst, InstKind, IntPredicate, Terminator, Value,
};
pub use types::{Signature, StructId, Type};
pub use unit::{CompilationUnit, GlobalData};
pub use verifier::{Location, VerifyError, VerifyResult};

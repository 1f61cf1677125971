//! Shared vocabulary types for the JIT engine.
//!
//! This crate provides the types every other component agrees on:
//! the error taxonomy, data layouts, the host target description and
//! resolved symbol values.
//!
//! # Overview
//!
//! - [`JitError`] - Engine errors
//! - [`ErrorKind`] - Flat error classification
//! - [`DataLayout`] - Pointer size, endianness, alignment and mangling rules
//! - [`TargetDescription`] - Host triple with its default layout
//! - [`EvaluatedSymbol`] - A symbol bound to a native address
//!
//! # Examples
//!
//! ```
//! use core_types::{DataLayout, JitError, ErrorKind};
//!
//! let layout: DataLayout = "e-m:e-p:64:64-i64:64-S128".parse().unwrap();
//! assert_eq!(layout.global_prefix(), None);
//!
//! let error = JitError::DuplicateSymbol("host_cb".to_string());
//! assert_eq!(error.kind(), ErrorKind::DuplicateSymbol);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod layout;
mod symbol;

pub use error::{ErrorKind, JitError, JitResult};
pub use layout::{DataLayout, Endianness, Mangling, TargetDescription};
pub use symbol::{EvaluatedSymbol, SymbolFlags};

pub use target_lexicon::{Architecture, Triple};

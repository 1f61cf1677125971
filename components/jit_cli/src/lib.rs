//! JIT demo host library
//!
//! Provides the sample unit producers, the [`Runner`] that drives them
//! through a [`jit_compiler::JitEngine`], and the CLI definition.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runner;
pub mod samples;

pub use cli::{Cli, Command};
pub use error::{CliError, CliResult};
pub use runner::{CoroutineTrace, Runner};

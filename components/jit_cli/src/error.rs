//! Error types for the CLI

use core_types::JitError;
use jit_ir::VerifyResult;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error
    #[error("JIT error: {0}")]
    Jit(#[from] JitError),

    /// A sample unit failed verification
    #[error("Unit '{unit}' failed verification:\n{report}")]
    Verify {
        /// Unit name
        unit: String,
        /// Verifier report
        report: String,
    },

    /// Bad command line input
    #[error("Invalid arguments: {0}")]
    Usage(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Jit(_) => 1,
            CliError::Verify { .. } => 3,
            CliError::Usage(_) => 2,
        }
    }

    pub(crate) fn verify(unit: &str, result: VerifyResult) -> CliResult<()> {
        if result.is_ok() {
            Ok(())
        } else {
            Err(CliError::Verify {
                unit: unit.to_string(),
                report: result.to_string(),
            })
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

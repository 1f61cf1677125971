//! Engine error types.
//!
//! Every failure the engine reports is a value of [`JitError`]. Errors are
//! local to the operation (or the compilation unit) that produced them; none of
//! them poisons engine-wide state.

use thiserror::Error;

/// The kind of engine error.
///
/// A flat tag for callers that only need to branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host architecture could not be identified
    TargetDetection,
    /// Unit carries a data layout different from the engine's
    DataLayoutMismatch,
    /// Unit was built against another shared context
    ContextMismatch,
    /// Optimization transform rejected the unit
    Transform,
    /// Native code generation failed
    Compile,
    /// Mapping or relocating code failed
    Link,
    /// Symbol is not defined anywhere
    SymbolNotFound,
    /// Symbol is defined but bound to a null address
    NullSymbolAddress,
    /// Symbol name is already bound
    DuplicateSymbol,
}

/// An engine error.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, JitError};
///
/// let err = JitError::SymbolNotFound("mul_add".to_string());
/// assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
/// assert_eq!(err.to_string(), "symbol 'mul_add' not found");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    /// Host target detection failed
    #[error("failed to detect host target: {0}")]
    TargetDetection(String),

    /// Unit data layout differs from the engine's
    #[error("Added modules have incompatible data layouts: unit '{unit}' has '{found}', engine uses '{expected}'")]
    DataLayoutMismatch {
        /// Name of the rejected unit
        unit: String,
        /// The engine's layout
        expected: String,
        /// The unit's layout
        found: String,
    },

    /// Unit was not built against the engine's shared context
    #[error("unit '{unit}' was built against a different context")]
    ContextMismatch {
        /// Name of the rejected unit
        unit: String,
    },

    /// Optimization transform failed
    #[error("transform of unit '{unit}' failed: {message}")]
    Transform {
        /// Name of the unit being transformed
        unit: String,
        /// Failure description
        message: String,
    },

    /// Code generation failed
    #[error("failed to compile '{function}': {message}")]
    Compile {
        /// Function being compiled
        function: String,
        /// Failure description
        message: String,
    },

    /// Linking failed
    #[error("link error: {0}")]
    Link(String),

    /// Symbol could not be found
    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    /// Symbol resolved to a null address
    #[error("'{0}' evaluated to nullptr")]
    NullSymbolAddress(String),

    /// Symbol already defined
    #[error("duplicate definition of symbol '{0}'")]
    DuplicateSymbol(String),
}

impl JitError {
    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            JitError::TargetDetection(_) => ErrorKind::TargetDetection,
            JitError::DataLayoutMismatch { .. } => ErrorKind::DataLayoutMismatch,
            JitError::ContextMismatch { .. } => ErrorKind::ContextMismatch,
            JitError::Transform { .. } => ErrorKind::Transform,
            JitError::Compile { .. } => ErrorKind::Compile,
            JitError::Link(_) => ErrorKind::Link,
            JitError::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            JitError::NullSymbolAddress(_) => ErrorKind::NullSymbolAddress,
            JitError::DuplicateSymbol(_) => ErrorKind::DuplicateSymbol,
        }
    }

    /// Shorthand for a transform failure
    pub fn transform(unit: impl Into<String>, message: impl Into<String>) -> Self {
        JitError::Transform {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a code generation failure
    pub fn compile(function: impl Into<String>, message: impl ToString) -> Self {
        JitError::Compile {
            function: function.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias used throughout the engine
pub type JitResult<T> = Result<T, JitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_address_message() {
        let err = JitError::NullSymbolAddress("f".to_string());
        assert_eq!(err.to_string(), "'f' evaluated to nullptr");
    }

    #[test]
    fn test_layout_mismatch_message() {
        let err = JitError::DataLayoutMismatch {
            unit: "b".to_string(),
            expected: "e-p:64:64".to_string(),
            found: "E-p:32:32".to_string(),
        };
        assert!(err.to_string().starts_with("Added modules have incompatible data layouts"));
        assert_eq!(err.kind(), ErrorKind::DataLayoutMismatch);
    }

    #[test]
    fn test_error_clone_eq() {
        let err = JitError::transform("u", "bad");
        assert_eq!(err.clone(), err);
    }
}

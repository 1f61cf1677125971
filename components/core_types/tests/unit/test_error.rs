//! Unit tests for JitError and ErrorKind

use core_types::{ErrorKind, JitError};

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_kind_of_every_variant() {
        let cases = vec![
            (JitError::TargetDetection("x".into()), ErrorKind::TargetDetection),
            (
                JitError::DataLayoutMismatch {
                    unit: "u".into(),
                    expected: "e".into(),
                    found: "E".into(),
                },
                ErrorKind::DataLayoutMismatch,
            ),
            (JitError::ContextMismatch { unit: "u".into() }, ErrorKind::ContextMismatch),
            (JitError::transform("u", "m"), ErrorKind::Transform),
            (JitError::compile("f", "m"), ErrorKind::Compile),
            (JitError::Link("m".into()), ErrorKind::Link),
            (JitError::SymbolNotFound("s".into()), ErrorKind::SymbolNotFound),
            (JitError::NullSymbolAddress("s".into()), ErrorKind::NullSymbolAddress),
            (JitError::DuplicateSymbol("s".into()), ErrorKind::DuplicateSymbol),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }
}

#[cfg(test)]
mod error_display_tests {
    use super::*;

    #[test]
    fn test_symbol_not_found_display() {
        let err = JitError::SymbolNotFound("nope".to_string());
        assert_eq!(err.to_string(), "symbol 'nope' not found");
    }

    #[test]
    fn test_transform_display_names_unit() {
        let err = JitError::transform("coro", "coro.begin outside entry block");
        assert_eq!(
            err.to_string(),
            "transform of unit 'coro' failed: coro.begin outside entry block"
        );
    }

    #[test]
    fn test_compile_display_names_function() {
        let err = JitError::compile("mul_add", "verifier errors");
        assert!(err.to_string().contains("mul_add"));
    }

    #[test]
    fn test_error_is_std_error() {
        fn takes_error(_: &dyn std::error::Error) {}
        takes_error(&JitError::Link("relocation overflow".to_string()));
    }
}

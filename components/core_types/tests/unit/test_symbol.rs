//! Unit tests for SymbolFlags and EvaluatedSymbol

use core_types::{EvaluatedSymbol, SymbolFlags};

#[cfg(test)]
mod symbol_tests {
    use super::*;

    #[test]
    fn test_null_symbol() {
        let sym = EvaluatedSymbol::new(0, SymbolFlags::EXPORTED);
        assert!(sym.is_null());
    }

    #[test]
    fn test_flag_bits_are_distinct() {
        let all = SymbolFlags::EXPORTED
            | SymbolFlags::ABSOLUTE
            | SymbolFlags::WEAK
            | SymbolFlags::CALLABLE;
        assert_eq!(all.bits().count_ones(), 4);
    }

    #[test]
    fn test_contains_none() {
        assert!(SymbolFlags::CALLABLE.contains(SymbolFlags::NONE));
    }
}

//! Symbol flags and resolved symbol values.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Flag set attached to a symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SymbolFlags(u8);

impl SymbolFlags {
    /// No flags
    pub const NONE: SymbolFlags = SymbolFlags(0);
    /// Visible outside the defining unit
    pub const EXPORTED: SymbolFlags = SymbolFlags(1);
    /// Address is fixed and not relocatable
    pub const ABSOLUTE: SymbolFlags = SymbolFlags(1 << 1);
    /// May be overridden by a strong definition
    pub const WEAK: SymbolFlags = SymbolFlags(1 << 2);
    /// Address is a function entry point
    pub const CALLABLE: SymbolFlags = SymbolFlags(1 << 3);

    /// Raw bits
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every flag in `other` is set
    pub fn contains(self, other: SymbolFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SymbolFlags {
    type Output = SymbolFlags;

    fn bitor(self, rhs: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SymbolFlags {
    fn bitor_assign(&mut self, rhs: SymbolFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SymbolFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (SymbolFlags::EXPORTED, "exported"),
            (SymbolFlags::ABSOLUTE, "absolute"),
            (SymbolFlags::WEAK, "weak"),
            (SymbolFlags::CALLABLE, "callable"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// A symbol bound to a native address.
///
/// # Examples
///
/// ```
/// use core_types::{EvaluatedSymbol, SymbolFlags};
///
/// let sym = EvaluatedSymbol::new(0x1000, SymbolFlags::EXPORTED | SymbolFlags::CALLABLE);
/// assert!(sym.flags.contains(SymbolFlags::CALLABLE));
/// assert!(!sym.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvaluatedSymbol {
    /// Resident address
    pub address: u64,
    /// Symbol flags
    pub flags: SymbolFlags,
}

impl EvaluatedSymbol {
    /// Create an evaluated symbol
    pub fn new(address: u64, flags: SymbolFlags) -> Self {
        Self { address, flags }
    }

    /// True if the address is null
    pub fn is_null(&self) -> bool {
        self.address == 0
    }
}

//! The main symbol namespace.

use std::collections::HashMap;

use core_types::{EvaluatedSymbol, JitError, JitResult};

use crate::mangle::SymbolName;

/// Index of a compilation unit inside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) usize);

impl UnitId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0
    }
}

/// State of one symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolEntry {
    /// Bound to a resident address
    Materialized(EvaluatedSymbol),
    /// Defined by a unit that has not been linked yet
    Lazy(UnitId),
}

/// A symbol namespace. Entries are only ever added or upgraded from
/// [`SymbolEntry::Lazy`] to [`SymbolEntry::Materialized`]; nothing is removed.
#[derive(Debug, Default)]
pub struct JitDylib {
    name: String,
    symbols: HashMap<SymbolName, SymbolEntry>,
}

impl JitDylib {
    /// Create an empty namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Namespace name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an entry
    pub fn get(&self, name: SymbolName) -> Option<SymbolEntry> {
        self.symbols.get(&name).copied()
    }

    /// True if `name` has any entry
    pub fn contains(&self, name: SymbolName) -> bool {
        self.symbols.contains_key(&name)
    }

    /// Add a new entry; `display` names the symbol in the error
    pub fn define(&mut self, name: SymbolName, entry: SymbolEntry, display: &str) -> JitResult<()> {
        if self.symbols.contains_key(&name) {
            return Err(JitError::DuplicateSymbol(display.to_string()));
        }
        self.symbols.insert(name, entry);
        Ok(())
    }

    /// Bind a resident address, replacing a lazy entry
    pub fn publish(&mut self, name: SymbolName, symbol: EvaluatedSymbol) {
        self.symbols.insert(name, SymbolEntry::Materialized(symbol));
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

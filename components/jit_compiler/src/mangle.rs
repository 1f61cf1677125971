//! Symbol mangling and interning.
//!
//! Human-readable names are turned into the form the host's linking
//! conventions expect (a leading `_` on Mach-O) and interned once, so every
//! later lookup compares small integer keys.

use std::fmt;
use std::sync::Arc;

use core_types::DataLayout;
use lasso::{Spur, ThreadedRodeo};

/// Interned, mangled symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolName(Spur);

/// Thread-safe pool of interned symbol strings.
#[derive(Debug, Clone, Default)]
pub struct SymbolStringPool {
    rodeo: Arc<ThreadedRodeo>,
}

impl SymbolStringPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string
    pub fn intern(&self, s: &str) -> SymbolName {
        SymbolName(self.rodeo.get_or_intern(s))
    }

    /// The string behind an interned name
    pub fn resolve(&self, name: SymbolName) -> &str {
        self.rodeo.resolve(&name.0)
    }

    /// Number of distinct strings interned so far
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// True if nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

/// Mangles names per the engine's data layout and interns the result.
///
/// # Examples
///
/// ```
/// use core_types::DataLayout;
/// use jit_compiler::{MangleAndInterner, SymbolStringPool};
///
/// let layout: DataLayout = "e-m:o-p:64:64".parse().unwrap();
/// let mangle = MangleAndInterner::new(SymbolStringPool::new(), &layout);
/// let name = mangle.mangle("mul_add");
/// assert_eq!(mangle.pool().resolve(name), "_mul_add");
/// assert_eq!(mangle.demangle(name), "mul_add");
/// ```
#[derive(Debug, Clone)]
pub struct MangleAndInterner {
    pool: SymbolStringPool,
    prefix: Option<char>,
}

impl MangleAndInterner {
    /// Create a mangler for `layout`
    pub fn new(pool: SymbolStringPool, layout: &DataLayout) -> Self {
        Self {
            pool,
            prefix: layout.global_prefix(),
        }
    }

    /// Mangle and intern `name`
    pub fn mangle(&self, name: &str) -> SymbolName {
        match self.prefix {
            Some(prefix) => {
                let mut mangled = String::with_capacity(name.len() + 1);
                mangled.push(prefix);
                mangled.push_str(name);
                self.pool.intern(&mangled)
            }
            None => self.pool.intern(name),
        }
    }

    /// The unmangled form of an interned name
    pub fn demangle(&self, name: SymbolName) -> &str {
        let mangled = self.pool.resolve(name);
        match self.prefix {
            Some(prefix) => mangled.strip_prefix(prefix).unwrap_or(mangled),
            None => mangled,
        }
    }

    /// Global prefix in use
    pub fn prefix(&self) -> Option<char> {
        self.prefix
    }

    /// Underlying string pool
    pub fn pool(&self) -> &SymbolStringPool {
        &self.pool
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let layout = DataLayout::default();
        let mangle = MangleAndInterner::new(SymbolStringPool::new(), &layout);
        let a = mangle.mangle("f");
        let b = mangle.mangle("f");
        let c = mangle.mangle("g");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mangle.pool().len(), 2);
    }

    #[test]
    fn test_elf_has_no_prefix() {
        let layout: DataLayout = "e-m:e-p:64:64".parse().unwrap();
        let mangle = MangleAndInterner::new(SymbolStringPool::new(), &layout);
        let name = mangle.mangle("print");
        assert_eq!(mangle.pool().resolve(name), "print");
        assert_eq!(mangle.prefix(), None);
    }

    #[test]
    fn test_pool_shared_across_threads() {
        let layout = DataLayout::default();
        let mangle = MangleAndInterner::new(SymbolStringPool::new(), &layout);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = mangle.clone();
                std::thread::spawn(move || m.mangle("shared"))
            })
            .collect();
        let names: Vec<SymbolName> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(names.windows(2).all(|w| w[0] == w[1]));
    }
}

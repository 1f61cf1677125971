//! Definition generators consulted for names absent from the main dylib.

use std::ffi::OsStr;

use core_types::{EvaluatedSymbol, JitError, JitResult, SymbolFlags};
use libloading::Library;
use tracing::debug;

/// Supplies definitions for names the main dylib does not know.
///
/// Results are cached by the session, so a generator is asked about a given
/// name at most once per successful resolution.
pub trait DefinitionGenerator: Send + Sync {
    /// Resolve a mangled name
    fn generate(&self, mangled: &str) -> Option<EvaluatedSymbol>;
}

/// Searches symbols already resident in the host process.
///
/// The running executable and every library it has loaded are searched
/// first, then any extra libraries registered with
/// [`HostProcessResolver::with_library`].
pub struct HostProcessResolver {
    prefix: Option<char>,
    process: Option<Library>,
    libraries: Vec<Library>,
}

impl HostProcessResolver {
    /// Resolver for the current process; `prefix` is stripped before searching
    pub fn for_current_process(prefix: Option<char>) -> Self {
        Self {
            prefix,
            process: this_process(),
            libraries: Vec::new(),
        }
    }

    /// Also search the shared library at `path`
    pub fn with_library(mut self, path: impl AsRef<OsStr>) -> JitResult<Self> {
        let path = path.as_ref();
        // SAFETY: loading a library runs its initializers; callers opt in by path.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            JitError::Link(format!("failed to load '{}': {}", path.to_string_lossy(), e))
        })?;
        self.libraries.push(lib);
        Ok(self)
    }

    fn search(lib: &Library, name: &str) -> Option<u64> {
        // SAFETY: the symbol is only read as an address, never called here.
        let sym = unsafe { lib.get::<*const u8>(name.as_bytes()) }.ok()?;
        Some(*sym as u64)
    }
}

impl DefinitionGenerator for HostProcessResolver {
    fn generate(&self, mangled: &str) -> Option<EvaluatedSymbol> {
        let name = match self.prefix {
            Some(prefix) => mangled.strip_prefix(prefix)?,
            None => mangled,
        };

        let address = self
            .process
            .iter()
            .chain(self.libraries.iter())
            .find_map(|lib| Self::search(lib, name))?;

        debug!(symbol = name, address = format_args!("{:#x}", address), "resolved from host process");
        Some(EvaluatedSymbol::new(
            address,
            SymbolFlags::EXPORTED | SymbolFlags::CALLABLE,
        ))
    }
}

#[cfg(unix)]
fn this_process() -> Option<Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn this_process() -> Option<Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn this_process() -> Option<Library> {
    None
}

//! Debugger and profiler registration
//!
//! After every successful link the session reports the new code to each
//! registered [`JitEventListener`]. [`DebugRegistry`] keeps the address map
//! the engine uses to attribute addresses to JIT functions;
//! [`PerfMapListener`] writes the `perf` map-file format.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// A function placed in executable memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFunction {
    /// Function name
    pub name: String,
    /// Entry address
    pub address: u64,
    /// Code size in bytes
    pub size: u64,
}

/// A global placed in data memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedGlobal {
    /// Global name
    pub name: String,
    /// Address
    pub address: u64,
    /// Size in bytes
    pub size: u64,
}

/// Everything one unit placed in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedObject {
    /// Unit name
    pub unit: String,
    /// Linked functions
    pub functions: Vec<LoadedFunction>,
    /// Linked globals
    pub globals: Vec<LoadedGlobal>,
}

impl LoadedObject {
    /// Total code size in bytes
    pub fn code_size(&self) -> u64 {
        self.functions.iter().map(|f| f.size).sum()
    }
}

/// Receives notifications about newly linked code.
pub trait JitEventListener: Send + Sync {
    /// Called once per linked unit, after relocation and before any of its
    /// symbols are published
    fn notify_object_loaded(&self, object: &LoadedObject);
}

/// Address-to-function map of all linked code.
#[derive(Debug, Default)]
pub struct DebugRegistry {
    objects: RwLock<Vec<LoadedObject>>,
}

impl DebugRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the function containing `address`, with the offset into it
    pub fn symbolize(&self, address: u64) -> Option<(String, u64)> {
        self.objects
            .read()
            .iter()
            .flat_map(|o| o.functions.iter())
            .find(|f| address >= f.address && address < f.address + f.size.max(1))
            .map(|f| (f.name.clone(), address - f.address))
    }

    /// Number of registered objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Snapshot of every registered object
    pub fn objects(&self) -> Vec<LoadedObject> {
        self.objects.read().clone()
    }
}

impl JitEventListener for DebugRegistry {
    fn notify_object_loaded(&self, object: &LoadedObject) {
        debug!(
            unit = object.unit.as_str(),
            functions = object.functions.len(),
            code_size = object.code_size(),
            "registered object"
        );
        self.objects.write().push(object.clone());
    }
}

/// Appends `ADDR SIZE name` lines for every linked function.
///
/// `perf` picks up `/tmp/perf-<pid>.map` to name samples in JIT code.
pub struct PerfMapListener {
    path: PathBuf,
    file: Mutex<File>,
}

impl PerfMapListener {
    /// Map file for the current process
    pub fn for_current_process() -> io::Result<Self> {
        let path = Path::new("/tmp").join(format!("perf-{}.map", std::process::id()));
        Self::with_path(path)
    }

    /// Map file at `path`, appending if it exists
    pub fn with_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Map file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_object(&self, object: &LoadedObject) -> io::Result<()> {
        let mut file = self.file.lock();
        for f in &object.functions {
            writeln!(file, "{:x} {:x} {}", f.address, f.size, f.name)?;
        }
        file.flush()
    }
}

impl JitEventListener for PerfMapListener {
    fn notify_object_loaded(&self, object: &LoadedObject) {
        if let Err(e) = self.write_object(object) {
            warn!(path = %self.path.display(), error = %e, "failed to write perf map");
        }
    }
}

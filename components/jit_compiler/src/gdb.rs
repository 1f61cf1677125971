//! GDB JIT interface
//!
//! Debuggers set a breakpoint on `__jit_debug_register_code` and walk the
//! entry list hanging off `__jit_debug_descriptor` to find in-memory symbol
//! files. [`GdbRegistrationListener`] describes each linked unit with a small
//! ELF image holding one absolute symbol per function and global, and keeps
//! it registered until the listener is dropped together with the code.

use std::ptr::{self, addr_of_mut};

use core_types::{Architecture as HostArchitecture, Endianness as ByteOrder, TargetDescription};
use object::read::{Object as _, ObjectSymbol as _};
use object::write::{Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};
use parking_lot::{const_mutex, Mutex};
use tracing::{debug, warn};

use crate::debug::{JitEventListener, LoadedObject};

const JIT_NOACTION: u32 = 0;
const JIT_REGISTER_FN: u32 = 1;
const JIT_UNREGISTER_FN: u32 = 2;

#[repr(C)]
struct JitCodeEntry {
    next_entry: *mut JitCodeEntry,
    prev_entry: *mut JitCodeEntry,
    symfile_addr: *const u8,
    symfile_size: u64,
}

#[repr(C)]
struct JitDescriptor {
    version: u32,
    action_flag: u32,
    relevant_entry: *mut JitCodeEntry,
    first_entry: *mut JitCodeEntry,
}

#[no_mangle]
#[allow(non_upper_case_globals)]
static mut __jit_debug_descriptor: JitDescriptor = JitDescriptor {
    version: 1,
    action_flag: JIT_NOACTION,
    relevant_entry: ptr::null_mut(),
    first_entry: ptr::null_mut(),
};

#[no_mangle]
#[inline(never)]
extern "C" fn __jit_debug_register_code() {
    // Debugger breakpoint target; must survive optimization.
    std::hint::black_box(());
}

/// Serializes every access to the descriptor and its entries.
static REGISTRATION: Mutex<()> = const_mutex(());

/// A symbol file linked into the descriptor; unlinked on drop.
struct Registration {
    entry: *mut JitCodeEntry,
    _symfile: Box<[u8]>,
}

// SAFETY: `entry` is only dereferenced while holding `REGISTRATION`.
unsafe impl Send for Registration {}

impl Registration {
    fn new(symfile: Box<[u8]>) -> Self {
        let entry = Box::into_raw(Box::new(JitCodeEntry {
            next_entry: ptr::null_mut(),
            prev_entry: ptr::null_mut(),
            symfile_addr: symfile.as_ptr(),
            symfile_size: symfile.len() as u64,
        }));

        let _guard = REGISTRATION.lock();
        // SAFETY: the descriptor and all linked entries are only touched
        // under `REGISTRATION`; `entry` is a fresh allocation.
        unsafe {
            let descriptor = addr_of_mut!(__jit_debug_descriptor);
            let first = (*descriptor).first_entry;
            (*entry).next_entry = first;
            if !first.is_null() {
                (*first).prev_entry = entry;
            }
            (*descriptor).first_entry = entry;
            notify_debugger(descriptor, entry, JIT_REGISTER_FN);
        }

        Self {
            entry,
            _symfile: symfile,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _guard = REGISTRATION.lock();
        // SAFETY: `self.entry` is still linked and was allocated by
        // `Registration::new`; nothing else frees it.
        unsafe {
            let descriptor = addr_of_mut!(__jit_debug_descriptor);
            let (prev, next) = ((*self.entry).prev_entry, (*self.entry).next_entry);
            if prev.is_null() {
                (*descriptor).first_entry = next;
            } else {
                (*prev).next_entry = next;
            }
            if !next.is_null() {
                (*next).prev_entry = prev;
            }
            notify_debugger(descriptor, self.entry, JIT_UNREGISTER_FN);
            drop(Box::from_raw(self.entry));
        }
    }
}

/// # Safety
///
/// Caller holds `REGISTRATION` and `descriptor` points at the descriptor.
unsafe fn notify_debugger(descriptor: *mut JitDescriptor, entry: *mut JitCodeEntry, action: u32) {
    (*descriptor).relevant_entry = entry;
    (*descriptor).action_flag = action;
    __jit_debug_register_code();
    (*descriptor).action_flag = JIT_NOACTION;
    (*descriptor).relevant_entry = ptr::null_mut();
}

/// Names and addresses of every symbol currently published through the
/// debugger interface, read back from the registered symbol files.
pub fn registered_symbols() -> Vec<(String, u64)> {
    let _guard = REGISTRATION.lock();
    let mut symbols = Vec::new();
    // SAFETY: linked entries and their symbol files stay alive while
    // `REGISTRATION` is held.
    unsafe {
        let mut entry = (*addr_of_mut!(__jit_debug_descriptor)).first_entry;
        while !entry.is_null() {
            let bytes = std::slice::from_raw_parts((*entry).symfile_addr, (*entry).symfile_size as usize);
            if let Ok(file) = object::File::parse(bytes) {
                for symbol in file.symbols() {
                    if let Ok(name) = symbol.name() {
                        if !name.is_empty() {
                            symbols.push((name.to_string(), symbol.address()));
                        }
                    }
                }
            }
            entry = (*entry).next_entry;
        }
    }
    symbols
}

/// Publishes linked code to GDB and LLDB.
pub struct GdbRegistrationListener {
    architecture: Architecture,
    endianness: Endianness,
    registrations: Mutex<Vec<Registration>>,
}

impl GdbRegistrationListener {
    /// Listener for `target`, or `None` if ELF has no machine type for it
    pub fn for_target(target: &TargetDescription) -> Option<Self> {
        let architecture = match target.triple.architecture {
            HostArchitecture::X86_64 => Architecture::X86_64,
            HostArchitecture::Aarch64(_) => Architecture::Aarch64,
            HostArchitecture::Riscv64(_) => Architecture::Riscv64,
            HostArchitecture::S390x => Architecture::S390x,
            _ => return None,
        };
        let endianness = match target.data_layout.endianness {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        };
        Some(Self {
            architecture,
            endianness,
            registrations: Mutex::new(Vec::new()),
        })
    }

    /// Number of symbol files this listener keeps registered
    pub fn registered(&self) -> usize {
        self.registrations.lock().len()
    }

    fn symbol_file(&self, loaded: &LoadedObject) -> Result<Vec<u8>, object::write::Error> {
        let mut file = object::write::Object::new(BinaryFormat::Elf, self.architecture, self.endianness);
        let functions = loaded.functions.iter().map(|f| (&f.name, f.address, f.size, SymbolKind::Text));
        let globals = loaded.globals.iter().map(|g| (&g.name, g.address, g.size, SymbolKind::Data));
        for (name, address, size, kind) in functions.chain(globals) {
            file.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: address,
                size,
                kind,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Absolute,
                flags: SymbolFlags::None,
            });
        }
        file.write()
    }
}

impl JitEventListener for GdbRegistrationListener {
    fn notify_object_loaded(&self, object: &LoadedObject) {
        match self.symbol_file(object) {
            Ok(bytes) => {
                debug!(
                    unit = object.unit.as_str(),
                    bytes = bytes.len(),
                    "registered symbol file with debugger"
                );
                let registration = Registration::new(bytes.into_boxed_slice());
                self.registrations.lock().push(registration);
            }
            Err(e) => {
                warn!(unit = object.unit.as_str(), error = %e, "failed to build debugger symbol file")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::{LoadedFunction, LoadedGlobal};

    fn object(prefix: &str) -> LoadedObject {
        LoadedObject {
            unit: prefix.to_string(),
            functions: vec![LoadedFunction {
                name: format!("{}_fn", prefix),
                address: 0x7000_1000,
                size: 0x40,
            }],
            globals: vec![LoadedGlobal {
                name: format!("{}_data", prefix),
                address: 0x7000_2000,
                size: 8,
            }],
        }
    }

    #[test]
    fn test_registered_symbols_follow_listener_lifetime() {
        let target = TargetDescription::detect_host().unwrap();
        let listener = GdbRegistrationListener::for_target(&target).unwrap();
        listener.notify_object_loaded(&object("gdb_lifetime"));
        assert_eq!(listener.registered(), 1);

        let symbols = registered_symbols();
        assert!(symbols.contains(&("gdb_lifetime_fn".to_string(), 0x7000_1000)));
        assert!(symbols.contains(&("gdb_lifetime_data".to_string(), 0x7000_2000)));

        drop(listener);
        assert!(!registered_symbols().iter().any(|(name, _)| name.starts_with("gdb_lifetime")));
    }

    #[test]
    fn test_entries_unlink_in_any_order() {
        let target = TargetDescription::detect_host().unwrap();
        let first = GdbRegistrationListener::for_target(&target).unwrap();
        let second = GdbRegistrationListener::for_target(&target).unwrap();
        first.notify_object_loaded(&object("gdb_order_a"));
        second.notify_object_loaded(&object("gdb_order_b"));
        first.notify_object_loaded(&object("gdb_order_c"));

        drop(first);
        let names: Vec<String> = registered_symbols()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with("gdb_order"))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|name| name.starts_with("gdb_order_b")));
        drop(second);
        assert!(!registered_symbols().iter().any(|(name, _)| name.starts_with("gdb_order")));
    }

    #[test]
    fn test_descriptor_version() {
        let _guard = REGISTRATION.lock();
        // SAFETY: read under the registration lock.
        let version = unsafe { (*addr_of_mut!(__jit_debug_descriptor)).version };
        assert_eq!(version, 1);
    }
}

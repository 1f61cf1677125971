//! Compilation units.

use std::collections::{BTreeMap, BTreeSet};

use core_types::DataLayout;

use crate::context::Context;
use crate::function::{Function, Linkage};
use crate::instruction::InstKind;
use crate::types::Signature;
use crate::verifier::{self, VerifyResult};

/// A global variable definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalData {
    /// Symbol name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Alignment in bytes
    pub align: u64,
    /// Initial contents, zero-filled when `None`
    pub init: Option<Vec<u8>>,
    /// Placed in writable memory
    pub writable: bool,
    /// Linkage
    pub linkage: Linkage,
}

impl GlobalData {
    /// A zero-initialized writable global
    pub fn zeroed(name: impl Into<String>, size: u64, align: u64) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            init: None,
            writable: true,
            linkage: Linkage::External,
        }
    }

    /// A read-only global with the given contents
    pub fn constant(name: impl Into<String>, bytes: Vec<u8>, align: u64) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            align,
            init: Some(bytes),
            writable: false,
            linkage: Linkage::External,
        }
    }
}

/// A unit of IR handed to the engine.
///
/// Owned by the producer until submitted, then owned by the engine.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    name: String,
    context: Context,
    data_layout: Option<DataLayout>,
    /// Function definitions
    pub functions: Vec<Function>,
    /// Global variable definitions
    pub globals: Vec<GlobalData>,
    /// Functions referenced but defined elsewhere
    pub extern_functions: BTreeMap<String, Signature>,
    /// Globals referenced but defined elsewhere
    pub extern_globals: BTreeSet<String>,
}

impl CompilationUnit {
    /// Create an empty unit built against `context`
    pub fn new(name: impl Into<String>, context: &Context) -> Self {
        Self {
            name: name.into(),
            context: context.clone(),
            data_layout: None,
            functions: Vec::new(),
            globals: Vec::new(),
            extern_functions: BTreeMap::new(),
            extern_globals: BTreeSet::new(),
        }
    }

    /// Builder-style data layout assignment
    pub fn with_data_layout(mut self, layout: DataLayout) -> Self {
        self.data_layout = Some(layout);
        self
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context this unit was built against
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Explicit data layout, if any
    pub fn data_layout(&self) -> Option<&DataLayout> {
        self.data_layout.as_ref()
    }

    /// Set the data layout
    pub fn set_data_layout(&mut self, layout: DataLayout) {
        self.data_layout = Some(layout);
    }

    /// Add a function definition
    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    /// Declare an external function
    pub fn declare_function(&mut self, name: impl Into<String>, signature: Signature) {
        self.extern_functions.insert(name.into(), signature);
    }

    /// Declare an external global
    pub fn declare_global(&mut self, name: impl Into<String>) {
        self.extern_globals.insert(name.into());
    }

    /// Add a global definition
    pub fn define_global(&mut self, global: GlobalData) {
        self.globals.push(global);
    }

    /// Find a defined function
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Find a defined global
    pub fn global(&self, name: &str) -> Option<&GlobalData> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Signature of a callable symbol, defined or declared
    pub fn callee_signature(&self, name: &str) -> Option<&Signature> {
        self.function(name)
            .map(|f| &f.signature)
            .or_else(|| self.extern_functions.get(name))
    }

    /// True if the unit defines `name` (any linkage)
    pub fn defines(&self, name: &str) -> bool {
        self.function(name).is_some() || self.global(name).is_some()
    }

    /// Names this unit publishes to the engine's namespace
    pub fn exported_symbols(&self) -> Vec<&str> {
        let funcs = self
            .functions
            .iter()
            .filter(|f| f.linkage == Linkage::External)
            .map(|f| f.name.as_str());
        let globals = self
            .globals
            .iter()
            .filter(|g| g.linkage == Linkage::External)
            .map(|g| g.name.as_str());
        funcs.chain(globals).collect()
    }

    /// Names referenced by the body but not defined in this unit
    pub fn external_references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        for func in &self.functions {
            for inst in func.blocks.iter().flat_map(|b| b.insts.iter()) {
                if let Some(name) = inst.kind.symbol_ref() {
                    if !self.defines(name) {
                        refs.insert(name.to_string());
                    }
                }
            }
        }
        refs
    }

    /// True if the external reference `name` is to data rather than code
    pub fn references_data(&self, name: &str) -> bool {
        self.extern_globals.contains(name)
            || self.functions.iter().any(|f| {
                f.blocks
                    .iter()
                    .flat_map(|b| b.insts.iter())
                    .any(|i| matches!(&i.kind, InstKind::GlobalAddr(n) if n == name))
            })
    }

    /// Run the structural verifier
    pub fn verify(&self) -> VerifyResult {
        verifier::verify_unit(self)
    }
}

//! Execution session
//!
//! Owns the main dylib and drives materialization. A unit's symbols stay
//! [`SymbolEntry::Lazy`] until the first lookup of any of them claims the
//! unit. The claiming thread materializes it outside the state lock while
//! other lookups of the same unit block on a condition variable.
//!
//! A claim takes the unit together with every `Added` unit it references,
//! transitively, so mutually referencing units are linked in one batch.
//! References into units another thread is materializing are waited for
//! before linking. Batches only ever wait on batches claimed earlier.
//!
//! Lock order: link layer, then session state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use core_types::{DataLayout, EvaluatedSymbol, JitError, JitResult, SymbolFlags};
use jit_ir::{CompilationUnit, Linkage};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::compile_layer::{CompiledFunction, ConcurrentIrCompiler};
use crate::debug::{JitEventListener, LoadedFunction, LoadedGlobal, LoadedObject};
use crate::dylib::{JitDylib, SymbolEntry, UnitId};
use crate::link_layer::ObjectLinkingLayer;
use crate::lower::UnitSymbols;
use crate::mangle::{MangleAndInterner, SymbolName};
use crate::resolver::DefinitionGenerator;
use crate::transform::IrTransform;

/// Counters describing session activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Units accepted
    pub units_added: usize,
    /// Units linked
    pub units_materialized: usize,
    /// Units whose materialization failed
    pub units_failed: usize,
    /// Functions compiled to machine code
    pub functions_compiled: usize,
}

enum UnitSlot {
    Added(Box<CompilationUnit>),
    Materializing,
    Linked,
    Failed(JitError),
}

struct SessionState {
    dylib: JitDylib,
    units: Vec<UnitSlot>,
    unit_names: Vec<String>,
    stats: SessionStats,
}

/// Where a unit's external reference is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportSource {
    /// Already resident
    Resolved(u64),
    /// Defined by a unit in the same batch
    InBatch(UnitId),
    /// Defined by a unit another thread is materializing
    Pending(UnitId),
}

struct Claim {
    id: UnitId,
    unit: CompilationUnit,
    imports: HashMap<String, ImportSource>,
    error: Option<JitError>,
}

struct Job {
    id: UnitId,
    name: String,
    imports: HashMap<String, ImportSource>,
    unit: JitResult<CompilationUnit>,
    symbols: UnitSymbols,
    compiled: Vec<CompiledFunction>,
}

impl Job {
    fn fail(&mut self, error: JitError) {
        if self.unit.is_ok() {
            self.unit = Err(error);
        }
    }

    fn error(&self) -> Option<&JitError> {
        self.unit.as_ref().err()
    }
}

/// Construction parameters for [`ExecutionSession`].
pub struct SessionParts {
    /// Name mangler over the shared string pool
    pub mangle: MangleAndInterner,
    /// Engine data layout
    pub layout: DataLayout,
    /// Transform applied to every unit
    pub transform: Box<dyn IrTransform>,
    /// Compile layer
    pub compiler: ConcurrentIrCompiler,
    /// Link layer
    pub linker: ObjectLinkingLayer,
    /// Generators consulted for names the dylib lacks
    pub generators: Vec<Box<dyn DefinitionGenerator>>,
    /// Listeners notified after each link
    pub listeners: Vec<Arc<dyn JitEventListener>>,
}

/// Process-wide JIT state.
pub struct ExecutionSession {
    mangle: MangleAndInterner,
    layout: DataLayout,
    transform: Box<dyn IrTransform>,
    compiler: ConcurrentIrCompiler,
    linker: Mutex<ObjectLinkingLayer>,
    generators: Vec<Box<dyn DefinitionGenerator>>,
    listeners: Vec<Arc<dyn JitEventListener>>,
    state: Mutex<SessionState>,
    materialized: Condvar,
}

impl ExecutionSession {
    /// Create a session from its layers
    pub fn new(parts: SessionParts) -> Self {
        Self {
            mangle: parts.mangle,
            layout: parts.layout,
            transform: parts.transform,
            compiler: parts.compiler,
            linker: Mutex::new(parts.linker),
            generators: parts.generators,
            listeners: parts.listeners,
            state: Mutex::new(SessionState {
                dylib: JitDylib::new("main"),
                units: Vec::new(),
                unit_names: Vec::new(),
                stats: SessionStats::default(),
            }),
            materialized: Condvar::new(),
        }
    }

    /// The session's mangler
    pub fn mangler(&self) -> &MangleAndInterner {
        &self.mangle
    }

    /// The session's data layout
    pub fn data_layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> SessionStats {
        self.state.lock().stats
    }

    /// Number of entries in the main dylib
    pub fn symbol_count(&self) -> usize {
        self.state.lock().dylib.len()
    }

    /// Register `unit` for lazy materialization.
    ///
    /// Every external definition becomes a lazy entry. Fails without side
    /// effects if any of them is already bound.
    pub fn add_unit(&self, unit: CompilationUnit) -> JitResult<UnitId> {
        let names: Vec<(SymbolName, String)> = unit
            .exported_symbols()
            .into_iter()
            .map(|n| (self.mangle.mangle(n), n.to_string()))
            .collect();

        let mut state = self.state.lock();
        let mut seen = HashSet::new();
        for (mangled, name) in &names {
            if state.dylib.contains(*mangled) || !seen.insert(*mangled) {
                return Err(JitError::DuplicateSymbol(name.clone()));
            }
        }

        let id = UnitId(state.units.len());
        for (mangled, name) in &names {
            state.dylib.define(*mangled, SymbolEntry::Lazy(id), name)?;
        }
        debug!(
            dylib = state.dylib.name(),
            unit = unit.name(),
            id = id.index(),
            symbols = names.len(),
            "unit added"
        );
        state.unit_names.push(unit.name().to_string());
        state.units.push(UnitSlot::Added(Box::new(unit)));
        state.stats.units_added += 1;
        Ok(id)
    }

    /// Bind `name` to a resident address
    pub fn define_absolute(&self, name: &str, symbol: EvaluatedSymbol) -> JitResult<()> {
        let mangled = self.mangle.mangle(name);
        let mut state = self.state.lock();
        state
            .dylib
            .define(mangled, SymbolEntry::Materialized(symbol), name)?;
        debug!(symbol = name, address = format_args!("{:#x}", symbol.address), "absolute symbol defined");
        Ok(())
    }

    /// Resolve `name`, materializing its unit on first use
    pub fn lookup(&self, name: &str) -> JitResult<EvaluatedSymbol> {
        let mangled = self.mangle.mangle(name);
        let mut state = self.state.lock();
        loop {
            match state.dylib.get(mangled) {
                Some(SymbolEntry::Materialized(symbol)) => return non_null(symbol, name),
                Some(SymbolEntry::Lazy(id)) => match &state.units[id.0] {
                    UnitSlot::Added(_) => {
                        let batch = self.claim(&mut state, id);
                        MutexGuard::unlocked(&mut state, || self.materialize(batch));
                    }
                    UnitSlot::Materializing => self.materialized.wait(&mut state),
                    UnitSlot::Linked => return Err(JitError::SymbolNotFound(name.to_string())),
                    UnitSlot::Failed(error) => return Err(error.clone()),
                },
                None => {
                    return match self.generate(&mut state, mangled) {
                        Some(symbol) => non_null(symbol, name),
                        None => Err(JitError::SymbolNotFound(name.to_string())),
                    }
                }
            }
        }
    }

    /// Ask the generators for `mangled`, caching a hit in the dylib
    fn generate(&self, state: &mut SessionState, mangled: SymbolName) -> Option<EvaluatedSymbol> {
        let text = self.mangle.pool().resolve(mangled);
        let symbol = self.generators.iter().find_map(|g| g.generate(text))?;
        state.dylib.publish(mangled, symbol);
        Some(symbol)
    }

    /// Where the external reference `name` is satisfied, seen from a batch
    fn resolve_import(
        &self,
        state: &mut SessionState,
        name: &str,
        batch: &HashSet<UnitId>,
    ) -> JitResult<ImportSource> {
        let mangled = self.mangle.mangle(name);
        match state.dylib.get(mangled) {
            Some(SymbolEntry::Materialized(symbol)) => Ok(ImportSource::Resolved(non_null(symbol, name)?.address)),
            Some(SymbolEntry::Lazy(dep)) => match &state.units[dep.0] {
                _ if batch.contains(&dep) => Ok(ImportSource::InBatch(dep)),
                UnitSlot::Added(_) => Ok(ImportSource::InBatch(dep)),
                UnitSlot::Materializing => Ok(ImportSource::Pending(dep)),
                UnitSlot::Linked => Err(JitError::SymbolNotFound(name.to_string())),
                UnitSlot::Failed(error) => Err(error.clone()),
            },
            None => match self.generate(state, mangled) {
                Some(symbol) => Ok(ImportSource::Resolved(non_null(symbol, name)?.address)),
                None => Err(JitError::SymbolNotFound(name.to_string())),
            },
        }
    }

    /// Claim `root` and every `Added` unit it reaches through references
    fn claim(&self, state: &mut SessionState, root: UnitId) -> Vec<Claim> {
        let mut batch = HashSet::new();
        let mut queue = VecDeque::from([root]);
        let mut claims = Vec::new();

        while let Some(id) = queue.pop_front() {
            if batch.contains(&id) || !matches!(state.units[id.0], UnitSlot::Added(_)) {
                continue;
            }
            let UnitSlot::Added(unit) = std::mem::replace(&mut state.units[id.0], UnitSlot::Materializing) else {
                continue;
            };
            batch.insert(id);

            let mut imports = HashMap::new();
            let mut error = None;
            for name in unit.external_references() {
                match self.resolve_import(state, &name, &batch) {
                    Ok(source) => {
                        if let ImportSource::InBatch(dep) = source {
                            queue.push_back(dep);
                        }
                        imports.insert(name, source);
                    }
                    Err(e) => {
                        error.get_or_insert(e);
                    }
                }
            }
            claims.push(Claim {
                id,
                unit: *unit,
                imports,
                error,
            });
        }

        debug!(
            root = state.unit_names[root.0].as_str(),
            units = claims.len(),
            "claimed materialization batch"
        );
        claims
    }

    /// Transform, compile and link a claimed batch, then publish the result
    fn materialize(&self, claims: Vec<Claim>) {
        let mut guard = BatchGuard {
            session: self,
            ids: claims.iter().map(|c| c.id).collect(),
        };

        let mut jobs = self.run_stage(claims, |claim| {
            let name = claim.unit.name().to_string();
            let unit = match claim.error {
                Some(error) => Err(error),
                None => self.transform.transform(claim.unit),
            };
            Job {
                id: claim.id,
                name,
                imports: claim.imports,
                unit,
                symbols: UnitSymbols::new(),
                compiled: Vec::new(),
            }
        });
        propagate_failures(&mut jobs);

        {
            let mut linker = self.linker.lock();
            for job in &mut jobs {
                if let Ok(unit) = &job.unit {
                    match linker.declare_unit(unit) {
                        Ok(symbols) => job.symbols = symbols,
                        Err(e) => job.fail(e),
                    }
                }
            }
        }
        propagate_failures(&mut jobs);

        let compiler = &self.compiler;
        jobs = self.run_stage(jobs, |mut job| {
            if let Ok(unit) = &job.unit {
                match compiler.compile_unit(unit, &job.symbols) {
                    Ok(compiled) => job.compiled = compiled,
                    Err(e) => job.fail(e),
                }
            }
            job
        });
        propagate_failures(&mut jobs);

        let addresses = self.await_dependencies(&mut jobs);
        propagate_failures(&mut jobs);

        let objects = self.link(&mut jobs, &addresses);

        for object in &objects {
            for listener in &self.listeners {
                listener.notify_object_loaded(object);
            }
        }

        self.publish(jobs, &objects);
        guard.ids.clear();
    }

    fn run_stage<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Send + Sync,
    {
        if self.compiler.is_concurrent() && items.len() > 1 {
            items.into_par_iter().map(f).collect()
        } else {
            items.into_iter().map(f).collect()
        }
    }

    /// Wait for units other batches are materializing and collect the
    /// addresses of every external reference not satisfied inside the batch
    fn await_dependencies(&self, jobs: &mut [Job]) -> Vec<HashMap<String, u64>> {
        let batch: HashSet<UnitId> = jobs.iter().map(|j| j.id).collect();
        let mut state = self.state.lock();
        let mut addresses = Vec::with_capacity(jobs.len());

        for job in jobs.iter_mut() {
            let mut resolved = HashMap::new();
            let references = match &job.unit {
                Ok(unit) => unit.external_references(),
                Err(_) => {
                    addresses.push(resolved);
                    continue;
                }
            };

            for name in references {
                let source = match job.imports.get(&name) {
                    Some(source) => Ok(*source),
                    None => match self.resolve_import(&mut state, &name, &batch) {
                        Ok(ImportSource::InBatch(dep) | ImportSource::Pending(dep)) if !batch.contains(&dep) => {
                            Err(JitError::Link(format!(
                                "'{}' refers to unit '{}', which is not materialized",
                                name, state.unit_names[dep.0]
                            )))
                        }
                        other => other,
                    },
                };
                let address = match source {
                    Ok(ImportSource::Resolved(address)) => Ok(Some(address)),
                    Ok(ImportSource::InBatch(_)) => Ok(None),
                    Ok(ImportSource::Pending(dep)) => self.wait_for(&mut state, dep, &name).map(Some),
                    Err(e) => Err(e),
                };
                match address {
                    Ok(Some(address)) => {
                        resolved.insert(name, address);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        job.fail(e);
                        break;
                    }
                }
            }
            addresses.push(resolved);
        }
        addresses
    }

    /// Block until unit `dep` leaves `Materializing`, then resolve `name`
    fn wait_for(&self, state: &mut MutexGuard<'_, SessionState>, dep: UnitId, name: &str) -> JitResult<u64> {
        while matches!(state.units[dep.0], UnitSlot::Materializing) {
            trace!(symbol = name, dependency = dep.index(), "waiting for dependency");
            self.materialized.wait(state);
        }
        if let UnitSlot::Failed(error) = &state.units[dep.0] {
            return Err(error.clone());
        }
        match state.dylib.get(self.mangle.mangle(name)) {
            Some(SymbolEntry::Materialized(symbol)) => Ok(non_null(symbol, name)?.address),
            _ => Err(JitError::SymbolNotFound(name.to_string())),
        }
    }

    /// Define and finalize every surviving job; returns one object per job
    /// that linked
    fn link(&self, jobs: &mut [Job], addresses: &[HashMap<String, u64>]) -> Vec<LoadedObject> {
        let mut linker = self.linker.lock();

        for (job, resolved) in jobs.iter().zip(addresses) {
            if job.unit.is_ok() {
                for (name, address) in resolved {
                    linker.bind_external(name, *address);
                }
            }
        }

        let mut failure = None;
        for job in jobs.iter_mut() {
            if let Ok(unit) = &job.unit {
                if let Err(e) = linker.define_unit(unit, &job.symbols, &job.compiled) {
                    failure = Some(e);
                    break;
                }
            }
        }
        let result = match failure {
            Some(e) => Err(e),
            None => linker.finalize(),
        };
        if let Err(e) = result {
            warn!(error = %e, "linking batch failed");
            for job in jobs.iter_mut() {
                job.fail(e.clone());
            }
            return Vec::new();
        }

        jobs.iter()
            .filter_map(|job| {
                let unit = job.unit.as_ref().ok()?;
                Some(loaded_object(&linker, job, unit))
            })
            .collect()
    }

    /// Publish linked symbols and settle every unit of the batch
    fn publish(&self, jobs: Vec<Job>, objects: &[LoadedObject]) {
        let mut state = self.state.lock();
        let mut linked = objects.iter();

        for job in jobs {
            match job.unit {
                Ok(unit) => {
                    let Some(object) = linked.next() else {
                        state.units[job.id.0] = UnitSlot::Failed(JitError::Link(format!(
                            "unit '{}' produced no object",
                            job.name
                        )));
                        state.stats.units_failed += 1;
                        continue;
                    };
                    for f in &object.functions {
                        if is_external_function(&unit, &f.name) {
                            let symbol = EvaluatedSymbol::new(f.address, SymbolFlags::EXPORTED | SymbolFlags::CALLABLE);
                            state.dylib.publish(self.mangle.mangle(&f.name), symbol);
                        }
                    }
                    for g in &object.globals {
                        if unit.global(&g.name).is_some_and(|d| d.linkage == Linkage::External) {
                            let symbol = EvaluatedSymbol::new(g.address, SymbolFlags::EXPORTED);
                            state.dylib.publish(self.mangle.mangle(&g.name), symbol);
                        }
                    }
                    debug!(
                        unit = job.name.as_str(),
                        functions = object.functions.len(),
                        code_size = object.code_size(),
                        "unit linked"
                    );
                    state.stats.functions_compiled += job.compiled.len();
                    state.stats.units_materialized += 1;
                    state.units[job.id.0] = UnitSlot::Linked;
                }
                Err(error) => {
                    debug!(unit = job.name.as_str(), error = %error, "unit failed");
                    state.stats.units_failed += 1;
                    state.units[job.id.0] = UnitSlot::Failed(error);
                }
            }
        }
        drop(state);
        self.materialized.notify_all();
    }
}

fn non_null(symbol: EvaluatedSymbol, name: &str) -> JitResult<EvaluatedSymbol> {
    if symbol.is_null() {
        Err(JitError::NullSymbolAddress(name.to_string()))
    } else {
        Ok(symbol)
    }
}

fn is_external_function(unit: &CompilationUnit, name: &str) -> bool {
    unit.function(name).is_some_and(|f| f.linkage == Linkage::External)
}

/// Fail every job that depends, inside the batch, on a failed job.
fn propagate_failures(jobs: &mut [Job]) {
    let index: HashMap<UnitId, usize> = jobs.iter().enumerate().map(|(i, j)| (j.id, i)).collect();
    loop {
        let mut changed = false;
        for i in 0..jobs.len() {
            if jobs[i].unit.is_err() {
                continue;
            }
            let failed_dep = jobs[i].imports.values().find_map(|source| match source {
                ImportSource::InBatch(dep) => index.get(dep).and_then(|&d| jobs[d].error().cloned()),
                _ => None,
            });
            if let Some(error) = failed_dep {
                jobs[i].fail(error);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn loaded_object(linker: &ObjectLinkingLayer, job: &Job, unit: &CompilationUnit) -> LoadedObject {
    let functions = job
        .compiled
        .iter()
        .filter_map(|c| {
            Some(LoadedFunction {
                name: c.name.clone(),
                address: linker.address_of(&job.symbols, &c.name)?,
                size: c.code_size() as u64,
            })
        })
        .collect();
    let globals = unit
        .globals
        .iter()
        .filter_map(|g| {
            Some(LoadedGlobal {
                name: g.name.clone(),
                address: linker.address_of(&job.symbols, &g.name)?,
                size: g.size,
            })
        })
        .collect();
    LoadedObject {
        unit: job.name.clone(),
        functions,
        globals,
    }
}

/// Fails any unit of an abandoned batch so waiting lookups wake up.
struct BatchGuard<'a> {
    session: &'a ExecutionSession,
    ids: Vec<UnitId>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let mut state = self.session.state.lock();
        for id in &self.ids {
            if matches!(state.units[id.0], UnitSlot::Materializing) {
                let error = JitError::Link(format!(
                    "materialization of unit '{}' was interrupted",
                    state.unit_names[id.0]
                ));
                state.units[id.0] = UnitSlot::Failed(error);
                state.stats.units_failed += 1;
            }
        }
        drop(state);
        self.session.materialized.notify_all();
    }
}

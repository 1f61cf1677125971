//! IR transform stage.
//!
//! Runs once per compilation unit during materialization, before code
//! generation. The default [`JitOptimizer`] applies a fixed-level pipeline:
//!
//! - coroutine lowering (always, when the unit uses coroutine primitives)
//! - level 1+: constant folding, branch folding, dead code and unreachable
//!   block elimination, removal of unreferenced internal functions
//! - level 2+: inlining of small same-unit callees

pub mod coroutine;
pub mod inline;
pub mod simplify;

use std::collections::{HashSet, VecDeque};

use core_types::JitResult;
use jit_ir::{CompilationUnit, InstKind, Linkage};
use tracing::trace;

pub use coroutine::lower_coroutines;
pub use inline::{Inliner, InliningConfig, InliningRejection, InliningStats};
pub use simplify::simplify_function;

/// A rewrite applied to every unit before it is compiled.
pub trait IrTransform: Send + Sync {
    /// Transform a unit; errors fail the unit's materialization
    fn transform(&self, unit: CompilationUnit) -> JitResult<CompilationUnit>;
}

impl<F> IrTransform for F
where
    F: Fn(CompilationUnit) -> JitResult<CompilationUnit> + Send + Sync,
{
    fn transform(&self, unit: CompilationUnit) -> JitResult<CompilationUnit> {
        self(unit)
    }
}

/// Fixed-level optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitOptimizer {
    level: u8,
}

impl JitOptimizer {
    /// Create an optimizer at `level` (clamped to 3)
    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(3),
        }
    }

    /// Optimization level
    pub fn level(&self) -> u8 {
        self.level
    }
}

impl Default for JitOptimizer {
    fn default() -> Self {
        Self::new(2)
    }
}

impl IrTransform for JitOptimizer {
    fn transform(&self, mut unit: CompilationUnit) -> JitResult<CompilationUnit> {
        lower_coroutines(&mut unit)?;

        if self.level >= 1 {
            for func in &mut unit.functions {
                simplify_function(func);
            }
        }

        if self.level >= 2 {
            let stats = Inliner::new(InliningConfig::for_level(self.level)).run(&mut unit);
            trace!(
                unit = unit.name(),
                inlined = stats.functions_inlined,
                rejected = stats.functions_rejected,
                "inlining finished"
            );
            for func in &mut unit.functions {
                simplify_function(func);
            }
        }

        if self.level >= 1 {
            remove_dead_internal_functions(&mut unit);
        }

        trace!(unit = unit.name(), "transformed IR:\n{}", unit);
        Ok(unit)
    }
}

/// Drop internal functions that no external function can reach.
pub fn remove_dead_internal_functions(unit: &mut CompilationUnit) {
    let mut live: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = unit
        .functions
        .iter()
        .filter(|f| f.linkage == Linkage::External)
        .map(|f| f.name.clone())
        .collect();

    while let Some(name) = queue.pop_front() {
        if !live.insert(name.clone()) {
            continue;
        }
        let Some(func) = unit.function(&name) else {
            continue;
        };
        for inst in func.blocks.iter().flat_map(|b| b.insts.iter()) {
            if let InstKind::Call { callee: target, .. } | InstKind::FuncAddr(target) = &inst.kind {
                if !live.contains(target) {
                    queue.push_back(target.clone());
                }
            }
        }
    }

    unit.functions
        .retain(|f| f.linkage == Linkage::External || live.contains(&f.name));
}

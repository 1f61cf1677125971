//! Function inlining
//!
//! Replaces direct calls to small functions defined in the same unit with a
//! copy of the callee's body. Decisions are static: size, recursion and a
//! per-caller growth budget.

use std::collections::HashMap;
use std::fmt;

use jit_ir::{Block, BlockCall, CompilationUnit, Function, Inst, InstKind, Terminator, Value, ValueDef};
use tracing::trace;

/// Configuration for inlining decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InliningConfig {
    /// Maximum size of a function to inline (in IR instructions)
    pub max_inline_size: usize,
    /// Maximum instructions added to a single caller
    pub max_total_inline_size: usize,
}

impl InliningConfig {
    /// Thresholds for an optimization level
    pub fn for_level(level: u8) -> Self {
        if level >= 3 {
            Self {
                max_inline_size: 64,
                max_total_inline_size: 1024,
            }
        } else {
            Self::default()
        }
    }
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            max_inline_size: 24,
            max_total_inline_size: 256,
        }
    }
}

/// Reason for rejecting inlining
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InliningRejection {
    /// Callee is not defined in this unit
    NotInUnit,
    /// Callee is the caller, or calls itself
    Recursive,
    /// Callee contains suspend points
    Coroutine,
    /// Callee too large
    TooLarge {
        /// Callee size
        size: usize,
        /// Limit
        max: usize,
    },
    /// Caller's growth budget is spent
    BudgetExhausted {
        /// Remaining budget
        remaining: usize,
        /// Required
        required: usize,
    },
    /// Call passes the wrong number of arguments
    ArityMismatch,
}

impl fmt::Display for InliningRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InliningRejection::NotInUnit => write!(f, "callee not in unit"),
            InliningRejection::Recursive => write!(f, "recursive"),
            InliningRejection::Coroutine => write!(f, "coroutine"),
            InliningRejection::TooLarge { size, max } => write!(f, "too large ({} > {})", size, max),
            InliningRejection::BudgetExhausted {
                remaining,
                required,
            } => write!(f, "budget exhausted ({} < {})", remaining, required),
            InliningRejection::ArityMismatch => write!(f, "arity mismatch"),
        }
    }
}

/// Budget tracker for inlining into one caller
#[derive(Debug, Clone)]
struct InliningBudget {
    max_size: usize,
    consumed_size: usize,
}

impl InliningBudget {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            consumed_size: 0,
        }
    }

    fn can_afford(&self, size: usize) -> bool {
        self.consumed_size + size <= self.max_size
    }

    fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.consumed_size)
    }

    fn consume(&mut self, size: usize) {
        self.consumed_size += size;
    }
}

/// Statistics about inlining operations
#[derive(Debug, Clone, Default)]
pub struct InliningStats {
    /// Call sites inlined
    pub functions_inlined: u64,
    /// Call sites rejected
    pub functions_rejected: u64,
    /// Rejections by reason
    pub rejection_counts: HashMap<String, u64>,
}

/// Inlines same-unit callees
#[derive(Debug, Clone, Default)]
pub struct Inliner {
    config: InliningConfig,
}

impl Inliner {
    /// Create an inliner
    pub fn new(config: InliningConfig) -> Self {
        Self { config }
    }

    /// Decide whether `callee` may be inlined into `caller`
    pub fn should_inline(
        &self,
        caller: &str,
        callee: Option<&Function>,
        arg_count: usize,
        remaining_budget: usize,
    ) -> Result<usize, InliningRejection> {
        let Some(callee) = callee else {
            return Err(InliningRejection::NotInUnit);
        };
        if callee.name == caller || callee.direct_callees().contains(&callee.name.as_str()) {
            return Err(InliningRejection::Recursive);
        }
        if callee.is_coroutine() {
            return Err(InliningRejection::Coroutine);
        }
        if callee.params.len() != arg_count || callee.blocks.is_empty() {
            return Err(InliningRejection::ArityMismatch);
        }
        let size = callee.instruction_count();
        if size > self.config.max_inline_size {
            return Err(InliningRejection::TooLarge {
                size,
                max: self.config.max_inline_size,
            });
        }
        if size > remaining_budget {
            return Err(InliningRejection::BudgetExhausted {
                remaining: remaining_budget,
                required: size,
            });
        }
        Ok(size)
    }

    /// Inline eligible call sites in every function of `unit`
    pub fn run(&self, unit: &mut CompilationUnit) -> InliningStats {
        let mut stats = InliningStats::default();
        let bodies: HashMap<String, Function> = unit
            .functions
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect();

        for caller in &mut unit.functions {
            let mut budget = InliningBudget::new(self.config.max_total_inline_size);
            let mut skip: usize = 0;

            loop {
                let Some((block, index, callee, arg_count)) = find_call(caller, skip) else {
                    break;
                };
                let body = bodies.get(&callee);
                match self.should_inline(&caller.name, body, arg_count, budget.remaining()) {
                    Ok(size) if budget.can_afford(size) => {
                        if let Some(body) = body {
                            inline_call(caller, block, index, body);
                            budget.consume(size);
                            stats.functions_inlined += 1;
                            trace!(caller = caller.name.as_str(), callee = callee.as_str(), "inlined");
                        }
                    }
                    Ok(_) => skip += 1,
                    Err(rejection) => {
                        stats.functions_rejected += 1;
                        *stats.rejection_counts.entry(rejection.to_string()).or_insert(0) += 1;
                        skip += 1;
                    }
                }
            }
        }
        stats
    }
}

/// The `skip`-th direct call in block order
fn find_call(func: &Function, skip: usize) -> Option<(Block, usize, String, usize)> {
    func.block_ids()
        .flat_map(|b| {
            func.block(b)
                .insts
                .iter()
                .enumerate()
                .filter_map(move |(i, inst)| match &inst.kind {
                    InstKind::Call { callee, args } => Some((b, i, callee.clone(), args.len())),
                    _ => None,
                })
        })
        .nth(skip)
}

/// Replace the call at `caller[block].insts[index]` with a copy of `callee`.
fn inline_call(caller: &mut Function, block: Block, index: usize, callee: &Function) {
    let data = caller.block_mut(block);
    let tail = data.insts.split_off(index + 1);
    let Some(call) = data.insts.pop() else {
        return;
    };
    let term = data.terminator.take();
    let InstKind::Call { args, .. } = call.kind else {
        return;
    };

    let cont = caller.add_block(format!("{}.cont", callee.name));
    {
        let cont_data = caller.block_mut(cont);
        cont_data.insts = tail;
        cont_data.terminator = term;
    }
    if let Some(result) = call.result {
        if let Some(d) = caller.value_data_mut(result) {
            d.def = ValueDef::BlockParam(cont, 0);
        }
        caller.block_mut(cont).params.push(result);
    }

    let mut values: HashMap<Value, Value> = callee
        .params
        .iter()
        .copied()
        .zip(args.iter().copied())
        .collect();
    let mut blocks: HashMap<Block, Block> = HashMap::new();

    for cb in callee.block_ids() {
        let src = callee.block(cb);
        let nb = caller.add_block(format!("{}.{}", callee.name, src.name));
        blocks.insert(cb, nb);
        for p in &src.params {
            let np = caller.add_block_param(nb, callee.value_type(*p));
            values.insert(*p, np);
        }
        for inst in &src.insts {
            if let Some(r) = inst.result {
                let nr = caller.new_value(callee.value_type(r), ValueDef::Inst);
                values.insert(r, nr);
            }
        }
    }

    let map = |v: Value| values.get(&v).copied().unwrap_or(v);
    for cb in callee.block_ids() {
        let src = callee.block(cb);
        let nb = blocks[&cb];
        let insts: Vec<Inst> = src
            .insts
            .iter()
            .map(|inst| {
                let mut kind = inst.kind.clone();
                kind.map_operands(map);
                Inst {
                    result: inst.result.map(map),
                    kind,
                }
            })
            .collect();
        let terminator = src.terminator.clone().map(|t| match t {
            Terminator::Return(v) => {
                let args = match (v, call.result) {
                    (Some(v), Some(_)) => vec![map(v)],
                    _ => Vec::new(),
                };
                Terminator::Jump(BlockCall::new(cont, args))
            }
            mut other => {
                other.map_operands(map);
                other.map_blocks(|b| blocks.get(&b).copied().unwrap_or(b));
                other
            }
        });
        let dst = caller.block_mut(nb);
        dst.insts = insts;
        dst.terminator = terminator;
    }

    let entry = blocks[&callee.entry_block()];
    caller.block_mut(block).terminator = Some(Terminator::Jump(BlockCall::new(entry, Vec::new())));
}

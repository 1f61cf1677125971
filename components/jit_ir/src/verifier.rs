//! IR verifier: structural integrity and type checks.
//!
//! Collects all errors rather than stopping at the first one. Producers run
//! it before handing a unit to the engine; the engine itself trusts its input.

use std::collections::HashSet;
use std::fmt;

use crate::function::Function;
use crate::instruction::{Block, BlockCall, CoroOp, InstKind, Terminator, Value};
use crate::types::Type;
use crate::unit::CompilationUnit;

/// Location context for a verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Unit-level problem
    Unit,
    /// Inside a function
    Function(String),
    /// Inside a block
    Block(String, u32),
    /// At an instruction (`usize::MAX` is the terminator)
    Instruction(String, u32, usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unit => write!(f, "unit"),
            Location::Function(name) => write!(f, "func @{name}"),
            Location::Block(name, bi) => write!(f, "func @{name}, bb{bi}"),
            Location::Instruction(name, bi, usize::MAX) => {
                write!(f, "func @{name}, bb{bi}, terminator")
            }
            Location::Instruction(name, bi, ii) => write!(f, "func @{name}, bb{bi}, inst {ii}"),
        }
    }
}

/// A single verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    /// Where
    pub location: Location,
    /// What
    pub message: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.message)
    }
}

/// Collected verification results.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// All errors found
    pub errors: Vec<VerifyError>,
}

impl VerifyResult {
    /// True if no errors were found
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(VerifyError {
            location,
            message: message.into(),
        });
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "verification passed");
        }
        writeln!(f, "verification failed with {} error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  {}", err)?;
        }
        Ok(())
    }
}

pub(crate) fn verify_unit(unit: &CompilationUnit) -> VerifyResult {
    let mut result = VerifyResult::default();

    let mut seen = HashSet::new();
    for name in unit
        .functions
        .iter()
        .map(|f| f.name.as_str())
        .chain(unit.globals.iter().map(|g| g.name.as_str()))
    {
        if !seen.insert(name) {
            result.error(Location::Unit, format!("symbol @{name} defined more than once"));
        }
    }

    for global in &unit.globals {
        if let Some(init) = &global.init {
            if init.len() as u64 != global.size {
                result.error(
                    Location::Unit,
                    format!("global @{} initializer does not match its size", global.name),
                );
            }
        }
        if global.align == 0 || !global.align.is_power_of_two() {
            result.error(
                Location::Unit,
                format!("global @{} has invalid alignment {}", global.name, global.align),
            );
        }
    }

    for func in &unit.functions {
        FunctionVerifier {
            unit,
            func,
            result: &mut result,
        }
        .run();
    }
    result
}

struct FunctionVerifier<'a> {
    unit: &'a CompilationUnit,
    func: &'a Function,
    result: &'a mut VerifyResult,
}

impl FunctionVerifier<'_> {
    fn run(&mut self) {
        let name = self.func.name.clone();
        if self.func.blocks.is_empty() {
            self.result.error(Location::Function(name), "function has no blocks");
            return;
        }

        for ty in &self.func.signature.params {
            if !ty.is_scalar() {
                self.result
                    .error(Location::Function(name.clone()), "aggregate parameters are not supported");
            }
        }

        let entry = self.func.entry_block();
        if !self.func.block(entry).params.is_empty() {
            self.result
                .error(Location::Block(name.clone(), 0), "entry block cannot have parameters");
        }

        for block in self.func.block_ids() {
            if self.func.successors(block).contains(&entry) {
                self.result.error(
                    Location::Block(name.clone(), block.index()),
                    "entry block cannot have predecessors",
                );
            }
            self.check_block(block);
        }
    }

    fn loc(&self, block: Block, index: usize) -> Location {
        Location::Instruction(self.func.name.clone(), block.index(), index)
    }

    fn check_value(&mut self, block: Block, index: usize, v: Value) -> Option<Type> {
        match self.func.value_data(v) {
            Some(data) => Some(data.ty),
            None => {
                let loc = self.loc(block, index);
                self.result.error(loc, format!("use of undefined value {}", v));
                None
            }
        }
    }

    fn expect_type(&mut self, block: Block, index: usize, v: Value, ty: Type, what: &str) {
        if let Some(actual) = self.check_value(block, index, v) {
            if actual != ty {
                let loc = self.loc(block, index);
                self.result
                    .error(loc, format!("{} must be {}, found {}", what, ty, actual));
            }
        }
    }

    fn expect_int(&mut self, block: Block, index: usize, v: Value, what: &str) {
        if let Some(actual) = self.check_value(block, index, v) {
            if !actual.is_int() {
                let loc = self.loc(block, index);
                self.result
                    .error(loc, format!("{} must be an integer, found {}", what, actual));
            }
        }
    }

    fn check_struct_type(&mut self, block: Block, index: usize, ty: Type) {
        if let Type::Struct(id) = ty {
            if self.unit.context().struct_type(id).is_none() {
                let loc = self.loc(block, index);
                self.result.error(loc, format!("unknown struct type {}", ty));
            }
        }
    }

    fn check_block(&mut self, block: Block) {
        let data = self.func.block(block);

        for (i, inst) in data.insts.iter().enumerate() {
            for op in inst.kind.operands() {
                self.check_value(block, i, op);
            }
            self.check_inst(block, i, &inst.kind, inst.result);
        }

        match &data.terminator {
            None => {
                let loc = Location::Block(self.func.name.clone(), block.index());
                self.result.error(loc, "block has no terminator");
            }
            Some(term) => self.check_terminator(block, term),
        }
    }

    fn check_inst(&mut self, block: Block, i: usize, kind: &InstKind, result: Option<Value>) {
        match kind {
            InstKind::Binary { op, lhs, rhs } => {
                let lt = self.check_value(block, i, *lhs);
                let rt = self.check_value(block, i, *rhs);
                if let (Some(lt), Some(rt)) = (lt, rt) {
                    if lt != rt {
                        let loc = self.loc(block, i);
                        self.result
                            .error(loc, format!("{} operands differ: {} vs {}", op, lt, rt));
                    } else if op.is_float() != lt.is_float() || !(lt.is_int() || lt.is_float()) {
                        let loc = self.loc(block, i);
                        self.result.error(loc, format!("{} not defined on {}", op, lt));
                    }
                }
            }
            InstKind::Icmp { lhs, rhs, .. } => {
                let lt = self.check_value(block, i, *lhs);
                let rt = self.check_value(block, i, *rhs);
                if let (Some(lt), Some(rt)) = (lt, rt) {
                    if lt != rt || !(lt.is_int() || lt == Type::Ptr) {
                        let loc = self.loc(block, i);
                        self.result.error(loc, format!("icmp on {} and {}", lt, rt));
                    }
                }
            }
            InstKind::Cast { op, value, to } => {
                if let Some(from) = self.check_value(block, i, *value) {
                    let ok = match (from.int_bits(), to.int_bits()) {
                        (Some(a), Some(b)) => match op {
                            crate::instruction::CastOp::Trunc => b < a,
                            _ => b > a,
                        },
                        _ => false,
                    };
                    if !ok {
                        let loc = self.loc(block, i);
                        self.result
                            .error(loc, format!("invalid {} from {} to {}", op, from, to));
                    }
                }
            }
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                self.expect_type(block, i, *cond, Type::I1, "select condition");
                let t = self.func.value_type(*if_true);
                self.expect_type(block, i, *if_false, t, "select operands");
            }
            InstKind::Alloca { ty, .. } => self.check_struct_type(block, i, *ty),
            InstKind::Load { ty, ptr } => {
                self.expect_type(block, i, *ptr, Type::Ptr, "load address");
                if !ty.is_scalar() {
                    let loc = self.loc(block, i);
                    self.result.error(loc, "cannot load an aggregate");
                }
            }
            InstKind::Store { ptr, .. } => {
                self.expect_type(block, i, *ptr, Type::Ptr, "store address");
            }
            InstKind::ElementPtr {
                base,
                pointee,
                index,
                field,
            } => {
                self.expect_type(block, i, *base, Type::Ptr, "element base");
                self.expect_int(block, i, *index, "element index");
                self.check_struct_type(block, i, *pointee);
                if let Some(field) = field {
                    let ok = match pointee {
                        Type::Struct(id) => self
                            .unit
                            .context()
                            .struct_type(*id)
                            .map(|s| (*field as usize) < s.fields.len())
                            .unwrap_or(false),
                        _ => false,
                    };
                    if !ok {
                        let loc = self.loc(block, i);
                        self.result
                            .error(loc, format!("field {} does not exist in {}", field, pointee));
                    }
                }
            }
            InstKind::Call { callee, args } => match self.unit.callee_signature(callee) {
                None => {
                    let loc = self.loc(block, i);
                    self.result
                        .error(loc, format!("call to undeclared function @{}", callee));
                }
                Some(sig) => {
                    let sig = sig.clone();
                    self.check_args(block, i, &sig.params, args, callee);
                    let produced = result.map(|v| self.func.value_type(v));
                    if produced != sig.ret {
                        let loc = self.loc(block, i);
                        self.result
                            .error(loc, format!("call result does not match @{} return type", callee));
                    }
                }
            },
            InstKind::CallIndirect {
                signature,
                callee,
                args,
            } => {
                self.expect_type(block, i, *callee, Type::Ptr, "indirect callee");
                self.check_args(block, i, &signature.params, args, "indirect callee");
            }
            InstKind::FuncAddr(name) => {
                if self.unit.callee_signature(name).is_none() {
                    let loc = self.loc(block, i);
                    self.result
                        .error(loc, format!("address of undeclared function @{}", name));
                }
            }
            InstKind::GlobalAddr(name) => {
                if self.unit.global(name).is_none() && !self.unit.extern_globals.contains(name) {
                    let loc = self.loc(block, i);
                    self.result
                        .error(loc, format!("address of undeclared global @{}", name));
                }
            }
            InstKind::Coro(op) => {
                if let Some(v) = op.operand() {
                    self.expect_type(block, i, v, Type::Ptr, "coroutine operand");
                }
                if matches!(op, CoroOp::Begin { .. }) && block != self.func.entry_block() {
                    let loc = self.loc(block, i);
                    self.result.error(loc, "coro.begin must be in the entry block");
                }
            }
            InstKind::Iconst { ty, .. } => {
                if !(ty.is_int() || *ty == Type::Ptr) {
                    let loc = self.loc(block, i);
                    self.result.error(loc, format!("iconst of type {}", ty));
                }
            }
            InstKind::Fconst { ty, .. } => {
                if !ty.is_float() {
                    let loc = self.loc(block, i);
                    self.result.error(loc, format!("fconst of type {}", ty));
                }
            }
        }
    }

    fn check_args(&mut self, block: Block, i: usize, params: &[Type], args: &[Value], callee: &str) {
        if params.len() != args.len() {
            let loc = self.loc(block, i);
            self.result.error(
                loc,
                format!("@{} expects {} arguments, got {}", callee, params.len(), args.len()),
            );
            return;
        }
        for (ty, arg) in params.iter().zip(args) {
            self.expect_type(block, i, *arg, *ty, "argument");
        }
    }

    fn check_block_call(&mut self, block: Block, call: &BlockCall) {
        let Some(target) = self.func.blocks.get(call.block.index() as usize) else {
            let loc = self.loc(block, usize::MAX);
            self.result
                .error(loc, format!("jump to missing block bb{}", call.block.index()));
            return;
        };
        if target.params.len() != call.args.len() {
            let loc = self.loc(block, usize::MAX);
            self.result.error(
                loc,
                format!(
                    "bb{} takes {} arguments, got {}",
                    call.block.index(),
                    target.params.len(),
                    call.args.len()
                ),
            );
            return;
        }
        let param_types: Vec<Type> = target.params.iter().map(|p| self.func.value_type(*p)).collect();
        for (ty, arg) in param_types.into_iter().zip(&call.args) {
            self.expect_type(block, usize::MAX, *arg, ty, "block argument");
        }
    }

    fn check_plain_target(&mut self, block: Block, target: Block) {
        match self.func.blocks.get(target.index() as usize) {
            None => {
                let loc = self.loc(block, usize::MAX);
                self.result
                    .error(loc, format!("jump to missing block bb{}", target.index()));
            }
            Some(data) if !data.params.is_empty() => {
                let loc = self.loc(block, usize::MAX);
                self.result.error(
                    loc,
                    format!("bb{} takes arguments and cannot be a switch or suspend target", target.index()),
                );
            }
            Some(_) => {}
        }
    }

    fn check_terminator(&mut self, block: Block, term: &Terminator) {
        match term {
            Terminator::Jump(call) => self.check_block_call(block, call),
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                self.expect_type(block, usize::MAX, *cond, Type::I1, "branch condition");
                self.check_block_call(block, then_dest);
                self.check_block_call(block, else_dest);
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                self.expect_int(block, usize::MAX, *value, "switch value");
                let mut seen = HashSet::new();
                for (case, target) in cases {
                    if !seen.insert(*case) {
                        let loc = self.loc(block, usize::MAX);
                        self.result.error(loc, format!("duplicate switch case {}", case));
                    }
                    self.check_plain_target(block, *target);
                }
                self.check_plain_target(block, *default);
            }
            Terminator::Return(value) => {
                let expected = self.func.signature.ret;
                match (value, expected) {
                    (None, None) => {}
                    (Some(v), Some(ty)) => self.expect_type(block, usize::MAX, *v, ty, "return value"),
                    _ => {
                        let loc = self.loc(block, usize::MAX);
                        self.result.error(loc, "return does not match signature");
                    }
                }
            }
            Terminator::Suspend { resume, cleanup, .. } => {
                self.check_plain_target(block, *resume);
                self.check_plain_target(block, *cleanup);
            }
            Terminator::Trap => {}
        }
    }
}

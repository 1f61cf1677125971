//! Instructions and block terminators.

use std::fmt;

use crate::types::{Signature, Type};

/// SSA value handle, an index into the owning function's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

impl Value {
    /// Raw index into the value arena
    pub fn index(self) -> u32 {
        self.0
    }

    /// Construct from a raw index
    pub fn from_index(index: u32) -> Self {
        Value(index)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block handle, an index into the owning function's block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(pub(crate) u32);

impl Block {
    /// Raw index into the block list
    pub fn index(self) -> u32 {
        self.0
    }

    /// Construct from a raw index
    pub fn from_index(index: u32) -> Self {
        Block(index)
    }
}

/// Two-operand arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Integer addition
    Add,
    /// Integer subtraction
    Sub,
    /// Integer multiplication
    Mul,
    /// Signed division
    SDiv,
    /// Unsigned division
    UDiv,
    /// Signed remainder
    SRem,
    /// Unsigned remainder
    URem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Logical shift right
    LShr,
    /// Arithmetic shift right
    AShr,
    /// Float addition
    FAdd,
    /// Float subtraction
    FSub,
    /// Float multiplication
    FMul,
    /// Float division
    FDiv,
}

impl BinaryOp {
    /// True for float operators
    pub fn is_float(self) -> bool {
        matches!(self, BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv)
    }

    /// True for operators that trap on a zero divisor
    pub fn can_trap(self) -> bool {
        matches!(self, BinaryOp::SDiv | BinaryOp::UDiv | BinaryOp::SRem | BinaryOp::URem)
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Signed less than
    Slt,
    /// Signed less or equal
    Sle,
    /// Signed greater than
    Sgt,
    /// Signed greater or equal
    Sge,
    /// Unsigned less than
    Ult,
    /// Unsigned less or equal
    Ule,
    /// Unsigned greater than
    Ugt,
    /// Unsigned greater or equal
    Uge,
}

impl IntPredicate {
    /// True for the predicates that read operands as two's complement
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntPredicate::Slt | IntPredicate::Sle | IntPredicate::Sgt | IntPredicate::Sge
        )
    }
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        };
        f.write_str(s)
    }
}

/// Integer width conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    /// Zero extend
    Zext,
    /// Sign extend
    Sext,
    /// Truncate
    Trunc,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastOp::Zext => f.write_str("zext"),
            CastOp::Sext => f.write_str("sext"),
            CastOp::Trunc => f.write_str("trunc"),
        }
    }
}

/// Coroutine primitives.
///
/// These are lowered into a plain state machine before code generation;
/// the code generator rejects any that survive.
#[derive(Debug, Clone, PartialEq)]
pub enum CoroOp {
    /// Size in bytes of the coroutine frame (`i64`)
    Size,
    /// Turn raw frame memory into a coroutine handle
    Begin {
        /// Frame memory obtained from the allocator
        mem: Value,
    },
    /// Memory to release when the coroutine is destroyed
    Free {
        /// Coroutine handle
        handle: Value,
    },
    /// Marks the end of the coroutine body (`i1`, false in lowered code)
    End {
        /// Coroutine handle
        handle: Value,
    },
    /// Resume a suspended coroutine
    Resume {
        /// Coroutine handle
        handle: Value,
    },
    /// Run the cleanup path of a suspended coroutine
    Destroy {
        /// Coroutine handle
        handle: Value,
    },
    /// True once the coroutine reached its final suspend point (`i1`)
    Done {
        /// Coroutine handle
        handle: Value,
    },
}

impl CoroOp {
    /// The handle or memory operand
    pub fn operand(&self) -> Option<Value> {
        match self {
            CoroOp::Size => None,
            CoroOp::Begin { mem } => Some(*mem),
            CoroOp::Free { handle }
            | CoroOp::End { handle }
            | CoroOp::Resume { handle }
            | CoroOp::Destroy { handle }
            | CoroOp::Done { handle } => Some(*handle),
        }
    }

    fn operand_mut(&mut self) -> Option<&mut Value> {
        match self {
            CoroOp::Size => None,
            CoroOp::Begin { mem } => Some(mem),
            CoroOp::Free { handle }
            | CoroOp::End { handle }
            | CoroOp::Resume { handle }
            | CoroOp::Destroy { handle }
            | CoroOp::Done { handle } => Some(handle),
        }
    }

    fn mnemonic(&self) -> &'static str {
        match self {
            CoroOp::Size => "coro.size",
            CoroOp::Begin { .. } => "coro.begin",
            CoroOp::Free { .. } => "coro.free",
            CoroOp::End { .. } => "coro.end",
            CoroOp::Resume { .. } => "coro.resume",
            CoroOp::Destroy { .. } => "coro.destroy",
            CoroOp::Done { .. } => "coro.done",
        }
    }
}

/// Instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Integer or pointer constant
    Iconst {
        /// Result type
        ty: Type,
        /// Value, already wrapped to the type's width
        value: i64,
    },
    /// Float constant
    Fconst {
        /// Result type
        ty: Type,
        /// Value
        value: f64,
    },
    /// Arithmetic or bitwise operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Value,
        /// Right operand
        rhs: Value,
    },
    /// Integer comparison producing `i1`
    Icmp {
        /// Predicate
        pred: IntPredicate,
        /// Left operand
        lhs: Value,
        /// Right operand
        rhs: Value,
    },
    /// Integer width conversion
    Cast {
        /// Conversion
        op: CastOp,
        /// Operand
        value: Value,
        /// Target type
        to: Type,
    },
    /// `cond ? if_true : if_false`
    Select {
        /// `i1` condition
        cond: Value,
        /// Value when true
        if_true: Value,
        /// Value when false
        if_false: Value,
    },
    /// Stack allocation of `count` elements of `ty`
    Alloca {
        /// Element type
        ty: Type,
        /// Element count
        count: u32,
    },
    /// Memory read
    Load {
        /// Loaded type
        ty: Type,
        /// Address
        ptr: Value,
    },
    /// Memory write
    Store {
        /// Stored value
        value: Value,
        /// Address
        ptr: Value,
    },
    /// `base + index * sizeof(pointee) + offsetof(pointee, field)`
    ElementPtr {
        /// Base address
        base: Value,
        /// Element type
        pointee: Type,
        /// Element index (any integer type)
        index: Value,
        /// Struct field within the element
        field: Option<u32>,
    },
    /// Direct call by symbol name
    Call {
        /// Callee symbol
        callee: String,
        /// Arguments
        args: Vec<Value>,
    },
    /// Call through a function pointer
    CallIndirect {
        /// Callee signature
        signature: Signature,
        /// Function pointer
        callee: Value,
        /// Arguments
        args: Vec<Value>,
    },
    /// Address of a function
    FuncAddr(String),
    /// Address of a global
    GlobalAddr(String),
    /// Coroutine primitive
    Coro(CoroOp),
}

impl InstKind {
    /// Value operands in order
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::Alloca { .. }
            | InstKind::FuncAddr(_)
            | InstKind::GlobalAddr(_) => Vec::new(),
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { value, ptr } => vec![*value, *ptr],
            InstKind::ElementPtr { base, index, .. } => vec![*base, *index],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::CallIndirect { callee, args, .. } => {
                let mut ops = vec![*callee];
                ops.extend(args.iter().copied());
                ops
            }
            InstKind::Coro(op) => op.operand().into_iter().collect(),
        }
    }

    /// Rewrite every value operand through `f`
    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::Alloca { .. }
            | InstKind::FuncAddr(_)
            | InstKind::GlobalAddr(_) => {}
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            InstKind::Cast { value, .. } => *value = f(*value),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                *cond = f(*cond);
                *if_true = f(*if_true);
                *if_false = f(*if_false);
            }
            InstKind::Load { ptr, .. } => *ptr = f(*ptr),
            InstKind::Store { value, ptr } => {
                *value = f(*value);
                *ptr = f(*ptr);
            }
            InstKind::ElementPtr { base, index, .. } => {
                *base = f(*base);
                *index = f(*index);
            }
            InstKind::Call { args, .. } => args.iter_mut().for_each(|a| *a = f(*a)),
            InstKind::CallIndirect { callee, args, .. } => {
                *callee = f(*callee);
                args.iter_mut().for_each(|a| *a = f(*a));
            }
            InstKind::Coro(op) => {
                if let Some(v) = op.operand_mut() {
                    *v = f(*v);
                }
            }
        }
    }

    /// True if the instruction only computes its result
    pub fn is_pure(&self) -> bool {
        match self {
            InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::Icmp { .. }
            | InstKind::Cast { .. }
            | InstKind::Select { .. }
            | InstKind::Alloca { .. }
            | InstKind::Load { .. }
            | InstKind::ElementPtr { .. }
            | InstKind::FuncAddr(_)
            | InstKind::GlobalAddr(_) => true,
            InstKind::Binary { op, .. } => !op.can_trap(),
            InstKind::Coro(CoroOp::Size) | InstKind::Coro(CoroOp::End { .. }) => true,
            InstKind::Store { .. }
            | InstKind::Call { .. }
            | InstKind::CallIndirect { .. }
            | InstKind::Coro(_) => false,
        }
    }

    /// Symbol this instruction refers to by name, if any
    pub fn symbol_ref(&self) -> Option<&str> {
        match self {
            InstKind::Call { callee, .. } => Some(callee),
            InstKind::FuncAddr(name) | InstKind::GlobalAddr(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::Iconst { ty, value } => write!(f, "iconst {} {}", ty, value),
            InstKind::Fconst { ty, value } => write!(f, "fconst {} {}", ty, value),
            InstKind::Binary { op, lhs, rhs } => write!(f, "{} {}, {}", op, lhs, rhs),
            InstKind::Icmp { pred, lhs, rhs } => write!(f, "icmp {} {}, {}", pred, lhs, rhs),
            InstKind::Cast { op, value, to } => write!(f, "{} {} to {}", op, value, to),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => write!(f, "select {}, {}, {}", cond, if_true, if_false),
            InstKind::Alloca { ty, count } => write!(f, "alloca {}, {}", ty, count),
            InstKind::Load { ty, ptr } => write!(f, "load {}, {}", ty, ptr),
            InstKind::Store { value, ptr } => write!(f, "store {}, {}", value, ptr),
            InstKind::ElementPtr {
                base,
                pointee,
                index,
                field,
            } => {
                write!(f, "elementptr {}, {}[{}]", pointee, base, index)?;
                if let Some(field) = field {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
            InstKind::Call { callee, args } => {
                write!(f, "call @{}(", callee)?;
                write_values(f, args)?;
                write!(f, ")")
            }
            InstKind::CallIndirect {
                signature,
                callee,
                args,
            } => {
                write!(f, "call_indirect {} {}(", signature, callee)?;
                write_values(f, args)?;
                write!(f, ")")
            }
            InstKind::FuncAddr(name) => write!(f, "func_addr @{}", name),
            InstKind::GlobalAddr(name) => write!(f, "global_addr @{}", name),
            InstKind::Coro(op) => match op.operand() {
                Some(v) => write!(f, "{} {}", op.mnemonic(), v),
                None => write!(f, "{}", op.mnemonic()),
            },
        }
    }
}

/// An instruction inside a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    /// Result value, if the instruction produces one
    pub result: Option<Value>,
    /// Payload
    pub kind: InstKind,
}

/// Jump target with block arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCall {
    /// Destination block
    pub block: Block,
    /// Values bound to the destination's parameters
    pub args: Vec<Value>,
}

impl BlockCall {
    /// Create a block call
    pub fn new(block: Block, args: Vec<Value>) -> Self {
        Self { block, args }
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional jump
    Jump(BlockCall),
    /// Two-way branch on an `i1`
    Branch {
        /// Condition
        cond: Value,
        /// Taken when true
        then_dest: BlockCall,
        /// Taken when false
        else_dest: BlockCall,
    },
    /// Multi-way branch on an integer; targets take no arguments
    Switch {
        /// Scrutinee
        value: Value,
        /// `(case value, target)` pairs
        cases: Vec<(i64, Block)>,
        /// Target when no case matches
        default: Block,
    },
    /// Function return
    Return(Option<Value>),
    /// Coroutine suspend point.
    ///
    /// Control returns to whoever started or resumed the coroutine. A later
    /// resume continues at `resume`, a destroy continues at `cleanup`.
    Suspend {
        /// Final suspend points cannot be resumed
        is_final: bool,
        /// Resume continuation
        resume: Block,
        /// Destroy continuation
        cleanup: Block,
    },
    /// Unreachable
    Trap,
}

impl Terminator {
    /// Successor blocks in order
    pub fn successors(&self) -> Vec<Block> {
        match self {
            Terminator::Jump(call) => vec![call.block],
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest.block, else_dest.block],
            Terminator::Switch { cases, default, .. } => {
                let mut succ: Vec<Block> = cases.iter().map(|(_, b)| *b).collect();
                succ.push(*default);
                succ
            }
            Terminator::Suspend {
                resume, cleanup, ..
            } => vec![*resume, *cleanup],
            Terminator::Return(_) | Terminator::Trap => Vec::new(),
        }
    }

    /// Value operands, including block arguments
    pub fn operands(&self) -> Vec<Value> {
        match self {
            Terminator::Jump(call) => call.args.clone(),
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                let mut ops = vec![*cond];
                ops.extend(then_dest.args.iter().copied());
                ops.extend(else_dest.args.iter().copied());
                ops
            }
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Return(v) => v.iter().copied().collect(),
            Terminator::Suspend { .. } | Terminator::Trap => Vec::new(),
        }
    }

    /// Rewrite every value operand through `f`
    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Terminator::Jump(call) => call.args.iter_mut().for_each(|a| *a = f(*a)),
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                *cond = f(*cond);
                then_dest.args.iter_mut().for_each(|a| *a = f(*a));
                else_dest.args.iter_mut().for_each(|a| *a = f(*a));
            }
            Terminator::Switch { value, .. } => *value = f(*value),
            Terminator::Return(v) => {
                if let Some(v) = v {
                    *v = f(*v);
                }
            }
            Terminator::Suspend { .. } | Terminator::Trap => {}
        }
    }

    /// Rewrite every successor block through `f`
    pub fn map_blocks(&mut self, mut f: impl FnMut(Block) -> Block) {
        match self {
            Terminator::Jump(call) => call.block = f(call.block),
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                then_dest.block = f(then_dest.block);
                else_dest.block = f(else_dest.block);
            }
            Terminator::Switch { cases, default, .. } => {
                cases.iter_mut().for_each(|(_, b)| *b = f(*b));
                *default = f(*default);
            }
            Terminator::Suspend {
                resume, cleanup, ..
            } => {
                *resume = f(*resume);
                *cleanup = f(*cleanup);
            }
            Terminator::Return(_) | Terminator::Trap => {}
        }
    }
}

pub(crate) fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

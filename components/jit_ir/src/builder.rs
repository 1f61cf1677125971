//! Builder API for constructing functions.

use crate::function::{Function, ValueDef};
use crate::instruction::{
    BinaryOp, Block, BlockCall, CastOp, CoroOp, Inst, InstKind, IntPredicate, Terminator, Value,
};
use crate::types::{Signature, Type};

/// Appends instructions to a function, one block at a time.
///
/// # Examples
///
/// ```
/// use jit_ir::{Builder, Function, Linkage, Signature, Type};
///
/// let sig = Signature::new(vec![Type::I32, Type::I32], Some(Type::I32));
/// let mut func = Function::new("add", sig, Linkage::External);
/// let mut b = Builder::new(&mut func);
/// let entry = b.create_block("entry");
/// b.switch_to_block(entry);
/// let (x, y) = (b.param(0), b.param(1));
/// let sum = b.add(x, y);
/// b.ret(Some(sum));
/// assert_eq!(func.instruction_count(), 2);
/// ```
pub struct Builder<'a> {
    func: &'a mut Function,
    current: Option<Block>,
}

impl<'a> Builder<'a> {
    /// Start building into `func`
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            current: None,
        }
    }

    /// Create a new block
    pub fn create_block(&mut self, name: &str) -> Block {
        self.func.add_block(name)
    }

    /// Append a parameter to `block`
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        self.func.add_block_param(block, ty)
    }

    /// Direct subsequent instructions into `block`
    pub fn switch_to_block(&mut self, block: Block) {
        self.current = Some(block);
    }

    /// The block currently being filled
    pub fn current_block(&self) -> Option<Block> {
        self.current
    }

    /// Function argument `index`
    pub fn param(&self, index: usize) -> Value {
        self.func.params[index]
    }

    /// Type of a value
    pub fn value_type(&self, v: Value) -> Type {
        self.func.value_type(v)
    }

    fn push(&mut self, kind: InstKind, ty: Option<Type>) -> Option<Value> {
        let result = ty.map(|ty| self.func.new_value(ty, ValueDef::Inst));
        let block = self.current.unwrap_or_else(|| self.func.entry_block());
        self.func.block_mut(block).insts.push(Inst { result, kind });
        result
    }

    fn push_value(&mut self, kind: InstKind, ty: Type) -> Value {
        let v = self.func.new_value(ty, ValueDef::Inst);
        let block = self.current.unwrap_or_else(|| self.func.entry_block());
        self.func.block_mut(block).insts.push(Inst {
            result: Some(v),
            kind,
        });
        v
    }

    fn terminate(&mut self, term: Terminator) {
        let block = self.current.unwrap_or_else(|| self.func.entry_block());
        self.func.block_mut(block).terminator = Some(term);
    }

    /// Integer or pointer constant
    pub fn iconst(&mut self, ty: Type, value: i64) -> Value {
        let value = ty.wrap_int(value);
        self.push_value(InstKind::Iconst { ty, value }, ty)
    }

    /// Float constant
    pub fn fconst(&mut self, ty: Type, value: f64) -> Value {
        self.push_value(InstKind::Fconst { ty, value }, ty)
    }

    /// Binary operation; the result has the type of `lhs`
    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs);
        self.push_value(InstKind::Binary { op, lhs, rhs }, ty)
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// Integer comparison
    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> Value {
        self.push_value(InstKind::Icmp { pred, lhs, rhs }, Type::I1)
    }

    /// Width conversion
    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> Value {
        self.push_value(InstKind::Cast { op, value, to }, to)
    }

    /// Select between two values
    pub fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        let ty = self.func.value_type(if_true);
        self.push_value(
            InstKind::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        )
    }

    /// Stack slot for one `ty`
    pub fn alloca(&mut self, ty: Type) -> Value {
        self.push_value(InstKind::Alloca { ty, count: 1 }, Type::Ptr)
    }

    /// Read a `ty` from `ptr`
    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        self.push_value(InstKind::Load { ty, ptr }, ty)
    }

    /// Write `value` to `ptr`
    pub fn store(&mut self, value: Value, ptr: Value) {
        self.push(InstKind::Store { value, ptr }, None);
    }

    /// Address of `base[index]` (optionally `.field`) for elements of `pointee`
    pub fn element_ptr(&mut self, base: Value, pointee: Type, index: Value, field: Option<u32>) -> Value {
        self.push_value(
            InstKind::ElementPtr {
                base,
                pointee,
                index,
                field,
            },
            Type::Ptr,
        )
    }

    /// Direct call; `ret` must match the callee's return type
    pub fn call(&mut self, callee: &str, ret: Option<Type>, args: &[Value]) -> Option<Value> {
        self.push(
            InstKind::Call {
                callee: callee.to_string(),
                args: args.to_vec(),
            },
            ret,
        )
    }

    /// Direct call of a callee returning `ret`
    pub fn call_value(&mut self, callee: &str, ret: Type, args: &[Value]) -> Value {
        self.push_value(
            InstKind::Call {
                callee: callee.to_string(),
                args: args.to_vec(),
            },
            ret,
        )
    }

    /// Call through a function pointer
    pub fn call_indirect(&mut self, signature: Signature, callee: Value, args: &[Value]) -> Option<Value> {
        let ret = signature.ret;
        self.push(
            InstKind::CallIndirect {
                signature,
                callee,
                args: args.to_vec(),
            },
            ret,
        )
    }

    /// Address of a function
    pub fn func_addr(&mut self, name: &str) -> Value {
        self.push_value(InstKind::FuncAddr(name.to_string()), Type::Ptr)
    }

    /// Address of a global
    pub fn global_addr(&mut self, name: &str) -> Value {
        self.push_value(InstKind::GlobalAddr(name.to_string()), Type::Ptr)
    }

    /// Coroutine frame size
    pub fn coro_size(&mut self) -> Value {
        self.push_value(InstKind::Coro(CoroOp::Size), Type::I64)
    }

    /// Coroutine handle from frame memory
    pub fn coro_begin(&mut self, mem: Value) -> Value {
        self.push_value(InstKind::Coro(CoroOp::Begin { mem }), Type::Ptr)
    }

    /// Frame memory to release
    pub fn coro_free(&mut self, handle: Value) -> Value {
        self.push_value(InstKind::Coro(CoroOp::Free { handle }), Type::Ptr)
    }

    /// End of the coroutine body
    pub fn coro_end(&mut self, handle: Value) -> Value {
        self.push_value(InstKind::Coro(CoroOp::End { handle }), Type::I1)
    }

    /// Resume a coroutine
    pub fn coro_resume(&mut self, handle: Value) {
        self.push(InstKind::Coro(CoroOp::Resume { handle }), None);
    }

    /// Destroy a coroutine
    pub fn coro_destroy(&mut self, handle: Value) {
        self.push(InstKind::Coro(CoroOp::Destroy { handle }), None);
    }

    /// Has the coroutine reached its final suspend point
    pub fn coro_done(&mut self, handle: Value) -> Value {
        self.push_value(InstKind::Coro(CoroOp::Done { handle }), Type::I1)
    }

    /// Unconditional jump
    pub fn jump(&mut self, dest: Block, args: &[Value]) {
        self.terminate(Terminator::Jump(BlockCall::new(dest, args.to_vec())));
    }

    /// Conditional branch
    pub fn branch(&mut self, cond: Value, then_dest: Block, then_args: &[Value], else_dest: Block, else_args: &[Value]) {
        self.terminate(Terminator::Branch {
            cond,
            then_dest: BlockCall::new(then_dest, then_args.to_vec()),
            else_dest: BlockCall::new(else_dest, else_args.to_vec()),
        });
    }

    /// Multi-way branch
    pub fn switch(&mut self, value: Value, cases: &[(i64, Block)], default: Block) {
        self.terminate(Terminator::Switch {
            value,
            cases: cases.to_vec(),
            default,
        });
    }

    /// Return
    pub fn ret(&mut self, value: Option<Value>) {
        self.terminate(Terminator::Return(value));
    }

    /// Coroutine suspend point
    pub fn suspend(&mut self, is_final: bool, resume: Block, cleanup: Block) {
        self.terminate(Terminator::Suspend {
            is_final,
            resume,
            cleanup,
        });
    }

    /// Unreachable
    pub fn trap(&mut self) {
        self.terminate(Terminator::Trap);
    }
}

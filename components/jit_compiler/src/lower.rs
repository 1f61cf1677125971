//! IR to Cranelift lowering
//!
//! Each IR function becomes one `cranelift_codegen::ir::Function`. Blocks are
//! emitted in reverse post-order so every definition is seen before its
//! uses; unreachable blocks are dropped. References to other functions and
//! globals are imported by link-layer id, so lowering never touches the
//! module and may run on any thread.

use std::collections::HashMap;

use core_types::{DataLayout, JitError, JitResult};
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::immediates::Imm64;
use cranelift_codegen::ir::{
    self, AbiParam, ExtFuncData, ExternalName, GlobalValueData, InstBuilder, MemFlags,
    StackSlotData, StackSlotKind, TrapCode, UserExternalName, UserFuncName,
};
use cranelift_codegen::isa::TargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Switch};
use cranelift_module::{DataId, FuncId};
use jit_ir::{
    BinaryOp, Block, BlockCall, CastOp, CompilationUnit, Function, Inst, InstKind, IntPredicate,
    Signature, Terminator, Type, Value,
};

/// A name bound in the link layer.
#[derive(Debug, Clone)]
pub enum LinkedName {
    /// Function with its native signature
    Function(FuncId, ir::Signature),
    /// Data object
    Data(DataId),
}

/// Link-layer ids for every name one unit defines or references.
#[derive(Debug, Clone, Default)]
pub struct UnitSymbols {
    names: HashMap<String, LinkedName>,
}

impl UnitSymbols {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`
    pub fn insert(&mut self, name: impl Into<String>, linked: LinkedName) {
        self.names.insert(name.into(), linked);
    }

    /// Look up `name`
    pub fn get(&self, name: &str) -> Option<&LinkedName> {
        self.names.get(name)
    }

    /// Function id of `name`
    pub fn function(&self, name: &str) -> Option<FuncId> {
        match self.names.get(name)? {
            LinkedName::Function(id, _) => Some(*id),
            LinkedName::Data(_) => None,
        }
    }

    /// True if `name` is bound
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of bound names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Native type of a scalar IR type; `i1` is carried in a byte.
pub fn native_type(ty: Type, pointer: ir::Type) -> Option<ir::Type> {
    match ty {
        Type::I1 | Type::I8 => Some(ir::types::I8),
        Type::I16 => Some(ir::types::I16),
        Type::I32 => Some(ir::types::I32),
        Type::I64 => Some(ir::types::I64),
        Type::F32 => Some(ir::types::F32),
        Type::F64 => Some(ir::types::F64),
        Type::Ptr => Some(pointer),
        Type::Struct(_) => None,
    }
}

/// Native signature for `sig` under the host calling convention.
pub fn native_signature(sig: &Signature, isa: &dyn TargetIsa) -> Result<ir::Signature, String> {
    let pointer = isa.pointer_type();
    let param = |ty: Type| -> Result<AbiParam, String> {
        let native = native_type(ty, pointer)
            .ok_or_else(|| format!("aggregate type '{}' cannot be passed by value", ty))?;
        Ok(match ty {
            Type::I1 => AbiParam::new(native).uext(),
            _ => AbiParam::new(native),
        })
    };

    let mut out = ir::Signature::new(isa.default_call_conv());
    for ty in &sig.params {
        out.params.push(param(*ty)?);
    }
    if let Some(ret) = sig.ret {
        out.returns.push(param(ret)?);
    }
    Ok(out)
}

/// Lower `func` from `unit` into a Cranelift function named by `id`.
pub fn lower_function(
    func: &Function,
    unit: &CompilationUnit,
    symbols: &UnitSymbols,
    isa: &dyn TargetIsa,
    id: FuncId,
) -> JitResult<ir::Function> {
    let signature = native_signature(&func.signature, isa).map_err(|m| JitError::compile(&func.name, m))?;
    let mut out = ir::Function::with_name_signature(UserFuncName::user(0, id.as_u32()), signature);
    let mut builder_ctx = FunctionBuilderContext::new();

    let lowering = FunctionLowering {
        func,
        unit,
        symbols,
        layout: unit.data_layout().copied().unwrap_or_default(),
        pointer: isa.pointer_type(),
        isa,
        builder: FunctionBuilder::new(&mut out, &mut builder_ctx),
        values: HashMap::new(),
        blocks: HashMap::new(),
        func_refs: HashMap::new(),
        global_values: HashMap::new(),
    };
    lowering.lower().map_err(|m| JitError::compile(&func.name, m))?;
    Ok(out)
}

struct FunctionLowering<'a> {
    func: &'a Function,
    unit: &'a CompilationUnit,
    symbols: &'a UnitSymbols,
    layout: DataLayout,
    pointer: ir::Type,
    isa: &'a dyn TargetIsa,
    builder: FunctionBuilder<'a>,
    values: HashMap<Value, ir::Value>,
    blocks: HashMap<Block, ir::Block>,
    func_refs: HashMap<String, ir::FuncRef>,
    global_values: HashMap<String, ir::GlobalValue>,
}

impl<'a> FunctionLowering<'a> {
    fn lower(mut self) -> Result<(), String> {
        let func = self.func;
        let order = func.reverse_postorder();
        let Some(&entry) = order.first() else {
            return Err("function has no body".to_string());
        };

        for &b in &order {
            let native = self.builder.create_block();
            self.blocks.insert(b, native);
        }

        let native_entry = self.blocks[&entry];
        self.builder.append_block_params_for_function_params(native_entry);
        let args = self.builder.block_params(native_entry).to_vec();
        for (param, arg) in func.params.iter().zip(args) {
            self.values.insert(*param, arg);
        }

        for &b in &order {
            let native = self.blocks[&b];
            for param in &func.block(b).params {
                let ty = self.native(func.value_type(*param))?;
                let v = self.builder.append_block_param(native, ty);
                self.values.insert(*param, v);
            }
        }

        for &b in &order {
            self.builder.switch_to_block(self.blocks[&b]);
            let data = func.block(b);
            for inst in &data.insts {
                self.lower_inst(inst)?;
            }
            match &data.terminator {
                Some(term) => self.lower_terminator(term)?,
                None => return Err(format!("block '{}' has no terminator", data.name)),
            }
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn native(&self, ty: Type) -> Result<ir::Type, String> {
        native_type(ty, self.pointer).ok_or_else(|| format!("aggregate type '{}' used as a value", ty))
    }

    fn value(&self, v: Value) -> Result<ir::Value, String> {
        self.values
            .get(&v)
            .copied()
            .ok_or_else(|| format!("use of undefined value {}", v))
    }

    fn values_of(&self, vs: &[Value]) -> Result<Vec<ir::Value>, String> {
        vs.iter().map(|v| self.value(*v)).collect()
    }

    fn block(&self, b: Block) -> Result<ir::Block, String> {
        self.blocks
            .get(&b)
            .copied()
            .ok_or_else(|| format!("branch to unknown block {}", b.index()))
    }

    fn lower_inst(&mut self, inst: &Inst) -> Result<(), String> {
        let result = match &inst.kind {
            InstKind::Iconst { ty, value } => {
                let native = self.native(*ty)?;
                let value = if *ty == Type::I1 { value & 1 } else { *value };
                Some(self.builder.ins().iconst(native, mask(value, native.bits())))
            }
            InstKind::Fconst { ty, value } => match ty {
                Type::F32 => Some(self.builder.ins().f32const(*value as f32)),
                Type::F64 => Some(self.builder.ins().f64const(*value)),
                other => return Err(format!("float constant of type '{}'", other)),
            },
            InstKind::Binary { op, lhs, rhs } => {
                let (a, b) = (self.value(*lhs)?, self.value(*rhs)?);
                if self.func.value_type(*lhs) == Type::I1 {
                    Some(self.lower_bool_binary(*op, a, b))
                } else {
                    Some(self.lower_binary(*op, a, b))
                }
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                let (mut a, mut b) = (self.value(*lhs)?, self.value(*rhs)?);
                if pred.is_signed() && self.func.value_type(*lhs) == Type::I1 {
                    a = self.builder.ins().ineg(a);
                    b = self.builder.ins().ineg(b);
                }
                Some(self.builder.ins().icmp(int_cc(*pred), a, b))
            }
            InstKind::Cast { op, value, to } => Some(self.lower_cast(*op, *value, *to)?),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let c = self.value(*cond)?;
                let (t, f) = (self.value(*if_true)?, self.value(*if_false)?);
                Some(self.builder.ins().select(c, t, f))
            }
            InstKind::Alloca { ty, count } => {
                let context = self.unit.context();
                let size = context.size_of(*ty, &self.layout) * u64::from(*count);
                let align = context.align_of(*ty, &self.layout).max(1);
                let size = u32::try_from(size).map_err(|_| format!("stack allocation of {} bytes", size))?;
                let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    size,
                    align.trailing_zeros() as u8,
                ));
                Some(self.builder.ins().stack_addr(self.pointer, slot, 0))
            }
            InstKind::Load { ty, ptr } => {
                let native = self.native(*ty)?;
                let p = self.value(*ptr)?;
                Some(self.builder.ins().load(native, MemFlags::new(), p, 0))
            }
            InstKind::Store { value, ptr } => {
                let (v, p) = (self.value(*value)?, self.value(*ptr)?);
                self.builder.ins().store(MemFlags::new(), v, p, 0);
                None
            }
            InstKind::ElementPtr {
                base,
                pointee,
                index,
                field,
            } => Some(self.lower_element_ptr(*base, *pointee, *index, *field)?),
            InstKind::Call { callee, args } => {
                let callee = self.func_ref(callee)?;
                let args = self.values_of(args)?;
                let call = self.builder.ins().call(callee, &args);
                self.builder.inst_results(call).first().copied()
            }
            InstKind::CallIndirect {
                signature,
                callee,
                args,
            } => {
                let sig = native_signature(signature, self.isa)?;
                let sig_ref = self.builder.import_signature(sig);
                let target = self.value(*callee)?;
                let args = self.values_of(args)?;
                let call = self.builder.ins().call_indirect(sig_ref, target, &args);
                self.builder.inst_results(call).first().copied()
            }
            InstKind::FuncAddr(name) => {
                let callee = self.func_ref(name)?;
                Some(self.builder.ins().func_addr(self.pointer, callee))
            }
            InstKind::GlobalAddr(name) => {
                let gv = self.global_value(name)?;
                Some(self.builder.ins().symbol_value(self.pointer, gv))
            }
            InstKind::Coro(op) => {
                return Err(format!("unlowered coroutine primitive {:?}", op));
            }
        };

        match (inst.result, result) {
            (Some(v), Some(native)) => {
                self.values.insert(v, native);
                Ok(())
            }
            (Some(v), None) => Err(format!("{} has no result", v)),
            _ => Ok(()),
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, a: ir::Value, b: ir::Value) -> ir::Value {
        let ins = self.builder.ins();
        match op {
            BinaryOp::Add => ins.iadd(a, b),
            BinaryOp::Sub => ins.isub(a, b),
            BinaryOp::Mul => ins.imul(a, b),
            BinaryOp::SDiv => ins.sdiv(a, b),
            BinaryOp::UDiv => ins.udiv(a, b),
            BinaryOp::SRem => ins.srem(a, b),
            BinaryOp::URem => ins.urem(a, b),
            BinaryOp::And => ins.band(a, b),
            BinaryOp::Or => ins.bor(a, b),
            BinaryOp::Xor => ins.bxor(a, b),
            BinaryOp::Shl => ins.ishl(a, b),
            BinaryOp::LShr => ins.ushr(a, b),
            BinaryOp::AShr => ins.sshr(a, b),
            BinaryOp::FAdd => ins.fadd(a, b),
            BinaryOp::FSub => ins.fsub(a, b),
            BinaryOp::FMul => ins.fmul(a, b),
            BinaryOp::FDiv => ins.fdiv(a, b),
        }
    }

    /// `i1` arithmetic on the byte it is carried in. Signed division sees
    /// a set bit as -1, shift amounts are taken modulo one bit, and the
    /// result is masked back to one bit.
    fn lower_bool_binary(&mut self, op: BinaryOp, a: ir::Value, b: ir::Value) -> ir::Value {
        let raw = match op {
            BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => return a,
            BinaryOp::SDiv | BinaryOp::SRem => {
                let sa = self.builder.ins().ineg(a);
                let sb = self.builder.ins().ineg(b);
                self.lower_binary(op, sa, sb)
            }
            _ => self.lower_binary(op, a, b),
        };
        self.builder.ins().band_imm(raw, 1)
    }

    fn lower_cast(&mut self, op: CastOp, value: Value, to: Type) -> Result<ir::Value, String> {
        let from = self.func.value_type(value);
        if !from.is_int() && from != Type::Ptr || !to.is_int() && to != Type::Ptr {
            return Err(format!("cannot {} from '{}' to '{}'", op, from, to));
        }
        let x = self.value(value)?;
        let (from_native, to_native) = (self.native(from)?, self.native(to)?);
        let widen = to_native.bits() > from_native.bits();
        let narrow = to_native.bits() < from_native.bits();

        Ok(match op {
            CastOp::Zext if widen => self.builder.ins().uextend(to_native, x),
            CastOp::Zext => x,
            CastOp::Sext if from == Type::I1 => {
                let wide = if widen {
                    self.builder.ins().uextend(to_native, x)
                } else {
                    x
                };
                self.builder.ins().ineg(wide)
            }
            CastOp::Sext if widen => self.builder.ins().sextend(to_native, x),
            CastOp::Sext => x,
            CastOp::Trunc => {
                let narrowed = if narrow {
                    self.builder.ins().ireduce(to_native, x)
                } else {
                    x
                };
                if to == Type::I1 {
                    self.builder.ins().band_imm(narrowed, 1)
                } else {
                    narrowed
                }
            }
        })
    }

    fn lower_element_ptr(
        &mut self,
        base: Value,
        pointee: Type,
        index: Value,
        field: Option<u32>,
    ) -> Result<ir::Value, String> {
        let context = self.unit.context().clone();
        let base = self.value(base)?;
        let index_native = self.native(self.func.value_type(index))?;
        let mut idx = self.value(index)?;
        if index_native.bits() < self.pointer.bits() {
            idx = self.builder.ins().sextend(self.pointer, idx);
        } else if index_native.bits() > self.pointer.bits() {
            idx = self.builder.ins().ireduce(self.pointer, idx);
        }

        let stride = context.size_of(pointee, &self.layout) as i64;
        let scaled = self.builder.ins().imul_imm(idx, stride);
        let mut addr = self.builder.ins().iadd(base, scaled);

        if let Some(field) = field {
            let Type::Struct(id) = pointee else {
                return Err(format!("field access into non-struct type '{}'", pointee));
            };
            let offset = context
                .field_offset(id, field, &self.layout)
                .ok_or_else(|| format!("struct has no field {}", field))?;
            if offset != 0 {
                addr = self.builder.ins().iadd_imm(addr, offset as i64);
            }
        }
        Ok(addr)
    }

    fn lower_terminator(&mut self, term: &Terminator) -> Result<(), String> {
        match term {
            Terminator::Jump(dest) => {
                let (block, args) = self.block_call(dest)?;
                self.builder.ins().jump(block, &args);
            }
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                let c = self.value(*cond)?;
                let (then_block, then_args) = self.block_call(then_dest)?;
                let (else_block, else_args) = self.block_call(else_dest)?;
                self.builder
                    .ins()
                    .brif(c, then_block, &then_args, else_block, &else_args);
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let v = self.value(*value)?;
                let bits = self.native(self.func.value_type(*value))?.bits();
                let mut switch = Switch::new();
                let mut seen = std::collections::HashSet::new();
                for (case, dest) in cases {
                    let key = mask(*case, bits) as u64 as u128;
                    if !seen.insert(key) {
                        return Err(format!("duplicate switch case {}", case));
                    }
                    switch.set_entry(key, self.block(*dest)?);
                }
                let default = self.block(*default)?;
                switch.emit(&mut self.builder, v, default);
            }
            Terminator::Return(value) => {
                let values = match value {
                    Some(v) => vec![self.value(*v)?],
                    None => Vec::new(),
                };
                self.builder.ins().return_(&values);
            }
            Terminator::Suspend { .. } => {
                return Err("unlowered suspend point".to_string());
            }
            Terminator::Trap => {
                self.builder.ins().trap(unreachable_trap()?);
            }
        }
        Ok(())
    }

    fn block_call(&self, call: &BlockCall) -> Result<(ir::Block, Vec<ir::Value>), String> {
        Ok((self.block(call.block)?, self.values_of(&call.args)?))
    }

    fn func_ref(&mut self, name: &str) -> Result<ir::FuncRef, String> {
        if let Some(r) = self.func_refs.get(name) {
            return Ok(*r);
        }
        let Some(LinkedName::Function(id, sig)) = self.symbols.get(name) else {
            return Err(format!("reference to undeclared function '{}'", name));
        };
        let user = self
            .builder
            .func
            .declare_imported_user_function(UserExternalName::new(0, id.as_u32()));
        let signature = self.builder.import_signature(sig.clone());
        let r = self.builder.import_function(ExtFuncData {
            name: ExternalName::user(user),
            signature,
            colocated: false,
        });
        self.func_refs.insert(name.to_string(), r);
        Ok(r)
    }

    fn global_value(&mut self, name: &str) -> Result<ir::GlobalValue, String> {
        if let Some(gv) = self.global_values.get(name) {
            return Ok(*gv);
        }
        let Some(LinkedName::Data(id)) = self.symbols.get(name) else {
            return Err(format!("reference to undeclared global '{}'", name));
        };
        let user = self
            .builder
            .func
            .declare_imported_user_function(UserExternalName::new(1, id.as_u32()));
        let gv = self.builder.create_global_value(GlobalValueData::Symbol {
            name: ExternalName::user(user),
            offset: Imm64::new(0),
            colocated: false,
            tls: false,
        });
        self.global_values.insert(name.to_string(), gv);
        Ok(gv)
    }
}

fn int_cc(pred: IntPredicate) -> IntCC {
    match pred {
        IntPredicate::Eq => IntCC::Equal,
        IntPredicate::Ne => IntCC::NotEqual,
        IntPredicate::Slt => IntCC::SignedLessThan,
        IntPredicate::Sle => IntCC::SignedLessThanOrEqual,
        IntPredicate::Sgt => IntCC::SignedGreaterThan,
        IntPredicate::Sge => IntCC::SignedGreaterThanOrEqual,
        IntPredicate::Ult => IntCC::UnsignedLessThan,
        IntPredicate::Ule => IntCC::UnsignedLessThanOrEqual,
        IntPredicate::Ugt => IntCC::UnsignedGreaterThan,
        IntPredicate::Uge => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// Zero-extend the low `bits` of `value`, as narrow immediates require.
fn mask(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        value
    } else {
        ((value as u64) & ((1u64 << bits) - 1)) as i64
    }
}

/// Trap code for `trap` terminators: user code 1.
fn unreachable_trap() -> Result<TrapCode, String> {
    "user1"
        .parse::<TrapCode>()
        .map_err(|_| "trap code unavailable".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_codegen::settings;
    use jit_ir::{Builder, Context, Linkage};

    fn host_isa() -> cranelift_codegen::isa::OwnedTargetIsa {
        cranelift_native::builder()
            .unwrap()
            .finish(settings::Flags::new(settings::builder()))
            .unwrap()
    }

    fn mul_add_unit(ctx: &Context) -> CompilationUnit {
        let mut unit = CompilationUnit::new("m", ctx);
        let sig = Signature::new(vec![Type::I32, Type::I32, Type::I32], Some(Type::I32));
        let mut f = Function::new("mul_add", sig, Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            let t = b.mul(b.param(0), b.param(1));
            let r = b.add(t, b.param(2));
            b.ret(Some(r));
        }
        unit.add_function(f);
        unit
    }

    #[test]
    fn test_lower_mul_add() {
        let isa = host_isa();
        let ctx = Context::new();
        let unit = mul_add_unit(&ctx);
        let mut symbols = UnitSymbols::new();
        let sig = native_signature(&unit.functions[0].signature, &*isa).unwrap();
        symbols.insert("mul_add", LinkedName::Function(FuncId::from_u32(0), sig));

        let func = lower_function(&unit.functions[0], &unit, &symbols, &*isa, FuncId::from_u32(0)).unwrap();
        assert_eq!(func.signature.params.len(), 3);
        assert_eq!(func.signature.returns.len(), 1);
        assert_eq!(func.layout.blocks().count(), 1);
    }

    #[test]
    fn test_undeclared_callee_is_compile_error() {
        let isa = host_isa();
        let ctx = Context::new();
        let mut unit = CompilationUnit::new("m", &ctx);
        let mut f = Function::new("caller", Signature::default(), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            b.call("missing", None, &[]);
            b.ret(None);
        }
        unit.add_function(f);

        let err = lower_function(&unit.functions[0], &unit, &UnitSymbols::new(), &*isa, FuncId::from_u32(0))
            .unwrap_err();
        assert!(matches!(err, JitError::Compile { ref function, .. } if function == "caller"));
    }

    #[test]
    fn test_aggregate_param_rejected() {
        let isa = host_isa();
        let ctx = Context::new();
        let point = ctx.create_struct("point", vec![Type::I32, Type::I32], false);
        let sig = Signature::new(vec![Type::Struct(point)], None);
        assert!(native_signature(&sig, &*isa).is_err());
    }

    #[test]
    fn test_mask_narrow_immediates() {
        assert_eq!(mask(-1, 8), 0xff);
        assert_eq!(mask(-1, 64), -1);
        assert_eq!(mask(300, 8), 44);
    }
}

//! Switch-style coroutine lowering.
//!
//! A function whose body contains `suspend` terminators is split into:
//!
//! - the ramp, keeping the original name and signature, which runs from the
//!   entry to the first suspend point and returns the handle;
//! - `<name>.resume` and `<name>.destroy`, both `(ptr) -> void`, which
//!   dispatch on the saved suspend index to the resume or cleanup
//!   continuation.
//!
//! The handle is the frame pointer passed to `coro.begin`. Frame layout:
//!
//! ```text
//! [0]      resume function (null after a final suspend)
//! [P]      destroy function
//! [2P]     suspend index (i32)
//! [2P+4..] values live across blocks
//! ```
//!
//! `coro.resume`, `coro.destroy` and `coro.done` anywhere in the unit become
//! loads and indirect calls through the frame header.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use core_types::{DataLayout, JitError, JitResult};
use jit_ir::{
    align_to, Block, CompilationUnit, Context, CoroOp, Function, Inst, InstKind, IntPredicate,
    Linkage, Signature, Terminator, Type, Value, ValueDef,
};
use tracing::debug;

/// Lower every coroutine in `unit` and all handle operations.
pub fn lower_coroutines(unit: &mut CompilationUnit) -> JitResult<()> {
    let layout = unit.data_layout().copied().unwrap_or_default();
    let context = unit.context().clone();
    let unit_name = unit.name().to_string();
    let pointer = layout.pointer_bytes() as i64;

    let mut split_off = Vec::new();
    for func in &mut unit.functions {
        if func.is_coroutine() {
            let (resume, destroy) = split_coroutine(func, &context, &layout)
                .map_err(|msg| JitError::transform(&unit_name, format!("@{}: {}", func.name, msg)))?;
            split_off.push(resume);
            split_off.push(destroy);
        }
    }
    unit.functions.extend(split_off);

    for func in &mut unit.functions {
        lower_handle_ops(func, pointer)
            .map_err(|msg| JitError::transform(&unit_name, format!("@{}: {}", func.name, msg)))?;
    }
    Ok(())
}

/// Appends instructions to a list, allocating result values in `func`.
struct Emitter<'f> {
    func: &'f mut Function,
    out: Vec<Inst>,
}

impl<'f> Emitter<'f> {
    fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            out: Vec::new(),
        }
    }

    fn push(&mut self, kind: InstKind, ty: Option<Type>) -> Option<Value> {
        let result = ty.map(|ty| self.func.new_value(ty, ValueDef::Inst));
        self.out.push(Inst { result, kind });
        result
    }

    fn value(&mut self, kind: InstKind, ty: Type) -> Value {
        let v = self.func.new_value(ty, ValueDef::Inst);
        self.out.push(Inst {
            result: Some(v),
            kind,
        });
        v
    }

    fn iconst(&mut self, ty: Type, value: i64) -> Value {
        self.value(InstKind::Iconst { ty, value }, ty)
    }

    fn frame_addr(&mut self, base: Value, offset: i64) -> Value {
        if offset == 0 {
            return base;
        }
        let index = self.iconst(Type::I64, offset);
        self.value(
            InstKind::ElementPtr {
                base,
                pointee: Type::I8,
                index,
                field: None,
            },
            Type::Ptr,
        )
    }

    fn load(&mut self, ty: Type, base: Value, offset: i64) -> Value {
        let ptr = self.frame_addr(base, offset);
        self.value(InstKind::Load { ty, ptr }, ty)
    }

    fn store(&mut self, value: Value, base: Value, offset: i64) {
        let ptr = self.frame_addr(base, offset);
        self.push(InstKind::Store { value, ptr }, None);
    }

    fn finish(self) -> Vec<Inst> {
        self.out
    }
}

struct FrameLayout {
    pointer: i64,
    slots: BTreeMap<Value, i64>,
    size: i64,
}

impl FrameLayout {
    fn state_offset(&self) -> i64 {
        2 * self.pointer
    }
}

struct SuspendPoint {
    block: Block,
    is_final: bool,
    resume: Block,
    cleanup: Block,
}

fn split_coroutine(
    func: &mut Function,
    context: &Context,
    layout: &DataLayout,
) -> Result<(Function, Function), String> {
    if func.signature.ret != Some(Type::Ptr) {
        return Err("coroutine must return ptr".to_string());
    }
    for data in &func.blocks {
        if data.insts.iter().any(|i| matches!(i.kind, InstKind::Alloca { .. })) {
            return Err("stack allocation is not allowed in a coroutine".to_string());
        }
    }

    lower_free_and_end(func);
    let (mem, begin_pos) = remove_begin(func)?;

    let suspends = collect_suspends(func)?;
    let frame = plan_frame(func, mem, context, layout);
    for data in &mut func.blocks {
        for inst in &mut data.insts {
            if matches!(inst.kind, InstKind::Coro(CoroOp::Size)) {
                inst.kind = InstKind::Iconst {
                    ty: Type::I64,
                    value: frame.size,
                };
            }
        }
    }

    insert_spills(func, mem, begin_pos, &frame);

    let resume_name = format!("{}.resume", func.name);
    let destroy_name = format!("{}.destroy", func.name);

    let body = func.clone();

    // Ramp: header stores at the begin position, suspends return the handle.
    {
        let entry = func.entry_block();
        let old = std::mem::take(&mut func.block_mut(entry).insts);
        let mut em = Emitter::new(func);
        for (i, inst) in old.into_iter().enumerate() {
            if i == begin_pos {
                emit_header(&mut em, mem, &resume_name, &destroy_name, &frame);
            }
            em.out.push(inst);
        }
        if begin_pos >= em.out.len() {
            emit_header(&mut em, mem, &resume_name, &destroy_name, &frame);
        }
        let insts = em.finish();
        func.block_mut(entry).insts = insts;
    }
    for (index, point) in suspends.iter().enumerate() {
        lower_suspend(func, point, index as i64, mem, &frame, Some(mem));
    }

    let resume = build_clone(&body, &resume_name, mem, &suspends, &frame, |p| p.resume);
    let destroy = build_clone(&body, &destroy_name, mem, &suspends, &frame, |p| p.cleanup);

    debug!(
        coroutine = func.name.as_str(),
        frame_size = frame.size,
        spills = frame.slots.len(),
        suspend_points = suspends.len(),
        "coroutine split"
    );
    Ok((resume, destroy))
}

fn emit_header(em: &mut Emitter<'_>, mem: Value, resume: &str, destroy: &str, frame: &FrameLayout) {
    let r = em.value(InstKind::FuncAddr(resume.to_string()), Type::Ptr);
    em.store(r, mem, 0);
    let d = em.value(InstKind::FuncAddr(destroy.to_string()), Type::Ptr);
    em.store(d, mem, frame.pointer);
}

/// `coro.free h` becomes `h`, `coro.end` becomes `false`.
fn lower_free_and_end(func: &mut Function) {
    let mut subst: HashMap<Value, Value> = HashMap::new();
    for data in &mut func.blocks {
        data.insts.retain_mut(|inst| match inst.kind {
            InstKind::Coro(CoroOp::Free { handle }) => {
                if let Some(r) = inst.result {
                    subst.insert(r, handle);
                }
                false
            }
            InstKind::Coro(CoroOp::End { .. }) => {
                inst.kind = InstKind::Iconst {
                    ty: Type::I1,
                    value: 0,
                };
                true
            }
            _ => true,
        });
    }
    if !subst.is_empty() {
        func.map_all_operands(|v| subst.get(&v).copied().unwrap_or(v));
    }
}

/// Remove `coro.begin`, replacing its result with the frame memory.
fn remove_begin(func: &mut Function) -> Result<(Value, usize), String> {
    let entry = func.entry_block();
    let mut found = None;
    for b in func.block_ids() {
        for (i, inst) in func.block(b).insts.iter().enumerate() {
            if let InstKind::Coro(CoroOp::Begin { mem }) = inst.kind {
                if b != entry {
                    return Err("coro.begin must be in the entry block".to_string());
                }
                if found.is_some() {
                    return Err("coro.begin appears more than once".to_string());
                }
                found = Some((i, mem, inst.result));
            }
        }
    }
    let Some((pos, mem, result)) = found else {
        return Err("missing coro.begin".to_string());
    };

    func.block_mut(entry).insts.remove(pos);
    if let Some(hdl) = result {
        func.map_all_operands(|v| if v == hdl { mem } else { v });
    }
    Ok((mem, pos))
}

fn collect_suspends(func: &Function) -> Result<Vec<SuspendPoint>, String> {
    let mut points = Vec::new();
    for b in func.block_ids() {
        if let Some(Terminator::Suspend {
            is_final,
            resume,
            cleanup,
        }) = &func.block(b).terminator
        {
            for target in [*resume, *cleanup] {
                if !func.block(target).params.is_empty() {
                    return Err(format!("suspend target bb{} has parameters", target.index()));
                }
                if target == func.entry_block() {
                    return Err("suspend cannot target the entry block".to_string());
                }
            }
            points.push(SuspendPoint {
                block: b,
                is_final: *is_final,
                resume: *resume,
                cleanup: *cleanup,
            });
        }
    }
    Ok(points)
}

fn is_rematerializable(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::FuncAddr(_)
            | InstKind::GlobalAddr(_)
            | InstKind::Coro(CoroOp::Size)
    )
}

/// Block that defines each value, and the instruction for instruction results.
fn definitions(func: &Function) -> (HashMap<Value, Block>, HashMap<Value, InstKind>) {
    let mut def_block = HashMap::new();
    let mut def_inst = HashMap::new();
    let entry = func.entry_block();
    for p in &func.params {
        def_block.insert(*p, entry);
    }
    for b in func.block_ids() {
        let data = func.block(b);
        for p in &data.params {
            def_block.insert(*p, b);
        }
        for inst in &data.insts {
            if let Some(r) = inst.result {
                def_block.insert(r, b);
                def_inst.insert(r, inst.kind.clone());
            }
        }
    }
    (def_block, def_inst)
}

/// Values used outside their defining block, per using block.
fn cross_block_uses(func: &Function, mem: Value) -> BTreeMap<Block, BTreeSet<Value>> {
    let (def_block, _) = definitions(func);
    let mut uses: BTreeMap<Block, BTreeSet<Value>> = BTreeMap::new();
    for b in func.block_ids() {
        let data = func.block(b);
        let operands = data
            .insts
            .iter()
            .flat_map(|i| i.kind.operands())
            .chain(data.terminator.iter().flat_map(|t| t.operands()));
        for v in operands {
            if v == mem {
                continue;
            }
            if def_block.get(&v).is_some_and(|d| *d != b) {
                uses.entry(b).or_default().insert(v);
            }
        }
    }
    uses
}

fn plan_frame(func: &Function, mem: Value, context: &Context, layout: &DataLayout) -> FrameLayout {
    let pointer = layout.pointer_bytes() as i64;
    let (_, def_inst) = definitions(func);
    let spilled: BTreeSet<Value> = cross_block_uses(func, mem)
        .into_values()
        .flatten()
        .filter(|v| !def_inst.get(v).is_some_and(is_rematerializable))
        .collect();

    let mut offset = (2 * pointer + 4) as u64;
    let mut align = pointer as u64;
    let mut slots = BTreeMap::new();
    for v in spilled {
        let ty = func.value_type(v);
        let a = context.align_of(ty, layout);
        offset = align_to(offset, a);
        slots.insert(v, offset as i64);
        offset += context.size_of(ty, layout);
        align = align.max(a);
    }

    FrameLayout {
        pointer,
        slots,
        size: align_to(offset, align) as i64,
    }
}

/// Store spilled values after their definitions and reload them at the top
/// of every block that uses them.
fn insert_spills(func: &mut Function, mem: Value, begin_pos: usize, frame: &FrameLayout) {
    let uses = cross_block_uses(func, mem);
    let (_, def_inst) = definitions(func);
    let entry = func.entry_block();

    for b in func.block_ids().collect::<Vec<_>>() {
        let old = std::mem::take(&mut func.block_mut(b).insts);
        let params = func.block(b).params.clone();
        let mut em = Emitter::new(func);
        let mut local: HashMap<Value, Value> = HashMap::new();

        if let Some(values) = uses.get(&b) {
            for v in values {
                let reloaded = match frame.slots.get(v) {
                    Some(offset) => {
                        let ty = em.func.value_type(*v);
                        em.load(ty, mem, *offset)
                    }
                    None => match def_inst.get(v) {
                        Some(kind) => {
                            let ty = em.func.value_type(*v);
                            em.value(kind.clone(), ty)
                        }
                        None => continue,
                    },
                };
                local.insert(*v, reloaded);
            }
        }

        for p in &params {
            if let Some(offset) = frame.slots.get(p) {
                em.store(*p, mem, *offset);
            }
        }

        let mut pending: Vec<Value> = Vec::new();
        if b == entry {
            pending.extend(em.func.params.iter().filter(|p| frame.slots.contains_key(*p)));
        }

        let count = old.len();
        for (i, mut inst) in old.into_iter().enumerate() {
            if b == entry && i == begin_pos {
                for v in pending.drain(..) {
                    em.store(v, mem, frame.slots[&v]);
                }
            }
            inst.kind.map_operands(|v| local.get(&v).copied().unwrap_or(v));
            let spilled = inst.result.filter(|r| frame.slots.contains_key(r));
            em.out.push(inst);
            if let Some(r) = spilled {
                if b == entry && i < begin_pos {
                    pending.push(r);
                } else {
                    em.store(r, mem, frame.slots[&r]);
                }
            }
        }
        if b == entry && begin_pos >= count {
            for v in pending.drain(..) {
                em.store(v, mem, frame.slots[&v]);
            }
        }

        let insts = em.finish();
        let data = func.block_mut(b);
        data.insts = insts;
        if let Some(term) = &mut data.terminator {
            term.map_operands(|v| local.get(&v).copied().unwrap_or(v));
        }
    }
}

/// Replace a suspend terminator: save the index, clear the resume slot on a
/// final suspend, and return.
fn lower_suspend(
    func: &mut Function,
    point: &SuspendPoint,
    index: i64,
    handle: Value,
    frame: &FrameLayout,
    ret: Option<Value>,
) {
    let mut em = Emitter::new(func);
    let state = em.iconst(Type::I32, index);
    em.store(state, handle, frame.state_offset());
    if point.is_final {
        let null = em.iconst(Type::Ptr, 0);
        em.store(null, handle, 0);
    }
    let insts = em.finish();
    let data = func.block_mut(point.block);
    data.insts.extend(insts);
    data.terminator = Some(Terminator::Return(ret));
}

fn build_clone(
    body: &Function,
    name: &str,
    mem: Value,
    suspends: &[SuspendPoint],
    frame: &FrameLayout,
    target: impl Fn(&SuspendPoint) -> Block,
) -> Function {
    let mut clone = body.clone();
    clone.name = name.to_string();
    clone.signature = Signature::new(vec![Type::Ptr], None);
    clone.linkage = Linkage::Internal;
    let handle = clone.new_value(Type::Ptr, ValueDef::Param(0));
    clone.params = vec![handle];
    clone.map_all_operands(|v| if v == mem { handle } else { v });

    for data in &mut clone.blocks {
        if let Some(Terminator::Return(_)) = data.terminator {
            data.terminator = Some(Terminator::Return(None));
        }
    }
    for (index, point) in suspends.iter().enumerate() {
        lower_suspend(&mut clone, point, index as i64, handle, frame, None);
    }

    let unreachable = clone.add_block("coro.unreachable");
    clone.block_mut(unreachable).terminator = Some(Terminator::Trap);

    let entry = clone.entry_block();
    let mut em = Emitter::new(&mut clone);
    let state = em.load(Type::I32, handle, frame.state_offset());
    let insts = em.finish();
    let cases: Vec<(i64, Block)> = suspends
        .iter()
        .enumerate()
        .map(|(i, p)| (i as i64, target(p)))
        .collect();

    let dispatch = clone.block_mut(entry);
    dispatch.name = "coro.dispatch".to_string();
    dispatch.insts = insts;
    dispatch.terminator = Some(Terminator::Switch {
        value: state,
        cases,
        default: unreachable,
    });
    clone
}

/// Lower `coro.resume`, `coro.destroy` and `coro.done` to frame accesses.
fn lower_handle_ops(func: &mut Function, pointer: i64) -> Result<(), String> {
    let resume_sig = Signature::new(vec![Type::Ptr], None);
    for b in func.block_ids().collect::<Vec<_>>() {
        let old = std::mem::take(&mut func.block_mut(b).insts);
        if !old.iter().any(|i| matches!(i.kind, InstKind::Coro(_))) {
            func.block_mut(b).insts = old;
            continue;
        }

        let mut em = Emitter::new(func);
        for inst in old {
            match inst.kind {
                InstKind::Coro(CoroOp::Resume { handle }) | InstKind::Coro(CoroOp::Destroy { handle }) => {
                    let offset = match inst.kind {
                        InstKind::Coro(CoroOp::Resume { .. }) => 0,
                        _ => pointer,
                    };
                    let callee = em.load(Type::Ptr, handle, offset);
                    em.push(
                        InstKind::CallIndirect {
                            signature: resume_sig.clone(),
                            callee,
                            args: vec![handle],
                        },
                        None,
                    );
                }
                InstKind::Coro(CoroOp::Done { handle }) => {
                    let resume = em.load(Type::Ptr, handle, 0);
                    let null = em.iconst(Type::Ptr, 0);
                    em.out.push(Inst {
                        result: inst.result,
                        kind: InstKind::Icmp {
                            pred: IntPredicate::Eq,
                            lhs: resume,
                            rhs: null,
                        },
                    });
                }
                InstKind::Coro(ref op) => {
                    return Err(format!("{:?} used outside a coroutine body", op));
                }
                _ => em.out.push(inst),
            }
        }
        let insts = em.finish();
        func.block_mut(b).insts = insts;
    }
    Ok(())
}

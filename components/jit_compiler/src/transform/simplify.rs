//! Function-level cleanups: constant folding, branch folding, dead code and
//! unreachable block elimination.

use std::collections::{HashMap, HashSet};

use jit_ir::{
    BinaryOp, Block, BlockCall, CastOp, Function, InstKind, IntPredicate, Terminator, Type, Value,
    ValueDef,
};

/// Run every cleanup until nothing changes. Returns true if the body changed.
pub fn simplify_function(func: &mut Function) -> bool {
    if func.blocks.is_empty() {
        return false;
    }
    let mut changed = false;
    loop {
        let mut round = fold_constants(func);
        round |= fold_branches(func);
        round |= remove_unreachable_blocks(func);
        round |= eliminate_dead_code(func);
        if !round {
            return changed;
        }
        changed = true;
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn unsigned(value: i64, bits: u32) -> u64 {
    value as u64 & mask(bits)
}

/// Two's-complement value of the low `bits`; an `i1` 1 is -1.
fn signed(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

fn eval_binary(op: BinaryOp, ty: Type, lhs: i64, rhs: i64) -> Option<i64> {
    let bits = ty.int_bits()?;
    let shift = (unsigned(rhs, bits) as u32) & bits.saturating_sub(1);
    let (sl, sr) = (signed(lhs, bits), signed(rhs, bits));
    let value = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::SDiv => {
            if sr == 0 || (sr == -1 && sl == signed(1i64 << (bits - 1), bits)) {
                return None;
            }
            sl.wrapping_div(sr)
        }
        BinaryOp::SRem => {
            if sr == 0 || sr == -1 {
                return None;
            }
            sl.wrapping_rem(sr)
        }
        BinaryOp::UDiv => {
            let r = unsigned(rhs, bits);
            if r == 0 {
                return None;
            }
            (unsigned(lhs, bits) / r) as i64
        }
        BinaryOp::URem => {
            let r = unsigned(rhs, bits);
            if r == 0 {
                return None;
            }
            (unsigned(lhs, bits) % r) as i64
        }
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl => lhs.wrapping_shl(shift),
        BinaryOp::LShr => (unsigned(lhs, bits) >> shift) as i64,
        BinaryOp::AShr => sl >> shift,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => return None,
    };
    Some(ty.wrap_int(value))
}

fn eval_icmp(pred: IntPredicate, ty: Type, lhs: i64, rhs: i64) -> Option<bool> {
    let bits = ty.int_bits()?;
    let (ul, ur) = (unsigned(lhs, bits), unsigned(rhs, bits));
    let (sl, sr) = (signed(lhs, bits), signed(rhs, bits));
    Some(match pred {
        IntPredicate::Eq => ul == ur,
        IntPredicate::Ne => ul != ur,
        IntPredicate::Slt => sl < sr,
        IntPredicate::Sle => sl <= sr,
        IntPredicate::Sgt => sl > sr,
        IntPredicate::Sge => sl >= sr,
        IntPredicate::Ult => ul < ur,
        IntPredicate::Ule => ul <= ur,
        IntPredicate::Ugt => ul > ur,
        IntPredicate::Uge => ul >= ur,
    })
}

fn eval_cast(op: CastOp, from: Type, to: Type, value: i64) -> Option<i64> {
    let from_bits = from.int_bits()?;
    to.int_bits()?;
    Some(match op {
        CastOp::Zext => to.wrap_int(unsigned(value, from_bits) as i64),
        CastOp::Sext if from == Type::I1 => to.wrap_int(-(value & 1)),
        CastOp::Sext => to.wrap_int(value),
        CastOp::Trunc => to.wrap_int(value),
    })
}

fn resolve(subst: &HashMap<Value, Value>, mut v: Value) -> Value {
    while let Some(next) = subst.get(&v) {
        v = *next;
    }
    v
}

fn fold_constants(func: &mut Function) -> bool {
    let mut consts: HashMap<Value, i64> = HashMap::new();
    let mut subst: HashMap<Value, Value> = HashMap::new();
    let mut changed = false;

    for block in func.reverse_postorder() {
        let mut insts = std::mem::take(&mut func.block_mut(block).insts);
        for inst in &mut insts {
            if !subst.is_empty() {
                inst.kind.map_operands(|v| resolve(&subst, v));
            }
            let Some(result) = inst.result else {
                continue;
            };
            let folded = match &inst.kind {
                InstKind::Iconst { value, .. } => {
                    consts.insert(result, *value);
                    continue;
                }
                InstKind::Binary { op, lhs, rhs } => match (consts.get(lhs), consts.get(rhs)) {
                    (Some(&l), Some(&r)) => eval_binary(*op, func.value_type(result), l, r),
                    _ => None,
                },
                InstKind::Icmp { pred, lhs, rhs } => match (consts.get(lhs), consts.get(rhs)) {
                    (Some(&l), Some(&r)) => {
                        eval_icmp(*pred, func.value_type(*lhs), l, r).map(|b| b as i64)
                    }
                    _ => None,
                },
                InstKind::Cast { op, value, to } => match consts.get(value) {
                    Some(&v) => eval_cast(*op, func.value_type(*value), *to, v),
                    None => None,
                },
                InstKind::Select {
                    cond,
                    if_true,
                    if_false,
                } => {
                    if let Some(&c) = consts.get(cond) {
                        let chosen = if c & 1 == 1 { *if_true } else { *if_false };
                        subst.insert(result, chosen);
                        if let Some(&k) = consts.get(&chosen) {
                            consts.insert(result, k);
                        }
                        changed = true;
                    }
                    None
                }
                _ => None,
            };
            if let Some(value) = folded {
                let ty = func.value_type(result);
                inst.kind = InstKind::Iconst { ty, value };
                consts.insert(result, value);
                changed = true;
            }
        }
        func.block_mut(block).insts = insts;
    }

    if !subst.is_empty() {
        func.map_all_operands(|v| resolve(&subst, v));
    }

    for block in func.block_ids().collect::<Vec<_>>() {
        let Some(term) = func.block(block).terminator.clone() else {
            continue;
        };
        if let Terminator::Branch { cond, .. } | Terminator::Switch { value: cond, .. } = &term {
            if consts.contains_key(cond) {
                changed |= constant_terminator(func, block, &term, consts[cond]);
            }
        }
    }
    changed
}

fn constant_terminator(func: &mut Function, block: Block, term: &Terminator, value: i64) -> bool {
    let replacement = match term {
        Terminator::Branch {
            then_dest,
            else_dest,
            ..
        } => {
            if value & 1 == 1 {
                then_dest.clone()
            } else {
                else_dest.clone()
            }
        }
        Terminator::Switch {
            value: scrutinee,
            cases,
            default,
        } => {
            let ty = func.value_type(*scrutinee);
            let target = cases
                .iter()
                .find(|(case, _)| ty.wrap_int(*case) == value)
                .map(|(_, b)| *b)
                .unwrap_or(*default);
            BlockCall::new(target, Vec::new())
        }
        _ => return false,
    };
    func.block_mut(block).terminator = Some(Terminator::Jump(replacement));
    true
}

fn fold_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for data in &mut func.blocks {
        let Some(Terminator::Branch {
            then_dest,
            else_dest,
            ..
        }) = &data.terminator
        else {
            continue;
        };
        if then_dest == else_dest {
            data.terminator = Some(Terminator::Jump(then_dest.clone()));
            changed = true;
        }
    }
    changed
}

/// Delete blocks not reachable from the entry and renumber the rest.
pub fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let reachable: HashSet<Block> = func.reverse_postorder().into_iter().collect();
    if reachable.len() == func.blocks.len() {
        return false;
    }

    let mut remap: HashMap<Block, Block> = HashMap::new();
    let old_blocks = std::mem::take(&mut func.blocks);
    for (i, data) in old_blocks.into_iter().enumerate() {
        let old = Block::from_index(i as u32);
        if reachable.contains(&old) {
            remap.insert(old, Block::from_index(func.blocks.len() as u32));
            func.blocks.push(data);
        }
    }

    for index in 0..func.blocks.len() {
        let block = Block::from_index(index as u32);
        if let Some(term) = &mut func.blocks[index].terminator {
            term.map_blocks(|b| remap.get(&b).copied().unwrap_or(b));
        }
        let params = func.blocks[index].params.clone();
        for (i, p) in params.into_iter().enumerate() {
            if let Some(data) = func.value_data_mut(p) {
                data.def = ValueDef::BlockParam(block, i as u32);
            }
        }
    }
    true
}

fn eliminate_dead_code(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let mut used: HashSet<Value> = HashSet::new();
        for data in &func.blocks {
            for inst in &data.insts {
                used.extend(inst.kind.operands());
            }
            if let Some(term) = &data.terminator {
                used.extend(term.operands());
            }
        }

        let mut removed = false;
        for data in &mut func.blocks {
            let before = data.insts.len();
            data.insts.retain(|inst| match inst.result {
                Some(r) => used.contains(&r) || !inst.kind.is_pure(),
                None => true,
            });
            removed |= data.insts.len() != before;
        }
        if !removed {
            return changed;
        }
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jit_ir::{Builder, Linkage, Signature};

    #[test]
    fn test_folds_arithmetic_and_branch() {
        let mut f = Function::new("f", Signature::new(vec![], Some(Type::I32)), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            let yes = b.create_block("yes");
            let no = b.create_block("no");
            b.switch_to_block(entry);
            let a = b.iconst(Type::I32, 6);
            let c = b.iconst(Type::I32, 7);
            let m = b.mul(a, c);
            let k = b.iconst(Type::I32, 42);
            let eq = b.icmp(IntPredicate::Eq, m, k);
            b.branch(eq, yes, &[], no, &[]);
            b.switch_to_block(yes);
            b.ret(Some(m));
            b.switch_to_block(no);
            let z = b.iconst(Type::I32, 0);
            b.ret(Some(z));
        }
        assert!(simplify_function(&mut f));
        assert_eq!(f.blocks.len(), 2);
        let entry = f.block(Block::from_index(0));
        assert_eq!(entry.insts.len(), 1);
        assert_eq!(entry.insts[0].kind, InstKind::Iconst { ty: Type::I32, value: 42 });
        assert!(matches!(entry.terminator, Some(Terminator::Jump(_))));
        let ret_block = f.block(Block::from_index(1));
        assert!(matches!(ret_block.terminator, Some(Terminator::Return(Some(_)))));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut f = Function::new("f", Signature::new(vec![], Some(Type::I32)), Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            let a = b.iconst(Type::I32, 6);
            let z = b.iconst(Type::I32, 0);
            let d = b.binary(BinaryOp::SDiv, a, z);
            b.ret(Some(d));
        }
        simplify_function(&mut f);
        let insts = &f.block(Block::from_index(0)).insts;
        assert!(matches!(insts.last().map(|i| &i.kind), Some(InstKind::Binary { .. })));
    }

    #[test]
    fn test_eval_helpers() {
        assert_eq!(eval_binary(BinaryOp::Add, Type::I8, 127, 1), Some(-128));
        assert_eq!(eval_binary(BinaryOp::LShr, Type::I8, -1, 1), Some(127));
        assert_eq!(eval_icmp(IntPredicate::Ult, Type::I32, -1, 0), Some(false));
        assert_eq!(eval_cast(CastOp::Zext, Type::I8, Type::I32, -1), Some(255));
        assert_eq!(eval_cast(CastOp::Sext, Type::I1, Type::I32, 1), Some(-1));
    }

    #[test]
    fn test_i1_folds_as_one_bit() {
        assert_eq!(eval_binary(BinaryOp::Add, Type::I1, 1, 1), Some(0));
        assert_eq!(eval_binary(BinaryOp::Mul, Type::I1, 1, 1), Some(1));
        assert_eq!(eval_binary(BinaryOp::AShr, Type::I1, 1, 0), Some(1));
        // -1 / -1 overflows in one bit
        assert_eq!(eval_binary(BinaryOp::SDiv, Type::I1, 1, 1), None);
        assert_eq!(eval_icmp(IntPredicate::Slt, Type::I1, 1, 0), Some(true));
        assert_eq!(eval_icmp(IntPredicate::Sgt, Type::I1, 0, 1), Some(true));
        assert_eq!(eval_icmp(IntPredicate::Ugt, Type::I1, 1, 0), Some(true));
        assert_eq!(eval_icmp(IntPredicate::Eq, Type::I8, -1, 255), Some(true));
    }

    #[test]
    fn test_block_params_renumbered() {
        let mut f = Function::new("f", Signature::new(vec![Type::I32], Some(Type::I32)), Linkage::External);
        let param;
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            let dead = b.create_block("dead");
            let exit = b.create_block("exit");
            param = b.append_block_param(exit, Type::I32);
            b.switch_to_block(entry);
            let x = b.param(0);
            b.jump(exit, &[x]);
            b.switch_to_block(dead);
            b.trap();
            b.switch_to_block(exit);
            b.ret(Some(param));
        }
        assert!(remove_unreachable_blocks(&mut f));
        assert_eq!(
            f.value_data(param).map(|d| d.def),
            Some(ValueDef::BlockParam(Block::from_index(1), 0))
        );
    }
}

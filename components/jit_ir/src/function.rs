//! Functions, blocks and the value arena.

use std::collections::HashSet;

use crate::instruction::{Block, Inst, InstKind, Terminator, Value};
use crate::types::{Signature, Type};

/// Symbol visibility of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Published in the engine's symbol namespace
    External,
    /// Private to the defining unit
    Internal,
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    /// Function parameter `n`
    Param(u32),
    /// Parameter `n` of a block
    BlockParam(Block, u32),
    /// Result of an instruction
    Inst,
}

/// Arena entry for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueData {
    /// Value type
    pub ty: Type,
    /// Definition site
    pub def: ValueDef,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockData {
    /// Label used when printing
    pub name: String,
    /// Block parameters
    pub params: Vec<Value>,
    /// Body
    pub insts: Vec<Inst>,
    /// Terminator, `None` while the block is under construction
    pub terminator: Option<Terminator>,
}

/// A function definition.
///
/// Block 0 is the entry block. It has no parameters and no predecessors;
/// function arguments are the values in [`Function::params`].
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Symbol name
    pub name: String,
    /// Signature
    pub signature: Signature,
    /// Linkage
    pub linkage: Linkage,
    /// Argument values
    pub params: Vec<Value>,
    /// Blocks, entry first
    pub blocks: Vec<BlockData>,
    values: Vec<ValueData>,
}

impl Function {
    /// Create a function with no blocks
    pub fn new(name: impl Into<String>, signature: Signature, linkage: Linkage) -> Self {
        let mut func = Self {
            name: name.into(),
            signature,
            linkage,
            params: Vec::new(),
            blocks: Vec::new(),
            values: Vec::new(),
        };
        let param_types = func.signature.params.clone();
        for (i, ty) in param_types.into_iter().enumerate() {
            let v = func.new_value(ty, ValueDef::Param(i as u32));
            func.params.push(v);
        }
        func
    }

    /// Allocate a value in the arena
    pub fn new_value(&mut self, ty: Type, def: ValueDef) -> Value {
        let v = Value(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        v
    }

    /// Arena entry for `v`
    pub fn value_data(&self, v: Value) -> Option<&ValueData> {
        self.values.get(v.0 as usize)
    }

    /// Mutable arena entry for `v`
    pub fn value_data_mut(&mut self, v: Value) -> Option<&mut ValueData> {
        self.values.get_mut(v.0 as usize)
    }

    /// Type of `v`; unknown values read as `ptr`
    pub fn value_type(&self, v: Value) -> Type {
        self.value_data(v).map(|d| d.ty).unwrap_or(Type::Ptr)
    }

    /// Number of values in the arena
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Append an empty block
    pub fn add_block(&mut self, name: impl Into<String>) -> Block {
        let b = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.into(),
            ..BlockData::default()
        });
        b
    }

    /// Append a parameter to `block`
    pub fn add_block_param(&mut self, block: Block, ty: Type) -> Value {
        let index = self.blocks[block.0 as usize].params.len() as u32;
        let v = self.new_value(ty, ValueDef::BlockParam(block, index));
        self.blocks[block.0 as usize].params.push(v);
        v
    }

    /// The entry block
    pub fn entry_block(&self) -> Block {
        Block(0)
    }

    /// Block data
    pub fn block(&self, b: Block) -> &BlockData {
        &self.blocks[b.0 as usize]
    }

    /// Mutable block data
    pub fn block_mut(&mut self, b: Block) -> &mut BlockData {
        &mut self.blocks[b.0 as usize]
    }

    /// All block handles in order
    pub fn block_ids(&self) -> impl Iterator<Item = Block> {
        (0..self.blocks.len() as u32).map(Block)
    }

    /// Successors of `b`
    pub fn successors(&self, b: Block) -> Vec<Block> {
        self.block(b)
            .terminator
            .as_ref()
            .map(|t| t.successors())
            .unwrap_or_default()
    }

    /// Blocks reachable from the entry, in reverse post-order
    pub fn reverse_postorder(&self) -> Vec<Block> {
        if self.blocks.is_empty() {
            return Vec::new();
        }
        let mut visited = HashSet::new();
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry_block(), 0usize)];
        visited.insert(self.entry_block());

        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if (succ.0 as usize) < self.blocks.len() && visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        postorder
    }

    /// Number of instructions across all blocks
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len() + 1).sum()
    }

    /// True if the body contains suspend points
    pub fn is_coroutine(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b.terminator, Some(Terminator::Suspend { .. })))
    }

    /// True if any instruction is a coroutine primitive
    pub fn uses_coroutine_ops(&self) -> bool {
        self.is_coroutine()
            || self
                .blocks
                .iter()
                .flat_map(|b| b.insts.iter())
                .any(|i| matches!(i.kind, InstKind::Coro(_)))
    }

    /// Names of functions called directly
    pub fn direct_callees(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter_map(|i| match &i.kind {
                InstKind::Call { callee, .. } => Some(callee.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rewrite every value operand in the body through `f`
    pub fn map_all_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                inst.kind.map_operands(&mut f);
            }
            if let Some(term) = &mut block.terminator {
                term.map_operands(&mut f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BlockCall;

    #[test]
    fn test_params_allocated() {
        let f = Function::new(
            "f",
            Signature::new(vec![Type::I32, Type::Ptr], None),
            Linkage::External,
        );
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.value_type(f.params[1]), Type::Ptr);
        assert_eq!(f.value_data(f.params[0]).map(|d| d.def), Some(ValueDef::Param(0)));
    }

    #[test]
    fn test_reverse_postorder_skips_unreachable() {
        let mut f = Function::new("f", Signature::default(), Linkage::Internal);
        let entry = f.add_block("entry");
        let a = f.add_block("a");
        let dead = f.add_block("dead");
        f.block_mut(entry).terminator = Some(Terminator::Jump(BlockCall::new(a, vec![])));
        f.block_mut(a).terminator = Some(Terminator::Return(None));
        f.block_mut(dead).terminator = Some(Terminator::Jump(BlockCall::new(a, vec![])));
        assert_eq!(f.reverse_postorder(), vec![entry, a]);
    }
}

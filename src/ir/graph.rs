use super::{BasicBlock, BlockFlags, BlockId, FrameLayout, Inst, InstFlags, InstId, Opcode, Reg};
use crate::program::{CatchEntry, SourceLanguage, TypeRef};
use std::collections::{BTreeMap, HashSet};

/// Protected range of bytecode, as recovered from the exception table
#[derive(Clone, Debug)]
pub struct TryRegion {
    pub begin_pc: u32,
    pub end_pc: u32,

    /// Handlers, in the order they are tried
    pub catches: Vec<CatchEntry>,

    /// Catch-begin block of each handler (parallel to `catches`)
    pub catch_begins: Vec<BlockId>,

    /// Marker blocks, only present if the region contains an instruction that can throw
    pub try_begin: Option<BlockId>,
    pub try_end: Option<BlockId>,
}

impl TryRegion {
    pub fn contains_pc(&self, pc: u32) -> bool {
        self.begin_pc <= pc && pc < self.end_pc
    }

    /// Was this region kept when building the graph?
    pub fn is_live(&self) -> bool {
        self.try_begin.is_some()
    }

    /// Distinct catch-begin blocks, in handler order
    pub fn handler_blocks(&self) -> Vec<BlockId> {
        let mut seen = HashSet::new();
        self.catch_begins
            .iter()
            .copied()
            .filter(|block| seen.insert(*block))
            .collect()
    }
}

/// Type annotations travelling alongside the graph
#[derive(Clone, Default, Debug)]
pub struct TypeSideChannel {
    pub args: BTreeMap<u16, TypeRef>,
    pub insts: BTreeMap<InstId, TypeRef>,
}

impl TypeSideChannel {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.insts.is_empty()
    }
}

/// Instruction graph of one function
///
/// Blocks and instructions live in two arenas and refer to each other by index. Nothing is ever
/// deallocated: removed blocks and instructions are only flagged as such, so indices stay stable
/// for the lifetime of the graph.
#[derive(Clone, Debug)]
pub struct Graph {
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Inst>,
    pub start: BlockId,
    pub end: Option<BlockId>,
    pub frame: FrameLayout,
    pub try_regions: Vec<TryRegion>,
    pub types: TypeSideChannel,
    pub language: SourceLanguage,
}

impl Graph {
    /// Empty graph with only a start block
    pub fn new(frame: FrameLayout, language: SourceLanguage) -> Graph {
        Graph {
            blocks: vec![BasicBlock::new(None, BlockFlags::START)],
            insts: vec![],
            start: BlockId(0),
            end: None,
            frame,
            try_regions: vec![],
            types: TypeSideChannel::default(),
            language,
        }
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.0]
    }

    /// Blocks that have not been removed, in creation order
    pub fn live_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len())
            .map(BlockId)
            .filter(move |id| !self.block(*id).is_removed())
    }

    /// Instructions of live blocks (phis first in each block), in creation order of the blocks
    pub fn live_insts(&self) -> Vec<InstId> {
        self.live_blocks()
            .flat_map(|block| self.block(block).all_insts().collect::<Vec<_>>())
            .collect()
    }

    pub fn add_block(&mut self, pc: Option<u32>, flags: BlockFlags) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(pc, flags));
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).succs.push(to);
        self.block_mut(to).preds.push(from);
    }

    /// Successors reached without an exception being thrown
    pub fn normal_succs(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .succs
            .iter()
            .copied()
            .filter(|succ| !self.block(*succ).is_catch_begin())
            .collect()
    }

    /// Successor control goes to when the block does not branch
    ///
    /// This is the fallthrough of a conditional branch, or the only normal successor otherwise.
    pub fn fallthrough_succ(&self, block: BlockId) -> Option<BlockId> {
        let succs = self.normal_succs(block);
        if self.ends_with_branch(block) {
            succs.get(1).copied()
        } else {
            succs.first().copied()
        }
    }

    /// Does the block end in a conditional branch?
    pub fn ends_with_branch(&self, block: BlockId) -> bool {
        self.block(block)
            .insts
            .last()
            .map_or(false, |inst| {
                matches!(self.inst(*inst).opcode, Opcode::If(_) | Opcode::IfImm(_))
            })
    }

    /// Insert an empty block on the edge `from -> succs[succ_idx]`
    ///
    /// The new block replaces `from` in the predecessors of the old successor, at the same
    /// position, so phi inputs stay aligned.
    pub fn split_edge(&mut self, from: BlockId, succ_idx: usize, flags: BlockFlags) -> BlockId {
        let to = self.block(from).succs[succ_idx];
        let pc = self.block(to).pc;
        let new = self.add_block(pc, flags);
        self.blocks[from.0].succs[succ_idx] = new;
        let pred_idx = self
            .block(to)
            .preds
            .iter()
            .position(|pred| *pred == from)
            .unwrap_or_else(|| unreachable!("{:?} is not a predecessor of {:?}", from, to));
        self.blocks[to.0].preds[pred_idx] = new;
        self.blocks[new.0].preds.push(from);
        self.blocks[new.0].succs.push(to);
        new
    }

    /// Insert an empty block in front of `block`, taking over all of its incoming edges
    pub fn insert_block_before(&mut self, block: BlockId, flags: BlockFlags) -> BlockId {
        let pc = self.block(block).pc;
        let new = self.add_block(pc, flags);
        let preds = std::mem::take(&mut self.blocks[block.0].preds);
        for pred in &preds {
            for succ in self.blocks[pred.0].succs.iter_mut() {
                if *succ == block {
                    *succ = new;
                }
            }
        }
        self.blocks[new.0].preds = preds;
        self.add_edge(new, block);
        new
    }

    /// Remove the predecessor at `pred_idx`, along with the matching phi inputs
    pub fn remove_pred(&mut self, block: BlockId, pred_idx: usize) {
        self.blocks[block.0].preds.remove(pred_idx);
        for phi in self.block(block).phis.clone() {
            if matches!(self.inst(phi).opcode, Opcode::Phi) {
                self.remove_input(phi, pred_idx);
            }
        }
    }

    /// Flag a block as removed, dropping its edges and instructions
    pub fn remove_block(&mut self, block: BlockId) {
        for succ in std::mem::take(&mut self.blocks[block.0].succs) {
            while let Some(idx) = self.block(succ).preds.iter().position(|p| *p == block) {
                self.remove_pred(succ, idx);
            }
        }
        for inst in self.block(block).all_insts().collect::<Vec<_>>() {
            self.clear_inputs(inst);
            self.inst_mut(inst).flags.insert(InstFlags::REMOVED);
        }
        let removed = &mut self.blocks[block.0];
        removed.preds.clear();
        removed.phis.clear();
        removed.insts.clear();
        removed.flags.insert(BlockFlags::REMOVED);
        if self.end == Some(block) {
            self.end = None;
        }
    }

    /// Create an instruction without placing it in its block
    pub fn create_inst(&mut self, opcode: Opcode, block: BlockId, pc: Option<u32>) -> InstId {
        let id = InstId(self.insts.len());
        self.insts.push(Inst::new(opcode, block, pc));
        id
    }

    /// Create an instruction at the end of a block (or with the phis, for a phi)
    pub fn append_inst(&mut self, block: BlockId, opcode: Opcode, pc: Option<u32>) -> InstId {
        let is_phi = opcode.is_phi();
        let id = self.create_inst(opcode, block, pc);
        if is_phi {
            self.blocks[block.0].phis.push(id);
        } else {
            self.blocks[block.0].insts.push(id);
        }
        id
    }

    fn position(&self, inst: InstId) -> usize {
        let block = self.inst(inst).block;
        self.block(block)
            .insts
            .iter()
            .position(|i| *i == inst)
            .unwrap_or_else(|| unreachable!("{:?} is not placed in {:?}", inst, block))
    }

    /// Place an unplaced instruction right before another one
    pub fn insert_before(&mut self, anchor: InstId, inst: InstId) {
        let block = self.inst(anchor).block;
        let pos = self.position(anchor);
        self.blocks[block.0].insts.insert(pos, inst);
        self.inst_mut(inst).block = block;
    }

    /// Place an unplaced instruction right after another one
    ///
    /// If the anchor is a phi, the instruction goes before the first non-phi instruction.
    pub fn insert_after(&mut self, anchor: InstId, inst: InstId) {
        let block = self.inst(anchor).block;
        let pos = if self.inst(anchor).opcode.is_phi() {
            0
        } else {
            self.position(anchor) + 1
        };
        self.blocks[block.0].insts.insert(pos, inst);
        self.inst_mut(inst).block = block;
    }

    /// Place an unplaced instruction at the end of a block, but before its branch, if any
    pub fn insert_at_end(&mut self, block: BlockId, inst: InstId) {
        let insts = &self.blocks[block.0].insts;
        let pos = match insts.last() {
            Some(last) if self.insts[last.0].opcode.is_terminator() => insts.len() - 1,
            _ => insts.len(),
        };
        self.blocks[block.0].insts.insert(pos, inst);
        self.inst_mut(inst).block = block;
    }

    /// Move a placed instruction right before another one (possibly in another block)
    pub fn move_before(&mut self, anchor: InstId, inst: InstId) {
        let from = self.inst(inst).block;
        let pos = self.position(inst);
        self.blocks[from.0].insts.remove(pos);
        self.insert_before(anchor, inst);
    }

    pub fn add_input(&mut self, inst: InstId, input: InstId, src: Reg) {
        debug_assert!(!self.inst(input).is_removed(), "input {:?} was removed", input);
        let node = self.inst_mut(inst);
        node.inputs.push(input);
        node.src.push(src);
        self.inst_mut(input).users.push(inst);
    }

    /// Replace the input at `idx`
    pub fn set_input(&mut self, inst: InstId, idx: usize, input: InstId) {
        let old = self.inst(inst).inputs[idx];
        self.drop_user(old, inst);
        self.inst_mut(inst).inputs[idx] = input;
        self.inst_mut(input).users.push(inst);
    }

    pub fn remove_input(&mut self, inst: InstId, idx: usize) {
        let old = self.inst(inst).inputs[idx];
        self.drop_user(old, inst);
        let node = self.inst_mut(inst);
        node.inputs.remove(idx);
        node.src.remove(idx);
    }

    fn clear_inputs(&mut self, inst: InstId) {
        for input in std::mem::take(&mut self.inst_mut(inst).inputs) {
            self.drop_user(input, inst);
        }
        self.inst_mut(inst).src.clear();
    }

    fn drop_user(&mut self, input: InstId, user: InstId) {
        let users = &mut self.inst_mut(input).users;
        if let Some(pos) = users.iter().position(|u| *u == user) {
            users.swap_remove(pos);
        }
    }

    /// Swap the two inputs of a (commutative) instruction
    pub fn swap_inputs(&mut self, inst: InstId) {
        let node = self.inst_mut(inst);
        debug_assert_eq!(node.inputs.len(), 2);
        node.inputs.swap(0, 1);
        node.src.swap(0, 1);
    }

    /// Make every user of `old` use `new` instead
    pub fn replace_uses(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        for user in std::mem::take(&mut self.inst_mut(old).users) {
            for idx in 0..self.inst(user).inputs.len() {
                if self.inst(user).inputs[idx] == old {
                    self.inst_mut(user).inputs[idx] = new;
                    self.inst_mut(new).users.push(user);
                }
            }
        }
        if let Some(typ) = self.types.insts.remove(&old) {
            self.types.insts.entry(new).or_insert(typ);
        }
    }

    /// Remove an instruction that no longer has users
    pub fn remove_inst(&mut self, inst: InstId) {
        assert!(
            self.inst(inst).users.is_empty(),
            "removing {:?}, which is still used by {:?}",
            inst,
            self.inst(inst).users
        );
        self.clear_inputs(inst);
        let block = self.inst(inst).block;
        let block = &mut self.blocks[block.0];
        block.phis.retain(|i| *i != inst);
        block.insts.retain(|i| *i != inst);
        self.inst_mut(inst).flags.insert(InstFlags::REMOVED);
        self.types.insts.remove(&inst);
    }

    /// Distinct users of an instruction
    pub fn distinct_users(&self, inst: InstId) -> Vec<InstId> {
        let mut seen = HashSet::new();
        self.inst(inst)
            .users
            .iter()
            .copied()
            .filter(|user| seen.insert(*user))
            .collect()
    }

    pub fn has_catch_phi_user(&self, inst: InstId) -> bool {
        self.inst(inst)
            .users
            .iter()
            .any(|user| matches!(self.inst(*user).opcode, Opcode::CatchPhi { .. }))
    }

    /// Order in which blocks are laid out in the output
    ///
    /// The start block comes first, then blocks sorted by program counter, with the marker
    /// blocks sharing a program counter ordered as
    ///
    ///   1. try-end blocks (innermost region first)
    ///   2. catch-begin blocks
    ///   3. try-begin blocks (outermost region first)
    ///   4. the code block
    ///
    /// and finally the blocks created when splitting edges. The end block has no code and is left
    /// out. This keeps every try region contiguous.
    pub fn linear_order(&self) -> Vec<BlockId> {
        let mut placed: Vec<(u32, u8, i64, BlockId)> = vec![];
        let mut split: Vec<BlockId> = vec![];
        for id in self.live_blocks() {
            let block = self.block(id);
            if id == self.start || Some(id) == self.end {
                continue;
            }
            if block.flags.contains(BlockFlags::SPLIT) {
                split.push(id);
                continue;
            }
            let pc = block.pc.unwrap_or(u32::MAX);
            let region = |pick: fn(&TryRegion) -> Option<BlockId>| {
                self.try_regions
                    .iter()
                    .find(|region| pick(region) == Some(id))
            };
            let key = if block.flags.contains(BlockFlags::TRY_END) {
                let begin = region(|r| r.try_end).map_or(0, |r| r.begin_pc);
                (0, -(begin as i64))
            } else if block.flags.contains(BlockFlags::CATCH_BEGIN) {
                (1, 0)
            } else if block.flags.contains(BlockFlags::TRY_BEGIN) {
                let end = region(|r| r.try_begin).map_or(0, |r| r.end_pc);
                (2, -(end as i64))
            } else {
                (3, 0)
            };
            placed.push((pc, key.0, key.1, id));
        }
        placed.sort_by_key(|(pc, rank, nesting, id)| (*pc, *rank, *nesting, *id));

        let mut order = vec![self.start];
        order.extend(placed.into_iter().map(|(_, _, _, id)| id));
        order.extend(split);
        order
    }
}

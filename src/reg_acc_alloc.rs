//! Accumulator allocation
//!
//! Most instructions read one operand from the accumulator and write their result to it, so a
//! value produced right before the instruction consuming it never needs a register. This pass
//! finds those values and assigns them [`ACC_REG`]. Every other value is left for the general
//! register allocator.
//!
//! ### Eligibility
//!
//! A value that writes the accumulator can stay there when all of its users:
//!
//!   - read it in their accumulator position (possibly after swapping the operands of a
//!     commutative operation)
//!   - are reached by walking forward from the definition, through single-successor edges into
//!     blocks with a single predecessor
//!   - are not separated from the definition by anything else using the accumulator
//!
//! The walk deliberately gives up at control flow joins instead of analyzing them.
//!
//! A phi can live in the accumulator when each of its inputs is computed last thing in the
//! corresponding predecessor, and its users are eligible as above starting at the top of its
//! block.
//!
//! ### Output
//!
//! Values in the accumulator get `dst == ACC_REG`, and their uses `src == ACC_REG`. Accumulator
//! operands that stay in a register are flagged with [`InstFlags::NEEDS_ACC_LOAD`], so that
//! code generation emits an `lda` before the instruction.

use crate::ir::{BlockId, Dump, Graph, InstFlags, InstId, Opcode, ACC_REG, INVALID_REG};
use log::{debug, trace};
use std::collections::HashSet;

/// Use of a value in the accumulator position of an instruction
struct AccUse {
    user: InstId,

    /// Operands of the (commutative) user must be swapped first
    swap: bool,
}

pub struct RegAccAlloc<'g> {
    graph: &'g mut Graph,

    /// Instructions whose accumulator operand has already been decided
    claimed: HashSet<InstId>,
}

impl<'g> RegAccAlloc<'g> {
    pub fn new(graph: &'g mut Graph) -> RegAccAlloc<'g> {
        RegAccAlloc {
            graph,
            claimed: HashSet::new(),
        }
    }

    /// Decide which values live in the accumulator, returning how many do
    pub fn run(mut self) -> usize {
        self.reset_registers();
        let order = self.graph.linear_order();

        let mut placed = 0;
        for block in &order {
            let block_insts: Vec<InstId> = self.graph.block(*block).all_insts().collect();
            for (idx, inst) in block_insts.iter().enumerate() {
                if self.try_place_writer(*block, idx, *inst) {
                    placed += 1;
                }
            }
        }
        for block in &order {
            for phi in self.graph.block(*block).phis.clone() {
                if self.try_place_phi(*block, phi) {
                    placed += 1;
                    break;
                }
            }
        }
        self.flag_acc_loads();

        debug!("accumulator allocation: {} values in the accumulator", placed);
        trace!("after accumulator allocation:\n{}", Dump(self.graph));
        placed
    }

    /// Forget the registers the graph was built with (arguments stay where they are)
    fn reset_registers(&mut self) {
        for inst in self.graph.live_insts() {
            let node = self.graph.inst_mut(inst);
            if !matches!(node.opcode, Opcode::Parameter(_)) {
                node.dst = INVALID_REG;
            }
            for src in node.src.iter_mut() {
                *src = INVALID_REG;
            }
            node.flags.remove(InstFlags::NEEDS_ACC_LOAD);
        }
    }

    /// Check that every user reads the value in its accumulator position
    fn acc_uses(&self, value: InstId) -> Option<Vec<AccUse>> {
        let mut uses = vec![];
        for user in self.graph.distinct_users(value) {
            if self.claimed.contains(&user) {
                return None;
            }
            let node = self.graph.inst(user);
            let acc_idx = node.opcode.acc_read_index()?;
            let positions: Vec<usize> = node
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, input)| **input == value)
                .map(|(idx, _)| idx)
                .collect();
            if positions == [acc_idx] {
                uses.push(AccUse { user, swap: false });
            } else if positions == [0] && acc_idx == 1 && node.opcode.is_commutative() {
                uses.push(AccUse { user, swap: true });
            } else {
                return None;
            }
        }
        Some(uses)
    }

    /// Walk forward from `insts[start]` of `block` and check that all users are reached before
    /// anything else touches the accumulator
    fn reaches_users(&self, mut block: BlockId, mut start: usize, users: &[AccUse]) -> bool {
        let mut pending: HashSet<InstId> = users.iter().map(|acc_use| acc_use.user).collect();
        if pending.is_empty() {
            return true;
        }
        let mut visited: HashSet<BlockId> = HashSet::new();
        loop {
            visited.insert(block);
            for inst in self.graph.block(block).insts.iter().skip(start) {
                let opcode = &self.graph.inst(*inst).opcode;
                if pending.remove(inst) {
                    if pending.is_empty() {
                        return true;
                    }
                    if opcode.writes_acc() {
                        return false;
                    }
                } else if opcode.touches_acc() {
                    return false;
                }
            }

            match self.graph.normal_succs(block).as_slice() {
                [succ] if self.graph.block(*succ).preds.len() == 1 && !visited.contains(succ) => {
                    block = *succ;
                    start = 0;
                }
                _ => return false,
            }
        }
    }

    fn commit(&mut self, value: InstId, uses: Vec<AccUse>) {
        self.graph.inst_mut(value).dst = ACC_REG;
        for AccUse { user, swap } in uses {
            if swap {
                self.graph.swap_inputs(user);
            }
            let node = self.graph.inst_mut(user);
            if let Some(acc_idx) = node.opcode.acc_read_index() {
                node.src[acc_idx] = ACC_REG;
            }
            self.claimed.insert(user);
        }
    }

    /// `idx` is the position of the instruction among the phis and instructions of the block
    fn try_place_writer(&mut self, block: BlockId, idx: usize, inst: InstId) -> bool {
        let node = self.graph.inst(inst);
        if !node.opcode.writes_acc() || self.graph.has_catch_phi_user(inst) {
            return false;
        }
        let uses = match self.acc_uses(inst) {
            Some(uses) => uses,
            None => return false,
        };

        // Catch-phis are at the top of their block, anything else is right before `start`
        let phis = self.graph.block(block).phis.len();
        let start = if idx < phis { 0 } else { idx - phis + 1 };
        if !self.reaches_users(block, start, &uses) {
            return false;
        }
        self.commit(inst, uses);
        true
    }

    fn try_place_phi(&mut self, block: BlockId, phi: InstId) -> bool {
        if self.graph.inst(phi).opcode != Opcode::Phi || self.graph.inst(phi).dst != INVALID_REG {
            return false;
        }

        let preds = self.graph.block(block).preds.clone();
        let inputs = self.graph.inst(phi).inputs.clone();
        for (pred, input) in preds.iter().zip(&inputs) {
            if !self.is_last_in_pred(*pred, *input, phi) {
                return false;
            }
        }
        let uses = match self.acc_uses(phi) {
            Some(uses) => uses,
            None => return false,
        };
        if !self.reaches_users(block, 0, &uses) {
            return false;
        }

        for input in &inputs {
            self.graph.inst_mut(*input).dst = ACC_REG;
        }
        for src in self.graph.inst_mut(phi).src.iter_mut() {
            *src = ACC_REG;
        }
        self.commit(phi, uses);
        true
    }

    /// Is `input` an accumulator writer used only by `phi`, left in the accumulator at the end of
    /// `pred`?
    fn is_last_in_pred(&self, pred: BlockId, input: InstId, phi: InstId) -> bool {
        let node = self.graph.inst(input);
        if !node.opcode.writes_acc()
            || node.dst != INVALID_REG
            || node.block != pred
            || node.users != [phi]
            || self.graph.normal_succs(pred).len() != 1
        {
            return false;
        }
        let insts = &self.graph.block(pred).insts;
        let after = match insts.iter().position(|inst| *inst == input) {
            Some(pos) => &insts[pos + 1..],
            None => return false,
        };
        after
            .iter()
            .all(|inst| !self.graph.inst(*inst).opcode.touches_acc())
    }

    fn flag_acc_loads(&mut self) {
        for inst in self.graph.live_insts() {
            let node = self.graph.inst_mut(inst);
            if let Some(acc_idx) = node.opcode.acc_read_index() {
                if node.src[acc_idx] != ACC_REG {
                    node.flags.insert(InstFlags::NEEDS_ACC_LOAD);
                }
            }
        }
    }
}

use super::cfg::RegionSpan;
use super::{BuildError, TypeMap};
use crate::analysis::Dominators;
use crate::ir::{
    BinaryOp, BlockFlags, BlockId, CallKind, ConstValue, Graph, InstFlags, InstId, Opcode, Reg,
    UnaryOp, ACC_REG,
};
use crate::isa::{self, BytecodeInstruction, Comparison, Imm, ZeroComparison};
use crate::util::{OffsetVec, SegmentTree};
use std::collections::BTreeMap;

/// Definition of every register (and the accumulator) at some point in the program
type Defs = Vec<Option<InstId>>;

/// Builds instructions in SSA form into an existing control flow graph
///
/// Registers are numbered as in the bytecode frame: locals, then arguments, then the accumulator
/// in the last slot. Blocks are visited in reverse post-order, so every predecessor of a block
/// has been visited first, except for loop back edges. Loop headers get a phi for every register
/// defined on entry, and their inputs are filled in once the whole function is built.
pub struct InstBuilder<'a> {
    graph: &'a mut Graph,
    insns: &'a OffsetVec<BytecodeInstruction>,
    block_insns: &'a BTreeMap<BlockId, Vec<usize>>,
    regions: &'a SegmentTree<RegionSpan>,
    types: &'a TypeMap,

    /// Number of definition slots (the accumulator being the last one)
    slots: usize,

    /// Definitions at the end of each visited block
    block_defs: Vec<Option<Defs>>,

    /// Catch-phi of every slot, for each catch-begin block
    catch_phis: BTreeMap<BlockId, Vec<InstId>>,

    /// Loop header phis still missing their inputs
    pending_phis: Vec<(InstId, usize)>,
}

impl<'a> InstBuilder<'a> {
    pub fn new(
        graph: &'a mut Graph,
        insns: &'a OffsetVec<BytecodeInstruction>,
        block_insns: &'a BTreeMap<BlockId, Vec<usize>>,
        regions: &'a SegmentTree<RegionSpan>,
        types: &'a TypeMap,
    ) -> InstBuilder<'a> {
        let slots = graph.frame.size() + 1;
        let blocks = graph.blocks.len();
        InstBuilder {
            graph,
            insns,
            block_insns,
            regions,
            types,
            slots,
            block_defs: vec![None; blocks],
            catch_phis: BTreeMap::new(),
            pending_phis: vec![],
        }
    }

    fn acc_slot(&self) -> usize {
        self.slots - 1
    }

    /// Register that a definition slot stands for
    fn slot_reg(&self, slot: usize) -> Reg {
        if slot == self.acc_slot() {
            ACC_REG
        } else {
            slot as Reg
        }
    }

    pub fn build(mut self, doms: &Dominators) -> Result<(), BuildError> {
        self.create_parameters();
        self.create_catch_phis();

        for block in doms.rpo().to_vec() {
            let mut defs = self.entry_defs(block);
            if let Some(members) = self.block_insns.get(&block) {
                for idx in members.clone() {
                    self.build_insn(block, idx, &mut defs)?;
                }
            }
            self.block_defs[block.0] = Some(defs);
        }

        self.fill_pending_phis()?;
        self.remove_trivial_phis();
        Ok(())
    }

    fn create_parameters(&mut self) {
        let start = self.graph.start;
        let mut defs: Defs = vec![None; self.slots];
        for arg in 0..self.graph.frame.args_num as u16 {
            let param = self.graph.append_inst(start, Opcode::Parameter(arg), None);
            let reg = self.graph.frame.arg_reg(arg);
            self.graph.inst_mut(param).dst = reg;
            defs[reg as usize] = Some(param);
            if let Some(typ) = self.types.args.get(&arg) {
                self.graph.types.args.insert(arg, typ.clone());
            }
        }
        self.block_defs[start.0] = Some(defs);
    }

    fn create_catch_phis(&mut self) {
        let catch_begins: Vec<BlockId> = self
            .graph
            .live_blocks()
            .filter(|block| self.graph.block(*block).is_catch_begin())
            .collect();
        for block in catch_begins {
            let pc = self.graph.block(block).pc;
            let mut phis = Vec::with_capacity(self.slots);
            for slot in 0..self.slots {
                let acc = slot == self.acc_slot();
                let reg = self.slot_reg(slot);
                let phi = self.graph.append_inst(block, Opcode::CatchPhi { acc }, pc);
                self.graph.inst_mut(phi).dst = reg;
                phis.push(phi);
            }
            self.catch_phis.insert(block, phis);
        }
    }

    /// Definitions on entry to a block, creating phis where predecessors disagree
    fn entry_defs(&mut self, block: BlockId) -> Defs {
        if let Some(defs) = &self.block_defs[block.0] {
            return defs.clone();
        }
        if let Some(phis) = self.catch_phis.get(&block) {
            return phis.iter().copied().map(Some).collect();
        }

        let preds = self.graph.block(block).preds.clone();
        let pc = self.graph.block(block).pc;
        let visited: Vec<&Defs> = preds
            .iter()
            .filter_map(|pred| self.block_defs[pred.0].as_ref())
            .collect();

        if self.graph.block(block).flags.contains(BlockFlags::LOOP_HEADER) {
            let mut defs: Defs = vec![None; self.slots];
            let defined: Vec<usize> = (0..self.slots)
                .filter(|slot| visited.iter().all(|pred_defs| pred_defs[*slot].is_some()))
                .collect();
            for slot in defined {
                let phi = self.graph.append_inst(block, Opcode::Phi, pc);
                self.graph.inst_mut(phi).dst = self.slot_reg(slot);
                self.pending_phis.push((phi, slot));
                defs[slot] = Some(phi);
            }
            return defs;
        }

        debug_assert_eq!(visited.len(), preds.len(), "{:?} has unvisited preds", block);
        if visited.len() == 1 {
            return visited[0].clone();
        }

        let mut defs: Defs = vec![None; self.slots];
        let mut merges: Vec<(usize, Vec<InstId>)> = vec![];
        for slot in 0..self.slots {
            let incoming: Option<Vec<InstId>> =
                visited.iter().map(|pred_defs| pred_defs[slot]).collect();
            match incoming {
                Some(incoming) if incoming.iter().all(|def| *def == incoming[0]) => {
                    defs[slot] = incoming.first().copied();
                }
                Some(incoming) => merges.push((slot, incoming)),
                None => (),
            }
        }
        for (slot, incoming) in merges {
            let phi = self.graph.append_inst(block, Opcode::Phi, pc);
            let reg = self.slot_reg(slot);
            self.graph.inst_mut(phi).dst = reg;
            for input in incoming {
                self.graph.add_input(phi, input, reg);
            }
            defs[slot] = Some(phi);
        }
        defs
    }

    fn fill_pending_phis(&mut self) -> Result<(), BuildError> {
        for (phi, slot) in std::mem::take(&mut self.pending_phis) {
            let block = self.graph.inst(phi).block;
            let reg = self.slot_reg(slot);
            for pred in self.graph.block(block).preds.clone() {
                let input = self.block_defs[pred.0]
                    .as_ref()
                    .and_then(|defs| defs[slot])
                    .ok_or(BuildError::UndefinedRegister {
                        pc: self.graph.block(block).pc.unwrap_or(0) as usize,
                        reg,
                    })?;
                self.graph.add_input(phi, input, reg);
            }
        }
        Ok(())
    }

    /// Remove phis whose inputs are all the same value (or the phi itself)
    fn remove_trivial_phis(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for block in self.graph.live_blocks().collect::<Vec<_>>() {
                for phi in self.graph.block(block).phis.clone() {
                    if self.graph.inst(phi).opcode != Opcode::Phi {
                        continue;
                    }
                    let mut same: Option<InstId> = None;
                    let trivial = self.graph.inst(phi).inputs.iter().all(|input| {
                        if *input == phi || Some(*input) == same {
                            return true;
                        }
                        if same.is_none() {
                            same = Some(*input);
                            return true;
                        }
                        false
                    });
                    if let (true, Some(value)) = (trivial, same) {
                        self.graph.replace_uses(phi, value);
                        self.graph.remove_inst(phi);
                        changed = true;
                    }
                }
            }
        }
    }

    /// Definition slot of a register operand
    fn reg_slot(&self, pc: usize, reg: u16) -> Result<usize, BuildError> {
        if (reg as usize) < self.acc_slot() {
            Ok(reg as usize)
        } else {
            Err(BuildError::InvalidRegister { pc, reg })
        }
    }

    fn read(&self, defs: &Defs, pc: usize, slot: usize) -> Result<(InstId, Reg), BuildError> {
        let reg = self.slot_reg(slot);
        defs[slot]
            .map(|def| (def, reg))
            .ok_or(BuildError::UndefinedRegister { pc, reg })
    }

    fn read_reg(&self, defs: &Defs, pc: usize, reg: u16) -> Result<(InstId, Reg), BuildError> {
        let slot = self.reg_slot(pc, reg)?;
        self.read(defs, pc, slot)
    }

    fn read_acc(&self, defs: &Defs, pc: usize) -> Result<(InstId, Reg), BuildError> {
        self.read(defs, pc, self.acc_slot())
    }

    /// Feed the current definitions to the catch-phis of every handler covering `pc`
    fn record_throw(&mut self, pc: usize, defs: &Defs) {
        let mut handlers: Vec<BlockId> = vec![];
        for span in self.regions.intervals_containing(&(pc as u32)) {
            for handler in self.graph.try_regions[span.region].handler_blocks() {
                if !handlers.contains(&handler) {
                    handlers.push(handler);
                }
            }
        }

        for handler in handlers {
            let phis = match self.catch_phis.get(&handler) {
                Some(phis) => phis.clone(),
                None => continue,
            };
            for (slot, def) in defs.iter().enumerate() {
                let def = match def {
                    Some(def) if slot != self.acc_slot() => *def,
                    _ => continue,
                };
                let phi = phis[slot];
                if !self.graph.inst(phi).inputs.contains(&def) {
                    self.graph.add_input(phi, def, self.slot_reg(slot));
                }
            }
        }
    }

    /// Create an instruction at the end of the block
    fn emit(
        &mut self,
        block: BlockId,
        insn: &BytecodeInstruction,
        pc: usize,
        opcode: Opcode,
        inputs: &[(InstId, Reg)],
        dst: Option<Reg>,
    ) -> InstId {
        let inst = self.graph.append_inst(block, opcode, Some(pc as u32));
        for (input, src) in inputs {
            self.graph.add_input(inst, *input, *src);
        }
        if let Some(dst) = dst {
            self.graph.inst_mut(inst).dst = dst;
        }
        if insn.opcode.can_throw() {
            self.graph.inst_mut(inst).flags.insert(InstFlags::CAN_THROW);
        }
        if let Some(typ) = self.types.insns.get(&(pc as u32)) {
            self.graph.types.insts.insert(inst, typ.clone());
        }
        inst
    }

    fn build_insn(&mut self, block: BlockId, idx: usize, defs: &mut Defs) -> Result<(), BuildError> {
        let insns: &'a OffsetVec<BytecodeInstruction> = self.insns;
        let (offset, insn) = match insns.get_index(idx) {
            Some(found) => found,
            None => unreachable!("no instruction at index {}", idx),
        };
        let pc = offset.0;
        let acc = self.acc_slot();

        if insn.opcode.can_throw() {
            self.record_throw(pc, defs);
        }

        let reg = |n: usize| insn.regs[n];
        use isa::Opcode as Op;
        let (opcode, inputs, dst_slot) = match insn.opcode {
            Op::Nop | Op::Jmp => return Ok(()),
            Op::Lda => (Opcode::Mov, vec![self.read_reg(defs, pc, reg(0))?], Some(acc)),
            Op::Sta => {
                let slot = self.reg_slot(pc, reg(0))?;
                (Opcode::Mov, vec![self.read_acc(defs, pc)?], Some(slot))
            }
            Op::Mov => {
                let slot = self.reg_slot(pc, reg(0))?;
                (Opcode::Mov, vec![self.read_reg(defs, pc, reg(1))?], Some(slot))
            }
            Op::Ldai | Op::Fldai | Op::LdUndefined | Op::LdNull | Op::LdTrue | Op::LdFalse => {
                (Opcode::Constant(constant(insn)), vec![], Some(acc))
            }
            Op::LdaStr => (Opcode::LoadString(string_id(insn)), vec![], Some(acc)),
            Op::Add2
            | Op::Sub2
            | Op::Mul2
            | Op::Div2
            | Op::Mod2
            | Op::And2
            | Op::Or2
            | Op::Xor2
            | Op::Shl2
            | Op::Shr2 => {
                let inputs = vec![self.read_reg(defs, pc, reg(0))?, self.read_acc(defs, pc)?];
                (Opcode::Binary(binary_op(insn.opcode)), inputs, Some(acc))
            }
            Op::Eq | Op::NotEq | Op::Less | Op::LessEq | Op::Greater | Op::GreaterEq => {
                let inputs = vec![self.read_reg(defs, pc, reg(0))?, self.read_acc(defs, pc)?];
                (Opcode::Compare(comparison(insn.opcode)), inputs, Some(acc))
            }
            Op::Neg | Op::Not | Op::Inc | Op::Dec | Op::IsTrue | Op::IsFalse => {
                let inputs = vec![self.read_acc(defs, pc)?];
                (Opcode::Unary(unary_op(insn.opcode)), inputs, Some(acc))
            }
            Op::Jeqz => (
                Opcode::IfImm(ZeroComparison::EQ),
                vec![self.read_acc(defs, pc)?],
                None,
            ),
            Op::Jnez => (
                Opcode::IfImm(ZeroComparison::NE),
                vec![self.read_acc(defs, pc)?],
                None,
            ),
            Op::Jeq | Op::Jne | Op::Jlt | Op::Jle | Op::Jgt | Op::Jge => {
                let inputs = vec![self.read_reg(defs, pc, reg(0))?, self.read_acc(defs, pc)?];
                (Opcode::If(jump_comparison(insn.opcode)), inputs, None)
            }
            Op::Return => (Opcode::Return, vec![self.read_acc(defs, pc)?], None),
            Op::ReturnUndefined => (Opcode::ReturnVoid, vec![], None),
            Op::Throw => (Opcode::Throw, vec![self.read_acc(defs, pc)?], None),
            Op::CallArg0 | Op::CallArg1 | Op::CallArgs2 | Op::CallArgs3 => {
                let mut inputs = vec![self.read_acc(defs, pc)?];
                for arg in &insn.regs {
                    inputs.push(self.read_reg(defs, pc, *arg)?);
                }
                let kind = CallKind::Fixed(insn.regs.len() as u8);
                (Opcode::Call(kind), inputs, Some(acc))
            }
            Op::CallRange => {
                let count = match insn.imm {
                    Some(Imm::Int(count)) => count as u16,
                    _ => 0,
                };
                let mut inputs = vec![self.read_acc(defs, pc)?];
                for arg in 0..count {
                    let arg_reg = reg(0)
                        .checked_add(arg)
                        .ok_or(BuildError::InvalidRegister { pc, reg: reg(0) })?;
                    inputs.push(self.read_reg(defs, pc, arg_reg)?);
                }
                (Opcode::Call(CallKind::Range), inputs, Some(acc))
            }
            Op::TryLdGlobalByName => (Opcode::LoadGlobal(string_id(insn)), vec![], Some(acc)),
            Op::LdObjByName => (
                Opcode::LoadObject(string_id(insn)),
                vec![self.read_acc(defs, pc)?],
                Some(acc),
            ),
            Op::StObjByName => {
                let inputs = vec![self.read_reg(defs, pc, reg(0))?, self.read_acc(defs, pc)?];
                (Opcode::StoreObject(string_id(insn)), inputs, None)
            }
            Op::SuspendGenerator => {
                let inputs = vec![self.read_reg(defs, pc, reg(0))?, self.read_acc(defs, pc)?];
                (Opcode::Suspend, inputs, Some(acc))
            }
        };

        let dst = dst_slot.map(|slot| self.slot_reg(slot));
        let inst = self.emit(block, insn, pc, opcode, &inputs, dst);
        if let Some(slot) = dst_slot {
            defs[slot] = Some(inst);
        }
        Ok(())
    }
}

fn constant(insn: &BytecodeInstruction) -> ConstValue {
    use isa::Opcode as Op;
    match (insn.opcode, insn.imm) {
        (Op::Ldai, Some(Imm::Int(value))) => ConstValue::Int(value as i32),
        (Op::Fldai, Some(Imm::Float(value))) => ConstValue::Double(value),
        (Op::LdNull, _) => ConstValue::Null,
        (Op::LdTrue, _) => ConstValue::True,
        (Op::LdFalse, _) => ConstValue::False,
        (Op::LdUndefined, _) => ConstValue::Undefined,
        (opcode, imm) => unreachable!("{:?} with {:?} is not a constant", opcode, imm),
    }
}

fn string_id(insn: &BytecodeInstruction) -> u32 {
    insn.id()
        .unwrap_or_else(|| unreachable!("{} without a string id", insn.opcode))
}

fn binary_op(opcode: isa::Opcode) -> BinaryOp {
    use isa::Opcode as Op;
    match opcode {
        Op::Add2 => BinaryOp::Add,
        Op::Sub2 => BinaryOp::Sub,
        Op::Mul2 => BinaryOp::Mul,
        Op::Div2 => BinaryOp::Div,
        Op::Mod2 => BinaryOp::Mod,
        Op::And2 => BinaryOp::And,
        Op::Or2 => BinaryOp::Or,
        Op::Xor2 => BinaryOp::Xor,
        Op::Shl2 => BinaryOp::Shl,
        Op::Shr2 => BinaryOp::Shr,
        other => unreachable!("{} is not a binary operation", other),
    }
}

fn unary_op(opcode: isa::Opcode) -> UnaryOp {
    use isa::Opcode as Op;
    match opcode {
        Op::Neg => UnaryOp::Neg,
        Op::Not => UnaryOp::Not,
        Op::Inc => UnaryOp::Inc,
        Op::Dec => UnaryOp::Dec,
        Op::IsTrue => UnaryOp::IsTrue,
        Op::IsFalse => UnaryOp::IsFalse,
        other => unreachable!("{} is not a unary operation", other),
    }
}

fn comparison(opcode: isa::Opcode) -> Comparison {
    use isa::Opcode as Op;
    match opcode {
        Op::Eq => Comparison::EQ,
        Op::NotEq => Comparison::NE,
        Op::Less => Comparison::LT,
        Op::LessEq => Comparison::LE,
        Op::Greater => Comparison::GT,
        Op::GreaterEq => Comparison::GE,
        other => unreachable!("{} is not a comparison", other),
    }
}

fn jump_comparison(opcode: isa::Opcode) -> Comparison {
    use isa::Opcode as Op;
    match opcode {
        Op::Jeq => Comparison::EQ,
        Op::Jne => Comparison::NE,
        Op::Jlt => Comparison::LT,
        Op::Jle => Comparison::LE,
        Op::Jgt => Comparison::GT,
        Op::Jge => Comparison::GE,
        other => unreachable!("{} is not a conditional jump on a register", other),
    }
}

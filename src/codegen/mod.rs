//! Bytecode generation
//!
//! Turns an instruction graph whose registers have been encoded back into a linear list of
//! instructions, along with the exception table.
//!
//! ### Layout
//!
//! Blocks are laid out in [`Graph::linear_order`], each one starting with a label. A block only
//! ends with an explicit `jmp` when the block it continues in is not the next one. Try-end blocks
//! get a second label, which is where the protected range of their region stops.
//!
//! ### Accumulator
//!
//! Graph instructions name registers for all of their operands, with [`ACC_REG`] standing for
//! the accumulator. When an accumulator operand lives in a register it is loaded with `lda` right
//! before the instruction, and a result living in a register is stored with `sta` right after.
//! At `opt_level >= 1`, a comparison used only by the branch right after it is fused with the
//! branch into a single `jeq`/`jne`/`jlt`/... instruction.
//!
//! ### Side channels
//!
//! Every emitted instruction remembers which graph node it comes from. This is what debug
//! positions (see [`attach_positions`]) and type annotations (see [`emitted_types`]) are computed
//! from.

mod debug_info;
mod label;
mod type_info;

pub use debug_info::*;
pub use label::*;
pub use type_info::*;

use crate::ir::{
    is_frame_reg, BlockFlags, BlockId, CallKind, ConstValue, Graph, InstId, Opcode, Reg, ACC_REG,
};
use crate::isa::{self, Comparison, Imm, ZeroComparison};
use crate::program::{CatchBlock, DebugTable, EmittedCode, Ins, SymbolTable, TypeOrder, TypeRef};
use log::trace;
use std::collections::HashMap;

/// Code generated for a function
#[derive(Clone, Debug)]
pub struct Generated {
    pub code: EmittedCode,

    /// Type annotation, keyed by the order of the emitted instructions
    pub types: Vec<(TypeOrder, TypeRef)>,
}

pub struct BytecodeGen<'a> {
    graph: &'a Graph,
    symbols: &'a SymbolTable,
    fuse_compares: bool,
    labels: SynLabelGenerator,
    block_labels: HashMap<BlockId, SynLabel>,

    /// Where the try ranges ending at try-end blocks stop
    end_labels: HashMap<BlockId, SynLabel>,
    ins: Vec<Ins>,

    /// Node each instruction was emitted for, parallel to `ins`
    origins: Vec<Option<InstId>>,
}

impl<'a> BytecodeGen<'a> {
    pub fn new(graph: &'a Graph, symbols: &'a SymbolTable, opt_level: u8) -> BytecodeGen<'a> {
        BytecodeGen {
            graph,
            symbols,
            fuse_compares: opt_level >= 1,
            labels: SynLabelGenerator::new(),
            block_labels: HashMap::new(),
            end_labels: HashMap::new(),
            ins: vec![],
            origins: vec![],
        }
    }

    pub fn generate(mut self, debug: &DebugTable) -> Generated {
        let order = self.graph.linear_order();
        for block in &order {
            let label = self.labels.fresh_label();
            self.block_labels.insert(*block, label);
            if self.graph.block(*block).flags.contains(BlockFlags::TRY_END) {
                let end = self.labels.fresh_label();
                self.end_labels.insert(*block, end);
            }
        }

        for (pos, block) in order.iter().enumerate() {
            self.emit_block(*block, order.get(pos + 1).copied());
        }
        let catch_blocks = self.catch_blocks();

        let pcs: Vec<Option<u32>> = self
            .origins
            .iter()
            .map(|origin| origin.and_then(|inst| self.graph.inst(inst).pc))
            .collect();
        attach_positions(&mut self.ins, &pcs, debug, self.graph.language);
        let types = emitted_types(self.graph, &self.ins, &self.origins);

        let code = EmittedCode {
            ins: self.ins,
            catch_blocks,
            regs_num: self.graph.frame.regs_num,
            first_local_reg: self.graph.frame.first_local as Reg,
        };
        if log::log_enabled!(log::Level::Trace) {
            let listing: Vec<String> = code.ins.iter().map(|ins| ins.to_string()).collect();
            trace!("generated code:\n{}", listing.join("\n"));
        }
        Generated { code, types }
    }

    fn label(&self, block: BlockId) -> SynLabel {
        self.block_labels[&block]
    }

    fn push(&mut self, ins: Ins, origin: Option<InstId>) {
        self.ins.push(ins);
        self.origins.push(origin);
    }

    fn emit_block(&mut self, block: BlockId, next: Option<BlockId>) {
        self.push(Ins::label(self.label(block)), None);
        if let Some(end) = self.end_labels.get(&block).copied() {
            self.push(Ins::label(end), None);
        }

        let insts: Vec<InstId> = self.graph.block(block).all_insts().collect();
        let mut skip_next = false;
        for (idx, inst) in insts.iter().enumerate() {
            if skip_next {
                skip_next = false;
                continue;
            }
            if let Some(branch) = self.fusable_branch(*inst, insts.get(idx + 1).copied()) {
                self.emit_fused(block, *inst, branch);
                skip_next = true;
                continue;
            }
            self.emit_inst(block, *inst);
        }

        let continues_in = if self.graph.ends_with_branch(block) {
            self.graph.fallthrough_succ(block)
        } else {
            self.graph.normal_succs(block).first().copied()
        };
        if let Some(succ) = continues_in {
            if Some(succ) != self.graph.end && Some(succ) != next {
                let jump = Ins::new(isa::Opcode::Jmp).with_target(self.label(succ));
                self.push(jump, None);
            }
        }
    }

    /// The branch a comparison can be fused with, along with the comparison to jump on
    fn fusable_branch(&self, inst: InstId, next: Option<InstId>) -> Option<(InstId, Comparison)> {
        if !self.fuse_compares {
            return None;
        }
        let node = self.graph.inst(inst);
        let cmp = match node.opcode {
            Opcode::Compare(cmp) => cmp,
            _ => return None,
        };
        let branch = next?;
        let zero_cmp = match self.graph.inst(branch).opcode {
            Opcode::IfImm(zero_cmp) => zero_cmp,
            _ => return None,
        };
        if node.dst != ACC_REG
            || node.users != [branch]
            || self.graph.inst(branch).src != [ACC_REG]
        {
            return None;
        }
        match zero_cmp {
            ZeroComparison::NE => Some((branch, cmp)),
            ZeroComparison::EQ if cmp.is_equality() => Some((branch, !cmp)),
            ZeroComparison::EQ => None,
        }
    }

    fn emit_fused(&mut self, block: BlockId, compare: InstId, (_, cmp): (InstId, Comparison)) {
        self.load_acc(compare);
        let target = self.label(self.graph.block(block).succs[0]);
        let lhs = self.graph.inst(compare).src[0];
        let jump = Ins::new(cmp.jump_opcode())
            .with_regs(&[lhs])
            .with_target(target);
        self.push(jump, Some(compare));
    }

    /// Load the accumulator operand, unless it is already there
    fn load_acc(&mut self, inst: InstId) {
        let node = self.graph.inst(inst);
        if let Some(src) = node.acc_src() {
            if src != ACC_REG {
                self.push(Ins::new(isa::Opcode::Lda).with_regs(&[src]), Some(inst));
            }
        }
    }

    /// Store the result left in the accumulator, unless it stays there
    fn store_acc(&mut self, inst: InstId) {
        let node = self.graph.inst(inst);
        if !node.opcode.writes_acc() || !is_frame_reg(node.dst) {
            return;
        }
        let dst = node.dst;
        self.push(Ins::new(isa::Opcode::Sta).with_regs(&[dst]), Some(inst));
    }

    fn emit_move(&mut self, dst: Reg, src: Reg, origin: InstId) {
        let ins = match (dst, src) {
            _ if dst == src => return,
            (ACC_REG, src) => Ins::new(isa::Opcode::Lda).with_regs(&[src]),
            (dst, ACC_REG) => Ins::new(isa::Opcode::Sta).with_regs(&[dst]),
            (dst, src) => Ins::new(isa::Opcode::Mov).with_regs(&[dst, src]),
        };
        self.push(ins, Some(origin));
    }

    fn emit_inst(&mut self, block: BlockId, inst: InstId) {
        let graph = self.graph;
        let node = graph.inst(inst);
        let op = |opcode: isa::Opcode| Ins::new(opcode);
        let ins = match &node.opcode {
            Opcode::Parameter(_)
            | Opcode::Phi
            | Opcode::CatchPhi { acc: false }
            | Opcode::Try(_)
            | Opcode::TryEnd(_) => return,
            Opcode::CatchPhi { acc: true } => None,
            Opcode::Mov => {
                self.emit_move(node.dst, node.src[0], inst);
                return;
            }
            Opcode::SpillFill(moves) => {
                for spill in moves {
                    self.emit_move(spill.dst, spill.src, inst);
                }
                return;
            }
            Opcode::Constant(value) => Some(match value {
                ConstValue::Int(i) => op(value.opcode()).with_imm(Imm::Int(*i as i64)),
                ConstValue::Double(d) => op(value.opcode()).with_imm(Imm::Float(*d)),
                _ => op(value.opcode()),
            }),
            Opcode::LoadString(id) => Some(op(isa::Opcode::LdaStr).with_imm(Imm::Id(*id))),
            Opcode::Binary(bin) => Some(op(bin.opcode()).with_regs(&node.src[..1])),
            Opcode::Compare(cmp) => Some(op(cmp.compare_opcode()).with_regs(&node.src[..1])),
            Opcode::Unary(un) => Some(op(un.opcode())),
            Opcode::Call(CallKind::Fixed(args)) => {
                let opcode = match args {
                    0 => isa::Opcode::CallArg0,
                    1 => isa::Opcode::CallArg1,
                    2 => isa::Opcode::CallArgs2,
                    3 => isa::Opcode::CallArgs3,
                    _ => unreachable!("call with {} fixed arguments", args),
                };
                Some(op(opcode).with_regs(&node.src[1..]))
            }
            Opcode::Call(CallKind::Range) => {
                let args = node.src.len() - 1;
                let first = node.src.get(1).copied().unwrap_or(0);
                Some(
                    op(isa::Opcode::CallRange)
                        .with_imm(Imm::Int(args as i64))
                        .with_regs(&[first]),
                )
            }
            Opcode::LoadGlobal(id) => {
                Some(op(isa::Opcode::TryLdGlobalByName).with_imm(Imm::Id(*id)))
            }
            Opcode::LoadObject(id) => Some(op(isa::Opcode::LdObjByName).with_imm(Imm::Id(*id))),
            Opcode::StoreObject(id) => Some(
                op(isa::Opcode::StObjByName)
                    .with_imm(Imm::Id(*id))
                    .with_regs(&node.src[..1]),
            ),
            Opcode::Suspend => Some(op(isa::Opcode::SuspendGenerator).with_regs(&node.src[..1])),
            Opcode::If(cmp) => {
                let target = self.label(graph.block(block).succs[0]);
                Some(
                    op(cmp.jump_opcode())
                        .with_regs(&node.src[..1])
                        .with_target(target),
                )
            }
            Opcode::IfImm(zero_cmp) => {
                let target = self.label(graph.block(block).succs[0]);
                Some(op(zero_cmp.jump_opcode()).with_target(target))
            }
            Opcode::Return => Some(op(isa::Opcode::Return)),
            Opcode::ReturnVoid => Some(op(isa::Opcode::ReturnUndefined)),
            Opcode::Throw => Some(op(isa::Opcode::Throw)),
        };

        self.load_acc(inst);
        if let Some(ins) = ins {
            self.push(ins, Some(inst));
        }
        self.store_acc(inst);
    }

    /// Exception table, one entry per handler of every surviving region, in declaration order
    fn catch_blocks(&self) -> Vec<CatchBlock> {
        let mut catch_blocks = vec![];
        for region in &self.graph.try_regions {
            let (try_begin, try_end) = match (region.try_begin, region.try_end) {
                (Some(begin), Some(end)) => (begin, end),
                _ => continue,
            };
            for (entry, catch_begin) in region.catches.iter().zip(&region.catch_begins) {
                let handler = self.label(*catch_begin);
                catch_blocks.push(CatchBlock {
                    try_begin: self.label(try_begin),
                    try_end: self.end_labels[&try_end],
                    catch_begin: handler,
                    catch_end: handler,
                    exception: entry
                        .type_idx
                        .and_then(|idx| self.symbols.type_name(idx))
                        .map(String::from),
                });
            }
        }
        catch_blocks
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{BuildLimits, IrBuilder};
    use crate::ir::{BinaryOp, FrameLayout, InstFlags, SpillMove};
    use crate::isa::{Assembler, Opcode as Op};
    use crate::program::{CatchEntry, Function, SourceLanguage, TryBlock};

    fn opcodes(generated: &Generated) -> Vec<Op> {
        generated.code.opcodes()
    }

    fn real_ins(generated: &Generated) -> Vec<&Ins> {
        generated.code.ins.iter().filter(|ins| !ins.is_label()).collect()
    }

    #[test]
    fn unoptimized_code_is_reproduced() {
        let mut asm = Assembler::new();
        let handler = asm.fresh_label();
        asm.imm(Op::Ldai, Imm::Int(1))
            .reg(Op::Sta, 0)
            .reg(Op::Lda, 1)
            .op(Op::CallArg0)
            .op(Op::ReturnUndefined)
            .bind(handler)
            .reg(Op::Lda, 0)
            .op(Op::Return);
        let mut function = Function::new("f", 1, 1, asm.finish().unwrap());
        function.try_blocks = vec![TryBlock {
            start_pc: 0,
            length: 10,
            catches: vec![CatchEntry {
                handler_pc: 11,
                type_idx: Some(0),
            }],
        }];
        let symbols = SymbolTable {
            strings: vec![],
            types: vec![String::from("Error")],
        };

        let graph = IrBuilder::new(&function, &symbols, BuildLimits::default())
            .build()
            .unwrap();
        let generated = BytecodeGen::new(&graph, &symbols, 0).generate(&function.debug);

        assert_eq!(
            opcodes(&generated),
            vec![
                Op::Ldai,
                Op::Sta,
                Op::Lda,
                Op::CallArg0,
                Op::ReturnUndefined,
                Op::Lda,
                Op::Return
            ]
        );
        assert_eq!(generated.code.regs_num, 1);
        assert_eq!(generated.code.catch_blocks.len(), 1);

        let catch = &generated.code.catch_blocks[0];
        assert_eq!(catch.exception.as_deref(), Some("Error"));
        assert_eq!(catch.catch_begin, catch.catch_end);
        let position = |label: SynLabel| {
            generated
                .code
                .ins
                .iter()
                .position(|ins| ins.label == Some(label))
                .unwrap()
        };
        let covered: Vec<Op> = generated.code.ins[position(catch.try_begin)..position(catch.try_end)]
            .iter()
            .filter_map(|ins| ins.opcode)
            .collect();
        assert_eq!(covered, vec![Op::Ldai, Op::Sta, Op::Lda, Op::CallArg0]);

        // the try range ends right after the label of the try-end block
        let end = position(catch.try_end);
        assert!(generated.code.ins[end - 1].is_label());
        assert_ne!(generated.code.ins[end - 1].label, Some(catch.try_begin));
        let handler: Vec<Op> = generated.code.ins[position(catch.catch_begin)..]
            .iter()
            .filter_map(|ins| ins.opcode)
            .collect();
        assert_eq!(handler, vec![Op::Lda, Op::Return]);
    }

    /// `if (arg < 0) return undefined; else return 1;`
    fn compare_and_branch() -> Graph {
        let mut g = Graph::new(FrameLayout::new(1, 1), SourceLanguage::EcmaScript);
        let b1 = g.add_block(Some(0), BlockFlags::empty());
        let b2 = g.add_block(Some(10), BlockFlags::empty());
        let b3 = g.add_block(Some(20), BlockFlags::empty());
        g.add_edge(g.start, b1);
        g.add_edge(b1, b3);
        g.add_edge(b1, b2);
        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        g.inst_mut(arg).dst = 1;
        let zero = g.append_inst(b1, Opcode::Constant(ConstValue::Int(0)), Some(0));
        g.inst_mut(zero).dst = ACC_REG;
        let cmp = g.append_inst(b1, Opcode::Compare(Comparison::LT), Some(5));
        g.add_input(cmp, arg, 1);
        g.add_input(cmp, zero, ACC_REG);
        g.inst_mut(cmp).dst = ACC_REG;
        let branch = g.append_inst(b1, Opcode::IfImm(ZeroComparison::NE), Some(7));
        g.add_input(branch, cmp, ACC_REG);
        let one = g.append_inst(b2, Opcode::Constant(ConstValue::Int(1)), Some(10));
        g.inst_mut(one).dst = ACC_REG;
        let ret = g.append_inst(b2, Opcode::Return, Some(15));
        g.add_input(ret, one, ACC_REG);
        g.append_inst(b3, Opcode::ReturnVoid, Some(20));
        g
    }

    #[test]
    fn compare_is_fused_with_branch() {
        let graph = compare_and_branch();
        let symbols = SymbolTable::default();

        let fused = BytecodeGen::new(&graph, &symbols, 1).generate(&DebugTable::default());
        assert_eq!(
            opcodes(&fused),
            vec![Op::Ldai, Op::Jlt, Op::Ldai, Op::Return, Op::ReturnUndefined]
        );
        let jump = real_ins(&fused)[1];
        assert_eq!(jump.regs, vec![1]);
        let target = fused
            .code
            .ins
            .iter()
            .position(|ins| ins.label == jump.target)
            .unwrap();
        assert_eq!(fused.code.ins[target + 1].opcode, Some(Op::ReturnUndefined));

        let unfused = BytecodeGen::new(&graph, &symbols, 0).generate(&DebugTable::default());
        assert_eq!(
            opcodes(&unfused),
            vec![
                Op::Ldai,
                Op::Less,
                Op::Jnez,
                Op::Ldai,
                Op::Return,
                Op::ReturnUndefined
            ]
        );
    }

    #[test]
    fn accumulator_traffic_and_jumps() {
        // bb1: v2 = v0 + v1; spill; if v2 -> bb3 | bb2     bb2: jmp bb1     bb3: return
        let mut g = Graph::new(FrameLayout::new(4, 0), SourceLanguage::EcmaScript);
        let b1 = g.add_block(Some(0), BlockFlags::empty());
        let b2 = g.add_block(Some(10), BlockFlags::empty());
        let b3 = g.add_block(Some(20), BlockFlags::empty());
        g.add_edge(g.start, b1);
        g.add_edge(b1, b3);
        g.add_edge(b1, b2);
        g.add_edge(b2, b1);
        let x = g.append_inst(b1, Opcode::Constant(ConstValue::Int(1)), Some(0));
        g.inst_mut(x).dst = 0;
        let sum = g.append_inst(b1, Opcode::Binary(BinaryOp::Add), Some(5));
        g.add_input(sum, x, 0);
        g.add_input(sum, x, 0);
        g.inst_mut(sum).dst = 2;
        g.inst_mut(sum).flags.insert(InstFlags::NEEDS_ACC_LOAD);
        g.append_inst(
            b1,
            Opcode::SpillFill(vec![
                SpillMove { dst: 3, src: 2 },
                SpillMove { dst: 3, src: 3 },
            ]),
            None,
        );
        let branch = g.append_inst(b1, Opcode::IfImm(ZeroComparison::EQ), Some(7));
        g.add_input(branch, sum, 2);
        g.append_inst(b3, Opcode::ReturnVoid, Some(20));

        let symbols = SymbolTable::default();
        let generated = BytecodeGen::new(&g, &symbols, 1).generate(&DebugTable::default());
        let listing: Vec<String> = real_ins(&generated)
            .iter()
            .map(|ins| ins.to_string().trim().to_owned())
            .collect();
        assert_eq!(
            listing,
            vec![
                "ldai 1",
                "sta v0",
                "lda v0",
                "add2 v0",
                "sta v2",
                "mov v3, v2",
                "lda v2",
                "jeqz l3",
                "jmp l1",
                "returnundefined"
            ]
        );
    }
}

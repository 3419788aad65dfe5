//! General register allocation
//!
//! Runs after accumulator allocation, on every value that still needs a register. Allocation is
//! a linear scan over the hull of each value's live range, laid out in emission order. Nothing
//! is ever spilled: the virtual frame is large enough for any function the builder accepts, and
//! the encoder takes care of fitting operands into their encodings afterwards.
//!
//! ### Frame
//!
//! After allocation, locals are numbered from 0 and the arguments sit at the very top of the
//! virtual frame (`VIRTUAL_FRAME_SIZE - args .. VIRTUAL_FRAME_SIZE`), out of the way of the
//! encoder which moves them back down.
//!
//! ### Phis
//!
//! Phis are resolved with parallel copies at the end of each predecessor. Critical edges into
//! blocks with phis are split first, so that those copies only run on the right edge.
//!
//! ### Handlers
//!
//! Each catch-phi gets its own register, used by nothing else in the function. Every value
//! flowing into a catch-phi is copied into that register as soon as it is defined, so the
//! register holds the right value whenever an exception is thrown.

mod parallel_move;

pub use parallel_move::*;

use crate::analysis::Liveness;
use crate::ir::{
    BlockFlags, BlockId, Dump, Graph, InstFlags, InstId, Opcode, Reg, SpillMove, ACC_REG,
    INVALID_REG, VIRTUAL_FRAME_SIZE,
};
use log::{debug, trace};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Register allocation failure
#[derive(Debug)]
pub enum AllocError {
    /// Locals and arguments do not fit in the virtual frame
    FrameExhausted { locals: usize, args: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::FrameExhausted { locals, args } => write!(
                f,
                "{} locals and {} arguments exceed the virtual frame",
                locals, args
            ),
        }
    }
}

/// Live range of a value, as an inclusive range of positions
#[derive(Copy, Clone, Debug)]
struct Interval {
    value: InstId,
    start: usize,
    end: usize,
}

/// Positions of blocks and instructions in emission order
///
/// Each block has a start and an end position, with its phis and instructions in between. All
/// positions are even.
struct Numbering {
    block_start: Vec<usize>,
    block_end: Vec<usize>,
    inst_pos: HashMap<InstId, usize>,
}

impl Numbering {
    fn new(graph: &Graph, order: &[BlockId]) -> Numbering {
        let mut block_start = vec![0; graph.blocks.len()];
        let mut block_end = vec![0; graph.blocks.len()];
        let mut inst_pos = HashMap::new();
        let mut pos = 0;
        for block in order {
            block_start[block.0] = pos;
            pos += 2;
            for inst in graph.block(*block).all_insts() {
                inst_pos.insert(inst, pos);
                pos += 2;
            }
            block_end[block.0] = pos;
            pos += 2;
        }
        Numbering {
            block_start,
            block_end,
            inst_pos,
        }
    }
}

/// Allocate registers, returning the number of local registers used
pub fn allocate(graph: &mut Graph) -> Result<usize, AllocError> {
    let split = split_critical_edges(graph);
    let args = graph.frame.args_num;
    for inst in graph.block(graph.start).insts.clone() {
        if let Opcode::Parameter(arg) = graph.inst(inst).opcode {
            graph.inst_mut(inst).dst = (VIRTUAL_FRAME_SIZE - args + arg as usize) as Reg;
        }
    }

    let dedicated = assign_catch_registers(graph);
    let mut locals = dedicated;
    for (value, reg) in linear_scan(graph, dedicated as Reg) {
        graph.inst_mut(value).dst = reg;
        locals = locals.max(reg as usize + 1);
    }

    if resolve_phis(graph, locals as Reg) {
        locals += 1;
    }
    copy_into_catch_registers(graph);
    assign_sources(graph);

    if locals + args > VIRTUAL_FRAME_SIZE {
        return Err(AllocError::FrameExhausted { locals, args });
    }
    graph.frame.regs_num = locals;
    graph.frame.first_local = 0;

    debug!(
        "register allocation: {} locals ({} for handlers), {} critical edges split",
        locals, dedicated, split
    );
    trace!("after register allocation:\n{}", Dump(graph));
    Ok(locals)
}

/// Does the phi need copies at the end of its predecessors?
fn is_register_phi(graph: &Graph, inst: InstId) -> bool {
    let node = graph.inst(inst);
    node.opcode == Opcode::Phi && node.dst != ACC_REG
}

/// Split edges from blocks with several successors into blocks with phis
fn split_critical_edges(graph: &mut Graph) -> usize {
    let mut split = 0;
    for block in graph.live_blocks().collect::<Vec<_>>() {
        let bb = graph.block(block);
        if bb.is_catch_begin() || !bb.phis.iter().any(|phi| is_register_phi(graph, *phi)) {
            continue;
        }
        for pred in bb.preds.clone() {
            if graph.normal_succs(pred).len() < 2 {
                continue;
            }
            let succ_idx = graph
                .block(pred)
                .succs
                .iter()
                .position(|succ| *succ == block)
                .unwrap_or_else(|| unreachable!("{:?} is not a successor of {:?}", block, pred));
            let new = graph.split_edge(pred, succ_idx, BlockFlags::SPLIT);
            let depth = graph.block(block).loop_depth.min(graph.block(pred).loop_depth);
            graph.block_mut(new).loop_depth = depth;
            split += 1;
        }
    }
    split
}

/// Give every catch-phi of a register its own register, returning how many were used
fn assign_catch_registers(graph: &mut Graph) -> usize {
    let mut next = 0;
    for inst in graph.live_insts() {
        let node = graph.inst(inst);
        if node.opcode == (Opcode::CatchPhi { acc: false }) && !node.users.is_empty() {
            graph.inst_mut(inst).dst = next;
            next += 1;
        }
    }
    next as usize
}

/// Values that still need a register
fn needs_register(graph: &Graph, inst: InstId) -> bool {
    let node = graph.inst(inst);
    node.opcode.has_value()
        && node.dst == INVALID_REG
        && !node.users.is_empty()
        && !matches!(node.opcode, Opcode::Parameter(_) | Opcode::CatchPhi { acc: false })
}

fn live_intervals(graph: &Graph, order: &[BlockId]) -> Vec<Interval> {
    let numbering = Numbering::new(graph, order);
    let liveness = Liveness::compute(graph, order, |inst| needs_register(graph, inst));

    let mut hulls: HashMap<InstId, (usize, usize)> = HashMap::new();
    let mut extend = |value: InstId, pos: usize| {
        let hull = hulls.entry(value).or_insert((pos, pos));
        hull.0 = hull.0.min(pos);
        hull.1 = hull.1.max(pos);
    };

    for block in order {
        let bb = graph.block(*block);
        for value in &liveness.live_in[block.0] {
            extend(*value, numbering.block_start[block.0]);
        }
        for value in &liveness.live_out[block.0] {
            extend(*value, numbering.block_end[block.0]);
        }
        for inst in bb.all_insts() {
            let node = graph.inst(inst);
            if needs_register(graph, inst) {
                extend(inst, numbering.inst_pos[&inst]);
            }
            if node.opcode == Opcode::Phi {
                for (pred, input) in bb.preds.iter().zip(&node.inputs) {
                    let pred_end = numbering.block_end[pred.0];
                    if needs_register(graph, inst) {
                        extend(inst, pred_end);
                    }
                    if needs_register(graph, *input) {
                        extend(*input, pred_end);
                    }
                }
                continue;
            }
            if matches!(node.opcode, Opcode::CatchPhi { .. }) {
                continue;
            }
            for input in &node.inputs {
                if needs_register(graph, *input) {
                    extend(*input, numbering.inst_pos[&inst]);
                }
            }
        }
    }

    let mut intervals: Vec<Interval> = hulls
        .into_iter()
        .map(|(value, (start, end))| Interval { value, start, end })
        .collect();
    intervals.sort_by_key(|interval| (interval.start, interval.value));
    intervals
}

/// Assign the lowest register free over the whole interval, starting at `first`
fn linear_scan(graph: &Graph, first: Reg) -> Vec<(InstId, Reg)> {
    let order = graph.linear_order();
    let intervals = live_intervals(graph, &order);

    let mut assigned = vec![];
    let mut active: Vec<(usize, Reg)> = vec![];
    let mut free: BTreeSet<Reg> = BTreeSet::new();
    let mut next = first;
    for interval in intervals {
        active.retain(|(end, reg)| {
            if *end < interval.start {
                free.insert(*reg);
                false
            } else {
                true
            }
        });
        let reg = match free.iter().next().copied() {
            Some(reg) => {
                free.remove(&reg);
                reg
            }
            None => {
                next += 1;
                next - 1
            }
        };
        active.push((interval.end, reg));
        assigned.push((interval.value, reg));
    }
    assigned
}

/// Insert the copies for phis at the end of predecessors, returning whether the extra register
/// `temp` is needed to break a cycle
fn resolve_phis(graph: &mut Graph, temp: Reg) -> bool {
    let mut used_temp = false;
    for block in graph.live_blocks().collect::<Vec<_>>() {
        let phis: Vec<InstId> = graph
            .block(block)
            .phis
            .iter()
            .copied()
            .filter(|phi| is_register_phi(graph, *phi))
            .collect();
        if phis.is_empty() {
            continue;
        }
        let preds = graph.block(block).preds.clone();
        for (pred_idx, pred) in preds.iter().enumerate() {
            let moves: Vec<SpillMove> = phis
                .iter()
                .map(|phi| {
                    let input = graph.inst(*phi).inputs[pred_idx];
                    SpillMove {
                        dst: graph.inst(*phi).dst,
                        src: graph.inst(input).dst,
                    }
                })
                .collect();
            let (moves, needs_temp) = schedule_parallel_moves(&moves, temp);
            used_temp |= needs_temp;
            if moves.is_empty() {
                continue;
            }
            let spill = graph.create_inst(Opcode::SpillFill(moves), *pred, None);
            graph.insert_at_end(*pred, spill);
        }
    }
    used_temp
}

/// Copy every input of a catch-phi into its register, right after it is defined
fn copy_into_catch_registers(graph: &mut Graph) {
    for inst in graph.live_insts() {
        let node = graph.inst(inst);
        if node.opcode != (Opcode::CatchPhi { acc: false }) || node.users.is_empty() {
            continue;
        }
        let reg = node.dst;
        let inputs: BTreeSet<InstId> = graph.inst(inst).inputs.iter().copied().collect();
        for input in inputs {
            let src = graph.inst(input).dst;
            debug_assert!(src != ACC_REG && src != INVALID_REG, "{:?} has no register", input);
            if src == reg {
                continue;
            }
            let block = graph.inst(input).block;
            let pc = graph.inst(input).pc;
            let spill = graph.create_inst(Opcode::SpillFill(vec![SpillMove { dst: reg, src }]), block, pc);
            graph.insert_after(input, spill);
        }
    }
}

/// Record the register of every operand
fn assign_sources(graph: &mut Graph) {
    for inst in graph.live_insts() {
        let acc_idx = graph.inst(inst).opcode.acc_read_index();
        let in_acc = !graph.inst(inst).flags.contains(InstFlags::NEEDS_ACC_LOAD);
        let srcs: Vec<Reg> = graph
            .inst(inst)
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                if Some(idx) == acc_idx && in_acc {
                    ACC_REG
                } else {
                    graph.inst(*input).dst
                }
            })
            .collect();
        graph.inst_mut(inst).src = srcs;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{BinaryOp, ConstValue, FrameLayout};
    use crate::isa::ZeroComparison;
    use crate::program::SourceLanguage;
    use crate::reg_acc_alloc::RegAccAlloc;

    #[test]
    fn disjoint_values_share_a_register() {
        // a = 1; b = a + a; c = 2; d = c + c; return b + d
        let mut g = Graph::new(FrameLayout::new(4, 1), SourceLanguage::EcmaScript);
        let bb = g.add_block(Some(0), BlockFlags::empty());
        g.add_edge(g.start, bb);
        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        let a = g.append_inst(bb, Opcode::Constant(ConstValue::Int(1)), Some(0));
        let b = g.append_inst(bb, Opcode::Binary(BinaryOp::Add), Some(5));
        g.add_input(b, a, 0);
        g.add_input(b, a, ACC_REG);
        let c = g.append_inst(bb, Opcode::Constant(ConstValue::Int(2)), Some(7));
        let d = g.append_inst(bb, Opcode::Binary(BinaryOp::Add), Some(12));
        g.add_input(d, c, 0);
        g.add_input(d, c, ACC_REG);
        let e = g.append_inst(bb, Opcode::Binary(BinaryOp::Add), Some(14));
        g.add_input(e, b, 0);
        g.add_input(e, d, ACC_REG);
        let ret = g.append_inst(bb, Opcode::Return, Some(16));
        g.add_input(ret, e, ACC_REG);

        RegAccAlloc::new(&mut g).run();
        let locals = allocate(&mut g).unwrap();

        assert_eq!(g.inst(d).dst, ACC_REG);
        assert_eq!(g.inst(a).dst, 0);
        assert_eq!(g.inst(b).dst, 1);
        assert_eq!(g.inst(c).dst, 0, "`a` is dead once `b` is computed");
        assert_eq!(locals, 2);
        assert_eq!(g.inst(arg).dst, (VIRTUAL_FRAME_SIZE - 1) as Reg);
        assert_eq!(g.inst(e).src, vec![1, ACC_REG]);
        assert_eq!(g.frame.regs_num, 2);
    }

    #[test]
    fn phis_become_copies_on_split_edges() {
        // bb1: x = arg; if x -> bb3 | bb2    bb2: y = x + x    bb3: p = phi(x, y); return p + x
        let mut g = Graph::new(FrameLayout::new(2, 1), SourceLanguage::EcmaScript);
        let b1 = g.add_block(Some(0), BlockFlags::empty());
        let b2 = g.add_block(Some(10), BlockFlags::empty());
        let b3 = g.add_block(Some(20), BlockFlags::empty());
        g.add_edge(g.start, b1);
        g.add_edge(b1, b3);
        g.add_edge(b1, b2);
        g.add_edge(b2, b3);
        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        let x = g.append_inst(b1, Opcode::Constant(ConstValue::Int(3)), Some(0));
        let branch = g.append_inst(b1, Opcode::IfImm(ZeroComparison::EQ), Some(5));
        g.add_input(branch, arg, ACC_REG);
        let y = g.append_inst(b2, Opcode::Binary(BinaryOp::Add), Some(10));
        g.add_input(y, x, 0);
        g.add_input(y, x, ACC_REG);
        let p = g.append_inst(b3, Opcode::Phi, Some(20));
        g.add_input(p, x, 0);
        g.add_input(p, y, 0);
        let sum = g.append_inst(b3, Opcode::Binary(BinaryOp::Add), Some(20));
        g.add_input(sum, x, 0);
        g.add_input(sum, p, ACC_REG);
        let ret = g.append_inst(b3, Opcode::Return, Some(22));
        g.add_input(ret, sum, ACC_REG);

        RegAccAlloc::new(&mut g).run();
        allocate(&mut g).unwrap();

        let split: Vec<BlockId> = g
            .live_blocks()
            .filter(|block| g.block(*block).flags.contains(BlockFlags::SPLIT))
            .collect();
        assert_eq!(split.len(), 1);
        assert_eq!(g.block(b3).preds[0], split[0]);

        let (px, pd) = (g.inst(x).dst, g.inst(p).dst);
        assert_ne!(px, pd, "`x` is still live after the phi");
        let copy = g.block(split[0]).insts[0];
        assert_eq!(
            g.inst(copy).opcode,
            Opcode::SpillFill(vec![SpillMove { dst: pd, src: px }])
        );
        let copy = *g.block(b2).insts.last().unwrap();
        assert_eq!(
            g.inst(copy).opcode,
            Opcode::SpillFill(vec![SpillMove {
                dst: pd,
                src: g.inst(y).dst
            }])
        );
    }

    #[test]
    fn catch_phi_inputs_are_copied() {
        let mut g = Graph::new(FrameLayout::new(1, 0), SourceLanguage::EcmaScript);
        let bb = g.add_block(Some(0), BlockFlags::empty());
        let handler = g.add_block(Some(20), BlockFlags::CATCH_BEGIN);
        let code = g.add_block(Some(20), BlockFlags::CATCH);
        g.add_edge(g.start, bb);
        g.add_edge(bb, handler);
        g.add_edge(handler, code);
        let v = g.append_inst(bb, Opcode::Constant(ConstValue::Int(1)), Some(0));
        let global = g.append_inst(bb, Opcode::LoadGlobal(0), Some(5));
        g.inst_mut(global).flags.insert(InstFlags::CAN_THROW);
        let call = g.append_inst(bb, Opcode::Call(crate::ir::CallKind::Fixed(1)), Some(8));
        g.add_input(call, global, ACC_REG);
        g.add_input(call, v, 0);
        g.inst_mut(call).flags.insert(InstFlags::CAN_THROW);
        g.append_inst(bb, Opcode::ReturnVoid, Some(11));
        let catch = g.append_inst(handler, Opcode::CatchPhi { acc: false }, Some(20));
        g.add_input(catch, v, 0);
        let ret = g.append_inst(code, Opcode::Return, Some(20));
        g.add_input(ret, catch, ACC_REG);

        RegAccAlloc::new(&mut g).run();
        allocate(&mut g).unwrap();

        assert_eq!(g.inst(catch).dst, 0);
        assert_eq!(g.inst(v).dst, 1);
        let copy = g.block(bb).insts[1];
        assert_eq!(
            g.inst(copy).opcode,
            Opcode::SpillFill(vec![SpillMove { dst: 0, src: 1 }])
        );
        assert!(g.inst(ret).flags.contains(InstFlags::NEEDS_ACC_LOAD));
        assert_eq!(g.inst(ret).src, vec![0]);
    }
}

use crate::analysis::Dominators;
use crate::ir::{BlockFlags, BlockId, Graph, InstId, Opcode};
use log::debug;

/// Sink constants and string loads towards their users
///
/// Each one moves to the nearest block dominating all of its uses (a phi input counts as a use at
/// the end of the corresponding predecessor), right before the first use in that block. Loading
/// a constant next to its only user is what lets the accumulator allocator keep it out of the
/// register file.
pub fn move_constants(graph: &mut Graph, doms: &Dominators) {
    let mut moved = 0;
    for inst in graph.live_insts() {
        let node = graph.inst(inst);
        if !matches!(node.opcode, Opcode::Constant(_) | Opcode::LoadString(_))
            || node.users.is_empty()
            || graph.has_catch_phi_user(inst)
        {
            continue;
        }
        let from = node.block;
        let target = match use_blocks(graph, inst)
            .into_iter()
            .reduce(|left, right| doms.common_dominator(left, right))
        {
            Some(target) => target,
            None => continue,
        };

        let target_block = graph.block(target);
        if target == graph.start
            || target_block.is_marker()
            || target_block.flags.contains(BlockFlags::CATCH)
            || target_block.loop_depth > graph.block(from).loop_depth
        {
            continue;
        }

        let first_user = target_block
            .insts
            .iter()
            .copied()
            .find(|candidate| graph.inst(*candidate).inputs.contains(&inst));
        match first_user {
            Some(user) => graph.move_before(user, inst),
            None => {
                graph.block_mut(from).insts.retain(|i| *i != inst);
                graph.insert_at_end(target, inst);
            }
        }
        if from != target {
            moved += 1;
        }
    }
    debug!("move constants: {} values moved to another block", moved);
}

/// Blocks where the value is used
fn use_blocks(graph: &Graph, inst: InstId) -> Vec<BlockId> {
    let mut blocks = vec![];
    for user in graph.distinct_users(inst) {
        let node = graph.inst(user);
        if node.opcode == Opcode::Phi {
            let preds = &graph.block(node.block).preds;
            for (pred, input) in preds.iter().zip(&node.inputs) {
                if *input == inst {
                    blocks.push(*pred);
                }
            }
        } else {
            blocks.push(node.block);
        }
    }
    blocks
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ConstValue, FrameLayout, ACC_REG};
    use crate::isa::ZeroComparison;
    use crate::program::SourceLanguage;

    #[test]
    fn sinks_into_the_only_using_branch() {
        // bb1: c = 7; x = arg; if x -> bb2 | bb3    bb2: return c    bb3: return undefined
        let mut g = Graph::new(FrameLayout::new(0, 1), SourceLanguage::EcmaScript);
        let b1 = g.add_block(Some(0), BlockFlags::empty());
        let b2 = g.add_block(Some(10), BlockFlags::empty());
        let b3 = g.add_block(Some(12), BlockFlags::empty());
        g.add_edge(g.start, b1);
        g.add_edge(b1, b2);
        g.add_edge(b1, b3);

        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        let c = g.append_inst(b1, Opcode::Constant(ConstValue::Int(7)), Some(0));
        let branch = g.append_inst(b1, Opcode::IfImm(ZeroComparison::EQ), Some(7));
        g.add_input(branch, arg, ACC_REG);
        let ret = g.append_inst(b2, Opcode::Return, Some(10));
        g.add_input(ret, c, ACC_REG);
        g.append_inst(b3, Opcode::ReturnVoid, Some(12));

        let doms = Dominators::compute(&g);
        move_constants(&mut g, &doms);
        assert_eq!(g.inst(c).block, b2);
        assert_eq!(g.block(b2).insts, vec![c, ret]);
        assert_eq!(g.block(b1).insts, vec![branch]);
    }

    #[test]
    fn never_sinks_into_a_loop() {
        // bb1: c = 7    bb2 (loop): use c; back to bb2 or exit to bb3
        let mut g = Graph::new(FrameLayout::new(0, 0), SourceLanguage::EcmaScript);
        let b1 = g.add_block(Some(0), BlockFlags::empty());
        let b2 = g.add_block(Some(5), BlockFlags::LOOP_HEADER);
        let b3 = g.add_block(Some(12), BlockFlags::empty());
        g.add_edge(g.start, b1);
        g.add_edge(b1, b2);
        g.add_edge(b2, b2);
        g.add_edge(b2, b3);
        g.block_mut(b2).loop_depth = 1;

        let c = g.append_inst(b1, Opcode::Constant(ConstValue::Int(7)), Some(0));
        let branch = g.append_inst(b2, Opcode::IfImm(ZeroComparison::NE), Some(5));
        g.add_input(branch, c, ACC_REG);
        g.append_inst(b3, Opcode::ReturnVoid, Some(12));

        let doms = Dominators::compute(&g);
        move_constants(&mut g, &doms);
        assert_eq!(g.inst(c).block, b1);
    }
}

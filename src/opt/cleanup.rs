use crate::ir::{Graph, InstId, Opcode};
use log::debug;

/// Remove copies, unused values, and phis that merge a single value
pub fn cleanup(graph: &mut Graph) {
    let folded = fold_moves(graph);
    let mut removed = 0;
    let mut simplified = 0;
    loop {
        let dead = remove_dead(graph);
        let trivial = remove_trivial_phis(graph);
        removed += dead;
        simplified += trivial;
        if dead == 0 && trivial == 0 {
            break;
        }
    }
    debug!(
        "cleanup: {} moves folded, {} dead values, {} trivial phis",
        folded, removed, simplified
    );
}

/// Make the users of every `Mov` use its input directly
fn fold_moves(graph: &mut Graph) -> usize {
    let mut folded = 0;
    for inst in graph.live_insts() {
        if graph.inst(inst).opcode != Opcode::Mov || graph.has_catch_phi_user(inst) {
            continue;
        }
        let input = graph.inst(inst).inputs[0];
        graph.replace_uses(inst, input);
        graph.remove_inst(inst);
        folded += 1;
    }
    folded
}

fn remove_dead(graph: &mut Graph) -> usize {
    let mut removed = 0;
    let mut changed = true;
    while changed {
        changed = false;
        for inst in graph.live_insts() {
            let node = graph.inst(inst);
            if node.is_removed() || !node.users.is_empty() || !node.opcode.is_removable() {
                continue;
            }
            graph.remove_inst(inst);
            removed += 1;
            changed = true;
        }
    }
    removed
}

/// The only value merged by a phi, not counting the phi itself
pub fn trivial_phi_value(graph: &Graph, phi: InstId) -> Option<InstId> {
    let mut value = None;
    for input in &graph.inst(phi).inputs {
        if *input == phi || Some(*input) == value {
            continue;
        }
        if value.is_some() {
            return None;
        }
        value = Some(*input);
    }
    value
}

fn remove_trivial_phis(graph: &mut Graph) -> usize {
    let mut removed = 0;
    for inst in graph.live_insts() {
        if graph.inst(inst).is_removed() || graph.inst(inst).opcode != Opcode::Phi {
            continue;
        }
        if let Some(value) = trivial_phi_value(graph, inst) {
            graph.replace_uses(inst, value);
            graph.remove_inst(inst);
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{BinaryOp, BlockFlags, ConstValue, FrameLayout, ACC_REG};
    use crate::program::SourceLanguage;

    #[test]
    fn folds_moves_and_removes_dead_code() {
        let mut g = Graph::new(FrameLayout::new(2, 0), SourceLanguage::EcmaScript);
        let b = g.add_block(Some(0), BlockFlags::empty());
        g.add_edge(g.start, b);
        let one = g.append_inst(b, Opcode::Constant(ConstValue::Int(1)), Some(0));
        let sta = g.append_inst(b, Opcode::Mov, Some(5));
        g.add_input(sta, one, ACC_REG);
        let unused = g.append_inst(b, Opcode::Constant(ConstValue::Int(2)), Some(7));
        let lda = g.append_inst(b, Opcode::Mov, Some(12));
        g.add_input(lda, sta, 0);
        let add = g.append_inst(b, Opcode::Binary(BinaryOp::Add), Some(14));
        g.add_input(add, sta, 0);
        g.add_input(add, lda, ACC_REG);
        let ret = g.append_inst(b, Opcode::Return, Some(16));
        g.add_input(ret, add, ACC_REG);

        cleanup(&mut g);
        assert_eq!(g.block(b).insts, vec![one, add, ret]);
        assert_eq!(g.inst(add).inputs, vec![one, one]);
        assert!(g.inst(unused).is_removed());
    }

    #[test]
    fn keeps_copies_feeding_handlers() {
        let mut g = Graph::new(FrameLayout::new(1, 0), SourceLanguage::EcmaScript);
        let b = g.add_block(Some(0), BlockFlags::empty());
        let handler = g.add_block(Some(20), BlockFlags::CATCH_BEGIN);
        g.add_edge(g.start, b);
        let one = g.append_inst(b, Opcode::Constant(ConstValue::Int(1)), Some(0));
        let sta = g.append_inst(b, Opcode::Mov, Some(5));
        g.add_input(sta, one, ACC_REG);
        let catch = g.append_inst(handler, Opcode::CatchPhi { acc: false }, Some(20));
        g.add_input(catch, sta, 0);
        let ret = g.append_inst(handler, Opcode::Return, Some(20));
        g.add_input(ret, catch, 0);

        cleanup(&mut g);
        assert!(!g.inst(sta).is_removed());
        assert_eq!(g.inst(catch).inputs, vec![sta]);
    }

    #[test]
    fn trivial_phis() {
        let mut g = Graph::new(FrameLayout::new(1, 0), SourceLanguage::EcmaScript);
        let b = g.add_block(Some(0), BlockFlags::empty());
        let phi = g.append_inst(b, Opcode::Phi, Some(0));
        let c = g.append_inst(b, Opcode::Constant(ConstValue::Null), Some(0));
        g.add_input(phi, c, 0);
        g.add_input(phi, phi, 0);
        assert_eq!(trivial_phi_value(&g, phi), Some(c));

        let d = g.append_inst(b, Opcode::Constant(ConstValue::True), Some(0));
        g.add_input(phi, d, 0);
        assert_eq!(trivial_phi_value(&g, phi), None);
    }
}

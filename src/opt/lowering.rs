use crate::ir::{Graph, Opcode, UnaryOp};
use log::debug;

/// Branch directly on the operand of a boolean conversion
///
/// A conditional jump already tests the truthiness of the accumulator, so
/// `jeqz (istrue x)` is `jeqz x` and `jeqz (isfalse x)` is `jnez x`.
pub fn lowering(graph: &mut Graph) {
    let mut lowered = 0;
    for inst in graph.live_insts() {
        let cmp = match graph.inst(inst).opcode {
            Opcode::IfImm(cmp) => cmp,
            _ => continue,
        };
        let test = graph.inst(inst).inputs[0];
        let negated = match graph.inst(test).opcode {
            Opcode::Unary(UnaryOp::IsTrue) => false,
            Opcode::Unary(UnaryOp::IsFalse) => true,
            _ => continue,
        };
        if graph.inst(test).users.len() != 1 {
            continue;
        }

        let operand = graph.inst(test).inputs[0];
        graph.set_input(inst, 0, operand);
        if negated {
            graph.inst_mut(inst).opcode = Opcode::IfImm(!cmp);
        }
        graph.remove_inst(test);
        lowered += 1;
    }
    debug!("lowering: {} boolean conversions folded into branches", lowered);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{BlockFlags, FrameLayout, ACC_REG};
    use crate::isa::ZeroComparison;
    use crate::program::SourceLanguage;

    #[test]
    fn folds_negated_test() {
        let mut g = Graph::new(FrameLayout::new(0, 1), SourceLanguage::EcmaScript);
        let b = g.add_block(Some(0), BlockFlags::empty());
        g.add_edge(g.start, b);
        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        let not = g.append_inst(b, Opcode::Unary(UnaryOp::IsFalse), Some(2));
        g.add_input(not, arg, ACC_REG);
        let branch = g.append_inst(b, Opcode::IfImm(ZeroComparison::EQ), Some(3));
        g.add_input(branch, not, ACC_REG);

        lowering(&mut g);
        assert_eq!(g.inst(branch).opcode, Opcode::IfImm(ZeroComparison::NE));
        assert_eq!(g.inst(branch).inputs, vec![arg]);
        assert!(g.inst(not).is_removed());
    }

    #[test]
    fn keeps_shared_test() {
        let mut g = Graph::new(FrameLayout::new(0, 1), SourceLanguage::EcmaScript);
        let b = g.add_block(Some(0), BlockFlags::empty());
        g.add_edge(g.start, b);
        let arg = g.append_inst(g.start, Opcode::Parameter(0), None);
        let test = g.append_inst(b, Opcode::Unary(UnaryOp::IsTrue), Some(2));
        g.add_input(test, arg, ACC_REG);
        let branch = g.append_inst(b, Opcode::IfImm(ZeroComparison::NE), Some(3));
        g.add_input(branch, test, ACC_REG);
        let ret = g.append_inst(b, Opcode::Return, Some(6));
        g.add_input(ret, test, ACC_REG);

        lowering(&mut g);
        assert_eq!(g.inst(branch).inputs, vec![test]);
    }
}

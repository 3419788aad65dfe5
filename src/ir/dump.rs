use super::{Graph, InstId, Opcode, Reg, ACC_REG, INVALID_REG};
use std::fmt;

/// Textual rendering of a graph, for trace logs
///
/// ```text
/// bb1 (pc 0) preds [bb0] succs [bb2]:
///   %0 = Constant(Int(1))() -> v0
///   %1 = Binary(Add)(%0 v0, %0 v0) -> acc NEEDS_ACC_LOAD
///   Return(%1 acc)
/// ```
pub struct Dump<'g>(pub &'g Graph);

struct RegName(Reg);

impl fmt::Display for RegName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ACC_REG => f.write_str("acc"),
            INVALID_REG => f.write_str("_"),
            reg => write!(f, "v{}", reg),
        }
    }
}

impl<'g> Dump<'g> {
    fn inst(&self, f: &mut fmt::Formatter<'_>, id: InstId) -> fmt::Result {
        let inst = self.0.inst(id);
        if inst.opcode.has_value() {
            write!(f, "  {:?} = ", id)?;
        } else {
            f.write_str("  ")?;
        }
        match &inst.opcode {
            Opcode::SpillFill(moves) => {
                f.write_str("spill_fill")?;
                for spill in moves {
                    write!(f, " {} <- {}", RegName(spill.dst), RegName(spill.src))?;
                }
                return writeln!(f);
            }
            opcode => write!(f, "{:?}(", opcode)?,
        }
        for (idx, (input, src)) in inst.inputs.iter().zip(&inst.src).enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?} {}", input, RegName(*src))?;
        }
        f.write_str(")")?;
        if inst.opcode.has_value() {
            write!(f, " -> {}", RegName(inst.dst))?;
        }
        if !inst.flags.is_empty() {
            write!(f, " {:?}", inst.flags)?;
        }
        writeln!(f)
    }
}

impl<'g> fmt::Display for Dump<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        for id in graph.linear_order() {
            let block = graph.block(id);
            write!(f, "{:?}", id)?;
            if let Some(pc) = block.pc {
                write!(f, " (pc {})", pc)?;
            }
            write!(f, " preds {:?} succs {:?}", block.preds, block.succs)?;
            if !block.flags.is_empty() {
                write!(f, " {:?}", block.flags)?;
            }
            writeln!(f, ":")?;
            for inst in block.all_insts() {
                self.inst(f, inst)?;
            }
        }
        Ok(())
    }
}

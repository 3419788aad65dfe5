use crate::analysis::Dominators;
use crate::ir::{BlockFlags, Graph, InstId, Opcode};
use log::debug;
use std::collections::HashMap;

/// Value of an instruction that can be shared with an equivalent one
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
enum ValueKey {
    Constant((u8, u64)),
    String(u32),
}

impl ValueKey {
    fn of(opcode: &Opcode) -> Option<ValueKey> {
        match opcode {
            Opcode::Constant(value) => Some(ValueKey::Constant(value.key())),
            Opcode::LoadString(id) => Some(ValueKey::String(*id)),
            _ => None,
        }
    }
}

/// Replace constants and string loads by an equivalent one that dominates them
///
/// Blocks are visited in reverse post-order, so a dominating instruction is always seen before
/// the ones it dominates. Handler code is left alone.
pub fn value_numbering(graph: &mut Graph, doms: &Dominators) {
    let mut available: HashMap<ValueKey, Vec<InstId>> = HashMap::new();
    let mut replaced = 0;

    for block in doms.rpo() {
        let flags = graph.block(*block).flags;
        if flags.intersects(BlockFlags::CATCH | BlockFlags::CATCH_BEGIN) {
            continue;
        }
        for inst in graph.block(*block).insts.clone() {
            let key = match ValueKey::of(&graph.inst(inst).opcode) {
                Some(key) => key,
                None => continue,
            };
            let candidates = available.entry(key).or_default();
            let dominating = candidates
                .iter()
                .copied()
                .find(|candidate| doms.dominates(graph.inst(*candidate).block, *block));
            match dominating {
                Some(existing) if !graph.has_catch_phi_user(inst) => {
                    graph.replace_uses(inst, existing);
                    graph.remove_inst(inst);
                    replaced += 1;
                }
                _ => candidates.push(inst),
            }
        }
    }
    debug!("value numbering: {} values replaced", replaced);
}

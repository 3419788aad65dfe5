use crate::ir::{BlockId, Graph, InstId, Opcode};
use std::collections::BTreeSet;

/// Values live at the boundaries of each block
///
/// Only values selected by the caller are tracked. Exceptional edges carry nothing: values flow
/// into handlers through catch-phis, which are not uses. A phi input is live at the end of the
/// corresponding predecessor rather than at the start of the phi's block.
#[derive(Clone, Debug)]
pub struct Liveness {
    pub live_in: Vec<BTreeSet<InstId>>,
    pub live_out: Vec<BTreeSet<InstId>>,
}

impl Liveness {
    pub fn compute(graph: &Graph, order: &[BlockId], tracked: impl Fn(InstId) -> bool) -> Liveness {
        let block_count = graph.blocks.len();
        let mut uses: Vec<BTreeSet<InstId>> = vec![BTreeSet::new(); block_count];
        let mut defs: Vec<BTreeSet<InstId>> = vec![BTreeSet::new(); block_count];
        let mut phi_uses: Vec<BTreeSet<InstId>> = vec![BTreeSet::new(); block_count];

        for block in order {
            let bb = graph.block(*block);
            for phi in &bb.phis {
                defs[block.0].insert(*phi);
                if !matches!(graph.inst(*phi).opcode, Opcode::Phi) {
                    continue;
                }
                for (pred, input) in bb.preds.iter().zip(&graph.inst(*phi).inputs) {
                    if tracked(*input) {
                        phi_uses[pred.0].insert(*input);
                    }
                }
            }
            for inst in &bb.insts {
                for input in &graph.inst(*inst).inputs {
                    if tracked(*input) && !defs[block.0].contains(input) {
                        uses[block.0].insert(*input);
                    }
                }
                defs[block.0].insert(*inst);
            }
        }

        let mut live_in: Vec<BTreeSet<InstId>> = vec![BTreeSet::new(); block_count];
        let mut live_out: Vec<BTreeSet<InstId>> = vec![BTreeSet::new(); block_count];
        let mut changed = true;
        while changed {
            changed = false;
            for block in order.iter().rev() {
                let mut out: BTreeSet<InstId> = phi_uses[block.0].clone();
                for succ in graph.normal_succs(*block) {
                    out.extend(live_in[succ.0].iter().copied());
                }

                let mut inn: BTreeSet<InstId> = uses[block.0].clone();
                inn.extend(out.difference(&defs[block.0]).copied());

                if out != live_out[block.0] || inn != live_in[block.0] {
                    live_out[block.0] = out;
                    live_in[block.0] = inn;
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }
}

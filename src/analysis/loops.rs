use super::Dominators;
use crate::ir::{BlockFlags, BlockId, Graph};
use std::collections::BTreeSet;

/// Natural loop
#[derive(Clone, Debug)]
pub struct Loop {
    pub header: BlockId,

    /// Sources of the back edges
    pub back_edges: Vec<BlockId>,

    /// Blocks of the loop, including the header
    pub body: BTreeSet<BlockId>,
}

/// Control flow that enters a loop somewhere other than its header
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IrreducibleLoop {
    /// Target of the offending edge
    pub block: BlockId,

    /// Source of the offending edge
    pub from: BlockId,
}

/// Find the loops of the graph, and record them on the blocks
///
/// Blocks get the `LOOP_HEADER` flag and their loop depth. The only predecessor of a header that
/// enters the loop is flagged as `LOOP_PREHEADER` if the header is its only normal successor.
/// Any retreating edge whose target does not dominate its source makes the graph irreducible.
pub fn analyze_loops(graph: &mut Graph, doms: &Dominators) -> Result<Vec<Loop>, IrreducibleLoop> {
    let mut loops: Vec<Loop> = vec![];

    for (from_idx, from) in doms.rpo().iter().enumerate() {
        for to in graph.block(*from).succs.clone() {
            let to_idx = match doms.rpo_index(to) {
                Some(idx) => idx,
                None => continue,
            };
            if to_idx > from_idx {
                continue;
            }
            if !doms.dominates(to, *from) {
                return Err(IrreducibleLoop {
                    block: to,
                    from: *from,
                });
            }
            match loops.iter_mut().find(|l| l.header == to) {
                Some(existing) => existing.back_edges.push(*from),
                None => loops.push(Loop {
                    header: to,
                    back_edges: vec![*from],
                    body: BTreeSet::new(),
                }),
            }
        }
    }

    for natural in loops.iter_mut() {
        natural.body.insert(natural.header);
        let mut worklist = natural.back_edges.clone();
        while let Some(block) = worklist.pop() {
            if natural.body.insert(block) {
                worklist.extend(graph.block(block).preds.iter().copied());
            }
        }
    }

    for block in graph.live_blocks().collect::<Vec<_>>() {
        let flags = &mut graph.block_mut(block).flags;
        flags.remove(BlockFlags::LOOP_HEADER | BlockFlags::LOOP_PREHEADER);
        graph.block_mut(block).loop_depth = 0;
    }
    for natural in &loops {
        graph
            .block_mut(natural.header)
            .flags
            .insert(BlockFlags::LOOP_HEADER);
        for block in &natural.body {
            graph.block_mut(*block).loop_depth += 1;
        }

        let entries: Vec<BlockId> = graph
            .block(natural.header)
            .preds
            .iter()
            .copied()
            .filter(|pred| !natural.body.contains(pred))
            .collect();
        if let [entry] = entries[..] {
            if graph.normal_succs(entry) == [natural.header] {
                graph
                    .block_mut(entry)
                    .flags
                    .insert(BlockFlags::LOOP_PREHEADER);
            }
        }
    }

    Ok(loops)
}

use crate::ir::{BlockId, Graph};

/// Blocks reachable from the start block, in reverse post-order
///
/// Successors are visited in order, so this is deterministic for a given graph.
pub fn reverse_post_order(graph: &Graph) -> Vec<BlockId> {
    let mut visited = vec![false; graph.blocks.len()];
    let mut post_order = vec![];

    // Stack of (block, index of the next successor to visit)
    let mut stack: Vec<(BlockId, usize)> = vec![(graph.start, 0)];
    visited[graph.start.0] = true;
    while let Some((block, next)) = stack.pop() {
        match graph.block(block).succs.get(next) {
            Some(succ) => {
                stack.push((block, next + 1));
                if !visited[succ.0] {
                    visited[succ.0] = true;
                    stack.push((*succ, 0));
                }
            }
            None => post_order.push(block),
        }
    }

    post_order.reverse();
    post_order
}

/// Blocks reachable from the start block, optionally ignoring edges into catch-begin blocks
pub fn reachable_blocks(graph: &Graph, follow_exceptional: bool) -> Vec<bool> {
    let mut reachable = vec![false; graph.blocks.len()];
    let mut worklist = vec![graph.start];
    reachable[graph.start.0] = true;
    while let Some(block) = worklist.pop() {
        for succ in &graph.block(block).succs {
            if !follow_exceptional && graph.block(*succ).is_catch_begin() {
                continue;
            }
            if !reachable[succ.0] {
                reachable[succ.0] = true;
                worklist.push(*succ);
            }
        }
    }
    reachable
}

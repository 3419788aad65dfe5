use super::reverse_post_order;
use crate::ir::{BlockId, Graph};

/// Dominator tree
///
/// Computed with the iterative algorithm from Cooper, Harvey, and Kennedy's "A Simple, Fast
/// Dominance Algorithm". Unreachable blocks have no immediate dominator.
#[derive(Clone, Debug)]
pub struct Dominators {
    idom: Vec<Option<BlockId>>,
    rpo_index: Vec<usize>,
    rpo: Vec<BlockId>,
}

impl Dominators {
    pub fn compute(graph: &Graph) -> Dominators {
        let rpo = reverse_post_order(graph);
        let mut rpo_index = vec![usize::MAX; graph.blocks.len()];
        for (idx, block) in rpo.iter().enumerate() {
            rpo_index[block.0] = idx;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; graph.blocks.len()];
        idom[graph.start.0] = Some(graph.start);

        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in &graph.block(*block).preds {
                    if idom[pred.0].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(other) => Self::intersect(&idom, &rpo_index, *pred, other),
                    });
                }
                if new_idom.is_some() && idom[block.0] != new_idom {
                    idom[block.0] = new_idom;
                    changed = true;
                }
            }
        }

        Dominators {
            idom,
            rpo_index,
            rpo,
        }
    }

    fn intersect(
        idom: &[Option<BlockId>],
        rpo_index: &[usize],
        mut left: BlockId,
        mut right: BlockId,
    ) -> BlockId {
        while left != right {
            while rpo_index[left.0] > rpo_index[right.0] {
                left = idom[left.0].unwrap_or(left);
            }
            while rpo_index[right.0] > rpo_index[left.0] {
                right = idom[right.0].unwrap_or(right);
            }
        }
        left
    }

    /// Reachable blocks in reverse post-order
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Position of a block in reverse post-order (`None` if unreachable)
    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index
            .get(block.0)
            .copied()
            .filter(|idx| *idx != usize::MAX)
    }

    /// Immediate dominator (the start block is its own immediate dominator)
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.0).copied().flatten()
    }

    /// Does `dominator` dominate `block`? Every block dominates itself.
    pub fn dominates(&self, dominator: BlockId, mut block: BlockId) -> bool {
        if self.rpo_index(dominator).is_none() || self.rpo_index(block).is_none() {
            return false;
        }
        loop {
            if block == dominator {
                return true;
            }
            match self.idom(block) {
                Some(parent) if parent != block => block = parent,
                _ => return false,
            }
        }
    }

    /// Nearest block dominating both arguments
    pub fn common_dominator(&self, left: BlockId, right: BlockId) -> BlockId {
        Self::intersect(&self.idom, &self.rpo_index, left, right)
    }
}

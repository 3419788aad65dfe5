use super::InstId;
use bitflags::bitflags;
use std::fmt;

/// Index of a basic block in its graph
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(pub usize);

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

bitflags! {
    pub struct BlockFlags: u16 {
        /// Entry of the function (empty, with the first code block as its only successor)
        const START = 0x0001;

        /// Common successor of every block that returns or throws
        const END = 0x0002;

        /// Marker block entering a try region
        const TRY_BEGIN = 0x0004;

        /// Marker block leaving a try region
        const TRY_END = 0x0008;

        /// Entry of an exception handler, only reachable through exceptional edges
        const CATCH_BEGIN = 0x0010;

        /// Member of a try region (see `BasicBlock::try_id`)
        const TRY = 0x0020;

        /// Only reachable from an exception handler
        const CATCH = 0x0040;
        const LOOP_HEADER = 0x0080;
        const LOOP_PREHEADER = 0x0100;

        /// Created when splitting a critical edge
        const SPLIT = 0x0200;
        const REMOVED = 0x0400;
    }
}

/// Basic block
///
/// Successor order is significant: for a block ending in a conditional branch, the first
/// successor is the branch target and the second one is the fallthrough. Edges to catch-begin
/// blocks are exceptional and always come after the normal successors.
///
/// Predecessor order is significant too: the inputs of every phi in the block are parallel to
/// `preds`.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,

    /// Phis and catch-phis, which all execute at the start of the block
    pub phis: Vec<InstId>,
    pub insts: Vec<InstId>,

    /// Program counter of the first bytecode instruction
    pub pc: Option<u32>,
    pub flags: BlockFlags,

    /// Innermost live try region containing this block
    pub try_id: Option<usize>,
    pub loop_depth: u32,
}

impl BasicBlock {
    pub fn new(pc: Option<u32>, flags: BlockFlags) -> BasicBlock {
        BasicBlock {
            preds: vec![],
            succs: vec![],
            phis: vec![],
            insts: vec![],
            pc,
            flags,
            try_id: None,
            loop_depth: 0,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(BlockFlags::REMOVED)
    }

    pub fn is_catch_begin(&self) -> bool {
        self.flags.contains(BlockFlags::CATCH_BEGIN)
    }

    /// Is this a try-begin, try-end, or catch-begin marker block?
    pub fn is_marker(&self) -> bool {
        self.flags
            .intersects(BlockFlags::TRY_BEGIN | BlockFlags::TRY_END | BlockFlags::CATCH_BEGIN)
    }

    /// Phis, then instructions
    pub fn all_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.phis.iter().chain(self.insts.iter()).copied()
    }
}

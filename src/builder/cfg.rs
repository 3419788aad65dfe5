use super::{BuildError, TRY_BLOCKS_LIMIT};
use crate::analysis::reachable_blocks;
use crate::ir::{BlockFlags, BlockId, Graph, Opcode, TryRegion};
use crate::isa::BytecodeInstruction;
use crate::program::{Function, SymbolTable};
use crate::util::{Interval, Offset, OffsetVec, SegmentTree};
use log::debug;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Range of program counters covered by a live try region
#[derive(Copy, Clone, Debug)]
pub struct RegionSpan {
    /// Index in [`Graph::try_regions`]
    pub region: usize,
    from: u32,
    until: u32,
}

impl Interval for RegionSpan {
    type Endpoint = u32;

    fn from(&self) -> u32 {
        self.from
    }

    fn until(&self) -> u32 {
        self.until
    }
}

/// Control flow skeleton of a function, before any instruction is built
pub struct ControlFlow {
    pub graph: Graph,

    /// Bytecode instructions (as indices in the decoded body) making up each code block
    pub block_insns: BTreeMap<BlockId, Vec<usize>>,

    /// Live try regions, for finding the handlers of a throwing instruction
    pub regions: SegmentTree<RegionSpan>,
}

/// Builds the blocks and edges of a function
///
/// Marker blocks for try regions are only created for regions with a reachable instruction that
/// can throw, and everything unreachable from the start block is swept at the end.
pub struct CfgBuilder<'a> {
    function: &'a Function,
    symbols: &'a SymbolTable,
    insns: &'a OffsetVec<BytecodeInstruction>,
    graph: Graph,

    /// Code block starting at each leader
    code_blocks: BTreeMap<u32, BlockId>,
    block_insns: BTreeMap<BlockId, Vec<usize>>,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(
        function: &'a Function,
        symbols: &'a SymbolTable,
        insns: &'a OffsetVec<BytecodeInstruction>,
        graph: Graph,
    ) -> CfgBuilder<'a> {
        CfgBuilder {
            function,
            symbols,
            insns,
            graph,
            code_blocks: BTreeMap::new(),
            block_insns: BTreeMap::new(),
        }
    }

    pub fn build(mut self) -> Result<ControlFlow, BuildError> {
        self.collect_try_regions()?;
        let leaders = self.find_leaders()?;
        for pc in leaders.iter().copied() {
            let block = self.graph.add_block(Some(pc), BlockFlags::empty());
            self.code_blocks.insert(pc, block);
        }
        self.create_catch_begins();
        self.connect_blocks(&leaders)?;
        self.connect_try_begins();
        self.connect_try_ends()?;
        self.sweep()?;
        let regions = self.tag_regions();

        Ok(ControlFlow {
            graph: self.graph,
            block_insns: self.block_insns,
            regions,
        })
    }

    fn code_len(&self) -> usize {
        self.insns.offset_len().0
    }

    fn is_boundary(&self, pc: u32) -> bool {
        self.insns.get_offset(Offset(pc as usize)).index().is_some()
    }

    fn insn(&self, idx: usize) -> (usize, &'a BytecodeInstruction) {
        let insns: &'a OffsetVec<BytecodeInstruction> = self.insns;
        match insns.get_index(idx) {
            Some((offset, insn)) => (offset.0, insn),
            None => unreachable!("no instruction at index {}", idx),
        }
    }

    /// Merge the exception table into regions, checking it along the way
    fn collect_try_regions(&mut self) -> Result<(), BuildError> {
        let try_blocks = &self.function.try_blocks;
        if try_blocks.len() > TRY_BLOCKS_LIMIT {
            return Err(BuildError::TooManyTryBlocks {
                count: try_blocks.len(),
            });
        }

        for try_block in try_blocks {
            let (begin_pc, end_pc) = (try_block.start_pc, try_block.end_pc());
            let malformed = BuildError::MalformedTryBlock { start_pc: begin_pc };
            let end_ok = end_pc as usize == self.code_len() || self.is_boundary(end_pc);
            if begin_pc >= end_pc || !self.is_boundary(begin_pc) || !end_ok {
                return Err(malformed);
            }
            for catch in &try_block.catches {
                if !self.is_boundary(catch.handler_pc) {
                    return Err(malformed);
                }
                if let Some(type_idx) = catch.type_idx {
                    if self.symbols.type_name(type_idx).is_none() {
                        return Err(BuildError::UnknownExceptionType { type_idx });
                    }
                }
            }

            let existing = self
                .graph
                .try_regions
                .iter_mut()
                .find(|region| region.begin_pc == begin_pc && region.end_pc == end_pc);
            match existing {
                Some(region) => region.catches.extend(try_block.catches.iter().cloned()),
                None => self.graph.try_regions.push(TryRegion {
                    begin_pc,
                    end_pc,
                    catches: try_block.catches.clone(),
                    catch_begins: vec![],
                    try_begin: None,
                    try_end: None,
                }),
            }
        }
        Ok(())
    }

    /// Program counters that start a basic block
    fn find_leaders(&self) -> Result<BTreeSet<u32>, BuildError> {
        if self.insns.is_empty() {
            return Err(BuildError::InvalidJumpTarget { pc: 0, target: 0 });
        }

        let mut leaders = BTreeSet::new();
        leaders.insert(0);
        for (offset, idx, insn) in self.insns.iter() {
            let target = match insn.jump_target(offset.0) {
                Some(target) => target,
                None => continue,
            };
            let target_pc = u32::try_from(target)
                .ok()
                .filter(|target_pc| self.is_boundary(*target_pc))
                .ok_or(BuildError::InvalidJumpTarget {
                    pc: offset.0,
                    target,
                })?;
            leaders.insert(target_pc);

            if insn.opcode.is_conditional() {
                let next = self.insns.next_offset(idx).0;
                if next >= self.code_len() {
                    return Err(BuildError::InvalidJumpTarget {
                        pc: offset.0,
                        target: next as isize,
                    });
                }
                leaders.insert(next as u32);
            }
        }

        for region in &self.graph.try_regions {
            leaders.insert(region.begin_pc);
            if (region.end_pc as usize) < self.code_len() {
                leaders.insert(region.end_pc);
            }
            leaders.extend(region.catches.iter().map(|catch| catch.handler_pc));
        }
        Ok(leaders)
    }

    /// One catch-begin block per distinct handler, in front of the handler code
    fn create_catch_begins(&mut self) {
        let mut by_handler: BTreeMap<u32, BlockId> = BTreeMap::new();
        for r in 0..self.graph.try_regions.len() {
            let mut catch_begins = vec![];
            for catch in self.graph.try_regions[r].catches.clone() {
                let handler_pc = catch.handler_pc;
                let catch_begin = match by_handler.get(&handler_pc) {
                    Some(block) => *block,
                    None => {
                        let block = self
                            .graph
                            .add_block(Some(handler_pc), BlockFlags::CATCH_BEGIN);
                        self.graph.add_edge(block, self.code_blocks[&handler_pc]);
                        by_handler.insert(handler_pc, block);
                        block
                    }
                };
                catch_begins.push(catch_begin);
            }
            self.graph.try_regions[r].catch_begins = catch_begins;
        }
    }

    fn end_block(&mut self) -> BlockId {
        match self.graph.end {
            Some(end) => end,
            None => {
                let end = self.graph.add_block(None, BlockFlags::END);
                self.graph.end = Some(end);
                end
            }
        }
    }

    /// Add the normal edges, recording which instructions belong to which block
    ///
    /// Instructions after a jump, return, or throw and before the next leader are dead and
    /// belong to no block.
    fn connect_blocks(&mut self, leaders: &BTreeSet<u32>) -> Result<(), BuildError> {
        self.graph.add_edge(self.graph.start, self.code_blocks[&0]);

        for (pc, block) in self.code_blocks.clone() {
            let mut idx = match self.insns.get_offset(Offset(pc as usize)).index() {
                Some(idx) => idx,
                None => unreachable!("leader {} is not an instruction", pc),
            };
            let mut members = vec![];
            loop {
                let (insn_pc, insn) = self.insn(idx);
                members.push(idx);
                let next = self.insns.next_offset(idx).0;

                if let Some(target) = insn.jump_target(insn_pc) {
                    let target = self.code_blocks[&(target as u32)];
                    self.graph.add_edge(block, target);
                    if insn.opcode.is_conditional() {
                        let fallthrough = self.code_blocks[&(next as u32)];
                        self.graph.add_edge(block, fallthrough);
                    }
                    break;
                }
                if insn.opcode.is_return_or_throw() {
                    let end = self.end_block();
                    self.graph.add_edge(block, end);
                    break;
                }
                if next >= self.code_len() {
                    return Err(BuildError::InvalidJumpTarget {
                        pc: insn_pc,
                        target: next as isize,
                    });
                }
                if leaders.contains(&(next as u32)) {
                    self.graph.add_edge(block, self.code_blocks[&(next as u32)]);
                    break;
                }
                idx += 1;
            }
            self.block_insns.insert(block, members);
        }
        Ok(())
    }

    fn block_can_throw(&self, block: BlockId) -> bool {
        self.block_insns
            .get(&block)
            .map_or(false, |members| {
                members.iter().any(|idx| self.insn(*idx).1.opcode.can_throw())
            })
    }

    /// Regions from outermost to innermost: by begin, then by decreasing end
    fn nesting_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.graph.try_regions.len()).collect();
        order.sort_by_key(|r| {
            let region = &self.graph.try_regions[*r];
            (region.begin_pc, Reverse(region.end_pc), *r)
        });
        order
    }

    /// Insert try-begin blocks for regions with a reachable throwing instruction
    ///
    /// Connecting a region makes its handlers reachable, which can in turn make other regions
    /// reachable, hence the loop.
    fn connect_try_begins(&mut self) {
        let order = self.nesting_order();
        loop {
            let reachable = reachable_blocks(&self.graph, true);
            let mut connected_any = false;
            for r in order.iter().copied() {
                let region = &self.graph.try_regions[r];
                if region.is_live() || region.catches.is_empty() {
                    continue;
                }
                let (begin_pc, end_pc) = (region.begin_pc, region.end_pc);
                let throws = self
                    .code_blocks
                    .range(begin_pc..end_pc)
                    .any(|(_, block)| reachable[block.0] && self.block_can_throw(*block));
                if !throws {
                    continue;
                }

                let first = self.code_blocks[&begin_pc];
                let try_begin = self.graph.insert_block_before(first, BlockFlags::TRY_BEGIN);
                self.graph
                    .append_inst(try_begin, Opcode::Try(r), Some(begin_pc));
                for catch_begin in self.graph.try_regions[r].handler_blocks() {
                    self.graph.add_edge(try_begin, catch_begin);
                }
                self.graph.try_regions[r].try_begin = Some(try_begin);
                connected_any = true;
            }
            if !connected_any {
                break;
            }
        }

        for (r, region) in self.graph.try_regions.iter().enumerate() {
            if !region.is_live() {
                debug!(
                    "dropping try region {} [{}, {}): nothing in it can throw",
                    r, region.begin_pc, region.end_pc
                );
            }
        }
    }

    /// Insert try-end blocks after the last reachable block of each live region
    fn connect_try_ends(&mut self) -> Result<(), BuildError> {
        let reachable = reachable_blocks(&self.graph, true);
        for r in self.nesting_order() {
            let region = &self.graph.try_regions[r];
            if !region.is_live() {
                continue;
            }
            let (begin_pc, end_pc) = (region.begin_pc, region.end_pc);
            let last = self
                .code_blocks
                .range(begin_pc..end_pc)
                .rev()
                .map(|(_, block)| *block)
                .find(|block| reachable[block.0])
                .ok_or(BuildError::MalformedTryBlock { start_pc: begin_pc })?;

            let ends_with_branch = self.block_insns[&last]
                .last()
                .map_or(false, |idx| self.insn(*idx).1.opcode.is_conditional());
            let succ_idx = if ends_with_branch { 1 } else { 0 };
            let try_end = self.graph.split_edge(last, succ_idx, BlockFlags::TRY_END);
            self.graph.block_mut(try_end).pc = Some(end_pc);
            self.graph
                .append_inst(try_end, Opcode::TryEnd(r), Some(end_pc));
            for catch_begin in self.graph.try_regions[r].handler_blocks() {
                self.graph.add_edge(try_end, catch_begin);
            }
            self.graph.try_regions[r].try_end = Some(try_end);
        }
        Ok(())
    }

    /// Remove every block unreachable from the start block
    fn sweep(&mut self) -> Result<(), BuildError> {
        let reachable = reachable_blocks(&self.graph, true);
        let dead: Vec<BlockId> = self
            .graph
            .live_blocks()
            .filter(|block| !reachable[block.0])
            .collect();
        for block in dead {
            self.graph.remove_block(block);
            self.block_insns.remove(&block);
        }
        self.code_blocks
            .retain(|_, block| reachable[block.0]);

        for region in &self.graph.try_regions {
            if let Some(try_begin) = region.try_begin {
                if self.graph.block(try_begin).is_removed() {
                    return Err(BuildError::MalformedTryBlock {
                        start_pc: region.begin_pc,
                    });
                }
            }
        }
        Ok(())
    }

    /// Tag region members and blocks only reachable from handlers
    fn tag_regions(&mut self) -> SegmentTree<RegionSpan> {
        let spans: Vec<RegionSpan> = self
            .graph
            .try_regions
            .iter()
            .enumerate()
            .filter(|(_, region)| region.is_live())
            .map(|(r, region)| RegionSpan {
                region: r,
                from: region.begin_pc,
                until: region.end_pc - 1,
            })
            .collect();
        let tree = SegmentTree::new(spans);

        for (pc, block) in &self.code_blocks {
            let innermost = tree
                .intervals_containing(pc)
                .into_iter()
                .max_by_key(|span| (span.from, Reverse(span.until)))
                .map(|span| span.region);
            if let Some(region) = innermost {
                let bb = self.graph.block_mut(*block);
                bb.flags.insert(BlockFlags::TRY);
                bb.try_id = Some(region);
            }
        }
        for (r, region) in self.graph.try_regions.clone().iter().enumerate() {
            for marker in [region.try_begin, region.try_end].iter().flatten() {
                self.graph.block_mut(*marker).try_id = Some(r);
            }
        }

        let normally_reachable = reachable_blocks(&self.graph, false);
        for block in self.graph.live_blocks().collect::<Vec<_>>() {
            if !normally_reachable[block.0] {
                self.graph.block_mut(block).flags.insert(BlockFlags::CATCH);
            }
        }
        tree
    }
}

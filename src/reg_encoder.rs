//! Register encoding
//!
//! After allocation, registers are compact but not necessarily encodable: most instructions only
//! have room for 8-bit register operands, the implicit `lda`/`sta` that code generation
//! synthesizes are 8-bit too, and `callrange` needs its arguments in consecutive registers. The
//! encoder fixes this up by renumbering the frame and inserting moves.
//!
//! ### Frame layout
//!
//! The allocator leaves locals at `0..L` and the `A` arguments at the very top of the virtual
//! frame. The encoder turns that into
//!
//! ```text
//! [ spill temps T ][ range temps R ][ locals L ][ args A ]
//! ```
//!
//! where `R` is the largest number of arguments of a `callrange` and `T` is the number of low
//! registers needed at once to hold operands that would otherwise not fit in their encoding.
//!
//! ### Passes
//!
//! Encoding goes through `Idle -> RenumberArgs -> ReserveTemps -> InsertSpills -> Idle`:
//!
//!   - `RenumberArgs` moves the arguments right after the locals, provided the frame has room
//!     for the range temps in between.
//!   - `ReserveTemps` finds how many spill temps are needed. Reserving temps shifts every other
//!     register up, which may push more operands out of range, so this iterates until the count
//!     is stable (it is bounded by the largest number of operands of an instruction).
//!   - `InsertSpills` applies the final numbering, copying out-of-range operands into spill
//!     temps before their instruction (and out-of-range results back after it), and copying
//!     every `callrange` argument into the range temps.

use crate::ir::{
    is_frame_reg, move_reg_limit, CallKind, Dump, FrameLayout, Graph, Inst, InstId, Opcode, Reg,
    SpillMove, ACC_REG, VIRTUAL_FRAME_SIZE,
};
use log::{debug, trace};
use std::fmt;

#[derive(Debug)]
pub enum EncodeError {
    /// There are not enough free registers between locals and arguments for the range temps
    NoRoomForRangeTemps { needed: usize, available: usize },

    /// The encoded frame is larger than allowed
    FrameOverflow { size: usize, limit: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::NoRoomForRangeTemps { needed, available } => write!(
                f,
                "{} range call temporaries needed, only {} registers free",
                needed, available
            ),
            EncodeError::FrameOverflow { size, limit } => {
                write!(f, "encoded frame has {} slots (limit is {})", size, limit)
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EncoderState {
    Idle,
    RenumberArgs,
    ReserveTemps,
    InsertSpills,
}

/// Frame being computed
#[derive(Copy, Clone, Default, Debug)]
struct EncodeContext {
    locals: usize,
    args: usize,
    range_temps: usize,
    spill_temps: usize,
}

impl EncodeContext {
    fn shift(&self) -> usize {
        self.spill_temps + self.range_temps
    }

    fn size(&self) -> usize {
        self.shift() + self.locals + self.args
    }

    /// Final number of a register, once arguments are renumbered
    fn encoded(&self, reg: Reg) -> Reg {
        if !is_frame_reg(reg) {
            return reg;
        }
        assert!(
            (reg as usize) < self.locals + self.args,
            "v{} is outside of a frame with {} locals and {} arguments",
            reg,
            self.locals,
            self.args
        );
        (reg as usize + self.shift()) as Reg
    }

    /// Does a move through the accumulator involve a register too large for `lda`/`sta`?
    fn is_far_acc_move(&self, spill: SpillMove) -> bool {
        let other = match (spill.dst, spill.src) {
            (ACC_REG, other) | (other, ACC_REG) => other,
            _ => return false,
        };
        is_frame_reg(other) && self.encoded(other) > move_reg_limit(ACC_REG)
    }
}

/// Does the instruction turn into bytecode reading its `src` and writing its `dst`?
///
/// Phis, argument definitions, and register catch-phis only name registers.
fn is_encoded(opcode: &Opcode) -> bool {
    !matches!(
        opcode,
        Opcode::Phi
            | Opcode::CatchPhi { acc: false }
            | Opcode::Parameter(_)
            | Opcode::SpillFill(_)
            | Opcode::Mov
    )
}

pub struct RegEncoder<'g> {
    graph: &'g mut Graph,
    frame_size_limit: usize,
    state: EncoderState,
    ctx: EncodeContext,
}

impl<'g> RegEncoder<'g> {
    pub fn new(graph: &'g mut Graph, frame_size_limit: usize) -> RegEncoder<'g> {
        RegEncoder {
            graph,
            frame_size_limit: frame_size_limit.min(VIRTUAL_FRAME_SIZE),
            state: EncoderState::Idle,
            ctx: EncodeContext::default(),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Make every register operand encodable, returning the final frame
    pub fn run(mut self) -> Result<FrameLayout, EncodeError> {
        self.enter(EncoderState::RenumberArgs);
        self.renumber_args()?;
        self.enter(EncoderState::ReserveTemps);
        self.reserve_temps()?;
        self.enter(EncoderState::InsertSpills);
        let inserted = self.insert_spills();
        self.enter(EncoderState::Idle);

        let ctx = self.ctx;
        let frame = &mut self.graph.frame;
        frame.regs_num = ctx.shift() + ctx.locals;
        frame.first_local = ctx.shift();
        debug!(
            "register encoding: {} spill temps, {} range temps, {} locals, {} args ({} moves)",
            ctx.spill_temps, ctx.range_temps, ctx.locals, ctx.args, inserted
        );
        trace!("after register encoding:\n{}", Dump(self.graph));
        Ok(self.graph.frame)
    }

    fn enter(&mut self, next: EncoderState) {
        use EncoderState::*;
        let legal = matches!(
            (self.state, next),
            (Idle, RenumberArgs)
                | (RenumberArgs, ReserveTemps)
                | (ReserveTemps, InsertSpills)
                | (InsertSpills, Idle)
        );
        assert!(legal, "register encoder cannot go from {:?} to {:?}", self.state, next);
        self.state = next;
    }

    fn renumber_args(&mut self) -> Result<(), EncodeError> {
        let locals = self.graph.frame.regs_num;
        let args = self.graph.frame.args_num;
        let range_temps = self
            .graph
            .live_insts()
            .into_iter()
            .filter(|inst| self.graph.inst(*inst).opcode == Opcode::Call(CallKind::Range))
            .map(|inst| self.graph.inst(inst).inputs.len() - 1)
            .max()
            .unwrap_or(0);

        let available = VIRTUAL_FRAME_SIZE.saturating_sub(args + locals);
        if available < range_temps {
            return Err(EncodeError::NoRoomForRangeTemps {
                needed: range_temps,
                available,
            });
        }

        let first_arg = VIRTUAL_FRAME_SIZE - args;
        let renumber = |reg: Reg| -> Reg {
            if is_frame_reg(reg) && reg as usize >= first_arg {
                (reg as usize - first_arg + locals) as Reg
            } else {
                reg
            }
        };
        for inst in self.graph.live_insts() {
            let node = self.graph.inst_mut(inst);
            node.dst = renumber(node.dst);
            for src in node.src.iter_mut() {
                *src = renumber(*src);
            }
            if let Opcode::SpillFill(moves) = &mut node.opcode {
                for spill in moves.iter_mut() {
                    spill.dst = renumber(spill.dst);
                    spill.src = renumber(spill.src);
                }
            }
        }

        self.ctx = EncodeContext {
            locals,
            args,
            range_temps,
            spill_temps: 0,
        };
        Ok(())
    }

    fn reserve_temps(&mut self) -> Result<(), EncodeError> {
        let insts = self.graph.live_insts();
        loop {
            let needed = insts
                .iter()
                .map(|inst| self.temps_needed(self.graph.inst(*inst)))
                .max()
                .unwrap_or(0);
            if needed <= self.ctx.spill_temps {
                break;
            }
            self.ctx.spill_temps = needed;
        }

        let size = self.ctx.size();
        if size > self.frame_size_limit {
            return Err(EncodeError::FrameOverflow {
                size,
                limit: self.frame_size_limit,
            });
        }
        Ok(())
    }

    /// Inputs that do not fit in their encoding with the current temps
    fn spilled_operands(&self, node: &Inst) -> Vec<usize> {
        if !is_encoded(&node.opcode) {
            return vec![];
        }
        let is_range = node.opcode == Opcode::Call(CallKind::Range);
        node.src
            .iter()
            .enumerate()
            .filter(|(idx, src)| {
                !(is_range && *idx > 0)
                    && is_frame_reg(**src)
                    && self.ctx.encoded(**src) > node.opcode.src_reg_limit()
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn is_dst_spilled(&self, node: &Inst) -> bool {
        is_encoded(&node.opcode)
            && is_frame_reg(node.dst)
            && self.ctx.encoded(node.dst) > node.opcode.dst_reg_limit()
    }

    fn temps_needed(&self, node: &Inst) -> usize {
        match &node.opcode {
            Opcode::SpillFill(moves) => {
                moves.iter().any(|spill| self.ctx.is_far_acc_move(*spill)) as usize
            }
            _ => self
                .spilled_operands(node)
                .len()
                .max(self.is_dst_spilled(node) as usize),
        }
    }

    fn insert_spills(&mut self) -> usize {
        let mut inserted = 0;
        for inst in self.graph.live_insts() {
            if let Opcode::SpillFill(moves) = &self.graph.inst(inst).opcode {
                let moves = self.encode_moves(moves);
                self.graph.inst_mut(inst).opcode = Opcode::SpillFill(moves);
                continue;
            }
            inserted += self.encode_operands(inst);
        }
        inserted
    }

    fn encode_moves(&self, moves: &[SpillMove]) -> Vec<SpillMove> {
        let mut encoded = vec![];
        for spill in moves {
            let far = self.ctx.is_far_acc_move(*spill);
            let spill = SpillMove {
                dst: self.ctx.encoded(spill.dst),
                src: self.ctx.encoded(spill.src),
            };
            if far {
                encoded.push(SpillMove { dst: 0, src: spill.src });
                encoded.push(SpillMove { dst: spill.dst, src: 0 });
            } else {
                encoded.push(spill);
            }
        }
        encoded
    }

    /// Renumber the operands of one instruction, returning the number of moves inserted
    fn encode_operands(&mut self, inst: InstId) -> usize {
        let ctx = self.ctx;
        let node = self.graph.inst(inst);
        let spilled = self.spilled_operands(node);
        let dst_spilled = self.is_dst_spilled(node);
        let is_range = node.opcode == Opcode::Call(CallKind::Range);
        let mut srcs: Vec<Reg> = node.src.iter().map(|src| ctx.encoded(*src)).collect();
        let mut dst = ctx.encoded(node.dst);

        let mut before = vec![];
        for (temp, idx) in spilled.into_iter().enumerate() {
            before.push(SpillMove {
                dst: temp as Reg,
                src: srcs[idx],
            });
            srcs[idx] = temp as Reg;
        }
        if is_range {
            for (arg, src) in srcs.iter_mut().enumerate().skip(1) {
                let temp = (ctx.spill_temps + arg - 1) as Reg;
                before.push(SpillMove { dst: temp, src: *src });
                *src = temp;
            }
        }
        let mut after = vec![];
        if dst_spilled {
            after.push(SpillMove { dst, src: 0 });
            dst = 0;
        }

        let node = self.graph.inst_mut(inst);
        node.src = srcs;
        node.dst = dst;
        let (block, pc) = (node.block, node.pc);
        let mut inserted = 0;
        if !before.is_empty() {
            let spill = self.graph.create_inst(Opcode::SpillFill(before), block, pc);
            self.graph.insert_before(inst, spill);
            inserted += 1;
        }
        if !after.is_empty() {
            let spill = self.graph.create_inst(Opcode::SpillFill(after), block, pc);
            self.graph.insert_after(inst, spill);
            inserted += 1;
        }
        inserted
    }
}

use super::{BlockId, Reg, ACC_REG, INVALID_REG, MAX_16_BIT_REG, MAX_8_BIT_REG};
use crate::isa::{self, Comparison, ZeroComparison};
use bitflags::bitflags;
use std::fmt;

/// Index of an instruction in its graph
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InstId(pub usize);

impl fmt::Debug for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Compile-time constant loaded into the accumulator
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ConstValue {
    Int(i32),
    Double(f64),
    Undefined,
    Null,
    True,
    False,
}

impl ConstValue {
    /// Key identifying the constant bit-for-bit (so `0.0` and `-0.0` stay distinct)
    pub fn key(&self) -> (u8, u64) {
        match self {
            ConstValue::Int(i) => (0, *i as u32 as u64),
            ConstValue::Double(d) => (1, d.to_bits()),
            ConstValue::Undefined => (2, 0),
            ConstValue::Null => (3, 0),
            ConstValue::True => (4, 0),
            ConstValue::False => (5, 0),
        }
    }

    pub fn opcode(&self) -> isa::Opcode {
        match self {
            ConstValue::Int(_) => isa::Opcode::Ldai,
            ConstValue::Double(_) => isa::Opcode::Fldai,
            ConstValue::Undefined => isa::Opcode::LdUndefined,
            ConstValue::Null => isa::Opcode::LdNull,
            ConstValue::True => isa::Opcode::LdTrue,
            ConstValue::False => isa::Opcode::LdFalse,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    pub fn opcode(self) -> isa::Opcode {
        match self {
            BinaryOp::Add => isa::Opcode::Add2,
            BinaryOp::Sub => isa::Opcode::Sub2,
            BinaryOp::Mul => isa::Opcode::Mul2,
            BinaryOp::Div => isa::Opcode::Div2,
            BinaryOp::Mod => isa::Opcode::Mod2,
            BinaryOp::And => isa::Opcode::And2,
            BinaryOp::Or => isa::Opcode::Or2,
            BinaryOp::Xor => isa::Opcode::Xor2,
            BinaryOp::Shl => isa::Opcode::Shl2,
            BinaryOp::Shr => isa::Opcode::Shr2,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Inc,
    Dec,
    IsTrue,
    IsFalse,
}

impl UnaryOp {
    pub fn opcode(self) -> isa::Opcode {
        match self {
            UnaryOp::Neg => isa::Opcode::Neg,
            UnaryOp::Not => isa::Opcode::Not,
            UnaryOp::Inc => isa::Opcode::Inc,
            UnaryOp::Dec => isa::Opcode::Dec,
            UnaryOp::IsTrue => isa::Opcode::IsTrue,
            UnaryOp::IsFalse => isa::Opcode::IsFalse,
        }
    }
}

/// Calling convention of a call
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CallKind {
    /// `callarg0`, `callarg1`, `callargs2`, or `callargs3`
    Fixed(u8),

    /// `callrange`: arguments in consecutive registers
    Range,
}

/// Register to register copy, inserted by register allocation or encoding
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SpillMove {
    pub dst: Reg,
    pub src: Reg,
}

/// Instruction opcodes
///
/// Operand order follows the bytecode: for instructions reading the accumulator, the
/// accumulator operand is the one at [`Opcode::acc_read_index`].
#[derive(Clone, PartialEq, Debug)]
pub enum Opcode {
    /// Incoming argument
    Parameter(u16),
    Constant(ConstValue),
    LoadString(u32),

    /// Plain copy (from `lda`, `sta`, or `mov`)
    Mov,

    /// `acc = input0 OP input1`
    Binary(BinaryOp),
    Compare(Comparison),
    Unary(UnaryOp),

    /// Callee is input 0, then the arguments
    Call(CallKind),
    LoadGlobal(u32),

    /// Property read from the object in input 0
    LoadObject(u32),

    /// Property write of input 1 into the object in input 0
    StoreObject(u32),

    /// Generator in input 0, value in input 1
    Suspend,

    /// Branch to the first successor if `input0 CMP input1` (or else the second)
    If(Comparison),

    /// Branch to the first successor if the input compares against "falsy"
    IfImm(ZeroComparison),
    Return,
    ReturnVoid,
    Throw,
    Phi,

    /// Value at a handler entry. For the accumulator, this is the exception being thrown
    CatchPhi { acc: bool },

    /// Start of the try region with this index in [`super::Graph::try_regions`]
    Try(usize),

    /// End of a try region
    TryEnd(usize),
    SpillFill(Vec<SpillMove>),
}

impl Opcode {
    /// Does the instruction read the accumulator, and at which input?
    pub fn acc_read_index(&self) -> Option<usize> {
        match self {
            Opcode::Binary(_)
            | Opcode::Compare(_)
            | Opcode::If(_)
            | Opcode::StoreObject(_)
            | Opcode::Suspend => Some(1),
            Opcode::Unary(_)
            | Opcode::IfImm(_)
            | Opcode::Return
            | Opcode::Throw
            | Opcode::LoadObject(_)
            | Opcode::Call(_) => Some(0),
            _ => None,
        }
    }

    /// Does the instruction leave its result in the accumulator?
    pub fn writes_acc(&self) -> bool {
        matches!(
            self,
            Opcode::Constant(_)
                | Opcode::LoadString(_)
                | Opcode::Binary(_)
                | Opcode::Compare(_)
                | Opcode::Unary(_)
                | Opcode::Call(_)
                | Opcode::LoadGlobal(_)
                | Opcode::LoadObject(_)
                | Opcode::Suspend
                | Opcode::CatchPhi { acc: true }
        )
    }

    /// Does emitting this instruction involve the accumulator at all?
    pub fn touches_acc(&self) -> bool {
        self.writes_acc() || self.acc_read_index().is_some()
    }

    /// Can the two inputs be swapped without changing the result?
    pub fn is_commutative(&self) -> bool {
        match self {
            Opcode::Binary(op) => op.is_commutative(),
            Opcode::Compare(cmp) => cmp.is_equality(),
            _ => false,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi | Opcode::CatchPhi { .. })
    }

    /// Ends its basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::If(_) | Opcode::IfImm(_) | Opcode::Return | Opcode::ReturnVoid | Opcode::Throw
        )
    }

    /// Can the instruction be dropped when its result is unused?
    pub fn is_removable(&self) -> bool {
        matches!(
            self,
            Opcode::Constant(_)
                | Opcode::LoadString(_)
                | Opcode::Mov
                | Opcode::Phi
                | Opcode::CatchPhi { .. }
                | Opcode::Unary(UnaryOp::IsTrue)
                | Opcode::Unary(UnaryOp::IsFalse)
        )
    }

    /// Does the instruction produce a value?
    pub fn has_value(&self) -> bool {
        !matches!(
            self,
            Opcode::StoreObject(_)
                | Opcode::If(_)
                | Opcode::IfImm(_)
                | Opcode::Return
                | Opcode::ReturnVoid
                | Opcode::Throw
                | Opcode::Try(_)
                | Opcode::TryEnd(_)
                | Opcode::SpillFill(_)
        )
    }

    /// Largest register encodable for an input, when it is not the accumulator
    ///
    /// An input in the accumulator position that lives in a register is loaded with `lda`, which
    /// only takes 8-bit registers.
    pub fn src_reg_limit(&self) -> Reg {
        match self {
            Opcode::Mov => MAX_16_BIT_REG,
            _ => MAX_8_BIT_REG,
        }
    }

    /// Largest register encodable for the result
    pub fn dst_reg_limit(&self) -> Reg {
        if self.writes_acc() {
            MAX_8_BIT_REG
        } else {
            MAX_16_BIT_REG
        }
    }
}

/// Largest register encodable on one side of a move, given the other side
///
/// Moves between registers are `mov v16, v16`, but moves to or from the accumulator are `lda` or
/// `sta`.
pub fn move_reg_limit(other: Reg) -> Reg {
    if other == ACC_REG {
        MAX_8_BIT_REG
    } else {
        MAX_16_BIT_REG
    }
}

bitflags! {
    /// Per-instruction properties that are not implied by the opcode
    pub struct InstFlags: u8 {
        const CAN_THROW = 0x01;

        /// The accumulator operand lives in a register and must be loaded with `lda` first
        const NEEDS_ACC_LOAD = 0x02;

        /// The instruction was removed from the graph
        const REMOVED = 0x04;
    }
}

/// Node of the instruction graph
#[derive(Clone, Debug)]
pub struct Inst {
    pub opcode: Opcode,
    pub block: BlockId,
    pub inputs: Vec<InstId>,

    /// Instructions that have this one as an input (once per use)
    pub users: Vec<InstId>,

    /// Register holding the result
    pub dst: Reg,

    /// Register holding each input, parallel to `inputs`
    pub src: Vec<Reg>,

    /// Program counter of the bytecode instruction this was built from
    pub pc: Option<u32>,
    pub flags: InstFlags,
}

impl Inst {
    pub fn new(opcode: Opcode, block: BlockId, pc: Option<u32>) -> Inst {
        Inst {
            opcode,
            block,
            inputs: vec![],
            users: vec![],
            dst: INVALID_REG,
            src: vec![],
            pc,
            flags: InstFlags::empty(),
        }
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(InstFlags::CAN_THROW)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(InstFlags::REMOVED)
    }

    /// Register holding the accumulator operand, if the instruction reads one
    pub fn acc_src(&self) -> Option<Reg> {
        self.opcode.acc_read_index().map(|idx| self.src[idx])
    }
}

use crate::analysis::IrreducibleLoop;
use crate::ir::BlockId;
use crate::isa::DecodeError;
use std::fmt;

/// Reasons a function body cannot be turned into a graph
#[derive(Debug)]
pub enum BuildError {
    /// Body is larger than the configured budget
    CodeTooLarge { size: usize, limit: usize },

    /// Registers, arguments, and accumulator exceed the configured budget
    TooManyRegisters { count: usize, limit: usize },

    /// More try blocks than the fixed limit
    TooManyTryBlocks { count: usize },

    /// Opcode without a lowering into the graph
    UnsupportedOpcode { pc: usize, byte: u8 },

    /// Body could not be decoded
    Decode(DecodeError),

    /// Loop with more than one entry
    IrreducibleLoop { block: BlockId, from: BlockId },

    /// Jump (or fallthrough) to a program counter that does not start an instruction
    InvalidJumpTarget { pc: usize, target: isize },

    /// Register operand outside the frame of the function
    InvalidRegister { pc: usize, reg: u16 },

    /// Register read before any definition reaches it
    UndefinedRegister { pc: usize, reg: u16 },

    /// Handler catches a type which is not in the module type table
    UnknownExceptionType { type_idx: u32 },

    /// Try block boundaries or handler that do not fall on instruction boundaries
    MalformedTryBlock { start_pc: u32 },
}

impl From<DecodeError> for BuildError {
    fn from(err: DecodeError) -> BuildError {
        match err {
            DecodeError::UnknownOpcode { pc, byte } => BuildError::UnsupportedOpcode { pc, byte },
            err => BuildError::Decode(err),
        }
    }
}

impl From<IrreducibleLoop> for BuildError {
    fn from(err: IrreducibleLoop) -> BuildError {
        BuildError::IrreducibleLoop {
            block: err.block,
            from: err.from,
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::CodeTooLarge { size, limit } => {
                write!(f, "code size {} exceeds the limit of {}", size, limit)
            }
            BuildError::TooManyRegisters { count, limit } => {
                write!(f, "{} virtual registers exceed the limit of {}", count, limit)
            }
            BuildError::TooManyTryBlocks { count } => write!(f, "too many try blocks ({})", count),
            BuildError::UnsupportedOpcode { pc, byte } => {
                write!(f, "unsupported opcode {:#04x} at pc {}", byte, pc)
            }
            BuildError::Decode(err) => write!(f, "cannot decode body: {:?}", err),
            BuildError::IrreducibleLoop { block, from } => {
                write!(f, "irreducible loop entered at {:?} from {:?}", block, from)
            }
            BuildError::InvalidJumpTarget { pc, target } => {
                write!(f, "invalid jump target {} at pc {}", target, pc)
            }
            BuildError::InvalidRegister { pc, reg } => {
                write!(f, "register v{} is outside the frame at pc {}", reg, pc)
            }
            BuildError::UndefinedRegister { pc, reg } => {
                write!(f, "register v{} is read before being defined at pc {}", reg, pc)
            }
            BuildError::UnknownExceptionType { type_idx } => {
                write!(f, "unknown exception type #{}", type_idx)
            }
            BuildError::MalformedTryBlock { start_pc } => {
                write!(f, "malformed try block starting at pc {}", start_pc)
            }
        }
    }
}

/// Virtual register number
pub type Reg = u16;

/// Marks an instruction without a register result (or an operand without a register)
pub const INVALID_REG: Reg = u16::MAX;

/// Pseudo-register standing for the accumulator (never a frame slot)
pub const ACC_REG: Reg = u16::MAX - 1;

/// Maximum number of slots in a frame (locals, temporaries, and arguments)
pub const VIRTUAL_FRAME_SIZE: usize = ACC_REG as usize;

/// Largest register usable in an 8-bit register operand (including the implicit `lda`/`sta`)
pub const MAX_8_BIT_REG: Reg = u8::MAX as Reg;

/// Largest register usable in a 16-bit register operand
pub const MAX_16_BIT_REG: Reg = (VIRTUAL_FRAME_SIZE - 1) as Reg;

/// Is this an actual slot in the frame?
pub fn is_frame_reg(reg: Reg) -> bool {
    (reg as usize) < VIRTUAL_FRAME_SIZE
}

/// Register frame of a function
///
/// Before register allocation, this is the frame of the original method: `regs_num` locals
/// followed by `args_num` arguments. Allocation and encoding update it to describe the final
/// frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FrameLayout {
    /// Number of registers before the arguments
    pub regs_num: usize,
    pub args_num: usize,

    /// First register holding a local value (registers below are scratch temporaries)
    pub first_local: usize,
}

impl FrameLayout {
    pub fn new(regs_num: usize, args_num: usize) -> FrameLayout {
        FrameLayout {
            regs_num,
            args_num,
            first_local: 0,
        }
    }

    /// Total number of slots in the frame
    pub fn size(&self) -> usize {
        self.regs_num + self.args_num
    }

    /// Register holding an argument
    pub fn arg_reg(&self, arg: u16) -> Reg {
        (self.regs_num + arg as usize) as Reg
    }
}

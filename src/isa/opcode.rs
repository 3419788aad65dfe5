use bitflags::bitflags;
use std::fmt;
use std::ops::Not;

/// Opcodes of the accumulator instruction set
///
/// Most instructions take one operand implicitly from the accumulator and leave their result
/// there. Registers are explicit operands, and for the vast majority of instructions must fit in
/// 8 bits (see [`Format`]).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Opcode {
    Nop,
    Lda,
    Sta,
    Mov,
    Ldai,
    Fldai,
    LdaStr,
    LdUndefined,
    LdNull,
    LdTrue,
    LdFalse,
    Add2,
    Sub2,
    Mul2,
    Div2,
    Mod2,
    And2,
    Or2,
    Xor2,
    Shl2,
    Shr2,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Neg,
    Not,
    Inc,
    Dec,
    IsTrue,
    IsFalse,
    Jmp,
    Jeqz,
    Jnez,
    Jeq,
    Jne,
    Jlt,
    Jle,
    Jgt,
    Jge,
    Return,
    ReturnUndefined,
    Throw,
    CallArg0,
    CallArg1,
    CallArgs2,
    CallArgs3,
    CallRange,
    TryLdGlobalByName,
    LdObjByName,
    StObjByName,
    SuspendGenerator,
}

/// Operand layout of an instruction, following the opcode byte
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Format {
    None,
    V8,
    V8V8,
    V8V8V8,
    V16V16,
    Imm32,
    FImm64,
    Id16,
    Id16V8,
    Jump16,
    V8Jump16,
    Imm8V8,
}

impl Format {
    /// Encoded size of an instruction with this format (including the opcode)
    pub fn size(self) -> usize {
        match self {
            Format::None => 1,
            Format::V8 => 2,
            Format::V8V8 | Format::Id16 | Format::Jump16 | Format::Imm8V8 => 3,
            Format::V8V8V8 | Format::Id16V8 | Format::V8Jump16 => 4,
            Format::V16V16 | Format::Imm32 => 5,
            Format::FImm64 => 9,
        }
    }

    /// Number of explicit register operands
    pub fn register_count(self) -> usize {
        match self {
            Format::None
            | Format::Imm32
            | Format::FImm64
            | Format::Id16
            | Format::Jump16 => 0,
            Format::V8 | Format::Id16V8 | Format::V8Jump16 | Format::Imm8V8 => 1,
            Format::V8V8 | Format::V16V16 => 2,
            Format::V8V8V8 => 3,
        }
    }

    /// Largest register number that can be encoded in a register operand of this format
    pub fn max_register(self) -> u16 {
        match self {
            Format::V16V16 => u16::MAX,
            _ => u8::MAX as u16,
        }
    }
}

bitflags! {
    /// Static properties of opcodes
    pub struct OpcodeFlags: u16 {
        /// Reads its implicit operand from the accumulator
        const ACC_READ = 0x0001;
        /// Leaves its result in the accumulator
        const ACC_WRITE = 0x0002;
        const CAN_THROW = 0x0004;
        const JUMP = 0x0008;
        const CONDITIONAL = 0x0010;
        const RETURN = 0x0020;
        /// Unconditionally throws (always terminates the block)
        const THROW = 0x0040;
        /// Returns to the caller, but execution may resume at the next instruction
        const SUSPEND = 0x0080;
        const CALL = 0x0100;
        /// Arguments are a contiguous block of registers
        const RANGE = 0x0200;
    }
}

impl Opcode {
    /// Every opcode, in encoding order
    pub const ALL: [Opcode; 54] = [
        Opcode::Nop,
        Opcode::Lda,
        Opcode::Sta,
        Opcode::Mov,
        Opcode::Ldai,
        Opcode::Fldai,
        Opcode::LdaStr,
        Opcode::LdUndefined,
        Opcode::LdNull,
        Opcode::LdTrue,
        Opcode::LdFalse,
        Opcode::Add2,
        Opcode::Sub2,
        Opcode::Mul2,
        Opcode::Div2,
        Opcode::Mod2,
        Opcode::And2,
        Opcode::Or2,
        Opcode::Xor2,
        Opcode::Shl2,
        Opcode::Shr2,
        Opcode::Eq,
        Opcode::NotEq,
        Opcode::Less,
        Opcode::LessEq,
        Opcode::Greater,
        Opcode::GreaterEq,
        Opcode::Neg,
        Opcode::Not,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::IsTrue,
        Opcode::IsFalse,
        Opcode::Jmp,
        Opcode::Jeqz,
        Opcode::Jnez,
        Opcode::Jeq,
        Opcode::Jne,
        Opcode::Jlt,
        Opcode::Jle,
        Opcode::Jgt,
        Opcode::Jge,
        Opcode::Return,
        Opcode::ReturnUndefined,
        Opcode::Throw,
        Opcode::CallArg0,
        Opcode::CallArg1,
        Opcode::CallArgs2,
        Opcode::CallArgs3,
        Opcode::CallRange,
        Opcode::TryLdGlobalByName,
        Opcode::LdObjByName,
        Opcode::StObjByName,
        Opcode::SuspendGenerator,
    ];

    /// Opcode byte
    pub fn byte(self) -> u8 {
        match self {
            Opcode::Nop => 0x00,
            Opcode::Lda => 0x01,
            Opcode::Sta => 0x02,
            Opcode::Mov => 0x03,
            Opcode::Ldai => 0x04,
            Opcode::Fldai => 0x05,
            Opcode::LdaStr => 0x06,
            Opcode::LdUndefined => 0x07,
            Opcode::LdNull => 0x08,
            Opcode::LdTrue => 0x09,
            Opcode::LdFalse => 0x0a,
            Opcode::Add2 => 0x10,
            Opcode::Sub2 => 0x11,
            Opcode::Mul2 => 0x12,
            Opcode::Div2 => 0x13,
            Opcode::Mod2 => 0x14,
            Opcode::And2 => 0x15,
            Opcode::Or2 => 0x16,
            Opcode::Xor2 => 0x17,
            Opcode::Shl2 => 0x18,
            Opcode::Shr2 => 0x19,
            Opcode::Eq => 0x20,
            Opcode::NotEq => 0x21,
            Opcode::Less => 0x22,
            Opcode::LessEq => 0x23,
            Opcode::Greater => 0x24,
            Opcode::GreaterEq => 0x25,
            Opcode::Neg => 0x28,
            Opcode::Not => 0x29,
            Opcode::Inc => 0x2a,
            Opcode::Dec => 0x2b,
            Opcode::IsTrue => 0x2c,
            Opcode::IsFalse => 0x2d,
            Opcode::Jmp => 0x30,
            Opcode::Jeqz => 0x31,
            Opcode::Jnez => 0x32,
            Opcode::Jeq => 0x33,
            Opcode::Jne => 0x34,
            Opcode::Jlt => 0x35,
            Opcode::Jle => 0x36,
            Opcode::Jgt => 0x37,
            Opcode::Jge => 0x38,
            Opcode::Return => 0x40,
            Opcode::ReturnUndefined => 0x41,
            Opcode::Throw => 0x42,
            Opcode::CallArg0 => 0x50,
            Opcode::CallArg1 => 0x51,
            Opcode::CallArgs2 => 0x52,
            Opcode::CallArgs3 => 0x53,
            Opcode::CallRange => 0x54,
            Opcode::TryLdGlobalByName => 0x60,
            Opcode::LdObjByName => 0x61,
            Opcode::StObjByName => 0x62,
            Opcode::SuspendGenerator => 0x70,
        }
    }

    /// Decode an opcode byte
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.byte() == byte)
    }

    pub fn format(self) -> Format {
        match self {
            Opcode::Nop
            | Opcode::LdUndefined
            | Opcode::LdNull
            | Opcode::LdTrue
            | Opcode::LdFalse
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::IsTrue
            | Opcode::IsFalse
            | Opcode::Return
            | Opcode::ReturnUndefined
            | Opcode::Throw
            | Opcode::CallArg0 => Format::None,

            Opcode::Lda
            | Opcode::Sta
            | Opcode::Add2
            | Opcode::Sub2
            | Opcode::Mul2
            | Opcode::Div2
            | Opcode::Mod2
            | Opcode::And2
            | Opcode::Or2
            | Opcode::Xor2
            | Opcode::Shl2
            | Opcode::Shr2
            | Opcode::Eq
            | Opcode::NotEq
            | Opcode::Less
            | Opcode::LessEq
            | Opcode::Greater
            | Opcode::GreaterEq
            | Opcode::CallArg1
            | Opcode::SuspendGenerator => Format::V8,

            Opcode::CallArgs2 => Format::V8V8,
            Opcode::CallArgs3 => Format::V8V8V8,
            Opcode::Mov => Format::V16V16,
            Opcode::Ldai => Format::Imm32,
            Opcode::Fldai => Format::FImm64,
            Opcode::LdaStr | Opcode::TryLdGlobalByName | Opcode::LdObjByName => Format::Id16,
            Opcode::StObjByName => Format::Id16V8,
            Opcode::Jmp | Opcode::Jeqz | Opcode::Jnez => Format::Jump16,
            Opcode::Jeq | Opcode::Jne | Opcode::Jlt | Opcode::Jle | Opcode::Jgt | Opcode::Jge => {
                Format::V8Jump16
            }
            Opcode::CallRange => Format::Imm8V8,
        }
    }

    pub fn flags(self) -> OpcodeFlags {
        let rw = OpcodeFlags::ACC_READ | OpcodeFlags::ACC_WRITE;
        match self {
            Opcode::Nop | Opcode::Mov => OpcodeFlags::empty(),
            Opcode::Lda
            | Opcode::Ldai
            | Opcode::Fldai
            | Opcode::LdaStr
            | Opcode::LdUndefined
            | Opcode::LdNull
            | Opcode::LdTrue
            | Opcode::LdFalse => OpcodeFlags::ACC_WRITE,
            Opcode::Sta => OpcodeFlags::ACC_READ,

            Opcode::Add2
            | Opcode::Sub2
            | Opcode::Mul2
            | Opcode::Div2
            | Opcode::Mod2
            | Opcode::And2
            | Opcode::Or2
            | Opcode::Xor2
            | Opcode::Shl2
            | Opcode::Shr2
            | Opcode::Eq
            | Opcode::NotEq
            | Opcode::Less
            | Opcode::LessEq
            | Opcode::Greater
            | Opcode::GreaterEq
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::LdObjByName => rw | OpcodeFlags::CAN_THROW,
            Opcode::IsTrue | Opcode::IsFalse => rw,

            Opcode::Jmp => OpcodeFlags::JUMP,
            Opcode::Jeqz
            | Opcode::Jnez
            | Opcode::Jeq
            | Opcode::Jne
            | Opcode::Jlt
            | Opcode::Jle
            | Opcode::Jgt
            | Opcode::Jge => OpcodeFlags::JUMP | OpcodeFlags::CONDITIONAL | OpcodeFlags::ACC_READ,

            Opcode::Return => OpcodeFlags::RETURN | OpcodeFlags::ACC_READ,
            Opcode::ReturnUndefined => OpcodeFlags::RETURN,
            Opcode::Throw => OpcodeFlags::THROW | OpcodeFlags::CAN_THROW | OpcodeFlags::ACC_READ,

            Opcode::CallArg0 | Opcode::CallArg1 | Opcode::CallArgs2 | Opcode::CallArgs3 => {
                rw | OpcodeFlags::CAN_THROW | OpcodeFlags::CALL
            }
            Opcode::CallRange => {
                rw | OpcodeFlags::CAN_THROW | OpcodeFlags::CALL | OpcodeFlags::RANGE
            }

            Opcode::TryLdGlobalByName => OpcodeFlags::ACC_WRITE | OpcodeFlags::CAN_THROW,
            Opcode::StObjByName => OpcodeFlags::ACC_READ | OpcodeFlags::CAN_THROW,
            Opcode::SuspendGenerator => {
                rw | OpcodeFlags::CAN_THROW | OpcodeFlags::RETURN | OpcodeFlags::SUSPEND
            }
        }
    }

    pub fn is_jump(self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP)
    }

    pub fn is_conditional(self) -> bool {
        self.flags().contains(OpcodeFlags::CONDITIONAL)
    }

    pub fn can_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::CAN_THROW)
    }

    pub fn is_suspend(self) -> bool {
        self.flags().contains(OpcodeFlags::SUSPEND)
    }

    /// Leaves the method (returns or throws), rather than continuing at a jump target
    pub fn is_return_or_throw(self) -> bool {
        let flags = self.flags();
        flags.contains(OpcodeFlags::THROW)
            || (flags.contains(OpcodeFlags::RETURN) && !flags.contains(OpcodeFlags::SUSPEND))
    }

    /// Control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        (self.is_jump() && !self.is_conditional()) || self.is_return_or_throw()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Lda => "lda",
            Opcode::Sta => "sta",
            Opcode::Mov => "mov",
            Opcode::Ldai => "ldai",
            Opcode::Fldai => "fldai",
            Opcode::LdaStr => "lda.str",
            Opcode::LdUndefined => "ldundefined",
            Opcode::LdNull => "ldnull",
            Opcode::LdTrue => "ldtrue",
            Opcode::LdFalse => "ldfalse",
            Opcode::Add2 => "add2",
            Opcode::Sub2 => "sub2",
            Opcode::Mul2 => "mul2",
            Opcode::Div2 => "div2",
            Opcode::Mod2 => "mod2",
            Opcode::And2 => "and2",
            Opcode::Or2 => "or2",
            Opcode::Xor2 => "xor2",
            Opcode::Shl2 => "shl2",
            Opcode::Shr2 => "shr2",
            Opcode::Eq => "eq",
            Opcode::NotEq => "noteq",
            Opcode::Less => "less",
            Opcode::LessEq => "lesseq",
            Opcode::Greater => "greater",
            Opcode::GreaterEq => "greatereq",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Inc => "inc",
            Opcode::Dec => "dec",
            Opcode::IsTrue => "istrue",
            Opcode::IsFalse => "isfalse",
            Opcode::Jmp => "jmp",
            Opcode::Jeqz => "jeqz",
            Opcode::Jnez => "jnez",
            Opcode::Jeq => "jeq",
            Opcode::Jne => "jne",
            Opcode::Jlt => "jlt",
            Opcode::Jle => "jle",
            Opcode::Jgt => "jgt",
            Opcode::Jge => "jge",
            Opcode::Return => "return",
            Opcode::ReturnUndefined => "returnundefined",
            Opcode::Throw => "throw",
            Opcode::CallArg0 => "callarg0",
            Opcode::CallArg1 => "callarg1",
            Opcode::CallArgs2 => "callargs2",
            Opcode::CallArgs3 => "callargs3",
            Opcode::CallRange => "callrange",
            Opcode::TryLdGlobalByName => "tryldglobalbyname",
            Opcode::LdObjByName => "ldobjbyname",
            Opcode::StObjByName => "stobjbyname",
            Opcode::SuspendGenerator => "suspendgenerator",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Comparison between a register (left) and the accumulator (right)
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Comparison {
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
}

impl Comparison {
    /// Comparisons whose negation is also a comparison, even on values that are not ordered
    /// (eg. `NaN`)
    pub fn is_equality(self) -> bool {
        matches!(self, Comparison::EQ | Comparison::NE)
    }

    /// Instruction that computes this comparison into the accumulator
    pub fn compare_opcode(self) -> Opcode {
        match self {
            Comparison::EQ => Opcode::Eq,
            Comparison::NE => Opcode::NotEq,
            Comparison::LT => Opcode::Less,
            Comparison::LE => Opcode::LessEq,
            Comparison::GT => Opcode::Greater,
            Comparison::GE => Opcode::GreaterEq,
        }
    }

    /// Instruction that jumps if this comparison holds
    pub fn jump_opcode(self) -> Opcode {
        match self {
            Comparison::EQ => Opcode::Jeq,
            Comparison::NE => Opcode::Jne,
            Comparison::LT => Opcode::Jlt,
            Comparison::LE => Opcode::Jle,
            Comparison::GT => Opcode::Jgt,
            Comparison::GE => Opcode::Jge,
        }
    }
}

impl Not for Comparison {
    type Output = Self;

    /// Logical negation (only sound for all values when `is_equality` holds)
    fn not(self) -> Self::Output {
        match self {
            Comparison::EQ => Comparison::NE,
            Comparison::NE => Comparison::EQ,
            Comparison::LT => Comparison::GE,
            Comparison::LE => Comparison::GT,
            Comparison::GT => Comparison::LE,
            Comparison::GE => Comparison::LT,
        }
    }
}

/// Test of the accumulator against "falsy"
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ZeroComparison {
    /// Accumulator is falsy
    EQ,

    /// Accumulator is truthy
    NE,
}

impl ZeroComparison {
    pub fn jump_opcode(self) -> Opcode {
        match self {
            ZeroComparison::EQ => Opcode::Jeqz,
            ZeroComparison::NE => Opcode::Jnez,
        }
    }
}

impl Not for ZeroComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            ZeroComparison::EQ => ZeroComparison::NE,
            ZeroComparison::NE => ZeroComparison::EQ,
        }
    }
}

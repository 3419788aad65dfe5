use crate::codegen::SynLabel;
use crate::ir::Reg;
use crate::isa::{Imm, Opcode};
use std::fmt;

/// Source position attached to an emitted instruction
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct InsDebug {
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Instruction in the optimized output
///
/// Labels are pseudo-instructions: they have no opcode and mark the position of the next real
/// instruction.
#[derive(Clone, PartialEq, Debug)]
pub struct Ins {
    pub opcode: Option<Opcode>,
    pub regs: Vec<Reg>,
    pub imms: Vec<Imm>,

    /// Jump target
    pub target: Option<SynLabel>,

    /// Label defined by this pseudo-instruction
    pub label: Option<SynLabel>,
    pub debug: InsDebug,
}

impl Ins {
    pub fn new(opcode: Opcode) -> Ins {
        Ins {
            opcode: Some(opcode),
            regs: vec![],
            imms: vec![],
            target: None,
            label: None,
            debug: InsDebug::default(),
        }
    }

    pub fn label(label: SynLabel) -> Ins {
        Ins {
            opcode: None,
            regs: vec![],
            imms: vec![],
            target: None,
            label: Some(label),
            debug: InsDebug::default(),
        }
    }

    pub fn with_regs(mut self, regs: &[Reg]) -> Ins {
        self.regs = regs.to_vec();
        self
    }

    pub fn with_imm(mut self, imm: Imm) -> Ins {
        self.imms.push(imm);
        self
    }

    pub fn with_target(mut self, target: SynLabel) -> Ins {
        self.target = Some(target);
        self
    }

    pub fn is_label(&self) -> bool {
        self.opcode.is_none()
    }
}

impl fmt::Display for Ins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = match (self.opcode, self.label) {
            (Some(opcode), _) => opcode,
            (None, Some(label)) => return write!(f, "{:?}:", label),
            (None, None) => return Ok(()),
        };
        write!(f, "    {}", opcode)?;
        let mut sep = " ";
        for imm in &self.imms {
            match imm {
                Imm::Int(i) => write!(f, "{}{}", sep, i)?,
                Imm::Float(d) => write!(f, "{}{:?}", sep, d)?,
                Imm::Id(id) => write!(f, "{}#{}", sep, id)?,
            }
            sep = ", ";
        }
        for reg in &self.regs {
            write!(f, "{}v{}", sep, reg)?;
            sep = ", ";
        }
        if let Some(target) = self.target {
            write!(f, "{}{:?}", sep, target)?;
        }
        Ok(())
    }
}

/// Entry of the output exception table
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CatchBlock {
    pub try_begin: SynLabel,
    pub try_end: SynLabel,
    pub catch_begin: SynLabel,
    pub catch_end: SynLabel,

    /// Exception type name, or `None` to catch anything
    pub exception: Option<String>,
}

/// Optimized body of a function
#[derive(Clone, PartialEq, Debug)]
pub struct EmittedCode {
    pub ins: Vec<Ins>,
    pub catch_blocks: Vec<CatchBlock>,

    /// Number of registers, excluding parameters (which follow right after)
    pub regs_num: usize,

    /// First register that holds a local value, after the temporaries reserved by encoding
    pub first_local_reg: Reg,
}

impl EmittedCode {
    /// Opcodes of the real instructions, in order
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.ins.iter().filter_map(|ins| ins.opcode).collect()
    }
}

use super::{BytecodeInstruction, Imm, Opcode};
use crate::codegen::LabelGenerator;
use std::collections::HashMap;
use std::fmt;
use std::io;

/// Label in a method being assembled
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct AsmLabel(usize);

impl fmt::Debug for AsmLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Writes method bodies in the binary format read by [`super::decode_method`]
///
/// Jumps refer to labels, which are resolved to relative offsets when calling `finish`. Errors
/// are sticky: the first one is kept and returned by `finish`, so instructions can be chained
/// without checking each one.
pub struct Assembler {
    code: Vec<u8>,
    bound: HashMap<AsmLabel, usize>,
    jumps: Vec<(usize, BytecodeInstruction, AsmLabel)>,
    next_label: usize,
    error: Option<AssembleError>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            code: vec![],
            bound: HashMap::new(),
            jumps: vec![],
            next_label: 0,
            error: None,
        }
    }

    /// Program counter of the next instruction
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Place a label at the current position
    pub fn bind(&mut self, label: AsmLabel) -> &mut Self {
        if self.bound.insert(label, self.code.len()).is_some() {
            self.error.get_or_insert(AssembleError::DuplicateLabel(label));
        }
        self
    }

    pub fn push(&mut self, insn: BytecodeInstruction) -> &mut Self {
        if let Err(err) = insn.encode(&mut self.code) {
            self.error.get_or_insert(AssembleError::Encode(err));
        }
        self
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.push(BytecodeInstruction::new(opcode))
    }

    pub fn reg(&mut self, opcode: Opcode, reg: u16) -> &mut Self {
        self.push(BytecodeInstruction::new(opcode).with_regs(&[reg]))
    }

    pub fn regs(&mut self, opcode: Opcode, regs: &[u16]) -> &mut Self {
        self.push(BytecodeInstruction::new(opcode).with_regs(regs))
    }

    pub fn imm(&mut self, opcode: Opcode, imm: Imm) -> &mut Self {
        self.push(BytecodeInstruction::new(opcode).with_imm(imm))
    }

    /// Emit a jump to a (possibly not yet bound) label
    pub fn jump(&mut self, opcode: Opcode, regs: &[u16], target: AsmLabel) -> &mut Self {
        let insn = BytecodeInstruction::new(opcode)
            .with_regs(regs)
            .with_jump_offset(0);
        self.jumps.push((self.code.len(), insn.clone(), target));
        self.push(insn)
    }

    /// Resolve jumps and return the method body
    pub fn finish(mut self) -> Result<Vec<u8>, AssembleError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        for (pc, insn, target) in std::mem::take(&mut self.jumps) {
            let target_pc = *self
                .bound
                .get(&target)
                .ok_or(AssembleError::UnboundLabel(target))?;
            let offset = target_pc as isize - pc as isize;
            let offset = i16::try_from(offset).map_err(|_| AssembleError::JumpTooFar { pc })?;
            let mut patched = vec![];
            insn.with_jump_offset(offset as i32)
                .encode(&mut patched)
                .map_err(AssembleError::Encode)?;
            self.code[pc..pc + patched.len()].copy_from_slice(&patched);
        }

        Ok(self.code)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Assembler::new()
    }
}

impl LabelGenerator<AsmLabel> for Assembler {
    fn fresh_label(&mut self) -> AsmLabel {
        let label = AsmLabel(self.next_label);
        self.next_label += 1;
        label
    }
}

#[derive(Debug)]
pub enum AssembleError {
    Encode(io::Error),
    DuplicateLabel(AsmLabel),
    UnboundLabel(AsmLabel),

    /// Jump at this pc does not fit in a 16-bit offset
    JumpTooFar { pc: usize },
}

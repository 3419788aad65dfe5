use super::{Format, Opcode};
use crate::util::Width;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Immediate operand
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Imm {
    Int(i64),
    Float(f64),

    /// Index into the module string table
    Id(u32),
}

/// One decoded instruction
///
/// Operands are kept in the order they appear in the encoding: registers first (in `regs`), then
/// the immediate, string id, or jump offset depending on the format.
#[derive(Clone, PartialEq, Debug)]
pub struct BytecodeInstruction {
    pub opcode: Opcode,
    pub regs: Vec<u16>,
    pub imm: Option<Imm>,

    /// Jump offset, relative to the start of this instruction
    pub jump_offset: Option<i32>,
}

impl BytecodeInstruction {
    pub fn new(opcode: Opcode) -> BytecodeInstruction {
        BytecodeInstruction {
            opcode,
            regs: vec![],
            imm: None,
            jump_offset: None,
        }
    }

    pub fn with_regs(mut self, regs: &[u16]) -> BytecodeInstruction {
        self.regs = regs.to_vec();
        self
    }

    pub fn with_imm(mut self, imm: Imm) -> BytecodeInstruction {
        self.imm = Some(imm);
        self
    }

    pub fn with_jump_offset(mut self, offset: i32) -> BytecodeInstruction {
        self.jump_offset = Some(offset);
        self
    }

    /// Absolute jump target, if this is a jump
    pub fn jump_target(&self, pc: usize) -> Option<isize> {
        self.jump_offset.map(|off| pc as isize + off as isize)
    }

    /// Immediate string id operand
    pub fn id(&self) -> Option<u32> {
        match self.imm {
            Some(Imm::Id(id)) => Some(id),
            _ => None,
        }
    }

    /// Decode the instruction starting at the current position of the reader
    pub fn decode<R: io::Read>(reader: &mut R, pc: usize) -> Result<Self, DecodeError> {
        let truncated = |err: io::Error| -> DecodeError {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                DecodeError::Truncated { pc }
            } else {
                DecodeError::IoError(err)
            }
        };

        let byte = reader.read_u8().map_err(truncated)?;
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { pc, byte })?;
        let mut insn = BytecodeInstruction::new(opcode);

        match opcode.format() {
            Format::None => (),
            Format::V8 => insn.regs.push(reader.read_u8().map_err(truncated)? as u16),
            Format::V8V8 | Format::V8V8V8 => {
                for _ in 0..opcode.format().register_count() {
                    insn.regs.push(reader.read_u8().map_err(truncated)? as u16);
                }
            }
            Format::V16V16 => {
                insn.regs.push(reader.read_u16::<LittleEndian>().map_err(truncated)?);
                insn.regs.push(reader.read_u16::<LittleEndian>().map_err(truncated)?);
            }
            Format::Imm32 => {
                let imm = reader.read_i32::<LittleEndian>().map_err(truncated)?;
                insn.imm = Some(Imm::Int(imm as i64));
            }
            Format::FImm64 => {
                let imm = reader.read_f64::<LittleEndian>().map_err(truncated)?;
                insn.imm = Some(Imm::Float(imm));
            }
            Format::Id16 => {
                let id = reader.read_u16::<LittleEndian>().map_err(truncated)?;
                insn.imm = Some(Imm::Id(id as u32));
            }
            Format::Id16V8 => {
                let id = reader.read_u16::<LittleEndian>().map_err(truncated)?;
                insn.imm = Some(Imm::Id(id as u32));
                insn.regs.push(reader.read_u8().map_err(truncated)? as u16);
            }
            Format::Jump16 => {
                let off = reader.read_i16::<LittleEndian>().map_err(truncated)?;
                insn.jump_offset = Some(off as i32);
            }
            Format::V8Jump16 => {
                insn.regs.push(reader.read_u8().map_err(truncated)? as u16);
                let off = reader.read_i16::<LittleEndian>().map_err(truncated)?;
                insn.jump_offset = Some(off as i32);
            }
            Format::Imm8V8 => {
                let count = reader.read_u8().map_err(truncated)?;
                insn.imm = Some(Imm::Int(count as i64));
                insn.regs.push(reader.read_u8().map_err(truncated)? as u16);
            }
        }

        Ok(insn)
    }

    /// Encode the instruction
    ///
    /// Operands that do not fit their format are reported as an `InvalidInput` error.
    pub fn encode<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        fn invalid(insn: &BytecodeInstruction) -> io::Error {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("operands do not fit `{}`: {:?}", insn.opcode, insn),
            )
        }
        let format = self.opcode.format();
        if self.regs.len() != format.register_count()
            || self.regs.iter().any(|reg| *reg > format.max_register())
        {
            return Err(invalid(self));
        }
        let reg8 = |idx: usize| self.regs[idx] as u8;
        let jump16 = || -> io::Result<i16> {
            self.jump_offset
                .and_then(|off| i16::try_from(off).ok())
                .ok_or_else(|| invalid(self))
        };
        let id16 = || -> io::Result<u16> {
            self.id()
                .and_then(|id| u16::try_from(id).ok())
                .ok_or_else(|| invalid(self))
        };

        writer.write_u8(self.opcode.byte())?;
        match format {
            Format::None => (),
            Format::V8 | Format::V8V8 | Format::V8V8V8 => {
                for idx in 0..self.regs.len() {
                    writer.write_u8(reg8(idx))?;
                }
            }
            Format::V16V16 => {
                writer.write_u16::<LittleEndian>(self.regs[0])?;
                writer.write_u16::<LittleEndian>(self.regs[1])?;
            }
            Format::Imm32 => match self.imm {
                Some(Imm::Int(imm)) => {
                    let imm = i32::try_from(imm).map_err(|_| invalid(self))?;
                    writer.write_i32::<LittleEndian>(imm)?;
                }
                _ => return Err(invalid(self)),
            },
            Format::FImm64 => match self.imm {
                Some(Imm::Float(imm)) => writer.write_f64::<LittleEndian>(imm)?,
                _ => return Err(invalid(self)),
            },
            Format::Id16 => writer.write_u16::<LittleEndian>(id16()?)?,
            Format::Id16V8 => {
                writer.write_u16::<LittleEndian>(id16()?)?;
                writer.write_u8(reg8(0))?;
            }
            Format::Jump16 => writer.write_i16::<LittleEndian>(jump16()?)?,
            Format::V8Jump16 => {
                writer.write_u8(reg8(0))?;
                writer.write_i16::<LittleEndian>(jump16()?)?;
            }
            Format::Imm8V8 => match self.imm {
                Some(Imm::Int(count @ 0..=255)) => {
                    writer.write_u8(count as u8)?;
                    writer.write_u8(reg8(0))?;
                }
                _ => return Err(invalid(self)),
            },
        }

        Ok(())
    }
}

impl Width for BytecodeInstruction {
    fn width(&self) -> usize {
        self.opcode.format().size()
    }
}

#[derive(Debug)]
pub enum DecodeError {
    /// Byte at this pc is not an opcode
    UnknownOpcode { pc: usize, byte: u8 },

    /// Method body ends in the middle of the instruction starting at this pc
    Truncated { pc: usize },

    IoError(io::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn round_trip(insn: BytecodeInstruction) {
        let mut bytes = vec![];
        insn.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), insn.width());
        let decoded = BytecodeInstruction::decode(&mut Cursor::new(&bytes), 0).unwrap();
        assert_eq!(decoded, insn);
    }

    #[test]
    fn encodes_every_format() {
        round_trip(BytecodeInstruction::new(Opcode::Return));
        round_trip(BytecodeInstruction::new(Opcode::Add2).with_regs(&[200]));
        round_trip(BytecodeInstruction::new(Opcode::CallArgs3).with_regs(&[1, 2, 3]));
        round_trip(BytecodeInstruction::new(Opcode::Mov).with_regs(&[300, 4000]));
        round_trip(BytecodeInstruction::new(Opcode::Ldai).with_imm(Imm::Int(-7)));
        round_trip(BytecodeInstruction::new(Opcode::Fldai).with_imm(Imm::Float(1.5)));
        round_trip(BytecodeInstruction::new(Opcode::StObjByName).with_imm(Imm::Id(9)).with_regs(&[3]));
        round_trip(BytecodeInstruction::new(Opcode::Jle).with_regs(&[2]).with_jump_offset(-12));
        round_trip(
            BytecodeInstruction::new(Opcode::CallRange)
                .with_imm(Imm::Int(4))
                .with_regs(&[10]),
        );
    }

    #[test]
    fn rejects_wide_registers_in_narrow_formats() {
        let insn = BytecodeInstruction::new(Opcode::Sta).with_regs(&[256]);
        assert!(insn.encode(&mut vec![]).is_err());
    }

    #[test]
    fn reports_truncation_and_unknown_bytes() {
        let err = BytecodeInstruction::decode(&mut Cursor::new(&[0x04, 0x01]), 6).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { pc: 6 }));

        let err = BytecodeInstruction::decode(&mut Cursor::new(&[0xee]), 2).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOpcode { pc: 2, byte: 0xee }));
    }
}

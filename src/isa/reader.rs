use super::{BytecodeInstruction, DecodeError};
use crate::util::OffsetVec;
use std::io::Cursor;

/// Decode a full method body
///
/// The resulting vector is indexed by program counter, so jump targets can be checked against
/// instruction boundaries with [`OffsetVec::get_offset`].
pub fn decode_method(code: &[u8]) -> Result<OffsetVec<BytecodeInstruction>, DecodeError> {
    let mut cursor = Cursor::new(code);
    let mut insns = OffsetVec::new();
    while (cursor.position() as usize) < code.len() {
        let pc = cursor.position() as usize;
        let insn = BytecodeInstruction::decode(&mut cursor, pc)?;
        insns.push(insn);
    }
    Ok(insns)
}

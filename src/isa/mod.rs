//! Accumulator-based instruction set
//!
//! ### Encoding
//!
//! Each instruction is one opcode byte followed by its operands, little-endian. The operand
//! layout is determined entirely by the opcode (see [`Format`]). Jump offsets are relative to the
//! address of the jump itself.
//!
//! Instructions take their implicit operand from the accumulator and (mostly) write their result
//! back to it. For example, `a + b` with `a` in `v0` and `b` in `v1` is:
//!
//! ```text
//! lda v1
//! add2 v0     # acc = v0 + acc
//! ```
//!
//! This module provides the reading side of method bodies ([`decode_method`]), which is what the
//! optimizer consumes, as well as an [`Assembler`] for writing them.

mod assembler;
mod instruction;
mod opcode;
mod reader;

pub use assembler::*;
pub use instruction::*;
pub use opcode::*;
pub use reader::*;

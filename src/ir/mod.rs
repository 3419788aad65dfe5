//! Instruction graph
//!
//! A function is represented as a control flow graph of [`BasicBlock`]s holding instructions in
//! SSA form. Both live in arenas owned by the [`Graph`] and refer to each other through
//! [`BlockId`] and [`InstId`] indices, which makes loops and phi back-edges unproblematic.
//!
//! ### Registers
//!
//! Every instruction carries the register holding its result (`dst`) and the register holding
//! each of its inputs (`src`). Right after building, these are the registers of the original
//! bytecode, so the graph can be emitted as-is. Accumulator and register allocation then
//! rewrite them, and the register encoder makes them fit the instruction formats.
//!
//! ### Exceptions
//!
//! Try regions are delimited by marker blocks. A try-begin block has an exceptional edge to the
//! catch-begin block of each of its handlers (so does the try-end block). Values flowing into a
//! handler do not follow those edges: they are gathered by the catch-phis of the catch-begin
//! block, which have one input for every definition that was live when some instruction of the
//! region could have thrown.

mod basic_block;
mod dump;
mod frame;
mod graph;
mod inst;

pub use basic_block::*;
pub use dump::*;
pub use frame::*;
pub use graph::*;
pub use inst::*;

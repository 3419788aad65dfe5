//! Optimizing backend for accumulator-based bytecode
//!
//! Each function body is decoded into an instruction graph in SSA form ([`builder`]), optimized
//! ([`opt`]), has its values assigned to the accumulator ([`reg_acc_alloc`]) or to registers
//! ([`regalloc`]), gets those registers renumbered to fit the encoding ([`reg_encoder`]), and is
//! finally emitted back as a linear instruction list ([`codegen`]). [`optimize`] drives all of
//! this over a whole [`program::Program`].

pub mod analysis;
pub mod builder;
pub mod codegen;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod optimize;
pub mod program;
pub mod reg_acc_alloc;
pub mod reg_encoder;
pub mod regalloc;
pub mod util;

pub use optimize::{optimize_bytecode, optimize_function, OptimizerOptions};

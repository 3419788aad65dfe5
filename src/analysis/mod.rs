//! Control and data flow analyses over the instruction graph
//!
//! These are recomputed by the passes that need them rather than kept up to date: the graph only
//! stores the results that outlive a pass (loop flags and depths on blocks).

mod dominators;
mod liveness;
mod loops;
mod rpo;

pub use dominators::*;
pub use liveness::*;
pub use loops::*;
pub use rpo::*;

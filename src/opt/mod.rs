//! Optimizations on the instruction graph
//!
//! The sequence is fixed (see [`optimize`]) and none of the passes change the control flow, so
//! dominators computed once at the start stay valid throughout.
//!
//! Values that flow into a catch-phi are never replaced or moved: the register allocator copies
//! each of them into the catch-phi's register right after its definition, which is only correct
//! if the definition stays where the exception table says it is.

mod cleanup;
mod lowering;
mod move_constants;
mod value_numbering;

pub use cleanup::*;
pub use lowering::*;
pub use move_constants::*;
pub use value_numbering::*;

use crate::analysis::Dominators;
use crate::ir::{Dump, Graph};
use log::trace;

/// Run every optimization, in order
pub fn optimize(graph: &mut Graph) {
    cleanup(graph);
    let doms = Dominators::compute(graph);
    value_numbering(graph, &doms);
    lowering(graph);
    cleanup(graph);
    move_constants(graph, &doms);
    trace!("after optimizations:\n{}", Dump(graph));
}

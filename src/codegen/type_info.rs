use crate::ir::{Graph, InstId};
use crate::program::{argument_order, Ins, TypeOrder, TypeRef};
use std::collections::HashMap;

/// Type annotation for emitted code
///
/// Argument types keep their (negative) orders. The type of an instruction goes to the last
/// instruction emitted for it, and is dropped if nothing was emitted (eg. for a value that ended
/// up folded away or merged into another one).
pub fn emitted_types(
    graph: &Graph,
    ins: &[Ins],
    origins: &[Option<InstId>],
) -> Vec<(TypeOrder, TypeRef)> {
    let mut last_emitted: HashMap<InstId, TypeOrder> = HashMap::new();
    let real = ins.iter().zip(origins).filter(|(ins, _)| !ins.is_label());
    for (order, (_, origin)) in real.enumerate() {
        if let Some(origin) = origin {
            last_emitted.insert(*origin, order as TypeOrder);
        }
    }

    let mut types: Vec<(TypeOrder, TypeRef)> = graph
        .types
        .args
        .iter()
        .map(|(arg, typ)| (argument_order(*arg), typ.clone()))
        .collect();
    let mut inst_types: Vec<(TypeOrder, TypeRef)> = graph
        .types
        .insts
        .iter()
        .filter_map(|(inst, typ)| last_emitted.get(inst).map(|order| (*order, typ.clone())))
        .collect();
    inst_types.sort_by_key(|(order, _)| *order);
    types.extend(inst_types);
    types
}

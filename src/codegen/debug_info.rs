use crate::program::{DebugTable, Ins, SourceLanguage};

/// Attach source positions to emitted instructions
///
/// `pcs` is parallel to `ins` and holds the original program counter each instruction was
/// emitted for, if any. Instructions without a position (moves added by register allocation,
/// jumps added by the layout) take the one of the previous instruction, and those at the very
/// start take the first position found. Labels are left alone.
///
/// Columns are only tracked for EcmaScript.
pub fn attach_positions(
    ins: &mut [Ins],
    pcs: &[Option<u32>],
    table: &DebugTable,
    language: SourceLanguage,
) {
    debug_assert_eq!(ins.len(), pcs.len());
    let real: Vec<usize> = (0..ins.len()).filter(|idx| !ins[*idx].is_label()).collect();

    let lines = repair(real.iter().map(|idx| pcs[*idx].and_then(|pc| table.line_at(pc))));
    for (idx, line) in real.iter().zip(lines) {
        ins[*idx].debug.line = Some(line);
    }

    if language == SourceLanguage::EcmaScript {
        let columns = repair(real.iter().map(|idx| pcs[*idx].and_then(|pc| table.column_at(pc))));
        for (idx, column) in real.iter().zip(columns) {
            ins[*idx].debug.column = Some(column);
        }
    }
}

/// Fill gaps forward, then leading gaps backward (and everything with 0 if there is nothing)
fn repair(values: impl Iterator<Item = Option<u32>>) -> Vec<u32> {
    let values: Vec<Option<u32>> = values.collect();
    let mut last = values.iter().flatten().next().copied().unwrap_or(0);
    values
        .into_iter()
        .map(|value| {
            if let Some(value) = value {
                last = value;
            }
            last
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codegen::SynLabel;
    use crate::isa::Opcode;

    #[test]
    fn gaps_are_filled() {
        assert_eq!(
            repair(vec![None, Some(3), None, Some(5), None].into_iter()),
            vec![3, 3, 3, 5, 5]
        );
        assert_eq!(repair(vec![None, None].into_iter()), vec![0, 0]);
    }

    #[test]
    fn columns_only_for_ecmascript() {
        let table = DebugTable {
            lines: vec![(0, 7), (4, 8)],
            columns: vec![(0, 1), (4, 12)],
        };
        let listing = || {
            vec![
                Ins::label(SynLabel::FIRST),
                Ins::new(Opcode::Nop),
                Ins::new(Opcode::Lda),
                Ins::new(Opcode::Return),
            ]
        };
        let pcs = [None, None, Some(4), None];

        let mut ins = listing();
        attach_positions(&mut ins, &pcs, &table, SourceLanguage::EcmaScript);
        assert_eq!(ins[0].debug.line, None);
        let lines: Vec<_> = ins[1..].iter().map(|ins| ins.debug.line).collect();
        assert_eq!(lines, vec![Some(8), Some(8), Some(8)]);
        assert_eq!(ins[3].debug.column, Some(12));

        let mut ins = listing();
        attach_positions(&mut ins, &pcs, &table, SourceLanguage::PandaAssembly);
        assert_eq!(ins[3].debug.line, Some(8));
        assert_eq!(ins[3].debug.column, None);
    }
}

mod common;

use bytecode_optimizer::builder::BuildError;
use bytecode_optimizer::isa::Opcode;
use bytecode_optimizer::optimize::{optimize_bytecode, OptimizeError, OptimizerOptions, SkipReason};
use common::*;

#[test]
fn add_twice_uses_the_accumulator() {
    init();
    let mut program = program_with(vec![add_twice()]);
    let reports = optimize_bytecode(&mut program, &OptimizerOptions::default());
    let stats = reports[0].result.as_ref().unwrap();
    assert!(stats.frame_after <= stats.frame_before);

    let code = program.functions[0].emitted.as_ref().unwrap();
    let opcodes = code.opcodes();
    assert_eq!(opcodes.iter().filter(|op| **op == Opcode::Ldai).count(), 1);
    assert_eq!(opcodes.iter().filter(|op| **op == Opcode::Add2).count(), 1);
    assert_eq!(opcodes.last(), Some(&Opcode::Return));

    // the sum stays in the accumulator until it is returned
    let add = opcodes.iter().position(|op| *op == Opcode::Add2).unwrap();
    assert_eq!(opcodes[add + 1], Opcode::Return);
    assert_eq!(run(code, &[]), Some(2));
}

#[test]
fn loops_compute_the_same_values() {
    init();
    for opt_level in [0, 1, 2] {
        let mut program = program_with(vec![sum_below()]);
        let options = OptimizerOptions::new(opt_level, &[]).unwrap();
        let reports = optimize_bytecode(&mut program, &options);
        assert!(reports[0].is_optimized(), "{:?}", reports[0].result);

        let code = program.functions[0].emitted.as_ref().unwrap();
        for n in 0..6 {
            assert_eq!(run(code, &[n]), Some(n * (n - 1) / 2), "n = {}", n);
        }
    }
}

#[test]
fn branches_compute_the_same_values() {
    init();
    for opt_level in [0, 2] {
        let mut program = program_with(vec![distance()]);
        let options = OptimizerOptions::new(opt_level, &[]).unwrap();
        optimize_bytecode(&mut program, &options);

        let code = program.functions[0].emitted.as_ref().unwrap();
        for (a, b) in [(3, 1), (1, 3), (2, 2), (-4, 5)] {
            assert_eq!(run(code, &[a, b]), Some((a - b).abs()), "a = {}, b = {}", a, b);
        }
    }
}

#[test]
fn try_without_throwing_instruction_is_dropped() {
    init();
    let mut program = program_with(vec![guarded(false)]);
    let reports = optimize_bytecode(&mut program, &OptimizerOptions::default());
    assert!(reports[0].is_optimized());

    let code = program.functions[0].emitted.as_ref().unwrap();
    assert!(code.catch_blocks.is_empty());
    assert!(!code.opcodes().contains(&Opcode::Return));
    assert_eq!(code.opcodes().last(), Some(&Opcode::ReturnUndefined));
}

#[test]
fn try_catch_is_preserved() {
    init();
    let mut program = program_with(vec![guarded(true)]);
    let reports = optimize_bytecode(&mut program, &OptimizerOptions::default());
    assert!(reports[0].is_optimized(), "{:?}", reports[0].result);

    let code = program.functions[0].emitted.as_ref().unwrap();
    assert_eq!(code.catch_blocks.len(), 1);
    let catch = &code.catch_blocks[0];
    assert_eq!(catch.exception.as_deref(), Some("Error"));

    let labels = label_positions(code);
    let (begin, end) = (labels[&catch.try_begin], labels[&catch.try_end]);
    assert!(begin < end);
    let covered: Vec<Opcode> = code.ins[begin..end]
        .iter()
        .filter_map(|ins| ins.opcode)
        .collect();
    assert!(covered.contains(&Opcode::CallArg0));
    assert!(!covered.contains(&Opcode::ReturnUndefined));

    // the handler is only entered through the exception table
    let handler = labels[&catch.catch_begin];
    assert!(code.ins.iter().all(|ins| ins.target != Some(catch.catch_begin)));
    let handled: Vec<Opcode> = code.ins[handler..]
        .iter()
        .filter_map(|ins| ins.opcode)
        .collect();
    assert_eq!(handled.last(), Some(&Opcode::Return));
}

#[test]
fn unoptimized_round_trip() {
    init();
    let original = add_twice();
    let mut program = program_with(vec![original.clone()]);
    let options = OptimizerOptions::new(0, &[]).unwrap();
    optimize_bytecode(&mut program, &options);

    let code = program.functions[0].emitted.as_ref().unwrap();
    assert_eq!(
        code.opcodes(),
        vec![
            Opcode::Ldai,
            Opcode::Sta,
            Opcode::Lda,
            Opcode::Add2,
            Opcode::Sta,
            Opcode::Lda,
            Opcode::Return
        ]
    );
    assert_eq!(code.regs_num, original.regs_num as usize);
}

#[test]
fn irreducible_loops_are_left_alone() {
    init();
    let mut program = program_with(vec![irreducible(), add_twice()]);
    let reports = optimize_bytecode(&mut program, &OptimizerOptions::default());

    assert!(matches!(
        reports[0].result,
        Err(OptimizeError::Build(BuildError::IrreducibleLoop { .. }))
    ));
    assert!(program.functions[0].emitted.is_none());
    assert!(reports[1].is_optimized());
}

#[test]
fn skip_filters() {
    init();
    let mut program = program_with(vec![guarded(true), add_twice(), sum_below()]);
    let mut options = OptimizerOptions::new(2, &["^sum_"]).unwrap();
    options.skip_functions_with_handlers = true;
    let reports = optimize_bytecode(&mut program, &options);

    let names: Vec<&str> = reports.iter().map(|report| report.name.as_str()).collect();
    assert_eq!(names, vec!["guarded", "add_twice", "sum_below"]);
    assert!(matches!(
        reports[0].result,
        Err(OptimizeError::Skipped(SkipReason::HasHandlers))
    ));
    assert!(reports[1].is_optimized());
    assert!(matches!(
        reports[2].result,
        Err(OptimizeError::Skipped(SkipReason::Excluded))
    ));
    assert!(program.functions[2].emitted.is_none());
}

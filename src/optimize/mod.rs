//! Per-function driver of the whole pipeline
//!
//! Every function of a program goes through the same sequence:
//!
//!  1. skip checks (name filter, exception handlers, frame size, source language)
//!  2. decoding of its type annotation, if it has one
//!  3. graph construction
//!  4. optimizations, accumulator allocation, register allocation and encoding (`opt_level >= 1`)
//!  5. code generation
//!
//! A failure anywhere only affects the function at hand: its original body is kept and the next
//! function is processed as usual. On success, the generated code is stored in
//! [`Function::emitted`](crate::program::Function::emitted).

mod errors;
mod settings;

pub use errors::*;
pub use settings::*;

use crate::builder::{BuildLimits, IrBuilder};
use crate::codegen::BytecodeGen;
use crate::opt::optimize;
use crate::program::{LiteralArray, Program, SourceLanguage, TypeOrder, TypeRef};
use crate::reg_acc_alloc::RegAccAlloc;
use crate::reg_encoder::RegEncoder;
use crate::regalloc::allocate;
use log::{debug, info};

/// Summary of a successfully optimized function
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FunctionStats {
    /// Registers plus arguments, before and after
    pub frame_before: usize,
    pub frame_after: usize,

    /// Number of values placed in the accumulator
    pub acc_values: usize,

    /// Number of emitted instructions, not counting labels
    pub instructions: usize,
}

/// Outcome of optimizing one function of a program
#[derive(Debug)]
pub struct FunctionReport {
    pub name: String,
    pub result: Result<FunctionStats, OptimizeError>,
}

impl FunctionReport {
    pub fn is_optimized(&self) -> bool {
        self.result.is_ok()
    }
}

/// Optimize every function of a program
///
/// Functions that fail or are skipped keep their original body. There is one report per
/// function, in program order.
pub fn optimize_bytecode(program: &mut Program, options: &OptimizerOptions) -> Vec<FunctionReport> {
    let mut reports = Vec::with_capacity(program.functions.len());
    for index in 0..program.functions.len() {
        let result = optimize_function(program, index, options);
        let name = program.functions[index].name.clone();
        match &result {
            Ok(stats) => info!(
                "optimized {}: frame {} -> {}, {} instructions",
                name, stats.frame_before, stats.frame_after, stats.instructions
            ),
            Err(OptimizeError::Skipped(reason)) => info!("skipped {}: {}", name, reason),
            Err(err) => info!("not optimized {}: {}", name, err),
        }
        reports.push(FunctionReport { name, result });
    }
    reports
}

/// Optimize the function at `index`
///
/// The function is only modified if this succeeds.
pub fn optimize_function(
    program: &mut Program,
    index: usize,
    options: &OptimizerOptions,
) -> Result<FunctionStats, OptimizeError> {
    let function = &program.functions[index];
    check_skip(program, index, options)?;

    let annotation = match &function.type_annotation {
        Some(key) => match program.literal_arrays.get(key) {
            Some(array) => Some(array.to_type_annotation()?),
            None => {
                debug!("{}: type annotation {} is missing", function.name, key);
                None
            }
        },
        None => None,
    };

    let limits = BuildLimits {
        max_bytecode_size: options.max_bytecode_size,
        max_vregs: options.max_vregs,
    };
    let mut graph = IrBuilder::new(function, &program.symbols, limits)
        .with_types(annotation.clone().unwrap_or_default())
        .build()?;

    let mut acc_values = 0;
    if options.opt_level >= 1 {
        optimize(&mut graph);
        acc_values = RegAccAlloc::new(&mut graph).run();
        allocate(&mut graph)?;
        let layout = RegEncoder::new(&mut graph, options.frame_size_limit()).run()?;
        debug!(
            "{}: frame {} -> {} (first local v{})",
            function.name,
            function.frame_size(),
            layout.size(),
            layout.first_local
        );
    }

    let generated = BytecodeGen::new(&graph, &program.symbols, options.opt_level)
        .generate(&function.debug);
    let stats = FunctionStats {
        frame_before: function.frame_size(),
        frame_after: graph.frame.size(),
        acc_values,
        instructions: generated.code.ins.iter().filter(|ins| !ins.is_label()).count(),
    };

    if annotation.is_some() {
        store_types(program, index, &generated.types);
    }
    program.functions[index].emitted = Some(generated.code);
    Ok(stats)
}

fn check_skip(program: &Program, index: usize, options: &OptimizerOptions) -> Result<(), SkipReason> {
    let function = &program.functions[index];
    if options.is_excluded(&function.name) {
        return Err(SkipReason::Excluded);
    }
    if options.skip_functions_with_handlers && function.has_handlers() {
        return Err(SkipReason::HasHandlers);
    }
    let limit = options.frame_size_limit();
    if function.frame_size() > limit {
        return Err(SkipReason::FrameTooLarge {
            size: function.frame_size(),
            limit,
        });
    }
    if options.opt_level >= 1 && function.language == SourceLanguage::PandaAssembly {
        return Err(SkipReason::NotAccumulatorBased);
    }
    Ok(())
}

/// Store the re-keyed type annotation under a new literal key
fn store_types(program: &mut Program, index: usize, types: &[(TypeOrder, TypeRef)]) {
    let key = program.fresh_literal_key(&program.functions[index].name, "types");
    program
        .literal_arrays
        .insert(key.clone(), LiteralArray::from_type_annotation(types));
    program.functions[index].type_annotation = Some(key);
}

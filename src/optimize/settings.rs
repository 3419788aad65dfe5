use super::OptimizeError;
use crate::ir::VIRTUAL_FRAME_SIZE;
use regex::Regex;

/// Knobs of the optimizer
pub struct OptimizerOptions {
    /// Optimization level
    ///
    /// At level 0, functions are rebuilt into a graph and emitted right back, keeping their
    /// original registers. Any higher level runs every pass.
    pub opt_level: u8,

    /// Functions whose body is larger than this (in bytes) are not optimized
    pub max_bytecode_size: usize,

    /// Functions with more registers than this (counting arguments and the accumulator) are not
    /// optimized
    pub max_vregs: usize,

    /// Largest frame an optimized function may end up with
    ///
    /// Functions whose frame is already larger are skipped, and encoding fails for functions that
    /// would outgrow it. Never more than [`VIRTUAL_FRAME_SIZE`].
    pub frame_size_limit: usize,

    /// Leave functions with exception handlers alone
    pub skip_functions_with_handlers: bool,

    /// Functions whose name matches any of these patterns are left alone
    pub excluded_functions: Vec<Regex>,
}

impl OptimizerOptions {
    pub const DEFAULT_MAX_BYTECODE_SIZE: usize = 30_000;

    /// Options for an optimization level, excluding functions matching some patterns
    pub fn new(opt_level: u8, excluded_functions: &[&str]) -> Result<OptimizerOptions, OptimizeError> {
        let excluded_functions = excluded_functions
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OptimizerOptions {
            opt_level,
            excluded_functions,
            ..OptimizerOptions::default()
        })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_functions
            .iter()
            .any(|pattern| pattern.is_match(name))
    }

    /// Frame limit, clamped to what the virtual machine supports
    pub fn frame_size_limit(&self) -> usize {
        self.frame_size_limit.min(VIRTUAL_FRAME_SIZE)
    }
}

impl Default for OptimizerOptions {
    fn default() -> OptimizerOptions {
        OptimizerOptions {
            opt_level: 2,
            max_bytecode_size: Self::DEFAULT_MAX_BYTECODE_SIZE,
            max_vregs: VIRTUAL_FRAME_SIZE,
            frame_size_limit: VIRTUAL_FRAME_SIZE,
            skip_functions_with_handlers: false,
            excluded_functions: vec![],
        }
    }
}

//! Programs, as seen by the optimizer
//!
//! A [`Program`] is a set of functions plus the module-level tables they refer to. The optimizer
//! reads function bodies and exception tables, and writes back [`EmittedCode`] for every function
//! it manages to optimize. The only module table it writes to is the literal table, and only to
//! add type annotations under fresh keys.

mod function;
mod literals;
mod output;

pub use function::*;
pub use literals::*;
pub use output::*;

use std::collections::BTreeMap;

/// Module symbol tables, indexed by the ids found in instructions and exception tables
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    pub strings: Vec<String>,
    pub types: Vec<String>,
}

impl SymbolTable {
    pub fn string(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn type_name(&self, idx: u32) -> Option<&str> {
        self.types.get(idx as usize).map(String::as_str)
    }
}

#[derive(Clone, Default, Debug)]
pub struct Program {
    pub functions: Vec<Function>,
    pub symbols: SymbolTable,
    pub literal_arrays: BTreeMap<String, LiteralArray>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|function| function.name == name)
    }

    /// Literal array key that is not yet used in the module
    pub fn fresh_literal_key(&self, function: &str, suffix: &str) -> String {
        (0..)
            .map(|n| format!("{}#{}{}", function, suffix, n))
            .find(|key| !self.literal_arrays.contains_key(key))
            .unwrap_or_default()
    }
}

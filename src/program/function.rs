use super::EmittedCode;

/// Source language of a function
///
/// Only dynamically typed (accumulator-based) code gets column information propagated.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum SourceLanguage {
    EcmaScript,
    PandaAssembly,
}

/// Exception handler of a try block
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CatchEntry {
    pub handler_pc: u32,

    /// Index into the module type table, or `None` for a catch-all handler
    pub type_idx: Option<u32>,
}

/// Entry in a method's exception table
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TryBlock {
    pub start_pc: u32,
    pub length: u32,

    /// Handlers, in the order they are tried
    pub catches: Vec<CatchEntry>,
}

impl TryBlock {
    /// First program counter past the protected range
    pub fn end_pc(&self) -> u32 {
        self.start_pc + self.length
    }
}

/// Mapping from program counter to source position
///
/// Both tables are sorted by program counter. An instruction is attributed to the entry with the
/// greatest program counter less than or equal to its own, like a line number program.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct DebugTable {
    pub lines: Vec<(u32, u32)>,
    pub columns: Vec<(u32, u32)>,
}

impl DebugTable {
    pub fn line_at(&self, pc: u32) -> Option<u32> {
        Self::lookup(&self.lines, pc)
    }

    pub fn column_at(&self, pc: u32) -> Option<u32> {
        Self::lookup(&self.columns, pc)
    }

    fn lookup(table: &[(u32, u32)], pc: u32) -> Option<u32> {
        let after = table.partition_point(|(entry_pc, _)| *entry_pc <= pc);
        after.checked_sub(1).map(|idx| table[idx].1)
    }
}

/// Function in a program
#[derive(Clone, Debug)]
pub struct Function {
    /// Fully qualified name (used for filtering and in logs)
    pub name: String,
    pub language: SourceLanguage,

    /// Number of local registers, excluding parameters
    pub regs_num: u16,

    /// Number of parameters, which live in the registers right after the locals
    pub params_num: u16,

    /// Method body
    pub code: Vec<u8>,
    pub try_blocks: Vec<TryBlock>,
    pub debug: DebugTable,

    /// Key of the literal array holding type annotations for arguments and instructions
    pub type_annotation: Option<String>,

    /// Result of a successful optimization
    pub emitted: Option<EmittedCode>,
}

impl Function {
    pub fn new(name: impl Into<String>, regs_num: u16, params_num: u16, code: Vec<u8>) -> Function {
        Function {
            name: name.into(),
            language: SourceLanguage::EcmaScript,
            regs_num,
            params_num,
            code,
            try_blocks: vec![],
            debug: DebugTable::default(),
            type_annotation: None,
            emitted: None,
        }
    }

    /// Frame size before optimization
    pub fn frame_size(&self) -> usize {
        self.regs_num as usize + self.params_num as usize
    }

    pub fn has_handlers(&self) -> bool {
        self.try_blocks.iter().any(|try_block| !try_block.catches.is_empty())
    }
}

//! Reconstruction of the instruction graph from a method body
//!
//! ### Blocks
//!
//! Blocks start at the first instruction, at jump targets, after conditional jumps, and at the
//! boundaries of try blocks and handlers. Code that no block starts before (typically after an
//! unconditional jump) is dead and never decoded into the graph.
//!
//! ### Try regions
//!
//! Entries of the exception table with the same range are merged into one region. A region only
//! gets marker blocks if something reachable inside of it can throw:
//!
//! ```text
//!   bb2 (try-begin) ----------------+
//!    |                              |
//!   bb3 ... bb5 (region members)    v
//!    |                          bb7 (catch-begin) --> bb8 (handler)
//!   bb6 (try-end) ------------------^
//! ```
//!
//! Handlers of dropped regions are unreachable and swept with the rest of the dead blocks.
//!
//! ### Registers
//!
//! Instructions are built in SSA form by tracking the definition of each register (and of the
//! accumulator) across blocks. Every instruction still remembers the register it came from (in
//! `dst` and `src`) so that the graph can be emitted back without running any allocation.

mod cfg;
mod errors;
mod insts;

pub use cfg::RegionSpan;
pub use errors::*;

use crate::analysis::{analyze_loops, Dominators};
use crate::ir::{Dump, FrameLayout, Graph, VIRTUAL_FRAME_SIZE};
use crate::isa::{decode_method, BytecodeInstruction};
use crate::program::{order_argument, Function, SymbolTable, TypeOrder, TypeRef};
use crate::util::OffsetVec;
use cfg::{CfgBuilder, ControlFlow};
use insts::InstBuilder;
use log::{debug, trace};
use std::collections::BTreeMap;

/// Maximum number of entries in the exception table of a function
pub const TRY_BLOCKS_LIMIT: usize = 128;

/// Size budgets past which a function is not built at all
#[derive(Copy, Clone, Debug)]
pub struct BuildLimits {
    /// Maximum length of the method body, in bytes
    pub max_bytecode_size: usize,

    /// Maximum number of registers, arguments, and accumulator together
    pub max_vregs: usize,
}

impl Default for BuildLimits {
    fn default() -> BuildLimits {
        BuildLimits {
            max_bytecode_size: 30_000,
            max_vregs: VIRTUAL_FRAME_SIZE,
        }
    }
}

/// Types of arguments and of instruction results, keyed by program counter
#[derive(Clone, Default, Debug)]
pub struct TypeMap {
    pub args: BTreeMap<u16, TypeRef>,
    pub insns: BTreeMap<u32, TypeRef>,
}

impl TypeMap {
    /// Resolve the orders of a type annotation against the decoded method body
    ///
    /// Orders past the last instruction are dropped.
    fn from_annotation(
        annotation: &[(TypeOrder, TypeRef)],
        insns: &OffsetVec<BytecodeInstruction>,
    ) -> TypeMap {
        let mut types = TypeMap::default();
        for (order, typ) in annotation {
            if let Some(arg) = order_argument(*order) {
                types.args.insert(arg, typ.clone());
            } else if let Some((offset, _)) = insns.get_index(*order as usize) {
                types.insns.insert(offset.0 as u32, typ.clone());
            } else {
                debug!("type annotation for missing instruction {}", order);
            }
        }
        types
    }
}

/// Builds the instruction graph of one function
pub struct IrBuilder<'a> {
    function: &'a Function,
    symbols: &'a SymbolTable,
    limits: BuildLimits,
    annotation: Vec<(TypeOrder, TypeRef)>,
}

impl<'a> IrBuilder<'a> {
    pub fn new(function: &'a Function, symbols: &'a SymbolTable, limits: BuildLimits) -> Self {
        IrBuilder {
            function,
            symbols,
            limits,
            annotation: vec![],
        }
    }

    /// Attach a decoded type annotation, to be carried along the graph
    pub fn with_types(mut self, annotation: Vec<(TypeOrder, TypeRef)>) -> Self {
        self.annotation = annotation;
        self
    }

    pub fn build(&self) -> Result<Graph, BuildError> {
        let function = self.function;
        let size = function.code.len();
        if size > self.limits.max_bytecode_size {
            return Err(BuildError::CodeTooLarge {
                size,
                limit: self.limits.max_bytecode_size,
            });
        }
        let count = function.frame_size() + 1;
        if count > self.limits.max_vregs {
            return Err(BuildError::TooManyRegisters {
                count,
                limit: self.limits.max_vregs,
            });
        }

        let insns = decode_method(&function.code)?;
        let types = TypeMap::from_annotation(&self.annotation, &insns);

        let frame = FrameLayout::new(function.regs_num as usize, function.params_num as usize);
        let graph = Graph::new(frame, function.language);
        let ControlFlow {
            mut graph,
            block_insns,
            regions,
        } = CfgBuilder::new(function, self.symbols, &insns, graph).build()?;

        let doms = Dominators::compute(&graph);
        if let Err(err) = analyze_loops(&mut graph, &doms) {
            debug!(
                "{}: irreducible loop entering {:?} from {:?}",
                function.name, err.block, err.from
            );
            return Err(err.into());
        }

        InstBuilder::new(&mut graph, &insns, &block_insns, &regions, &types).build(&doms)?;
        trace!("built {}:\n{}", function.name, Dump(&graph));
        Ok(graph)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codegen::LabelGenerator;
    use crate::ir::{BlockFlags, ConstValue, Opcode, ACC_REG};
    use crate::isa::{Assembler, Imm, Opcode as Op};
    use crate::program::{CatchEntry, TryBlock};

    fn build(function: &Function) -> Result<Graph, BuildError> {
        IrBuilder::new(function, &SymbolTable::default(), BuildLimits::default()).build()
    }

    fn opcodes(graph: &Graph) -> Vec<Opcode> {
        graph
            .live_insts()
            .into_iter()
            .map(|inst| graph.inst(inst).opcode.clone())
            .collect()
    }

    fn count_blocks(graph: &Graph, flags: BlockFlags) -> usize {
        graph
            .live_blocks()
            .filter(|block| graph.block(*block).flags.contains(flags))
            .count()
    }

    #[test]
    fn straight_line_code() {
        let mut asm = Assembler::new();
        asm.imm(Op::Ldai, Imm::Int(1))
            .reg(Op::Sta, 0)
            .reg(Op::Lda, 0)
            .reg(Op::Add2, 0)
            .reg(Op::Sta, 1)
            .reg(Op::Lda, 1)
            .op(Op::Return);
        let function = Function::new("f", 2, 0, asm.finish().unwrap());
        let graph = build(&function).unwrap();

        let ops = opcodes(&graph);
        assert_eq!(ops[0], Opcode::Constant(ConstValue::Int(1)));
        assert!(ops.contains(&Opcode::Binary(crate::ir::BinaryOp::Add)));
        assert_eq!(ops.last(), Some(&Opcode::Return));
        assert!(graph.end.is_some());

        let ret = graph
            .live_insts()
            .into_iter()
            .find(|inst| graph.inst(*inst).opcode == Opcode::Return)
            .unwrap();
        assert_eq!(graph.inst(ret).src, vec![ACC_REG]);
        assert_eq!(graph.inst(ret).pc, Some(function.code.len() as u32 - 1));
    }

    #[test]
    fn merge_creates_phi() {
        let mut asm = Assembler::new();
        let (other, join) = (asm.fresh_label(), asm.fresh_label());
        asm.reg(Op::Lda, 0)
            .jump(Op::Jeqz, &[], other)
            .imm(Op::Ldai, Imm::Int(1))
            .jump(Op::Jmp, &[], join)
            .bind(other)
            .imm(Op::Ldai, Imm::Int(2))
            .bind(join)
            .op(Op::Return);
        let function = Function::new("f", 0, 1, asm.finish().unwrap());
        let graph = build(&function).unwrap();

        let phis: Vec<_> = graph
            .live_insts()
            .into_iter()
            .filter(|inst| graph.inst(*inst).opcode == Opcode::Phi)
            .collect();
        assert_eq!(phis.len(), 1);
        assert_eq!(graph.inst(phis[0]).inputs.len(), 2);
        assert_eq!(graph.inst(phis[0]).dst, ACC_REG);
    }

    #[test]
    fn loop_invariant_registers_get_no_phi() {
        // v0 is only read in the loop, v1 is incremented
        let mut asm = Assembler::new();
        let (head, exit) = (asm.fresh_label(), asm.fresh_label());
        asm.imm(Op::Ldai, Imm::Int(10))
            .reg(Op::Sta, 0)
            .imm(Op::Ldai, Imm::Int(0))
            .reg(Op::Sta, 1)
            .bind(head)
            .reg(Op::Lda, 1)
            .jump(Op::Jge, &[0], exit)
            .reg(Op::Lda, 1)
            .op(Op::Inc)
            .reg(Op::Sta, 1)
            .jump(Op::Jmp, &[], head)
            .bind(exit)
            .reg(Op::Lda, 1)
            .op(Op::Return);
        let function = Function::new("f", 2, 0, asm.finish().unwrap());
        let graph = build(&function).unwrap();
        assert_eq!(count_blocks(&graph, BlockFlags::LOOP_HEADER), 1);

        let phi_regs: Vec<_> = graph
            .live_insts()
            .into_iter()
            .filter(|inst| graph.inst(*inst).opcode == Opcode::Phi)
            .map(|phi| graph.inst(phi).dst)
            .collect();
        assert!(phi_regs.contains(&1));
        assert!(!phi_regs.contains(&0));
    }

    #[test]
    fn read_before_definition() {
        let mut asm = Assembler::new();
        asm.reg(Op::Lda, 0).op(Op::Return);
        let function = Function::new("f", 1, 0, asm.finish().unwrap());
        assert!(matches!(
            build(&function),
            Err(BuildError::UndefinedRegister { pc: 0, reg: 0 })
        ));
    }

    #[test]
    fn falling_off_the_end() {
        let mut asm = Assembler::new();
        asm.imm(Op::Ldai, Imm::Int(0));
        let function = Function::new("f", 0, 0, asm.finish().unwrap());
        assert!(matches!(
            build(&function),
            Err(BuildError::InvalidJumpTarget { pc: 0, target: 5 })
        ));
    }

    #[test]
    fn jump_into_an_instruction() {
        // jmp +1 lands inside the jump itself
        let code = vec![Op::Jmp.byte(), 0x01, 0x00, Op::ReturnUndefined.byte()];
        let function = Function::new("f", 0, 0, code);
        assert!(matches!(
            build(&function),
            Err(BuildError::InvalidJumpTarget { pc: 0, target: 1 })
        ));
    }

    #[test]
    fn unknown_opcode_is_unsupported() {
        let function = Function::new("f", 0, 0, vec![0xff]);
        assert!(matches!(
            build(&function),
            Err(BuildError::UnsupportedOpcode { pc: 0, byte: 0xff })
        ));
    }

    #[test]
    fn irreducible_loop() {
        let mut asm = Assembler::new();
        let (a, b) = (asm.fresh_label(), asm.fresh_label());
        asm.imm(Op::Ldai, Imm::Int(1))
            .jump(Op::Jeqz, &[], b)
            .bind(a)
            .op(Op::Nop)
            .jump(Op::Jmp, &[], b)
            .bind(b)
            .op(Op::Nop)
            .jump(Op::Jmp, &[], a);
        let function = Function::new("f", 0, 0, asm.finish().unwrap());
        assert!(matches!(
            build(&function),
            Err(BuildError::IrreducibleLoop { .. })
        ));
    }

    #[test]
    fn limits() {
        let function = Function::new("f", 10, 2, vec![Op::ReturnUndefined.byte()]);
        let limits = BuildLimits {
            max_bytecode_size: 30_000,
            max_vregs: 12,
        };
        let symbols = SymbolTable::default();
        let builder = IrBuilder::new(&function, &symbols, limits);
        assert!(matches!(
            builder.build(),
            Err(BuildError::TooManyRegisters { count: 13, limit: 12 })
        ));

        let mut function = Function::new("f", 0, 0, vec![Op::ReturnUndefined.byte()]);
        function.try_blocks = (0..=TRY_BLOCKS_LIMIT)
            .map(|_| TryBlock {
                start_pc: 0,
                length: 1,
                catches: vec![],
            })
            .collect();
        assert!(matches!(
            build(&function),
            Err(BuildError::TooManyTryBlocks { count: 129 })
        ));
    }

    /// `try { v0 = 1; <call or not> } catch { return v0 }`
    fn try_catch(throwing: bool) -> Function {
        let mut asm = Assembler::new();
        let (begin, end, handler) = (asm.fresh_label(), asm.fresh_label(), asm.fresh_label());
        asm.bind(begin).imm(Op::Ldai, Imm::Int(1)).reg(Op::Sta, 0);
        if throwing {
            asm.reg(Op::Lda, 1).op(Op::CallArg0);
        } else {
            asm.op(Op::Nop);
        }
        asm.bind(end)
            .op(Op::ReturnUndefined)
            .bind(handler)
            .reg(Op::Lda, 0)
            .op(Op::Return);
        let code = asm.finish().unwrap();

        let mut function = Function::new("f", 1, 1, code);
        let body_len = if throwing { 10 } else { 8 };
        function.try_blocks = vec![TryBlock {
            start_pc: 0,
            length: body_len,
            catches: vec![CatchEntry {
                handler_pc: body_len + 1,
                type_idx: None,
            }],
        }];
        function
    }

    #[test]
    fn try_without_throwing_instruction_is_dropped() {
        let graph = build(&try_catch(false)).unwrap();
        assert!(!graph.try_regions[0].is_live());
        assert_eq!(count_blocks(&graph, BlockFlags::CATCH_BEGIN), 0);
        assert_eq!(count_blocks(&graph, BlockFlags::TRY), 0);
        assert!(!opcodes(&graph).contains(&Opcode::Return));
    }

    #[test]
    fn try_with_call_keeps_handler() {
        let graph = build(&try_catch(true)).unwrap();
        let region = &graph.try_regions[0];
        assert!(region.is_live());
        assert!(region.try_end.is_some());
        assert_eq!(count_blocks(&graph, BlockFlags::CATCH_BEGIN), 1);
        assert_eq!(count_blocks(&graph, BlockFlags::TRY), 1);
        assert_eq!(count_blocks(&graph, BlockFlags::CATCH), 2);

        // v0 is defined before the call, so it flows into the handler
        let catch_begin = region.catch_begins[0];
        let v0 = graph
            .block(catch_begin)
            .phis
            .iter()
            .copied()
            .find(|phi| graph.inst(*phi).dst == 0)
            .unwrap();
        assert_eq!(graph.inst(v0).inputs.len(), 1);
        let acc = graph
            .block(catch_begin)
            .phis
            .iter()
            .copied()
            .find(|phi| graph.inst(*phi).opcode == Opcode::CatchPhi { acc: true })
            .unwrap();
        assert!(graph.inst(acc).inputs.is_empty());
        assert_eq!(graph.inst(acc).dst, ACC_REG);
    }

    #[test]
    fn try_block_must_be_aligned() {
        let mut function = try_catch(true);
        function.try_blocks[0].length = 1;
        assert!(matches!(
            build(&function),
            Err(BuildError::MalformedTryBlock { start_pc: 0 })
        ));

        let mut function = try_catch(true);
        function.try_blocks[0].catches[0].type_idx = Some(3);
        assert!(matches!(
            build(&function),
            Err(BuildError::UnknownExceptionType { type_idx: 3 })
        ));
    }
}

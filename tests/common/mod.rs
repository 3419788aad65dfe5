#![allow(dead_code)]

use bytecode_optimizer::codegen::{LabelGenerator, SynLabel};
use bytecode_optimizer::isa::{Assembler, BytecodeInstruction, Imm, Opcode};
use bytecode_optimizer::program::{CatchEntry, DebugTable, EmittedCode, Function, Program, TryBlock};
use std::collections::HashMap;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn program_with(functions: Vec<Function>) -> Program {
    let mut program = Program::new();
    program.symbols.types.push(String::from("Error"));
    program.functions = functions;
    program
}

/// `a = 1; b = a + a; return b`, one statement per source line
pub fn add_twice() -> Function {
    let mut asm = Assembler::new();
    asm.imm(Opcode::Ldai, Imm::Int(1))
        .reg(Opcode::Sta, 0)
        .reg(Opcode::Lda, 0)
        .reg(Opcode::Add2, 0)
        .reg(Opcode::Sta, 1)
        .reg(Opcode::Lda, 1)
        .op(Opcode::Return);
    let mut function = Function::new("add_twice", 2, 0, asm.finish().unwrap());
    function.debug = DebugTable {
        lines: vec![(0, 1), (7, 2), (11, 3)],
        columns: vec![(0, 4), (7, 8), (11, 4)],
    };
    function
}

/// `let s = 0; for (let i = 0; i < n; i++) s += i; return s`
pub fn sum_below() -> Function {
    let mut asm = Assembler::new();
    let (head, exit) = (asm.fresh_label(), asm.fresh_label());
    asm.imm(Opcode::Ldai, Imm::Int(0))
        .reg(Opcode::Sta, 0)
        .imm(Opcode::Ldai, Imm::Int(0))
        .reg(Opcode::Sta, 1)
        .bind(head)
        .reg(Opcode::Lda, 1)
        .jump(Opcode::Jle, &[2], exit)
        .reg(Opcode::Lda, 0)
        .reg(Opcode::Add2, 1)
        .reg(Opcode::Sta, 0)
        .reg(Opcode::Lda, 1)
        .op(Opcode::Inc)
        .reg(Opcode::Sta, 1)
        .jump(Opcode::Jmp, &[], head)
        .bind(exit)
        .reg(Opcode::Lda, 0)
        .op(Opcode::Return);
    Function::new("sum_below", 2, 1, asm.finish().unwrap())
}

/// `return a > b ? a - b : b - a`, with the comparison feeding a branch
pub fn distance() -> Function {
    let mut asm = Assembler::new();
    let (other, done) = (asm.fresh_label(), asm.fresh_label());
    asm.reg(Opcode::Lda, 2)
        .reg(Opcode::Greater, 1)
        .jump(Opcode::Jeqz, &[], other)
        .reg(Opcode::Lda, 2)
        .reg(Opcode::Sub2, 1)
        .reg(Opcode::Sta, 0)
        .jump(Opcode::Jmp, &[], done)
        .bind(other)
        .reg(Opcode::Lda, 1)
        .reg(Opcode::Sub2, 2)
        .reg(Opcode::Sta, 0)
        .bind(done)
        .reg(Opcode::Lda, 0)
        .op(Opcode::Return);
    Function::new("distance", 1, 2, asm.finish().unwrap())
}

/// `try { v0 = 1; <call or nop> } catch (Error) { return v0 }; return undefined`
pub fn guarded(throwing: bool) -> Function {
    let mut asm = Assembler::new();
    asm.imm(Opcode::Ldai, Imm::Int(1)).reg(Opcode::Sta, 0);
    if throwing {
        asm.reg(Opcode::Lda, 1).op(Opcode::CallArg0);
    } else {
        asm.op(Opcode::Nop);
    }
    asm.op(Opcode::ReturnUndefined)
        .reg(Opcode::Lda, 0)
        .op(Opcode::Return);
    let code = asm.finish().unwrap();

    let name = if throwing { "guarded" } else { "unguarded" };
    let mut function = Function::new(name, 1, 1, code);
    let body_len = if throwing { 10 } else { 8 };
    function.try_blocks = vec![TryBlock {
        start_pc: 0,
        length: body_len,
        catches: vec![CatchEntry {
            handler_pc: body_len + 1,
            type_idx: Some(0),
        }],
    }];
    function
}

/// Two blocks jumping into each other, each also reachable from the entry
pub fn irreducible() -> Function {
    let mut asm = Assembler::new();
    let (a, b) = (asm.fresh_label(), asm.fresh_label());
    asm.imm(Opcode::Ldai, Imm::Int(1))
        .jump(Opcode::Jeqz, &[], b)
        .bind(a)
        .op(Opcode::Nop)
        .jump(Opcode::Jmp, &[], b)
        .bind(b)
        .op(Opcode::Nop)
        .jump(Opcode::Jmp, &[], a);
    Function::new("irreducible", 0, 0, asm.finish().unwrap())
}

/// `return a_0 + a_1 + ... + a_{n-1}`, reading every argument through `v0`
pub fn wide_sum(args: u16) -> Function {
    let mut asm = Assembler::new();
    asm.imm(Opcode::Ldai, Imm::Int(0));
    for arg in 0..args {
        asm.regs(Opcode::Mov, &[0, 1 + arg]).reg(Opcode::Add2, 0);
    }
    asm.op(Opcode::Return);
    Function::new("wide_sum", 1, args, asm.finish().unwrap())
}

/// `x_i = a_i + 1` for every argument, then `return x_0 + ... + x_{n-1}`
///
/// Every `x_i` is live across the whole second loop, so the frame outgrows 8-bit operands.
pub fn wide_locals(args: u16) -> Function {
    let first_arg = 1 + args;
    let mut asm = Assembler::new();
    for i in 0..args {
        asm.regs(Opcode::Mov, &[0, first_arg + i])
            .reg(Opcode::Lda, 0)
            .op(Opcode::Inc)
            .reg(Opcode::Sta, 0)
            .regs(Opcode::Mov, &[1 + i, 0]);
    }
    asm.imm(Opcode::Ldai, Imm::Int(0));
    for i in 0..args {
        asm.regs(Opcode::Mov, &[0, 1 + i]).reg(Opcode::Add2, 0);
    }
    asm.op(Opcode::Return);
    Function::new("wide_locals", first_arg, args, asm.finish().unwrap())
}

/// `return f(a_0, ..., a_{count-1})`, passing the first `count` arguments as a range
pub fn range_call(params: u16, count: u8) -> Function {
    let mut asm = Assembler::new();
    asm.imm(Opcode::Ldai, Imm::Int(7))
        .push(
            BytecodeInstruction::new(Opcode::CallRange)
                .with_imm(Imm::Int(count as i64))
                .with_regs(&[0]),
        )
        .op(Opcode::Return);
    Function::new("range_call", 0, params, asm.finish().unwrap())
}

/// Check that every operand is inside the frame and fits its encoding
pub fn assert_encodable(function: &Function) {
    let code = function.emitted.as_ref().unwrap();
    let frame_size = code.regs_num + function.params_num as usize;
    assert!((code.first_local_reg as usize) <= code.regs_num);
    for ins in &code.ins {
        let opcode = match ins.opcode {
            Some(opcode) => opcode,
            None => continue,
        };
        for reg in &ins.regs {
            assert!((*reg as usize) < frame_size, "{}: {} out of frame", function.name, ins);
            assert!(*reg <= opcode.format().max_register(), "{}: {}", function.name, ins);
        }
        if opcode == Opcode::CallRange {
            let count = match ins.imms[0] {
                Imm::Int(count) => count as usize,
                other => panic!("unexpected immediate {:?}", other),
            };
            assert!(ins.regs[0] as usize + count <= frame_size, "{}: {}", function.name, ins);
        }
    }
}

/// Labels, by the index of the pseudo-instruction defining them
pub fn label_positions(code: &EmittedCode) -> HashMap<SynLabel, usize> {
    code.ins
        .iter()
        .enumerate()
        .filter_map(|(idx, ins)| ins.label.map(|label| (label, idx)))
        .collect()
}

/// Run integer-only emitted code
///
/// Arguments go in the registers right after the locals. Returns `None` for `returnundefined`.
pub fn run(code: &EmittedCode, args: &[i64]) -> Option<i64> {
    let labels = label_positions(code);
    let mut regs = vec![0i64; code.regs_num + args.len()];
    regs[code.regs_num..].copy_from_slice(args);

    let mut acc = 0i64;
    let mut pc = 0;
    for _ in 0..100_000 {
        let ins = &code.ins[pc];
        pc += 1;
        let opcode = match ins.opcode {
            Some(opcode) => opcode,
            None => continue,
        };
        let lhs = ins.regs.first().map(|reg| regs[*reg as usize]).unwrap_or_default();
        let taken = |cond: bool| match (cond, ins.target) {
            (true, Some(target)) => Some(labels[&target]),
            _ => None,
        };
        let mut jump = None;
        match opcode {
            Opcode::Nop => (),
            Opcode::Lda => acc = lhs,
            Opcode::Sta => regs[ins.regs[0] as usize] = acc,
            Opcode::Mov => regs[ins.regs[0] as usize] = regs[ins.regs[1] as usize],
            Opcode::Ldai => match ins.imms[0] {
                Imm::Int(value) => acc = value,
                other => panic!("unexpected immediate {:?}", other),
            },
            Opcode::Add2 => acc = lhs + acc,
            Opcode::Sub2 => acc = lhs - acc,
            Opcode::Mul2 => acc = lhs * acc,
            Opcode::Eq => acc = (lhs == acc) as i64,
            Opcode::NotEq => acc = (lhs != acc) as i64,
            Opcode::Less => acc = (lhs < acc) as i64,
            Opcode::LessEq => acc = (lhs <= acc) as i64,
            Opcode::Greater => acc = (lhs > acc) as i64,
            Opcode::GreaterEq => acc = (lhs >= acc) as i64,
            Opcode::Inc => acc += 1,
            Opcode::Dec => acc -= 1,
            Opcode::Jmp => jump = taken(true),
            Opcode::Jeqz => jump = taken(acc == 0),
            Opcode::Jnez => jump = taken(acc != 0),
            Opcode::Jeq => jump = taken(lhs == acc),
            Opcode::Jne => jump = taken(lhs != acc),
            Opcode::Jlt => jump = taken(lhs < acc),
            Opcode::Jle => jump = taken(lhs <= acc),
            Opcode::Jgt => jump = taken(lhs > acc),
            Opcode::Jge => jump = taken(lhs >= acc),
            Opcode::Return => return Some(acc),
            Opcode::ReturnUndefined => return None,
            other => panic!("cannot interpret {}", other),
        }
        if let Some(target) = jump {
            pc = target;
        }
    }
    panic!("did not terminate")
}

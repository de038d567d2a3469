//! The internal representation of a compiled expression, and the lowering
//! pass that produces it.
//!
//! Evaluation is a stack machine on the real ARM stack pointer: every
//! subexpression leaves its 32-bit result on top of the stack, every binary
//! operator pops its two operands and pushes the result, and a call pops its
//! arguments into `r0..r3` before branching. Lowering walks the tree in
//! post-order, so an instruction's operands are always already on the stack
//! when it runs.

use std::fmt;

pub use crate::asm::arm32::{R, RegisterList, LR, PC};

use crate::errors::{CompilationError, Reason};
use crate::parsing::{Expression, ExpressionTree};
use crate::symbols::SymbolTable;

// REGISTERS:
//
// r0         - every subexpression result passes through here; also the
//              AAPCS return register the epilogue loads
const ACC: R = R(0);
// r1         - second operand of a binary operator
const OPERAND: R = R(1);
// r0..r3     - call arguments, AAPCS order
// r4         - indirect-call target, callee-saved by the prologue
const CALLEE: R = R(4);

/// AAPCS passes the first four arguments in registers; the lowering never
/// spills, so that is the call-arity ceiling.
pub const MAX_CALL_ARGUMENTS: usize = 4;

/// One step of the stack machine. Each expands to one machine word, except
/// [PseudoInstruction::LoadLiteral], which expands to three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoInstruction {
    /// dest := lhs + dest
    Add { dest: R, lhs: R },
    /// dest := lhs - dest
    Sub { dest: R, lhs: R },
    /// dest := lhs * dest, low 32 bits
    Mul { dest: R, lhs: R },
    /// `blx target`
    CallRegister { target: R },
    /// Materialize a 32-bit word into a register via a PC-relative load
    /// over an embedded literal.
    LoadLiteral { target: R, value: u32 },
    /// target := *base
    LoadIndirect { target: R, base: R },
    Push { reg: R },
    Pop { reg: R },
    PopMultiple { regs: RegisterList },
}

/// A complete, callable pseudo-instruction stream: prologue, the lowered
/// expression body, epilogue.
#[derive(Debug)]
pub struct PseudoProgram {
    instructions: Vec<PseudoInstruction>,
}

impl PseudoProgram {
    /// Return a borrowed view into the instruction stream.
    pub fn instructions(&self) -> &[PseudoInstruction] {
        &self.instructions
    }

    /// Exact size of the machine code this stream encodes to, in bytes.
    pub fn encoded_len(&self) -> usize {
        self.instructions
            .iter()
            .map(|instr| match instr {
                PseudoInstruction::LoadLiteral { .. } => 12,
                _ => 4,
            })
            .sum()
    }
}

/// Lowers a parsed expression into a pseudo-instruction stream, resolving
/// every free name against `symbols` along the way.
pub fn lower(
    tree: &ExpressionTree,
    symbols: &SymbolTable,
) -> Result<PseudoProgram, CompilationError> {
    use PseudoInstruction::*;

    let mut instructions = Vec::new();

    // Prologue: the emitted code is an ordinary AAPCS subroutine, so the
    // two registers it clobbers beyond the scratch set are saved up front.
    instructions.push(Push { reg: LR });
    instructions.push(Push { reg: CALLEE });

    lower_node(tree.root(), symbols, &mut instructions)?;

    // Epilogue: the final result is the only value left on the evaluation
    // stack. Popping into pc restores the saved lr and returns.
    instructions.push(Pop { reg: ACC });
    instructions.push(PopMultiple {
        regs: RegisterList::of(&[CALLEE, PC]),
    });

    Ok(PseudoProgram { instructions })
}

fn lower_node(
    node: &Expression,
    symbols: &SymbolTable,
    out: &mut Vec<PseudoInstruction>,
) -> Result<(), CompilationError> {
    use PseudoInstruction::*;

    match node {
        Expression::Constant(value) => {
            out.push(LoadLiteral {
                target: ACC,
                value: *value,
            });
            out.push(Push { reg: ACC });
        }
        Expression::Variable(name) => {
            // The address is resolved once, at compile time; the value is
            // re-read from memory on every run of the emitted code.
            let address = resolve(symbols, name)?;
            out.push(LoadLiteral {
                target: ACC,
                value: address,
            });
            out.push(LoadIndirect {
                target: ACC,
                base: ACC,
            });
            out.push(Push { reg: ACC });
        }
        Expression::Plus(left, right) => {
            lower_binary_operands(left, right, symbols, out)?;
            out.push(Add {
                dest: ACC,
                lhs: OPERAND,
            });
            out.push(Push { reg: ACC });
        }
        Expression::Minus(left, right) => {
            lower_binary_operands(left, right, symbols, out)?;
            out.push(Sub {
                dest: ACC,
                lhs: OPERAND,
            });
            out.push(Push { reg: ACC });
        }
        Expression::Product(left, right) => {
            lower_binary_operands(left, right, symbols, out)?;
            out.push(Mul {
                dest: ACC,
                lhs: OPERAND,
            });
            out.push(Push { reg: ACC });
        }
        Expression::Function { name, arguments } => {
            if arguments.is_empty() || arguments.len() > MAX_CALL_ARGUMENTS {
                return Err(CompilationError::without_position(Reason::BadArity {
                    name: name.clone(),
                    arguments: arguments.len(),
                }));
            }
            let address = resolve(symbols, name)?;

            for argument in arguments {
                lower_node(argument, symbols, out)?;
            }
            // The last argument is on top, so the pops run back to front:
            // args[0] lands in r0, args[1] in r1, and so on.
            for i in (0..arguments.len()).rev() {
                out.push(Pop { reg: R(i as u8) });
            }

            out.push(LoadLiteral {
                target: CALLEE,
                value: address,
            });
            out.push(CallRegister { target: CALLEE });
            out.push(Push { reg: ACC });
        }
    }

    Ok(())
}

/// Emits both operands and pops them back in one block transfer. The right
/// operand sits on top of the stack, and `pop {r0-r1}` assigns the lower
/// stack slot to the lower register: the left result lands in r1, the right
/// in r0. `Sub { dest: r0, lhs: r1 }` therefore computes left - right.
fn lower_binary_operands(
    left: &Expression,
    right: &Expression,
    symbols: &SymbolTable,
    out: &mut Vec<PseudoInstruction>,
) -> Result<(), CompilationError> {
    lower_node(left, symbols, out)?;
    lower_node(right, symbols, out)?;
    out.push(PseudoInstruction::PopMultiple {
        regs: RegisterList::range(ACC, OPERAND),
    });
    Ok(())
}

fn resolve(symbols: &SymbolTable, name: &str) -> Result<u32, CompilationError> {
    symbols
        .address_of(name)
        .ok_or_else(|| CompilationError::without_position(Reason::UnresolvedSymbol(name.to_string())))
}

impl fmt::Display for PseudoProgram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

impl fmt::Display for PseudoInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use PseudoInstruction::*;
        match self {
            Add { dest, lhs } => write!(f, "add\t{}, {}, {}", dest, lhs, dest),
            Sub { dest, lhs } => write!(f, "sub\t{}, {}, {}", dest, lhs, dest),
            Mul { dest, lhs } => write!(f, "mul\t{}, {}, {}", dest, lhs, dest),
            CallRegister { target } => write!(f, "blx\t{}", target),
            LoadLiteral { target, value } => write!(
                f,
                "ldr\t{}, [pc]\nb\tskip\n.word\t{:#010x}",
                target, value
            ),
            LoadIndirect { target, base } => write!(f, "ldr\t{}, [{}]", target, base),
            Push { reg } => write!(f, "push\t{{{}}}", reg),
            Pop { reg } => write!(f, "pop\t{{{}}}", reg),
            PopMultiple { regs } => write!(f, "pop\t{{{}}}", regs),
        }
    }
}

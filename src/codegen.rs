//! Generates machine code for a pseudo-instruction stream.

use crate::asm::arm32::Arm32Assembly;
use crate::ir::{PseudoInstruction, PseudoProgram};

/// Encodes a [PseudoProgram] into ARM A32 machine words.
///
/// Encoding is total: every well-formed pseudo-instruction has an encoding,
/// so this stage cannot fail.
pub struct CodeGenerator {
    asm: Arm32Assembly,
}

impl CodeGenerator {
    pub fn new() -> Self {
        CodeGenerator {
            asm: Arm32Assembly::new(),
        }
    }

    /// Returns the emitted machine code, little-endian words in order.
    pub fn compile(&mut self, program: &PseudoProgram) -> &[u8] {
        for &instruction in program.instructions() {
            self.generate_instruction(instruction);
        }
        self.asm.machine_code()
    }

    fn generate_instruction(&mut self, instruction: PseudoInstruction) {
        use PseudoInstruction::*;
        match instruction {
            Add { dest, lhs } => self.asm.add(dest, lhs),
            Sub { dest, lhs } => self.asm.sub(dest, lhs),
            Mul { dest, lhs } => self.asm.mul(dest, lhs),
            CallRegister { target } => self.asm.blx(target),
            LoadLiteral { target, value } => self.asm.load_literal(target, value),
            LoadIndirect { target, base } => self.asm.ldr(target, base),
            Push { reg } => self.asm.push_single(reg),
            Pop { reg } => self.asm.pop_single(reg),
            PopMultiple { regs } => self.asm.pop_multiple(regs),
        }
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        CodeGenerator::new()
    }
}

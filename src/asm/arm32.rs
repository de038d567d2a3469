//! Assembler for 32-bit ARM (A32)
//!
//! Every instruction is one 4-byte word, stored little-endian, with the
//! condition field fixed to 0b1110 (always). The only branch ever emitted is
//! the fixed-offset hop over an embedded literal, so there is no label or
//! relocation machinery here.

use std::fmt;

/// Reference to one of the sixteen core registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R(pub u8);

/// The link register by its architectural number.
pub const LR: R = R(14);
/// The program counter. Popping into it returns from the subroutine.
pub const PC: R = R(15);

/// A register set for a block transfer, kept as the LDM bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterList(u16);

impl RegisterList {
    pub fn of(registers: &[R]) -> Self {
        let mut mask = 0u16;
        for &R(n) in registers {
            mask |= 1 << n;
        }
        RegisterList(mask)
    }

    /// Every register from `lo` to `hi`, inclusive.
    pub fn range(lo: R, hi: R) -> Self {
        let mut mask = 0u16;
        for n in lo.0..=hi.0 {
            mask |= 1 << n;
        }
        RegisterList(mask)
    }
}

/// Generates ARM A32 machine code.
pub struct Arm32Assembly {
    instr: Vec<u8>,
}

impl Arm32Assembly {
    // Bit groupings below follow the field boundaries of the ARMv7-A
    // encoding diagrams, which are not 4-bit aligned.
    #![allow(clippy::unusual_byte_groupings)]

    pub fn new() -> Self {
        Arm32Assembly { instr: Vec::new() }
    }

    /// Returns the emitted machine code, little-endian words in order.
    pub fn machine_code(&self) -> &[u8] {
        &self.instr[..]
    }

    // Instructions
    //
    // Ordering follows ARMv7-A ARM chapter A5, Instruction Set Encoding.

    // Data-processing (register) /////////////////////////////////////////////

    /// `add rd, rn, rd`: rd := rn + rd
    pub fn add(&mut self, rd: R, rn: R) {
        //          cond 000 op   S  Rn   Rd     imm5 t2 0  Rm
        let base = 0b1110_000_0100_0_0000_0000_00000_00_0_0000;
        self.emit(base | rn.at(16..=19) | rd.at(12..=15) | rd.at(0..=3));
    }

    /// `sub rd, rn, rd`: rd := rn - rd
    pub fn sub(&mut self, rd: R, rn: R) {
        //          cond 000 op   S  Rn   Rd     imm5 t2 0  Rm
        let base = 0b1110_000_0010_0_0000_0000_00000_00_0_0000;
        self.emit(base | rn.at(16..=19) | rd.at(12..=15) | rd.at(0..=3));
    }

    /// `mul rd, rm, rd`: rd := rm * rd, low 32 bits
    pub fn mul(&mut self, rd: R, rm: R) {
        //          cond 000 0000 S  Rd   0000 Rs        Rm
        let base = 0b1110_000_0000_0_0000_0000_0000_1001_0000;
        self.emit(base | rd.at(16..=19) | rd.at(8..=11) | rm.at(0..=3));
    }

    // Branch and branch-with-link ////////////////////////////////////////////

    /// `blx rm`: call through a register, return address into lr
    pub fn blx(&mut self, rm: R) {
        //          cond 00010010 (1111)(1111)(1111) 0011 Rm
        let base = 0b1110_00010010_1111_1111_1111_0011_0000;
        self.emit(base | rm.at(0..=3));
    }

    // Load and stores ////////////////////////////////////////////////////////

    /// `push {rt}`, as `str rt, [sp, #-4]!`
    pub fn push_single(&mut self, rt: R) {
        //          cond 010 P U B W L  Rn   Rt        imm12
        let base = 0b1110_010_1_0_0_1_0_1101_0000_000000000100;
        self.emit(base | rt.at(12..=15));
    }

    /// `pop {rt}`, as `ldr rt, [sp], #4`
    pub fn pop_single(&mut self, rt: R) {
        //          cond 010 P U B W L  Rn   Rt        imm12
        let base = 0b1110_010_0_1_0_0_1_1101_0000_000000000100;
        self.emit(base | rt.at(12..=15));
    }

    /// `pop {..list..}`, as `ldmia sp!, {..list..}`
    ///
    /// The lowest-numbered register takes the value nearest the old stack
    /// top; popping `{r4, pc}` therefore restores r4 and then returns.
    pub fn pop_multiple(&mut self, list: RegisterList) {
        //          cond 100 P U S W L  Rn        register list
        let base = 0b1110_100_0_1_0_1_1_1101_0000000000000000;
        self.emit(base | list.at(0..=15));
    }

    /// `ldr rt, [rn]`: dereference the address in rn
    pub fn ldr(&mut self, rt: R, rn: R) {
        //          cond 010 P U B W L  Rn   Rt        imm12
        let base = 0b1110_010_1_1_0_0_1_0000_0000_000000000000;
        self.emit(base | rn.at(16..=19) | rt.at(12..=15));
    }

    /// Materializes an arbitrary 32-bit word into `rt`.
    ///
    /// A32 move-immediates cannot hold an arbitrary word, so the value is
    /// embedded in the instruction stream and loaded PC-relative:
    ///
    /// ```text
    /// ldr rt, [pc]    ; pc reads as here + 8: the .word below
    /// b   skip        ; hop over the literal
    /// .word value
    /// skip:
    /// ```
    pub fn load_literal(&mut self, rt: R, value: u32) {
        //          cond 010 P U B W L  Rn   Rt        imm12
        let ldr = 0b1110_010_1_1_0_0_1_1111_0000_000000000000;
        self.emit(ldr | rt.at(12..=15));
        //          cond 101 L                    imm24
        let b = 0b1110_101_0_000000000000000000000000;
        self.emit(b);
        self.emit(value);
    }

    // Private methods ////////////////////////////////////////////////////////

    fn emit(&mut self, instruction: u32) {
        let arr = instruction.to_le_bytes();
        self.instr.extend_from_slice(&arr);
    }
}

impl Default for Arm32Assembly {
    fn default() -> Self {
        Arm32Assembly::new()
    }
}

/////////////////////////////////// Traits and implementations ////////////////////////////////////

trait BitPack: Copy {
    fn to_u32(self) -> u32;
    fn expected_size(self) -> u8;
    fn at(self, bits: std::ops::RangeInclusive<u8>) -> u32 {
        assert_eq!(
            1 + bits.end() - bits.start(),
            self.expected_size(),
            "unexpected size of bits for type"
        );
        self.to_u32() << bits.start()
    }
}

impl BitPack for R {
    fn to_u32(self) -> u32 {
        self.0 as u32
    }
    fn expected_size(self) -> u8 {
        4
    }
}

impl BitPack for RegisterList {
    fn to_u32(self) -> u32 {
        self.0 as u32
    }
    fn expected_size(self) -> u8 {
        16
    }
}

impl fmt::Display for R {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            13 => write!(f, "sp"),
            14 => write!(f, "lr"),
            15 => write!(f, "pc"),
            n => write!(f, "r{}", n),
        }
    }
}

impl fmt::Display for RegisterList {
    /// Renders the set the way a listing writes it: consecutive registers
    /// collapse into a range, so `{r0, r1}` prints as `r0-r1` and
    /// `{r4, pc}` prints as `r4, pc`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first_group = true;
        let mut n = 0u8;
        while n < 16 {
            if self.0 & (1 << n) == 0 {
                n += 1;
                continue;
            }
            let start = n;
            while n + 1 < 16 && self.0 & (1 << (n + 1)) != 0 {
                n += 1;
            }
            if !first_group {
                write!(f, ", ")?;
            }
            first_group = false;
            if n > start {
                write!(f, "{}-{}", R(start), R(n))?;
            } else {
                write!(f, "{}", R(start))?;
            }
            n += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(asm: &Arm32Assembly) -> Vec<u32> {
        asm.machine_code()
            .chunks(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    #[test]
    fn push_encodings_match_the_fixed_table() {
        let mut asm = Arm32Assembly::new();
        for n in 0..=4 {
            asm.push_single(R(n));
        }
        asm.push_single(LR);
        assert_eq!(
            words(&asm),
            vec![0xE52D0004, 0xE52D1004, 0xE52D2004, 0xE52D3004, 0xE52D4004, 0xE52DE004]
        );
    }

    #[test]
    fn pop_encodings_match_the_fixed_table() {
        let mut asm = Arm32Assembly::new();
        for n in 0..=4 {
            asm.pop_single(R(n));
        }
        assert_eq!(
            words(&asm),
            vec![0xE49D0004, 0xE49D1004, 0xE49D2004, 0xE49D3004, 0xE49D4004]
        );
    }

    #[test]
    fn block_pops_match_the_fixed_table() {
        let mut asm = Arm32Assembly::new();
        asm.pop_multiple(RegisterList::range(R(0), R(1)));
        asm.pop_multiple(RegisterList::range(R(0), R(2)));
        asm.pop_multiple(RegisterList::range(R(0), R(3)));
        asm.pop_multiple(RegisterList::of(&[R(4), PC]));
        assert_eq!(
            words(&asm),
            vec![0xE8BD0003, 0xE8BD0007, 0xE8BD000F, 0xE8BD8010]
        );
    }

    #[test]
    fn dereference_loads_match_the_fixed_table() {
        let mut asm = Arm32Assembly::new();
        asm.ldr(R(0), R(0));
        asm.ldr(R(4), R(4));
        assert_eq!(words(&asm), vec![0xE5900000, 0xE5944000]);
    }

    #[test]
    fn register_call_matches_the_fixed_table() {
        let mut asm = Arm32Assembly::new();
        asm.blx(R(4));
        assert_eq!(words(&asm), vec![0xE12FFF34]);
    }

    #[test]
    fn arithmetic_encodings() {
        let mut asm = Arm32Assembly::new();
        asm.add(R(0), R(1));
        asm.sub(R(0), R(1));
        asm.mul(R(0), R(1));
        assert_eq!(words(&asm), vec![0xE0810000, 0xE0410000, 0xE0000091]);
    }

    #[test]
    fn literal_loads_expand_to_three_words() {
        let mut asm = Arm32Assembly::new();
        asm.load_literal(R(0), 0xDEAD_BEEF);
        asm.load_literal(R(4), 5);
        assert_eq!(
            words(&asm),
            vec![0xE59F0000, 0xEA000000, 0xDEAD_BEEF, 0xE59F4000, 0xEA000000, 5]
        );
    }

    #[test]
    fn words_are_stored_little_endian() {
        let mut asm = Arm32Assembly::new();
        asm.push_single(LR);
        assert_eq!(asm.machine_code(), &[0x04, 0xE0, 0x2D, 0xE5]);
    }

    #[test]
    fn register_lists_render_as_ranges() {
        assert_eq!(RegisterList::range(R(0), R(1)).to_string(), "r0-r1");
        assert_eq!(RegisterList::range(R(0), R(3)).to_string(), "r0-r3");
        assert_eq!(RegisterList::of(&[R(4), PC]).to_string(), "r4, pc");
        assert_eq!(RegisterList::of(&[R(0)]).to_string(), "r0");
    }
}

//! This module holds the decoded form of instructions, as the simulator sees them.
//!
//! The key type here is [`SimInstr`], which can be decoded from
//! and encoded into a 16-bit instruction word.

use crate::sim::alu::AluOp;
use crate::sim::SimErr;

use super::reg_consts::R7;
use super::{CondCode, IOffset, ImmOrReg, Reg, TrapVect8};

/// The operations of the extended ALU instruction (`XOP`, opcode `1101`).
///
/// These are selected by the sub-op field (bits 8-6) of the instruction.
/// Sub-ops `011` through `111` are reserved.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ExtOp {
    /// Bitwise OR (sub-op `000`).
    Or,
    /// Multiplication (sub-op `001`).
    Mul,
    /// Unsigned floor division (sub-op `010`).
    Div
}
impl ExtOp {
    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0b000 => Some(ExtOp::Or),
            0b001 => Some(ExtOp::Mul),
            0b010 => Some(ExtOp::Div),
            _ => None
        }
    }
    fn bits(self) -> u16 {
        match self {
            ExtOp::Or  => 0b000,
            ExtOp::Mul => 0b001,
            ExtOp::Div => 0b010,
        }
    }
}
impl From<ExtOp> for AluOp {
    fn from(value: ExtOp) -> Self {
        match value {
            ExtOp::Or  => AluOp::Or,
            ExtOp::Mul => AluOp::Mul,
            ExtOp::Div => AluOp::Div,
        }
    }
}

/// A decoded instruction.
///
/// Every 16-bit word either decodes to exactly one `SimInstr`
/// or fails to decode with [`SimErr::IllegalOpcode`] or [`SimErr::UnknownOpcode`].
///
/// ```
/// use cpu_sim::ast::sim::SimInstr;
/// use cpu_sim::ast::reg_consts::{R0, R1};
/// use cpu_sim::ast::{ImmOrReg, IOffset};
///
/// let instr = SimInstr::ADD(R0, R1, ImmOrReg::Imm(IOffset::new_trunc(-1)));
/// assert_eq!(instr.encode(), 0x107F);
/// assert_eq!(SimInstr::decode(0x107F), Ok(instr));
/// assert_eq!(instr.to_string(), "ADD R0, R1, #-1");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(clippy::upper_case_acronyms)]
pub enum SimInstr {
    /// Conditional branch: `if (cc & PSR.cc) != 0 { PC += off9 }`.
    BR(CondCode, IOffset<9>),
    /// `DR = SR1 + (SR2 | imm5)`
    ADD(Reg, Reg, ImmOrReg<5>),
    /// `DR = mem[PC + off9]`
    LD(Reg, IOffset<9>),
    /// `mem[PC + off9] = SR`
    ST(Reg, IOffset<9>),
    /// Subroutine call through a PC offset (`JSR`) or a base register (`JSRR`).
    JSR(ImmOrReg<11>),
    /// `DR = SR1 & (SR2 | imm5)`
    AND(Reg, Reg, ImmOrReg<5>),
    /// `DR = mem[BaseR + off6]`
    LDR(Reg, Reg, IOffset<6>),
    /// `mem[BaseR + off6] = SR`
    STR(Reg, Reg, IOffset<6>),
    /// Return from trap (supervisor only).
    RTI,
    /// `DR = !SR`
    NOT(Reg, Reg),
    /// `DR = mem[mem[PC + off9]]`
    LDI(Reg, IOffset<9>),
    /// `mem[mem[PC + off9]] = SR`
    STI(Reg, IOffset<9>),
    /// `PC = BaseR` (`RET` when the base register is R7).
    JMP(Reg),
    /// Extended two-operand ALU instruction: `DR = DR op (SR | imm5)`.
    XOP(ExtOp, Reg, ImmOrReg<5>),
    /// `DR = PC + off9`
    LEA(Reg, IOffset<9>),
    /// Software interrupt through the vector table.
    TRAP(TrapVect8),
}

impl SimInstr {
    /// Gets the opcode (bits 15-12) for the given instruction.
    pub fn opcode(&self) -> u16 {
        match self {
            SimInstr::BR(_, _)     => 0b0000,
            SimInstr::ADD(_, _, _) => 0b0001,
            SimInstr::LD(_, _)     => 0b0010,
            SimInstr::ST(_, _)     => 0b0011,
            SimInstr::JSR(_)       => 0b0100,
            SimInstr::AND(_, _, _) => 0b0101,
            SimInstr::LDR(_, _, _) => 0b0110,
            SimInstr::STR(_, _, _) => 0b0111,
            SimInstr::RTI          => 0b1000,
            SimInstr::NOT(_, _)    => 0b1001,
            SimInstr::LDI(_, _)    => 0b1010,
            SimInstr::STI(_, _)    => 0b1011,
            SimInstr::JMP(_)       => 0b1100,
            SimInstr::XOP(_, _, _) => 0b1101,
            SimInstr::LEA(_, _)    => 0b1110,
            SimInstr::TRAP(_)      => 0b1111,
        }
    }

    /// Encodes this instruction as a 16-bit word.
    pub fn encode(&self) -> u16 {
        let opcode = self.opcode() << 12;

        let operands = match *self {
            SimInstr::BR(cc, off) => (u16::from(cc & 0b111) << 9) | off.bits(),
            SimInstr::ADD(dr, sr1, sr2) | SimInstr::AND(dr, sr1, sr2) => {
                (u16::from(dr) << 9) | (u16::from(sr1) << 6) | encode_imm_or_reg(sr2)
            },
            SimInstr::LD(r, off)
            | SimInstr::ST(r, off)
            | SimInstr::LDI(r, off)
            | SimInstr::STI(r, off)
            | SimInstr::LEA(r, off) => (u16::from(r) << 9) | off.bits(),
            SimInstr::JSR(ImmOrReg::Imm(off)) => (1 << 11) | off.bits(),
            SimInstr::JSR(ImmOrReg::Reg(br)) => u16::from(br) << 6,
            SimInstr::LDR(r, br, off) | SimInstr::STR(r, br, off) => {
                (u16::from(r) << 9) | (u16::from(br) << 6) | off.bits()
            },
            SimInstr::RTI => 0,
            SimInstr::NOT(dr, sr) => (u16::from(dr) << 9) | (u16::from(sr) << 6) | 0b111111,
            SimInstr::JMP(br) => u16::from(br) << 6,
            SimInstr::XOP(op, dr, sr) => (u16::from(dr) << 9) | (op.bits() << 6) | encode_imm_or_reg(sr),
            SimInstr::TRAP(vect) => vect.get() & 0xFF,
        };

        opcode | operands
    }

    /// Converts a word into an instruction.
    ///
    /// This fails with:
    /// - [`SimErr::IllegalOpcode`] if the word uses one of the reserved `XOP` sub-ops,
    /// - [`SimErr::UnknownOpcode`] if the word's opcode is recognized but its remaining
    ///     bits do not match any defined pattern (e.g., nonzero bits where zeroes are required).
    pub fn decode(word: u16) -> Result<Self, SimErr> {
        let illegal = SimErr::IllegalOpcode { instr: word };
        let unknown = SimErr::UnknownOpcode { instr: word };
        // Checks that the bits under `mask` are equal to `expected`.
        let matches = |mask: u16, expected: u16| word & mask == expected;

        let dr  = Reg::from_field(word, 9);
        let sr1 = Reg::from_field(word, 6);

        let instr = match word >> 12 {
            0b0000 => {
                let cc = ((word >> 9) & 0b111) as CondCode;
                SimInstr::BR(cc, IOffset::sext(word))
            },
            0b0001 => SimInstr::ADD(dr, sr1, decode_imm_or_reg(word).ok_or(unknown)?),
            0b0010 => SimInstr::LD(dr, IOffset::sext(word)),
            0b0011 => SimInstr::ST(dr, IOffset::sext(word)),
            0b0100 => match word & (1 << 11) != 0 {
                true => SimInstr::JSR(ImmOrReg::Imm(IOffset::sext(word))),
                false if matches(0x0E3F, 0) => SimInstr::JSR(ImmOrReg::Reg(sr1)),
                false => return Err(unknown),
            },
            0b0101 => SimInstr::AND(dr, sr1, decode_imm_or_reg(word).ok_or(unknown)?),
            0b0110 => SimInstr::LDR(dr, sr1, IOffset::sext(word)),
            0b0111 => SimInstr::STR(dr, sr1, IOffset::sext(word)),
            0b1000 if matches(0x0FFF, 0) => SimInstr::RTI,
            0b1000 => return Err(unknown),
            0b1001 if matches(0x003F, 0x003F) => SimInstr::NOT(dr, sr1),
            0b1001 => return Err(unknown),
            0b1010 => SimInstr::LDI(dr, IOffset::sext(word)),
            0b1011 => SimInstr::STI(dr, IOffset::sext(word)),
            0b1100 if matches(0x0E3F, 0) => SimInstr::JMP(sr1),
            0b1100 => return Err(unknown),
            0b1101 => {
                let op = ExtOp::from_bits((word >> 6) & 0b111).ok_or(illegal)?;
                SimInstr::XOP(op, dr, decode_imm_or_reg(word).ok_or(unknown)?)
            },
            0b1110 => SimInstr::LEA(dr, IOffset::sext(word)),
            0b1111 if matches(0x0F00, 0) => SimInstr::TRAP(TrapVect8::new_trunc(word)),
            0b1111 => return Err(unknown),
            _ => unreachable!("opcode should be 4 bits"),
        };

        Ok(instr)
    }
}

/// Decodes the `(SR2 | imm5)` operand of an ALU instruction (bits 5-0),
/// returning `None` if the register form has nonzero bits 4-3.
fn decode_imm_or_reg(word: u16) -> Option<ImmOrReg<5>> {
    match word & (1 << 5) != 0 {
        true  => Some(ImmOrReg::Imm(IOffset::sext(word))),
        false if word & 0b11000 == 0 => Some(ImmOrReg::Reg(Reg::from_field(word, 0))),
        false => None,
    }
}
fn encode_imm_or_reg(operand: ImmOrReg<5>) -> u16 {
    match operand {
        ImmOrReg::Imm(imm) => (1 << 5) | imm.bits(),
        ImmOrReg::Reg(r)   => u16::from(r),
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BR(0, off) => write!(f, "NOP {off}"),
            Self::BR(cc, off) => {
                f.write_str("BR")?;
                if cc & 0b100 != 0 { f.write_str("n")?; };
                if cc & 0b010 != 0 { f.write_str("z")?; };
                if cc & 0b001 != 0 { f.write_str("p")?; };
                write!(f, " {off}")
            },
            Self::ADD(dr, sr1, sr2) => write!(f, "ADD {dr}, {sr1}, {sr2}"),
            Self::LD(dr, off) => write!(f, "LD {dr}, {off}"),
            Self::ST(sr, off) => write!(f, "ST {sr}, {off}"),
            Self::JSR(ImmOrReg::Imm(off)) => write!(f, "JSR {off}"),
            Self::JSR(ImmOrReg::Reg(br)) => write!(f, "JSRR {br}"),
            Self::AND(dr, sr1, sr2) => write!(f, "AND {dr}, {sr1}, {sr2}"),
            Self::LDR(dr, br, off) => write!(f, "LDR {dr}, {br}, {off}"),
            Self::STR(sr, br, off) => write!(f, "STR {sr}, {br}, {off}"),
            Self::RTI => f.write_str("RTI"),
            Self::NOT(dr, sr) => write!(f, "NOT {dr}, {sr}"),
            Self::LDI(dr, off) => write!(f, "LDI {dr}, {off}"),
            Self::STI(sr, off) => write!(f, "STI {sr}, {off}"),
            Self::JMP(R7) => f.write_str("RET"),
            Self::JMP(br) => write!(f, "JMP {br}"),
            Self::XOP(op, dr, sr) => write!(f, "{} {dr}, {sr}", AluOp::from(*op)),
            Self::LEA(dr, off) => write!(f, "LEA {dr}, {off}"),
            Self::TRAP(vect) => write!(f, "TRAP {vect:X}"),
        }
    }
}

//! Simulating and execution for encoded instructions.
//!
//! This module is focused on executing instruction words that have already been
//! written into memory.
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates the processor.
//! - [`mem`]: The module handling memory and the register file.
//! - [`alu`]: The module handling the arithmetic-logic unit.
//! - [`observer`]: The module handling tracking of memory and register accesses.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and write instruction words into its memory.
//! There is no separate "load" step: writing words at the intended addresses is all that is needed.
//!
//! ```
//! use cpu_sim::sim::Simulator;
//! use cpu_sim::ast::sim::SimInstr;
//! use cpu_sim::ast::reg_consts::R0;
//! use cpu_sim::ast::{ImmOrReg, IOffset};
//!
//! let program = [
//!     SimInstr::AND(R0, R0, ImmOrReg::Imm(IOffset::new_trunc(0))),
//!     SimInstr::ADD(R0, R0, ImmOrReg::Imm(IOffset::new_trunc(1))),
//!     SimInstr::ADD(R0, R0, ImmOrReg::Imm(IOffset::new_trunc(1))),
//! ];
//!
//! let mut sim = Simulator::new(Default::default());
//! for (addr, instr) in (0x3000..).zip(program) {
//!     sim.mem.write(addr, instr.encode());
//! }
//! sim.reg_file.pc = 0x3000;
//!
//! // Running step by step:
//! sim.step().unwrap();
//! assert_eq!(sim.reg_file[R0], 0);
//! sim.step().unwrap();
//! assert_eq!(sim.reg_file[R0], 1);
//! sim.step().unwrap();
//! assert_eq!(sim.reg_file[R0], 2);
//! assert!(sim.reg_file.psr.is_p());
//! ```
//!
//! The simulator has no run loop of its own.
//! Running a program continuously is done by calling [`Simulator::step`] repeatedly
//! until the caller decides to stop (or until a step fails).
//!
//! ## Flags
//!
//! The simulator can be configured by editing its flags. For example,
//! to simulate a machine with 256 words of memory:
//!
//! ```
//! # use cpu_sim::sim::{Simulator, SimFlags};
//! let sim = Simulator::new(SimFlags { addr_bits: 8, ..Default::default() });
//! assert_eq!(sim.mem.len(), 256);
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Querying State
//!
//! - The register file (including the PC, IR, and PSR) is accessible through the `sim.reg_file` field.
//! - Memory is accessible through the `sim.mem` field ([`Mem::read`] and [`Mem::write`]),
//!     or through [`Simulator::read_mem`] and [`Simulator::write_mem`], which also record the access
//!     in the simulator's [`observer`](Simulator::observer).
//!
//! ```
//! use cpu_sim::sim::Simulator;
//! use cpu_sim::ast::reg_consts::R0;
//!
//! let mut sim = Simulator::new(Default::default());
//!
//! sim.reg_file[R0] = 0x1234;
//! assert_eq!(sim.reg_file[R0], 0x1234);
//! assert_eq!(sim.reg_file.get(0), Ok(0x1234));
//!
//! sim.mem.write(0x3000, 0x5678);
//! assert_eq!(sim.mem.read(0x3000), 0x5678);
//! ```
//!
//! ## Errors
//!
//! A step that cannot complete fails with a [`StepErr`], which holds the
//! failure ([`SimErr`]) along with the faulting instruction and its address.
//! The PC has already been advanced past the faulting instruction by the fetch,
//! but the instruction itself has no effect.
//!
//! ```
//! use cpu_sim::sim::{Simulator, SimErr};
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.mem.write(0x3000, 0xD1C0); // reserved instruction
//! sim.reg_file.pc = 0x3000;
//!
//! let err = sim.step().unwrap_err();
//! assert_eq!(err.kind, SimErr::IllegalOpcode { instr: 0xD1C0 });
//! assert_eq!(err.pc, 0x3000);
//! assert_eq!(sim.reg_file.pc, 0x3001);
//! ```
pub mod mem;
pub mod alu;
pub mod observer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::reg_consts::{R6, R7};
use crate::ast::sim::SimInstr;
use crate::ast::{ImmOrReg, Reg};
use alu::AluOp;

use self::mem::{MachineInitStrategy, Mem, RegFile};
use self::observer::{AccessObserver, AccessSet};

/// Errors that can occur during simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimErr {
    /// An ALU operation tag did not name any operation.
    #[error("unsupported ALU operation {0}")]
    UnsupportedAluOp(String),
    /// The ALU divided by zero.
    #[error("division by zero")]
    DivideByZero,
    /// A general purpose register was accessed with an out-of-range index.
    #[error("invalid register index {0} (expected 0-7)")]
    InvalidRegister(usize),
    /// Word was decoded, and it is one of the reserved instructions.
    #[error("simulator executed illegal opcode (reserved instruction x{instr:04X})")]
    IllegalOpcode {
        /// The instruction word.
        instr: u16
    },
    /// Word was decoded, but it does not match any instruction.
    #[error("simulator executed unknown instruction x{instr:04X}")]
    UnknownOpcode {
        /// The instruction word.
        instr: u16
    },
    /// A privileged instruction was called in user mode.
    #[error("privilege violation")]
    PrivilegeViolation,
}

/// A failed step.
///
/// This holds the error that caused the step to fail, along with
/// where it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at x{pc:04X})")]
pub struct StepErr {
    /// The address of the instruction that failed.
    pub pc: u16,
    /// The instruction word that failed.
    pub instr: u16,
    /// The cause of the failure.
    pub kind: SimErr,
}
impl StepErr {
    /// The opcode (bits 15-12) of the instruction that failed.
    pub fn opcode(&self) -> u8 {
        (self.instr >> 12) as u8
    }
}

/// Configuration flags for [`Simulator`].
///
/// These are preserved when the `Simulator` is reset.
/// They are only read when the `Simulator` is created or reset,
/// so editing the flags takes effect on the next [`Simulator::reset`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFlags {
    /// The number of address bits.
    ///
    /// Memory holds `2^addr_bits` words. This is clamped between 1 and 16.
    ///
    /// By default, this is 16 (a 65536-word address space).
    pub addr_bits: u8,

    /// The creation strategy for memory words.
    ///
    /// This is used to fill the `mem` field on creation and on reset.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`] (zero-filled).
    pub machine_init: MachineInitStrategy,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            addr_bits: mem::MAX_ADDR_BITS,
            machine_init: Default::default(),
        }
    }
}

/// Executes encoded instructions.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's memory.
    pub mem: Mem,

    /// The simulator's register file (including the PC, IR, and PSR).
    pub reg_file: RegFile,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// The address the instruction in IR was fetched from.
    instr_pc: u16,

    /// Tracks accesses made by the last step.
    pub observer: AccessObserver,

    /// Whether the program is considered running.
    ///
    /// The simulator never reads this. It is for whatever
    /// is driving [`Simulator::step`] to keep track of its state.
    pub running: bool,

    // ------------------ CONFIG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the provided flags.
    ///
    /// Memory is filled according to the flags' [`MachineInitStrategy`]
    /// and every register is zero (so the machine starts in supervisor mode).
    pub fn new(flags: SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();

        Self {
            mem: Mem::new(flags.addr_bits, &mut filler),
            reg_file: RegFile::new(),
            instructions_run: 0,
            instr_pc: 0,
            observer: Default::default(),
            running: false,
            flags,
        }
    }

    /// Resets the simulator.
    ///
    /// This resets the state of the `Simulator` back to before any execution calls,
    /// while preserving configuration.
    pub fn reset(&mut self) {
        let flags = self.flags;

        *self = Simulator::new(flags);
        tracing::debug!(addr_bits = flags.addr_bits, "simulator reset");
    }

    /// Reads the word at the provided address, recording the read in the observer.
    ///
    /// If you would like to query the memory's state without recording it,
    /// consider [`Mem::read`].
    pub fn read_mem(&mut self, addr: u16) -> u16 {
        let addr = self.mem.wrap(addr);
        self.observer.update_mem_accesses(addr, AccessSet::READ);
        self.mem.read(addr)
    }

    /// Writes the word at the provided address, recording the write in the observer.
    ///
    /// If you would like to edit the memory's state without recording it,
    /// consider [`Mem::write`].
    pub fn write_mem(&mut self, addr: u16, data: u16) {
        let addr = self.mem.wrap(addr);

        let mut accesses = AccessSet::WRITTEN;
        if self.mem.read(addr) != data {
            accesses |= AccessSet::MODIFIED;
        }
        self.observer.update_mem_accesses(addr, accesses);
        self.mem.write(addr, data);
    }

    /// Gets the address of the instruction currently held in the IR.
    ///
    /// After a step (successful or not), this is the address of the instruction that step executed.
    pub fn instr_pc(&self) -> u16 {
        self.instr_pc
    }

    /// Sets the PC to the given address (reduced into the address space).
    fn set_pc(&mut self, addr: u16) {
        self.reg_file.pc = self.mem.wrap(addr);
    }
    /// Computes a PC-relative address.
    fn pc_offset(&self, offset: i16) -> u16 {
        self.mem.wrap(self.reg_file.pc.wrapping_add_signed(offset))
    }

    /// Writes a general purpose register.
    fn set_reg(&mut self, reg: Reg, value: u16) {
        self.reg_file[reg] = value;
        self.observer.set_reg_written(reg);
    }
    /// Writes a general purpose register and sets the condition codes from the written value.
    fn set_reg_cc(&mut self, reg: Reg, value: u16) {
        self.set_reg(reg, value);
        self.reg_file.set_cc(value);
    }

    /// Pushes a word to the stack pointed to by R6.
    fn push(&mut self, data: u16) {
        let sp = self.reg_file.sp().wrapping_sub(1);
        self.set_reg(R6, sp);
        self.write_mem(sp, data);
    }
    /// Pops a word from the stack pointed to by R6.
    fn pop(&mut self) -> u16 {
        let sp = self.reg_file.sp();
        let data = self.read_mem(sp);
        self.set_reg(R6, sp.wrapping_add(1));
        data
    }

    /// Applies an ALU operation and writes the result into `dr`.
    ///
    /// Nothing is written if the ALU fails.
    fn alu_op(&mut self, op: AluOp, dr: Reg, sr1: Reg, sr2: ImmOrReg<5>) -> Result<(), SimErr> {
        let lhs = self.reg_file[sr1];
        let rhs = match sr2 {
            ImmOrReg::Imm(imm) => imm.get() as u16,
            ImmOrReg::Reg(r)   => self.reg_file[r],
        };

        let result = alu::execute(op, lhs, rhs)?;
        self.set_reg_cc(dr, result);
        Ok(())
    }

    /// Calls a trap, switching to the supervisor stack if needed
    /// and setting the PC to the start of the trap handler.
    ///
    /// The vector is the address of the trap's entry in the vector table.
    fn call_trap(&mut self, vect: u16) {
        let old_psr = self.reg_file.psr.get();
        let old_pc = self.reg_file.pc;

        if !self.reg_file.psr.privileged() {
            self.reg_file.saved_usp = self.reg_file.sp();
            self.set_reg(R6, self.reg_file.saved_ssp);
        }

        // push PSR, PC to supervisor stack
        self.push(old_psr);
        self.push(old_pc);

        self.reg_file.psr.set_privileged(true);

        let addr = self.read_mem(vect);
        self.set_pc(addr);
        tracing::debug!(vect, handler = addr, return_pc = old_pc, "entered trap");
    }

    /// Returns from a trap, restoring the PC, PSR, and (when returning to user mode)
    /// the user stack.
    fn return_from_trap(&mut self) -> Result<(), SimErr> {
        if !self.reg_file.psr.privileged() {
            return Err(SimErr::PrivilegeViolation);
        }

        // Pop PC and PSR from the stack
        let pc = self.pop();
        let psr = self.pop();

        self.set_pc(pc);
        self.reg_file.psr.set(psr);

        if !self.reg_file.psr.privileged() {
            self.reg_file.saved_ssp = self.reg_file.sp();
            self.set_reg(R6, self.reg_file.saved_usp);
        }

        tracing::debug!(return_pc = self.reg_file.pc, privileged = self.reg_file.psr.privileged(), "returned from trap");
        Ok(())
    }

    /// Reads the word at the PC into the IR and increments the PC.
    ///
    /// The PC wraps around to 0 at the end of the address space.
    pub fn fetch(&mut self) {
        let pc = self.mem.wrap(self.reg_file.pc);

        self.instr_pc = pc;
        self.reg_file.ir = self.read_mem(pc);
        self.set_pc(pc.wrapping_add(1));
    }

    /// Decodes the instruction in the IR and executes it.
    ///
    /// If this fails, the instruction has not made any changes to the machine.
    pub fn decode_execute(&mut self) -> Result<(), StepErr> {
        let instr = SimInstr::decode(self.reg_file.ir)
            .map_err(|e| self.step_err(e))?;

        tracing::trace!(pc = self.instr_pc, ir = self.reg_file.ir, "executing {instr}");
        self.execute(instr)
            .map_err(|e| self.step_err(e))
    }

    fn step_err(&self, kind: SimErr) -> StepErr {
        StepErr { pc: self.instr_pc, instr: self.reg_file.ir, kind }
    }

    fn execute(&mut self, instr: SimInstr) -> Result<(), SimErr> {
        match instr {
            SimInstr::BR(cc, off) => {
                if cc & self.reg_file.psr.cc() != 0 {
                    let addr = self.pc_offset(off.get());
                    self.set_pc(addr);
                }
            },
            SimInstr::ADD(dr, sr1, sr2) => self.alu_op(AluOp::Add, dr, sr1, sr2)?,
            SimInstr::LD(dr, off) => {
                let ea = self.pc_offset(off.get());
                let val = self.read_mem(ea);
                self.set_reg_cc(dr, val);
            },
            SimInstr::ST(sr, off) => {
                let ea = self.pc_offset(off.get());
                self.write_mem(ea, self.reg_file[sr]);
            },
            SimInstr::JSR(op) => {
                // The base register is read before R7 is written,
                // so JSRR R7 jumps to the old value of R7.
                let addr = match op {
                    ImmOrReg::Imm(off) => self.pc_offset(off.get()),
                    ImmOrReg::Reg(br)  => self.reg_file[br],
                };

                self.set_reg(R7, self.reg_file.pc);
                self.set_pc(addr);
            },
            SimInstr::AND(dr, sr1, sr2) => self.alu_op(AluOp::And, dr, sr1, sr2)?,
            SimInstr::LDR(dr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                let val = self.read_mem(ea);
                self.set_reg_cc(dr, val);
            },
            SimInstr::STR(sr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                self.write_mem(ea, self.reg_file[sr]);
            },
            SimInstr::RTI => self.return_from_trap()?,
            SimInstr::NOT(dr, sr) => {
                let result = !self.reg_file[sr];
                self.set_reg_cc(dr, result);
            },
            SimInstr::LDI(dr, off) => {
                let ptr = self.pc_offset(off.get());
                let ea = self.read_mem(ptr);
                let val = self.read_mem(ea);
                self.set_reg_cc(dr, val);
            },
            SimInstr::STI(sr, off) => {
                let ptr = self.pc_offset(off.get());
                let ea = self.read_mem(ptr);
                self.write_mem(ea, self.reg_file[sr]);
            },
            SimInstr::JMP(br) => self.set_pc(self.reg_file[br]),
            SimInstr::XOP(op, dr, sr) => self.alu_op(op.into(), dr, dr, sr)?,
            SimInstr::LEA(dr, off) => {
                let ea = self.pc_offset(off.get());
                self.set_reg_cc(dr, ea);
            },
            SimInstr::TRAP(vect) => self.call_trap(vect.get()),
        }

        Ok(())
    }

    /// Simulate one step, executing one instruction.
    ///
    /// This fetches the instruction at the PC, then decodes and executes it.
    /// If the instruction fails, the fetch still applies (IR is loaded and the PC is incremented),
    /// but the instruction itself has no effect.
    pub fn step(&mut self) -> Result<(), StepErr> {
        self.observer.clear();

        self.fetch();
        self.decode_execute()
            .map_err(|e| {
                tracing::debug!(pc = e.pc, instr = e.instr, "step failed: {}", e.kind);
                e
            })?;

        self.instructions_run = self.instructions_run.wrapping_add(1);
        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// A wrapper over `u16` in order to faciliate the PSR.
///
/// The word is encoded as the following:
/// - `PSR[15..16]`: Privilege mode (0 = supervisor, 1 = user)
/// - `PSR[0..3]`:   Condition codes
///
/// ```text
///         privilege
///         |               condition codes
///         |               |
///         V               V
/// 0x8002: 1000 0000 0000 0010
///         ~               ~~~
/// ```
///
/// Each of these are exposed as the [`PSR::privileged`] and [`PSR::cc`] values.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PSR(u16);

impl PSR {
    /// The bits of the PSR which hold state.
    const MASK: u16 = 0b1000_0000_0000_0111;

    /// Creates a PSR with a default value (supervisor mode, no condition code).
    pub fn new() -> Self {
        PSR(0x0000)
    }

    /// Checks whether the simulator is in privileged mode.
    /// - `true` = supervisor mode
    /// - `false` = user mode
    pub fn privileged(&self) -> bool {
        (self.0 >> 15) == 0
    }
    /// Checks the condition code of the simulator.
    pub fn cc(&self) -> u8 {
        (self.0 & 0b111) as u8
    }
    /// Checks the condition code of the simulator is `n`.
    pub fn is_n(&self) -> bool {
        self.cc() & 0b100 != 0
    }
    /// Checks the condition code of the simulator is `z`.
    pub fn is_z(&self) -> bool {
        self.cc() & 0b010 != 0
    }
    /// Checks the condition code of the simulator is `p`.
    pub fn is_p(&self) -> bool {
        self.cc() & 0b001 != 0
    }

    /// Gets the bit-representation of the PSR.
    pub fn get(&self) -> u16 {
        self.0
    }
    /// Sets the PSR to the provided data value.
    ///
    /// Bits outside of the privilege and condition code bits are discarded.
    pub fn set(&mut self, data: u16) {
        self.0 = data & Self::MASK;
    }
    /// Sets whether the simulator is in privileged mode.
    pub fn set_privileged(&mut self, privl: bool) {
        self.0 &= 0x7FFF;
        self.0 |= u16::from(!privl) << 15;
    }
    /// Sets the condition code of the simulator.
    pub fn set_cc(&mut self, mut cc: u8) {
        self.0 &= 0xFFF8;

        // Guard from invalid CC.
        cc &= 0b111;
        if cc.count_ones() != 1 { cc = 0b010 };
        self.0 |= u16::from(cc);
    }
    /// Sets the condition code of the simulator to `n`.
    pub fn set_cc_n(&mut self) {
        self.set_cc(0b100)
    }
    /// Sets the condition code of the simulator to `z`.
    pub fn set_cc_z(&mut self) {
        self.set_cc(0b010)
    }
    /// Sets the condition code of the simulator to `p`.
    pub fn set_cc_p(&mut self) {
        self.set_cc(0b001)
    }
}
impl Default for PSR {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for PSR {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct CC(u8);

        impl std::fmt::Debug for CC {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.0 & 0b100 != 0 { f.write_char('N')?; };
                if self.0 & 0b010 != 0 { f.write_char('Z')?; };
                if self.0 & 0b001 != 0 { f.write_char('P')?; };
                Ok(())
            }
        }

        f.debug_struct("PSR")
            .field("privileged", &self.privileged())
            .field("cc", &CC(self.cc()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::ast::reg_consts::{R0, R1, R2, R3, R4, R5, R7};
    use crate::ast::sim::{ExtOp, SimInstr};
    use crate::ast::{IOffset, ImmOrReg, Reg, TrapVect8};

    use super::alu::{self, AluOp};
    use super::mem::{MachineInitStrategy, RegFile};
    use super::{SimErr, SimFlags, Simulator, StepErr, PSR};

    const START: u16 = 0x3000;

    fn imm<const N: u32>(n: i16) -> IOffset<N> {
        IOffset::new(n).unwrap()
    }
    fn load(sim: &mut Simulator, start: u16, program: &[SimInstr]) {
        let mut addr = start;
        for instr in program {
            sim.mem.write(addr, instr.encode());
            addr = addr.wrapping_add(1);
        }
        sim.reg_file.pc = start;
    }
    fn sim_with(program: &[SimInstr]) -> Simulator {
        let mut sim = Simulator::default();
        load(&mut sim, START, program);
        sim
    }

    #[test]
    fn test_and_register() {
        // AND R0, R0, R0
        let mut sim = Simulator::default();
        sim.mem.write(START, 0x5000);
        sim.reg_file.pc = START;
        sim.reg_file[R0] = 0x00F0;

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R0], 0x00F0);
        assert!(!sim.reg_file.psr.is_z());
        assert!(sim.reg_file.psr.is_p());
        assert_eq!(sim.reg_file.pc, START + 1);
        assert_eq!(sim.reg_file.ir, 0x5000);
        assert_eq!(sim.instructions_run, 1);
    }

    #[test]
    fn test_add_sets_cc() {
        let mut sim = sim_with(&[
            SimInstr::ADD(R1, R0, ImmOrReg::Imm(imm(-1))),
            SimInstr::ADD(R2, R1, ImmOrReg::Imm(imm(1))),
            SimInstr::ADD(R3, R2, ImmOrReg::Imm(imm(15))),
            SimInstr::ADD(R4, R3, ImmOrReg::Reg(R3)),
        ]);

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R1], 0xFFFF);
        assert_eq!(sim.reg_file.psr.cc(), 0b100);

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R2], 0);
        assert_eq!(sim.reg_file.psr.cc(), 0b010);

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R3], 15);
        assert_eq!(sim.reg_file.psr.cc(), 0b001);

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R4], 30);
    }

    #[test]
    fn test_fetch_then_decode_execute() {
        let mut sim = sim_with(&[SimInstr::NOT(R1, R0)]);

        sim.fetch();
        assert_eq!(sim.reg_file.ir, 0x923F);
        assert_eq!(sim.reg_file.pc, START + 1);
        assert_eq!(sim.instr_pc(), START);
        assert_eq!(sim.reg_file[R1], 0);

        sim.decode_execute().unwrap();
        assert_eq!(sim.reg_file[R1], 0xFFFF);
        assert!(sim.reg_file.psr.is_n());
    }

    #[test]
    fn test_pc_wraparound() {
        let mut sim = Simulator::default();
        load(&mut sim, 0xFFFF, &[SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0)))]);
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0);

        let mut sim = Simulator::new(SimFlags { addr_bits: 8, ..Default::default() });
        load(&mut sim, 0x00FF, &[SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0)))]);
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0);
    }

    #[test]
    fn test_illegal_opcode() {
        let mut sim = Simulator::default();
        sim.mem.write(START, 0xD1C0);
        sim.reg_file.pc = START;
        sim.reg_file[R0] = 0x1234;
        sim.reg_file.psr.set_cc_p();

        let mem_before = sim.mem.clone();
        let mut regs_expected = sim.reg_file.clone();
        regs_expected.pc = START + 1;
        regs_expected.ir = 0xD1C0;

        let err = sim.step().unwrap_err();
        assert_eq!(err, StepErr {
            pc: START,
            instr: 0xD1C0,
            kind: SimErr::IllegalOpcode { instr: 0xD1C0 }
        });
        assert_eq!(err.opcode(), 0xD);
        assert_eq!(sim.reg_file, regs_expected);
        assert_eq!(sim.mem, mem_before);
        assert_eq!(sim.instructions_run, 0);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut sim = Simulator::default();
        sim.mem.write(START, 0x8001);
        sim.reg_file.pc = START;

        let err = sim.step().unwrap_err();
        assert_eq!(err.kind, SimErr::UnknownOpcode { instr: 0x8001 });
        assert_ne!(err.kind, SimErr::IllegalOpcode { instr: 0x8001 });
        assert_eq!(sim.reg_file.pc, START + 1);
        assert_eq!(err.to_string(), "simulator executed unknown instruction x8001 (at x3000)");
    }

    #[test]
    fn test_loads() {
        let mut sim = sim_with(&[
            SimInstr::LD(R0, imm(4)),       // x3000: R0 = mem[x3005]
            SimInstr::LDI(R1, imm(4)),      // x3001: R1 = mem[mem[x3006]]
            SimInstr::LDR(R2, R5, imm(-2)), // x3002: R2 = mem[R5 - 2]
            SimInstr::LEA(R3, imm(-4)),     // x3003: R3 = x3000
        ]);
        sim.mem.write(0x3005, 0x8000);
        sim.mem.write(0x3006, 0x4000);
        sim.mem.write(0x4000, 0);
        sim.mem.write(0x4010, 7);
        sim.reg_file[R5] = 0x4012;

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R0], 0x8000);
        assert!(sim.reg_file.psr.is_n());

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R1], 0);
        assert!(sim.reg_file.psr.is_z());

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R2], 7);
        assert!(sim.reg_file.psr.is_p());

        sim.reg_file.psr.set_cc_z();
        sim.step().unwrap();
        assert_eq!(sim.reg_file[R3], 0x3000);
        assert!(sim.reg_file.psr.is_p());
    }

    #[test]
    fn test_stores() {
        let mut sim = sim_with(&[
            SimInstr::ST(R0, imm(4)),      // x3000: mem[x3005] = R0
            SimInstr::STI(R1, imm(4)),     // x3001: mem[mem[x3006]] = R1
            SimInstr::STR(R2, R5, imm(3)), // x3002: mem[R5 + 3] = R2
        ]);
        sim.mem.write(0x3006, 0x4000);
        sim.reg_file[R0] = 0xAAAA;
        sim.reg_file[R1] = 0xBBBB;
        sim.reg_file[R2] = 0xCCCC;
        sim.reg_file[R5] = 0x5000;
        sim.reg_file.psr.set_cc_z();

        sim.step().unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.mem.read(0x3005), 0xAAAA);
        assert_eq!(sim.mem.read(0x4000), 0xBBBB);
        assert_eq!(sim.mem.read(0x5003), 0xCCCC);

        // stores do not touch the condition codes
        assert_eq!(sim.reg_file.psr.cc(), 0b010);
    }

    #[test]
    fn test_br() {
        let mut sim = sim_with(&[
            SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0))), // x3000
            SimInstr::BR(0b101, imm(5)),                   // x3001: not taken
            SimInstr::BR(0b010, imm(2)),                   // x3002: taken, to x3005
        ]);
        load(&mut sim, 0x3005, &[SimInstr::BR(0b111, imm(-6))]); // x3005: back to x3000
        sim.reg_file.pc = START;

        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3002);
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3005);
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3000);

        // NOP never branches
        let mut sim = sim_with(&[SimInstr::BR(0b000, imm(10))]);
        sim.reg_file.psr.set_cc_z();
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, START + 1);
    }

    #[test]
    fn test_jsr_ret() {
        let mut sim = sim_with(&[
            SimInstr::JSR(ImmOrReg::Imm(imm(2))), // x3000
            SimInstr::JMP(R2),                     // x3001
            SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0))),
            SimInstr::JMP(R7),                     // x3003: RET
        ]);
        sim.reg_file[R2] = 0x4000;

        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3003);
        assert_eq!(sim.reg_file.lr(), 0x3001);

        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3001);

        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x4000);
    }

    #[test]
    fn test_jsrr() {
        let mut sim = sim_with(&[SimInstr::JSR(ImmOrReg::Reg(R3))]);
        sim.reg_file[R3] = 0x4000;
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x4000);
        assert_eq!(sim.reg_file[R7], 0x3001);

        // JSRR R7 jumps to the old R7
        let mut sim = sim_with(&[SimInstr::JSR(ImmOrReg::Reg(R7))]);
        sim.reg_file[R7] = 0x5000;
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x5000);
        assert_eq!(sim.reg_file[R7], 0x3001);
    }

    #[test]
    fn test_xop() {
        let mut sim = sim_with(&[
            SimInstr::XOP(ExtOp::Or, R1, ImmOrReg::Reg(R2)),
            SimInstr::XOP(ExtOp::Div, R1, ImmOrReg::Reg(R2)),
            SimInstr::XOP(ExtOp::Mul, R1, ImmOrReg::Imm(imm(-1))),
            SimInstr::XOP(ExtOp::Div, R1, ImmOrReg::Reg(R0)),
        ]);
        sim.reg_file[R1] = 0b100;
        sim.reg_file[R2] = 3;

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R1], 7);

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R1], 2);
        assert!(sim.reg_file.psr.is_p());

        sim.step().unwrap();
        assert_eq!(sim.reg_file[R1], 0xFFFE);
        assert!(sim.reg_file.psr.is_n());

        // R0 is zero
        let err = sim.step().unwrap_err();
        assert_eq!(err.kind, SimErr::DivideByZero);
        assert_eq!(err.pc, 0x3003);
        assert_eq!(sim.reg_file[R1], 0xFFFE);
        assert!(sim.reg_file.psr.is_n());
        assert_eq!(sim.reg_file.pc, 0x3004);
    }

    #[test]
    fn test_trap_rti_from_user() {
        let mut sim = sim_with(&[SimInstr::TRAP(TrapVect8::new(0x25).unwrap())]);
        load(&mut sim, 0x0400, &[SimInstr::RTI]);
        sim.mem.write(0x0025, 0x0400);

        sim.reg_file.pc = START;
        sim.reg_file.psr.set_privileged(false);
        sim.reg_file.psr.set_cc_p();
        sim.reg_file.set_sp(0xFE00);
        sim.reg_file.saved_ssp = 0x3000;
        let user_psr = sim.reg_file.psr;

        // TRAP
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x0400);
        assert!(sim.reg_file.psr.privileged());
        assert_eq!(sim.reg_file.sp(), 0x2FFE);
        assert_eq!(sim.reg_file.saved_usp, 0xFE00);
        assert_eq!(sim.mem.read(0x2FFF), user_psr.get());
        assert_eq!(sim.mem.read(0x2FFE), 0x3001);

        // RTI
        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x3001);
        assert_eq!(sim.reg_file.psr, user_psr);
        assert_eq!(sim.reg_file.sp(), 0xFE00);
        assert_eq!(sim.reg_file.saved_ssp, 0x3000);
    }

    #[test]
    fn test_trap_from_supervisor() {
        let mut sim = sim_with(&[SimInstr::TRAP(TrapVect8::new(0x20).unwrap())]);
        sim.mem.write(0x0020, 0x0500);
        sim.reg_file.set_sp(0x2000);
        sim.reg_file.saved_ssp = 0x1234;
        sim.reg_file.saved_usp = 0x4321;

        sim.step().unwrap();
        assert_eq!(sim.reg_file.pc, 0x0500);
        assert_eq!(sim.reg_file.sp(), 0x1FFE);
        assert_eq!(sim.reg_file.saved_ssp, 0x1234);
        assert_eq!(sim.reg_file.saved_usp, 0x4321);
        assert_eq!(sim.mem.read(0x1FFF), 0x0000);
        assert_eq!(sim.mem.read(0x1FFE), 0x3001);
    }

    #[test]
    fn test_rti_in_user_mode() {
        let mut sim = sim_with(&[SimInstr::RTI]);
        sim.reg_file.psr.set_privileged(false);
        sim.reg_file.set_sp(0x2FFE);
        sim.mem.write(0x2FFE, 0x1111);
        sim.mem.write(0x2FFF, 0x0001);

        let err = sim.step().unwrap_err();
        assert_eq!(err.kind, SimErr::PrivilegeViolation);
        assert_eq!(sim.reg_file.pc, START + 1);
        assert_eq!(sim.reg_file.sp(), 0x2FFE);
        assert!(!sim.reg_file.psr.privileged());
    }

    #[test]
    fn test_observer() {
        let mut sim = sim_with(&[
            SimInstr::ST(R0, imm(4)),
            SimInstr::LD(R1, imm(3)),
        ]);
        sim.reg_file[R0] = 9;

        sim.step().unwrap();
        assert!(sim.observer.get_mem_accesses(0x3000).read());
        assert!(sim.observer.get_mem_accesses(0x3005).modified());
        assert!(!sim.observer.reg_written(R0));

        sim.step().unwrap();
        assert!(!sim.observer.get_mem_accesses(0x3000).accessed());
        assert!(sim.observer.get_mem_accesses(0x3001).read());
        assert!(sim.observer.get_mem_accesses(0x3005).read());
        assert!(!sim.observer.get_mem_accesses(0x3005).written());
        assert!(sim.observer.reg_written(R1));

        // writing the same value is a write but not a modification
        sim.write_mem(0x3005, 9);
        let set = sim.observer.get_mem_accesses(0x3005);
        assert!(set.written() && !set.modified());
    }

    #[test]
    fn test_reset() {
        let flags = SimFlags { addr_bits: 12, ..Default::default() };
        let mut sim = Simulator::new(flags);
        load(&mut sim, 0x0100, &[SimInstr::ADD(R0, R0, ImmOrReg::Imm(imm(3)))]);
        sim.running = true;
        sim.step().unwrap();

        sim.reset();
        assert_eq!(sim.flags, flags);
        assert_eq!(sim.mem.len(), 0x1000);
        assert!(sim.mem.as_slice().iter().all(|&w| w == 0));
        assert_eq!(sim.reg_file, RegFile::new());
        assert_eq!(sim.reg_file.psr, PSR::new());
        assert_eq!(sim.instructions_run, 0);
        assert!(!sim.running);
    }

    #[test]
    fn test_running_flag_is_not_read() {
        let mut sim = sim_with(&[SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0)))]);
        assert!(!sim.running);
        sim.step().unwrap();
        assert!(!sim.running);

        sim.running = true;
        sim.reg_file.pc = START;
        sim.step().unwrap();
        assert!(sim.running);
    }

    #[test]
    fn test_machine_init() {
        let flags = SimFlags { addr_bits: 6, machine_init: MachineInitStrategy::Known { value: 0xBEEF } };
        let sim = Simulator::new(flags);
        assert!(sim.mem.as_slice().iter().all(|&w| w == 0xBEEF));

        let flags = SimFlags { addr_bits: 6, machine_init: MachineInitStrategy::Seeded { seed: 7 } };
        let a = Simulator::new(flags);
        let mut b = Simulator::new(flags);
        b.reset();
        assert_eq!(a.mem, b.mem);
    }

    #[test]
    fn test_flags_serde() {
        let flags = SimFlags { addr_bits: 8, machine_init: MachineInitStrategy::Seeded { seed: 5 } };
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(serde_json::from_str::<SimFlags>(&json).unwrap(), flags);

        let flags: SimFlags = serde_json::from_str(r#"{ "machine_init": { "kind": "known", "value": 3 } }"#).unwrap();
        assert_eq!(flags.addr_bits, 16);
        assert_eq!(flags.machine_init, MachineInitStrategy::Known { value: 3 });

        let flags: SimFlags = serde_json::from_str("{}").unwrap();
        assert_eq!(flags, SimFlags::default());
    }

    #[test]
    fn test_psr() {
        let mut psr = PSR::new();
        assert!(psr.privileged());
        assert_eq!(psr.cc(), 0);

        psr.set(0xFFFF);
        assert_eq!(psr.get(), 0x8007);
        assert!(!psr.privileged());

        psr.set_cc(0b011);
        assert_eq!(psr.cc(), 0b010);
        psr.set_privileged(true);
        assert_eq!(psr.get(), 0x0002);
        assert_eq!(format!("{psr:?}"), "PSR { privileged: true, cc: Z }");
    }

    fn expected_cc(value: u16) -> u8 {
        if value & 0x8000 != 0 {
            0b100
        } else if value == 0 {
            0b010
        } else {
            0b001
        }
    }

    proptest! {
        #[test]
        fn prop_alu_instr_step(
            dr in 0u8..8,
            sr in 0u8..8,
            n in -16i16..16,
            value in any::<u16>(),
            and in any::<bool>()
        ) {
            let dr = Reg::try_from(dr).unwrap();
            let sr = Reg::try_from(sr).unwrap();
            let operand = ImmOrReg::Imm(imm(n));
            let (op, instr) = match and {
                true  => (AluOp::And, SimInstr::AND(dr, sr, operand)),
                false => (AluOp::Add, SimInstr::ADD(dr, sr, operand)),
            };

            let mut sim = sim_with(&[instr]);
            sim.reg_file[sr] = value;
            sim.step().unwrap();

            let expected = alu::execute(op, value, n as u16).unwrap();
            prop_assert_eq!(sim.reg_file[dr], expected);
            prop_assert_eq!(sim.reg_file.psr.cc(), expected_cc(expected));
        }

        #[test]
        fn prop_pc_wraps_at_end(bits in 1u8..=16) {
            let mut sim = Simulator::new(SimFlags { addr_bits: bits, ..Default::default() });
            let last = (sim.mem.len() - 1) as u16;
            load(&mut sim, last, &[SimInstr::AND(R0, R0, ImmOrReg::Imm(imm(0)))]);

            sim.step().unwrap();
            prop_assert_eq!(sim.reg_file.pc, 0);
            prop_assert_eq!(sim.instr_pc(), last);
        }

        #[test]
        fn prop_trap_rti_roundtrip(
            vect in 0u16..0x100,
            user in any::<bool>(),
            cc in prop::sample::select(vec![0b001u8, 0b010, 0b100]),
            usp in any::<u16>(),
            ssp in 0x1000u16..0x2000,
        ) {
            let mut sim = sim_with(&[SimInstr::TRAP(TrapVect8::new(vect).unwrap())]);
            load(&mut sim, 0x0400, &[SimInstr::RTI]);
            sim.mem.write(vect, 0x0400);
            sim.reg_file.pc = START;

            sim.reg_file.psr.set_privileged(!user);
            sim.reg_file.psr.set_cc(cc);
            match user {
                true => {
                    sim.reg_file.set_sp(usp);
                    sim.reg_file.saved_ssp = ssp;
                },
                false => sim.reg_file.set_sp(ssp),
            }
            let before = sim.reg_file.clone();

            sim.step().unwrap();
            prop_assert!(sim.reg_file.psr.privileged());
            prop_assert_eq!(sim.reg_file.pc, 0x0400);
            prop_assert_eq!(sim.reg_file.sp(), ssp - 2);

            sim.step().unwrap();
            prop_assert_eq!(sim.reg_file.pc, START + 1);
            prop_assert_eq!(sim.reg_file.psr, before.psr);
            prop_assert_eq!(sim.reg_file.sp(), before.sp());
            if user {
                prop_assert_eq!(sim.reg_file.saved_ssp, ssp);
            }
        }
    }
}

//! A simulator for a 16-bit, LC-3 style instruction set.
//!
//! This crate models a small processor: a word-addressed memory, a register file,
//! an arithmetic-logic unit, and a CPU core which fetches, decodes, and executes
//! one instruction at a time (including trap entry and return with privilege switching).
//!
//! # Usage
//!
//! Instructions are written into memory as encoded words (see [`ast::sim::SimInstr`]),
//! then executed with the simulator:
//! ```
//! use cpu_sim::ast::sim::SimInstr;
//! use cpu_sim::ast::reg_consts::{R0, R1};
//! use cpu_sim::ast::{ImmOrReg, IOffset};
//! use cpu_sim::sim::Simulator;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.mem.write(0x3000, SimInstr::ADD(R1, R0, ImmOrReg::Imm(IOffset::new_trunc(7))).encode());
//! simulator.reg_file.pc = 0x3000;
//!
//! simulator.step().unwrap(); // <-- Result can be handled accordingly
//! assert_eq!(simulator.reg_file[R1], 7);
//! ```
//!
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod ast;
pub mod sim;

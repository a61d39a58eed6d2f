//! Memory handling for the simulator.
//!
//! This module consists of:
//! - [`Mem`]: The memory.
//! - [`RegFile`]: The register file.
//! - [`MachineInitStrategy`]: How the memory is filled when the machine is created or reset.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ast::reg_consts::{R6, R7};
use crate::ast::Reg;

use super::{SimErr, PSR};

/// Trait that describes types that can be used to create the data for a fresh memory cell.
///
/// This is used with [`Mem::new`] and [`Mem::clear`].
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u16;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u16 {
        rand::random()
    }
}
impl WordFiller for u16 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u16 {
        self.gen()
    }
}

/// Strategy used to fill the `mem` of the [`Simulator`]
/// when it is created and whenever it is reset.
///
/// By default, memory is zero-filled.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineInitStrategy {
    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u16
    },

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word randomly and non-deterministically.
    Unseeded,
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => WCGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => WCGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => WCGenerator::Known(*value),
        }
    }
}

enum WCGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u16)
}
impl WordFiller for WCGenerator {
    fn generate(&mut self) -> u16 {
        match self {
            WCGenerator::Unseeded  => ().generate(),
            WCGenerator::Seeded(r) => r.generate(),
            WCGenerator::Known(k)  => k.generate(),
        }
    }
}

/// The largest number of address bits (a 65536-word address space).
pub const MAX_ADDR_BITS: u8 = 16;

/// Memory.
///
/// Memory holds `2^addr_bits` 16-bit words.
/// It can be addressed with any `u16`. Addresses are reduced modulo the memory's size
/// before every access, so reads and writes never fail.
///
/// ```
/// use cpu_sim::sim::mem::Mem;
///
/// let mut mem = Mem::new(8, &mut 0u16); // 256 words
/// mem.write(0x0010, 11);
/// assert_eq!(mem.read(0x0010), 11);
/// assert_eq!(mem.read(0x0110), 11); // wraps around
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mem {
    data: Box<[u16]>,
}
impl Mem {
    /// Creates a new memory of `2^addr_bits` words, filled by `filler`.
    ///
    /// `addr_bits` is clamped between 1 and [`MAX_ADDR_BITS`].
    pub fn new(addr_bits: u8, filler: &mut impl WordFiller) -> Self {
        let len = 1usize << addr_bits.clamp(1, MAX_ADDR_BITS);

        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take(len)
                .collect()
        }
    }

    /// The number of words in this memory.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this memory has no words (never true).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reduces an address into the range of this memory.
    pub fn wrap(&self, addr: u16) -> u16 {
        // len is a power of two no larger than 2^16
        ((self.data.len() - 1) as u16) & addr
    }

    /// Reads the word at the provided address.
    pub fn read(&self, addr: u16) -> u16 {
        self.data[usize::from(self.wrap(addr))]
    }

    /// Writes the word at the provided address.
    pub fn write(&mut self, addr: u16, data: u16) {
        let i = usize::from(self.wrap(addr));
        self.data[i] = data;
    }

    /// Refills every word with `filler`.
    pub fn clear(&mut self, filler: &mut impl WordFiller) {
        self.data.iter_mut()
            .for_each(|w| *w = filler.generate());
    }

    /// Gets a view of the whole memory.
    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }
}

/// The register file.
///
/// This holds the general purpose registers (R0-R7) and the special registers:
/// - `pc`: the program counter
/// - `ir`: the instruction register
/// - `psr`: the processor status register (see [`PSR`])
/// - `saved_ssp`, `saved_usp`: the saved supervisor and user stack pointers
///
/// By convention, R6 is the live stack pointer (see [`RegFile::sp`])
/// and R7 is the link register (see [`RegFile::lr`]).
///
/// General purpose registers can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`])
/// or accessed by number with [`RegFile::get`] and [`RegFile::set`].
///
/// # Example
///
/// ```
/// use cpu_sim::sim::mem::RegFile;
/// use cpu_sim::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new();
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// assert_eq!(reg.get(0), Ok(11));
/// assert!(reg.set(8, 11).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegFile {
    gprs: [u16; 8],

    /// The program counter.
    pub pc: u16,
    /// The instruction register.
    pub ir: u16,
    /// The processor status register.
    pub psr: PSR,
    /// The supervisor stack pointer, while it is not in use.
    pub saved_ssp: u16,
    /// The user stack pointer, while it is not in use.
    pub saved_usp: u16,
}
impl RegFile {
    /// Creates a register file with every register set to zero.
    pub fn new() -> Self {
        Default::default()
    }

    /// Reads the general purpose register with the given number,
    /// erroring if the number is out of range.
    pub fn get(&self, index: usize) -> Result<u16, SimErr> {
        let reg = Reg::try_from(index)?;
        Ok(self[reg])
    }

    /// Writes the general purpose register with the given number,
    /// erroring (and writing nothing) if the number is out of range.
    pub fn set(&mut self, index: usize, value: u16) -> Result<(), SimErr> {
        let reg = Reg::try_from(index)?;
        self[reg] = value;
        Ok(())
    }

    /// The link register (R7).
    pub fn lr(&self) -> u16 {
        self[R7]
    }
    /// Sets the link register (R7).
    pub fn set_lr(&mut self, value: u16) {
        self[R7] = value;
    }

    /// The live stack pointer (R6).
    pub fn sp(&self) -> u16 {
        self[R6]
    }
    /// Sets the live stack pointer (R6).
    pub fn set_sp(&mut self, value: u16) {
        self[R6] = value;
    }

    /// Sets the condition codes using the provided result.
    ///
    /// Exactly one of N, Z, P is set afterwards.
    /// The sign bit is checked first, then whether the value is zero.
    pub fn set_cc(&mut self, result: u16) {
        match (result as i16).cmp(&0) {
            std::cmp::Ordering::Less    => self.psr.set_cc_n(),
            std::cmp::Ordering::Equal   => self.psr.set_cc_z(),
            std::cmp::Ordering::Greater => self.psr.set_cc_p(),
        }
    }

    /// Gets a view of the general purpose registers.
    pub fn gprs(&self) -> &[u16; 8] {
        &self.gprs
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.gprs[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.gprs[usize::from(index)]
    }
}

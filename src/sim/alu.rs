//! The arithmetic-logic unit.
//!
//! The ALU is a pure function from an [`AluOp`] and two 16-bit operands
//! to a 16-bit result (see [`execute`]).
//!
//! ```
//! use cpu_sim::sim::alu::{self, AluOp};
//!
//! assert_eq!(alu::execute(AluOp::Add, 2, 3), Ok(5));
//! assert_eq!(alu::execute("DIV".parse::<AluOp>().unwrap(), 7, 3), Ok(2));
//! ```

use std::str::FromStr;

use super::SimErr;

/// An operation the ALU can perform.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AluOp {
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Wrapping addition.
    Add,
    /// Wrapping multiplication.
    Mul,
    /// Unsigned floor division.
    Div
}

impl AluOp {
    /// All operations, in tag order.
    pub const ALL: [AluOp; 5] = [AluOp::And, AluOp::Or, AluOp::Add, AluOp::Mul, AluOp::Div];

    /// The textual tag of this operation.
    pub fn tag(self) -> &'static str {
        match self {
            AluOp::And => "AND",
            AluOp::Or  => "OR",
            AluOp::Add => "ADD",
            AluOp::Mul => "MUL",
            AluOp::Div => "DIV",
        }
    }
}
impl std::fmt::Display for AluOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
impl FromStr for AluOp {
    type Err = SimErr;

    /// Parses an operation tag (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter()
            .find(|op| op.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| SimErr::UnsupportedAluOp(s.to_string()))
    }
}

/// Applies `op` to the operands `a` and `b`.
///
/// Arithmetic wraps at 16 bits. Division is unsigned and rounds toward zero
/// (which is floor division for unsigned operands), and fails with
/// [`SimErr::DivideByZero`] if `b` is zero.
pub fn execute(op: AluOp, a: u16, b: u16) -> Result<u16, SimErr> {
    let result = match op {
        AluOp::And => a & b,
        AluOp::Or  => a | b,
        AluOp::Add => a.wrapping_add(b),
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Div => a.checked_div(b).ok_or(SimErr::DivideByZero)?,
    };

    Ok(result)
}

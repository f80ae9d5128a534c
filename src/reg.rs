//! Scalar register references.
//!
//! The encoder never allocates registers: every register named here is
//! chosen by the caller and carried through encoding verbatim as a hardware
//! encoding number. Named constructors for the x86-64 register file live in
//! `isa::x64::regs`.

use core::fmt;

/// A general-purpose integer register, by hardware encoding number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gpr(u8);

impl Gpr {
    /// Wrap a hardware encoding number.
    pub fn new(enc: u8) -> Gpr {
        debug_assert!(enc < 16);
        Gpr(enc)
    }

    /// The hardware encoding number.
    pub fn enc(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%gpr{}", self.0)
    }
}

/// A predicate (mask) register, by hardware encoding number. Only targets
/// with dedicated mask registers give these a hardware meaning; the software
/// blend path ignores them in favor of a predicate's vector home.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kreg(u8);

impl Kreg {
    /// Wrap a hardware encoding number.
    pub fn new(enc: u8) -> Kreg {
        debug_assert!(enc < 8);
        Kreg(enc)
    }

    /// The hardware encoding number.
    pub fn enc(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Kreg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%k{}", self.0)
    }
}

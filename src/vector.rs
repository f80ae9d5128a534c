//! Virtual wide vectors and predicates.
//!
//! A [`WideVec`] names a logical SIMD vector that is wider than any native
//! register: it stands for a fixed group of [`WIDE_SLOTS`] native vector
//! registers ("slots") under a static, architecture-independent mapping.
//! The logical width therefore follows the tier's native width: four 512-bit
//! slots (2048 bits) on the AVX-512 tiers, four 256-bit slots (1024 bits) on
//! the AVX2 tier. A `WideVec` exists only at build time; no runtime value
//! ever represents one.

use crate::result::{CodegenError, CodegenResult};

/// Number of native-register slots backing one wide vector.
pub const WIDE_SLOTS: u8 = 4;

/// A virtual wide vector register.
///
/// Id `n` maps slot `i` to native vector register `n * WIDE_SLOTS + i`, so
/// the 16-register x86-64 vector file holds ids 0 through 3. The caller
/// chooses ids; the encoder only validates the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WideVec(u8);

impl WideVec {
    /// Wrap a wide-vector id.
    pub const fn new(id: u8) -> WideVec {
        WideVec(id)
    }

    /// The wide-vector id.
    pub const fn id(self) -> u8 {
        self.0
    }

    /// Hardware encoding of slot `i`.
    pub fn slot(self, i: u8) -> u8 {
        debug_assert!(i < WIDE_SLOTS);
        self.0 * WIDE_SLOTS + i
    }

    pub(crate) fn check(self) -> CodegenResult<()> {
        if self.0 * WIDE_SLOTS + (WIDE_SLOTS - 1) < 16 {
            Ok(())
        } else {
            Err(CodegenError::InvalidOperand {
                what: "wide-vector id past the end of the vector register file",
            })
        }
    }
}

impl core::fmt::Display for WideVec {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

/// A virtual predicate: one bit per lane of a wide vector.
///
/// The predicate names both possible hardware homes so that a single caller
/// contract covers both lowering strategies. On tiers with mask registers,
/// slot `i` of the predicate lives in mask register `k_base + i`; on tiers
/// without, the predicate lives in `home` as a vector of all-ones/all-zeros
/// lanes. Which home is live is an internal property of the selected tier,
/// never observable through the operation surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pred {
    k_base: u8,
    home: WideVec,
}

impl Pred {
    /// Create a predicate with mask-register bank starting at `k_base`
    /// (`k_base + WIDE_SLOTS` must stay within k1..k7; k0 means "unmasked"
    /// in the hardware encoding and is never a valid predicate home) and
    /// vector home `home`.
    pub fn new(k_base: u8, home: WideVec) -> Pred {
        Pred {
            k_base,
            home,
        }
    }

    /// Mask register encoding backing slot `i`.
    pub fn kreg(self, i: u8) -> u8 {
        debug_assert!(i < WIDE_SLOTS);
        self.k_base + i
    }

    /// The vector home used by the software blend path.
    pub fn home(self) -> WideVec {
        self.home
    }

    pub(crate) fn check(self) -> CodegenResult<()> {
        if self.k_base == 0 || self.k_base + WIDE_SLOTS > 8 {
            return Err(CodegenError::InvalidOperand {
                what: "predicate mask bank must fit within k1..k7",
            });
        }
        self.home.check()
    }
}

impl core::fmt::Display for Pred {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "%p(k{}..k{}/{})", self.k_base, self.k_base + WIDE_SLOTS - 1, self.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_mapping_is_static() {
        let v = WideVec::new(2);
        assert_eq!(v.slot(0), 8);
        assert_eq!(v.slot(3), 11);
        assert!(v.check().is_ok());
        assert!(WideVec::new(4).check().is_err());
    }

    #[test]
    fn pred_bank_window() {
        assert!(Pred::new(1, WideVec::new(0)).check().is_ok());
        assert!(Pred::new(4, WideVec::new(0)).check().is_ok());
        assert!(Pred::new(0, WideVec::new(0)).check().is_err());
        assert!(Pred::new(5, WideVec::new(0)).check().is_err());
    }
}

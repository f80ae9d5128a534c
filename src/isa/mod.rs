//! Instruction Set Architectures.
//!
//! The `isa` module provides a [`TargetIsa`] trait behind which each backend
//! hides its encoding, width-emulation, predication and branch strategies.
//! A backend is selected once per build from a target triple and a
//! [`Tier`]; everything downstream of that choice is static. Adding an
//! architecture means adding one sub-module with a tier implementation for
//! each component and one `lookup` arm; callers do not change.
//!
//! ```
//! use lanegen::isa::{self, TargetIsa, Tier};
//! use std::str::FromStr;
//! use target_lexicon::Triple;
//!
//! let triple = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();
//! let isa = isa::lookup(triple)
//!     .expect("x86-64 support is compiled in")
//!     .finish(Tier::Avx512Bw);
//! assert_eq!(isa.name(), "x64");
//! ```

use core::fmt;

use target_lexicon::{Architecture, Triple};

use crate::buffer::CodeBuffer;
use crate::inst::Inst;
use crate::reg::Gpr;
use crate::result::CodegenResult;
use crate::scratch::ScratchTracker;

#[cfg(feature = "x86")]
pub mod x64;

/// A target capability tier: which native instruction subsets the selected
/// build may use. Selected once per build, immutable; every operation's
/// lowering path is a function of its descriptor and this value alone.
///
/// The closed set of variants is the dispatch table: other architectures
/// would add their own tiers here alongside an `isa` sub-module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// 256-bit native vectors, no mask registers. Predication lowers to
    /// software AND/ANDN/OR blends.
    Avx2,
    /// 512-bit native vectors with mask registers for 32/64-bit lanes.
    /// Byte/word lane operations are emulated at narrower width.
    Avx512F,
    /// `Avx512F` plus native byte/word lane operations and wide mask moves.
    Avx512Bw,
}

impl Tier {
    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Avx2 => "avx2",
            Tier::Avx512F => "avx512f",
            Tier::Avx512Bw => "avx512bw",
        }
    }

    /// Native slot width in bits.
    pub fn slot_bits(self) -> u32 {
        match self {
            Tier::Avx2 => 256,
            Tier::Avx512F | Tier::Avx512Bw => 512,
        }
    }

    /// Native slot width in bytes.
    pub fn slot_bytes(self) -> i32 {
        (self.slot_bits() / 8) as i32
    }

    /// Whether the tier has architectural mask registers.
    pub fn has_mask_regs(self) -> bool {
        !matches!(self, Tier::Avx2)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mutable emission context threaded through every `emit_inst` call: owns
/// the scratch-region tracker so that emulated lowerings get exclusive,
/// checked access to the shared scratch buffer.
pub struct EmitState {
    scratch: ScratchTracker,
}

impl EmitState {
    /// Create an emission context with the scratch region addressed off
    /// `scratch_base`.
    pub fn new(scratch_base: Gpr) -> EmitState {
        EmitState {
            scratch: ScratchTracker::new(scratch_base),
        }
    }

    /// The scratch-region tracker.
    pub fn scratch(&self) -> &ScratchTracker {
        &self.scratch
    }
}

/// Methods implemented by a backend for a concrete (architecture, tier)
/// selection.
pub trait TargetIsa {
    /// Short backend name.
    fn name(&self) -> &'static str;

    /// The capability tier this backend was built for.
    fn tier(&self) -> Tier;

    /// The triple this backend was selected from.
    fn triple(&self) -> &Triple;

    /// Encode one operation of the catalog into `sink`.
    fn emit_inst(
        &self,
        inst: &Inst,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
    ) -> CodegenResult<()>;
}

/// Describes the reason for a target lookup failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// The requested architecture is not supported by this crate.
    Unsupported,
    /// Support for the requested architecture was disabled at compile time.
    SupportDisabled,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LookupError::Unsupported => write!(f, "unsupported architecture"),
            LookupError::SupportDisabled => {
                write!(f, "support for this architecture was disabled at compile time")
            }
        }
    }
}

impl std::error::Error for LookupError {}

/// Builder for a [`TargetIsa`]: carries the validated triple until the
/// caller commits to a capability tier.
pub struct Builder {
    triple: Triple,
    constructor: fn(Triple, Tier) -> Box<dyn TargetIsa>,
}

impl Builder {
    /// Commit to a tier and build the backend.
    pub fn finish(self, tier: Tier) -> Box<dyn TargetIsa> {
        (self.constructor)(self.triple, tier)
    }
}

/// Returns a builder that can create a corresponding `TargetIsa` or
/// `Err(LookupError::SupportDisabled)` if not enabled.
macro_rules! isa_builder {
    ($name:ident, $cfg_terms:tt, $triple:ident) => {{
        #[cfg $cfg_terms]
        {
            Ok(Builder {
                triple: $triple,
                constructor: $name::isa_constructor,
            })
        }
        #[cfg(not $cfg_terms)]
        {
            let _ = $triple;
            Err(LookupError::SupportDisabled)
        }
    }};
}

/// Look for an ISA for the given `triple`; return a builder that can create
/// a corresponding `TargetIsa`.
pub fn lookup(triple: Triple) -> Result<Builder, LookupError> {
    match triple.architecture {
        Architecture::X86_64 => {
            isa_builder!(x64, (feature = "x86"), triple)
        }
        _ => Err(LookupError::Unsupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn lookup_x86_64() {
        let triple = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();
        let isa = lookup(triple).unwrap().finish(Tier::Avx512F);
        assert_eq!(isa.name(), "x64");
        assert_eq!(isa.tier(), Tier::Avx512F);
    }

    #[test]
    fn lookup_unknown_arch() {
        let triple = Triple::from_str("riscv64gc-unknown-linux-gnu").unwrap();
        assert_eq!(lookup(triple).err(), Some(LookupError::Unsupported));
    }

    #[test]
    fn tier_geometry() {
        assert_eq!(Tier::Avx2.slot_bits(), 256);
        assert_eq!(Tier::Avx512F.slot_bytes(), 64);
        assert!(!Tier::Avx2.has_mask_regs());
        assert!(Tier::Avx512Bw.has_mask_regs());
    }
}

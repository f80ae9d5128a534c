//! The scratch buffer: a fixed-size, statically addressed memory region used
//! by the width-emulation engine to move data between the vector and
//! scalar/narrower-vector domains.
//!
//! The region is addressed off a caller-designated base register (the
//! renderer keeps a pinned pointer for this, conventionally `%r15`) and is
//! shared by every emulated lowering in emission order. One lowering's
//! store→process→reload sequence must be fully emitted before the next may
//! touch the region, so checkout is exclusive: [`ScratchTracker::acquire`]
//! hands out a guard and fails with [`CodegenError::ScratchInUse`] while a
//! guard is still live. The original design left this as a silent aliasing
//! hazard; here it is a checked build-time precondition.

use core::cell::Cell;

use crate::reg::Gpr;
use crate::result::{CodegenError, CodegenResult};

/// Byte size reserved for each named area: one full wide vector at the
/// widest slot width (4 x 64 bytes).
pub const AREA_BYTES: i32 = 256;

/// The named areas of the scratch region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Area {
    /// First spilled source operand.
    Src0,
    /// Second spilled source operand (or per-lane shift counts).
    Src1,
    /// Narrow-domain results awaiting the final reload.
    Dst,
    /// Single-lane scalar round-trips (variable-shift decomposition).
    Lanes,
}

impl Area {
    /// Byte offset of the area from the scratch base register.
    pub fn offset(self) -> i32 {
        match self {
            Area::Src0 => 0,
            Area::Src1 => AREA_BYTES,
            Area::Dst => 2 * AREA_BYTES,
            Area::Lanes => 3 * AREA_BYTES,
        }
    }
}

/// Tracks exclusive checkout of the scratch region during emission.
pub struct ScratchTracker {
    base: Gpr,
    in_use: Cell<bool>,
}

impl ScratchTracker {
    /// Create a tracker addressing the region off `base`.
    pub fn new(base: Gpr) -> ScratchTracker {
        ScratchTracker {
            base,
            in_use: Cell::new(false),
        }
    }

    /// The scratch base register.
    pub fn base(&self) -> Gpr {
        self.base
    }

    /// Check the region out for the duration of one lowering. Fails if a
    /// previous checkout is still open.
    pub fn acquire(&self) -> CodegenResult<ScratchGuard<'_>> {
        if self.in_use.replace(true) {
            return Err(CodegenError::ScratchInUse);
        }
        Ok(ScratchGuard {
            flag: &self.in_use,
        })
    }
}

/// Exclusive access to the scratch region for one lowering; released on
/// drop.
pub struct ScratchGuard<'a> {
    flag: &'a Cell<bool>,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_is_exclusive() {
        let tracker = ScratchTracker::new(Gpr::new(15));
        let guard = tracker.acquire().unwrap();
        assert_eq!(tracker.acquire().err(), Some(CodegenError::ScratchInUse));
        drop(guard);
        assert!(tracker.acquire().is_ok());
    }

    #[test]
    fn areas_do_not_overlap() {
        let offs = [
            Area::Src0.offset(),
            Area::Src1.offset(),
            Area::Dst.offset(),
            Area::Lanes.offset(),
        ];
        for pair in offs.windows(2) {
            assert!(pair[1] - pair[0] >= AREA_BYTES);
        }
    }
}

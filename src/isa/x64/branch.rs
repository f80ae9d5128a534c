//! Mask collapse and SPMD branching.
//!
//! Reduces a full-width predicate to a single scalar word and branches on
//! whether it matches a caller-named uniform-lane pattern. The assembled
//! bit order is stable within a build: slot 0 occupies the
//! least-significant group. When the total lane count exceeds a machine
//! word, the per-slot groups cannot be concatenated; they fold with OR for
//! the none-test and AND for the all-test instead, which preserves exactly
//! the none/all/mixed distinction the branch needs. Callers never see the
//! assembled patterns; they name conditions through
//! [`LaneCond`](crate::inst::LaneCond) only.

use log::trace;

use crate::buffer::{CodeBuffer, Label};
use crate::inst::{ElemWidth, LaneCond};
use crate::isa::x64::args::Amode;
use crate::isa::x64::emit::{
    self, emit_alu_rr, emit_cmp_ri, emit_jcc, emit_kmov_to_gpr, emit_movmsk, emit_shl64_ri,
    emit_slot_move, emit_vpmovmskb, emit_ymm_move, AluOp, CC_E,
};
use crate::isa::x64::mask::native_pred;
use crate::isa::{EmitState, Tier};
use crate::reg::Gpr;
use crate::result::{CodegenError, CodegenResult};
use crate::scratch::Area;
use crate::vector::{Pred, WIDE_SLOTS};

/// How the per-slot groups combine into the final word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Combine {
    /// Shift each group to its position and OR: the word holds every lane
    /// bit. Possible only while the total bit count fits a machine word.
    Concat { group_bits: u32 },
    /// Fold the groups with OR (none-test) or AND (all-test): the word
    /// holds a per-position summary. Used when lanes outnumber word bits.
    Fold { group_bits: u32 },
}

/// Select the combine strategy for a per-slot group width.
pub(crate) fn combine_for(group_bits: u32) -> Combine {
    if u32::from(WIDE_SLOTS) * group_bits <= 64 {
        Combine::Concat {
            group_bits,
        }
    } else {
        Combine::Fold {
            group_bits,
        }
    }
}

/// The expected scalar word for a condition under a combine strategy, and
/// whether the final compare must look at all 64 bits.
pub(crate) fn expected_word(cond: LaneCond, combine: Combine) -> (i64, bool) {
    // An all-ones 32-bit pattern compares as `-1` at 32-bit width (the
    // accumulator's upper half is known zero), so only the full 64-bit
    // pattern needs a wide compare.
    let all_ones = |bits: u32| match bits {
        64 => (-1, true),
        32 => (-1, false),
        b => ((1i64 << b) - 1, false),
    };
    match (cond, combine) {
        (LaneCond::NoneSatisfy, _) => (0, false),
        (LaneCond::AllSatisfy, Combine::Concat { group_bits }) => {
            all_ones(u32::from(WIDE_SLOTS) * group_bits)
        }
        (LaneCond::AllSatisfy, Combine::Fold { group_bits }) => all_ones(group_bits),
    }
}

/// Emit the final compare-and-branch once `acc` holds the assembled word.
fn emit_test_and_branch(
    sink: &mut CodeBuffer,
    acc: Gpr,
    cond: LaneCond,
    combine: Combine,
    target: Label,
) {
    let (expected, wide) = expected_word(cond, combine);
    if wide {
        // The only >31-bit patterns are all-ones words, which the
        // sign-extended 8-bit immediate reaches.
        debug_assert!(expected == -1 || expected == 0);
        emit_cmp_ri(sink, acc, expected as i32, true);
    } else {
        emit_cmp_ri(sink, acc, expected as i32, false);
    }
    emit_jcc(sink, CC_E, target);
}

/// Emit a collapse-and-branch for one predicate.
pub(crate) fn emit_mask_branch(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    width: ElemWidth,
    pred: Pred,
    cond: LaneCond,
    acc: Gpr,
    tmp: Gpr,
    target: Label,
) -> CodegenResult<()> {
    if acc == tmp {
        return Err(CodegenError::RegisterAliasing {
            op: "mask branch".to_string(),
            constraint: "the accumulator and per-slot temporary must be distinct",
        });
    }

    if native_pred(tier, width) {
        // Read each mask register into a GPR and combine.
        let lanes_per_slot = tier.slot_bits() / width.bits();
        let combine = combine_for(lanes_per_slot);
        trace!("collapse.{width}: native mask registers, {combine:?}");
        for i in 0..WIDE_SLOTS {
            let dst = if i == 0 { acc } else { tmp };
            emit_kmov_to_gpr(sink, lanes_per_slot, dst, pred.kreg(i));
            if i > 0 {
                match combine {
                    Combine::Concat { group_bits } => {
                        emit_shl64_ri(sink, tmp, (u32::from(i) * group_bits) as u8);
                        emit_alu_rr(sink, AluOp::Or, tmp, acc, true);
                    }
                    Combine::Fold { .. } => {
                        let op = match cond {
                            LaneCond::NoneSatisfy => AluOp::Or,
                            LaneCond::AllSatisfy => AluOp::And,
                        };
                        emit_alu_rr(sink, op, tmp, acc, true);
                    }
                }
            }
        }
        emit_test_and_branch(sink, acc, cond, combine, target);
        return Ok(());
    }

    if tier == Tier::Avx2 {
        // Horizontal MSB extraction per slot, then combine.
        let (group_bits, byte_granular) = match width {
            ElemWidth::D32 | ElemWidth::F32 => (8, false),
            ElemWidth::Q64 | ElemWidth::F64 => (4, false),
            ElemWidth::B8 | ElemWidth::W16 => (32, true),
        };
        let combine = combine_for(group_bits);
        trace!("collapse.{width}: move-mask extraction, {combine:?}");
        for i in 0..WIDE_SLOTS {
            let dst = if i == 0 { acc } else { tmp };
            let slot = pred.home().slot(i);
            if byte_granular {
                emit_vpmovmskb(sink, dst, slot);
            } else {
                emit_movmsk(sink, width.bits() == 64, dst, slot);
            }
            if i > 0 {
                match combine {
                    Combine::Concat { group_bits } => {
                        emit_shl64_ri(sink, tmp, (u32::from(i) * group_bits) as u8);
                        emit_alu_rr(sink, AluOp::Or, tmp, acc, true);
                    }
                    Combine::Fold { .. } => {
                        let op = match cond {
                            LaneCond::NoneSatisfy => AluOp::Or,
                            LaneCond::AllSatisfy => AluOp::And,
                        };
                        emit_alu_rr(sink, op, tmp, acc, true);
                    }
                }
            }
        }
        emit_test_and_branch(sink, acc, cond, combine, target);
        return Ok(());
    }

    // Byte/word predicate below the byte/word extension: the mask vector's
    // 512-bit slots have no direct move-mask form, so slice them through
    // scratch at 256-bit granularity and fold.
    trace!("collapse.{width}: move-mask extraction through scratch");
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[acc, tmp])?;
    let slot_bytes = tier.slot_bytes();
    let groups = (i32::from(WIDE_SLOTS) * slot_bytes / 32) as u8;
    let home = pred.home();
    for i in 0..WIDE_SLOTS {
        let off = Area::Dst.offset() + i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, true, home.slot(i), Amode::imm_reg(off, base));
    }
    let work = home.slot(0);
    let combine = Combine::Fold {
        group_bits: 32,
    };
    for g in 0..groups {
        let dst = if g == 0 { acc } else { tmp };
        emit_ymm_move(
            sink,
            false,
            work,
            Amode::imm_reg(Area::Dst.offset() + i32::from(g) * 32, base),
        );
        emit_vpmovmskb(sink, dst, work);
        if g > 0 {
            let op = match cond {
                LaneCond::NoneSatisfy => AluOp::Or,
                LaneCond::AllSatisfy => AluOp::And,
            };
            emit_alu_rr(sink, op, tmp, acc, true);
        }
    }
    emit_test_and_branch(sink, acc, cond, combine, target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Model the collapse over an 8-lane predicate and check that
    /// none/all/mixed are always distinguished, for every one of the 2^8
    /// patterns, under both combine strategies.
    #[test]
    fn collapse_distinguishes_none_all_mixed() {
        // 8 lanes as 4 groups of 2 bits.
        let group_bits = 2u32;
        for pattern in 0u32..256 {
            let groups: Vec<u32> = (0..4).map(|g| (pattern >> (g * group_bits)) & 0b11).collect();

            // Concat model.
            let mut word = 0u64;
            for (i, g) in groups.iter().enumerate() {
                word |= u64::from(*g) << (i as u32 * group_bits);
            }
            let (none_exp, _) = expected_word(LaneCond::NoneSatisfy, Combine::Concat { group_bits });
            let all_exp = ((1u64 << 8) - 1) as i64;
            assert_eq!(word == none_exp as u64, pattern == 0);
            assert_eq!(word as i64 == all_exp, pattern == 255);

            // Fold model.
            let or_fold = groups.iter().fold(0u32, |a, g| a | g);
            let and_fold = groups.iter().copied().fold(0b11u32, |a, g| a & g);
            assert_eq!(or_fold == 0, pattern == 0);
            assert_eq!(and_fold == 0b11, pattern == 255);
        }
    }

    #[test]
    fn combine_strategy_by_width() {
        // 16 lanes/slot (32-bit lanes at 512) concatenates into 64 bits.
        assert_eq!(combine_for(16), Combine::Concat { group_bits: 16 });
        // 64 lanes/slot (byte lanes at 512) must fold.
        assert_eq!(combine_for(64), Combine::Fold { group_bits: 64 });
        // The all-ones expectations stay within immediate range.
        let (w, wide) = expected_word(LaneCond::AllSatisfy, Combine::Concat { group_bits: 16 });
        assert_eq!(w, -1);
        assert!(wide);
        let (w, wide) = expected_word(LaneCond::AllSatisfy, Combine::Concat { group_bits: 4 });
        assert_eq!(w, 0xFFFF);
        assert!(!wide);
        // A 32-bit all-ones pattern narrows to a 32-bit compare against -1.
        let (w, wide) = expected_word(LaneCond::AllSatisfy, Combine::Concat { group_bits: 8 });
        assert_eq!(w, -1);
        assert!(!wide);
    }
}

//! Predicate and mask unification.
//!
//! One merge-mask semantic -- `dst.lane = P ? S.lane : G.lane` -- lowered two
//! ways depending on the capability tier:
//!
//! - **Native-mask path**: the predicate is computed straight into a mask
//!   register by a compare-with-predicate-code instruction (`vpcmp`,
//!   `vcmpps`), and selection is a masked merge move that leaves
//!   unselected destination lanes untouched by hardware semantics.
//! - **Software-blend path**: the predicate is an all-ones/all-zeros lane
//!   vector built from the {equal, min, max} primitive set, and selection
//!   is `(G ANDN P) OR (S AND P)` -- one extra temporary register and three
//!   extra instructions per operation.
//!
//! Both paths produce bit-identical results for identical inputs; the
//! composition identities are pinned by the lane-model tests below.
//!
//! Byte/word predicates below the byte/word extension tier route the
//! software path through the scratch region at 256-bit granularity, since
//! the full-width registers have no byte/word compare there at all.

use log::trace;

use crate::buffer::CodeBuffer;
use crate::inst::{ElemWidth, FloatCC, IntCC, Signedness, VecOp};
use crate::isa::x64::args::{Amode, RegMem};
use crate::isa::x64::emit::{
    self, emit_slot_cmp_mask, emit_slot_masked_move, emit_slot_move, emit_vex_binary,
    emit_vex_binary_imm, emit_ymm_move,
};
use crate::isa::{EmitState, Tier};
use crate::result::{CodegenError, CodegenResult};
use crate::scratch::Area;
use crate::vector::{Pred, WideVec, WIDE_SLOTS};

/// Whether predicates of this element width live in mask registers at the
/// tier. Float lanes compare natively on both AVX-512 tiers; byte/word
/// integer lanes need the byte/word extension.
pub(crate) fn native_pred(tier: Tier, width: ElemWidth) -> bool {
    match tier {
        Tier::Avx2 => false,
        Tier::Avx512Bw => true,
        Tier::Avx512F => !matches!(width, ElemWidth::B8 | ElemWidth::W16),
    }
}

/// The `vpcmp` predicate code for an integer condition, plus whether the
/// unsigned opcode form is required. Codes are from the AVX-512 integer
/// compare predicate table: EQ=0, LT=1, LE=2, NEQ=4, NLT=5, NLE=6.
fn int_cc_code(cc: IntCC) -> (u8, bool) {
    match cc {
        IntCC::Equal => (0, false),
        IntCC::NotEqual => (4, false),
        IntCC::SignedLessThan => (1, false),
        IntCC::SignedLessThanOrEqual => (2, false),
        IntCC::SignedGreaterThanOrEqual => (5, false),
        IntCC::SignedGreaterThan => (6, false),
        IntCC::UnsignedLessThan => (1, true),
        IntCC::UnsignedLessThanOrEqual => (2, true),
        IntCC::UnsignedGreaterThanOrEqual => (5, true),
        IntCC::UnsignedGreaterThan => (6, true),
    }
}

/// The `vcmpps`/`vcmppd` immediate for a float condition (ordered,
/// signaling forms, matching the classic predicate table).
fn float_cc_code(cc: FloatCC) -> u8 {
    match cc {
        FloatCC::Equal => 0x00,
        FloatCC::LessThan => 0x01,
        FloatCC::LessThanOrEqual => 0x02,
        FloatCC::NotEqual => 0x04,
        FloatCC::GreaterThanOrEqual => 0x0D,
        FloatCC::GreaterThan => 0x0E,
    }
}

fn software_alias_check(
    what: &'static str,
    home: WideVec,
    srcs: &[WideVec],
    tmp: Option<WideVec>,
) -> CodegenResult<()> {
    if srcs.iter().any(|s| *s == home) {
        return Err(CodegenError::RegisterAliasing {
            op: what.to_string(),
            constraint: "the predicate home must not alias a source on the software path",
        });
    }
    if let Some(tmp) = tmp {
        if srcs.iter().any(|s| *s == tmp) || tmp == home {
            return Err(CodegenError::RegisterAliasing {
                op: what.to_string(),
                constraint: "the temporary must be distinct from sources and predicate home",
            });
        }
    }
    Ok(())
}

/// Emit an integer lane compare into a predicate.
pub(crate) fn emit_int_cmp(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    cc: IntCC,
    width: ElemWidth,
    src1: WideVec,
    src2: WideVec,
    pred: Pred,
    tmp: WideVec,
) -> CodegenResult<()> {
    let (code, unsigned) = int_cc_code(cc);
    if native_pred(tier, width) {
        trace!("cmp {cc}.{width}: native mask path");
        let e = emit::evex_cmp_entry(width, unsigned);
        for i in 0..WIDE_SLOTS {
            emit_slot_cmp_mask(
                sink,
                &e,
                pred.kreg(i),
                src1.slot(i),
                RegMem::reg(src2.slot(i)),
                code,
            );
        }
        return Ok(());
    }

    if tier == Tier::Avx2 {
        trace!("cmp {cc}.{width}: software blend path");
        software_alias_check("compare", pred.home(), &[src1, src2], Some(tmp))?;
        for i in 0..WIDE_SLOTS {
            emit_cmp_core_ymm(
                sink,
                cc,
                width,
                pred.home().slot(i),
                src1.slot(i),
                src2.slot(i),
                tmp.slot(i),
            )?;
        }
        return Ok(());
    }

    // Byte/word lanes below the byte/word extension: software compose at
    // 256-bit granularity through scratch. The predicate home's slots are
    // free as working registers; the sources are safe in scratch before
    // any of them is written.
    trace!("cmp {cc}.{width}: software blend path through scratch");
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let slot_bytes = tier.slot_bytes();
    let groups = (i32::from(WIDE_SLOTS) * slot_bytes / 32) as u8;
    for i in 0..WIDE_SLOTS {
        let off = Area::Src0.offset() + i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, true, src1.slot(i), Amode::imm_reg(off, base));
    }
    for i in 0..WIDE_SLOTS {
        let off = Area::Src1.offset() + i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, true, src2.slot(i), Amode::imm_reg(off, base));
    }
    let home = pred.home();
    let (y_a, y_b, y_dst, y_tmp) = (home.slot(0), home.slot(1), home.slot(2), home.slot(3));
    for g in 0..groups {
        let goff = i32::from(g) * 32;
        emit_ymm_move(sink, false, y_a, Amode::imm_reg(Area::Src0.offset() + goff, base));
        emit_ymm_move(sink, false, y_b, Amode::imm_reg(Area::Src1.offset() + goff, base));
        emit_cmp_core_ymm(sink, cc, width, y_dst, y_a, y_b, y_tmp)?;
        emit_ymm_move(sink, true, y_dst, Amode::imm_reg(Area::Dst.offset() + goff, base));
    }
    for i in 0..WIDE_SLOTS {
        let off = Area::Dst.offset() + i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, false, home.slot(i), Amode::imm_reg(off, base));
    }
    Ok(())
}

/// Compose one 256-bit all-ones/all-zeros compare from the {equal, min,
/// max} primitive set. Quadword orderings use the native signed
/// greater-than instead (there is no quadword min/max to compose from);
/// unsigned quadword orderings have no lowering here at all.
fn emit_cmp_core_ymm(
    sink: &mut CodeBuffer,
    cc: IntCC,
    width: ElemWidth,
    y_dst: u8,
    y_a: u8,
    y_b: u8,
    y_tmp: u8,
) -> CodegenResult<()> {
    let eq = emit::vex_cmpeq_entry(width);
    let sign = if cc.is_unsigned() {
        Signedness::Unsigned
    } else {
        Signedness::Signed
    };

    let emit_invert = |sink: &mut CodeBuffer, y: u8, t: u8| {
        // All-ones via eq(t, t), then xor.
        let eq_d = emit::vex_cmpeq_entry(ElemWidth::D32);
        emit_vex_binary(sink, &eq_d, t, t, RegMem::reg(t));
        let xor = emit::vex_binary_entry(VecOp::xor()).unwrap();
        emit_vex_binary(sink, &xor, y, y, RegMem::reg(t));
    };

    match cc {
        IntCC::Equal => {
            emit_vex_binary(sink, &eq, y_dst, y_a, RegMem::reg(y_b));
        }
        IntCC::NotEqual => {
            emit_vex_binary(sink, &eq, y_dst, y_a, RegMem::reg(y_b));
            emit_invert(sink, y_dst, y_tmp);
        }
        _ if width == ElemWidth::Q64 => {
            if cc.is_unsigned() {
                return Err(CodegenError::Unsupported {
                    op: format!("cmp {cc}.{width}"),
                    tier: Tier::Avx2.name(),
                });
            }
            let gt = emit::vex_cmpgt_entry(width);
            let or = emit::vex_binary_entry(VecOp::or()).unwrap();
            match cc {
                IntCC::SignedGreaterThan => {
                    emit_vex_binary(sink, &gt, y_dst, y_a, RegMem::reg(y_b));
                }
                IntCC::SignedLessThan => {
                    emit_vex_binary(sink, &gt, y_dst, y_b, RegMem::reg(y_a));
                }
                IntCC::SignedGreaterThanOrEqual => {
                    emit_vex_binary(sink, &gt, y_dst, y_a, RegMem::reg(y_b));
                    emit_vex_binary(sink, &eq, y_tmp, y_a, RegMem::reg(y_b));
                    emit_vex_binary(sink, &or, y_dst, y_dst, RegMem::reg(y_tmp));
                }
                IntCC::SignedLessThanOrEqual => {
                    emit_vex_binary(sink, &gt, y_dst, y_b, RegMem::reg(y_a));
                    emit_vex_binary(sink, &eq, y_tmp, y_a, RegMem::reg(y_b));
                    emit_vex_binary(sink, &or, y_dst, y_dst, RegMem::reg(y_tmp));
                }
                _ => unreachable!(),
            }
        }
        IntCC::SignedLessThanOrEqual | IntCC::UnsignedLessThanOrEqual => {
            // le(a, b) == eq(min(a, b), a)
            let min = emit::vex_binary_entry(VecOp::min(width, sign)).unwrap();
            emit_vex_binary(sink, &min, y_tmp, y_a, RegMem::reg(y_b));
            emit_vex_binary(sink, &eq, y_dst, y_tmp, RegMem::reg(y_a));
        }
        IntCC::SignedGreaterThanOrEqual | IntCC::UnsignedGreaterThanOrEqual => {
            // ge(a, b) == eq(max(a, b), a)
            let max = emit::vex_binary_entry(VecOp::max(width, sign)).unwrap();
            emit_vex_binary(sink, &max, y_tmp, y_a, RegMem::reg(y_b));
            emit_vex_binary(sink, &eq, y_dst, y_tmp, RegMem::reg(y_a));
        }
        IntCC::SignedLessThan | IntCC::UnsignedLessThan => {
            // lt == not(ge)
            let max = emit::vex_binary_entry(VecOp::max(width, sign)).unwrap();
            emit_vex_binary(sink, &max, y_tmp, y_a, RegMem::reg(y_b));
            emit_vex_binary(sink, &eq, y_dst, y_tmp, RegMem::reg(y_a));
            emit_invert(sink, y_dst, y_tmp);
        }
        IntCC::SignedGreaterThan | IntCC::UnsignedGreaterThan => {
            // gt == not(le)
            let min = emit::vex_binary_entry(VecOp::min(width, sign)).unwrap();
            emit_vex_binary(sink, &min, y_tmp, y_a, RegMem::reg(y_b));
            emit_vex_binary(sink, &eq, y_dst, y_tmp, RegMem::reg(y_a));
            emit_invert(sink, y_dst, y_tmp);
        }
    }
    Ok(())
}

/// Emit a float lane compare into a predicate. Both paths are a single
/// compare-with-predicate-code instruction per slot; only the result home
/// differs.
pub(crate) fn emit_fcmp(
    sink: &mut CodeBuffer,
    tier: Tier,
    cc: FloatCC,
    width: ElemWidth,
    src1: WideVec,
    src2: WideVec,
    pred: Pred,
) -> CodegenResult<()> {
    let code = float_cc_code(cc);
    if tier.has_mask_regs() {
        trace!("fcmp {cc}.{width}: native mask path");
        let e = emit::fcmp_entry(width, true);
        for i in 0..WIDE_SLOTS {
            emit_slot_cmp_mask(
                sink,
                &e,
                pred.kreg(i),
                src1.slot(i),
                RegMem::reg(src2.slot(i)),
                code,
            );
        }
    } else {
        trace!("fcmp {cc}.{width}: software blend path");
        let e = emit::fcmp_entry(width, false);
        for i in 0..WIDE_SLOTS {
            emit_vex_binary_imm(
                sink,
                &e,
                pred.home().slot(i),
                src1.slot(i),
                RegMem::reg(src2.slot(i)),
                code,
            );
        }
    }
    Ok(())
}

/// Emit a merge-mask select: `dst.lane = pred.lane ? src.lane : dst.lane`.
pub(crate) fn emit_select(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    width: ElemWidth,
    pred: Pred,
    src: WideVec,
    dst: WideVec,
    tmp: WideVec,
) -> CodegenResult<()> {
    if native_pred(tier, width) {
        trace!("select.{width}: native masked move");
        for i in 0..WIDE_SLOTS {
            emit_slot_masked_move(sink, width, pred.kreg(i), dst.slot(i), src.slot(i));
        }
        return Ok(());
    }

    let and = emit::vex_binary_entry(VecOp::and()).unwrap();
    let andn = emit::vex_binary_entry(VecOp::andn()).unwrap();
    let or = emit::vex_binary_entry(VecOp::or()).unwrap();

    if tier == Tier::Avx2 {
        trace!("select.{width}: software blend");
        let home = pred.home();
        if tmp == home || tmp == src || tmp == dst {
            return Err(CodegenError::RegisterAliasing {
                op: "select".to_string(),
                constraint: "the blend temporary must be distinct from source, destination and predicate home",
            });
        }
        for i in 0..WIDE_SLOTS {
            // tmp = P & S ; dst = !P & G ; dst |= tmp.
            emit_vex_binary(sink, &and, tmp.slot(i), home.slot(i), RegMem::reg(src.slot(i)));
            emit_vex_binary(sink, &andn, dst.slot(i), home.slot(i), RegMem::reg(dst.slot(i)));
            emit_vex_binary(sink, &or, dst.slot(i), dst.slot(i), RegMem::reg(tmp.slot(i)));
        }
        return Ok(());
    }

    // Byte/word select below the byte/word extension: blend at 256-bit
    // granularity through scratch. After the three spills the destination's
    // low slots are free working registers.
    trace!("select.{width}: software blend through scratch");
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let slot_bytes = tier.slot_bytes();
    let groups = (i32::from(WIDE_SLOTS) * slot_bytes / 32) as u8;
    let home = pred.home();
    for i in 0..WIDE_SLOTS {
        let off = i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, true, src.slot(i), Amode::imm_reg(Area::Src0.offset() + off, base));
        emit_slot_move(sink, tier, true, home.slot(i), Amode::imm_reg(Area::Src1.offset() + off, base));
        emit_slot_move(sink, tier, true, dst.slot(i), Amode::imm_reg(Area::Dst.offset() + off, base));
    }
    let (y_p, y_s) = (dst.slot(0), dst.slot(1));
    for g in 0..groups {
        let goff = i32::from(g) * 32;
        emit_ymm_move(sink, false, y_p, Amode::imm_reg(Area::Src1.offset() + goff, base));
        emit_ymm_move(sink, false, y_s, Amode::imm_reg(Area::Src0.offset() + goff, base));
        // y_s = P & S ; y_p = !P & G (from scratch) ; y_p |= y_s.
        emit_vex_binary(sink, &and, y_s, y_p, RegMem::reg(y_s));
        emit_vex_binary(
            sink,
            &andn,
            y_p,
            y_p,
            RegMem::mem(Amode::imm_reg(Area::Dst.offset() + goff, base)),
        );
        emit_vex_binary(sink, &or, y_p, y_p, RegMem::reg(y_s));
        emit_ymm_move(sink, true, y_p, Amode::imm_reg(Area::Dst.offset() + goff, base));
    }
    for i in 0..WIDE_SLOTS {
        let off = Area::Dst.offset() + i32::from(i) * slot_bytes;
        emit_slot_move(sink, tier, false, dst.slot(i), Amode::imm_reg(off, base));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    //! Lane-model checks for the cross-path correctness property: the
    //! blend formula and the {equal, min, max} compositions must agree
    //! with direct select/compare semantics on every lane, including the
    //! boundary values.

    use super::*;

    fn software_mask(cc: IntCC, a: i32, b: i32) -> u32 {
        // Mirror of the emitted composition, lane-modeled on i32.
        let eq = |x: i32, y: i32| if x == y { u32::MAX } else { 0 };
        let not = |m: u32| !m;
        match cc {
            IntCC::Equal => eq(a, b),
            IntCC::NotEqual => not(eq(a, b)),
            IntCC::SignedLessThanOrEqual => eq(a.min(b), a),
            IntCC::SignedGreaterThanOrEqual => eq(a.max(b), a),
            IntCC::SignedLessThan => not(eq(a.max(b), a)),
            IntCC::SignedGreaterThan => not(eq(a.min(b), a)),
            IntCC::UnsignedLessThanOrEqual => eq(((a as u32).min(b as u32)) as i32, a),
            IntCC::UnsignedGreaterThanOrEqual => eq(((a as u32).max(b as u32)) as i32, a),
            IntCC::UnsignedLessThan => not(eq(((a as u32).max(b as u32)) as i32, a)),
            IntCC::UnsignedGreaterThan => not(eq(((a as u32).min(b as u32)) as i32, a)),
        }
    }

    fn direct_mask(cc: IntCC, a: i32, b: i32) -> u32 {
        let t = match cc {
            IntCC::Equal => a == b,
            IntCC::NotEqual => a != b,
            IntCC::SignedLessThan => a < b,
            IntCC::SignedLessThanOrEqual => a <= b,
            IntCC::SignedGreaterThan => a > b,
            IntCC::SignedGreaterThanOrEqual => a >= b,
            IntCC::UnsignedLessThan => (a as u32) < (b as u32),
            IntCC::UnsignedLessThanOrEqual => (a as u32) <= (b as u32),
            IntCC::UnsignedGreaterThan => (a as u32) > (b as u32),
            IntCC::UnsignedGreaterThanOrEqual => (a as u32) >= (b as u32),
        };
        if t {
            u32::MAX
        } else {
            0
        }
    }

    #[test]
    fn composed_compares_match_direct_semantics() {
        let boundary = [0, 1, -1, 7, -7, i32::MIN, i32::MAX, i32::MIN + 1, 0x7FFF, -0x8000];
        let ccs = [
            IntCC::Equal,
            IntCC::NotEqual,
            IntCC::SignedLessThan,
            IntCC::SignedLessThanOrEqual,
            IntCC::SignedGreaterThan,
            IntCC::SignedGreaterThanOrEqual,
            IntCC::UnsignedLessThan,
            IntCC::UnsignedLessThanOrEqual,
            IntCC::UnsignedGreaterThan,
            IntCC::UnsignedGreaterThanOrEqual,
        ];
        for cc in ccs {
            for &a in &boundary {
                for &b in &boundary {
                    assert_eq!(
                        software_mask(cc, a, b),
                        direct_mask(cc, a, b),
                        "cc={cc} a={a} b={b}"
                    );
                }
            }
        }
    }

    #[test]
    fn blend_formula_matches_select() {
        // (G ANDN P) OR (S AND P) == P ? S : G, lane-wise, for mask lanes
        // that are all-ones or all-zeros.
        let values = [0u32, 1, 0xFFFF_FFFF, 0x8000_0000, 0x1234_5678];
        for &g in &values {
            for &s in &values {
                for &p in &[0u32, u32::MAX] {
                    let blended = (!p & g) | (s & p);
                    let selected = if p == u32::MAX { s } else { g };
                    assert_eq!(blended, selected);
                }
            }
        }
    }

    #[test]
    fn native_pred_gating() {
        assert!(!native_pred(Tier::Avx2, ElemWidth::D32));
        assert!(native_pred(Tier::Avx512F, ElemWidth::D32));
        assert!(native_pred(Tier::Avx512F, ElemWidth::F32));
        assert!(!native_pred(Tier::Avx512F, ElemWidth::W16));
        assert!(native_pred(Tier::Avx512Bw, ElemWidth::W16));
    }
}

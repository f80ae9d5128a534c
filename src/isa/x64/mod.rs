//! x86-64 backend.
//!
//! The backend owns the feature-level dispatch: for every operation
//! descriptor and the build's capability tier, exactly one lowering is
//! chosen -- straight native per-slot encoding, the width-emulation engine's
//! narrow or single-lane decomposition, or a "no matching path" error.
//! Dispatch is a total, static match; nothing branches on capability at run
//! time because a build targets exactly one tier.

use log::trace;

use crate::buffer::CodeBuffer;
use crate::inst::{ElemWidth, Inst, OpFamily, VecMem, VecOp, WideImm};
use crate::isa::{EmitState, TargetIsa, Tier};
use crate::reg::Gpr;
use crate::result::{CodegenError, CodegenResult};
use crate::vector::{WideVec, WIDE_SLOTS};
use target_lexicon::Triple;

pub mod args;
mod branch;
pub mod emit;
pub mod encoding;
mod mask;
pub mod regs;
mod widen;

#[cfg(test)]
mod emit_tests;

use args::RegMem;
use emit::ResolvedWide;
use widen::NarrowSrc;

/// Create an x64 backend. Called through `isa::lookup`.
pub(crate) fn isa_constructor(triple: Triple, tier: Tier) -> Box<dyn TargetIsa> {
    Box::new(X64Backend {
        triple,
        tier,
    })
}

/// An x64 backend.
pub struct X64Backend {
    triple: Triple,
    tier: Tier,
}

/// The lowering strategies an operation can dispatch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lowering {
    /// One native instruction per slot.
    Native,
    /// Width emulation through 256-bit sub-groups.
    Narrow,
    /// Width emulation at single-lane granularity.
    Lanes,
}

/// Dispatch a binary-family descriptor. Total: every combination either
/// yields a strategy or a "no matching path" error.
fn binary_lowering(op: VecOp, tier: Tier) -> CodegenResult<Lowering> {
    let is_var_shift = matches!(
        op.family,
        OpFamily::ShlVar | OpFamily::ShrlVar | OpFamily::ShraVar
    );
    let lowering = match tier {
        Tier::Avx512F | Tier::Avx512Bw => {
            if emit::evex_binary_entry(op).is_some() {
                let native = tier == Tier::Avx512Bw
                    || !matches!(op.width, ElemWidth::B8 | ElemWidth::W16);
                if native {
                    Lowering::Native
                } else if emit::vex_binary_entry(op).is_some() {
                    Lowering::Narrow
                } else if is_var_shift {
                    Lowering::Lanes
                } else {
                    return Err(emit::unsupported(op, tier));
                }
            } else if is_var_shift {
                Lowering::Lanes
            } else {
                return Err(emit::unsupported(op, tier));
            }
        }
        Tier::Avx2 => {
            if emit::vex_binary_entry(op).is_some() {
                Lowering::Native
            } else if is_var_shift {
                Lowering::Lanes
            } else {
                return Err(emit::unsupported(op, tier));
            }
        }
    };
    trace!("dispatch {op} at {tier}: {lowering:?}");
    Ok(lowering)
}

/// Dispatch the unary `Abs` family.
fn unary_lowering(op: VecOp, tier: Tier) -> CodegenResult<Lowering> {
    let lowering = match tier {
        Tier::Avx512Bw => Lowering::Native,
        Tier::Avx512F => {
            if matches!(op.width, ElemWidth::B8 | ElemWidth::W16) {
                Lowering::Narrow
            } else {
                Lowering::Native
            }
        }
        Tier::Avx2 => {
            if emit::vex_unary_entry(op).is_some() {
                Lowering::Native
            } else {
                return Err(emit::unsupported(op, tier));
            }
        }
    };
    trace!("dispatch {op} at {tier}: {lowering:?}");
    Ok(lowering)
}

/// Dispatch the immediate-shift families. Byte lanes have no vector shift
/// anywhere and always decompose to single lanes.
fn shift_imm_lowering(op: VecOp, tier: Tier) -> CodegenResult<Lowering> {
    let lowering = match op.width {
        ElemWidth::B8 => Lowering::Lanes,
        ElemWidth::W16 if tier == Tier::Avx512F => Lowering::Narrow,
        _ => {
            if emit::shift_imm_entry(op, tier.has_mask_regs()).is_some() {
                Lowering::Native
            } else if op.family == OpFamily::ShraImm && op.width == ElemWidth::Q64 {
                // No legacy arithmetic-right quadword form; single lanes.
                Lowering::Lanes
            } else {
                return Err(emit::unsupported(op, tier));
            }
        }
    };
    trace!("dispatch {op} at {tier}: {lowering:?}");
    Ok(lowering)
}

fn check_vecs(vecs: &[WideVec]) -> CodegenResult<()> {
    for v in vecs {
        v.check()?;
    }
    Ok(())
}

fn reject_shapes(op: VecOp, rejected: &[OpFamily], hint: &'static str) -> CodegenResult<()> {
    if rejected.contains(&op.family) {
        return Err(CodegenError::InvalidOperand {
            what: hint,
        });
    }
    Ok(())
}

const SHIFT_IMM_FAMILIES: &[OpFamily] =
    &[OpFamily::ShlImm, OpFamily::ShrlImm, OpFamily::ShraImm];
const SHIFT_VAR_FAMILIES: &[OpFamily] =
    &[OpFamily::ShlVar, OpFamily::ShrlVar, OpFamily::ShraVar];

impl X64Backend {
    fn emit_vec_rrr(
        &self,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
        op: VecOp,
        src1: WideVec,
        src2: &VecMem,
        dst: WideVec,
    ) -> CodegenResult<()> {
        reject_shapes(op, SHIFT_IMM_FAMILIES, "immediate shifts use the shift-imm form")?;
        reject_shapes(op, SHIFT_VAR_FAMILIES, "variable shifts use the shift-var form")?;
        reject_shapes(op, &[OpFamily::Abs], "unary operations use the unary form")?;
        check_vecs(&[src1, dst])?;
        if let VecMem::Vec(v) = src2 {
            v.check()?;
        }

        match binary_lowering(op, self.tier)? {
            Lowering::Native => {
                let e = self.binary_entry(op);
                match src2 {
                    VecMem::Vec(v) => {
                        for i in 0..WIDE_SLOTS {
                            emit::emit_slot_binary(
                                sink,
                                self.tier,
                                &e,
                                dst.slot(i),
                                src1.slot(i),
                                RegMem::reg(v.slot(i)),
                            );
                        }
                    }
                    VecMem::Mem(addr) => {
                        let resolved = emit::resolve_wide_amode(sink, addr, self.tier)?;
                        for i in 0..WIDE_SLOTS {
                            emit::emit_slot_binary(
                                sink,
                                self.tier,
                                &e,
                                dst.slot(i),
                                src1.slot(i),
                                RegMem::mem(resolved.slot_amode(i, self.tier)),
                            );
                        }
                    }
                }
                Ok(())
            }
            Lowering::Narrow => {
                let src2 = self.narrow_src(sink, src2)?;
                widen::emit_binary_emulated(
                    sink,
                    state,
                    self.tier,
                    op,
                    slots_of(src1),
                    src2,
                    dst,
                )
            }
            Lowering::Lanes => unreachable!("variable shifts are rejected above"),
        }
    }

    fn emit_vec_rri(
        &self,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
        op: VecOp,
        src1: WideVec,
        imm: &WideImm,
        dst: WideVec,
    ) -> CodegenResult<()> {
        reject_shapes(op, SHIFT_IMM_FAMILIES, "immediate shifts use the shift-imm form")?;
        reject_shapes(op, SHIFT_VAR_FAMILIES, "variable shifts use the shift-var form")?;
        reject_shapes(op, &[OpFamily::Abs], "unary operations use the unary form")?;
        check_vecs(&[src1, dst, imm.home])?;
        if imm.home == dst || imm.home == src1 {
            return Err(CodegenError::RegisterAliasing {
                op: op.to_string(),
                constraint: "the immediate's broadcast home must not alias an operand",
            });
        }
        emit::scratch_base_check(state.scratch().base(), &[imm.tmp])?;

        // The auxiliary sequence: materialize, then broadcast into slot 0 of
        // the home. It runs immediately before the consuming instruction(s).
        let lowering = binary_lowering(op, self.tier)?;
        let (value, wide_lanes) = emit::replicate_imm(op.width, imm.value);
        emit::emit_mov_ri64(sink, imm.tmp, value);
        emit::emit_broadcast_gpr(sink, self.tier, wide_lanes, imm.tmp, imm.home);

        let splat = imm.home.slot(0);
        match lowering {
            Lowering::Native => {
                let e = self.binary_entry(op);
                for i in 0..WIDE_SLOTS {
                    emit::emit_slot_binary(
                        sink,
                        self.tier,
                        &e,
                        dst.slot(i),
                        src1.slot(i),
                        RegMem::reg(splat),
                    );
                }
                Ok(())
            }
            Lowering::Narrow => widen::emit_binary_emulated(
                sink,
                state,
                self.tier,
                op,
                slots_of(src1),
                NarrowSrc::Slots([splat; WIDE_SLOTS as usize]),
                dst,
            ),
            Lowering::Lanes => unreachable!("variable shifts are rejected above"),
        }
    }

    fn emit_vec_unary(
        &self,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
        op: VecOp,
        src: &VecMem,
        dst: WideVec,
    ) -> CodegenResult<()> {
        if op.family != OpFamily::Abs {
            return Err(CodegenError::InvalidOperand {
                what: "only the abs family is unary",
            });
        }
        dst.check()?;
        if let VecMem::Vec(v) = src {
            v.check()?;
        }
        match unary_lowering(op, self.tier)? {
            Lowering::Native => {
                let e = if self.tier.has_mask_regs() {
                    emit::evex_unary_entry(op)
                } else {
                    emit::vex_unary_entry(op)
                }
                .expect("native dispatch implies a table entry");
                match src {
                    VecMem::Vec(v) => {
                        for i in 0..WIDE_SLOTS {
                            emit::emit_slot_unary(
                                sink,
                                self.tier,
                                &e,
                                dst.slot(i),
                                RegMem::reg(v.slot(i)),
                            );
                        }
                    }
                    VecMem::Mem(addr) => {
                        let resolved = emit::resolve_wide_amode(sink, addr, self.tier)?;
                        for i in 0..WIDE_SLOTS {
                            emit::emit_slot_unary(
                                sink,
                                self.tier,
                                &e,
                                dst.slot(i),
                                RegMem::mem(resolved.slot_amode(i, self.tier)),
                            );
                        }
                    }
                }
                Ok(())
            }
            Lowering::Narrow => {
                let src = self.narrow_src(sink, src)?;
                widen::emit_unary_emulated(sink, state, self.tier, op, src, dst)
            }
            Lowering::Lanes => unreachable!("abs never decomposes to lanes"),
        }
    }

    fn emit_vec_shift_imm(
        &self,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
        op: VecOp,
        src: WideVec,
        amt: u8,
        dst: WideVec,
    ) -> CodegenResult<()> {
        if !SHIFT_IMM_FAMILIES.contains(&op.family) {
            return Err(CodegenError::InvalidOperand {
                what: "not an immediate-shift family",
            });
        }
        check_vecs(&[src, dst])?;
        if u32::from(amt) >= op.width.bits() {
            return Err(CodegenError::InvalidOperand {
                what: "shift amount must be below the lane width",
            });
        }
        match shift_imm_lowering(op, self.tier)? {
            Lowering::Native => {
                let (e, ext) = emit::shift_imm_entry(op, self.tier.has_mask_regs())
                    .expect("native dispatch implies a table entry");
                for i in 0..WIDE_SLOTS {
                    emit::emit_slot_shift_imm(
                        sink,
                        self.tier,
                        &e,
                        ext,
                        dst.slot(i),
                        src.slot(i),
                        amt,
                    );
                }
                Ok(())
            }
            Lowering::Narrow => widen::emit_shift_imm_narrow(
                sink,
                state,
                self.tier,
                op,
                slots_of(src),
                amt,
                dst,
            ),
            Lowering::Lanes => widen::emit_shift_imm_lanes(
                sink,
                state,
                self.tier,
                op,
                slots_of(src),
                amt,
                dst,
            ),
        }
    }

    fn emit_vec_shift_var(
        &self,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
        op: VecOp,
        src: WideVec,
        counts: WideVec,
        dst: WideVec,
        tmp_cnt: Gpr,
    ) -> CodegenResult<()> {
        if !SHIFT_VAR_FAMILIES.contains(&op.family) {
            return Err(CodegenError::InvalidOperand {
                what: "not a variable-shift family",
            });
        }
        check_vecs(&[src, counts, dst])?;
        match binary_lowering(op, self.tier)? {
            Lowering::Native => {
                let e = self.binary_entry(op);
                for i in 0..WIDE_SLOTS {
                    emit::emit_slot_binary(
                        sink,
                        self.tier,
                        &e,
                        dst.slot(i),
                        src.slot(i),
                        RegMem::reg(counts.slot(i)),
                    );
                }
                Ok(())
            }
            Lowering::Narrow => {
                // Word-lane variable shifts have no 256-bit form either;
                // dispatch never selects this.
                unreachable!("variable shifts decompose to lanes, not groups")
            }
            Lowering::Lanes => widen::emit_shift_var_lanes(
                sink,
                state,
                self.tier,
                op,
                slots_of(src),
                slots_of(counts),
                dst,
                tmp_cnt,
            ),
        }
    }

    fn narrow_src(&self, sink: &mut CodeBuffer, src: &VecMem) -> CodegenResult<NarrowSrc> {
        Ok(match src {
            VecMem::Vec(v) => NarrowSrc::Slots(slots_of(*v)),
            VecMem::Mem(addr) => {
                let resolved: ResolvedWide = emit::resolve_wide_amode(sink, addr, self.tier)?;
                NarrowSrc::Mem(resolved)
            }
        })
    }

    fn binary_entry(&self, op: VecOp) -> emit::OpcodeEntry {
        if self.tier.has_mask_regs() {
            emit::evex_binary_entry(op)
        } else {
            emit::vex_binary_entry(op)
        }
        .expect("native dispatch implies a table entry")
    }
}

fn slots_of(v: WideVec) -> [u8; WIDE_SLOTS as usize] {
    [v.slot(0), v.slot(1), v.slot(2), v.slot(3)]
}

impl TargetIsa for X64Backend {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn triple(&self) -> &Triple {
        &self.triple
    }

    fn emit_inst(
        &self,
        inst: &Inst,
        sink: &mut CodeBuffer,
        state: &mut EmitState,
    ) -> CodegenResult<()> {
        match inst {
            Inst::VecRRR {
                op,
                src1,
                src2,
                dst,
            } => self.emit_vec_rrr(sink, state, *op, *src1, src2, *dst),

            Inst::VecRRI {
                op,
                src1,
                imm,
                dst,
            } => self.emit_vec_rri(sink, state, *op, *src1, imm, *dst),

            Inst::VecUnary { op, src, dst } => self.emit_vec_unary(sink, state, *op, src, *dst),

            Inst::VecShiftImm { op, src, amt, dst } => {
                self.emit_vec_shift_imm(sink, state, *op, *src, *amt, *dst)
            }

            Inst::VecShiftVar {
                op,
                src,
                counts,
                dst,
                tmp_cnt,
            } => self.emit_vec_shift_var(sink, state, *op, *src, *counts, *dst, *tmp_cnt),

            Inst::VecLoad { addr, dst } => {
                dst.check()?;
                let resolved = emit::resolve_wide_amode(sink, addr, self.tier)?;
                for i in 0..WIDE_SLOTS {
                    emit::emit_slot_move(
                        sink,
                        self.tier,
                        false,
                        dst.slot(i),
                        resolved.slot_amode(i, self.tier),
                    );
                }
                Ok(())
            }

            Inst::VecStore { src, addr } => {
                src.check()?;
                let resolved = emit::resolve_wide_amode(sink, addr, self.tier)?;
                for i in 0..WIDE_SLOTS {
                    emit::emit_slot_move(
                        sink,
                        self.tier,
                        true,
                        src.slot(i),
                        resolved.slot_amode(i, self.tier),
                    );
                }
                Ok(())
            }

            Inst::VecCmp {
                cc,
                width,
                src1,
                src2,
                pred,
                tmp,
            } => {
                if width.is_float() {
                    return Err(CodegenError::InvalidOperand {
                        what: "float compares use the fcmp form",
                    });
                }
                check_vecs(&[*src1, *src2, *tmp])?;
                pred.check()?;
                mask::emit_int_cmp(
                    sink, state, self.tier, *cc, *width, *src1, *src2, *pred, *tmp,
                )
            }

            Inst::VecFcmp {
                cc,
                width,
                src1,
                src2,
                pred,
                tmp: _,
            } => {
                if !width.is_float() {
                    return Err(CodegenError::InvalidOperand {
                        what: "integer compares use the cmp form",
                    });
                }
                check_vecs(&[*src1, *src2])?;
                pred.check()?;
                mask::emit_fcmp(sink, self.tier, *cc, *width, *src1, *src2, *pred)
            }

            Inst::VecSelect {
                width,
                pred,
                src,
                dst,
                tmp,
            } => {
                check_vecs(&[*src, *dst, *tmp])?;
                pred.check()?;
                mask::emit_select(sink, state, self.tier, *width, *pred, *src, *dst, *tmp)
            }

            Inst::MaskBranch {
                width,
                pred,
                cond,
                acc,
                tmp,
                target,
            } => {
                pred.check()?;
                branch::emit_mask_branch(
                    sink, state, self.tier, *width, *pred, *cond, *acc, *tmp, *target,
                )
            }
        }
    }
}

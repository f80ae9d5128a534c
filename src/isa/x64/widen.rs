//! The width-emulation engine.
//!
//! Operations whose element width the capability tier cannot express
//! natively are lowered here: every vector source is spilled to the scratch
//! region at a fixed slot layout, the operation is applied over sub-groups
//! at the next width the hardware does support (256-bit groups via the
//! AVX2 forms, or single lanes via scalar round-trips for the variable
//! shifts), and the full-width result is reloaded into the destination
//! slots. Sub-groups are independent, so the fixed low-to-high processing
//! order is irrelevant to correctness.
//!
//! Each lowering first materializes an explicit [`WidenStep`] plan and then
//! emits it 1:1; tests pin the plan shapes. The whole lowering holds the
//! scratch guard, so re-entering the engine while a plan is mid-emission is
//! a checked error rather than silent aliasing.

use log::trace;
use smallvec::SmallVec;

use crate::buffer::{ByteSink, CodeBuffer};
use crate::inst::{ElemWidth, OpFamily, VecOp};
use crate::isa::x64::args::{Amode, RegMem};
use crate::isa::x64::emit::{
    self, emit_lane_load, emit_lane_shift_mem_cl, emit_slot_move, emit_vex_binary, emit_ymm_move,
    OpcodeEntry, ResolvedWide,
};
use crate::isa::x64::encoding::vex::{VexInstruction, VexVectorLength};
use crate::isa::x64::regs;
use crate::isa::{EmitState, Tier};
use crate::reg::Gpr;
use crate::result::{CodegenError, CodegenResult};
use crate::scratch::Area;
use crate::vector::{WideVec, WIDE_SLOTS};

/// Width of the narrow domain the engine decomposes into, in bytes.
const GROUP_BYTES: i32 = 32;

/// A narrow-domain source: four slot registers to spill, or a wide memory
/// operand whose sub-groups the narrow ops read in place (no spill
/// needed).
#[derive(Clone, Copy)]
pub(crate) enum NarrowSrc {
    Slots([u8; WIDE_SLOTS as usize]),
    Mem(ResolvedWide),
}

/// One step of an emulation plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WidenStep {
    /// Store one native slot register into `area` at its slot offset.
    Spill { slot: u8, area: Area },
    /// Apply the narrower native operation to one 256-bit sub-group
    /// (includes the group's load from scratch).
    NarrowOp { group: u8 },
    /// Store one processed sub-group back to the result area.
    StoreBack { group: u8 },
    /// Reload one destination slot from the result area.
    Reload { slot: u8 },
    /// Round-trip a single lane through a scalar register (variable-shift
    /// decomposition; the slowest path).
    LaneOp { lane: u32 },
}

pub(crate) type WidenPlan = SmallVec<[WidenStep; 32]>;

/// Number of 256-bit sub-groups covering one wide vector at `tier`.
fn groups(tier: Tier) -> u8 {
    (WIDE_SLOTS as i32 * tier.slot_bytes() / GROUP_BYTES) as u8
}

/// Total lane count of one wide vector at `tier`.
pub(crate) fn lanes(tier: Tier, width: ElemWidth) -> u32 {
    u32::from(WIDE_SLOTS) * tier.slot_bits() / width.bits()
}

/// Plan a narrow-domain lowering: spill each register source into its
/// area, process every sub-group low-to-high, reload the destination.
/// Memory sources are read in place by the narrow ops and contribute no
/// spill steps.
pub(crate) fn plan_narrow(tier: Tier, spill_areas: &[Area]) -> WidenPlan {
    let mut plan = WidenPlan::new();
    for &area in spill_areas {
        for slot in 0..WIDE_SLOTS {
            plan.push(WidenStep::Spill {
                slot,
                area,
            });
        }
    }
    for group in 0..groups(tier) {
        plan.push(WidenStep::NarrowOp {
            group,
        });
        plan.push(WidenStep::StoreBack {
            group,
        });
    }
    for slot in 0..WIDE_SLOTS {
        plan.push(WidenStep::Reload {
            slot,
        });
    }
    plan
}

/// Plan a single-lane scalar lowering: spill the value vector (and counts,
/// if any), touch every lane low-to-high, reload.
pub(crate) fn plan_lanes(tier: Tier, width: ElemWidth, with_counts: bool) -> WidenPlan {
    let mut plan = WidenPlan::new();
    for slot in 0..WIDE_SLOTS {
        plan.push(WidenStep::Spill {
            slot,
            area: Area::Lanes,
        });
    }
    if with_counts {
        for slot in 0..WIDE_SLOTS {
            plan.push(WidenStep::Spill {
                slot,
                area: Area::Src1,
            });
        }
    }
    for lane in 0..lanes(tier, width) {
        plan.push(WidenStep::LaneOp {
            lane,
        });
    }
    for slot in 0..WIDE_SLOTS {
        plan.push(WidenStep::Reload {
            slot,
        });
    }
    plan
}

fn area_slot_amode(base: Gpr, area: Area, slot: u8, tier: Tier) -> Amode {
    Amode::imm_reg(area.offset() + i32::from(slot) * tier.slot_bytes(), base)
}

fn group_amode(base: Gpr, area: Area, group: u8) -> Amode {
    Amode::imm_reg(area.offset() + i32::from(group) * GROUP_BYTES, base)
}

/// Emit an emulated binary operation: `dst = op(src1, src2)` where the
/// tier lacks a native form at the operation's width. `src2` may name the
/// same register four times (broadcast immediates) or a wide memory
/// operand read in place.
pub(crate) fn emit_binary_emulated(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    op: VecOp,
    src1_slots: [u8; WIDE_SLOTS as usize],
    src2: NarrowSrc,
    dst: WideVec,
) -> CodegenResult<()> {
    let narrow = emit::vex_binary_entry(op).ok_or_else(|| emit::unsupported(op, tier))?;
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let plan = match src2 {
        NarrowSrc::Slots(_) => plan_narrow(tier, &[Area::Src0, Area::Src1]),
        NarrowSrc::Mem(_) => plan_narrow(tier, &[Area::Src0]),
    };
    trace!("emulating {op} at {tier}: {} steps", plan.len());

    // The destination's first slot register doubles as the narrow working
    // register; the sources are safe in scratch by the time it is clobbered.
    let work = dst.slot(0);
    for step in &plan {
        match *step {
            WidenStep::Spill { slot, area } => {
                let reg = match (area, src2) {
                    (Area::Src0, _) => src1_slots[slot as usize],
                    (_, NarrowSrc::Slots(slots)) => slots[slot as usize],
                    (_, NarrowSrc::Mem(_)) => unreachable!("memory sources are not spilled"),
                };
                emit_slot_move(sink, tier, true, reg, area_slot_amode(base, area, slot, tier));
            }
            WidenStep::NarrowOp { group } => {
                emit_ymm_move(sink, false, work, group_amode(base, Area::Src0, group));
                let rm = match src2 {
                    NarrowSrc::Slots(_) => RegMem::mem(group_amode(base, Area::Src1, group)),
                    NarrowSrc::Mem(wide) => RegMem::mem(wide.group_amode(group)),
                };
                emit_vex_binary(sink, &narrow, work, work, rm);
            }
            WidenStep::StoreBack { group } => {
                emit_ymm_move(sink, true, work, group_amode(base, Area::Dst, group));
            }
            WidenStep::Reload { slot } => {
                emit_slot_move(
                    sink,
                    tier,
                    false,
                    dst.slot(slot),
                    area_slot_amode(base, Area::Dst, slot, tier),
                );
            }
            WidenStep::LaneOp { .. } => unreachable!("narrow plans have no lane steps"),
        }
    }
    Ok(())
}

/// Emit an emulated unary operation (`Abs` on byte/word lanes below the
/// byte/word extension tier).
pub(crate) fn emit_unary_emulated(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    op: VecOp,
    src: NarrowSrc,
    dst: WideVec,
) -> CodegenResult<()> {
    let narrow = emit::vex_unary_entry(op).ok_or_else(|| emit::unsupported(op, tier))?;
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let plan = match src {
        NarrowSrc::Slots(_) => plan_narrow(tier, &[Area::Src0]),
        NarrowSrc::Mem(_) => plan_narrow(tier, &[]),
    };
    trace!("emulating {op} at {tier}: {} steps", plan.len());

    let work = dst.slot(0);
    for step in &plan {
        match *step {
            WidenStep::Spill { slot, area } => {
                let reg = match src {
                    NarrowSrc::Slots(slots) => slots[slot as usize],
                    NarrowSrc::Mem(_) => unreachable!("memory sources are not spilled"),
                };
                emit_slot_move(sink, tier, true, reg, area_slot_amode(base, area, slot, tier));
            }
            WidenStep::NarrowOp { group } => {
                // The unary forms take a memory source directly.
                let rm = match src {
                    NarrowSrc::Slots(_) => RegMem::mem(group_amode(base, Area::Src0, group)),
                    NarrowSrc::Mem(wide) => RegMem::mem(wide.group_amode(group)),
                };
                VexInstruction::new()
                    .length(VexVectorLength::V256)
                    .prefix(narrow.prefix)
                    .map(narrow.map)
                    .w(narrow.w)
                    .opcode(narrow.opcode)
                    .reg(work)
                    .rm(rm)
                    .encode(sink);
            }
            WidenStep::StoreBack { group } => {
                emit_ymm_move(sink, true, work, group_amode(base, Area::Dst, group));
            }
            WidenStep::Reload { slot } => {
                emit_slot_move(
                    sink,
                    tier,
                    false,
                    dst.slot(slot),
                    area_slot_amode(base, Area::Dst, slot, tier),
                );
            }
            WidenStep::LaneOp { .. } => unreachable!("narrow plans have no lane steps"),
        }
    }
    Ok(())
}

/// Emit an emulated uniform-immediate shift through the narrow domain
/// (word lanes below the byte/word extension tier).
pub(crate) fn emit_shift_imm_narrow(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    op: VecOp,
    src_slots: [u8; WIDE_SLOTS as usize],
    amt: u8,
    dst: WideVec,
) -> CodegenResult<()> {
    let (narrow, ext) = emit::shift_imm_entry(op, false).ok_or_else(|| emit::unsupported(op, tier))?;
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let plan = plan_narrow(tier, &[Area::Src0]);
    trace!("emulating {op} at {tier}: {} steps", plan.len());

    let work = dst.slot(0);
    for step in &plan {
        match *step {
            WidenStep::Spill { slot, area } => {
                emit_slot_move(
                    sink,
                    tier,
                    true,
                    src_slots[slot as usize],
                    area_slot_amode(base, area, slot, tier),
                );
            }
            WidenStep::NarrowOp { group } => {
                emit_ymm_move(sink, false, work, group_amode(base, Area::Src0, group));
                emit_vex_shift_imm(sink, &narrow, ext, work, work, amt);
            }
            WidenStep::StoreBack { group } => {
                emit_ymm_move(sink, true, work, group_amode(base, Area::Dst, group));
            }
            WidenStep::Reload { slot } => {
                emit_slot_move(
                    sink,
                    tier,
                    false,
                    dst.slot(slot),
                    area_slot_amode(base, Area::Dst, slot, tier),
                );
            }
            WidenStep::LaneOp { .. } => unreachable!("narrow plans have no lane steps"),
        }
    }
    Ok(())
}

fn emit_vex_shift_imm(
    sink: &mut CodeBuffer,
    e: &OpcodeEntry,
    ext: u8,
    dst: u8,
    src: u8,
    amt: u8,
) {
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(e.prefix)
        .map(e.map)
        .w(e.w)
        .opcode(e.opcode)
        .opcode_ext(ext)
        .vvvv(dst)
        .rm(RegMem::reg(src))
        .imm(amt)
        .encode(sink);
}

/// Emit a uniform-immediate shift on byte lanes: no vector form exists at
/// any tier, so every lane shifts in place in scratch memory with an
/// immediate count. No count register is needed.
pub(crate) fn emit_shift_imm_lanes(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    op: VecOp,
    src_slots: [u8; WIDE_SLOTS as usize],
    amt: u8,
    dst: WideVec,
) -> CodegenResult<()> {
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[])?;
    let plan = plan_lanes(tier, op.width, false);
    trace!(
        "emulating {op} at {tier} at single-lane granularity: {} steps (slow path)",
        plan.len()
    );

    let lane_bytes = op.width.bytes() as i32;
    for step in &plan {
        match *step {
            WidenStep::Spill { slot, area } => {
                emit_slot_move(
                    sink,
                    tier,
                    true,
                    src_slots[slot as usize],
                    area_slot_amode(base, area, slot, tier),
                );
            }
            WidenStep::LaneOp { lane } => {
                let addr = Amode::imm_reg(Area::Lanes.offset() + lane as i32 * lane_bytes, base);
                emit_lane_shift_mem_imm(sink, op.family, op.width, &addr, amt);
            }
            WidenStep::Reload { slot } => {
                emit_slot_move(
                    sink,
                    tier,
                    false,
                    dst.slot(slot),
                    area_slot_amode(base, Area::Lanes, slot, tier),
                );
            }
            _ => unreachable!("lane plans have no narrow steps"),
        }
    }
    Ok(())
}

fn emit_lane_shift_mem_imm(
    sink: &mut CodeBuffer,
    family: OpFamily,
    width: ElemWidth,
    addr: &Amode,
    amt: u8,
) {
    // C0/C1 /ext ib, with the same extensions as the cl forms.
    let ext = match family {
        OpFamily::ShlImm => 4,
        OpFamily::ShrlImm => 5,
        OpFamily::ShraImm => 7,
        _ => unreachable!("not an immediate shift"),
    };
    use crate::isa::x64::encoding::rex;
    if width == ElemWidth::W16 {
        sink.put1(0x66);
    }
    rex::emit_rex(sink, width == ElemWidth::Q64, 0, 0, addr_base_ext(addr));
    sink.put1(if width == ElemWidth::B8 { 0xC0 } else { 0xC1 });
    rex::emit_modrm_sib_disp(sink, ext, addr, None);
    sink.put1(amt);
}

fn addr_base_ext(addr: &Amode) -> u8 {
    match addr {
        Amode::ImmReg { base, .. } => base.enc() >> 3,
        Amode::ImmRegRegShift { base, .. } => base.enc() >> 3,
    }
}

/// Emit a per-lane variable shift with no native form: the value vector
/// and the count vector both spill, then every lane round-trips through
/// `cl`. This is the slowest path the engine has and the reason variable
/// shifts on narrow lanes show up hot in profiles of emulated tiers.
pub(crate) fn emit_shift_var_lanes(
    sink: &mut CodeBuffer,
    state: &EmitState,
    tier: Tier,
    op: VecOp,
    src_slots: [u8; WIDE_SLOTS as usize],
    count_slots: [u8; WIDE_SLOTS as usize],
    dst: WideVec,
    tmp_cnt: Gpr,
) -> CodegenResult<()> {
    if tmp_cnt != regs::rcx() {
        return Err(CodegenError::RegisterAliasing {
            op: op.to_string(),
            constraint: "the variable-shift count temporary must be rcx",
        });
    }
    let _guard = state.scratch().acquire()?;
    let base = state.scratch().base();
    emit::scratch_base_check(base, &[tmp_cnt])?;
    let plan = plan_lanes(tier, op.width, true);
    trace!(
        "emulating {op} at {tier} at single-lane granularity: {} steps (slow path)",
        plan.len()
    );

    let lane_bytes = op.width.bytes() as i32;
    for step in &plan {
        match *step {
            WidenStep::Spill { slot, area } => {
                let reg = match area {
                    Area::Lanes => src_slots[slot as usize],
                    _ => count_slots[slot as usize],
                };
                emit_slot_move(sink, tier, true, reg, area_slot_amode(base, area, slot, tier));
            }
            WidenStep::LaneOp { lane } => {
                let count = Amode::imm_reg(Area::Src1.offset() + lane as i32 * lane_bytes, base);
                let value = Amode::imm_reg(Area::Lanes.offset() + lane as i32 * lane_bytes, base);
                emit_lane_load(sink, op.width, tmp_cnt, &count);
                emit_lane_shift_mem_cl(sink, op.family, op.width, &value);
            }
            WidenStep::Reload { slot } => {
                emit_slot_move(
                    sink,
                    tier,
                    false,
                    dst.slot(slot),
                    area_slot_amode(base, Area::Lanes, slot, tier),
                );
            }
            _ => unreachable!("lane plans have no narrow steps"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_plan_shape() {
        // A 16-bit saturating add over the full wide width at the base
        // AVX-512 tier. Two sources spill (4 slots each), 8 sub-groups
        // process low-to-high, 4 slots reload.
        let plan = plan_narrow(Tier::Avx512F, &[Area::Src0, Area::Src1]);
        let spills = plan
            .iter()
            .filter(|s| matches!(s, WidenStep::Spill { .. }))
            .count();
        let narrows: Vec<u8> = plan
            .iter()
            .filter_map(|s| match s {
                WidenStep::NarrowOp { group } => Some(*group),
                _ => None,
            })
            .collect();
        let store_backs = plan
            .iter()
            .filter(|s| matches!(s, WidenStep::StoreBack { .. }))
            .count();
        let reloads = plan
            .iter()
            .filter(|s| matches!(s, WidenStep::Reload { .. }))
            .count();
        assert_eq!(spills, 8);
        assert_eq!(narrows, (0..8).collect::<Vec<u8>>());
        assert_eq!(store_backs, 8);
        assert_eq!(reloads, 4);
        // Every spill precedes every narrow op; every narrow op precedes
        // the reloads.
        let first_narrow = plan
            .iter()
            .position(|s| matches!(s, WidenStep::NarrowOp { .. }))
            .unwrap();
        assert!(plan[..first_narrow]
            .iter()
            .all(|s| matches!(s, WidenStep::Spill { .. })));
        let first_reload = plan
            .iter()
            .position(|s| matches!(s, WidenStep::Reload { .. }))
            .unwrap();
        assert!(plan[first_reload..]
            .iter()
            .all(|s| matches!(s, WidenStep::Reload { .. })));
    }

    #[test]
    fn saturating_lane_semantics() {
        // Both the native and the narrow lowering of the saturating add
        // resolve to the same hardware operation; pin the lane contract it
        // implements, including the overflow clamps.
        let signed = |a: i16, b: i16| {
            (i32::from(a) + i32::from(b)).clamp(-0x8000, 0x7FFF) as i16
        };
        let cases: [(i16, i16); 7] = [
            (0, 0),
            (1, -1),
            (0x7FFF, 1),
            (0x7FFF, 0x7FFF),
            (-0x8000, -1),
            (-0x8000, -0x8000),
            (1234, -4321),
        ];
        for (a, b) in cases {
            assert_eq!(signed(a, b), a.saturating_add(b));
        }
        let unsigned = |a: u16, b: u16| (u32::from(a) + u32::from(b)).min(0xFFFF) as u16;
        for (a, b) in [(0u16, 0u16), (0xFFFF, 1), (0x8000, 0x8000), (12, 34)] {
            assert_eq!(unsigned(a, b), a.saturating_add(b));
        }
    }

    #[test]
    fn lane_plan_decomposes_fully() {
        // 16-bit variable shift at the base tier: 128 lanes, each its own
        // scalar round-trip.
        let plan = plan_lanes(Tier::Avx512F, ElemWidth::W16, true);
        let lane_ops = plan
            .iter()
            .filter(|s| matches!(s, WidenStep::LaneOp { .. }))
            .count();
        assert_eq!(lane_ops, 128);
        assert_eq!(lanes(Tier::Avx2, ElemWidth::W16), 64);
        assert_eq!(lanes(Tier::Avx512Bw, ElemWidth::B8), 256);
    }
}

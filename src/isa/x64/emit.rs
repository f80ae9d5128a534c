//! Opcode tables and slot-level emission.
//!
//! Every native vector instruction this backend emits is described by an
//! [`OpcodeEntry`]: the packed legacy prefix, the opcode map, the primary
//! opcode byte and the W bit. The same entry drives both the VEX (256-bit
//! slot) and EVEX (512-bit slot) encodings, selected by the capability
//! tier. Entries are looked up per operation descriptor; a `None` lookup at
//! the selected tier routes the operation to the width-emulation engine or
//! reports the "no matching path" error, decided by the dispatch table in
//! `super`.
//!
//! The scalar helpers at the bottom cover the handful of REX-format
//! instructions the emulation and collapse paths need (constant
//! materialization, ALU on GPRs, scalar shifts, compares, branches).

use crate::buffer::{ByteSink, CodeBuffer, Label, LabelUse};
use crate::inst::{ElemWidth, OpFamily, Signedness, VecOp, WideAmode};
use crate::isa::x64::args::{Amode, RegMem};
use crate::isa::x64::encoding::evex::{EvexInstruction, EvexMasking, EvexVectorLength, TupleType};
use crate::isa::x64::encoding::rex::{self, LegacyPrefixes, OpcodeMap};
use crate::isa::x64::encoding::vex::{VexInstruction, VexVectorLength};
use crate::isa::x64::regs;
use crate::isa::Tier;
use crate::reg::Gpr;
use crate::result::{CodegenError, CodegenResult};
use crate::vector::{WideVec, WIDE_SLOTS};

/// One opcode-table entry: prefix bytes, opcode map, primary opcode byte
/// and W bit. The field layout (which operand rides in reg/vvvv/rm) is a
/// property of the emission helper consuming the entry.
#[derive(Clone, Copy)]
pub(crate) struct OpcodeEntry {
    pub prefix: LegacyPrefixes,
    pub map: OpcodeMap,
    pub opcode: u8,
    pub w: bool,
}

const fn entry(prefix: LegacyPrefixes, map: OpcodeMap, opcode: u8, w: bool) -> OpcodeEntry {
    OpcodeEntry {
        prefix,
        map,
        opcode,
        w,
    }
}

use LegacyPrefixes::{None as PfxNone, _66, _F2, _F3};
use OpcodeMap::{_0F, _0F38, _0F3A};

/// EVEX entry for a binary (dst, src1, src2) operation, independent of
/// tier gating.
pub(crate) fn evex_binary_entry(op: VecOp) -> Option<OpcodeEntry> {
    use ElemWidth::*;
    use OpFamily::*;
    use Signedness::*;
    let e = match (op.family, op.width, op.sign) {
        (Add, B8, _) => entry(_66, _0F, 0xFC, false),
        (Add, W16, _) => entry(_66, _0F, 0xFD, false),
        (Add, D32, _) => entry(_66, _0F, 0xFE, false),
        (Add, Q64, _) => entry(_66, _0F, 0xD4, true),
        (Sub, B8, _) => entry(_66, _0F, 0xF8, false),
        (Sub, W16, _) => entry(_66, _0F, 0xF9, false),
        (Sub, D32, _) => entry(_66, _0F, 0xFA, false),
        (Sub, Q64, _) => entry(_66, _0F, 0xFB, true),
        (AddSat, B8, Signed) => entry(_66, _0F, 0xEC, false),
        (AddSat, B8, Unsigned) => entry(_66, _0F, 0xDC, false),
        (AddSat, W16, Signed) => entry(_66, _0F, 0xED, false),
        (AddSat, W16, Unsigned) => entry(_66, _0F, 0xDD, false),
        (SubSat, B8, Signed) => entry(_66, _0F, 0xE8, false),
        (SubSat, B8, Unsigned) => entry(_66, _0F, 0xD8, false),
        (SubSat, W16, Signed) => entry(_66, _0F, 0xE9, false),
        (SubSat, W16, Unsigned) => entry(_66, _0F, 0xD9, false),
        (Min, B8, Signed) => entry(_66, _0F38, 0x38, false),
        (Min, B8, Unsigned) => entry(_66, _0F, 0xDA, false),
        (Min, W16, Signed) => entry(_66, _0F, 0xEA, false),
        (Min, W16, Unsigned) => entry(_66, _0F38, 0x3A, false),
        (Min, D32, Signed) => entry(_66, _0F38, 0x39, false),
        (Min, D32, Unsigned) => entry(_66, _0F38, 0x3B, false),
        (Min, Q64, Signed) => entry(_66, _0F38, 0x39, true),
        (Min, Q64, Unsigned) => entry(_66, _0F38, 0x3B, true),
        (Max, B8, Signed) => entry(_66, _0F38, 0x3C, false),
        (Max, B8, Unsigned) => entry(_66, _0F, 0xDE, false),
        (Max, W16, Signed) => entry(_66, _0F, 0xEE, false),
        (Max, W16, Unsigned) => entry(_66, _0F38, 0x3E, false),
        (Max, D32, Signed) => entry(_66, _0F38, 0x3D, false),
        (Max, D32, Unsigned) => entry(_66, _0F38, 0x3F, false),
        (Max, Q64, Signed) => entry(_66, _0F38, 0x3D, true),
        (Max, Q64, Unsigned) => entry(_66, _0F38, 0x3F, true),
        (MulLo, W16, _) => entry(_66, _0F, 0xD5, false),
        (MulLo, D32, _) => entry(_66, _0F38, 0x40, false),
        (And, _, _) => entry(_66, _0F, 0xDB, false),
        (AndNot, _, _) => entry(_66, _0F, 0xDF, false),
        (Or, _, _) => entry(_66, _0F, 0xEB, false),
        (Xor, _, _) => entry(_66, _0F, 0xEF, false),
        (ShlVar, W16, _) => entry(_66, _0F38, 0x12, true),
        (ShlVar, D32, _) => entry(_66, _0F38, 0x47, false),
        (ShlVar, Q64, _) => entry(_66, _0F38, 0x47, true),
        (ShrlVar, W16, _) => entry(_66, _0F38, 0x10, true),
        (ShrlVar, D32, _) => entry(_66, _0F38, 0x45, false),
        (ShrlVar, Q64, _) => entry(_66, _0F38, 0x45, true),
        (ShraVar, W16, _) => entry(_66, _0F38, 0x11, true),
        (ShraVar, D32, _) => entry(_66, _0F38, 0x46, false),
        (ShraVar, Q64, _) => entry(_66, _0F38, 0x46, true),
        (FAdd, F32, _) => entry(PfxNone, _0F, 0x58, false),
        (FAdd, F64, _) => entry(_66, _0F, 0x58, true),
        (FSub, F32, _) => entry(PfxNone, _0F, 0x5C, false),
        (FSub, F64, _) => entry(_66, _0F, 0x5C, true),
        (FMul, F32, _) => entry(PfxNone, _0F, 0x59, false),
        (FMul, F64, _) => entry(_66, _0F, 0x59, true),
        (FMin, F32, _) => entry(PfxNone, _0F, 0x5D, false),
        (FMin, F64, _) => entry(_66, _0F, 0x5D, true),
        (FMax, F32, _) => entry(PfxNone, _0F, 0x5F, false),
        (FMax, F64, _) => entry(_66, _0F, 0x5F, true),
        _ => return None,
    };
    Some(e)
}

/// VEX (256-bit) entry for a binary operation; `None` when AVX2 has no such
/// form.
pub(crate) fn vex_binary_entry(op: VecOp) -> Option<OpcodeEntry> {
    use ElemWidth::*;
    use OpFamily::*;
    use Signedness::*;
    let e = match (op.family, op.width, op.sign) {
        (Add, B8, _) => entry(_66, _0F, 0xFC, false),
        (Add, W16, _) => entry(_66, _0F, 0xFD, false),
        (Add, D32, _) => entry(_66, _0F, 0xFE, false),
        (Add, Q64, _) => entry(_66, _0F, 0xD4, false),
        (Sub, B8, _) => entry(_66, _0F, 0xF8, false),
        (Sub, W16, _) => entry(_66, _0F, 0xF9, false),
        (Sub, D32, _) => entry(_66, _0F, 0xFA, false),
        (Sub, Q64, _) => entry(_66, _0F, 0xFB, false),
        (AddSat, B8, Signed) => entry(_66, _0F, 0xEC, false),
        (AddSat, B8, Unsigned) => entry(_66, _0F, 0xDC, false),
        (AddSat, W16, Signed) => entry(_66, _0F, 0xED, false),
        (AddSat, W16, Unsigned) => entry(_66, _0F, 0xDD, false),
        (SubSat, B8, Signed) => entry(_66, _0F, 0xE8, false),
        (SubSat, B8, Unsigned) => entry(_66, _0F, 0xD8, false),
        (SubSat, W16, Signed) => entry(_66, _0F, 0xE9, false),
        (SubSat, W16, Unsigned) => entry(_66, _0F, 0xD9, false),
        (Min, B8, Signed) => entry(_66, _0F38, 0x38, false),
        (Min, B8, Unsigned) => entry(_66, _0F, 0xDA, false),
        (Min, W16, Signed) => entry(_66, _0F, 0xEA, false),
        (Min, W16, Unsigned) => entry(_66, _0F38, 0x3A, false),
        (Min, D32, Signed) => entry(_66, _0F38, 0x39, false),
        (Min, D32, Unsigned) => entry(_66, _0F38, 0x3B, false),
        (Max, B8, Signed) => entry(_66, _0F38, 0x3C, false),
        (Max, B8, Unsigned) => entry(_66, _0F, 0xDE, false),
        (Max, W16, Signed) => entry(_66, _0F, 0xEE, false),
        (Max, W16, Unsigned) => entry(_66, _0F38, 0x3E, false),
        (Max, D32, Signed) => entry(_66, _0F38, 0x3D, false),
        (Max, D32, Unsigned) => entry(_66, _0F38, 0x3F, false),
        (MulLo, W16, _) => entry(_66, _0F, 0xD5, false),
        (MulLo, D32, _) => entry(_66, _0F38, 0x40, false),
        (And, _, _) => entry(_66, _0F, 0xDB, false),
        (AndNot, _, _) => entry(_66, _0F, 0xDF, false),
        (Or, _, _) => entry(_66, _0F, 0xEB, false),
        (Xor, _, _) => entry(_66, _0F, 0xEF, false),
        (ShlVar, D32, _) => entry(_66, _0F38, 0x47, false),
        (ShlVar, Q64, _) => entry(_66, _0F38, 0x47, true),
        (ShrlVar, D32, _) => entry(_66, _0F38, 0x45, false),
        (ShrlVar, Q64, _) => entry(_66, _0F38, 0x45, true),
        (ShraVar, D32, _) => entry(_66, _0F38, 0x46, false),
        (FAdd, F32, _) => entry(PfxNone, _0F, 0x58, false),
        (FAdd, F64, _) => entry(_66, _0F, 0x58, false),
        (FSub, F32, _) => entry(PfxNone, _0F, 0x5C, false),
        (FSub, F64, _) => entry(_66, _0F, 0x5C, false),
        (FMul, F32, _) => entry(PfxNone, _0F, 0x59, false),
        (FMul, F64, _) => entry(_66, _0F, 0x59, false),
        (FMin, F32, _) => entry(PfxNone, _0F, 0x5D, false),
        (FMin, F64, _) => entry(_66, _0F, 0x5D, false),
        (FMax, F32, _) => entry(PfxNone, _0F, 0x5F, false),
        (FMax, F64, _) => entry(_66, _0F, 0x5F, false),
        _ => return None,
    };
    Some(e)
}

/// EVEX entry for the unary `Abs` family.
pub(crate) fn evex_unary_entry(op: VecOp) -> Option<OpcodeEntry> {
    use ElemWidth::*;
    let e = match (op.family, op.width) {
        (OpFamily::Abs, B8) => entry(_66, _0F38, 0x1C, false),
        (OpFamily::Abs, W16) => entry(_66, _0F38, 0x1D, false),
        (OpFamily::Abs, D32) => entry(_66, _0F38, 0x1E, false),
        (OpFamily::Abs, Q64) => entry(_66, _0F38, 0x1F, true),
        _ => return None,
    };
    Some(e)
}

/// VEX entry for the unary `Abs` family; AVX2 has no 64-bit form.
pub(crate) fn vex_unary_entry(op: VecOp) -> Option<OpcodeEntry> {
    use ElemWidth::*;
    let e = match (op.family, op.width) {
        (OpFamily::Abs, B8) => entry(_66, _0F38, 0x1C, false),
        (OpFamily::Abs, W16) => entry(_66, _0F38, 0x1D, false),
        (OpFamily::Abs, D32) => entry(_66, _0F38, 0x1E, false),
        _ => return None,
    };
    Some(e)
}

/// Immediate-shift entry: the opcode group byte plus the `/n` opcode
/// extension. There is no byte-lane form anywhere, and the
/// arithmetic-right quadword form is EVEX-only.
pub(crate) fn shift_imm_entry(op: VecOp, evex: bool) -> Option<(OpcodeEntry, u8)> {
    use ElemWidth::*;
    use OpFamily::*;
    let ext = match op.family {
        ShlImm => 6,
        ShrlImm => 2,
        ShraImm => 4,
        _ => return None,
    };
    let e = match (op.family, op.width) {
        (_, W16) => entry(_66, _0F, 0x71, false),
        (_, D32) => entry(_66, _0F, 0x72, false),
        // vpsraq has no legacy form: it lives at 72 /4 with W1, EVEX only.
        (ShraImm, Q64) => {
            if !evex {
                return None;
            }
            entry(_66, _0F, 0x72, true)
        }
        (_, Q64) => entry(_66, _0F, 0x73, evex),
        _ => return None,
    };
    Some((e, ext))
}

/// Unaligned whole-register vector moves, keyed only by direction; all lane
/// widths move identically (`vmovdqu32` under EVEX, `vmovdqu` under VEX).
/// The masked merge moves used by the select path get their own entries
/// below.
pub(crate) fn move_entry(store: bool) -> OpcodeEntry {
    let opcode = if store { 0x7F } else { 0x6F };
    entry(_F3, _0F, opcode, false)
}

/// Masked merge-move entry for the native select path, keyed by lane width.
pub(crate) fn masked_move_entry(width: ElemWidth) -> OpcodeEntry {
    match width {
        ElemWidth::B8 => entry(_F2, _0F, 0x6F, false),
        ElemWidth::W16 => entry(_F2, _0F, 0x6F, true),
        ElemWidth::D32 | ElemWidth::F32 => entry(_F3, _0F, 0x6F, false),
        ElemWidth::Q64 | ElemWidth::F64 => entry(_F3, _0F, 0x6F, true),
    }
}

/// Compare-into-mask entry (`vpcmp`/`vpcmpu`), keyed by width and
/// signedness.
pub(crate) fn evex_cmp_entry(width: ElemWidth, unsigned: bool) -> OpcodeEntry {
    let (opcode, w) = match (width, unsigned) {
        (ElemWidth::B8, false) => (0x3F, false),
        (ElemWidth::B8, true) => (0x3E, false),
        (ElemWidth::W16, false) => (0x3F, true),
        (ElemWidth::W16, true) => (0x3E, true),
        (ElemWidth::D32, false) => (0x1F, false),
        (ElemWidth::D32, true) => (0x1E, false),
        (ElemWidth::Q64, false) => (0x1F, true),
        (ElemWidth::Q64, true) => (0x1E, true),
        (ElemWidth::F32 | ElemWidth::F64, _) => unreachable!("float compares use vcmpps/vcmppd"),
    };
    entry(_66, _0F3A, opcode, w)
}

/// `vcmpps`/`vcmppd` entry (compare with predicate code); the EVEX form
/// writes a mask register, the VEX form an all-ones/all-zeros vector.
pub(crate) fn fcmp_entry(width: ElemWidth, evex: bool) -> OpcodeEntry {
    match width {
        ElemWidth::F32 => entry(PfxNone, _0F, 0xC2, false),
        ElemWidth::F64 => entry(_66, _0F, 0xC2, evex),
        _ => unreachable!("integer compares use vpcmp"),
    }
}

/// All-ones/all-zeros vector compare entries for the software predicate
/// path (`vpcmpeq*`, `vpcmpgt*`).
pub(crate) fn vex_cmpeq_entry(width: ElemWidth) -> OpcodeEntry {
    match width {
        ElemWidth::B8 => entry(_66, _0F, 0x74, false),
        ElemWidth::W16 => entry(_66, _0F, 0x75, false),
        ElemWidth::D32 => entry(_66, _0F, 0x76, false),
        ElemWidth::Q64 => entry(_66, _0F38, 0x29, false),
        _ => unreachable!(),
    }
}

pub(crate) fn vex_cmpgt_entry(width: ElemWidth) -> OpcodeEntry {
    match width {
        ElemWidth::B8 => entry(_66, _0F, 0x64, false),
        ElemWidth::W16 => entry(_66, _0F, 0x65, false),
        ElemWidth::D32 => entry(_66, _0F, 0x66, false),
        ElemWidth::Q64 => entry(_66, _0F38, 0x37, false),
        _ => unreachable!(),
    }
}

//=============================================================================
// Wide-operand resolution

/// A wide memory operand with its displacement narrowed to the
/// single-instruction range, after any auxiliary materialization fragment
/// has been emitted.
#[derive(Clone, Copy)]
pub(crate) struct ResolvedWide {
    base: Gpr,
    index: Option<(Gpr, u8)>,
    disp: i32,
}

impl ResolvedWide {
    /// The amode of slot `i`.
    pub(crate) fn slot_amode(&self, slot: u8, tier: Tier) -> Amode {
        self.at(i32::from(slot) * tier.slot_bytes())
    }

    /// The amode of 256-bit sub-group `group` (the width-emulation engine's
    /// narrow domain).
    pub(crate) fn group_amode(&self, group: u8) -> Amode {
        self.at(i32::from(group) * 32)
    }

    fn at(&self, offset: i32) -> Amode {
        let disp = self.disp + offset;
        match self.index {
            None => Amode::imm_reg(disp, self.base),
            Some((index, shift)) => Amode::imm_reg_reg_shift(disp, self.base, index, shift),
        }
    }
}

/// Resolve a [`WideAmode`]: when the logical displacement (including the
/// last slot's offset) exceeds the 32-bit field, emit the auxiliary
/// address-computation fragment into the operand's `far_tmp` and rebase on
/// it.
pub(crate) fn resolve_wide_amode(
    sink: &mut CodeBuffer,
    addr: &WideAmode,
    tier: Tier,
) -> CodegenResult<ResolvedWide> {
    let last = addr.disp + i64::from((WIDE_SLOTS as i32 - 1) * tier.slot_bytes());
    if i32::try_from(addr.disp).is_ok() && i32::try_from(last).is_ok() {
        return Ok(ResolvedWide {
            base: addr.base,
            index: addr.index,
            disp: addr.disp as i32,
        });
    }
    let tmp = addr.far_tmp.ok_or(CodegenError::InvalidOperand {
        what: "wide-vector displacement out of 32-bit range without a far_tmp register",
    })?;
    if tmp == addr.base || addr.index.map(|(r, _)| r) == Some(tmp) {
        return Err(CodegenError::RegisterAliasing {
            op: "wide memory operand".to_string(),
            constraint: "far_tmp must not alias the base or index register",
        });
    }
    // mov tmp, disp ; add tmp, base -- the slots then rebase on tmp.
    emit_mov_ri64(sink, tmp, addr.disp);
    emit_alu_rr(sink, AluOp::Add, addr.base, tmp, true);
    Ok(ResolvedWide {
        base: tmp,
        index: addr.index,
        disp: 0,
    })
}

//=============================================================================
// Slot-level vector emission

/// Emit one binary slot operation: `dst = op(src1, rm)` in the tier's
/// native width.
pub(crate) fn emit_slot_binary(
    sink: &mut CodeBuffer,
    tier: Tier,
    e: &OpcodeEntry,
    dst: u8,
    src1: u8,
    rm: RegMem,
) {
    if tier.has_mask_regs() {
        EvexInstruction::new()
            .length(EvexVectorLength::V512)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(dst)
            .vvvvv(src1)
            .rm(rm)
            .tuple_type(TupleType::FullMem)
            .encode(sink);
    } else {
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(dst)
            .vvvv(src1)
            .rm(rm)
            .encode(sink);
    }
}

/// Emit one unary slot operation: `dst = op(rm)`.
pub(crate) fn emit_slot_unary(
    sink: &mut CodeBuffer,
    tier: Tier,
    e: &OpcodeEntry,
    dst: u8,
    rm: RegMem,
) {
    if tier.has_mask_regs() {
        EvexInstruction::new()
            .length(EvexVectorLength::V512)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(dst)
            .rm(rm)
            .tuple_type(TupleType::FullMem)
            .encode(sink);
    } else {
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(dst)
            .rm(rm)
            .encode(sink);
    }
}

/// Emit one immediate-shift slot operation. These use the NDD arrangement:
/// the destination rides in vvvv, the source in rm, and the opcode
/// extension in the reg field.
pub(crate) fn emit_slot_shift_imm(
    sink: &mut CodeBuffer,
    tier: Tier,
    e: &OpcodeEntry,
    ext: u8,
    dst: u8,
    src: u8,
    amt: u8,
) {
    if tier.has_mask_regs() {
        EvexInstruction::new()
            .length(EvexVectorLength::V512)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .opcode_ext(ext)
            .vvvvv(dst)
            .rm(RegMem::reg(src))
            .imm(amt)
            .encode(sink);
    } else {
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
}

/// Emit one whole-slot move (load or store) in the tier's native width.
pub(crate) fn emit_slot_move(
    sink: &mut CodeBuffer,
    tier: Tier,
    store: bool,
    vec_enc: u8,
    addr: Amode,
) {
    let e = move_entry(store);
    if tier.has_mask_regs() {
        EvexInstruction::new()
            .length(EvexVectorLength::V512)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(vec_enc)
            .rm(RegMem::mem(addr))
            .tuple_type(TupleType::FullMem)
            .encode(sink);
    } else {
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(e.prefix)
            .map(e.map)
            .opcode(e.opcode)
            .reg(vec_enc)
            .rm(RegMem::mem(addr))
            .encode(sink);
    }
}

/// Emit one 256-bit move regardless of tier: the narrow-domain form used by
/// the width-emulation engine when slicing scratch into sub-groups.
pub(crate) fn emit_ymm_move(sink: &mut CodeBuffer, store: bool, vec_enc: u8, addr: Amode) {
    let e = move_entry(store);
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(e.prefix)
        .map(e.map)
        .opcode(e.opcode)
        .reg(vec_enc)
        .rm(RegMem::mem(addr))
        .encode(sink);
}

/// Emit one masked merge move: `dst{k} = src`, leaving unselected lanes of
/// `dst` untouched.
pub(crate) fn emit_slot_masked_move(
    sink: &mut CodeBuffer,
    width: ElemWidth,
    k: u8,
    dst: u8,
    src: u8,
) {
    let e = masked_move_entry(width);
    EvexInstruction::new()
        .length(EvexVectorLength::V512)
        .prefix(e.prefix)
        .map(e.map)
        .w(e.w)
        .opcode(e.opcode)
        .reg(dst)
        .rm(RegMem::reg(src))
        .mask(EvexMasking::Merging {
            k,
        })
        .encode(sink);
}

/// Emit one compare-into-mask slot operation:
/// `k = cmp(src1, rm) per imm8 predicate code`.
pub(crate) fn emit_slot_cmp_mask(
    sink: &mut CodeBuffer,
    e: &OpcodeEntry,
    k: u8,
    src1: u8,
    rm: RegMem,
    code: u8,
) {
    EvexInstruction::new()
        .length(EvexVectorLength::V512)
        .prefix(e.prefix)
        .map(e.map)
        .w(e.w)
        .opcode(e.opcode)
        .reg(k)
        .vvvvv(src1)
        .rm(rm)
        .tuple_type(TupleType::FullMem)
        .imm(code)
        .encode(sink);
}

/// Emit one VEX binary slot operation on explicit 256-bit registers (the
/// software predicate path and the narrow domain of the emulation engine).
pub(crate) fn emit_vex_binary(
    sink: &mut CodeBuffer,
    e: &OpcodeEntry,
    dst: u8,
    src1: u8,
    rm: RegMem,
) {
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(e.prefix)
        .map(e.map)
        .w(e.w)
        .opcode(e.opcode)
        .reg(dst)
        .vvvv(src1)
        .rm(rm)
        .encode(sink);
}

/// Emit one VEX binary slot operation with a trailing immediate
/// (`vcmpps`-style predicate codes).
pub(crate) fn emit_vex_binary_imm(
    sink: &mut CodeBuffer,
    e: &OpcodeEntry,
    dst: u8,
    src1: u8,
    rm: RegMem,
    imm: u8,
) {
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(e.prefix)
        .map(e.map)
        .w(e.w)
        .opcode(e.opcode)
        .reg(dst)
        .vvvv(src1)
        .rm(rm)
        .imm(imm)
        .encode(sink);
}

/// Emit the broadcast of a GPR into slot 0 of `home`. On the EVEX tiers
/// this is a single `vpbroadcastd/q`; AVX2 lacks a GPR-source broadcast,
/// so the value bounces through the XMM view of the home slot.
pub(crate) fn emit_broadcast_gpr(
    sink: &mut CodeBuffer,
    tier: Tier,
    wide_lanes: bool,
    src: Gpr,
    home: WideVec,
) {
    let dst = home.slot(0);
    if tier.has_mask_regs() {
        let e = entry(_66, _0F38, 0x7C, wide_lanes);
        EvexInstruction::new()
            .length(EvexVectorLength::V512)
            .prefix(e.prefix)
            .map(e.map)
            .w(e.w)
            .opcode(e.opcode)
            .reg(dst)
            .rm(RegMem::reg(src.enc()))
            .encode(sink);
    } else {
        // vmovd/vmovq xmm, r ; vpbroadcastd/q ymm, xmm.
        VexInstruction::new()
            .length(VexVectorLength::V128)
            .prefix(_66)
            .map(_0F)
            .w(wide_lanes)
            .opcode(0x6E)
            .reg(dst)
            .rm(RegMem::reg(src.enc()))
            .encode(sink);
        let opcode = if wide_lanes { 0x59 } else { 0x58 };
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(_66)
            .map(_0F38)
            .opcode(opcode)
            .reg(dst)
            .rm(RegMem::reg(dst))
            .encode(sink);
    }
}

//=============================================================================
// Scalar (REX-format) emission

/// Scalar ALU operations on GPRs, by primary opcode of the `/r` form.
#[derive(Clone, Copy)]
pub(crate) enum AluOp {
    Add,
    Or,
    And,
    Xor,
}

impl AluOp {
    fn opcode(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Or => 0x09,
            AluOp::And => 0x21,
            AluOp::Xor => 0x31,
        }
    }
}

/// `mov dst, imm` choosing the shortest of the sign-extended-32 and full
/// 64-bit forms.
pub(crate) fn emit_mov_ri64<S: ByteSink + ?Sized>(sink: &mut S, dst: Gpr, value: i64) {
    let enc = dst.enc();
    if i32::try_from(value).is_ok() {
        rex::emit_rex(sink, true, 0, 0, enc >> 3);
        sink.put1(0xC7);
        sink.put1(rex::encode_modrm(3, 0, enc & 7));
        sink.put4(value as u32);
    } else {
        rex::emit_rex(sink, true, 0, 0, enc >> 3);
        sink.put1(0xB8 | (enc & 7));
        sink.put8(value as u64);
    }
}

/// `op dst, src` on GPRs.
pub(crate) fn emit_alu_rr<S: ByteSink + ?Sized>(
    sink: &mut S,
    op: AluOp,
    src: Gpr,
    dst: Gpr,
    is64: bool,
) {
    let (g, e) = (src.enc(), dst.enc());
    rex::emit_rex(sink, is64, g >> 3, 0, e >> 3);
    sink.put1(op.opcode());
    sink.put1(rex::encode_modrm(3, g & 7, e & 7));
}

/// `shl dst, amt` (64-bit).
pub(crate) fn emit_shl64_ri<S: ByteSink + ?Sized>(sink: &mut S, dst: Gpr, amt: u8) {
    let e = dst.enc();
    rex::emit_rex(sink, true, 0, 0, e >> 3);
    sink.put1(0xC1);
    sink.put1(rex::encode_modrm(3, 4, e & 7));
    sink.put1(amt);
}

/// `cmp dst, imm`, using the `83 /7 ib` short form when the immediate
/// allows.
pub(crate) fn emit_cmp_ri<S: ByteSink + ?Sized>(sink: &mut S, dst: Gpr, imm: i32, is64: bool) {
    let e = dst.enc();
    rex::emit_rex(sink, is64, 0, 0, e >> 3);
    if rex::low8_will_sign_extend_to_32(imm) {
        sink.put1(0x83);
        sink.put1(rex::encode_modrm(3, 7, e & 7));
        sink.put1(imm as u8);
    } else {
        sink.put1(0x81);
        sink.put1(rex::encode_modrm(3, 7, e & 7));
        sink.put4(imm as u32);
    }
}

/// Condition-code encodings for `jcc`.
pub(crate) const CC_E: u8 = 0x4;

/// `jcc target` with a 32-bit relative displacement patched through the
/// buffer's label machinery.
pub(crate) fn emit_jcc(sink: &mut CodeBuffer, cc: u8, target: Label) {
    sink.put1(0x0F);
    sink.put1(0x80 | cc);
    let offset = sink.cur_offset();
    sink.put4(0);
    sink.use_label_at_offset(offset, target, LabelUse::Rel32);
}

fn amode_rex_bits(addr: &Amode) -> (u8, u8) {
    match addr {
        Amode::ImmReg { base, .. } => (0, base.enc() >> 3),
        Amode::ImmRegRegShift { base, index, .. } => (index.enc() >> 3, base.enc() >> 3),
    }
}

/// Zero-extending scalar lane load: `movzx`/`mov` of one lane into a GPR.
pub(crate) fn emit_lane_load<S: ByteSink + ?Sized>(
    sink: &mut S,
    width: ElemWidth,
    dst: Gpr,
    addr: &Amode,
) {
    let g = dst.enc();
    let (x, b) = amode_rex_bits(addr);
    match width {
        ElemWidth::B8 => {
            rex::emit_rex(sink, false, g >> 3, x, b);
            sink.put1(0x0F);
            sink.put1(0xB6);
        }
        ElemWidth::W16 => {
            rex::emit_rex(sink, false, g >> 3, x, b);
            sink.put1(0x0F);
            sink.put1(0xB7);
        }
        ElemWidth::D32 => {
            rex::emit_rex(sink, false, g >> 3, x, b);
            sink.put1(0x8B);
        }
        ElemWidth::Q64 => {
            rex::emit_rex(sink, true, g >> 3, x, b);
            sink.put1(0x8B);
        }
        _ => unreachable!("float lanes never round-trip through GPRs"),
    }
    rex::emit_modrm_sib_disp(sink, g & 7, addr, None);
}

/// Scalar shift of one lane in memory by `cl`.
pub(crate) fn emit_lane_shift_mem_cl<S: ByteSink + ?Sized>(
    sink: &mut S,
    family: OpFamily,
    width: ElemWidth,
    addr: &Amode,
) {
    let ext = match family {
        OpFamily::ShlVar => 4,
        OpFamily::ShrlVar => 5,
        OpFamily::ShraVar => 7,
        _ => unreachable!("not a variable shift"),
    };
    let (x, b) = amode_rex_bits(addr);
    match width {
        ElemWidth::W16 => sink.put1(0x66),
        _ => {}
    }
    rex::emit_rex(sink, width == ElemWidth::Q64, 0, x, b);
    sink.put1(if width == ElemWidth::B8 { 0xD2 } else { 0xD3 });
    rex::emit_modrm_sib_disp(sink, ext, addr, None);
}

/// `kmovw/kmovd/kmovq dst_gpr, k`: read a mask register into a GPR. The
/// form is selected by the per-slot lane count.
pub(crate) fn emit_kmov_to_gpr(sink: &mut CodeBuffer, lanes_per_slot: u32, dst: Gpr, k: u8) {
    let (prefix, w) = match lanes_per_slot {
        0..=16 => (PfxNone, false),
        32 => (_F2, false),
        64 => (_F2, true),
        _ => unreachable!("mask register wider than 64 lanes"),
    };
    VexInstruction::new()
        .length(VexVectorLength::V128)
        .prefix(prefix)
        .map(_0F)
        .w(w)
        .opcode(0x93)
        .reg(dst.enc())
        .rm(RegMem::reg(k))
        .encode(sink);
}

/// `vpmovmskb dst, ymm`: byte-granular MSB extraction across 256 bits.
pub(crate) fn emit_vpmovmskb(sink: &mut CodeBuffer, dst: Gpr, ymm: u8) {
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(_66)
        .map(_0F)
        .opcode(0xD7)
        .reg(dst.enc())
        .rm(RegMem::reg(ymm))
        .encode(sink);
}

/// `vmovmskps`/`vmovmskpd dst, ymm`: per-lane MSB extraction for 32/64-bit
/// lanes.
pub(crate) fn emit_movmsk(sink: &mut CodeBuffer, wide_lanes: bool, dst: Gpr, ymm: u8) {
    let prefix = if wide_lanes { _66 } else { PfxNone };
    VexInstruction::new()
        .length(VexVectorLength::V256)
        .prefix(prefix)
        .map(_0F)
        .opcode(0x50)
        .reg(dst.enc())
        .rm(RegMem::reg(ymm))
        .encode(sink);
}

/// Replicate a lane value across 32 bits (or pass 32/64-bit values
/// through), producing the pattern `emit_broadcast_gpr` splats. Narrow
/// lanes replicate so that a doubleword broadcast fills every lane
/// identically.
pub(crate) fn replicate_imm(width: ElemWidth, value: i64) -> (i64, bool) {
    match width {
        ElemWidth::B8 => {
            let b = (value as u8) as u32;
            (i64::from(b * 0x0101_0101), false)
        }
        ElemWidth::W16 => {
            let w = (value as u16) as u32;
            (i64::from(w | (w << 16)), false)
        }
        ElemWidth::D32 | ElemWidth::F32 => (i64::from(value as u32), false),
        ElemWidth::Q64 | ElemWidth::F64 => (value, true),
    }
}

pub(crate) fn unsupported(op: impl core::fmt::Display, tier: Tier) -> CodegenError {
    CodegenError::Unsupported {
        op: op.to_string(),
        tier: tier.name(),
    }
}

pub(crate) fn scratch_base_check(base: Gpr, others: &[Gpr]) -> CodegenResult<()> {
    if others.iter().any(|r| *r == base) {
        return Err(CodegenError::RegisterAliasing {
            op: "emulated lowering".to_string(),
            constraint: "temporaries must not alias the scratch base register",
        });
    }
    // The scratch base also must never be rsp: its encoding is the SIB
    // escape and the region is not on the stack.
    if base.enc() == regs::ENC_RSP {
        return Err(CodegenError::InvalidOperand {
            what: "scratch base register cannot be rsp",
        });
    }
    Ok(())
}

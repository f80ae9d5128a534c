//! Operation descriptors and the flat operation catalog.
//!
//! Callers describe work in architecture-neutral terms: a [`VecOp`] names a
//! mnemonic family, an element width, and a signedness; an [`Inst`] pairs a
//! `VecOp` with an operand shape (register-to-register, register-from-memory,
//! register-from-immediate, three-operand non-destructive, and the
//! compare/select/branch forms). Feature-level dispatch inside the selected
//! backend resolves each `Inst` to exactly one lowering.

use core::fmt;

use crate::buffer::Label;
use crate::reg::Gpr;
use crate::vector::{Pred, WideVec};

/// Lane width of a vector operation's elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemWidth {
    /// 8-bit integer lanes.
    B8,
    /// 16-bit integer lanes.
    W16,
    /// 32-bit integer lanes.
    D32,
    /// 64-bit integer lanes.
    Q64,
    /// 32-bit float lanes.
    F32,
    /// 64-bit float lanes.
    F64,
}

impl ElemWidth {
    /// Lane width in bits.
    pub fn bits(self) -> u32 {
        match self {
            ElemWidth::B8 => 8,
            ElemWidth::W16 => 16,
            ElemWidth::D32 | ElemWidth::F32 => 32,
            ElemWidth::Q64 | ElemWidth::F64 => 64,
        }
    }

    /// Lane width in bytes.
    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// Whether this is a floating-point lane width.
    pub fn is_float(self) -> bool {
        matches!(self, ElemWidth::F32 | ElemWidth::F64)
    }
}

impl fmt::Display for ElemWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ElemWidth::B8 => "b",
            ElemWidth::W16 => "w",
            ElemWidth::D32 => "d",
            ElemWidth::Q64 => "q",
            ElemWidth::F32 => "ps",
            ElemWidth::F64 => "pd",
        };
        write!(f, "{name}")
    }
}

/// Signed or unsigned lane interpretation. Families that don't distinguish
/// (bitwise logic, plain add/sub) use `Signed` by convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// A mnemonic family. Together with an [`ElemWidth`] and a [`Signedness`]
/// this keys the flat operation catalog.
///
/// NaN caveat for the float families: propagation of NaN through `FMin`,
/// `FMax` and the float comparisons follows whatever the emitted native
/// instruction does, which differs between architectures. No canonical NaN
/// policy is imposed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpFamily {
    /// Lane-wise wrapping add.
    Add,
    /// Lane-wise wrapping subtract.
    Sub,
    /// Lane-wise saturating add (8/16-bit lanes only; no ISA this crate
    /// targets saturates wider lanes).
    AddSat,
    /// Lane-wise saturating subtract (8/16-bit lanes only).
    SubSat,
    /// Lane-wise minimum.
    Min,
    /// Lane-wise maximum.
    Max,
    /// Lane-wise low-half multiply.
    MulLo,
    /// Lane-wise absolute value (unary).
    Abs,
    /// Bitwise AND.
    And,
    /// Bitwise AND-NOT: `dst = !src1 & src2`.
    AndNot,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Shift left by a uniform immediate count.
    ShlImm,
    /// Logical shift right by a uniform immediate count.
    ShrlImm,
    /// Arithmetic shift right by a uniform immediate count.
    ShraImm,
    /// Shift left by per-lane counts.
    ShlVar,
    /// Logical shift right by per-lane counts.
    ShrlVar,
    /// Arithmetic shift right by per-lane counts.
    ShraVar,
    /// Float lane-wise add.
    FAdd,
    /// Float lane-wise subtract.
    FSub,
    /// Float lane-wise multiply.
    FMul,
    /// Float lane-wise minimum.
    FMin,
    /// Float lane-wise maximum.
    FMax,
}

impl fmt::Display for OpFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OpFamily::Add => "add",
            OpFamily::Sub => "sub",
            OpFamily::AddSat => "adds",
            OpFamily::SubSat => "subs",
            OpFamily::Min => "min",
            OpFamily::Max => "max",
            OpFamily::MulLo => "mull",
            OpFamily::Abs => "abs",
            OpFamily::And => "and",
            OpFamily::AndNot => "andn",
            OpFamily::Or => "or",
            OpFamily::Xor => "xor",
            OpFamily::ShlImm => "shli",
            OpFamily::ShrlImm => "shrli",
            OpFamily::ShraImm => "shrai",
            OpFamily::ShlVar => "shlv",
            OpFamily::ShrlVar => "shrlv",
            OpFamily::ShraVar => "shrav",
            OpFamily::FAdd => "fadd",
            OpFamily::FSub => "fsub",
            OpFamily::FMul => "fmul",
            OpFamily::FMin => "fmin",
            OpFamily::FMax => "fmax",
        };
        write!(f, "{name}")
    }
}

/// An operation descriptor: the unit of input to the encoder. Pure value
/// type; carries no ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VecOp {
    pub family: OpFamily,
    pub width: ElemWidth,
    pub sign: Signedness,
}

impl VecOp {
    /// Generic constructor; the named constructors below cover the common
    /// catalog entries.
    pub fn new(family: OpFamily, width: ElemWidth, sign: Signedness) -> VecOp {
        VecOp {
            family,
            width,
            sign,
        }
    }

    /// Wrapping add.
    pub fn add(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::Add, width, Signedness::Signed)
    }

    /// Wrapping subtract.
    pub fn sub(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::Sub, width, Signedness::Signed)
    }

    /// Saturating add.
    pub fn adds(width: ElemWidth, sign: Signedness) -> VecOp {
        VecOp::new(OpFamily::AddSat, width, sign)
    }

    /// Saturating subtract.
    pub fn subs(width: ElemWidth, sign: Signedness) -> VecOp {
        VecOp::new(OpFamily::SubSat, width, sign)
    }

    /// Lane-wise minimum.
    pub fn min(width: ElemWidth, sign: Signedness) -> VecOp {
        VecOp::new(OpFamily::Min, width, sign)
    }

    /// Lane-wise maximum.
    pub fn max(width: ElemWidth, sign: Signedness) -> VecOp {
        VecOp::new(OpFamily::Max, width, sign)
    }

    /// Low-half multiply.
    pub fn mull(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::MulLo, width, Signedness::Signed)
    }

    /// Absolute value.
    pub fn abs(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::Abs, width, Signedness::Signed)
    }

    /// Bitwise AND. Width only selects the native encoding form.
    pub fn and() -> VecOp {
        VecOp::new(OpFamily::And, ElemWidth::D32, Signedness::Signed)
    }

    /// Bitwise AND-NOT.
    pub fn andn() -> VecOp {
        VecOp::new(OpFamily::AndNot, ElemWidth::D32, Signedness::Signed)
    }

    /// Bitwise OR.
    pub fn or() -> VecOp {
        VecOp::new(OpFamily::Or, ElemWidth::D32, Signedness::Signed)
    }

    /// Bitwise XOR.
    pub fn xor() -> VecOp {
        VecOp::new(OpFamily::Xor, ElemWidth::D32, Signedness::Signed)
    }

    /// Shift left by immediate.
    pub fn shl_imm(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::ShlImm, width, Signedness::Signed)
    }

    /// Shift right by immediate (logical or arithmetic per `sign`).
    pub fn shr_imm(width: ElemWidth, sign: Signedness) -> VecOp {
        let family = match sign {
            Signedness::Signed => OpFamily::ShraImm,
            Signedness::Unsigned => OpFamily::ShrlImm,
        };
        VecOp::new(family, width, sign)
    }

    /// Shift left by per-lane counts.
    pub fn shl_var(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::ShlVar, width, Signedness::Signed)
    }

    /// Shift right by per-lane counts (logical or arithmetic per `sign`).
    pub fn shr_var(width: ElemWidth, sign: Signedness) -> VecOp {
        let family = match sign {
            Signedness::Signed => OpFamily::ShraVar,
            Signedness::Unsigned => OpFamily::ShrlVar,
        };
        VecOp::new(family, width, sign)
    }

    /// Float add.
    pub fn fadd(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::FAdd, width, Signedness::Signed)
    }

    /// Float subtract.
    pub fn fsub(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::FSub, width, Signedness::Signed)
    }

    /// Float multiply.
    pub fn fmul(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::FMul, width, Signedness::Signed)
    }

    /// Float minimum. See the NaN caveat on [`OpFamily`].
    pub fn fmin(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::FMin, width, Signedness::Signed)
    }

    /// Float maximum. See the NaN caveat on [`OpFamily`].
    pub fn fmax(width: ElemWidth) -> VecOp {
        VecOp::new(OpFamily::FMax, width, Signedness::Signed)
    }
}

impl fmt::Display for VecOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.family, self.width.is_float(), self.sign) {
            (_, true, _) => write!(f, "{}.{}", self.family, self.width),
            (_, false, Signedness::Unsigned) => write!(f, "{}u.{}", self.family, self.width),
            (_, false, Signedness::Signed) => write!(f, "{}.{}", self.family, self.width),
        }
    }
}

/// Integer condition codes for vector compares. Signed and unsigned
/// orderings are distinct codes, matching the native predicate encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntCC {
    Equal,
    NotEqual,
    SignedLessThan,
    SignedLessThanOrEqual,
    SignedGreaterThan,
    SignedGreaterThanOrEqual,
    UnsignedLessThan,
    UnsignedLessThanOrEqual,
    UnsignedGreaterThan,
    UnsignedGreaterThanOrEqual,
}

impl IntCC {
    /// Whether the code orders lanes as unsigned values.
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            IntCC::UnsignedLessThan
                | IntCC::UnsignedLessThanOrEqual
                | IntCC::UnsignedGreaterThan
                | IntCC::UnsignedGreaterThanOrEqual
        )
    }
}

impl fmt::Display for IntCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            IntCC::Equal => "eq",
            IntCC::NotEqual => "ne",
            IntCC::SignedLessThan => "slt",
            IntCC::SignedLessThanOrEqual => "sle",
            IntCC::SignedGreaterThan => "sgt",
            IntCC::SignedGreaterThanOrEqual => "sge",
            IntCC::UnsignedLessThan => "ult",
            IntCC::UnsignedLessThanOrEqual => "ule",
            IntCC::UnsignedGreaterThan => "ugt",
            IntCC::UnsignedGreaterThanOrEqual => "uge",
        };
        write!(f, "{name}")
    }
}

/// Float condition codes. Only the ordered, non-signaling forms the
/// renderer uses; NaN behavior is the native instruction's (see
/// [`OpFamily`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatCC {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl fmt::Display for FloatCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FloatCC::Equal => "eq",
            FloatCC::NotEqual => "ne",
            FloatCC::LessThan => "lt",
            FloatCC::LessThanOrEqual => "le",
            FloatCC::GreaterThan => "gt",
            FloatCC::GreaterThanOrEqual => "ge",
        };
        write!(f, "{name}")
    }
}

/// The uniform-lane condition a collapsed predicate is tested against.
/// Callers name the pattern through this enum and never through literal bit
/// patterns; the assembled bit order is stable within a build but
/// architecture-specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneCond {
    /// Branch if no lane's predicate bit is set.
    NoneSatisfy,
    /// Branch if every lane's predicate bit is set.
    AllSatisfy,
}

/// Address of a wide vector in memory: a base register, an optional scaled
/// index, and a logical byte displacement. Slot `i` resolves to
/// `base [+ index << shift] + disp + i * slot_bytes`.
///
/// When the logical displacement exceeds the 32-bit field a single
/// instruction can carry, the encoder first emits an auxiliary
/// address-materialization fragment into `far_tmp` and rebases the slot
/// addresses on it; `far_tmp` must then not alias `base` or the index
/// (checked).
#[derive(Clone, Copy, Debug)]
pub struct WideAmode {
    pub base: Gpr,
    pub index: Option<(Gpr, u8)>,
    pub disp: i64,
    pub far_tmp: Option<Gpr>,
}

impl WideAmode {
    /// A base-plus-displacement address with an in-range displacement.
    pub fn reg_offset(base: Gpr, disp: i64) -> WideAmode {
        WideAmode {
            base,
            index: None,
            disp,
            far_tmp: None,
        }
    }

    /// A base-index-displacement address: `base + (index << shift) + disp`.
    pub fn indexed(base: Gpr, index: Gpr, shift: u8, disp: i64) -> WideAmode {
        WideAmode {
            base,
            index: Some((index, shift)),
            disp,
            far_tmp: None,
        }
    }

    /// A base-plus-displacement address whose displacement may exceed the
    /// single-instruction range; `far_tmp` receives the materialized
    /// address when it does.
    pub fn far(base: Gpr, disp: i64, far_tmp: Gpr) -> WideAmode {
        WideAmode {
            base,
            index: None,
            disp,
            far_tmp: Some(far_tmp),
        }
    }
}

/// Second source of a binary vector operation: a wide vector or a wide
/// memory operand.
#[derive(Clone, Copy, Debug)]
pub enum VecMem {
    Vec(WideVec),
    Mem(WideAmode),
}

impl From<WideVec> for VecMem {
    fn from(v: WideVec) -> VecMem {
        VecMem::Vec(v)
    }
}

impl From<WideAmode> for VecMem {
    fn from(a: WideAmode) -> VecMem {
        VecMem::Mem(a)
    }
}

/// An immediate operand to be applied lane-wise.
///
/// Shift counts encode inline in the instruction; every other immediate is
/// too wide for an inline field and is materialized by an auxiliary
/// sequence (`mov` into `tmp`, broadcast into slot 0 of `home`) emitted
/// immediately before the consuming instruction. Neither auxiliary register
/// may alias an operand of that instruction (checked).
#[derive(Clone, Copy, Debug)]
pub struct WideImm {
    pub value: i64,
    pub tmp: Gpr,
    pub home: WideVec,
}

impl WideImm {
    /// An immediate materialized through `tmp` and broadcast into `home`.
    pub fn new(value: i64, tmp: Gpr, home: WideVec) -> WideImm {
        WideImm {
            value,
            tmp,
            home,
        }
    }
}

/// One operation of the flat catalog, shaped and ready for emission.
///
/// Operand order follows the destination-last reading of the constructors:
/// sources first, destination last in constructor argument lists, with the
/// destination named `dst` in the variant.
#[derive(Clone, Copy, Debug)]
pub enum Inst {
    /// `dst = op(src1, src2)` -- three-operand non-destructive form;
    /// `src2` may be a wide memory operand.
    VecRRR {
        op: VecOp,
        src1: WideVec,
        src2: VecMem,
        dst: WideVec,
    },

    /// `dst = op(src1, broadcast(imm))`.
    VecRRI {
        op: VecOp,
        src1: WideVec,
        imm: WideImm,
        dst: WideVec,
    },

    /// `dst = op(src)` -- unary form (`Abs`).
    VecUnary {
        op: VecOp,
        src: VecMem,
        dst: WideVec,
    },

    /// `dst = src <<// amt` -- uniform immediate shift; `op` selects the
    /// direction and arithmetic/logical form.
    VecShiftImm {
        op: VecOp,
        src: WideVec,
        amt: u8,
        dst: WideVec,
    },

    /// `dst.lane = src.lane <<// counts.lane` -- per-lane variable shift.
    /// Per-lane counts must be below the lane width; a wider count is the
    /// caller's error and the paths diverge on it. Tiers without a native
    /// form decompose to single-lane scalar round-trips; that path shifts
    /// with `cl`, so `tmp_cnt` must be `rcx` (checked).
    VecShiftVar {
        op: VecOp,
        src: WideVec,
        counts: WideVec,
        dst: WideVec,
        tmp_cnt: Gpr,
    },

    /// Load a wide vector from memory.
    VecLoad {
        addr: WideAmode,
        dst: WideVec,
    },

    /// Store a wide vector to memory.
    VecStore {
        src: WideVec,
        addr: WideAmode,
    },

    /// Integer lane compare into a predicate. The software path composes
    /// orderings from {equal, min, max} and needs `tmp` as a working vector
    /// distinct from the sources and the predicate home (checked); the
    /// native path ignores `tmp`.
    VecCmp {
        cc: IntCC,
        width: ElemWidth,
        src1: WideVec,
        src2: WideVec,
        pred: Pred,
        tmp: WideVec,
    },

    /// Float lane compare into a predicate.
    VecFcmp {
        cc: FloatCC,
        width: ElemWidth,
        src1: WideVec,
        src2: WideVec,
        pred: Pred,
        tmp: WideVec,
    },

    /// Merge under mask: `dst.lane = pred.lane ? src.lane : dst.lane`.
    /// `dst` carries the "false" value in. The software path spends `tmp`
    /// and three extra instructions per slot; the native path ignores
    /// `tmp`.
    VecSelect {
        width: ElemWidth,
        pred: Pred,
        src: WideVec,
        dst: WideVec,
        tmp: WideVec,
    },

    /// Collapse a predicate to one scalar word and branch to `target` if it
    /// matches `cond`. `acc` accumulates the assembled word, `tmp` holds
    /// per-slot groups; the two must be distinct (checked).
    MaskBranch {
        width: ElemWidth,
        pred: Pred,
        cond: LaneCond,
        acc: Gpr,
        tmp: Gpr,
        target: Label,
    },
}

impl Inst {
    /// Three-operand binary vector op.
    pub fn vec_rrr(op: VecOp, src1: WideVec, src2: impl Into<VecMem>, dst: WideVec) -> Inst {
        Inst::VecRRR {
            op,
            src1,
            src2: src2.into(),
            dst,
        }
    }

    /// Binary vector op with a broadcast immediate.
    pub fn vec_rri(op: VecOp, src1: WideVec, imm: WideImm, dst: WideVec) -> Inst {
        Inst::VecRRI {
            op,
            src1,
            imm,
            dst,
        }
    }

    /// Unary vector op.
    pub fn vec_unary(op: VecOp, src: impl Into<VecMem>, dst: WideVec) -> Inst {
        Inst::VecUnary {
            op,
            src: src.into(),
            dst,
        }
    }

    /// Uniform immediate shift.
    pub fn vec_shift_imm(op: VecOp, src: WideVec, amt: u8, dst: WideVec) -> Inst {
        Inst::VecShiftImm {
            op,
            src,
            amt,
            dst,
        }
    }

    /// Per-lane variable shift.
    pub fn vec_shift_var(
        op: VecOp,
        src: WideVec,
        counts: WideVec,
        dst: WideVec,
        tmp_cnt: Gpr,
    ) -> Inst {
        Inst::VecShiftVar {
            op,
            src,
            counts,
            dst,
            tmp_cnt,
        }
    }

    /// Wide vector load.
    pub fn vec_load(addr: WideAmode, dst: WideVec) -> Inst {
        Inst::VecLoad {
            addr,
            dst,
        }
    }

    /// Wide vector store.
    pub fn vec_store(src: WideVec, addr: WideAmode) -> Inst {
        Inst::VecStore {
            src,
            addr,
        }
    }

    /// Integer compare into a predicate.
    pub fn vec_cmp(
        cc: IntCC,
        width: ElemWidth,
        src1: WideVec,
        src2: WideVec,
        pred: Pred,
        tmp: WideVec,
    ) -> Inst {
        Inst::VecCmp {
            cc,
            width,
            src1,
            src2,
            pred,
            tmp,
        }
    }

    /// Float compare into a predicate.
    pub fn vec_fcmp(
        cc: FloatCC,
        width: ElemWidth,
        src1: WideVec,
        src2: WideVec,
        pred: Pred,
        tmp: WideVec,
    ) -> Inst {
        Inst::VecFcmp {
            cc,
            width,
            src1,
            src2,
            pred,
            tmp,
        }
    }

    /// Merge-mask select.
    pub fn vec_select(
        width: ElemWidth,
        pred: Pred,
        src: WideVec,
        dst: WideVec,
        tmp: WideVec,
    ) -> Inst {
        Inst::VecSelect {
            width,
            pred,
            src,
            dst,
            tmp,
        }
    }

    /// Collapse-and-branch on a uniform-lane condition.
    pub fn mask_branch(
        width: ElemWidth,
        pred: Pred,
        cond: LaneCond,
        acc: Gpr,
        tmp: Gpr,
        target: Label,
    ) -> Inst {
        Inst::MaskBranch {
            width,
            pred,
            cond,
            acc,
            tmp,
            target,
        }
    }
}

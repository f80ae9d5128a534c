//! Build-time wide-vector instruction encoder.
//!
//! `lanegen` turns architecture-neutral descriptions of SIMD and scalar
//! operations into exact native machine-code byte sequences, resolved
//! entirely at the host toolchain's build time. It exists so that a
//! numerically intensive renderer can run hand-tuned, branch-light vector
//! kernels across CPU families without a hand-written backend per family.
//!
//! The interesting work happens below the operation surface:
//!
//! - the [`isa::x64::encoding`] modules pack prefix, opcode, addressing,
//!   displacement and immediate fields bit-for-bit for the REX, VEX and
//!   EVEX instruction formats;
//! - the width-emulation engine decomposes operations the selected
//!   capability tier cannot express natively into sequences of narrower
//!   native operations routed through a shared scratch region;
//! - the predicate layer lowers one merge-mask contract either to
//!   hardware mask registers or to software AND/ANDN/OR blends;
//! - the collapse subsystem reduces a full-width predicate to one scalar
//!   word so SPMD vector code can drive ordinary scalar control flow.
//!
//! A build commits to a target and a [`isa::Tier`] once; everything
//! downstream is static. Registers are always caller-chosen -- this crate
//! does no allocation and no scheduling.
//!
//! ```
//! use lanegen::buffer::CodeBuffer;
//! use lanegen::inst::{ElemWidth, Inst, Signedness, VecOp};
//! use lanegen::isa::{self, EmitState, TargetIsa, Tier};
//! use lanegen::vector::WideVec;
//! use lanegen::x64::regs;
//! use std::str::FromStr;
//! use target_lexicon::Triple;
//!
//! let triple = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();
//! let isa = isa::lookup(triple).unwrap().finish(Tier::Avx512Bw);
//! let mut buf = CodeBuffer::new();
//! let mut state = EmitState::new(regs::r15());
//!
//! // A 16-bit lane-wise saturating add: v0 = v1 +sat v2.
//! let add = VecOp::adds(ElemWidth::W16, Signedness::Signed);
//! let inst = Inst::vec_rrr(add, WideVec::new(1), WideVec::new(2), WideVec::new(0));
//! isa.emit_inst(&inst, &mut buf, &mut state).unwrap();
//! assert!(!buf.data().is_empty());
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod inst;
pub mod isa;
pub mod reg;
mod result;
pub mod scratch;
pub mod vector;

pub use crate::result::{CodegenError, CodegenResult};

/// Convenience re-export of the x86-64 backend namespace.
#[cfg(feature = "x86")]
pub use crate::isa::x64;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

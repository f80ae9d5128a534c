//! Encoding logic for VEX instructions: the two- or three-byte prefix format
//! introduced with AVX.
//!
//! The three-byte form:
//!
//! ```text
//!          ┌─────┐ ┌──────────────┐ ┌────────────────────┐
//! Bytes:   │ C4h │ │ R X B  m-mmmm│ │ W vvvv  L  pp      │
//!          └─────┘ └──────────────┘ └────────────────────┘
//! ```
//!
//! and the two-byte form (usable when X, B and W are zero and the opcode map
//! is 0F):
//!
//! ```text
//!          ┌─────┐ ┌────────────────────┐
//! Bytes:   │ C5h │ │ R vvvv  L  pp      │
//!          └─────┘ └────────────────────┘
//! ```
//!
//! R, X, B and vvvv are stored inverted, as in the manual.

use super::rex::{self, LegacyPrefixes, OpcodeMap};
use crate::buffer::ByteSink;
use crate::isa::x64::args::{Amode, RegMem};

/// Constructs a VEX-encoded instruction using a builder pattern, mirroring
/// the manual's syntax: `VEX.256.66.0F38.W0 3B /r` becomes
/// `VexInstruction::new().length(...).prefix(...).map(...).w(false).opcode(0x3B).reg(...).rm(...)`.
pub struct VexInstruction {
    length: VexVectorLength,
    prefix: LegacyPrefixes,
    map: OpcodeMap,
    opcode: u8,
    w: bool,
    reg: u8,
    rm: RegMem,
    vvvv: Option<u8>,
    imm: Option<u8>,
}

impl Default for VexInstruction {
    fn default() -> Self {
        Self {
            length: VexVectorLength::default(),
            prefix: LegacyPrefixes::None,
            map: OpcodeMap::None,
            opcode: 0x00,
            w: false,
            reg: 0x00,
            rm: RegMem::reg(0),
            vvvv: None,
            imm: None,
        }
    }
}

impl VexInstruction {
    /// Construct a default VEX instruction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the length of the instruction.
    #[inline(always)]
    pub fn length(mut self, length: VexVectorLength) -> Self {
        self.length = length;
        self
    }

    /// Set the legacy prefix byte of the instruction: None | 66 | F2 | F3.
    /// VEX instructions pack these into the prefix, not as separate bytes.
    #[inline(always)]
    pub fn prefix(mut self, prefix: LegacyPrefixes) -> Self {
        self.prefix = prefix;
        self
    }

    /// Set the opcode map byte of the instruction: None | 0F | 0F38 | 0F3A.
    /// VEX instructions pack these into the prefix, not as separate bytes.
    #[inline(always)]
    pub fn map(mut self, map: OpcodeMap) -> Self {
        self.map = map;
        self
    }

    /// Set the W bit, denoted by `.W1` or `.W0` in the manual.
    #[inline(always)]
    pub fn w(mut self, w: bool) -> Self {
        self.w = w;
        self
    }

    /// Set the instruction opcode byte.
    #[inline(always)]
    pub fn opcode(mut self, opcode: u8) -> Self {
        self.opcode = opcode;
        self
    }

    /// Set the register to use for the `reg` bits; many instructions use
    /// this as the write operand.
    #[inline(always)]
    pub fn reg(mut self, reg: u8) -> Self {
        self.reg = reg;
        self
    }

    /// Some instructions use the ModRM.reg field as an opcode extension,
    /// denoted by a `/n` field in the manual.
    #[inline(always)]
    pub fn opcode_ext(mut self, n: u8) -> Self {
        self.reg = n;
        self
    }

    /// Set the register/memory operand for the `rm` bits. Setting this
    /// affects both the ModRM byte and the VEX prefix (the extension bits
    /// for register encodings > 8).
    #[inline(always)]
    pub fn rm(mut self, rm: impl Into<RegMem>) -> Self {
        self.rm = rm.into();
        self
    }

    /// Set the `vvvv` register; some instructions allow using this as a
    /// second, non-destructive source register in 3-operand instructions
    /// (e.g. 2 read, 1 write).
    #[inline(always)]
    pub fn vvvv(mut self, reg: u8) -> Self {
        self.vvvv = Some(reg);
        self
    }

    /// Set the imm byte.
    #[inline(always)]
    pub fn imm(mut self, imm: u8) -> Self {
        self.imm = Some(imm);
        self
    }

    /// The R bit in encoded format (inverted).
    #[inline(always)]
    fn r_bit(&self) -> u8 {
        (!(self.reg >> 3)) & 1
    }

    /// The X bit in encoded format (inverted).
    #[inline(always)]
    fn x_bit(&self) -> u8 {
        let enc = match &self.rm {
            RegMem::Reg { .. } => 0,
            RegMem::Mem {
                addr: Amode::ImmReg { .. },
            } => 0,
            RegMem::Mem {
                addr: Amode::ImmRegRegShift { index, .. },
            } => index.enc(),
        };
        !(enc >> 3) & 1
    }

    /// The B bit in encoded format (inverted).
    #[inline(always)]
    fn b_bit(&self) -> u8 {
        let enc = match &self.rm {
            RegMem::Reg { reg } => *reg,
            RegMem::Mem {
                addr: Amode::ImmReg { base, .. },
            } => base.enc(),
            RegMem::Mem {
                addr: Amode::ImmRegRegShift { base, .. },
            } => base.enc(),
        };
        !(enc >> 3) & 1
    }

    /// Is the 2-byte prefix available for this instruction? We essentially
    /// just check if we need any of the bits that are only available in the
    /// 3-byte form.
    #[inline(always)]
    fn use_2byte_prefix(&self) -> bool {
        self.b_bit() == 1
            && self.x_bit() == 1
            && !self.w
            && self.map == OpcodeMap::_0F
    }

    /// The last byte of the 2-byte and 3-byte prefixes is mostly the same;
    /// share the common encoding logic here.
    #[inline(always)]
    fn prefix_last_byte(&self) -> u8 {
        let vvvv = self.vvvv.unwrap_or(0x00);
        let mut byte = 0x00;
        byte |= self.prefix.bits();
        byte |= self.length.bits() << 2;
        byte |= ((!vvvv) & 0xF) << 3;
        byte
    }

    /// Emit the VEX-encoded instruction to the sink: the prefix, the opcode
    /// byte, the ModR/M byte, optional SIB/displacement bytes, and an
    /// optional immediate.
    pub fn encode<S: ByteSink + ?Sized>(&self, sink: &mut S) {
        if self.use_2byte_prefix() {
            sink.put1(0xC5);
            sink.put1(self.prefix_last_byte() | (self.r_bit() << 7));
        } else {
            sink.put1(0xC4);
            sink.put1((self.r_bit() << 7) | (self.x_bit() << 6) | (self.b_bit() << 5) | self.map.bits());
            sink.put1(self.prefix_last_byte() | ((self.w as u8) << 7));
        }
        sink.put1(self.opcode);

        match &self.rm {
            RegMem::Reg { reg } => {
                sink.put1(rex::encode_modrm(3, self.reg & 7, reg & 7));
            }
            RegMem::Mem { addr } => {
                rex::emit_modrm_sib_disp(sink, self.reg & 7, addr, None);
            }
        }

        if let Some(imm) = self.imm {
            sink.put1(imm);
        }
    }
}

/// The VEX format allows choosing a vector length in the `L` bit.
#[derive(Clone, Copy)]
pub enum VexVectorLength {
    V128,
    V256,
}

impl VexVectorLength {
    /// Encode the `L` bit.
    fn bits(self) -> u8 {
        match self {
            Self::V128 => 0b0,
            Self::V256 => 0b1,
        }
    }
}

impl Default for VexVectorLength {
    fn default() -> Self {
        Self::V128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Gpr;

    #[test]
    fn vpaddsw_ymm() {
        // vpaddsw %ymm2, %ymm1, %ymm0 (VEX.256.66.0F.WIG ED /r).
        // Two-byte prefix applies: no high registers, W0, map 0F.
        let mut sink = vec![];
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(LegacyPrefixes::_66)
            .map(OpcodeMap::_0F)
            .opcode(0xED)
            .reg(0)
            .vvvv(1)
            .rm(RegMem::reg(2))
            .encode(&mut sink);
        assert_eq!(sink, vec![0xC5, 0xF5, 0xED, 0xC2]);
    }

    #[test]
    fn vpaddsw_high_regs() {
        // vpaddsw %ymm10, %ymm9, %ymm8: B extension forces the 3-byte form.
        let mut sink = vec![];
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(LegacyPrefixes::_66)
            .map(OpcodeMap::_0F)
            .opcode(0xED)
            .reg(8)
            .vvvv(9)
            .rm(RegMem::reg(10))
            .encode(&mut sink);
        assert_eq!(sink, vec![0xC4, 0x41, 0x35, 0xED, 0xC2]);
    }

    #[test]
    fn vpminud_mem() {
        // vpminud 64(%rsi), %ymm1, %ymm0 (VEX.256.66.0F38.WIG 3B /r):
        // map 0F38 forces the 3-byte form.
        let mut sink = vec![];
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(LegacyPrefixes::_66)
            .map(OpcodeMap::_0F38)
            .opcode(0x3B)
            .reg(0)
            .vvvv(1)
            .rm(RegMem::mem(Amode::imm_reg(64, Gpr::new(6))))
            .encode(&mut sink);
        assert_eq!(sink, vec![0xC4, 0xE2, 0x75, 0x3B, 0x46, 0x40]);
    }

    #[test]
    fn vpsllw_imm_is_ndd() {
        // vpsllw $3, %ymm2, %ymm1 (VEX.NDD.256.66.0F.WIG 71 /6 ib): the
        // destination rides in vvvv, the source in rm, and /6 in reg.
        let mut sink = vec![];
        VexInstruction::new()
            .length(VexVectorLength::V256)
            .prefix(LegacyPrefixes::_66)
            .map(OpcodeMap::_0F)
            .opcode(0x71)
            .opcode_ext(6)
            .vvvv(1)
            .rm(RegMem::reg(2))
            .imm(3)
            .encode(&mut sink);
        assert_eq!(sink, vec![0xC5, 0xF5, 0x71, 0xF2, 0x03]);
    }
}

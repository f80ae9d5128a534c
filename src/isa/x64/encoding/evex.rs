//! Encodes EVEX instructions. These instructions are those added by the
//! AVX-512 extensions. The EVEX encoding requires a 4-byte prefix:
//!
//! ```text
//! Byte 0:  0x62
//!         ┌───┬───┬───┬───┬───┬───┬───┬───┐
//! Byte 1: │ R │ X │ B │ R'│ 0 │ 0 │ m │ m │
//!         ├───┼───┼───┼───┼───┼───┼───┼───┤
//! Byte 2: │ W │ v │ v │ v │ v │ 1 │ p │ p │
//!         ├───┼───┼───┼───┼───┼───┼───┼───┤
//! Byte 3: │ z │ L'│ L │ b │ V'│ a │ a │ a │
//!         └───┴───┴───┴───┴───┴───┴───┴───┘
//! ```
//!
//! The prefix is then followed by the opcode byte, the ModR/M byte, and
//! other optional suffixes (e.g. SIB byte, displacements, immediates) based
//! on the instruction (see section 2.6, Intel Software Development Manual,
//! volume 2A).

use core::ops::RangeInclusive;

use super::rex::{self, LegacyPrefixes, OpcodeMap};
use crate::buffer::ByteSink;
use crate::isa::x64::args::{Amode, RegMem};

/// Constructs an EVEX-encoded instruction using a builder pattern. This
/// approach makes it visually easier to transform something from the
/// manual's syntax, `EVEX.512.66.0F38.W1 1F /r`, to code:
/// `EvexInstruction::new().length(...).prefix(...).map(...).w(true).opcode(0x1F).reg(...).rm(...)`.
pub struct EvexInstruction {
    bits: u32,
    opcode: u8,
    reg: u8,
    rm: RegMem,
    tuple_type: Option<TupleType>,
    imm: Option<u8>,
}

/// Because some of the bit flags in the EVEX prefix are reversed and users
/// of `EvexInstruction` may choose to skip setting fields, here we set some
/// sane defaults. Note that:
/// - the first byte is always `0x62` but you will notice it at the end of
///   the default `bits` value implemented--remember the little-endian order
/// - some bits are always set to certain values: bits 10-11 to 0, bit 18
///   to 1
/// - the other bits set correspond to reversed bits: R, X, B, R' (byte 1),
///   vvvv (byte 2), V' (byte 3).
impl Default for EvexInstruction {
    fn default() -> Self {
        Self {
            bits: 0x08_7C_F0_62,
            opcode: 0,
            reg: 0,
            rm: RegMem::reg(0),
            tuple_type: None,
            imm: None,
        }
    }
}

#[allow(non_upper_case_globals)] // This makes it easier to match the bit range names to the manual's names.
impl EvexInstruction {
    /// Construct a default EVEX instruction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the length of the instruction.
    #[inline(always)]
    pub fn length(mut self, length: EvexVectorLength) -> Self {
        self.write(Self::LL, length.bits() as u32);
        self
    }

    /// Set the legacy prefix byte of the instruction: None | 66 | F2 | F3.
    /// EVEX instructions pack these into the prefix, not as separate bytes.
    #[inline(always)]
    pub fn prefix(mut self, prefix: LegacyPrefixes) -> Self {
        self.write(Self::pp, prefix.bits() as u32);
        self
    }

    /// Set the opcode map byte of the instruction: None | 0F | 0F38 | 0F3A.
    /// EVEX instructions pack these into the prefix, not as separate bytes.
    #[inline(always)]
    pub fn map(mut self, map: OpcodeMap) -> Self {
        self.write(Self::mm, map.bits() as u32);
        self
    }

    /// Set the W bit, typically used to indicate an instruction using 64
    /// bits of an operand (e.g. 64-bit lanes). EVEX packs this bit in the
    /// prefix; previous encodings used the REX prefix.
    #[inline(always)]
    pub fn w(mut self, w: bool) -> Self {
        self.write(Self::W, w as u32);
        self
    }

    /// Set the instruction opcode byte.
    #[inline(always)]
    pub fn opcode(mut self, opcode: u8) -> Self {
        self.opcode = opcode;
        self
    }

    /// Set the "tuple type" which is used for 8-bit scaling when a memory
    /// operand is used.
    #[inline(always)]
    pub fn tuple_type(mut self, tt: TupleType) -> Self {
        self.tuple_type = Some(tt);
        self
    }

    /// Set the register to use for the `reg` bits; many instructions use
    /// this as the write operand. Setting this affects both the ModRM byte
    /// (`reg` section) and the EVEX prefix (the extension bits for register
    /// encodings > 8).
    #[inline(always)]
    pub fn reg(mut self, reg: u8) -> Self {
        self.reg = reg;
        let r = !(reg >> 3) & 1;
        let r_ = !(reg >> 4) & 1;
        self.write(Self::R, r as u32);
        self.write(Self::R_, r_ as u32);
        self
    }

    /// Some instructions use the ModRM.reg field as an opcode extension,
    /// denoted by a `/n` field in the manual. These do not touch the
    /// prefix extension bits.
    #[inline(always)]
    pub fn opcode_ext(mut self, n: u8) -> Self {
        self.reg = n;
        self
    }

    /// Set the mask to use. See section 2.6 in the Intel Software
    /// Developer's Manual, volume 2A, for more details.
    #[inline(always)]
    pub fn mask(mut self, mask: EvexMasking) -> Self {
        self.write(Self::aaa, mask.aaa_bits() as u32);
        self.write(Self::z, mask.z_bit() as u32);
        self
    }

    /// Set the `vvvvv` register; some instructions allow using this as a
    /// second, non-destructive source register in 3-operand instructions
    /// (e.g. 2 read, 1 write).
    #[inline(always)]
    pub fn vvvvv(mut self, reg: u8) -> Self {
        self.write(Self::vvvv, !(reg as u32) & 0b1111);
        self.write(Self::V_, !(reg as u32 >> 4) & 0b1);
        self
    }

    /// Set the register/memory operand for the `rm` bits. Setting this
    /// affects both the ModRM byte (`rm` section) and the EVEX prefix (the
    /// extension bits for register encodings > 8).
    #[inline(always)]
    pub fn rm(mut self, rm: impl Into<RegMem>) -> Self {
        // NB: See Table 2-31. 32-Register Support in 64-bit Mode Using EVEX
        // with Embedded REX Bits.
        self.rm = rm.into();
        let x = match &self.rm {
            RegMem::Reg { reg } => reg >> 4,
            RegMem::Mem {
                addr: Amode::ImmRegRegShift { index, .. },
            } => index.enc() >> 3,
            // This mode doesn't use the X bit, so leave it at 0.
            RegMem::Mem {
                addr: Amode::ImmReg { .. },
            } => 0,
        };
        // The X bit is stored in an inverted format, so invert it here.
        self.write(Self::X, u32::from(!x & 1));

        let b = match &self.rm {
            RegMem::Reg { reg } => reg >> 3,
            RegMem::Mem {
                addr: Amode::ImmReg { base, .. },
            } => base.enc() >> 3,
            RegMem::Mem {
                addr: Amode::ImmRegRegShift { base, .. },
            } => base.enc() >> 3,
        };
        // The B bit is stored in an inverted format, so invert it here.
        self.write(Self::B, u32::from(!b & 1));
        self
    }

    /// Set the imm byte.
    #[inline(always)]
    pub fn imm(mut self, imm: u8) -> Self {
        self.imm = Some(imm);
        self
    }

    /// Emit the EVEX-encoded instruction to the code sink:
    ///
    /// - the 4-byte EVEX prefix;
    /// - the opcode byte;
    /// - the ModR/M byte;
    /// - SIB and displacement bytes, if necessary;
    /// - an optional immediate.
    pub fn encode<S: ByteSink + ?Sized>(&self, sink: &mut S) {
        sink.put4(self.bits);
        sink.put1(self.opcode);

        match &self.rm {
            RegMem::Reg { reg } => {
                sink.put1(rex::encode_modrm(3, self.reg & 7, reg & 7));
            }
            RegMem::Mem { addr } => {
                let scaling = self.scaling_for_8bit_disp();
                rex::emit_modrm_sib_disp(sink, self.reg & 7, addr, Some(scaling));
            }
        }
        if let Some(imm) = self.imm {
            sink.put1(imm);
        }
    }

    // In order to simplify the encoding of the various bit ranges in the
    // prefix, we specify those ranges according to the table below
    // (extracted from the Intel Software Development Manual, volume 2A).
    // Remember that, because we pack the 4-byte prefix into a little-endian
    // `u32`, this chart should be read from right-to-left, top-to-bottom.
    // Note also that we start ranges at bit 8, leaving bits 0-7 for the
    // mandatory `0x62`.
    //         ┌───┬───┬───┬───┬───┬───┬───┬───┐
    // Byte 1: │ R │ X │ B │ R'│ 0 │ 0 │ m │ m │
    //         ├───┼───┼───┼───┼───┼───┼───┼───┤
    // Byte 2: │ W │ v │ v │ v │ v │ 1 │ p │ p │
    //         ├───┼───┼───┼───┼───┼───┼───┼───┤
    // Byte 3: │ z │ L'│ L │ b │ V'│ a │ a │ a │
    //         └───┴───┴───┴───┴───┴───┴───┴───┘

    // Byte 1:
    const mm: RangeInclusive<u8> = 8..=9;
    const R_: RangeInclusive<u8> = 12..=12;
    const B: RangeInclusive<u8> = 13..=13;
    const X: RangeInclusive<u8> = 14..=14;
    const R: RangeInclusive<u8> = 15..=15;

    // Byte 2:
    const pp: RangeInclusive<u8> = 16..=17;
    const vvvv: RangeInclusive<u8> = 19..=22;
    const W: RangeInclusive<u8> = 23..=23;

    // Byte 3:
    const aaa: RangeInclusive<u8> = 24..=26;
    const V_: RangeInclusive<u8> = 27..=27;
    const b: RangeInclusive<u8> = 28..=28;
    const LL: RangeInclusive<u8> = 29..=30;
    const z: RangeInclusive<u8> = 31..=31;

    // A convenience method for writing the `value` bits to the given range
    // in `self.bits`.
    #[inline]
    fn write(&mut self, range: RangeInclusive<u8>, value: u32) {
        let size = range.end() - range.start() + 1;
        let mask: u32 = (1 << size) - 1;
        debug_assert!(
            value <= mask,
            "the written value should have fewer than {size} bits"
        );
        // Clear the bits in `range`; otherwise the OR below may allow
        // previously-set bits to slip through.
        self.bits &= !(mask << *range.start());
        self.bits |= value << *range.start();
    }

    /// A convenience method for reading a given range of bits in
    /// `self.bits`, shifted to the LSB of the returned value.
    #[inline]
    fn read(&self, range: RangeInclusive<u8>) -> u32 {
        (self.bits >> range.start()) & ((1 << range.len()) - 1)
    }

    fn scaling_for_8bit_disp(&self) -> i8 {
        use TupleType::*;

        let vector_size_scaling = || match self.read(Self::LL) {
            0b00 => 16,
            0b01 => 32,
            0b10 => 64,
            _ => unreachable!(),
        };

        match self.tuple_type {
            Some(Full) | Some(FullMem) => vector_size_scaling(),
            None => panic!("tuple type was not set"),
        }
    }
}

/// The EVEX "tuple type" of an instruction, which determines the scaling
/// factor applied to 8-bit displacements (section 2.7.5, Intel Software
/// Development Manual, volume 2A). Only the tuples this crate emits are
/// listed; `Full` would diverge from `FullMem` if embedded broadcast were
/// in use, which it is not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TupleType {
    Full,
    FullMem,
}

/// The EVEX format allows choosing a vector length in the `L'` and `L`
/// bits.
#[derive(Clone, Copy)]
pub enum EvexVectorLength {
    V128,
    V256,
    V512,
}

impl EvexVectorLength {
    /// Encode the `L'` and `L` bits.
    fn bits(self) -> u8 {
        match self {
            Self::V128 => 0b00,
            Self::V256 => 0b01,
            Self::V512 => 0b10,
            // 0b11 is reserved (#UD).
        }
    }
}

impl Default for EvexVectorLength {
    fn default() -> Self {
        Self::V128
    }
}

/// Defines the EVEX masking behavior; masking support is described in
/// section 2.6.4 of the Intel Software Development Manual, volume 2A.
#[derive(Clone, Copy)]
pub enum EvexMasking {
    None,
    Merging { k: u8 },
    Zeroing { k: u8 },
}

impl Default for EvexMasking {
    fn default() -> Self {
        EvexMasking::None
    }
}

impl EvexMasking {
    /// Encode the `z` bit.
    pub fn z_bit(&self) -> u8 {
        match self {
            Self::None | Self::Merging { .. } => 0,
            Self::Zeroing { .. } => 1,
        }
    }

    /// Encode the `aaa` bits.
    pub fn aaa_bits(&self) -> u8 {
        match self {
            Self::None => 0b000,
            Self::Merging { k } | Self::Zeroing { k } => {
                debug_assert!(*k <= 7);
                *k
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Gpr;

    // As a sanity test, we verify that the output of `xed-asmparse-main
    // 'vpabsq xmm0{k0}, xmm1'` matches this EVEX encoding machinery.
    #[test]
    fn vpabsq() {
        let tests: &[(u8, RegMem, Vec<u8>)] = &[
            // vpabsq %xmm1, %xmm0
            (0, RegMem::reg(1), vec![0x62, 0xf2, 0xfd, 0x08, 0x1f, 0xc1]),
            // vpabsq %xmm8, %xmm10
            (10, RegMem::reg(8), vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0xd0]),
            // vpabsq %xmm15, %xmm3
            (3, RegMem::reg(15), vec![0x62, 0xd2, 0xfd, 0x08, 0x1f, 0xdf]),
            // vpabsq (%rsi), %xmm12
            (
                12,
                RegMem::mem(Amode::imm_reg(0, Gpr::new(6))),
                vec![0x62, 0x72, 0xfd, 0x08, 0x1f, 0x26],
            ),
            // vpabsq 8(%r15), %xmm14
            (
                14,
                RegMem::mem(Amode::imm_reg(8, Gpr::new(15))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0xb7, 0x08, 0x00, 0x00, 0x00],
            ),
            // vpabsq 16(%r15), %xmm14
            (
                14,
                RegMem::mem(Amode::imm_reg(16, Gpr::new(15))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0x77, 0x01],
            ),
            // vpabsq 17(%rax), %xmm3
            (
                3,
                RegMem::mem(Amode::imm_reg(17, Gpr::new(0))),
                vec![0x62, 0xf2, 0xfd, 0x08, 0x1f, 0x98, 0x11, 0x00, 0x00, 0x00],
            ),
            // vpabsq (%rbx, %rsi, 8), %xmm9
            (
                9,
                RegMem::mem(Amode::imm_reg_reg_shift(0, Gpr::new(3), Gpr::new(6), 3)),
                vec![0x62, 0x72, 0xfd, 0x08, 0x1f, 0x0c, 0xf3],
            ),
            // vpabsq 1(%r11, %rdi, 4), %xmm13
            (
                13,
                RegMem::mem(Amode::imm_reg_reg_shift(1, Gpr::new(11), Gpr::new(7), 2)),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0xac, 0xbb, 0x01, 0x00, 0x00, 0x00],
            ),
            // vpabsq 128(%rsp, %r10, 2), %xmm5
            (
                5,
                RegMem::mem(Amode::imm_reg_reg_shift(128, Gpr::new(4), Gpr::new(10), 1)),
                vec![0x62, 0xb2, 0xfd, 0x08, 0x1f, 0x6c, 0x54, 0x08],
            ),
            // vpabsq 112(%rbp, %r13, 1), %xmm6
            (
                6,
                RegMem::mem(Amode::imm_reg_reg_shift(112, Gpr::new(5), Gpr::new(13), 0)),
                vec![0x62, 0xb2, 0xfd, 0x08, 0x1f, 0x74, 0x2d, 0x07],
            ),
            // vpabsq (%rbp, %r13, 1), %xmm7
            (
                7,
                RegMem::mem(Amode::imm_reg_reg_shift(0, Gpr::new(5), Gpr::new(13), 0)),
                vec![0x62, 0xb2, 0xfd, 0x08, 0x1f, 0x7c, 0x2d, 0x00],
            ),
            // vpabsq 2032(%r12), %xmm8
            (
                8,
                RegMem::mem(Amode::imm_reg(2032, Gpr::new(12))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0x44, 0x24, 0x7f],
            ),
            // vpabsq 2048(%r13), %xmm9
            (
                9,
                RegMem::mem(Amode::imm_reg(2048, Gpr::new(13))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0x8d, 0x00, 0x08, 0x00, 0x00],
            ),
            // vpabsq -16(%r14), %xmm10
            (
                10,
                RegMem::mem(Amode::imm_reg(-16, Gpr::new(14))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0x56, 0xff],
            ),
            // vpabsq -5(%r15), %xmm11
            (
                11,
                RegMem::mem(Amode::imm_reg(-5, Gpr::new(15))),
                vec![0x62, 0x52, 0xfd, 0x08, 0x1f, 0x9f, 0xfb, 0xff, 0xff, 0xff],
            ),
            // vpabsq -2048(%rdx), %xmm12
            (
                12,
                RegMem::mem(Amode::imm_reg(-2048, Gpr::new(2))),
                vec![0x62, 0x72, 0xfd, 0x08, 0x1f, 0x62, 0x80],
            ),
            // vpabsq -2064(%rsi), %xmm13
            (
                13,
                RegMem::mem(Amode::imm_reg(-2064, Gpr::new(6))),
                vec![0x62, 0x72, 0xfd, 0x08, 0x1f, 0xae, 0xf0, 0xf7, 0xff, 0xff],
            ),
        ];

        for (dst, src, encoding) in tests {
            let mut sink = vec![];
            EvexInstruction::new()
                .prefix(LegacyPrefixes::_66)
                .map(OpcodeMap::_0F38)
                .w(true)
                .opcode(0x1F)
                .reg(*dst)
                .rm(*src)
                .length(EvexVectorLength::V128)
                .tuple_type(TupleType::Full)
                .encode(&mut sink);
            assert_eq!(sink.as_slice(), encoding.as_slice(), "dst={dst:?} src={src:?}");
        }
    }

    /// Verify that the defaults are equivalent to an instruction with a
    /// `0x00` opcode using the "0" register, with sane defaults for the
    /// various configurable parameters. This test is more interesting than
    /// it may appear because some of the parameters have flipped-bit
    /// representations (e.g. `vvvvv`), so emitting 0s as a default will not
    /// work.
    #[test]
    fn default_emission() {
        let mut sink = vec![];
        EvexInstruction::new().encode(&mut sink);

        let mut sink1 = vec![];
        EvexInstruction::new()
            .length(EvexVectorLength::V128)
            .prefix(LegacyPrefixes::None)
            .map(OpcodeMap::None)
            .w(false)
            .opcode(0x00)
            .reg(0)
            .rm(RegMem::reg(0))
            .mask(EvexMasking::None)
            .encode(&mut sink1);

        assert_eq!(sink, sink1);
    }
}

//! Encodes instructions in the standard x86 encoding mode, i.e. the
//! REX-prefix format, plus the ModRM/SIB/displacement machinery shared with
//! the VEX and EVEX formats.
//!
//! For all of the routines that take both a memory-or-reg operand (sometimes
//! called "E" in the Intel documentation, see the Intel Developer's manual,
//! vol. 2, section A.2) and a reg-only operand ("G" in Intel-ese), the order
//! is always G first, then E. The term "enc" in the following means
//! "hardware register encoding number".

use crate::buffer::ByteSink;
use crate::isa::x64::args::Amode;
use crate::isa::x64::regs;

pub(crate) fn low8_will_sign_extend_to_32(x: i32) -> bool {
    x == ((x << 24) >> 24)
}

/// Encode the ModR/M byte.
#[inline(always)]
pub fn encode_modrm(m0d: u8, enc_reg_g: u8, rm_e: u8) -> u8 {
    debug_assert!(m0d < 4);
    debug_assert!(enc_reg_g < 8);
    debug_assert!(rm_e < 8);
    ((m0d & 3) << 6) | ((enc_reg_g & 7) << 3) | (rm_e & 7)
}

/// Encode the SIB byte.
#[inline(always)]
pub(crate) fn encode_sib(shift: u8, enc_index: u8, enc_base: u8) -> u8 {
    debug_assert!(shift < 4);
    debug_assert!(enc_index < 8);
    debug_assert!(enc_base < 8);
    ((shift & 3) << 6) | ((enc_index & 7) << 3) | (enc_base & 7)
}

/// Allows using the same opcode byte in different "opcode maps" to allow for
/// more instruction encodings. See appendix A in the Intel Software
/// Developer's Manual, volume 2A, for more details.
#[derive(Clone, Copy, PartialEq)]
pub enum OpcodeMap {
    None,
    _0F,
    _0F38,
    _0F3A,
}

impl OpcodeMap {
    /// Normally the opcode map is specified as bytes in the instruction, but
    /// some x64 encoding formats pack this information as bits in a prefix
    /// (e.g. VEX / EVEX).
    pub(crate) fn bits(&self) -> u8 {
        match self {
            OpcodeMap::None => 0b00,
            OpcodeMap::_0F => 0b01,
            OpcodeMap::_0F38 => 0b10,
            OpcodeMap::_0F3A => 0b11,
        }
    }
}

impl Default for OpcodeMap {
    fn default() -> Self {
        Self::None
    }
}

/// We may need to include one or more legacy prefix bytes before the REX
/// prefix. This enum covers only the small set of possibilities that we
/// actually need.
#[derive(Clone, Copy, PartialEq)]
pub enum LegacyPrefixes {
    /// No prefix bytes.
    None,
    /// Operand Size Override -- here, denoting "16-bit operation".
    _66,
    /// REPNE, but no specific meaning here -- is just an opcode extension.
    _F2,
    /// REP/REPE, but no specific meaning here -- is just an opcode extension.
    _F3,
}

impl LegacyPrefixes {
    /// Emit the legacy prefix as bits (e.g. for EVEX instructions).
    #[inline(always)]
    pub(crate) fn bits(&self) -> u8 {
        match self {
            Self::None => 0b00,
            Self::_66 => 0b01,
            Self::_F3 => 0b10,
            Self::_F2 => 0b11,
        }
    }

    /// Emit the prefix as one (or zero) opcode bytes, for the legacy
    /// REX-format instructions that don't pack it into a prefix group.
    #[inline(always)]
    pub(crate) fn emit<S: ByteSink + ?Sized>(&self, sink: &mut S) {
        match self {
            Self::None => {}
            Self::_66 => sink.put1(0x66),
            Self::_F2 => sink.put1(0xF2),
            Self::_F3 => sink.put1(0xF3),
        }
    }
}

impl Default for LegacyPrefixes {
    fn default() -> Self {
        Self::None
    }
}

/// Emit a REX prefix byte computed from the W bit and the three extension
/// bits, omitting it when redundant (0x40).
#[inline(always)]
pub(crate) fn emit_rex<S: ByteSink + ?Sized>(sink: &mut S, w: bool, r: u8, x: u8, b: u8) {
    let rex = 0x40 | ((w as u8) << 3) | ((r & 1) << 2) | ((x & 1) << 1) | (b & 1);
    if rex != 0x40 {
        sink.put1(rex);
    }
}

pub(crate) fn emit_modrm_sib_disp<S: ByteSink + ?Sized>(
    sink: &mut S,
    enc_g: u8,
    mem_e: &Amode,
    evex_scaling: Option<i8>,
) {
    match *mem_e {
        Amode::ImmReg { simm32, base } => {
            let enc_e = base.enc();
            let mut imm = Imm::new(simm32, evex_scaling);

            // Most base registers allow for a single ModRM byte plus an
            // optional immediate. If rsp is the base register, however, then
            // a SIB byte must be used.
            let enc_e_low3 = enc_e & 7;
            if enc_e_low3 != regs::ENC_RSP {
                // If the base register is rbp and there's no offset then
                // force a 1-byte zero offset since otherwise the encoding
                // would be invalid.
                if enc_e_low3 == regs::ENC_RBP {
                    imm.force_immediate();
                }
                sink.put1(encode_modrm(imm.m0d(), enc_g & 7, enc_e & 7));
                imm.emit(sink);
            } else {
                // Displacement from RSP is encoded with a SIB byte where the
                // index and base are both encoded as RSP's encoding of
                // 0b100. This special encoding means that the index register
                // isn't used and the base is 0b100 with or without a
                // REX-encoded 4th bit (e.g. rsp or r12).
                sink.put1(encode_modrm(imm.m0d(), enc_g & 7, 0b100));
                sink.put1(0b00_100_100);
                imm.emit(sink);
            }
        }

        Amode::ImmRegRegShift {
            simm32,
            base,
            index,
            shift,
        } => {
            let enc_base = base.enc();
            let enc_index = index.enc();

            // Encoding of ModRM/SIB bytes doesn't allow the index register
            // to ever be rsp. Note, though, that the encoding of r12, whose
            // three lower bits match the encoding of rsp, is explicitly
            // allowed with REX bytes, so only rsp is disallowed.
            debug_assert!(enc_index != regs::ENC_RSP);

            // If the offset is zero then there is no immediate. Note,
            // though, that if the base register's lower three bits are `101`
            // then an offset must be present. This is a special case in the
            // encoding of the SIB byte and requires an explicit displacement
            // with rbp/r13.
            let mut imm = Imm::new(simm32, evex_scaling);
            if enc_base & 7 == regs::ENC_RBP {
                imm.force_immediate();
            }

            // With the above determined encode the ModRM byte, then the SIB
            // byte, then any immediate as necessary.
            sink.put1(encode_modrm(imm.m0d(), enc_g & 7, 0b100));
            sink.put1(encode_sib(shift, enc_index & 7, enc_base & 7));
            imm.emit(sink);
        }
    }
}

#[derive(Copy, Clone)]
enum Imm {
    None,
    Imm8(i8),
    Imm32(i32),
}

impl Imm {
    /// Classifies the 32-bit immediate `val` as how this can be encoded with
    /// ModRM/SIB bytes.
    ///
    /// For `evex_scaling`, according to Section 2.7.5 of Intel's manual:
    ///
    /// > EVEX-encoded instructions always use a compressed displacement
    /// > scheme by multiplying disp8 in conjunction with a scaling factor N
    /// > that is determined based on the vector length, the value of EVEX.b
    /// > bit (embedded broadcast) and the input element size of the
    /// > instruction
    ///
    /// The `evex_scaling` factor provided here is `Some(N)` for EVEX
    /// instructions. This is taken into account where the `Imm` value
    /// contained is the raw byte offset.
    fn new(val: i32, evex_scaling: Option<i8>) -> Imm {
        if val == 0 {
            return Imm::None;
        }
        match evex_scaling {
            Some(scaling) => {
                if val % i32::from(scaling) == 0 {
                    let scaled = val / i32::from(scaling);
                    if low8_will_sign_extend_to_32(scaled) {
                        return Imm::Imm8(scaled as i8);
                    }
                }
                Imm::Imm32(val)
            }
            None => match i8::try_from(val) {
                Ok(val) => Imm::Imm8(val),
                Err(_) => Imm::Imm32(val),
            },
        }
    }

    /// Forces `Imm::None` to become `Imm::Imm8(0)`, used for special cases
    /// where some base registers require an immediate.
    fn force_immediate(&mut self) {
        if let Imm::None = self {
            *self = Imm::Imm8(0);
        }
    }

    /// Returns the two "mod" bits present at the upper bits of the mod/rm
    /// byte.
    fn m0d(&self) -> u8 {
        match self {
            Imm::None => 0b00,
            Imm::Imm8(_) => 0b01,
            Imm::Imm32(_) => 0b10,
        }
    }

    fn emit<S: ByteSink + ?Sized>(&self, sink: &mut S) {
        match self {
            Imm::None => {}
            Imm::Imm8(n) => sink.put1(*n as u8),
            Imm::Imm32(n) => sink.put4(*n as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Gpr;

    #[test]
    fn modrm_packing() {
        assert_eq!(encode_modrm(0b11, 0b000, 0b001), 0xC1);
        assert_eq!(encode_modrm(0b00, 0b111, 0b101), 0x3D);
        assert_eq!(encode_sib(3, 0b110, 0b011), 0xF3);
    }

    #[test]
    fn disp_selection() {
        // mov-style field emission for `16(%rax)`: disp8.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(16, Gpr::new(0)), None);
        assert_eq!(sink, vec![0x40, 0x10]);

        // `0(%rbp)` must still carry a zero disp8.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(0, Gpr::new(5)), None);
        assert_eq!(sink, vec![0x45, 0x00]);

        // `0(%rsp)` needs the SIB escape.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(0, Gpr::new(4)), None);
        assert_eq!(sink, vec![0x04, 0x24]);

        // Out-of-range disp8 falls back to disp32.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(0x1234, Gpr::new(0)), None);
        assert_eq!(sink, vec![0x80, 0x34, 0x12, 0x00, 0x00]);
    }

    #[test]
    fn evex_scaled_disp() {
        // 64-byte-scaled displacement compresses to disp8.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(128, Gpr::new(1)), Some(64));
        assert_eq!(sink, vec![0x41, 0x02]);

        // Unaligned displacement cannot compress.
        let mut sink = vec![];
        emit_modrm_sib_disp(&mut sink, 0, &Amode::imm_reg(17, Gpr::new(1)), Some(64));
        assert_eq!(sink, vec![0x81, 0x11, 0x00, 0x00, 0x00]);
    }
}

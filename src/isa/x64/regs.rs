//! Registers of the x86-64 backend, and printing.
//!
//! All registers are caller-chosen hardware encoding numbers; nothing here
//! allocates. Named constructors are provided for the registers that appear
//! in caller code and tests.

use crate::reg::{Gpr, Kreg};

// Hardware encodings for the registers that get special ModRM/SIB
// treatment.

pub const ENC_RAX: u8 = 0;
pub const ENC_RCX: u8 = 1;
pub const ENC_RSP: u8 = 4;
pub const ENC_RBP: u8 = 5;
pub const ENC_R12: u8 = 12;
pub const ENC_R13: u8 = 13;
pub const ENC_R15: u8 = 15;

pub fn rax() -> Gpr {
    Gpr::new(ENC_RAX)
}
pub fn rcx() -> Gpr {
    Gpr::new(ENC_RCX)
}
pub fn rdx() -> Gpr {
    Gpr::new(2)
}
pub fn rbx() -> Gpr {
    Gpr::new(3)
}
pub fn rsp() -> Gpr {
    Gpr::new(ENC_RSP)
}
pub fn rbp() -> Gpr {
    Gpr::new(ENC_RBP)
}
pub fn rsi() -> Gpr {
    Gpr::new(6)
}
pub fn rdi() -> Gpr {
    Gpr::new(7)
}
pub fn r8() -> Gpr {
    Gpr::new(8)
}
pub fn r9() -> Gpr {
    Gpr::new(9)
}
pub fn r10() -> Gpr {
    Gpr::new(10)
}
pub fn r11() -> Gpr {
    Gpr::new(11)
}
pub fn r12() -> Gpr {
    Gpr::new(ENC_R12)
}
pub fn r13() -> Gpr {
    Gpr::new(ENC_R13)
}
pub fn r14() -> Gpr {
    Gpr::new(14)
}

/// The conventional scratch-buffer base register. The renderer keeps a
/// pinned pointer to the scratch region here for the lifetime of a kernel.
pub fn r15() -> Gpr {
    Gpr::new(ENC_R15)
}

pub fn k1() -> Kreg {
    Kreg::new(1)
}
pub fn k2() -> Kreg {
    Kreg::new(2)
}
pub fn k3() -> Kreg {
    Kreg::new(3)
}
pub fn k4() -> Kreg {
    Kreg::new(4)
}
pub fn k5() -> Kreg {
    Kreg::new(5)
}
pub fn k6() -> Kreg {
    Kreg::new(6)
}
pub fn k7() -> Kreg {
    Kreg::new(7)
}

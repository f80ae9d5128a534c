//! Encoding mechanisms for the x86-64 instruction formats.
//!
//! `rex` covers the legacy one-byte-prefix format shared by scalar
//! instructions and the ModRM/SIB/displacement machinery every format ends
//! with; `vex` and `evex` cover the packed-prefix vector formats. All three
//! write through [`crate::buffer::ByteSink`], so they can target either a
//! [`crate::buffer::CodeBuffer`] or a plain `Vec<u8>`.

pub mod evex;
pub mod rex;
pub mod vex;

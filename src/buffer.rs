//! In-memory representation of emitted machine code, with labels and fixups
//! to refer to those labels.
//!
//! This is a single-pass emission buffer: instructions append bytes as they
//! are encoded, forward branch targets are recorded as label uses with zeroed
//! offset fields, and `finish` patches every recorded use once all labels are
//! bound. The kernels this crate emits are short straight-line runs, so a
//! 32-bit relative form always reaches and no island/veneer machinery is
//! needed.

use smallvec::SmallVec;

/// Offset in bytes from the beginning of the buffer.
pub type CodeOffset = u32;

/// A byte sink for instruction encoders. Implemented by [`CodeBuffer`] and by
/// `Vec<u8>` so that encoding mechanisms can be exercised (and benchmarked)
/// without a full buffer.
pub trait ByteSink {
    /// Add 1 byte to the code section.
    fn put1(&mut self, _: u8);

    /// Add 2 bytes to the code section, little-endian.
    fn put2(&mut self, _: u16);

    /// Add 4 bytes to the code section, little-endian.
    fn put4(&mut self, _: u32);

    /// Add 8 bytes to the code section, little-endian.
    fn put8(&mut self, _: u64);
}

impl ByteSink for Vec<u8> {
    fn put1(&mut self, v: u8) {
        self.push(v);
    }
    fn put2(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }
    fn put4(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }
    fn put8(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }
}

/// A label refers to some offset in emitted code. It may not be resolved at
/// the point at which it is used by emitted code; the buffer records the use
/// and patches the offset in once the label is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(u32);

impl Label {
    /// Get the label's index.
    pub fn get(self) -> u32 {
        self.0
    }
}

/// The kind of a label reference: how many bytes the patch site occupies and
/// what the offset is relative to. Both forms are relative to the *end* of
/// the patch field, matching the x64 rel8/rel32 branch encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelUse {
    /// A signed 8-bit displacement.
    Rel8,
    /// A signed 32-bit displacement.
    Rel32,
}

impl LabelUse {
    fn patch_size(self) -> u32 {
        match self {
            LabelUse::Rel8 => 1,
            LabelUse::Rel32 => 4,
        }
    }
}

/// A use of a label, to be patched in `finish`.
#[derive(Clone, Copy, Debug)]
struct Fixup {
    /// Offset of the first byte of the patch field.
    offset: CodeOffset,
    label: Label,
    kind: LabelUse,
}

/// A code buffer accepting bytes and label references from instruction
/// emission.
#[derive(Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
    /// Bound offset of each allocated label, indexed by label number.
    label_offsets: Vec<Option<CodeOffset>>,
    fixups: SmallVec<[Fixup; 8]>,
}

impl CodeBuffer {
    /// Create a new, empty code buffer.
    pub fn new() -> CodeBuffer {
        CodeBuffer::default()
    }

    /// Current offset from the start of the buffer.
    pub fn cur_offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Allocate a new label. The label is unbound until `bind_label`.
    pub fn get_label(&mut self) -> Label {
        let l = Label(self.label_offsets.len() as u32);
        self.label_offsets.push(None);
        l
    }

    /// Bind a label to the current offset. A label may be bound only once.
    pub fn bind_label(&mut self, label: Label) {
        let slot = &mut self.label_offsets[label.get() as usize];
        debug_assert!(slot.is_none(), "label {label:?} bound twice");
        *slot = Some(self.data.len() as CodeOffset);
    }

    /// Inform the buffer of an unresolved label reference at the given
    /// offset, to be patched when the label is bound. The patch field must
    /// already have been emitted (as zeroes or a bias value to be added to).
    pub fn use_label_at_offset(&mut self, offset: CodeOffset, label: Label, kind: LabelUse) {
        debug_assert!(offset + kind.patch_size() <= self.cur_offset());
        self.fixups.push(Fixup {
            offset,
            label,
            kind,
        });
    }

    /// Add bytes to the buffer.
    pub fn put_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Borrow the bytes emitted so far. Label fixups may not have been
    /// applied yet; use `finish` for the final image.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Apply all label fixups and return the finished code bytes.
    ///
    /// Panics if any referenced label was never bound, or if a displacement
    /// does not fit its patch field; both are programming errors in the
    /// emitter, not conditions a caller can provoke with valid input.
    pub fn finish(mut self) -> Vec<u8> {
        for fixup in core::mem::take(&mut self.fixups) {
            let target = self.label_offsets[fixup.label.get() as usize]
                .unwrap_or_else(|| panic!("label {:?} never bound", fixup.label));
            let field_end = fixup.offset + fixup.kind.patch_size();
            let rel = (target as i64) - (field_end as i64);
            let site = fixup.offset as usize;
            match fixup.kind {
                LabelUse::Rel8 => {
                    let rel8 = i8::try_from(rel).expect("rel8 branch target out of range");
                    self.data[site] = self.data[site].wrapping_add(rel8 as u8);
                }
                LabelUse::Rel32 => {
                    let rel32 = i32::try_from(rel).expect("rel32 branch target out of range");
                    let old = i32::from_le_bytes(self.data[site..site + 4].try_into().unwrap());
                    let patched = old.wrapping_add(rel32);
                    self.data[site..site + 4].copy_from_slice(&patched.to_le_bytes());
                }
            }
        }
        self.data
    }
}

impl ByteSink for CodeBuffer {
    fn put1(&mut self, v: u8) {
        self.data.push(v);
    }
    fn put2(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }
    fn put4(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }
    fn put8(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_little_endian() {
        let mut buf = CodeBuffer::new();
        buf.put1(0x01);
        buf.put2(0x0302);
        buf.put4(0x0708_0605);
        assert_eq!(buf.data(), &[0x01, 0x02, 0x03, 0x05, 0x06, 0x07, 0x08]);
        buf.put8(0x0807_0605_0403_0201);
        assert_eq!(buf.cur_offset(), 15);
    }

    #[test]
    fn backward_label_resolves() {
        let mut buf = CodeBuffer::new();
        let l = buf.get_label();
        buf.bind_label(l);
        // A two-byte "branch" whose rel8 field is the second byte.
        buf.put1(0xEB);
        buf.put1(0x00);
        buf.use_label_at_offset(1, l, LabelUse::Rel8);
        let bytes = buf.finish();
        // Target is offset 0, field ends at 2: rel = -2.
        assert_eq!(bytes, vec![0xEB, 0xFE]);
    }

    #[test]
    fn forward_label_resolves() {
        let mut buf = CodeBuffer::new();
        let l = buf.get_label();
        buf.put1(0xE9);
        buf.put4(0);
        buf.use_label_at_offset(1, l, LabelUse::Rel32);
        buf.put1(0x90);
        buf.bind_label(l);
        let bytes = buf.finish();
        // Field ends at 5, target at 6: rel = 1.
        assert_eq!(bytes, vec![0xE9, 0x01, 0x00, 0x00, 0x00, 0x90]);
    }

    #[test]
    fn rel32_bias_is_added_to() {
        // Some encodings pre-bias the field (e.g. trailing immediates after a
        // rip-relative displacement); the patch must add, not overwrite.
        let mut buf = CodeBuffer::new();
        let l = buf.get_label();
        buf.put4((-1i32) as u32);
        buf.use_label_at_offset(0, l, LabelUse::Rel32);
        buf.bind_label(l);
        let bytes = buf.finish();
        // rel = 4 - 4 = 0, plus bias -1.
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xFF]);
    }
}

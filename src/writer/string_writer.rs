//! Variable-length string blobs.
//!
//! Both shapes share the same framing: a `u32` byte count of the character
//! data, the characters, and a NUL terminator that is *not* included in the
//! count. Thread, module, and CSD-version strings are UTF-16; the annotation
//! records use UTF-8.

use scroll::Pwrite;

use super::writable::{Writable, WritableBase, WritableState};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::MDRVA;

/// A `u32`-length-prefixed, NUL-terminated UTF-16 string blob.
pub struct MinidumpUtf16StringWriter {
    base: WritableBase,
    units: Vec<u16>,
}

impl MinidumpUtf16StringWriter {
    pub fn new(string: &str) -> Self {
        Self {
            base: WritableBase::new(),
            units: string.encode_utf16().collect(),
        }
    }

    /// Converts possibly ill-formed UTF-8, substituting U+FFFD for each
    /// offending sequence. The conversion happens here, once, not during
    /// emission.
    pub fn from_utf8_lossy(bytes: &[u8]) -> Self {
        Self::new(&String::from_utf8_lossy(bytes))
    }

    /// The string's file offset, for `register_rva`-style back-references.
    /// Valid once laid out.
    pub fn rva(&self) -> MDRVA {
        self.base.rva()
    }

    fn data_len(&self) -> usize {
        self.units.len() * 2
    }
}

impl Writable for MinidumpUtf16StringWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        // length + data + u16 NUL
        4 + self.data_len() as u64 + 2
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.data_len() as u32, &mut offset, scroll::LE)?;
        for unit in &self.units {
            buf.as_mut_slice().gwrite_with(*unit, &mut offset, scroll::LE)?;
        }
        // The trailing NUL is already zero from the allocation

        writer.write(&buf)?;
        Ok(())
    }
}

/// A `u32`-length-prefixed, NUL-terminated UTF-8 string blob.
pub struct MinidumpUtf8StringWriter {
    base: WritableBase,
    string: String,
}

impl MinidumpUtf8StringWriter {
    pub fn new(string: &str) -> Self {
        Self {
            base: WritableBase::new(),
            string: string.to_owned(),
        }
    }

    pub fn rva(&self) -> MDRVA {
        self.base.rva()
    }
}

impl Writable for MinidumpUtf8StringWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        4 + self.string.len() as u64 + 1
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = Vec::with_capacity(self.size_of_object() as usize);
        buf.extend_from_slice(&(self.string.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.string.as_bytes());
        buf.push(0);

        writer.write(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_writer::BufferWriter;
    use crate::writer::writable::{freeze_tree, layout_tree, resolve_tree, write_tree};

    fn emit(node: &mut dyn Writable) -> Vec<u8> {
        freeze_tree(node).unwrap();
        let mut offset = 0;
        layout_tree(node, &mut offset).unwrap();
        resolve_tree(node).unwrap();

        let mut sink = BufferWriter::new();
        let mut position = 0;
        write_tree(node, &mut sink, &mut position, 0).unwrap();
        sink.into_inner()
    }

    #[test]
    fn utf16_layout_matches_the_format() {
        let mut writer = MinidumpUtf16StringWriter::new("Ab");
        let bytes = emit(&mut writer);

        // 4 length bytes, 2 units, u16 NUL
        assert_eq!(
            bytes,
            [4, 0, 0, 0, b'A', 0, b'b', 0, 0, 0]
        );
    }

    #[test]
    fn utf16_empty_string_is_just_length_and_terminator() {
        let mut writer = MinidumpUtf16StringWriter::new("");
        assert_eq!(emit(&mut writer), [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn utf16_converts_beyond_the_bmp_to_surrogate_pairs() {
        let mut writer = MinidumpUtf16StringWriter::new("\u{1f4a5}");
        let bytes = emit(&mut writer);

        // one code point, two UTF-16 units
        assert_eq!(&bytes[..4], &[4, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x3d, 0xd8, 0xa5, 0xdc]);
    }

    #[test]
    fn ill_formed_utf8_is_replaced_per_sequence() {
        // 'a', an unfinished 3-byte sequence, 'z'
        let mut writer = MinidumpUtf16StringWriter::from_utf8_lossy(b"a\xe2\x82z");
        let bytes = emit(&mut writer);

        assert_eq!(&bytes[..4], &[6, 0, 0, 0]);
        assert_eq!(&bytes[4..6], &[b'a', 0]);
        assert_eq!(&bytes[6..8], &[0xfd, 0xff]); // U+FFFD
        assert_eq!(&bytes[8..10], &[b'z', 0]);
        assert_eq!(&bytes[10..12], &[0, 0]);
    }

    #[test]
    fn utf8_layout_matches_the_format() {
        let mut writer = MinidumpUtf8StringWriter::new("key");
        assert_eq!(
            emit(&mut writer),
            [3, 0, 0, 0, b'k', b'e', b'y', 0]
        );
    }
}

//! The thread-name-list stream.
//!
//! Entries reference their UTF-16 name strings with 64-bit RVAs; the rest of
//! the format stays at 32 bits, so the widening happens here.

use scroll::Pwrite;

use super::string_writer::MinidumpUtf16StringWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;

/// One `{thread_id, name}` pair. The fixed entry is written by the parent
/// list; the string is this node's child.
pub struct MinidumpThreadNameWriter {
    base: WritableBase,
    raw: MDRawThreadName,
    name: MinidumpUtf16StringWriter,
}

impl MinidumpThreadNameWriter {
    pub fn new(thread_id: u32, name: &str) -> Self {
        Self {
            base: WritableBase::new(),
            raw: MDRawThreadName {
                thread_id,
                thread_name_rva: 0,
            },
            name: MinidumpUtf16StringWriter::new(name),
        }
    }

    fn raw(&self) -> &MDRawThreadName {
        debug_assert!(self.base.state() >= WritableState::Writable);
        &self.raw
    }
}

impl Writable for MinidumpThreadNameWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        0
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        vec![&mut self.name]
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.thread_name_rva = MDRVA64::from(self.name.rva());
        Ok(())
    }

    fn write_object(&mut self, _writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        Ok(())
    }
}

/// The stream itself: a `u32` count followed by the entries.
pub struct MinidumpThreadNameListWriter {
    base: WritableBase,
    names: Vec<MinidumpThreadNameWriter>,
    count: u32,
}

impl Default for MinidumpThreadNameListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpThreadNameListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            names: Vec::new(),
            count: 0,
        }
    }

    pub fn add_thread_name(&mut self, name: MinidumpThreadNameWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.names.push(name);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Writable for MinidumpThreadNameListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("thread name count", self.names.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDRawThreadName>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.names
            .iter_mut()
            .map(|name| name as &mut dyn Writable)
            .collect()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for name in &self.names {
            buf.as_mut_slice()
                .gwrite_with(name.raw().clone(), &mut offset, scroll::LE)?;
        }

        writer.write(&buf)?;
        Ok(())
    }
}

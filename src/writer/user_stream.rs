//! Caller-supplied streams with arbitrary tags.
//!
//! The payload either lives in a buffer handed over up front or is pulled
//! from a captured memory range while the dump is being emitted.

use super::memory::stream_memory;
use super::writable::{Writable, WritableBase, WritableState};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::snapshot::MemorySnapshot;

/// Where a user stream's bytes come from.
pub enum UserStreamContents {
    Buffer(Vec<u8>),
    Memory(MemorySnapshot),
}

impl UserStreamContents {
    fn len(&self) -> u64 {
        match self {
            UserStreamContents::Buffer(bytes) => bytes.len() as u64,
            UserStreamContents::Memory(memory) => memory.size,
        }
    }
}

pub struct MinidumpUserStreamWriter {
    base: WritableBase,
    stream_type: u32,
    contents: UserStreamContents,
}

impl MinidumpUserStreamWriter {
    pub fn new(stream_type: u32, contents: UserStreamContents) -> Self {
        Self {
            base: WritableBase::new(),
            stream_type,
            contents,
        }
    }

    pub fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

impl Writable for MinidumpUserStreamWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        self.contents.len()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        match &self.contents {
            UserStreamContents::Buffer(bytes) => {
                writer.write(bytes)?;
                Ok(())
            }
            UserStreamContents::Memory(memory) => stream_memory(memory, writer),
        }
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
    fn buffer_backed_streams_emit_their_bytes_verbatim() {
        let mut stream =
            MinidumpUserStreamWriter::new(0x4242, UserStreamContents::Buffer(vec![9, 8, 7]));
        assert_eq!(stream.stream_type(), 0x4242);
        assert_eq!(emit(&mut stream), [9, 8, 7]);
    }

    #[test]
    fn memory_backed_streams_pull_through_the_reader() {
        let memory = MemorySnapshot::from_bytes(0xccc0, vec![0x61; 10]);
        let mut stream = MinidumpUserStreamWriter::new(0x9, UserStreamContents::Memory(memory));
        assert_eq!(emit(&mut stream), vec![0x61; 10]);
    }
}

//! Captured memory ranges and the memory-list stream.
//!
//! A region's bytes are pulled through its snapshot reader while the second
//! pass runs, in bounded chunks, so a large stack never has to sit in this
//! process's heap. The same blob can be referenced from both a thread entry
//! and the memory list; it is only ever written once, as a child of whichever
//! node owns it.

use scroll::Pwrite;

use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::MemorySnapshot;

/// How many bytes of a region are read from the target at a time.
const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// The blob of one captured memory range.
pub struct MinidumpMemoryWriter {
    base: WritableBase,
    memory: MemorySnapshot,
}

impl MinidumpMemoryWriter {
    pub fn new(memory: MemorySnapshot) -> Self {
        Self {
            base: WritableBase::new(),
            memory,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.memory.base_address
    }

    pub fn size(&self) -> u64 {
        self.memory.size
    }

    /// The `{base_address, {offset, size}}` record other streams embed to
    /// reference this blob. Valid once laid out.
    pub fn descriptor(&self) -> MDMemoryDescriptor {
        MDMemoryDescriptor {
            start_of_memory_range: self.memory.base_address,
            memory: self.base.location(),
        }
    }
}

impl Writable for MinidumpMemoryWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        self.memory.size
    }

    fn alignment(&self) -> u64 {
        // Keeps dumped ranges paragraph-aligned so analyzers can map them
        16
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        stream_memory(&self.memory, writer)
    }
}

/// Streams a region's bytes through `writer`. A failing reader fails the
/// whole dump; there is no partial-region recovery.
pub(crate) fn stream_memory(
    memory: &MemorySnapshot,
    writer: &mut dyn FileWriterInterface,
) -> Result<()> {
    let mut offset = 0;
    while offset < memory.size {
        failspot::failspot!(<crate::FailSpotName>::ReadMemoryRegion
            bail(crate::snapshot::MemoryReadError::Unreadable {
                address: memory.base_address + offset,
                len: memory.size - offset,
            }));

        let len = (memory.size - offset).min(READ_CHUNK_SIZE);
        let bytes = memory.read(offset, len)?;
        writer.write(&bytes)?;
        offset += len;
    }
    Ok(())
}

/// The memory-list stream: every explicitly preserved range, thread stacks
/// included.
///
/// Thread stacks are owned by their thread entries, so this stream only
/// stores their descriptors; they are handed over by the file writer once
/// the layout pass has produced them. Regions added directly are owned (and
/// therefore written) here.
pub struct MinidumpMemoryListWriter {
    base: WritableBase,
    extra: Vec<MinidumpMemoryWriter>,
    expected_stack_count: usize,
    stack_descriptors: Vec<MDMemoryDescriptor>,
    count: u32,
}

impl Default for MinidumpMemoryListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpMemoryListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            extra: Vec::new(),
            expected_stack_count: 0,
            stack_descriptors: Vec::new(),
            count: 0,
        }
    }

    /// Adds a region this list owns. Regions that alias an already-added
    /// one by `(base_address, size)` identity are dropped.
    pub fn add_memory(&mut self, memory: MinidumpMemoryWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);

        let aliased = self.extra.iter().any(|existing| {
            existing.base_address() == memory.base_address() && existing.size() == memory.size()
        });
        if aliased {
            log::debug!(
                "dropping duplicate memory range {:#x}+{:#x}",
                memory.base_address(),
                memory.size()
            );
            return;
        }
        self.extra.push(memory);
    }

    /// Whether `(base_address, size)` already has an owned entry.
    pub fn contains(&self, base_address: u64, size: u64) -> bool {
        self.extra
            .iter()
            .any(|existing| existing.base_address() == base_address && existing.size() == size)
    }

    /// Declares how many thread-stack descriptors will arrive after layout.
    /// Must be called before the freeze, since the entry count is part of
    /// this stream's size.
    pub fn reserve_thread_stacks(&mut self, count: usize) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.expected_stack_count = count;
    }

    /// Hands over the stack descriptors the thread list produced during
    /// layout. Called by the file writer between the layout and resolve
    /// steps.
    pub(crate) fn set_thread_stacks(
        &mut self,
        descriptors: Vec<MDMemoryDescriptor>,
    ) -> Result<()> {
        if descriptors.len() != self.expected_stack_count {
            return Err(super::WriterError::StackCountMismatch {
                expected: self.expected_stack_count,
                received: descriptors.len(),
            });
        }
        self.stack_descriptors = descriptors;
        Ok(())
    }
}

impl Writable for MinidumpMemoryListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked(
            "memory list count",
            (self.expected_stack_count + self.extra.len()) as u64,
        )?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDMemoryDescriptor>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.extra
            .iter_mut()
            .map(|memory| memory as &mut dyn Writable)
            .collect()
    }

    fn resolve(&mut self) -> Result<()> {
        if self.stack_descriptors.len() != self.expected_stack_count {
            return Err(super::WriterError::StackCountMismatch {
                expected: self.expected_stack_count,
                received: self.stack_descriptors.len(),
            });
        }
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for descriptor in &self.stack_descriptors {
            buf.as_mut_slice()
                .gwrite_with(descriptor.clone(), &mut offset, scroll::LE)?;
        }
        for memory in &self.extra {
            buf.as_mut_slice()
                .gwrite_with(memory.descriptor(), &mut offset, scroll::LE)?;
        }

        writer.write(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::snapshot::MemorySnapshot;

    fn region(base: u64, bytes: &[u8]) -> MemorySnapshot {
        MemorySnapshot::from_bytes(base, bytes.to_vec())
    }

    #[test]
    fn duplicate_ranges_are_dropped_by_identity() {
        let mut list = MinidumpMemoryListWriter::new();
        list.add_memory(MinidumpMemoryWriter::new(region(0x1000, &[1, 2, 3, 4])));
        list.add_memory(MinidumpMemoryWriter::new(region(0x1000, &[1, 2, 3, 4])));
        // same base, different size: not an alias
        list.add_memory(MinidumpMemoryWriter::new(region(0x1000, &[1, 2])));

        assert_eq!(list.extra.len(), 2);
        assert!(list.contains(0x1000, 4));
        assert!(list.contains(0x1000, 2));
    }

    #[test]
    fn resolve_fails_when_promised_stacks_never_arrive() {
        let mut list = MinidumpMemoryListWriter::new();
        list.reserve_thread_stacks(1);

        assert!(matches!(
            list.resolve(),
            Err(super::super::WriterError::StackCountMismatch {
                expected: 1,
                received: 0
            })
        ));
    }
}

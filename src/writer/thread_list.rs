//! The thread-list stream.
//!
//! A thread's fixed-size entry lives inside the list's own bytes; its
//! context blob and (optionally) its stack bytes are children of the thread
//! node and land after the table. Stacks are additionally referenced from
//! the memory-list stream when one is present, without writing the bytes a
//! second time.

use scroll::Pwrite;

use super::context::MinidumpContextWriter;
use super::memory::MinidumpMemoryWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::ThreadSnapshot;

/// One thread: the `MDRawThread` entry plus the blobs it references.
///
/// The entry itself is written by the parent [`MinidumpThreadListWriter`];
/// this node contributes no bytes of its own.
pub struct MinidumpThreadWriter {
    base: WritableBase,
    raw: MDRawThread,
    context: MinidumpContextWriter,
    stack: Option<MinidumpMemoryWriter>,
}

impl MinidumpThreadWriter {
    /// A thread always carries a context; the stack may be absent if the
    /// thread's memory was unreadable.
    pub fn new(context: MinidumpContextWriter) -> Self {
        Self {
            base: WritableBase::new(),
            raw: MDRawThread {
                thread_id: 0,
                suspend_count: 0,
                priority_class: 0,
                priority: 0,
                teb: 0,
                stack: empty_memory_descriptor(),
                thread_context: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
            },
            context,
            stack: None,
        }
    }

    pub fn from_snapshot(thread: &ThreadSnapshot) -> Self {
        let mut writer = Self::new(MinidumpContextWriter::new(thread.context.clone()));
        writer.set_thread_id(thread.thread_id);
        writer.set_suspend_count(thread.suspend_count);
        writer.set_priority_class(thread.priority_class);
        writer.set_priority(thread.priority);
        writer.set_teb(thread.teb);
        if let Some(stack) = &thread.stack {
            writer.set_stack(MinidumpMemoryWriter::new(stack.clone()));
        }
        writer
    }

    pub fn set_thread_id(&mut self, thread_id: u32) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.raw.thread_id = thread_id;
    }

    pub fn set_suspend_count(&mut self, suspend_count: u32) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.raw.suspend_count = suspend_count;
    }

    pub fn set_priority_class(&mut self, priority_class: u32) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.raw.priority_class = priority_class;
    }

    pub fn set_priority(&mut self, priority: u32) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.raw.priority = priority;
    }

    pub fn set_teb(&mut self, teb: u64) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.raw.teb = teb;
    }

    pub fn set_stack(&mut self, stack: MinidumpMemoryWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.stack = Some(stack);
    }

    pub fn thread_id(&self) -> u32 {
        self.raw.thread_id
    }

    /// The stack's descriptor, if this thread has one. Valid once laid out.
    pub fn stack_descriptor(&self) -> Option<MDMemoryDescriptor> {
        self.stack.as_ref().map(|stack| stack.descriptor())
    }

    /// The finished `MDRawThread` entry. Valid once resolved.
    fn raw(&self) -> &MDRawThread {
        debug_assert!(self.base.state() >= WritableState::Writable);
        &self.raw
    }
}

impl Writable for MinidumpThreadWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        // The MDRawThread is written by the parent list
        0
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        let mut children: Vec<&mut dyn Writable> = Vec::with_capacity(2);
        if let Some(stack) = &mut self.stack {
            children.push(stack);
        }
        children.push(&mut self.context);
        children
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.thread_context = self.context.location();
        if let Some(stack) = &self.stack {
            self.raw.stack = stack.descriptor();
        }
        Ok(())
    }

    fn write_object(&mut self, _writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        // Nothing of its own; children write themselves
        Ok(())
    }
}

/// The thread-list stream: a `u32` count followed by the thread entries.
pub struct MinidumpThreadListWriter {
    base: WritableBase,
    threads: Vec<MinidumpThreadWriter>,
    count: u32,
}

impl Default for MinidumpThreadListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpThreadListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            threads: Vec::new(),
            count: 0,
        }
    }

    pub fn add_thread(&mut self, thread: MinidumpThreadWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.threads.push(thread);
    }

    pub fn threads(&self) -> &[MinidumpThreadWriter] {
        &self.threads
    }

    /// How many threads will contribute a stack to the memory list.
    pub fn stack_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|thread| thread.stack.is_some())
            .count()
    }

    /// Stack descriptors in thread order. Valid once laid out; used by the
    /// file writer to feed the memory-list stream.
    pub(crate) fn stack_descriptors(&self) -> Vec<MDMemoryDescriptor> {
        self.threads
            .iter()
            .filter_map(|thread| thread.stack_descriptor())
            .collect()
    }
}

impl Writable for MinidumpThreadListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("thread count", self.threads.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDRawThread>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.threads
            .iter_mut()
            .map(|thread| thread as &mut dyn Writable)
            .collect()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for thread in &self.threads {
            buf.as_mut_slice()
                .gwrite_with(thread.raw().clone(), &mut offset, scroll::LE)?;
        }

        writer.write(&buf)?;
        Ok(())
    }
}

pub(crate) fn empty_memory_descriptor() -> MDMemoryDescriptor {
    MDMemoryDescriptor {
        start_of_memory_range: 0,
        memory: MDLocationDescriptor {
            data_size: 0,
            rva: 0,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_writer::BufferWriter;
    use crate::snapshot::{CpuContext, MemorySnapshot};
    use crate::writer::writable::{freeze_tree, layout_tree, resolve_tree, write_tree};
    use scroll::Pread;

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
    fn stack_bytes_precede_the_context_blob() {
        let mut thread = MinidumpThreadWriter::new(MinidumpContextWriter::new(
            CpuContext::new_amd64(),
        ));
        thread.set_thread_id(7);
        thread.set_stack(MinidumpMemoryWriter::new(MemorySnapshot::from_bytes(
            0x2000,
            vec![0xfe; 24],
        )));

        let mut list = MinidumpThreadListWriter::new();
        list.add_thread(thread);
        let bytes = emit(&mut list);

        let count: u32 = bytes.pread_with(0, scroll::LE).unwrap();
        assert_eq!(count, 1);
        let raw: MDRawThread = bytes.pread_with(4, scroll::LE).unwrap();

        // Stack first, then the context, both after the entry table
        assert!(raw.stack.memory.rva >= 4 + 48);
        assert!(raw.thread_context.rva > raw.stack.memory.rva);
        assert_eq!(raw.stack.memory.rva % 16, 0);
        assert_eq!(raw.thread_context.rva % 16, 0);
        assert_eq!(raw.stack.start_of_memory_range, 0x2000);
        assert_eq!(raw.stack.memory.data_size, 24);

        let stack = raw.stack.memory.rva as usize;
        assert_eq!(&bytes[stack..stack + 24], &[0xfe; 24]);
    }

    #[test]
    fn stack_descriptors_cover_only_threads_with_stacks() {
        let mut with_stack = MinidumpThreadWriter::new(MinidumpContextWriter::new(
            CpuContext::new_amd64(),
        ));
        with_stack.set_thread_id(1);
        with_stack.set_stack(MinidumpMemoryWriter::new(MemorySnapshot::from_bytes(
            0x5000,
            vec![0; 16],
        )));

        let mut without_stack = MinidumpThreadWriter::new(MinidumpContextWriter::new(
            CpuContext::new_amd64(),
        ));
        without_stack.set_thread_id(2);

        let mut list = MinidumpThreadListWriter::new();
        list.add_thread(with_stack);
        list.add_thread(without_stack);
        assert_eq!(list.stack_count(), 1);

        let _ = emit(&mut list);
        let descriptors = list.stack_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].start_of_memory_range, 0x5000);
    }
}

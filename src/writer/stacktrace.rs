//! The raw-stacktrace stream: pre-walked frames with their symbol names,
//! packed as header + threads + frames + one shared symbol byte pool.
//!
//! Stacks themselves are captured as raw memory; this stream exists for
//! producers that already hold a walked trace (for instance from an
//! in-process unwinder) and want the analyzer to skip unwinding.

use std::io::IoSlice;

use scroll::Pwrite;

use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::ThreadSnapshot;

pub struct MinidumpStacktraceListWriter {
    base: WritableBase,
    header: MDRawStackTraceHeader,
    threads: Vec<MDRawStackTraceThread>,
    frames: Vec<MDRawStackTraceFrame>,
    symbol_bytes: Vec<u8>,
}

impl Default for MinidumpStacktraceListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpStacktraceListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            header: MDRawStackTraceHeader {
                version: MD_STACK_TRACE_VERSION,
                num_threads: 0,
                num_frames: 0,
                symbol_bytes: 0,
            },
            threads: Vec::new(),
            frames: Vec::new(),
            symbol_bytes: Vec::new(),
        }
    }

    pub fn from_snapshot(threads: &[ThreadSnapshot]) -> Self {
        let mut writer = Self::new();
        for thread in threads {
            writer.add_thread(thread);
        }
        writer
    }

    pub fn add_thread(&mut self, thread: &ThreadSnapshot) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);

        let start_frame = self.frames.len() as u32;
        for frame in &thread.frames {
            let symbol = frame.symbol.as_bytes();
            self.frames.push(MDRawStackTraceFrame {
                instruction_addr: frame.instruction_addr,
                symbol_offset: self.symbol_bytes.len() as u32,
                symbol_len: symbol.len() as u32,
            });
            self.symbol_bytes.extend_from_slice(symbol);
        }

        self.threads.push(MDRawStackTraceThread {
            thread_id: u64::from(thread.thread_id),
            start_frame,
            num_frames: self.frames.len() as u32 - start_frame,
        });
    }
}

impl Writable for MinidumpStacktraceListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.header.num_threads = assign_checked("stacktrace threads", self.threads.len() as u64)?;
        self.header.num_frames = assign_checked("stacktrace frames", self.frames.len() as u64)?;
        self.header.symbol_bytes =
            assign_checked("stacktrace symbol bytes", self.symbol_bytes.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawStackTraceHeader>()
            + self.threads.len() as u64 * size_of_md::<MDRawStackTraceThread>()
            + self.frames.len() as u64 * size_of_md::<MDRawStackTraceFrame>()
            + self.symbol_bytes.len() as u64
    }

    fn alignment(&self) -> u64 {
        // The thread and frame records start with u64 fields
        8
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut head = vec![
            0u8;
            (size_of_md::<MDRawStackTraceHeader>()
                + self.threads.len() as u64 * size_of_md::<MDRawStackTraceThread>()
                + self.frames.len() as u64 * size_of_md::<MDRawStackTraceFrame>())
                as usize
        ];
        let mut offset = 0;
        head.as_mut_slice()
            .gwrite_with(self.header.clone(), &mut offset, scroll::LE)?;
        for thread in &self.threads {
            head.as_mut_slice()
                .gwrite_with(thread.clone(), &mut offset, scroll::LE)?;
        }
        for frame in &self.frames {
            head.as_mut_slice()
                .gwrite_with(frame.clone(), &mut offset, scroll::LE)?;
        }

        let mut iovecs = [IoSlice::new(&head), IoSlice::new(&self.symbol_bytes)];
        writer.write_iovec(&mut iovecs)?;
        Ok(())
    }
}

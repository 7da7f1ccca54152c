//! Assembles a full writer tree from a [`ProcessSnapshot`].

use std::time::UNIX_EPOCH;

use super::crashpad_info::MinidumpCrashpadInfoWriter;
use super::exception::MinidumpExceptionWriter;
use super::file::MinidumpFileWriter;
use super::memory::{MinidumpMemoryListWriter, MinidumpMemoryWriter};
use super::misc_info::MinidumpMiscInfoWriter;
use super::module_list::{MinidumpModuleListWriter, MinidumpModuleWriter};
use super::stacktrace::MinidumpStacktraceListWriter;
use super::system_info::MinidumpSystemInfoWriter;
use super::thread_list::{MinidumpThreadListWriter, MinidumpThreadWriter};
use super::thread_names::{MinidumpThreadNameListWriter, MinidumpThreadNameWriter};
use super::user_stream::{MinidumpUserStreamWriter, UserStreamContents};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::snapshot::ProcessSnapshot;

/// What goes into a dump beyond the always-present streams.
#[derive(Default)]
pub struct DumpOptions {
    /// Emit the raw-stacktrace stream for threads that carry pre-walked
    /// frames.
    pub stack_traces: bool,
    /// Extra tagged streams to append verbatim.
    pub user_streams: Vec<(u32, UserStreamContents)>,
}

impl MinidumpFileWriter {
    /// Builds the complete stream set for `process`.
    ///
    /// Stream order is fixed: system info, misc info, thread list, thread
    /// names, exception, module list, extension info, stack traces, user
    /// streams, and the memory list last, so that every stack captured by
    /// the thread list is accounted for.
    pub fn from_snapshot(process: &ProcessSnapshot, options: DumpOptions) -> Result<Self> {
        let mut dump = Self::new();

        let timestamp = process
            .snapshot_time
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        dump.set_timestamp(timestamp)?;

        dump.add_stream(MinidumpSystemInfoWriter::from_snapshot(&process.system)?)?;
        dump.add_stream(MinidumpMiscInfoWriter::from_snapshot(process))?;

        let mut thread_list = MinidumpThreadListWriter::new();
        for thread in &process.threads {
            thread_list.add_thread(MinidumpThreadWriter::from_snapshot(thread));
        }
        let stack_count = thread_list.stack_count();
        let stack_ranges: Vec<(u64, u64)> = process
            .threads
            .iter()
            .filter_map(|thread| thread.stack.as_ref())
            .map(|stack| (stack.base_address, stack.size))
            .collect();
        dump.add_stream(thread_list)?;

        let mut thread_names = MinidumpThreadNameListWriter::new();
        for thread in &process.threads {
            if let Some(name) = &thread.name {
                thread_names.add_thread_name(MinidumpThreadNameWriter::new(thread.thread_id, name));
            }
        }
        if !thread_names.is_empty() {
            dump.add_stream(thread_names)?;
        }

        if let Some(exception) = &process.exception {
            if !process
                .threads
                .iter()
                .any(|thread| thread.thread_id == exception.thread_id)
            {
                // Best-effort captures may have lost the faulting thread;
                // the stream is still worth writing
                log::warn!(
                    "exception references thread {} which is not in the thread list",
                    exception.thread_id
                );
            }
            dump.add_stream(MinidumpExceptionWriter::from_snapshot(exception)?)?;
        }

        let mut module_list = MinidumpModuleListWriter::new();
        for module in &process.modules {
            module_list.add_module(MinidumpModuleWriter::from_snapshot(module)?);
        }
        dump.add_stream(module_list)?;

        let crashpad_info = MinidumpCrashpadInfoWriter::from_snapshot(process);
        if crashpad_info.is_useful() {
            dump.add_stream(crashpad_info)?;
        }

        if options.stack_traces {
            dump.add_stream(MinidumpStacktraceListWriter::from_snapshot(
                &process.threads,
            ))?;
        }

        for (stream_type, contents) in options.user_streams {
            dump.add_stream(MinidumpUserStreamWriter::new(stream_type, contents))?;
        }

        // Stacks are already children of their threads; regions that alias
        // one by (address, size) identity must not be written twice
        let mut memory_list = MinidumpMemoryListWriter::new();
        memory_list.reserve_thread_stacks(stack_count);
        for memory in &process.extra_memory {
            let aliases_stack = stack_ranges
                .iter()
                .any(|(base, size)| *base == memory.base_address && *size == memory.size);
            if aliases_stack {
                log::debug!(
                    "memory range {:#x}+{:#x} already captured as a thread stack",
                    memory.base_address,
                    memory.size
                );
                continue;
            }
            memory_list.add_memory(MinidumpMemoryWriter::new(memory.clone()));
        }
        dump.add_stream(memory_list)?;

        Ok(dump)
    }
}

/// Captures `process` into `writer` in one call.
pub fn write_minidump(
    process: &ProcessSnapshot,
    options: DumpOptions,
    writer: &mut dyn FileWriterInterface,
) -> Result<()> {
    MinidumpFileWriter::from_snapshot(process, options)?.write_everything(writer)
}

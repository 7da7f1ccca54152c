//! Two-pass streaming serializer for minidump files.
//!
//! Every region that occupies bytes in the output is a node in a tree of
//! [`Writable`]s rooted at [`MinidumpFileWriter`]. The first pass freezes the
//! tree, assigns each node an absolute offset (inserting zero padding to
//! honor each node's alignment), and patches every cross-reference; the
//! second pass emits bytes in the exact same order. Nothing is buffered
//! beyond individual records, and the header's signature field is only
//! stamped once the whole file is on disk, so a truncated dump can never be
//! mistaken for a valid one.

mod context;
mod crashpad_info;
mod exception;
mod file;
mod memory;
mod misc_info;
mod module_list;
mod snapshot;
mod stacktrace;
mod string_writer;
mod system_info;
mod thread_list;
mod thread_names;
mod user_stream;
mod writable;

pub use context::MinidumpContextWriter;
pub use crashpad_info::{
    MinidumpAnnotationListWriter, MinidumpAnnotationWriter, MinidumpByteArrayWriter,
    MinidumpCrashpadInfoWriter, MinidumpModuleCrashpadInfoListWriter,
    MinidumpModuleCrashpadInfoWriter, MinidumpRvaListWriter,
    MinidumpSimpleStringDictionaryWriter,
};
pub use exception::MinidumpExceptionWriter;
pub use file::{MinidumpFileWriter, MinidumpStreamWriter};
pub use memory::{MinidumpMemoryListWriter, MinidumpMemoryWriter};
pub use misc_info::MinidumpMiscInfoWriter;
pub use module_list::{MinidumpCvRecordWriter, MinidumpMiscDebugRecordWriter,
    MinidumpModuleListWriter, MinidumpModuleWriter};
pub use snapshot::{DumpOptions, write_minidump};
pub use stacktrace::MinidumpStacktraceListWriter;
pub use string_writer::{MinidumpUtf8StringWriter, MinidumpUtf16StringWriter};
pub use system_info::MinidumpSystemInfoWriter;
pub use thread_list::{MinidumpThreadListWriter, MinidumpThreadWriter};
pub use thread_names::{MinidumpThreadNameListWriter, MinidumpThreadNameWriter};
pub use user_stream::{MinidumpUserStreamWriter, UserStreamContents};
pub use writable::{Writable, WritableBase, WritableState};

use crate::file_writer::FileWriterError;
use crate::minidump_format::MD_EXCEPTION_MAXIMUM_PARAMETERS;
use crate::snapshot::MemoryReadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("stream type {0:#x} is already present in the minidump")]
    DuplicateStreamType(u32),
    #[error("{field} value {value} is out of range for the minidump format")]
    OutOfRange { field: &'static str, value: u64 },
    #[error(
        "an exception record holds at most {MD_EXCEPTION_MAXIMUM_PARAMETERS} parameters, got {0}"
    )]
    TooManyExceptionParameters(usize),
    #[error("the memory list expected {expected} thread stacks but received {received}")]
    StackCountMismatch { expected: usize, received: usize },
    #[error(transparent)]
    FileWriter(#[from] FileWriterError),
    #[error(transparent)]
    MemoryRead(#[from] MemoryReadError),
    #[error("failed to serialize a minidump structure")]
    Serialize(#[from] scroll::Error),
}

type Result<T> = std::result::Result<T, WriterError>;

/// Range-checked narrowing into the `u32` fields the format is full of.
pub(crate) fn assign_checked(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| WriterError::OutOfRange { field, value })
}

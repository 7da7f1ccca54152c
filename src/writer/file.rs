//! The root of the writer tree: header, stream directory, and the streams
//! themselves.

use std::collections::HashSet;
use std::io::{IoSlice, SeekFrom};

use super::crashpad_info::MinidumpCrashpadInfoWriter;
use super::exception::MinidumpExceptionWriter;
use super::memory::MinidumpMemoryListWriter;
use super::misc_info::MinidumpMiscInfoWriter;
use super::module_list::MinidumpModuleListWriter;
use super::stacktrace::MinidumpStacktraceListWriter;
use super::system_info::MinidumpSystemInfoWriter;
use super::thread_list::MinidumpThreadListWriter;
use super::thread_names::MinidumpThreadNameListWriter;
use super::user_stream::MinidumpUserStreamWriter;
use super::writable::{
    Writable, WritableBase, WritableState, freeze_tree, layout_tree, resolve_tree, write_tree,
};
use super::{Result, WriterError, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;

/// A top-level stream and its directory tag.
pub enum MinidumpStreamWriter {
    SystemInfo(MinidumpSystemInfoWriter),
    MiscInfo(MinidumpMiscInfoWriter),
    ThreadList(MinidumpThreadListWriter),
    ThreadNames(MinidumpThreadNameListWriter),
    Exception(MinidumpExceptionWriter),
    ModuleList(MinidumpModuleListWriter),
    MemoryList(MinidumpMemoryListWriter),
    CrashpadInfo(MinidumpCrashpadInfoWriter),
    StackTraces(MinidumpStacktraceListWriter),
    User(MinidumpUserStreamWriter),
}

impl MinidumpStreamWriter {
    /// The tag recorded in the stream directory.
    pub fn stream_type(&self) -> u32 {
        match self {
            Self::SystemInfo(_) => MDStreamType::SystemInfoStream as u32,
            Self::MiscInfo(_) => MDStreamType::MiscInfoStream as u32,
            Self::ThreadList(_) => MDStreamType::ThreadListStream as u32,
            Self::ThreadNames(_) => MDStreamType::ThreadNamesStream as u32,
            Self::Exception(_) => MDStreamType::ExceptionStream as u32,
            Self::ModuleList(_) => MDStreamType::ModuleListStream as u32,
            Self::MemoryList(_) => MDStreamType::MemoryListStream as u32,
            Self::CrashpadInfo(_) => MDStreamType::CrashpadInfoStream as u32,
            Self::StackTraces(_) => MD_STREAM_TYPE_STACK_TRACES,
            Self::User(user) => user.stream_type(),
        }
    }

    fn as_writable_mut(&mut self) -> &mut dyn Writable {
        match self {
            Self::SystemInfo(writer) => writer,
            Self::MiscInfo(writer) => writer,
            Self::ThreadList(writer) => writer,
            Self::ThreadNames(writer) => writer,
            Self::Exception(writer) => writer,
            Self::ModuleList(writer) => writer,
            Self::MemoryList(writer) => writer,
            Self::CrashpadInfo(writer) => writer,
            Self::StackTraces(writer) => writer,
            Self::User(writer) => writer,
        }
    }

    fn as_writable(&self) -> &dyn Writable {
        match self {
            Self::SystemInfo(writer) => writer,
            Self::MiscInfo(writer) => writer,
            Self::ThreadList(writer) => writer,
            Self::ThreadNames(writer) => writer,
            Self::Exception(writer) => writer,
            Self::ModuleList(writer) => writer,
            Self::MemoryList(writer) => writer,
            Self::CrashpadInfo(writer) => writer,
            Self::StackTraces(writer) => writer,
            Self::User(writer) => writer,
        }
    }
}

macro_rules! stream_from(($variant:ident, $writer:ty) => {
    impl From<$writer> for MinidumpStreamWriter {
        fn from(writer: $writer) -> Self {
            Self::$variant(writer)
        }
    }
});

stream_from!(SystemInfo, MinidumpSystemInfoWriter);
stream_from!(MiscInfo, MinidumpMiscInfoWriter);
stream_from!(ThreadList, MinidumpThreadListWriter);
stream_from!(ThreadNames, MinidumpThreadNameListWriter);
stream_from!(Exception, MinidumpExceptionWriter);
stream_from!(ModuleList, MinidumpModuleListWriter);
stream_from!(MemoryList, MinidumpMemoryListWriter);
stream_from!(CrashpadInfo, MinidumpCrashpadInfoWriter);
stream_from!(StackTraces, MinidumpStacktraceListWriter);
stream_from!(User, MinidumpUserStreamWriter);

/// The minidump file.
///
/// Streams are added while mutable; [`write_everything`] then runs both
/// passes and leaves a complete file behind, or no valid file at all. The
/// header is emitted with a zero signature and only patched to the real
/// magic once every other byte is in place, so a dump interrupted by a
/// failure can never be mistaken for a valid one.
///
/// [`write_everything`]: MinidumpFileWriter::write_everything
pub struct MinidumpFileWriter {
    base: WritableBase,
    header: MDRawHeader,
    directory: Vec<MDRawDirectory>,
    streams: Vec<MinidumpStreamWriter>,
    stream_types: HashSet<u32>,
}

impl Default for MinidumpFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpFileWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            header: MDRawHeader {
                // Left zero until the whole dump is written; a partial file
                // must not look like a valid minidump
                signature: 0,
                version: MD_HEADER_VERSION,
                stream_count: 0,
                stream_directory_rva: 0,
                checksum: 0,
                time_date_stamp: 0,
                flags: MD_TYPE_NORMAL,
            },
            directory: Vec::new(),
            streams: Vec::new(),
            stream_types: HashSet::new(),
        }
    }

    /// Stamps the header with `timestamp` (seconds since the epoch).
    pub fn set_timestamp(&mut self, timestamp: u64) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.header.time_date_stamp = assign_checked("time_date_stamp", timestamp)?;
        Ok(())
    }

    /// Appends a stream. Directory order is insertion order; a stream type
    /// may only appear once, and a duplicate fails here, before any bytes
    /// exist.
    pub fn add_stream(&mut self, stream: impl Into<MinidumpStreamWriter>) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);

        let stream = stream.into();
        let stream_type = stream.stream_type();
        if !self.stream_types.insert(stream_type) {
            return Err(WriterError::DuplicateStreamType(stream_type));
        }
        self.streams.push(stream);
        Ok(())
    }

    /// Serializes the whole tree through `writer`.
    ///
    /// The dump's RVAs are relative to the writer's position at the time of
    /// the call; on return the writer sits just past the dump so trailing
    /// content can follow.
    pub fn write_everything(mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        let file_base = writer.current_offset()?;

        freeze_tree(&mut self)?;

        let mut end_offset = 0;
        layout_tree(&mut self, &mut end_offset)?;

        // Thread stacks live as children of their threads but are also
        // listed in the memory-list stream; hand their now-known locations
        // across the sibling boundary before references are resolved.
        self.connect_thread_stacks()?;

        resolve_tree(&mut self)?;

        let mut position = 0;
        write_tree(&mut self, writer, &mut position, file_base)?;

        let dump_end = writer.current_offset()?;

        // Everything is on disk; make the file identify as a minidump
        self.header.signature = MD_HEADER_SIGNATURE;
        writer.seek(SeekFrom::Start(file_base))?;
        writer.write(&serialize_md(self.header.clone())?)?;
        writer.seek(SeekFrom::Start(dump_end))?;

        Ok(())
    }

    fn connect_thread_stacks(&mut self) -> Result<()> {
        let descriptors = self.streams.iter().find_map(|stream| match stream {
            MinidumpStreamWriter::ThreadList(threads) => Some(threads.stack_descriptors()),
            _ => None,
        });

        if let Some(descriptors) = descriptors {
            let memory_list = self.streams.iter_mut().find_map(|stream| match stream {
                MinidumpStreamWriter::MemoryList(memory_list) => Some(memory_list),
                _ => None,
            });
            if let Some(memory_list) = memory_list {
                memory_list.set_thread_stacks(descriptors)?;
            }
        }
        Ok(())
    }
}

impl Writable for MinidumpFileWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        debug_assert_eq!(self.streams.len(), self.stream_types.len());

        self.header.stream_count = assign_checked("stream_count", self.streams.len() as u64)?;
        self.directory = self
            .streams
            .iter()
            .map(|stream| MDRawDirectory {
                stream_type: stream.stream_type(),
                location: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
            })
            .collect();
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawHeader>() + self.streams.len() as u64 * size_of_md::<MDRawDirectory>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.streams
            .iter_mut()
            .map(|stream| stream.as_writable_mut())
            .collect()
    }

    fn resolve(&mut self) -> Result<()> {
        // An empty dump is just a header; the directory only exists once
        // there is something to point at
        self.header.stream_directory_rva = if self.streams.is_empty() {
            0
        } else {
            let directory_offset =
                u64::from(self.base.location().rva) + size_of_md::<MDRawHeader>();
            assign_checked("stream_directory_rva", directory_offset)?
        };

        for (entry, stream) in self.directory.iter_mut().zip(&self.streams) {
            entry.location = stream.as_writable().base().location();
        }
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let header = serialize_md(self.header.clone())?;
        let mut entries = Vec::with_capacity(self.directory.len());
        for entry in &self.directory {
            entries.push(serialize_md(entry.clone())?);
        }

        let mut iovecs = Vec::with_capacity(1 + entries.len());
        iovecs.push(IoSlice::new(&header));
        for entry in &entries {
            iovecs.push(IoSlice::new(entry));
        }
        writer.write_iovec(&mut iovecs)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_writer::BufferWriter;
    use crate::writer::user_stream::UserStreamContents;

    #[test]
    fn duplicate_stream_types_fail_at_add_time() {
        let mut dump = MinidumpFileWriter::new();
        dump.add_stream(MinidumpUserStreamWriter::new(
            0x4d,
            UserStreamContents::Buffer(vec![1]),
        ))
        .unwrap();

        let err = dump
            .add_stream(MinidumpUserStreamWriter::new(
                0x4d,
                UserStreamContents::Buffer(vec![2]),
            ))
            .unwrap_err();
        assert!(matches!(err, WriterError::DuplicateStreamType(0x4d)));
    }

    #[test]
    fn dump_rvas_are_relative_to_the_writer_position() {
        let mut sink = BufferWriter::new();
        sink.write(b"prefix--").unwrap();

        let mut dump = MinidumpFileWriter::new();
        dump.add_stream(MinidumpUserStreamWriter::new(
            0x7e,
            UserStreamContents::Buffer(vec![0x36; 4]),
        ))
        .unwrap();
        dump.write_everything(&mut sink).unwrap();

        let bytes = sink.into_inner();
        assert_eq!(&bytes[..8], b"prefix--");
        // Signature sits at the dump's base, not the file's
        assert_eq!(&bytes[8..12], b"MDMP");
    }
}

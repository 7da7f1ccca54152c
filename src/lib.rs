//! Takes a snapshot of a (possibly dead) process and serializes it into a
//! minidump file, without ever holding the whole dump in memory.
//!
//! The crate is split along the seams of the problem:
//!
//! - [`snapshot`] is the passive model of a captured process: threads,
//!   modules, memory regions, the exception, CPU contexts, annotations.
//!   Producers (debugger-style readers, signal handlers, tests) build one,
//!   and it is immutable from then on.
//! - [`writer`] turns a snapshot into the bytes of a minidump. Every region
//!   of the output is a node in a tree of [`writer::Writable`]s; layout and
//!   cross-references are computed in a first pass, bytes are emitted in a
//!   second.
//! - [`file_writer`] is the sink abstraction the second pass writes through.
//! - [`registration`] implements the named-pipe handshake a client process
//!   uses to hand its crash events to a handler daemon.

// Because of the nature of this crate, there are lots of times we cast aliased types to `u64`
// Often, on 64-bit platforms, it's already that, so Clippy gets upset at the u64-to-u64
// conversion.
#![allow(clippy::useless_conversion)]

pub mod client_info;
pub mod file_writer;
pub mod minidump_format;
pub mod registration;
pub mod snapshot;
pub mod writer;

pub use file_writer::{BufferWriter, FileWriter, FileWriterInterface};
pub use snapshot::ProcessSnapshot;
pub use writer::{DumpOptions, MinidumpFileWriter, WriterError};

failspot::failspot_name! {
    pub enum FailSpotName {
        ReadMemoryRegion,
        FileWrite,
    }
}

//! The on-disk shapes of everything this crate emits.
//!
//! Wherever `minidump-common` defines a structure we use it directly (aliased
//! to the `MDRaw*` names used throughout the writer); the handful of
//! extension records it does not carry are defined here with hand-written
//! scroll impls so that every byte that reaches the file goes through the
//! same little-endian serialization path.

use scroll::ctx::{SizeWith, TryIntoCtx};
use scroll::{Endian, Pwrite};

pub use minidump_common::format::{
    self, CONTEXT_AMD64, CONTEXT_ARM, CONTEXT_ARM64, CONTEXT_X86, CPU_INFORMATION, GUID,
    MINIDUMP_STREAM_TYPE as MDStreamType, MiscInfoFlags, PlatformId, ProcessorArchitecture,
};

/* An MDRVA is an offset into the minidump file. The beginning of the
 * MDRawHeader is at offset 0. */
pub type MDRVA = u32;
/* Modules' thread-name entries reference their strings with 64-bit RVAs,
 * everything else in the format uses 32 bits. */
pub type MDRVA64 = u64;

pub type MDGUID = format::GUID;
pub type MDRawHeader = format::MINIDUMP_HEADER;
pub type MDRawDirectory = format::MINIDUMP_DIRECTORY;
pub type MDLocationDescriptor = format::MINIDUMP_LOCATION_DESCRIPTOR;
pub type MDMemoryDescriptor = format::MINIDUMP_MEMORY_DESCRIPTOR;
pub type MDRawThread = format::MINIDUMP_THREAD;
pub type MDRawThreadName = format::MINIDUMP_THREAD_NAME;
pub type MDRawModule = format::MINIDUMP_MODULE;
pub type MDVSFixedFileInfo = format::VS_FIXEDFILEINFO;
pub type MDRawSystemInfo = format::MINIDUMP_SYSTEM_INFO;
pub type MDException = format::MINIDUMP_EXCEPTION;
pub type MDRawExceptionStream = format::MINIDUMP_EXCEPTION_STREAM;
pub type MDRawMiscInfo = format::MINIDUMP_MISC_INFO_2;

/* For (MDRawHeader).signature and (MDRawHeader).version. Note that only the
 * low 16 bits of (MDRawHeader).version are MD_HEADER_VERSION. Per the
 * documentation, the high 16 bits are implementation-specific. */
pub const MD_HEADER_SIGNATURE: u32 = 0x504d444d; /* 'PMDM' */
pub const MD_HEADER_VERSION: u32 = 0x0000a793; /* 42899 */

/* For (MDRawHeader).flags. A normal minidump: thread list, module list,
 * system info, exception, and the memory referenced by the thread list. */
pub const MD_TYPE_NORMAL: u64 = 0;

/* The usable size of MDRawModule. The structure is tail-padded to a multiple
 * of 64 bits by some ABIs, but only this many bytes appear in a file. scroll
 * serializes field-by-field and therefore matches this count exactly. */
pub const MD_MODULE_SIZE: usize = 108;

/* (MDException).exception_information has room for this many parameters. */
pub const MD_EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/* For (MDVSFixedFileInfo).signature and .struct_version. */
pub const MD_VSFIXEDFILEINFO_SIGNATURE: u32 = 0xfeef04bd;
pub const MD_VSFIXEDFILEINFO_VERSION: u32 = 0x00010000;

/* CodeView record signatures, as they appear in the first four bytes of a
 * module's cv_record. */
pub const MD_CVINFOPDB70_SIGNATURE: u32 = 0x53445352; /* 'SDSR' (RSDS) */
pub const MD_CVINFOPDB20_SIGNATURE: u32 = 0x3031424e; /* '01BN' (NB10) */

/* CPU-context flag words. The leading word of every context blob carries one
 * of the MD_CONTEXT_* architecture bits plus the register-set bits below. */
pub const MD_CONTEXT_X86: u32 = 0x0001_0000;
pub const MD_CONTEXT_X86_FULL: u32 = MD_CONTEXT_X86 | 0x0000_0007; /* control | integer | segments */
pub const MD_CONTEXT_X86_ALL: u32 = MD_CONTEXT_X86_FULL | 0x0000_0038; /* + float | debug | extended */

pub const MD_CONTEXT_AMD64: u32 = 0x0010_0000;
pub const MD_CONTEXT_AMD64_FULL: u32 = MD_CONTEXT_AMD64 | 0x0000_000b; /* control | integer | float */
pub const MD_CONTEXT_AMD64_ALL: u32 = MD_CONTEXT_AMD64_FULL | 0x0000_0014; /* + segments | debug */

pub const MD_CONTEXT_ARM: u32 = 0x4000_0000;
pub const MD_CONTEXT_ARM_FULL: u32 = MD_CONTEXT_ARM | 0x0000_0006; /* integer | float */

pub const MD_CONTEXT_ARM64: u32 = 0x0040_0000;
pub const MD_CONTEXT_ARM64_FULL: u32 = MD_CONTEXT_ARM64 | 0x0000_0007; /* control | integer | float */

/* Stream type of the raw-stacktrace stream (see MDRawStackTraceHeader). The
 * tag spells "cats" on disk, "stac" read little-endian. */
pub const MD_STREAM_TYPE_STACK_TRACES: u32 = 0x7374_6163;

/* Version numbers of the extension records defined below. */
pub const MD_CRASHPAD_INFO_VERSION: u32 = 1;
pub const MD_MODULE_CRASHPAD_INFO_VERSION: u32 = 1;
pub const MD_STACK_TRACE_VERSION: u32 = 1;

/* Annotation type tags. Producers may define their own tags at or above
 * MD_ANNOTATION_TYPE_USER_DEFINED. */
pub const MD_ANNOTATION_TYPE_INVALID: u16 = 0;
pub const MD_ANNOTATION_TYPE_STRING: u16 = 1;
pub const MD_ANNOTATION_TYPE_USER_DEFINED: u16 = 0x8000;

/// The fixed portion of the extension-info stream
/// ([`MDStreamType::CrashpadInfoStream`]): stream version, the report and
/// client identifiers, and the locations of the process-level simple
/// annotation dictionary and the per-module annotation list.
#[derive(Clone, Debug)]
pub struct MDRawCrashpadInfo {
    pub version: u32,
    pub report_id: MDGUID,
    pub client_id: MDGUID,
    pub simple_annotations: MDLocationDescriptor,
    pub module_list: MDLocationDescriptor,
}

impl TryIntoCtx<Endian> for MDRawCrashpadInfo {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.version, &mut offset, ctx)?;
        dst.gwrite_with(self.report_id, &mut offset, ctx)?;
        dst.gwrite_with(self.client_id, &mut offset, ctx)?;
        dst.gwrite_with(self.simple_annotations, &mut offset, ctx)?;
        dst.gwrite_with(self.module_list, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawCrashpadInfo {
    fn size_with(ctx: &Endian) -> usize {
        4 + 2 * MDGUID::size_with(ctx) + 2 * MDLocationDescriptor::size_with(ctx)
    }
}

/// One element of the extension-info stream's module list, linking an entry
/// of the regular module-list stream (by index) to its annotation record.
#[derive(Clone, Debug)]
pub struct MDRawModuleCrashpadInfoLink {
    pub minidump_module_list_index: u32,
    pub location: MDLocationDescriptor,
}

impl TryIntoCtx<Endian> for MDRawModuleCrashpadInfoLink {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.minidump_module_list_index, &mut offset, ctx)?;
        dst.gwrite_with(self.location, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawModuleCrashpadInfoLink {
    fn size_with(ctx: &Endian) -> usize {
        4 + MDLocationDescriptor::size_with(ctx)
    }
}

/// Per-module annotation record: a list of free-form annotation strings, a
/// key→value dictionary, and a list of typed annotation objects.
#[derive(Clone, Debug)]
pub struct MDRawModuleCrashpadInfo {
    pub version: u32,
    pub list_annotations: MDLocationDescriptor,
    pub simple_annotations: MDLocationDescriptor,
    pub annotation_objects: MDLocationDescriptor,
}

impl TryIntoCtx<Endian> for MDRawModuleCrashpadInfo {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.version, &mut offset, ctx)?;
        dst.gwrite_with(self.list_annotations, &mut offset, ctx)?;
        dst.gwrite_with(self.simple_annotations, &mut offset, ctx)?;
        dst.gwrite_with(self.annotation_objects, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawModuleCrashpadInfo {
    fn size_with(ctx: &Endian) -> usize {
        4 + 3 * MDLocationDescriptor::size_with(ctx)
    }
}

/// One key→value pair of a simple annotation dictionary. Both RVAs reference
/// UTF-8 string blobs.
#[derive(Clone, Debug)]
pub struct MDRawSimpleStringDictionaryEntry {
    pub key: MDRVA,
    pub value: MDRVA,
}

impl TryIntoCtx<Endian> for MDRawSimpleStringDictionaryEntry {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.key, &mut offset, ctx)?;
        dst.gwrite_with(self.value, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawSimpleStringDictionaryEntry {
    fn size_with(_ctx: &Endian) -> usize {
        8
    }
}

/// A typed annotation object: `name` references a UTF-8 string blob, `value`
/// a raw byte array whose meaning is selected by `ty`.
#[derive(Clone, Debug)]
pub struct MDRawAnnotation {
    pub name: MDRVA,
    pub ty: u16,
    pub reserved: u16,
    pub value: MDLocationDescriptor,
}

impl TryIntoCtx<Endian> for MDRawAnnotation {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.name, &mut offset, ctx)?;
        dst.gwrite_with(self.ty, &mut offset, ctx)?;
        dst.gwrite_with(self.reserved, &mut offset, ctx)?;
        dst.gwrite_with(self.value, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawAnnotation {
    fn size_with(ctx: &Endian) -> usize {
        8 + MDLocationDescriptor::size_with(ctx)
    }
}

/// Header of the raw-stacktrace stream. The stream body is this header,
/// `num_threads` [`MDRawStackTraceThread`], `num_frames`
/// [`MDRawStackTraceFrame`], and `symbol_bytes` of packed symbol strings.
#[derive(Clone, Debug)]
pub struct MDRawStackTraceHeader {
    pub version: u32,
    pub num_threads: u32,
    pub num_frames: u32,
    pub symbol_bytes: u32,
}

impl TryIntoCtx<Endian> for MDRawStackTraceHeader {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.version, &mut offset, ctx)?;
        dst.gwrite_with(self.num_threads, &mut offset, ctx)?;
        dst.gwrite_with(self.num_frames, &mut offset, ctx)?;
        dst.gwrite_with(self.symbol_bytes, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawStackTraceHeader {
    fn size_with(_ctx: &Endian) -> usize {
        16
    }
}

/// One thread of the raw-stacktrace stream, referencing a contiguous run of
/// [`MDRawStackTraceFrame`] entries.
#[derive(Clone, Debug)]
pub struct MDRawStackTraceThread {
    pub thread_id: u64,
    pub start_frame: u32,
    pub num_frames: u32,
}

impl TryIntoCtx<Endian> for MDRawStackTraceThread {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.thread_id, &mut offset, ctx)?;
        dst.gwrite_with(self.start_frame, &mut offset, ctx)?;
        dst.gwrite_with(self.num_frames, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawStackTraceThread {
    fn size_with(_ctx: &Endian) -> usize {
        16
    }
}

/// One frame of the raw-stacktrace stream. `symbol_offset` and `symbol_len`
/// select a slice of the stream's symbol byte pool.
#[derive(Clone, Debug)]
pub struct MDRawStackTraceFrame {
    pub instruction_addr: u64,
    pub symbol_offset: u32,
    pub symbol_len: u32,
}

impl TryIntoCtx<Endian> for MDRawStackTraceFrame {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.instruction_addr, &mut offset, ctx)?;
        dst.gwrite_with(self.symbol_offset, &mut offset, ctx)?;
        dst.gwrite_with(self.symbol_len, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl SizeWith<Endian> for MDRawStackTraceFrame {
    fn size_with(_ctx: &Endian) -> usize {
        16
    }
}

/// Builds a [`MDGUID`] from 16 bytes in canonical (big-endian) order, the
/// form build ids usually arrive in.
pub fn guid_from_bytes(bytes: [u8; 16]) -> MDGUID {
    MDGUID {
        data1: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        data2: u16::from_be_bytes([bytes[4], bytes[5]]),
        data3: u16::from_be_bytes([bytes[6], bytes[7]]),
        data4: [
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ],
    }
}

/// Formats a [`MDGUID`] in the canonical
/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form.
pub fn format_guid(guid: &MDGUID) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        guid.data1,
        guid.data2,
        guid.data3,
        guid.data4[0],
        guid.data4[1],
        guid.data4[2],
        guid.data4[3],
        guid.data4[4],
        guid.data4[5],
        guid.data4[6],
        guid.data4[7],
    )
}

/// Serializes `value` into a freshly allocated little-endian byte buffer of
/// exactly its on-disk size.
pub(crate) fn serialize_md<T>(value: T) -> Result<Vec<u8>, scroll::Error>
where
    T: TryIntoCtx<Endian, Error = scroll::Error> + SizeWith<Endian>,
{
    let mut buf = vec![0u8; T::size_with(&scroll::LE)];
    buf.as_mut_slice().pwrite_with(value, 0, scroll::LE)?;
    Ok(buf)
}

/// The on-disk size of `T`, as a `u64` for offset arithmetic.
pub(crate) fn size_of_md<T>() -> u64
where
    T: SizeWith<Endian>,
{
    T::size_with(&scroll::LE) as u64
}

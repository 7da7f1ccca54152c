//! CPU-context blobs.
//!
//! One fixed-layout structure per architecture, written exactly as captured;
//! the writer never synthesizes register values. The wider context shapes
//! (AMD64, ARM64) carry 16-byte vector registers and their blobs are aligned
//! accordingly.

use super::writable::{Writable, WritableBase, WritableState};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::CpuContext;

pub struct MinidumpContextWriter {
    base: WritableBase,
    context: CpuContext,
}

impl MinidumpContextWriter {
    /// Copies the register state out of `context`.
    pub fn new(context: CpuContext) -> Self {
        Self {
            base: WritableBase::new(),
            context,
        }
    }

    /// The blob's `{offset, size}`, for the thread or exception record that
    /// references it. Valid once laid out.
    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }

    fn context_size(&self) -> u64 {
        match &self.context {
            CpuContext::X86(_) => size_of_md::<CONTEXT_X86>(),
            CpuContext::Amd64(_) => size_of_md::<CONTEXT_AMD64>(),
            CpuContext::Arm(_) => size_of_md::<CONTEXT_ARM>(),
            CpuContext::Arm64(_) => size_of_md::<CONTEXT_ARM64>(),
        }
    }
}

impl Writable for MinidumpContextWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        self.context_size()
    }

    fn alignment(&self) -> u64 {
        match &self.context {
            // These carry 16-byte vector registers
            CpuContext::Amd64(_) | CpuContext::Arm64(_) => 16,
            CpuContext::X86(_) | CpuContext::Arm(_) => 4,
        }
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let buf = match &self.context {
            CpuContext::X86(context) => serialize_md((**context).clone())?,
            CpuContext::Amd64(context) => serialize_md((**context).clone())?,
            CpuContext::Arm(context) => serialize_md((**context).clone())?,
            CpuContext::Arm64(context) => serialize_md((**context).clone())?,
        };

        writer.write(&buf)?;
        Ok(())
    }
}

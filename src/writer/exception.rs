//! The exception stream: the fault that triggered the capture, plus the
//! faulting thread's context blob.

use super::context::MinidumpContextWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, WriterError};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::ExceptionSnapshot;

pub struct MinidumpExceptionWriter {
    base: WritableBase,
    raw: MDRawExceptionStream,
    context: MinidumpContextWriter,
}

impl MinidumpExceptionWriter {
    pub fn from_snapshot(exception: &ExceptionSnapshot) -> Result<Self> {
        let parameters = &exception.exception_information;
        if parameters.len() > MD_EXCEPTION_MAXIMUM_PARAMETERS {
            return Err(WriterError::TooManyExceptionParameters(parameters.len()));
        }

        // Slots beyond number_parameters stay zero
        let mut exception_information = [0u64; MD_EXCEPTION_MAXIMUM_PARAMETERS];
        exception_information[..parameters.len()].copy_from_slice(parameters);

        let raw = MDRawExceptionStream {
            thread_id: exception.thread_id,
            __align: 0,
            exception_record: MDException {
                exception_code: exception.exception_code,
                exception_flags: exception.exception_flags,
                exception_record: 0,
                exception_address: exception.exception_address,
                number_parameters: parameters.len() as u32,
                __align: 0,
                exception_information,
            },
            thread_context: MDLocationDescriptor {
                data_size: 0,
                rva: 0,
            },
        };

        Ok(Self {
            base: WritableBase::new(),
            raw,
            context: MinidumpContextWriter::new(exception.context.clone()),
        })
    }
}

impl Writable for MinidumpExceptionWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawExceptionStream>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        vec![&mut self.context]
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.thread_context = self.context.location();
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&serialize_md(self.raw.clone())?)?;
        Ok(())
    }
}

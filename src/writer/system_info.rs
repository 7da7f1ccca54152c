//! The system-info stream: CPU architecture and model, OS family and
//! version, and the trailing CSD-version string referenced by RVA.

use scroll::Pwrite;

use super::string_writer::MinidumpUtf16StringWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::{CpuInfo, SystemSnapshot};

pub struct MinidumpSystemInfoWriter {
    base: WritableBase,
    raw: MDRawSystemInfo,
    csd_version: MinidumpUtf16StringWriter,
}

impl MinidumpSystemInfoWriter {
    pub fn from_snapshot(system: &SystemSnapshot) -> Result<Self> {
        let raw = MDRawSystemInfo {
            processor_architecture: system.cpu_architecture.processor_architecture() as u16,
            processor_level: system.cpu_level,
            processor_revision: system.cpu_revision,
            number_of_processors: system.cpu_count,
            product_type: 0,
            major_version: system.os_version.0,
            minor_version: system.os_version.1,
            build_number: system.os_version.2,
            platform_id: system.os.platform_id(),
            csd_version_rva: 0,
            suite_mask: 0,
            reserved2: 0,
            cpu: cpu_information(&system.cpu_info)?,
        };

        Ok(Self {
            base: WritableBase::new(),
            raw,
            csd_version: MinidumpUtf16StringWriter::new(&system.os_version_string),
        })
    }
}

/// Packs the per-architecture CPU sub-record into its 24 raw bytes.
fn cpu_information(info: &CpuInfo) -> Result<CPU_INFORMATION> {
    let mut data = [0u8; 24];
    let mut offset = 0;

    match info {
        CpuInfo::X86 {
            vendor_id,
            version_information,
            feature_information,
            amd_extended_cpu_features,
        } => {
            for register in vendor_id {
                data.as_mut_slice()
                    .gwrite_with(*register, &mut offset, scroll::LE)?;
            }
            data.as_mut_slice()
                .gwrite_with(*version_information, &mut offset, scroll::LE)?;
            data.as_mut_slice()
                .gwrite_with(*feature_information, &mut offset, scroll::LE)?;
            data.as_mut_slice()
                .gwrite_with(*amd_extended_cpu_features, &mut offset, scroll::LE)?;
        }
        CpuInfo::Other { processor_features } => {
            for features in processor_features {
                data.as_mut_slice()
                    .gwrite_with(*features, &mut offset, scroll::LE)?;
            }
        }
    }

    Ok(CPU_INFORMATION { data })
}

impl Writable for MinidumpSystemInfoWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawSystemInfo>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        vec![&mut self.csd_version]
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.csd_version_rva = self.csd_version.rva();
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&serialize_md(self.raw.clone())?)?;
        Ok(())
    }
}

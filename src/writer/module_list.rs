//! The module-list stream.
//!
//! Each module's fixed entry is written by the list; its name string,
//! CodeView record, and misc debug record are children referenced by RVA or
//! location descriptor. Both the PDB 2.0 and PDB 7.0 CodeView shapes are
//! supported, since old toolchains still emit the former.

use scroll::Pwrite;

use super::string_writer::MinidumpUtf16StringWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::{DebugId, ModuleSnapshot};

enum CvRecord {
    Pdb70 {
        signature: MDGUID,
        age: u32,
        pdb_name: Vec<u8>,
    },
    Pdb20 {
        timestamp: u32,
        age: u32,
        pdb_name: Vec<u8>,
    },
}

/// A module's CodeView record, linking the image to its debug file.
pub struct MinidumpCvRecordWriter {
    base: WritableBase,
    record: CvRecord,
    bytes: Vec<u8>,
}

impl MinidumpCvRecordWriter {
    pub fn pdb70(signature: MDGUID, age: u32, pdb_name: &str) -> Self {
        Self {
            base: WritableBase::new(),
            record: CvRecord::Pdb70 {
                signature,
                age,
                pdb_name: pdb_name.as_bytes().to_vec(),
            },
            bytes: Vec::new(),
        }
    }

    pub fn pdb20(timestamp: u32, age: u32, pdb_name: &str) -> Self {
        Self {
            base: WritableBase::new(),
            record: CvRecord::Pdb20 {
                timestamp,
                age,
                pdb_name: pdb_name.as_bytes().to_vec(),
            },
            bytes: Vec::new(),
        }
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpCvRecordWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        // Both shapes are a fixed head followed by the NUL-terminated name
        match &self.record {
            CvRecord::Pdb70 {
                signature,
                age,
                pdb_name,
            } => {
                let mut buf = vec![0u8; 4 + 16 + 4 + pdb_name.len() + 1];
                let mut offset = 0;
                buf.as_mut_slice().gwrite_with(
                    MD_CVINFOPDB70_SIGNATURE,
                    &mut offset,
                    scroll::LE,
                )?;
                buf.as_mut_slice()
                    .gwrite_with(signature.clone(), &mut offset, scroll::LE)?;
                buf.as_mut_slice().gwrite_with(*age, &mut offset, scroll::LE)?;
                buf[offset..offset + pdb_name.len()].copy_from_slice(pdb_name);
                self.bytes = buf;
            }
            CvRecord::Pdb20 {
                timestamp,
                age,
                pdb_name,
            } => {
                let mut buf = vec![0u8; 4 + 4 + 4 + 4 + pdb_name.len() + 1];
                let mut offset = 0;
                buf.as_mut_slice().gwrite_with(
                    MD_CVINFOPDB20_SIGNATURE,
                    &mut offset,
                    scroll::LE,
                )?;
                // cv_offset: the record is not embedded in a larger one
                buf.as_mut_slice().gwrite_with(0u32, &mut offset, scroll::LE)?;
                buf.as_mut_slice()
                    .gwrite_with(*timestamp, &mut offset, scroll::LE)?;
                buf.as_mut_slice().gwrite_with(*age, &mut offset, scroll::LE)?;
                buf[offset..offset + pdb_name.len()].copy_from_slice(pdb_name);
                self.bytes = buf;
            }
        }
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&self.bytes)?;
        Ok(())
    }
}

/// A module's misc debug record (`IMAGE_DEBUG_MISC`), carrying the debug
/// file name as either UTF-8 or UTF-16.
pub struct MinidumpMiscDebugRecordWriter {
    base: WritableBase,
    data: String,
    utf16: bool,
    bytes: Vec<u8>,
}

/* IMAGE_DEBUG_MISC.data_type for an executable name. */
const MD_IMAGE_DEBUG_MISC_EXENAME: u32 = 1;

impl MinidumpMiscDebugRecordWriter {
    pub fn new(data: &str, utf16: bool) -> Self {
        Self {
            base: WritableBase::new(),
            data: data.to_owned(),
            utf16,
            bytes: Vec::new(),
        }
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpMiscDebugRecordWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        const HEADER_LEN: usize = 12;

        let payload: Vec<u8> = if self.utf16 {
            let mut units: Vec<u8> = Vec::new();
            for unit in self.data.encode_utf16() {
                units.extend_from_slice(&unit.to_le_bytes());
            }
            units.extend_from_slice(&[0, 0]);
            units
        } else {
            let mut bytes = self.data.as_bytes().to_vec();
            bytes.push(0);
            bytes
        };

        let total = HEADER_LEN + payload.len();
        let mut buf = vec![0u8; total];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(MD_IMAGE_DEBUG_MISC_EXENAME, &mut offset, scroll::LE)?;
        buf.as_mut_slice()
            .gwrite_with(assign_checked("misc record length", total as u64)?, &mut offset, scroll::LE)?;
        buf.as_mut_slice()
            .gwrite_with(u8::from(self.utf16), &mut offset, scroll::LE)?;
        // three reserved bytes are already zero
        buf[HEADER_LEN..].copy_from_slice(&payload);
        self.bytes = buf;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&self.bytes)?;
        Ok(())
    }
}

/// One module: the `MDRawModule` entry plus the blobs it references.
pub struct MinidumpModuleWriter {
    base: WritableBase,
    raw: MDRawModule,
    name: MinidumpUtf16StringWriter,
    codeview: Option<MinidumpCvRecordWriter>,
    misc_debug: Option<MinidumpMiscDebugRecordWriter>,
}

impl MinidumpModuleWriter {
    pub fn new(name: &str) -> Self {
        Self {
            base: WritableBase::new(),
            raw: MDRawModule {
                base_of_image: 0,
                size_of_image: 0,
                checksum: 0,
                time_date_stamp: 0,
                module_name_rva: 0,
                version_info: MDVSFixedFileInfo {
                    signature: MD_VSFIXEDFILEINFO_SIGNATURE,
                    struct_version: MD_VSFIXEDFILEINFO_VERSION,
                    file_version_hi: 0,
                    file_version_lo: 0,
                    product_version_hi: 0,
                    product_version_lo: 0,
                    file_flags_mask: 0,
                    file_flags: 0,
                    file_os: 0,
                    file_type: 0,
                    file_subtype: 0,
                    file_date_hi: 0,
                    file_date_lo: 0,
                },
                cv_record: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
                misc_record: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
                reserved0: [0; 2],
                reserved1: [0; 2],
            },
            name: MinidumpUtf16StringWriter::new(name),
            codeview: None,
            misc_debug: None,
        }
    }

    pub fn from_snapshot(module: &ModuleSnapshot) -> Result<Self> {
        let mut writer = Self::new(&module.name);

        writer.raw.base_of_image = module.base_address;
        writer.raw.size_of_image = assign_checked("size_of_image", module.size)?;
        writer.raw.time_date_stamp = module.timestamp;

        writer.raw.version_info.file_version_hi =
            (u32::from(module.file_version[0]) << 16) | u32::from(module.file_version[1]);
        writer.raw.version_info.file_version_lo =
            (u32::from(module.file_version[2]) << 16) | u32::from(module.file_version[3]);
        writer.raw.version_info.product_version_hi =
            (u32::from(module.product_version[0]) << 16) | u32::from(module.product_version[1]);
        writer.raw.version_info.product_version_lo =
            (u32::from(module.product_version[2]) << 16) | u32::from(module.product_version[3]);
        writer.raw.version_info.file_flags_mask = module.file_flags_mask.bits();
        writer.raw.version_info.file_flags = module.file_flags.bits();
        writer.raw.version_info.file_os = module.file_os;
        writer.raw.version_info.file_type = module.file_type;
        writer.raw.version_info.file_subtype = module.file_subtype;

        let debug_file = module.debug_file.as_deref().unwrap_or(&module.name);
        match &module.debug_id {
            Some(DebugId::Pdb70 { uuid, age }) => {
                writer.set_codeview(MinidumpCvRecordWriter::pdb70(uuid.clone(), *age, debug_file));
            }
            Some(DebugId::Pdb20 { timestamp, age }) => {
                writer.set_codeview(MinidumpCvRecordWriter::pdb20(*timestamp, *age, debug_file));
            }
            None => {}
        }

        Ok(writer)
    }

    pub fn set_codeview(&mut self, codeview: MinidumpCvRecordWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.codeview = Some(codeview);
    }

    pub fn set_misc_debug_record(&mut self, misc_debug: MinidumpMiscDebugRecordWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.misc_debug = Some(misc_debug);
    }

    fn raw(&self) -> &MDRawModule {
        debug_assert!(self.base.state() >= WritableState::Writable);
        &self.raw
    }
}

impl Writable for MinidumpModuleWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        // The MDRawModule is written by the parent list
        0
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        let mut children: Vec<&mut dyn Writable> = vec![&mut self.name];
        if let Some(codeview) = &mut self.codeview {
            children.push(codeview);
        }
        if let Some(misc_debug) = &mut self.misc_debug {
            children.push(misc_debug);
        }
        children
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.module_name_rva = self.name.rva();
        if let Some(codeview) = &self.codeview {
            self.raw.cv_record = codeview.location();
        }
        if let Some(misc_debug) = &self.misc_debug {
            self.raw.misc_record = misc_debug.location();
        }
        Ok(())
    }

    fn write_object(&mut self, _writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        Ok(())
    }
}

/// The module-list stream: a `u32` count followed by the module entries, in
/// the order the snapshot reported them (main executable first where the OS
/// exposes that).
pub struct MinidumpModuleListWriter {
    base: WritableBase,
    modules: Vec<MinidumpModuleWriter>,
    count: u32,
}

impl Default for MinidumpModuleListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpModuleListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            modules: Vec::new(),
            count: 0,
        }
    }

    pub fn add_module(&mut self, module: MinidumpModuleWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Writable for MinidumpModuleListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("module count", self.modules.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * MD_MODULE_SIZE as u64
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.modules
            .iter_mut()
            .map(|module| module as &mut dyn Writable)
            .collect()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for module in &self.modules {
            buf.as_mut_slice()
                .gwrite_with(module.raw().clone(), &mut offset, scroll::LE)?;
        }

        writer.write(&buf)?;
        Ok(())
    }
}

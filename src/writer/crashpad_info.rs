//! The extension-info stream and the annotation structures hanging off it.
//!
//! This is where the snapshot's annotations reach the file: the process's
//! simple key→value map, and per module a string list, a key→value map, and
//! typed annotation objects. Keys and values are UTF-8 string blobs; object
//! values are raw byte arrays.

use scroll::Pwrite;

use super::string_writer::MinidumpUtf8StringWriter;
use super::writable::{Writable, WritableBase, WritableState};
use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::{AnnotationSnapshot, ModuleSnapshot, ProcessSnapshot};

/// A `u32`-length-prefixed raw byte array, the value blob of a typed
/// annotation.
pub struct MinidumpByteArrayWriter {
    base: WritableBase,
    data: Vec<u8>,
}

impl MinidumpByteArrayWriter {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            base: WritableBase::new(),
            data,
        }
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpByteArrayWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        4 + self.data.len() as u64
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        writer.write(&buf)?;
        Ok(())
    }
}

/// One entry of a simple string dictionary; both strings are children.
struct DictionaryEntry {
    base: WritableBase,
    raw: MDRawSimpleStringDictionaryEntry,
    key: MinidumpUtf8StringWriter,
    value: MinidumpUtf8StringWriter,
}

impl Writable for DictionaryEntry {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        0
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        vec![&mut self.key, &mut self.value]
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.key = self.key.rva();
        self.raw.value = self.value.rva();
        Ok(())
    }

    fn write_object(&mut self, _writer: &mut dyn FileWriterInterface) -> Result<()> {
        Ok(())
    }
}

/// A key→value dictionary of UTF-8 strings: `u32` count, then `{key_rva,
/// value_rva}` pairs.
pub struct MinidumpSimpleStringDictionaryWriter {
    base: WritableBase,
    entries: Vec<DictionaryEntry>,
    count: u32,
}

impl Default for MinidumpSimpleStringDictionaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpSimpleStringDictionaryWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn from_map<'a>(map: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut writer = Self::new();
        for (key, value) in map {
            writer.add_entry(key, value);
        }
        writer
    }

    pub fn add_entry(&mut self, key: &str, value: &str) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.entries.push(DictionaryEntry {
            base: WritableBase::new(),
            raw: MDRawSimpleStringDictionaryEntry { key: 0, value: 0 },
            key: MinidumpUtf8StringWriter::new(key),
            value: MinidumpUtf8StringWriter::new(value),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpSimpleStringDictionaryWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("dictionary entry count", self.entries.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDRawSimpleStringDictionaryEntry>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.entries
            .iter_mut()
            .map(|entry| entry as &mut dyn Writable)
            .collect()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for entry in &self.entries {
            buf.as_mut_slice()
                .gwrite_with(entry.raw.clone(), &mut offset, scroll::LE)?;
        }
        writer.write(&buf)?;
        Ok(())
    }
}

/// A list of RVAs to UTF-8 strings (the free-form annotation list).
pub struct MinidumpRvaListWriter {
    base: WritableBase,
    strings: Vec<MinidumpUtf8StringWriter>,
    rvas: Vec<MDRVA>,
    count: u32,
}

impl Default for MinidumpRvaListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpRvaListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            strings: Vec::new(),
            rvas: Vec::new(),
            count: 0,
        }
    }

    pub fn add_string(&mut self, string: &str) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.strings.push(MinidumpUtf8StringWriter::new(string));
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpRvaListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("rva list count", self.strings.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * 4
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.strings
            .iter_mut()
            .map(|string| string as &mut dyn Writable)
            .collect()
    }

    fn resolve(&mut self) -> Result<()> {
        self.rvas = self.strings.iter().map(|string| string.rva()).collect();
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for rva in &self.rvas {
            buf.as_mut_slice().gwrite_with(*rva, &mut offset, scroll::LE)?;
        }
        writer.write(&buf)?;
        Ok(())
    }
}

/// One typed annotation object: a UTF-8 name, a type tag, and a byte-array
/// value.
pub struct MinidumpAnnotationWriter {
    base: WritableBase,
    raw: MDRawAnnotation,
    name: MinidumpUtf8StringWriter,
    value: MinidumpByteArrayWriter,
}

impl MinidumpAnnotationWriter {
    pub fn from_snapshot(annotation: &AnnotationSnapshot) -> Self {
        Self {
            base: WritableBase::new(),
            raw: MDRawAnnotation {
                name: 0,
                ty: annotation.ty,
                reserved: 0,
                value: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
            },
            name: MinidumpUtf8StringWriter::new(&annotation.name),
            value: MinidumpByteArrayWriter::new(annotation.value.clone()),
        }
    }
}

impl Writable for MinidumpAnnotationWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        0
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        vec![&mut self.name, &mut self.value]
    }

    fn resolve(&mut self) -> Result<()> {
        self.raw.name = self.name.rva();
        self.raw.value = self.value.location();
        Ok(())
    }

    fn write_object(&mut self, _writer: &mut dyn FileWriterInterface) -> Result<()> {
        Ok(())
    }
}

/// A list of typed annotation objects.
pub struct MinidumpAnnotationListWriter {
    base: WritableBase,
    annotations: Vec<MinidumpAnnotationWriter>,
    count: u32,
}

impl Default for MinidumpAnnotationListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpAnnotationListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            annotations: Vec::new(),
            count: 0,
        }
    }

    pub fn add_annotation(&mut self, annotation: MinidumpAnnotationWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.annotations.push(annotation);
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpAnnotationListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("annotation count", self.annotations.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDRawAnnotation>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.annotations
            .iter_mut()
            .map(|annotation| annotation as &mut dyn Writable)
            .collect()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for annotation in &self.annotations {
            buf.as_mut_slice()
                .gwrite_with(annotation.raw.clone(), &mut offset, scroll::LE)?;
        }
        writer.write(&buf)?;
        Ok(())
    }
}

/// One module's annotation record.
pub struct MinidumpModuleCrashpadInfoWriter {
    base: WritableBase,
    raw: MDRawModuleCrashpadInfo,
    list_annotations: Option<MinidumpRvaListWriter>,
    simple_annotations: Option<MinidumpSimpleStringDictionaryWriter>,
    annotation_objects: Option<MinidumpAnnotationListWriter>,
}

impl MinidumpModuleCrashpadInfoWriter {
    pub fn from_snapshot(module: &ModuleSnapshot) -> Self {
        let mut list_annotations = None;
        if !module.annotations_list.is_empty() {
            let mut list = MinidumpRvaListWriter::new();
            for annotation in &module.annotations_list {
                list.add_string(annotation);
            }
            list_annotations = Some(list);
        }

        let mut simple_annotations = None;
        if !module.annotations_map.is_empty() {
            simple_annotations = Some(MinidumpSimpleStringDictionaryWriter::from_map(
                module.annotations_map.iter(),
            ));
        }

        let mut annotation_objects = None;
        if !module.annotation_objects.is_empty() {
            let mut list = MinidumpAnnotationListWriter::new();
            for annotation in &module.annotation_objects {
                list.add_annotation(MinidumpAnnotationWriter::from_snapshot(annotation));
            }
            annotation_objects = Some(list);
        }

        Self {
            base: WritableBase::new(),
            raw: MDRawModuleCrashpadInfo {
                version: MD_MODULE_CRASHPAD_INFO_VERSION,
                list_annotations: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
                simple_annotations: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
                annotation_objects: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
            },
            list_annotations,
            simple_annotations,
            annotation_objects,
        }
    }

    /// Whether the module carries anything worth a record.
    pub fn has_annotations(&self) -> bool {
        self.list_annotations.is_some()
            || self.simple_annotations.is_some()
            || self.annotation_objects.is_some()
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpModuleCrashpadInfoWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawModuleCrashpadInfo>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        let mut children: Vec<&mut dyn Writable> = Vec::new();
        if let Some(list) = &mut self.list_annotations {
            children.push(list);
        }
        if let Some(simple) = &mut self.simple_annotations {
            children.push(simple);
        }
        if let Some(objects) = &mut self.annotation_objects {
            children.push(objects);
        }
        children
    }

    fn resolve(&mut self) -> Result<()> {
        if let Some(list) = &self.list_annotations {
            self.raw.list_annotations = list.location();
        }
        if let Some(simple) = &self.simple_annotations {
            self.raw.simple_annotations = simple.location();
        }
        if let Some(objects) = &self.annotation_objects {
            self.raw.annotation_objects = objects.location();
        }
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&serialize_md(self.raw.clone())?)?;
        Ok(())
    }
}

/// The list linking module-list indices to their annotation records.
pub struct MinidumpModuleCrashpadInfoListWriter {
    base: WritableBase,
    modules: Vec<(u32, MinidumpModuleCrashpadInfoWriter)>,
    links: Vec<MDRawModuleCrashpadInfoLink>,
    count: u32,
}

impl Default for MinidumpModuleCrashpadInfoListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinidumpModuleCrashpadInfoListWriter {
    pub fn new() -> Self {
        Self {
            base: WritableBase::new(),
            modules: Vec::new(),
            links: Vec::new(),
            count: 0,
        }
    }

    pub fn add_module(&mut self, module_list_index: u32, module: MinidumpModuleCrashpadInfoWriter) {
        debug_assert_eq!(self.base.state(), WritableState::Mutable);
        self.modules.push((module_list_index, module));
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn location(&self) -> MDLocationDescriptor {
        self.base.location()
    }
}

impl Writable for MinidumpModuleCrashpadInfoListWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn freeze(&mut self) -> Result<()> {
        self.count = assign_checked("module info count", self.modules.len() as u64)?;
        Ok(())
    }

    fn size_of_object(&self) -> u64 {
        4 + u64::from(self.count) * size_of_md::<MDRawModuleCrashpadInfoLink>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        self.modules
            .iter_mut()
            .map(|(_, module)| module as &mut dyn Writable)
            .collect()
    }

    fn resolve(&mut self) -> Result<()> {
        self.links = self
            .modules
            .iter()
            .map(|(index, module)| MDRawModuleCrashpadInfoLink {
                minidump_module_list_index: *index,
                location: module.location(),
            })
            .collect();
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);

        let mut buf = vec![0u8; self.size_of_object() as usize];
        let mut offset = 0;
        buf.as_mut_slice()
            .gwrite_with(self.count, &mut offset, scroll::LE)?;
        for link in &self.links {
            buf.as_mut_slice()
                .gwrite_with(link.clone(), &mut offset, scroll::LE)?;
        }
        writer.write(&buf)?;
        Ok(())
    }
}

/// The extension-info stream itself.
pub struct MinidumpCrashpadInfoWriter {
    base: WritableBase,
    raw: MDRawCrashpadInfo,
    simple_annotations: Option<MinidumpSimpleStringDictionaryWriter>,
    module_list: Option<MinidumpModuleCrashpadInfoListWriter>,
}

impl MinidumpCrashpadInfoWriter {
    pub fn from_snapshot(process: &ProcessSnapshot) -> Self {
        let simple_annotations = if process.annotations.is_empty() {
            None
        } else {
            Some(MinidumpSimpleStringDictionaryWriter::from_map(
                process.annotations.iter(),
            ))
        };

        let mut module_list = MinidumpModuleCrashpadInfoListWriter::new();
        for (index, module) in process.modules.iter().enumerate() {
            let info = MinidumpModuleCrashpadInfoWriter::from_snapshot(module);
            if info.has_annotations() {
                module_list.add_module(index as u32, info);
            }
        }
        let module_list = if module_list.is_empty() {
            None
        } else {
            Some(module_list)
        };

        Self {
            base: WritableBase::new(),
            raw: MDRawCrashpadInfo {
                version: MD_CRASHPAD_INFO_VERSION,
                report_id: process.report_id.clone(),
                client_id: process.client_id.clone(),
                simple_annotations: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
                module_list: MDLocationDescriptor {
                    data_size: 0,
                    rva: 0,
                },
            },
            simple_annotations,
            module_list,
        }
    }

    /// Whether the stream would carry any information at all.
    pub fn is_useful(&self) -> bool {
        self.simple_annotations.is_some()
            || self.module_list.is_some()
            || !is_zero_guid(&self.raw.report_id)
            || !is_zero_guid(&self.raw.client_id)
    }
}

fn is_zero_guid(guid: &MDGUID) -> bool {
    guid.data1 == 0 && guid.data2 == 0 && guid.data3 == 0 && guid.data4 == [0; 8]
}

impl Writable for MinidumpCrashpadInfoWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawCrashpadInfo>()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        let mut children: Vec<&mut dyn Writable> = Vec::new();
        if let Some(simple) = &mut self.simple_annotations {
            children.push(simple);
        }
        if let Some(modules) = &mut self.module_list {
            children.push(modules);
        }
        children
    }

    fn resolve(&mut self) -> Result<()> {
        if let Some(simple) = &self.simple_annotations {
            self.raw.simple_annotations = simple.location();
        }
        if let Some(modules) = &self.module_list {
            self.raw.module_list = modules.location();
        }
        Ok(())
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&serialize_md(self.raw.clone())?)?;
        Ok(())
    }
}

//! One loaded code image.

use std::collections::BTreeMap;

use super::annotation::AnnotationSnapshot;
use crate::minidump_format::MDGUID;

bitflags::bitflags! {
    /// `VS_FF_*` flags of a module's version record.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const DEBUG = 0x01;
        const PRERELEASE = 0x02;
        const PATCHED = 0x04;
        const PRIVATEBUILD = 0x08;
        const INFOINFERRED = 0x10;
        const SPECIALBUILD = 0x20;
    }
}

/// A module's build identifier, in whichever CodeView shape its toolchain
/// produced.
#[derive(Clone, Debug)]
pub enum DebugId {
    /// PDB 7.0: UUID plus age.
    Pdb70 { uuid: MDGUID, age: u32 },
    /// PDB 2.0: link timestamp plus age. Only old toolchains emit this.
    Pdb20 { timestamp: u32, age: u32 },
}

/// A loaded code image, as the OS reported it. Load ranges are not
/// guaranteed disjoint; mapped images can split.
#[derive(Clone, Debug)]
pub struct ModuleSnapshot {
    pub name: String,
    pub base_address: u64,
    pub size: u64,
    /// Link timestamp, seconds since the epoch.
    pub timestamp: u32,
    pub file_version: [u16; 4],
    pub product_version: [u16; 4],
    pub file_flags: FileFlags,
    pub file_flags_mask: FileFlags,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub debug_id: Option<DebugId>,
    /// Name of the debug file, when it differs from the module's.
    pub debug_file: Option<String>,
    /// Free-form annotation strings.
    pub annotations_list: Vec<String>,
    /// Key→value annotations; later writes win.
    pub annotations_map: BTreeMap<String, String>,
    /// Typed annotation objects.
    pub annotation_objects: Vec<AnnotationSnapshot>,
}

impl ModuleSnapshot {
    pub fn new(name: &str, base_address: u64, size: u64) -> Self {
        Self {
            name: name.to_owned(),
            base_address,
            size,
            timestamp: 0,
            file_version: [0; 4],
            product_version: [0; 4],
            file_flags: FileFlags::empty(),
            file_flags_mask: FileFlags::all(),
            file_os: 0,
            file_type: 0,
            file_subtype: 0,
            debug_id: None,
            debug_file: None,
            annotations_list: Vec::new(),
            annotations_map: BTreeMap::new(),
            annotation_objects: Vec::new(),
        }
    }
}

//! OS and hardware facts.

use super::context::CpuArchitecture;
use crate::minidump_format::PlatformId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingSystem {
    Windows,
    MacOs,
    Ios,
    Linux,
    Android,
    Unknown,
}

impl OperatingSystem {
    /// The `MDRawSystemInfo.platform_id` value.
    pub fn platform_id(self) -> u32 {
        match self {
            // VER_PLATFORM_WIN32_NT
            OperatingSystem::Windows => 2,
            OperatingSystem::MacOs => PlatformId::MacOs as u32,
            OperatingSystem::Ios => PlatformId::Ios as u32,
            OperatingSystem::Linux => PlatformId::Linux as u32,
            OperatingSystem::Android => PlatformId::Android as u32,
            OperatingSystem::Unknown => PlatformId::Unix as u32,
        }
    }
}

/// The CPU sub-record of the system-info stream.
#[derive(Clone, Debug)]
pub enum CpuInfo {
    /// x86 family: `cpuid` vendor registers (ebx, edx, ecx), version, and
    /// feature words.
    X86 {
        vendor_id: [u32; 3],
        version_information: u32,
        feature_information: u32,
        amd_extended_cpu_features: u32,
    },
    /// Everything else: two opaque feature words.
    Other { processor_features: [u64; 2] },
}

#[derive(Clone, Debug)]
pub struct SystemSnapshot {
    pub os: OperatingSystem,
    /// Major, minor, build.
    pub os_version: (u32, u32, u32),
    /// The full version string, written as the CSD-version string.
    pub os_version_string: String,
    pub cpu_architecture: CpuArchitecture,
    pub cpu_level: u16,
    pub cpu_revision: u16,
    pub cpu_count: u8,
    pub cpu_info: CpuInfo,
    /// Free-form hardware description; kept in the model for report
    /// consumers, not serialized into the system-info stream.
    pub machine_description: String,
}

impl SystemSnapshot {
    pub fn new(os: OperatingSystem, cpu_architecture: CpuArchitecture) -> Self {
        let cpu_info = match cpu_architecture {
            CpuArchitecture::X86 | CpuArchitecture::Amd64 => CpuInfo::X86 {
                vendor_id: [0; 3],
                version_information: 0,
                feature_information: 0,
                amd_extended_cpu_features: 0,
            },
            CpuArchitecture::Arm | CpuArchitecture::Arm64 => CpuInfo::Other {
                processor_features: [0; 2],
            },
        };

        Self {
            os,
            os_version: (0, 0, 0),
            os_version_string: String::new(),
            cpu_architecture,
            cpu_level: 0,
            cpu_revision: 0,
            cpu_count: 1,
            cpu_info,
            machine_description: String::new(),
        }
    }
}

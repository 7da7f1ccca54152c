//! Architecture-tagged CPU register state.
//!
//! The per-architecture layouts are the minidump wire formats themselves, so
//! acquisition fills in exactly what the writer later copies out, with no
//! translation step in between.

use crate::minidump_format::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuArchitecture {
    X86,
    Amd64,
    Arm,
    Arm64,
}

impl CpuArchitecture {
    /// The `MDRawSystemInfo.processor_architecture` value.
    pub fn processor_architecture(self) -> ProcessorArchitecture {
        match self {
            CpuArchitecture::X86 => ProcessorArchitecture::PROCESSOR_ARCHITECTURE_INTEL,
            CpuArchitecture::Amd64 => ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64,
            CpuArchitecture::Arm => ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM,
            CpuArchitecture::Arm64 => ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM64,
        }
    }
}

/// Register state of one thread, as captured.
///
/// The boxes keep the snapshot small for the common case of many threads;
/// an AMD64 context alone is over a kilobyte.
#[derive(Clone, Debug)]
pub enum CpuContext {
    X86(Box<CONTEXT_X86>),
    Amd64(Box<CONTEXT_AMD64>),
    Arm(Box<CONTEXT_ARM>),
    Arm64(Box<CONTEXT_ARM64>),
}

impl CpuContext {
    /// A zeroed x86 context with its flags word set.
    pub fn new_x86() -> Self {
        let mut context = Box::<CONTEXT_X86>::default();
        context.context_flags = MD_CONTEXT_X86_FULL;
        CpuContext::X86(context)
    }

    /// A zeroed AMD64 context with its flags word set.
    pub fn new_amd64() -> Self {
        let mut context = Box::<CONTEXT_AMD64>::default();
        context.context_flags = MD_CONTEXT_AMD64_FULL;
        CpuContext::Amd64(context)
    }

    /// A zeroed ARM context with its flags word set.
    pub fn new_arm() -> Self {
        let mut context = Box::<CONTEXT_ARM>::default();
        context.context_flags = MD_CONTEXT_ARM_FULL;
        CpuContext::Arm(context)
    }

    /// A zeroed ARM64 context with its flags word set.
    pub fn new_arm64() -> Self {
        let mut context = Box::<CONTEXT_ARM64>::default();
        context.context_flags = MD_CONTEXT_ARM64_FULL;
        CpuContext::Arm64(context)
    }

    pub fn architecture(&self) -> CpuArchitecture {
        match self {
            CpuContext::X86(_) => CpuArchitecture::X86,
            CpuContext::Amd64(_) => CpuArchitecture::Amd64,
            CpuContext::Arm(_) => CpuArchitecture::Arm,
            CpuContext::Arm64(_) => CpuArchitecture::Arm64,
        }
    }

    pub fn instruction_pointer(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.eip),
            CpuContext::Amd64(context) => context.rip,
            CpuContext::Arm(context) => u64::from(context.iregs[15]),
            CpuContext::Arm64(context) => context.pc,
        }
    }

    pub fn stack_pointer(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.esp),
            CpuContext::Amd64(context) => context.rsp,
            CpuContext::Arm(context) => u64::from(context.iregs[13]),
            CpuContext::Arm64(context) => context.sp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_contexts_carry_their_architecture_flags() {
        let CpuContext::Amd64(context) = CpuContext::new_amd64() else {
            panic!("wrong variant");
        };
        assert_eq!(context.context_flags, MD_CONTEXT_AMD64_FULL);
    }

    #[test]
    fn pointer_accessors_read_the_right_registers() {
        let mut amd64 = Box::<CONTEXT_AMD64>::default();
        amd64.rip = 0x1111;
        amd64.rsp = 0x2222;
        let context = CpuContext::Amd64(amd64);
        assert_eq!(context.instruction_pointer(), 0x1111);
        assert_eq!(context.stack_pointer(), 0x2222);
        assert_eq!(context.architecture(), CpuArchitecture::Amd64);
    }
}

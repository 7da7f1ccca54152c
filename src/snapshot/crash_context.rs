//! Converts a signal-time [`crash_context::CrashContext`] into the snapshot
//! model's exception types.
//!
//! The kernel's ucontext register layouts differ from the minidump ones, so
//! this is a field-by-field shuffle, one implementation per architecture.

use super::context::CpuContext;
use super::exception::ExceptionSnapshot;
use crate::minidump_format::*;

impl ExceptionSnapshot {
    /// Builds the exception record and CPU context for the faulting thread
    /// out of the state a signal handler captured.
    pub fn from_crash_context(crash_context: &crash_context::CrashContext) -> Self {
        let mut exception = ExceptionSnapshot::new(
            crash_context.tid as u32,
            cpu_context_from_crash_context(crash_context),
        );

        exception.exception_code = crash_context.siginfo.ssi_signo;
        exception.exception_flags = crash_context.siginfo.ssi_code as u32;
        exception.exception_address = crash_context.siginfo.ssi_addr;

        exception
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn cpu_context_from_crash_context(
            crash_context: &crash_context::CrashContext,
        ) -> CpuContext {
            use libc::{
                REG_CSGSFS, REG_EFL, REG_R8, REG_R9, REG_R10, REG_R11, REG_R12, REG_R13, REG_R14,
                REG_R15, REG_RAX, REG_RBP, REG_RBX, REG_RCX, REG_RDI, REG_RDX, REG_RIP, REG_RSI,
                REG_RSP,
            };

            let mut out = Box::<CONTEXT_AMD64>::default();
            out.context_flags = MD_CONTEXT_AMD64_FULL;

            {
                let gregs = &crash_context.context.uc_mcontext.gregs;
                out.cs = (gregs[REG_CSGSFS as usize] & 0xffff) as u16;
                out.fs = ((gregs[REG_CSGSFS as usize] >> 32) & 0xffff) as u16;
                out.gs = ((gregs[REG_CSGSFS as usize] >> 16) & 0xffff) as u16;

                out.eflags = gregs[REG_EFL as usize] as u32;

                out.rax = gregs[REG_RAX as usize] as u64;
                out.rcx = gregs[REG_RCX as usize] as u64;
                out.rdx = gregs[REG_RDX as usize] as u64;
                out.rbx = gregs[REG_RBX as usize] as u64;

                out.rsp = gregs[REG_RSP as usize] as u64;
                out.rbp = gregs[REG_RBP as usize] as u64;
                out.rsi = gregs[REG_RSI as usize] as u64;
                out.rdi = gregs[REG_RDI as usize] as u64;
                out.r8 = gregs[REG_R8 as usize] as u64;
                out.r9 = gregs[REG_R9 as usize] as u64;
                out.r10 = gregs[REG_R10 as usize] as u64;
                out.r11 = gregs[REG_R11 as usize] as u64;
                out.r12 = gregs[REG_R12 as usize] as u64;
                out.r13 = gregs[REG_R13 as usize] as u64;
                out.r14 = gregs[REG_R14 as usize] as u64;
                out.r15 = gregs[REG_R15 as usize] as u64;

                out.rip = gregs[REG_RIP as usize] as u64;
            }

            {
                use scroll::Pwrite;

                let fs = &crash_context.float_state;
                let mut float_save = minidump_common::format::XMM_SAVE_AREA32::default();
                float_save.control_word = fs.cwd;
                float_save.status_word = fs.swd;
                float_save.tag_word = fs.ftw as u8;
                float_save.error_opcode = fs.fop;
                float_save.error_offset = fs.rip as u32;
                float_save.data_offset = fs.rdp as u32;
                // The kernel doesn't hand these out
                float_save.error_selector = 0;
                float_save.data_selector = 0;
                float_save.mx_csr = fs.mxcsr;
                float_save.mx_csr_mask = fs.mxcr_mask;

                let st = to_u128(&fs.st_space);
                float_save.float_registers[..st.len()].copy_from_slice(&st);

                let xmm = to_u128(&fs.xmm_space);
                float_save.xmm_registers[..xmm.len()].copy_from_slice(&xmm);

                out.float_save
                    .pwrite_with(float_save, 0, scroll::LE)
                    .expect("XMM_SAVE_AREA32 fits within CONTEXT_AMD64::float_save");
            }

            CpuContext::Amd64(out)
        }

        /// Packs the kernel's `u32` register-space arrays into the 128-bit
        /// slots the context uses.
        fn to_u128(space: &[u32]) -> Vec<u128> {
            space
                .chunks_exact(4)
                .map(|chunk| {
                    u128::from(chunk[0])
                        | u128::from(chunk[1]) << 32
                        | u128::from(chunk[2]) << 64
                        | u128::from(chunk[3]) << 96
                })
                .collect()
        }
    } else if #[cfg(target_arch = "aarch64")] {
        fn cpu_context_from_crash_context(
            crash_context: &crash_context::CrashContext,
        ) -> CpuContext {
            const GP_REG_COUNT: usize = 31;
            const SP_REG: usize = 31;
            const FP_REG_COUNT: usize = 32;

            let mut out = Box::<CONTEXT_ARM64>::default();
            out.context_flags = MD_CONTEXT_ARM64_FULL;

            out.cpsr = crash_context.context.uc_mcontext.pstate as u32;
            out.iregs[..GP_REG_COUNT]
                .copy_from_slice(&crash_context.context.uc_mcontext.regs[..GP_REG_COUNT]);
            out.iregs[SP_REG] = crash_context.context.uc_mcontext.sp;
            out.pc = crash_context.context.uc_mcontext.pc;

            out.fpsr = crash_context.float_state.fpsr;
            out.fpcr = crash_context.float_state.fpcr;
            out.float_regs[..FP_REG_COUNT]
                .copy_from_slice(&crash_context.float_state.vregs[..FP_REG_COUNT]);

            CpuContext::Arm64(out)
        }
    } else {
        compile_error!("no crash-context conversion for this architecture");
    }
}

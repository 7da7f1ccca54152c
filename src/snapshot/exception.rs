//! The fault that triggered the capture.

use super::context::CpuContext;

#[derive(Clone, Debug)]
pub struct ExceptionSnapshot {
    /// The faulting thread. Should appear in the process's thread list, but
    /// a best-effort capture may have lost it.
    pub thread_id: u32,
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_address: u64,
    /// At most the format's parameter maximum; the writer rejects more.
    pub exception_information: Vec<u64>,
    /// Register state at the fault, distinct from the thread's resting
    /// context.
    pub context: CpuContext,
}

impl ExceptionSnapshot {
    pub fn new(thread_id: u32, context: CpuContext) -> Self {
        Self {
            thread_id,
            exception_code: 0,
            exception_flags: 0,
            exception_address: 0,
            exception_information: Vec::new(),
            context,
        }
    }
}

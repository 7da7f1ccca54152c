//! The captured process: root of the snapshot model.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use super::exception::ExceptionSnapshot;
use super::memory::MemorySnapshot;
use super::module::ModuleSnapshot;
use super::system::SystemSnapshot;
use super::thread::ThreadSnapshot;
use crate::minidump_format::MDGUID;

/// A process at one instant.
///
/// Owns exactly one [`SystemSnapshot`] and any number of threads, modules,
/// and memory ranges. Build it, then stop touching it: everything downstream
/// borrows immutably.
#[derive(Clone, Debug)]
pub struct ProcessSnapshot {
    pub process_id: u32,
    pub parent_process_id: u32,
    /// Wall-clock time the capture was taken; becomes the dump's header
    /// timestamp.
    pub snapshot_time: SystemTime,
    pub process_start_time: Option<SystemTime>,
    pub process_cpu_user_time: Duration,
    pub process_cpu_system_time: Duration,
    /// Identifies this report.
    pub report_id: MDGUID,
    /// Identifies the client across reports.
    pub client_id: MDGUID,
    /// Process-level key→value annotations; later writes win.
    pub annotations: BTreeMap<String, String>,
    pub system: SystemSnapshot,
    /// Threads, in the acquisition layer's stable order.
    pub threads: Vec<ThreadSnapshot>,
    /// Modules in load order, main executable first where the OS says so.
    pub modules: Vec<ModuleSnapshot>,
    pub exception: Option<ExceptionSnapshot>,
    /// Ranges preserved beyond the thread stacks. May overlap the stacks;
    /// the writer deduplicates by `(address, size)` identity.
    pub extra_memory: Vec<MemorySnapshot>,
}

impl ProcessSnapshot {
    pub fn new(system: SystemSnapshot) -> Self {
        Self {
            process_id: 0,
            parent_process_id: 0,
            snapshot_time: SystemTime::now(),
            process_start_time: None,
            process_cpu_user_time: Duration::ZERO,
            process_cpu_system_time: Duration::ZERO,
            report_id: zero_guid(),
            client_id: zero_guid(),
            annotations: BTreeMap::new(),
            system,
            threads: Vec::new(),
            modules: Vec::new(),
            exception: None,
            extra_memory: Vec::new(),
        }
    }

    /// The thread the exception blames, if it is still in the list.
    pub fn exception_thread(&self) -> Option<&ThreadSnapshot> {
        let exception = self.exception.as_ref()?;
        self.threads
            .iter()
            .find(|thread| thread.thread_id == exception.thread_id)
    }
}

fn zero_guid() -> MDGUID {
    MDGUID {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    }
}

/// An acquisition layer: whatever reads a target process (ptrace, kernel
/// task APIs, a debugger transport) and turns it into the model above.
///
/// The returned snapshot must be fully populated; consumers treat it as
/// immutable and never reach back into the provider.
pub trait ProcessSnapshotProvider {
    type Error;

    /// Captures the target once.
    fn snapshot(&mut self) -> Result<ProcessSnapshot, Self::Error>;
}

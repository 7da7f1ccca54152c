//! The passive model of a captured process.
//!
//! An acquisition layer (a debugger-style reader, a signal handler, a test)
//! builds one of these, after which it is read-only: the writer and any
//! other consumer only ever borrow it. Memory contents are not stored here;
//! a [`MemorySnapshot`] carries a reader that is invoked while the dump is
//! being serialized, so the producer decides whether bytes were captured
//! eagerly or are still being pulled from the target.

mod annotation;
mod context;
mod exception;
mod memory;
mod module;
mod process;
mod system;
mod thread;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod crash_context;
    }
}

pub use annotation::AnnotationSnapshot;
pub use context::{CpuArchitecture, CpuContext};
pub use exception::ExceptionSnapshot;
pub use memory::{BufferMemoryReader, MemoryReadError, MemoryReader, MemorySnapshot};
pub use module::{DebugId, FileFlags, ModuleSnapshot};
pub use process::{ProcessSnapshot, ProcessSnapshotProvider};
pub use system::{CpuInfo, OperatingSystem, SystemSnapshot};
pub use thread::{FrameSnapshot, ThreadSnapshot};

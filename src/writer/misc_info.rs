//! The misc-info stream: process id, start time, and accumulated CPU times.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::writable::{Writable, WritableBase, WritableState};
use super::Result;
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;
use crate::snapshot::ProcessSnapshot;

pub struct MinidumpMiscInfoWriter {
    base: WritableBase,
    raw: MDRawMiscInfo,
}

impl MinidumpMiscInfoWriter {
    pub fn from_snapshot(process: &ProcessSnapshot) -> Self {
        let mut flags1 = MiscInfoFlags::MINIDUMP_MISC1_PROCESS_ID.bits();
        let mut process_create_time = 0;

        if let Some(start_time) = process.process_start_time {
            flags1 |= MiscInfoFlags::MINIDUMP_MISC1_PROCESS_TIMES.bits();
            process_create_time = epoch_seconds(start_time);
        }

        let raw = MDRawMiscInfo {
            size_of_info: size_of_md::<MDRawMiscInfo>() as u32,
            flags1,
            process_id: process.process_id,
            process_create_time,
            process_user_time: whole_seconds(process.process_cpu_user_time),
            process_kernel_time: whole_seconds(process.process_cpu_system_time),
            processor_max_mhz: 0,
            processor_current_mhz: 0,
            processor_mhz_limit: 0,
            processor_max_idle_state: 0,
            processor_current_idle_state: 0,
        };

        Self {
            base: WritableBase::new(),
            raw,
        }
    }
}

fn epoch_seconds(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

fn whole_seconds(duration: Duration) -> u32 {
    duration.as_secs() as u32
}

impl Writable for MinidumpMiscInfoWriter {
    fn base(&self) -> &WritableBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WritableBase {
        &mut self.base
    }

    fn size_of_object(&self) -> u64 {
        size_of_md::<MDRawMiscInfo>()
    }

    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
        debug_assert_eq!(self.base.state(), WritableState::Writable);
        writer.write(&serialize_md(self.raw.clone())?)?;
        Ok(())
    }
}

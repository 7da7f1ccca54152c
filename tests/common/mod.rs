//! Helpers shared by the integration suites.
#![allow(dead_code)]

use scroll::Pread;

use crashdump_writer::file_writer::BufferWriter;
use crashdump_writer::minidump_format::*;
use crashdump_writer::snapshot::{
    CpuArchitecture, OperatingSystem, ProcessSnapshot, SystemSnapshot,
};
use crashdump_writer::writer::{DumpOptions, write_minidump};

/// A minimal but fully valid process snapshot for the given architecture.
pub fn test_process(cpu_architecture: CpuArchitecture) -> ProcessSnapshot {
    let mut system = SystemSnapshot::new(OperatingSystem::Linux, cpu_architecture);
    system.os_version = (6, 1, 0);
    system.os_version_string = "6.1.0-test".to_owned();
    system.cpu_count = 8;

    let mut process = ProcessSnapshot::new(system);
    process.process_id = 1234;
    process.parent_process_id = 1;
    process
}

/// Runs the writer against an in-memory sink and hands back the file bytes.
pub fn write_to_buffer(process: &ProcessSnapshot) -> Vec<u8> {
    let mut sink = BufferWriter::new();
    write_minidump(process, DumpOptions::default(), &mut sink).expect("failed to write dump");
    sink.into_inner()
}

pub fn read_header(bytes: &[u8]) -> MDRawHeader {
    bytes.pread_with(0, scroll::LE).expect("short header")
}

pub fn read_directory(bytes: &[u8]) -> Vec<MDRawDirectory> {
    let header = read_header(bytes);
    let mut entries = Vec::with_capacity(header.stream_count as usize);
    let mut offset = header.stream_directory_rva as usize;
    for _ in 0..header.stream_count {
        entries.push(
            bytes
                .gread_with(&mut offset, scroll::LE)
                .expect("short directory"),
        );
    }
    entries
}

pub fn find_stream(bytes: &[u8], stream_type: u32) -> Option<MDRawDirectory> {
    read_directory(bytes)
        .into_iter()
        .find(|entry| entry.stream_type == stream_type)
}

/// Decodes a `u32`-length-prefixed, NUL-terminated UTF-8 blob.
pub fn read_utf8_blob(bytes: &[u8], rva: u32) -> String {
    let rva = rva as usize;
    let len: u32 = bytes.pread_with(rva, scroll::LE).expect("short blob");
    let data = &bytes[rva + 4..rva + 4 + len as usize];
    assert_eq!(bytes[rva + 4 + len as usize], 0, "missing NUL terminator");
    String::from_utf8(data.to_vec()).expect("blob is not UTF-8")
}

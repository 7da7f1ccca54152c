use std::time::{Duration, UNIX_EPOCH};

use minidump::{
    Minidump, MinidumpException, MinidumpMemoryList, MinidumpMiscInfo, MinidumpModuleList,
    MinidumpSystemInfo, MinidumpThreadList, Module,
};
use scroll::{Pread, Pwrite};

use crashdump_writer::file_writer::BufferWriter;
use crashdump_writer::minidump_format::*;
use crashdump_writer::snapshot::{
    AnnotationSnapshot, CpuArchitecture, CpuContext, DebugId, ExceptionSnapshot, FrameSnapshot,
    MemorySnapshot, ModuleSnapshot, ThreadSnapshot,
};
use crashdump_writer::writer::{
    DumpOptions, MinidumpContextWriter, MinidumpFileWriter, MinidumpThreadListWriter,
    MinidumpThreadWriter, MinidumpUserStreamWriter, UserStreamContents, WriterError,
    write_minidump,
};
use crashdump_writer::FailSpotName;

mod common;
use common::*;

#[test]
fn empty_dump_is_exactly_one_header() {
    let mut sink = BufferWriter::new();
    let mut dump = MinidumpFileWriter::new();
    dump.set_timestamp(0x4242_4242).unwrap();
    dump.write_everything(&mut sink).unwrap();

    let bytes = sink.into_inner();
    assert_eq!(bytes.len(), 32);

    let header = read_header(&bytes);
    assert_eq!(header.signature, MD_HEADER_SIGNATURE);
    assert_eq!(header.version, MD_HEADER_VERSION);
    assert_eq!(header.stream_count, 0);
    assert_eq!(header.stream_directory_rva, 0);
    assert_eq!(header.checksum, 0);
    assert_eq!(header.time_date_stamp, 0x4242_4242);
    assert_eq!(header.flags, 0);
}

#[test]
fn three_streams_lay_out_with_padding_and_insertion_order() {
    let mut sink = BufferWriter::new();
    let mut dump = MinidumpFileWriter::new();
    dump.set_timestamp(0x155d2fb8).unwrap();

    // The second stream's type is numerically smaller than the first's, so
    // a directory sorted by tag would be caught
    dump.add_stream(MinidumpUserStreamWriter::new(
        0x6d,
        UserStreamContents::Buffer(vec![0x5a; 5]),
    ))
    .unwrap();
    dump.add_stream(MinidumpUserStreamWriter::new(
        0x4d,
        UserStreamContents::Buffer(vec![0xa5; 3]),
    ))
    .unwrap();
    dump.add_stream(MinidumpUserStreamWriter::new(
        0x7e,
        UserStreamContents::Buffer(vec![0x36; 1]),
    ))
    .unwrap();

    dump.write_everything(&mut sink).unwrap();
    let bytes = sink.into_inner();

    // header + 3 directory entries + 5 + pad(3) + 3 + pad(1) + 1
    assert_eq!(bytes.len(), 32 + 3 * 12 + 5 + 3 + 3 + 1 + 1);

    let header = read_header(&bytes);
    assert_eq!(header.signature, MD_HEADER_SIGNATURE);
    assert_eq!(header.stream_count, 3);
    assert_eq!(header.stream_directory_rva, 32);
    assert_eq!(header.time_date_stamp, 0x155d2fb8);

    let directory = read_directory(&bytes);
    assert_eq!(directory[0].stream_type, 0x6d);
    assert_eq!(directory[0].location.rva, 68);
    assert_eq!(directory[0].location.data_size, 5);
    assert_eq!(directory[1].stream_type, 0x4d);
    assert_eq!(directory[1].location.rva, 76);
    assert_eq!(directory[1].location.data_size, 3);
    assert_eq!(directory[2].stream_type, 0x7e);
    assert_eq!(directory[2].location.rva, 80);
    assert_eq!(directory[2].location.data_size, 1);

    assert_eq!(&bytes[68..73], &[0x5a; 5]);
    assert_eq!(&bytes[73..76], &[0; 3], "padding must be zero");
    assert_eq!(&bytes[76..79], &[0xa5; 3]);
    assert_eq!(bytes[79], 0, "padding must be zero");
    assert_eq!(bytes[80], 0x36);

    // An independent reader agrees about the whole layout
    let dump = Minidump::read(bytes).expect("reader rejected the dump");
    assert_eq!(dump.get_raw_stream(0x6d).unwrap(), &[0x5a; 5]);
    assert_eq!(dump.get_raw_stream(0x4d).unwrap(), &[0xa5; 3]);
    assert_eq!(dump.get_raw_stream(0x7e).unwrap(), &[0x36; 1]);
}

#[test]
fn x86_thread_without_stack_ends_with_its_context_blob() {
    let mut context = CpuContext::new_x86();
    if let CpuContext::X86(inner) = &mut context {
        inner.eip = 0x0040_1000;
        inner.esp = 0x00ff_0000;
    }

    // Just a thread-list stream, so the context blob is the final child
    let mut thread = MinidumpThreadWriter::new(MinidumpContextWriter::new(context));
    thread.set_thread_id(0x1e0d);
    let mut thread_list = MinidumpThreadListWriter::new();
    thread_list.add_thread(thread);

    let mut dump = MinidumpFileWriter::new();
    dump.add_stream(thread_list).unwrap();

    let mut sink = BufferWriter::new();
    dump.write_everything(&mut sink).unwrap();
    let bytes = sink.into_inner();

    let thread_entry =
        find_stream(&bytes, MDStreamType::ThreadListStream as u32).expect("no thread list");

    let list_rva = thread_entry.location.rva as usize;
    let count: u32 = bytes.pread_with(list_rva, scroll::LE).unwrap();
    assert_eq!(count, 1);
    let thread: MDRawThread = bytes.pread_with(list_rva + 4, scroll::LE).unwrap();

    assert_eq!(thread.thread_id, 0x1e0d);
    assert_eq!(thread.stack.memory.data_size, 0);
    assert_eq!(thread.thread_context.data_size, 716);
    assert_eq!(thread.thread_context.rva % 4, 0);
    // No stack: the context blob is the last thing in the file
    assert_eq!(
        thread.thread_context.rva as usize + thread.thread_context.data_size as usize,
        bytes.len()
    );

    let context: CONTEXT_X86 = bytes
        .pread_with(thread.thread_context.rva as usize, scroll::LE)
        .unwrap();
    assert_eq!(context.context_flags, MD_CONTEXT_X86_FULL);
    assert_eq!(context.eip, 0x0040_1000);
    assert_eq!(context.esp, 0x00ff_0000);
}

#[test]
fn amd64_thread_with_stack_shares_bytes_with_the_memory_list() {
    const STACK_BASE: u64 = 0x7654_3210_0000;

    let mut context = CpuContext::new_amd64();
    if let CpuContext::Amd64(inner) = &mut context {
        inner.rip = 0x0000_5555_1234_5678;
        inner.rsp = STACK_BASE;
    }

    let mut thread = ThreadSnapshot::new(42, context);
    thread.stack = Some(MemorySnapshot::from_bytes(STACK_BASE, vec![0x99; 32]));

    let mut process = test_process(CpuArchitecture::Amd64);
    process.threads.push(thread);

    let bytes = write_to_buffer(&process);

    let thread_entry =
        find_stream(&bytes, MDStreamType::ThreadListStream as u32).expect("no thread list");
    let thread: MDRawThread = bytes
        .pread_with(thread_entry.location.rva as usize + 4, scroll::LE)
        .unwrap();

    // AMD64 context blobs land on 16-byte boundaries
    assert_eq!(thread.thread_context.rva % 16, 0);
    assert_eq!(thread.thread_context.data_size, 1232);

    assert_eq!(thread.stack.start_of_memory_range, STACK_BASE);
    assert_eq!(thread.stack.memory.data_size, 32);
    let stack_rva = thread.stack.memory.rva as usize;
    assert_eq!(&bytes[stack_rva..stack_rva + 32], &[0x99; 32]);

    let parsed: CONTEXT_AMD64 = bytes
        .pread_with(thread.thread_context.rva as usize, scroll::LE)
        .unwrap();
    assert_eq!(parsed.rip, 0x0000_5555_1234_5678);
    assert_eq!(parsed.rsp, STACK_BASE);

    // The memory list references the same blob rather than a second copy
    let dump = Minidump::read(bytes).unwrap();
    let memory_list: MinidumpMemoryList = dump.get_stream().unwrap();
    let memory = memory_list
        .memory_at_address(STACK_BASE)
        .expect("stack missing from memory list");
    assert_eq!(memory.base_address, STACK_BASE);
    assert_eq!(memory.size, 32);
    assert_eq!(memory.bytes, &[0x99; 32]);

    let threads: MinidumpThreadList = dump.get_stream().unwrap();
    assert_eq!(
        threads.threads[0].raw.stack.memory.rva, stack_rva as u32,
        "thread and memory list must reference one copy"
    );
}

#[test]
fn exception_parameters_beyond_the_count_stay_zero() {
    let mut exception = ExceptionSnapshot::new(7, CpuContext::new_amd64());
    exception.exception_code = 0x2;
    exception.exception_flags = 0x3;
    exception.exception_address = 0x5;
    exception.exception_information = vec![6, 7, 7];

    let mut process = test_process(CpuArchitecture::Amd64);
    process
        .threads
        .push(ThreadSnapshot::new(7, CpuContext::new_amd64()));
    process.exception = Some(exception);

    let bytes = write_to_buffer(&process);

    let dump = Minidump::read(bytes).unwrap();
    let exception: MinidumpException = dump.get_stream().unwrap();
    let raw = &exception.raw;

    assert_eq!(raw.thread_id, 7);
    assert_eq!(raw.exception_record.exception_code, 0x2);
    assert_eq!(raw.exception_record.exception_flags, 0x3);
    assert_eq!(raw.exception_record.exception_address, 0x5);
    assert_eq!(raw.exception_record.number_parameters, 3);
    assert_eq!(raw.exception_record.exception_information[..3], [6, 7, 7]);
    assert_eq!(
        raw.exception_record.exception_information[3..],
        [0u64; MD_EXCEPTION_MAXIMUM_PARAMETERS - 3]
    );
    assert_eq!(raw.thread_context.data_size, 1232);
}

#[test]
fn too_many_exception_parameters_fail_before_any_bytes_exist() {
    let mut exception = ExceptionSnapshot::new(1, CpuContext::new_amd64());
    exception.exception_information = vec![0; MD_EXCEPTION_MAXIMUM_PARAMETERS + 1];

    let mut process = test_process(CpuArchitecture::Amd64);
    process.exception = Some(exception);

    let err = match MinidumpFileWriter::from_snapshot(&process, DumpOptions::default()) {
        Ok(_) => panic!("expected an error"),
        Err(err) => err,
    };
    assert!(matches!(err, WriterError::TooManyExceptionParameters(16)));
}

#[test]
fn duplicate_streams_are_rejected_at_add_time() {
    let mut dump = MinidumpFileWriter::new();
    dump.add_stream(MinidumpUserStreamWriter::new(
        0x1000_0001,
        UserStreamContents::Buffer(vec![1, 2]),
    ))
    .unwrap();

    let err = dump
        .add_stream(MinidumpUserStreamWriter::new(
            0x1000_0001,
            UserStreamContents::Buffer(vec![3]),
        ))
        .unwrap_err();
    assert!(matches!(err, WriterError::DuplicateStreamType(0x1000_0001)));
}

#[test]
fn out_of_range_timestamp_is_rejected() {
    let mut dump = MinidumpFileWriter::new();
    let err = dump.set_timestamp(u64::from(u32::MAX) + 1).unwrap_err();
    assert!(matches!(
        err,
        WriterError::OutOfRange {
            field: "time_date_stamp",
            ..
        }
    ));
}

#[test]
fn failed_memory_read_leaves_the_signature_zero() {
    let mut process = test_process(CpuArchitecture::Amd64);
    let mut thread = ThreadSnapshot::new(1, CpuContext::new_amd64());
    thread.stack = Some(MemorySnapshot::from_bytes(0x1000, vec![0xaa; 64]));
    process.threads.push(thread);

    let mut failspot_client = FailSpotName::testing_client();
    failspot_client.set_enabled(FailSpotName::ReadMemoryRegion, true);

    let mut sink = BufferWriter::new();
    let result = write_minidump(&process, DumpOptions::default(), &mut sink);
    failspot_client.set_enabled(FailSpotName::ReadMemoryRegion, false);

    assert!(matches!(result, Err(WriterError::MemoryRead(_))));

    // The header was emitted, but its signature must still be zero so the
    // partial file can't be mistaken for a dump
    let bytes = sink.into_inner();
    assert!(bytes.len() >= 32);
    assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
}

#[test]
fn full_snapshot_reads_back_with_an_independent_reader() {
    let mut process = test_process(CpuArchitecture::Amd64);
    process.process_id = 0xbeef;
    process.process_start_time = Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    process.process_cpu_user_time = Duration::from_secs(42);
    process.process_cpu_system_time = Duration::from_secs(7);
    process
        .annotations
        .insert("channel".to_owned(), "beta".to_owned());
    process
        .annotations
        .insert("version".to_owned(), "3.1.4".to_owned());
    process.report_id = MDGUID {
        data1: 0x11223344,
        data2: 0x5566,
        data3: 0x7788,
        data4: [1, 2, 3, 4, 5, 6, 7, 8],
    };

    let mut main_thread = ThreadSnapshot::new(100, CpuContext::new_amd64());
    main_thread.name = Some("main".to_owned());
    main_thread.stack = Some(MemorySnapshot::from_bytes(0x7fff_0000, vec![0x11; 128]));
    process.threads.push(main_thread);

    let mut worker = ThreadSnapshot::new(101, CpuContext::new_amd64());
    worker.name = Some("worker-0".to_owned());
    process.threads.push(worker);

    let mut module = ModuleSnapshot::new("/usr/bin/app", 0x0040_0000, 0x0010_0000);
    module.timestamp = 0x5f00_0000;
    module.file_version = [1, 2, 3, 4];
    module.debug_id = Some(DebugId::Pdb70 {
        uuid: MDGUID {
            data1: 0xaabbccdd,
            data2: 0x1122,
            data3: 0x3344,
            data4: [9, 8, 7, 6, 5, 4, 3, 2],
        },
        age: 1,
    });
    module
        .annotations_map
        .insert("build".to_owned(), "release".to_owned());
    module
        .annotation_objects
        .push(AnnotationSnapshot::string("breadcrumb", "clicked save"));
    process.modules.push(module);

    process
        .extra_memory
        .push(MemorySnapshot::from_bytes(0x9000_0000, vec![0x77; 48]));

    let bytes = write_to_buffer(&process);
    let dump = Minidump::read(bytes).expect("reader rejected the dump");

    let system: MinidumpSystemInfo = dump.get_stream().unwrap();
    assert_eq!(system.raw.platform_id, PlatformId::Linux as u32);
    assert_eq!(
        system.raw.processor_architecture,
        ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64 as u16
    );
    assert_eq!(system.raw.number_of_processors, 8);
    assert_eq!(system.raw.major_version, 6);

    let threads: MinidumpThreadList = dump.get_stream().unwrap();
    assert_eq!(threads.threads.len(), 2);
    assert_eq!(threads.threads[0].raw.thread_id, 100);
    assert_eq!(threads.threads[1].raw.thread_id, 101);
    assert_eq!(threads.threads[1].raw.stack.memory.data_size, 0);

    let modules: MinidumpModuleList = dump.get_stream().unwrap();
    let module = modules.module_at_address(0x0040_0000).unwrap();
    assert_eq!(module.code_file(), "/usr/bin/app");
    assert_eq!(module.size(), 0x0010_0000);

    let memory_list: MinidumpMemoryList = dump.get_stream().unwrap();
    let extra = memory_list.memory_at_address(0x9000_0000).unwrap();
    assert_eq!(extra.bytes, &[0x77; 48]);
    assert!(memory_list.memory_at_address(0x7fff_0000).is_some());

    let misc_info: MinidumpMiscInfo = dump.get_stream().unwrap();
    if let minidump::RawMiscInfo::MiscInfo2(mi) = &misc_info.raw {
        assert_eq!(
            mi.flags1,
            MiscInfoFlags::MINIDUMP_MISC1_PROCESS_ID.bits()
                | MiscInfoFlags::MINIDUMP_MISC1_PROCESS_TIMES.bits()
        );
        assert_eq!(mi.process_id, 0xbeef);
        assert_eq!(mi.process_create_time, 1_700_000_000);
        assert_eq!(mi.process_user_time, 42);
        assert_eq!(mi.process_kernel_time, 7);
    } else {
        panic!("unexpected misc info type {:?}", misc_info);
    }
}

#[test]
fn thread_names_stream_carries_utf16_names_behind_rva64() {
    let mut process = test_process(CpuArchitecture::Amd64);
    let mut thread = ThreadSnapshot::new(0x1234, CpuContext::new_amd64());
    thread.name = Some("io-loop".to_owned());
    process.threads.push(thread);
    // An unnamed thread contributes no entry
    process
        .threads
        .push(ThreadSnapshot::new(0x5678, CpuContext::new_amd64()));

    let bytes = write_to_buffer(&process);

    let entry =
        find_stream(&bytes, MDStreamType::ThreadNamesStream as u32).expect("no thread names");
    let rva = entry.location.rva as usize;

    let count: u32 = bytes.pread_with(rva, scroll::LE).unwrap();
    assert_eq!(count, 1);

    let name_entry: MDRawThreadName = bytes.pread_with(rva + 4, scroll::LE).unwrap();
    assert_eq!(name_entry.thread_id, 0x1234);

    let name_rva = name_entry.thread_name_rva as usize;
    let byte_len: u32 = bytes.pread_with(name_rva, scroll::LE).unwrap();
    assert_eq!(byte_len as usize, "io-loop".len() * 2);

    let mut decoded = Vec::new();
    for index in 0..(byte_len as usize / 2) {
        let unit: u16 = bytes
            .pread_with(name_rva + 4 + index * 2, scroll::LE)
            .unwrap();
        decoded.push(unit);
    }
    assert_eq!(String::from_utf16(&decoded).unwrap(), "io-loop");

    let terminator: u16 = bytes
        .pread_with(name_rva + 4 + byte_len as usize, scroll::LE)
        .unwrap();
    assert_eq!(terminator, 0);
}

#[test]
fn extension_info_stream_carries_process_and_module_annotations() {
    let mut process = test_process(CpuArchitecture::Amd64);
    process
        .annotations
        .insert("channel".to_owned(), "nightly".to_owned());

    let mut module = ModuleSnapshot::new("libapp.so", 0x1000, 0x2000);
    module.annotations_list.push("early log line".to_owned());
    module
        .annotations_map
        .insert("lang".to_owned(), "rust".to_owned());
    process.modules.push(module);

    let bytes = write_to_buffer(&process);

    let entry = find_stream(&bytes, MDStreamType::CrashpadInfoStream as u32)
        .expect("no extension info stream");
    let rva = entry.location.rva as usize;
    assert_eq!(entry.location.data_size, 52);

    let version: u32 = bytes.pread_with(rva, scroll::LE).unwrap();
    assert_eq!(version, MD_CRASHPAD_INFO_VERSION);

    // version + report_id + client_id take the first 36 bytes, then the
    // simple-annotation and module-list location descriptors
    let simple_size: u32 = bytes.pread_with(rva + 36, scroll::LE).unwrap();
    let simple_rva: u32 = bytes.pread_with(rva + 40, scroll::LE).unwrap();
    assert!(simple_size >= 4);

    let entry_count: u32 = bytes.pread_with(simple_rva as usize, scroll::LE).unwrap();
    assert_eq!(entry_count, 1);
    let key_rva: u32 = bytes
        .pread_with(simple_rva as usize + 4, scroll::LE)
        .unwrap();
    let value_rva: u32 = bytes
        .pread_with(simple_rva as usize + 8, scroll::LE)
        .unwrap();
    assert_eq!(read_utf8_blob(&bytes, key_rva), "channel");
    assert_eq!(read_utf8_blob(&bytes, value_rva), "nightly");

    let module_list_rva: u32 = bytes.pread_with(rva + 48, scroll::LE).unwrap();
    let module_count: u32 = bytes
        .pread_with(module_list_rva as usize, scroll::LE)
        .unwrap();
    assert_eq!(module_count, 1);
    let module_index: u32 = bytes
        .pread_with(module_list_rva as usize + 4, scroll::LE)
        .unwrap();
    assert_eq!(module_index, 0);

    // Follow the link to the module's record and its dictionary
    let module_info_rva: u32 = bytes
        .pread_with(module_list_rva as usize + 12, scroll::LE)
        .unwrap();
    let module_info_version: u32 = bytes
        .pread_with(module_info_rva as usize, scroll::LE)
        .unwrap();
    assert_eq!(module_info_version, MD_MODULE_CRASHPAD_INFO_VERSION);

    let list_annotations_rva: u32 = bytes
        .pread_with(module_info_rva as usize + 8, scroll::LE)
        .unwrap();
    let list_count: u32 = bytes
        .pread_with(list_annotations_rva as usize, scroll::LE)
        .unwrap();
    assert_eq!(list_count, 1);
    let first_annotation_rva: u32 = bytes
        .pread_with(list_annotations_rva as usize + 4, scroll::LE)
        .unwrap();
    assert_eq!(read_utf8_blob(&bytes, first_annotation_rva), "early log line");
}

#[test]
fn stack_trace_stream_is_eight_byte_aligned_and_self_consistent() {
    let mut process = test_process(CpuArchitecture::Amd64);
    let mut thread = ThreadSnapshot::new(11, CpuContext::new_amd64());
    thread.frames = vec![
        FrameSnapshot {
            instruction_addr: 0xfff7_0001,
            symbol: "handle_input".to_owned(),
        },
        FrameSnapshot {
            instruction_addr: 0xfff7_0002,
            symbol: "main".to_owned(),
        },
    ];
    process.threads.push(thread);

    let mut sink = BufferWriter::new();
    let options = DumpOptions {
        stack_traces: true,
        ..Default::default()
    };
    write_minidump(&process, options, &mut sink).unwrap();
    let bytes = sink.into_inner();

    let entry = find_stream(&bytes, MD_STREAM_TYPE_STACK_TRACES).expect("no stacktrace stream");
    let rva = entry.location.rva as usize;
    assert_eq!(rva % 8, 0);

    let version: u32 = bytes.pread_with(rva, scroll::LE).unwrap();
    let num_threads: u32 = bytes.pread_with(rva + 4, scroll::LE).unwrap();
    let num_frames: u32 = bytes.pread_with(rva + 8, scroll::LE).unwrap();
    let symbol_bytes: u32 = bytes.pread_with(rva + 12, scroll::LE).unwrap();
    assert_eq!(version, MD_STACK_TRACE_VERSION);
    assert_eq!(num_threads, 1);
    assert_eq!(num_frames, 2);
    assert_eq!(symbol_bytes as usize, "handle_input".len() + "main".len());

    let thread_id: u64 = bytes.pread_with(rva + 16, scroll::LE).unwrap();
    let start_frame: u32 = bytes.pread_with(rva + 24, scroll::LE).unwrap();
    let thread_frames: u32 = bytes.pread_with(rva + 28, scroll::LE).unwrap();
    assert_eq!(thread_id, 11);
    assert_eq!(start_frame, 0);
    assert_eq!(thread_frames, 2);

    let frames_base = rva + 16 + 16;
    let first_addr: u64 = bytes.pread_with(frames_base, scroll::LE).unwrap();
    let first_sym_offset: u32 = bytes.pread_with(frames_base + 8, scroll::LE).unwrap();
    let first_sym_len: u32 = bytes.pread_with(frames_base + 12, scroll::LE).unwrap();
    assert_eq!(first_addr, 0xfff7_0001);
    assert_eq!(first_sym_offset, 0);
    assert_eq!(first_sym_len as usize, "handle_input".len());

    let pool_base = frames_base + 2 * 16;
    assert_eq!(
        &bytes[pool_base..pool_base + symbol_bytes as usize],
        b"handle_inputmain"
    );
    assert_eq!(
        entry.location.data_size as usize,
        16 + 16 + 2 * 16 + symbol_bytes as usize
    );
}

#[test]
fn every_stream_in_a_full_dump_is_aligned_and_inside_the_file() {
    let mut process = test_process(CpuArchitecture::Amd64);
    let mut thread = ThreadSnapshot::new(1, CpuContext::new_amd64());
    thread.name = Some("t".to_owned());
    thread.stack = Some(MemorySnapshot::from_bytes(0x1000, vec![1; 40]));
    process.threads.push(thread);
    process.modules.push(ModuleSnapshot::new("m", 0x4000, 0x100));
    process.annotations.insert("k".to_owned(), "v".to_owned());

    let bytes = write_to_buffer(&process);

    let directory = read_directory(&bytes);
    assert!(!directory.is_empty());
    for entry in directory {
        assert_eq!(entry.location.rva % 4, 0, "stream {:#x}", entry.stream_type);
        assert!(
            entry.location.rva as usize + entry.location.data_size as usize <= bytes.len(),
            "stream {:#x} overruns the file",
            entry.stream_type
        );
    }
}

#[test]
fn overlapping_extra_memory_is_not_written_twice() {
    let mut process = test_process(CpuArchitecture::Amd64);
    let mut thread = ThreadSnapshot::new(1, CpuContext::new_amd64());
    thread.stack = Some(MemorySnapshot::from_bytes(0x5000, vec![0x44; 16]));
    process.threads.push(thread);

    // Same (address, size) as the stack, plus a genuine extra
    process
        .extra_memory
        .push(MemorySnapshot::from_bytes(0x5000, vec![0x44; 16]));
    process
        .extra_memory
        .push(MemorySnapshot::from_bytes(0x6000, vec![0x55; 8]));

    let bytes = write_to_buffer(&process);

    let entry = find_stream(&bytes, MDStreamType::MemoryListStream as u32).unwrap();
    let count: u32 = bytes.pread_with(entry.location.rva as usize, scroll::LE).unwrap();
    assert_eq!(count, 2, "the aliasing range must be deduplicated");
}

#[test]
fn context_shapes_roundtrip_byte_for_byte() {
    // Serialize, parse, and re-serialize each architecture; byte equality
    // means neither direction loses a field
    fn check<T>(value: T)
    where
        T: for<'a> scroll::ctx::TryFromCtx<'a, scroll::Endian, Error = scroll::Error>
            + scroll::ctx::TryIntoCtx<scroll::Endian, Error = scroll::Error>
            + scroll::ctx::SizeWith<scroll::Endian>,
    {
        let size = <T as scroll::ctx::SizeWith<scroll::Endian>>::size_with(&scroll::LE);
        let mut first = vec![0u8; size];
        scroll::Pwrite::pwrite_with(first.as_mut_slice(), value, 0, scroll::LE).unwrap();

        let parsed: T = first.as_slice().pread_with(0, scroll::LE).unwrap();
        let mut second = vec![0u8; size];
        scroll::Pwrite::pwrite_with(second.as_mut_slice(), parsed, 0, scroll::LE).unwrap();

        assert_eq!(first, second);
    }

    let mut x86 = CONTEXT_X86::default();
    x86.context_flags = MD_CONTEXT_X86_ALL;
    x86.eip = 0x1234_5678;
    x86.extended_registers[511] = 0xbe;
    check(x86);

    let mut amd64 = CONTEXT_AMD64::default();
    amd64.context_flags = MD_CONTEXT_AMD64_ALL;
    amd64.rip = 0x0102_0304_0506_0708;
    let mut float_save = format::XMM_SAVE_AREA32::default();
    float_save.xmm_registers[15] = u128::MAX - 1;
    amd64
        .float_save
        .pwrite_with(float_save, 0, scroll::LE)
        .unwrap();
    check(amd64);

    let mut arm = CONTEXT_ARM::default();
    arm.context_flags = MD_CONTEXT_ARM_FULL;
    arm.iregs[15] = 0xcafe_f00d;
    check(arm);

    let mut arm64 = CONTEXT_ARM64::default();
    arm64.context_flags = MD_CONTEXT_ARM64_FULL;
    arm64.pc = 0xffff_8000_0000_1234;
    arm64.sp = 0x7fff_ffff_0000;
    check(arm64);
}

#[test]
fn string_blobs_roundtrip_through_lossy_conversion() {
    // Well-formed input survives unchanged; ill-formed input degrades to
    // replacement characters without aborting the dump
    let cases: &[(&[u8], &str)] = &[
        (b"plain", "plain"),
        ("käse".as_bytes(), "käse"),
        (b"tr\xf6del", "tr\u{fffd}del"),
        (b"", ""),
    ];

    for (input, expected) in cases {
        let converted = String::from_utf8_lossy(input);
        assert_eq!(&converted, expected);
    }
}

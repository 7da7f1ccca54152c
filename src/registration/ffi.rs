//! The slice of Win32 the registration server needs, declared directly.
//!
//! Everything here is process/pipe/event plumbing that has been stable since
//! the APIs were introduced; declaring it beats pulling a binding crate for
//! a dozen functions.

#![allow(non_snake_case, non_camel_case_types, clippy::upper_case_acronyms)]

pub type BOOL = i32;
pub type DWORD = u32;
pub type HANDLE = isize;

pub const FALSE: BOOL = 0;
pub const TRUE: BOOL = 1;

pub const INVALID_HANDLE_VALUE: HANDLE = -1;

pub const ERROR_BROKEN_PIPE: DWORD = 109;
pub const ERROR_PIPE_CONNECTED: DWORD = 535;
pub const ERROR_IO_PENDING: DWORD = 997;

pub const WAIT_OBJECT_0: DWORD = 0;
pub const WAIT_TIMEOUT: DWORD = 258;
pub const WAIT_FAILED: DWORD = 0xffffffff;
pub const INFINITE: DWORD = 0xffffffff;

pub const PIPE_ACCESS_DUPLEX: DWORD = 0x0000_0003;
pub const FILE_FLAG_FIRST_PIPE_INSTANCE: DWORD = 0x0008_0000;
pub const FILE_FLAG_OVERLAPPED: DWORD = 0x4000_0000;
pub const PIPE_TYPE_MESSAGE: DWORD = 0x0000_0004;
pub const PIPE_READMODE_MESSAGE: DWORD = 0x0000_0002;
pub const PIPE_WAIT: DWORD = 0x0000_0000;

pub const GENERIC_READ: DWORD = 0x8000_0000;
pub const GENERIC_WRITE: DWORD = 0x4000_0000;
pub const OPEN_EXISTING: DWORD = 3;

pub type PROCESS_ACCESS_RIGHTS = DWORD;
pub const PROCESS_ALL_ACCESS: PROCESS_ACCESS_RIGHTS = 0x001f_ffff;

#[repr(C)]
pub struct OVERLAPPED {
    pub Internal: usize,
    pub InternalHigh: usize,
    pub Offset: DWORD,
    pub OffsetHigh: DWORD,
    pub hEvent: HANDLE,
}

impl Default for OVERLAPPED {
    fn default() -> Self {
        Self {
            Internal: 0,
            InternalHigh: 0,
            Offset: 0,
            OffsetHigh: 0,
            hEvent: 0,
        }
    }
}

#[repr(C)]
pub struct SECURITY_ATTRIBUTES {
    pub nLength: DWORD,
    pub lpSecurityDescriptor: *mut core::ffi::c_void,
    pub bInheritHandle: BOOL,
}

unsafe extern "system" {
    pub fn CloseHandle(hObject: HANDLE) -> BOOL;
    pub fn GetLastError() -> DWORD;

    pub fn CreateEventW(
        lpEventAttributes: *const SECURITY_ATTRIBUTES,
        bManualReset: BOOL,
        bInitialState: BOOL,
        lpName: *const u16,
    ) -> HANDLE;
    pub fn SetEvent(hEvent: HANDLE) -> BOOL;
    pub fn ResetEvent(hEvent: HANDLE) -> BOOL;
    pub fn WaitForMultipleObjects(
        nCount: DWORD,
        lpHandles: *const HANDLE,
        bWaitAll: BOOL,
        dwMilliseconds: DWORD,
    ) -> DWORD;

    pub fn CreateNamedPipeW(
        lpName: *const u16,
        dwOpenMode: DWORD,
        dwPipeMode: DWORD,
        nMaxInstances: DWORD,
        nOutBufferSize: DWORD,
        nInBufferSize: DWORD,
        nDefaultTimeOut: DWORD,
        lpSecurityAttributes: *const SECURITY_ATTRIBUTES,
    ) -> HANDLE;
    pub fn ConnectNamedPipe(hNamedPipe: HANDLE, lpOverlapped: *mut OVERLAPPED) -> BOOL;
    pub fn DisconnectNamedPipe(hNamedPipe: HANDLE) -> BOOL;
    pub fn GetNamedPipeClientProcessId(
        Pipe: HANDLE,
        ClientProcessId: *mut DWORD,
    ) -> BOOL;
    pub fn ImpersonateNamedPipeClient(NamedPipe: HANDLE) -> BOOL;
    pub fn SetNamedPipeHandleState(
        hNamedPipe: HANDLE,
        lpMode: *mut DWORD,
        lpMaxCollectionCount: *mut DWORD,
        lpCollectDataTimeout: *mut DWORD,
    ) -> BOOL;

    pub fn ReadFile(
        hFile: HANDLE,
        lpBuffer: *mut u8,
        nNumberOfBytesToRead: DWORD,
        lpNumberOfBytesRead: *mut DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    pub fn WriteFile(
        hFile: HANDLE,
        lpBuffer: *const u8,
        nNumberOfBytesToWrite: DWORD,
        lpNumberOfBytesWritten: *mut DWORD,
        lpOverlapped: *mut OVERLAPPED,
    ) -> BOOL;
    pub fn GetOverlappedResult(
        hFile: HANDLE,
        lpOverlapped: *const OVERLAPPED,
        lpNumberOfBytesTransferred: *mut DWORD,
        bWait: BOOL,
    ) -> BOOL;
    pub fn CancelIo(hFile: HANDLE) -> BOOL;

    pub fn CreateFileW(
        lpFileName: *const u16,
        dwDesiredAccess: DWORD,
        dwShareMode: DWORD,
        lpSecurityAttributes: *const SECURITY_ATTRIBUTES,
        dwCreationDisposition: DWORD,
        dwFlagsAndAttributes: DWORD,
        hTemplateFile: HANDLE,
    ) -> HANDLE;
    pub fn OpenProcess(
        dwDesiredAccess: PROCESS_ACCESS_RIGHTS,
        bInheritHandle: BOOL,
        dwProcessId: DWORD,
    ) -> HANDLE;

    pub fn RevertToSelf() -> BOOL;
}

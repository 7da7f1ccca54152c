//! The real transport: overlapped named pipes and event-based waiting.
//!
//! Pipes are message-mode, duplex, overlapped, with 512-byte buffers. Each
//! instance owns one manual-reset event that signals every completion on
//! that pipe; the wait set watches those events plus one stop event.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::sync::Arc;
use std::time::Duration;

use super::ffi;
use super::pipe_state::{
    IoOutcome, OwnedProcess, PipeInstance, RegistrationDelegate, RegistrationPipeState,
};
use super::protocol::{RegistrationRequest, RegistrationResponse};
use super::server::{RegistrationServer, ServerError, ServerExit, WaitOutcome, WaitSet};

/// How many pipe instances one server keeps listening.
const PIPE_INSTANCES: usize = 3;
/// In/out buffer sizes of each pipe instance.
const PIPE_BUFFER_SIZE: u32 = 512;

/// A kernel handle closed on drop.
#[derive(Debug)]
struct OwnedHandle(ffi::HANDLE);

// Kernel handles are thread-agnostic
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn is_valid(&self) -> bool {
        self.0 != 0 && self.0 != ffi::INVALID_HANDLE_VALUE
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            // SAFETY: we are the sole owner
            unsafe {
                ffi::CloseHandle(self.0);
            }
        }
    }
}

fn last_os_error() -> io::Error {
    // SAFETY: no preconditions
    io::Error::from_raw_os_error(unsafe { ffi::GetLastError() } as i32)
}

fn wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(Some(0)).collect()
}

/// One overlapped named-pipe instance.
pub struct WindowsPipeInstance {
    pipe: OwnedHandle,
    event: OwnedHandle,
    // Boxed so the kernel's pointer stays put however the instance moves
    overlapped: Box<ffi::OVERLAPPED>,
    buffer: [u8; PIPE_BUFFER_SIZE as usize],
    last_read_len: usize,
}

impl WindowsPipeInstance {
    /// Creates one listening instance of `pipe_name`. Only the first
    /// instance of a name may claim `first_instance`.
    pub fn create(pipe_name: &str, first_instance: bool) -> io::Result<Self> {
        let mut open_mode = ffi::PIPE_ACCESS_DUPLEX | ffi::FILE_FLAG_OVERLAPPED;
        if first_instance {
            open_mode |= ffi::FILE_FLAG_FIRST_PIPE_INSTANCE;
        }

        let name = wide(pipe_name);
        // SAFETY: name is NUL-terminated and outlives the call
        let pipe = OwnedHandle(unsafe {
            ffi::CreateNamedPipeW(
                name.as_ptr(),
                open_mode,
                ffi::PIPE_TYPE_MESSAGE | ffi::PIPE_READMODE_MESSAGE | ffi::PIPE_WAIT,
                PIPE_INSTANCES as u32,
                PIPE_BUFFER_SIZE,
                PIPE_BUFFER_SIZE,
                20, // default timeout, milliseconds
                std::ptr::null(),
            )
        });
        if !pipe.is_valid() {
            return Err(last_os_error());
        }

        // Manual reset: the completion dispatcher resets it explicitly
        // SAFETY: trivial arguments
        let event = OwnedHandle(unsafe {
            ffi::CreateEventW(std::ptr::null(), ffi::TRUE, ffi::FALSE, std::ptr::null())
        });
        if !event.is_valid() {
            return Err(last_os_error());
        }

        let mut overlapped = Box::new(ffi::OVERLAPPED::default());
        overlapped.hEvent = event.0;

        Ok(Self {
            pipe,
            event,
            overlapped,
            buffer: [0; PIPE_BUFFER_SIZE as usize],
            last_read_len: 0,
        })
    }

    /// The event the wait set watches for this pipe.
    pub fn completion_event(&self) -> ffi::HANDLE {
        self.event.0
    }

    fn outcome(&self, ok: ffi::BOOL, transferred: u32) -> io::Result<IoOutcome> {
        if ok != ffi::FALSE {
            return Ok(IoOutcome::Done(transferred as usize));
        }
        // SAFETY: immediately after the failed call
        match unsafe { ffi::GetLastError() } {
            ffi::ERROR_IO_PENDING => Ok(IoOutcome::Pending),
            error => Err(io::Error::from_raw_os_error(error as i32)),
        }
    }
}

impl PipeInstance for WindowsPipeInstance {
    fn connect(&mut self) -> io::Result<IoOutcome> {
        // SAFETY: the overlapped struct is boxed and owned by self
        let ok = unsafe { ffi::ConnectNamedPipe(self.pipe.0, self.overlapped.as_mut()) };
        if ok == ffi::FALSE {
            // A client that raced in between create and connect is fine
            // SAFETY: immediately after the failed call
            if unsafe { ffi::GetLastError() } == ffi::ERROR_PIPE_CONNECTED {
                return Ok(IoOutcome::Done(0));
            }
        }
        self.outcome(ok, 0)
    }

    fn read(&mut self, max: usize) -> io::Result<IoOutcome> {
        let max = max.min(self.buffer.len());
        let mut transferred = 0;
        // SAFETY: buffer and overlapped live in self, which outlives the op
        let ok = unsafe {
            ffi::ReadFile(
                self.pipe.0,
                self.buffer.as_mut_ptr(),
                max as u32,
                &mut transferred,
                self.overlapped.as_mut(),
            )
        };
        let outcome = self.outcome(ok, transferred)?;
        if let IoOutcome::Done(len) = outcome {
            self.last_read_len = len;
        }
        Ok(outcome)
    }

    fn read_buffer(&self) -> &[u8] {
        &self.buffer[..self.last_read_len]
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<IoOutcome> {
        let len = bytes.len().min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&bytes[..len]);
        let mut transferred = 0;
        // SAFETY: buffer and overlapped live in self, which outlives the op
        let ok = unsafe {
            ffi::WriteFile(
                self.pipe.0,
                self.buffer.as_ptr(),
                len as u32,
                &mut transferred,
                self.overlapped.as_mut(),
            )
        };
        self.outcome(ok, transferred)
    }

    fn complete(&mut self) -> io::Result<usize> {
        let mut transferred = 0;
        // SAFETY: the overlapped struct belongs to this pipe's last op
        let ok = unsafe {
            ffi::GetOverlappedResult(
                self.pipe.0,
                self.overlapped.as_ref(),
                &mut transferred,
                ffi::FALSE,
            )
        };
        let error = if ok == ffi::FALSE {
            Some(last_os_error())
        } else {
            None
        };

        // Manual-reset event: clear it for the next operation
        // SAFETY: event is owned by self
        unsafe {
            ffi::ResetEvent(self.event.0);
        }

        match error {
            Some(error) => Err(error),
            None => {
                self.last_read_len = transferred as usize;
                Ok(transferred as usize)
            }
        }
    }

    fn disconnect(&mut self) -> io::Result<()> {
        // SAFETY: pipe is owned by self
        if unsafe { ffi::DisconnectNamedPipe(self.pipe.0) } == ffi::FALSE {
            return Err(last_os_error());
        }
        Ok(())
    }

    fn cancel(&mut self) {
        // SAFETY: pipe is owned by self
        if unsafe { ffi::CancelIo(self.pipe.0) } == ffi::FALSE {
            log::error!("CancelIo: {}", last_os_error());
        }
    }

    fn peer_process_id(&mut self) -> Option<u32> {
        let mut pid = 0;
        // SAFETY: pipe is owned by self
        if unsafe { ffi::GetNamedPipeClientProcessId(self.pipe.0, &mut pid) } == ffi::FALSE {
            log::error!("GetNamedPipeClientProcessId: {}", last_os_error());
            return None;
        }
        Some(pid)
    }

    fn open_peer_process(&mut self, pid: u32) -> io::Result<OwnedProcess> {
        // SAFETY: plain syscall
        let mut process =
            unsafe { ffi::OpenProcess(ffi::PROCESS_ALL_ACCESS, ffi::FALSE, pid) };

        if process == 0 {
            // The client may be reachable with its own credentials
            // SAFETY: pipe is owned by self; RevertToSelf undoes the
            // impersonation whatever OpenProcess did
            unsafe {
                if ffi::ImpersonateNamedPipeClient(self.pipe.0) != ffi::FALSE {
                    process = ffi::OpenProcess(ffi::PROCESS_ALL_ACCESS, ffi::FALSE, pid);
                    ffi::RevertToSelf();
                }
            }
        }

        if process == 0 {
            return Err(last_os_error());
        }
        // SAFETY: we just opened it and own it exclusively
        Ok(unsafe { OwnedProcess::from_raw(process) })
    }
}

/// Fires the server's stop event. Cloneable and callable from any thread.
#[derive(Clone)]
pub struct StopEvents {
    event: Arc<OwnedHandle>,
}

impl StopEvents {
    pub fn stop(&self) {
        // SAFETY: event is owned by the Arc
        if unsafe { ffi::SetEvent(self.event.0) } == ffi::FALSE {
            log::error!("SetEvent: {}", last_os_error());
        }
    }
}

/// Waits on the pipes' completion events plus the stop event.
pub struct WindowsWaitSet {
    // Pipe completion events first, stop event always last
    handles: Vec<ffi::HANDLE>,
    stop_event: Arc<OwnedHandle>,
}

impl WindowsWaitSet {
    pub fn new(completion_events: Vec<ffi::HANDLE>) -> io::Result<(Self, StopEvents)> {
        // Auto-reset: exactly one wait observes the stop
        // SAFETY: trivial arguments
        let stop_event = OwnedHandle(unsafe {
            ffi::CreateEventW(std::ptr::null(), ffi::FALSE, ffi::FALSE, std::ptr::null())
        });
        if !stop_event.is_valid() {
            return Err(last_os_error());
        }
        let stop_event = Arc::new(stop_event);

        let mut handles = completion_events;
        handles.push(stop_event.0);

        let stopper = StopEvents {
            event: Arc::clone(&stop_event),
        };
        Ok((
            Self {
                handles,
                stop_event,
            },
            stopper,
        ))
    }

    fn millis(timeout: Option<Duration>) -> ffi::DWORD {
        match timeout {
            Some(timeout) => timeout.as_millis().min(u128::from(ffi::INFINITE - 1)) as u32,
            None => ffi::INFINITE,
        }
    }
}

impl WaitSet for WindowsWaitSet {
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        let stop_index = self.handles.len() - 1;
        // SAFETY: handles outlive the call
        let result = unsafe {
            ffi::WaitForMultipleObjects(
                self.handles.len() as u32,
                self.handles.as_ptr(),
                ffi::FALSE,
                Self::millis(timeout),
            )
        };

        if result == ffi::WAIT_TIMEOUT {
            return Ok(WaitOutcome::TimedOut);
        }
        if result == ffi::WAIT_FAILED {
            return Err(last_os_error());
        }

        let index = (result - ffi::WAIT_OBJECT_0) as usize;
        if index == stop_index {
            Ok(WaitOutcome::Stop)
        } else {
            Ok(WaitOutcome::Completion(index))
        }
    }

    fn remove(&mut self, index: usize) {
        debug_assert!(index < self.handles.len() - 1);
        self.handles.remove(index);
    }

    fn drain(&mut self) -> io::Result<()> {
        let pipe_events = &self.handles[..self.handles.len() - 1];
        if pipe_events.is_empty() {
            return Ok(());
        }

        // SAFETY: handles outlive the call
        let result = unsafe {
            ffi::WaitForMultipleObjects(
                pipe_events.len() as u32,
                pipe_events.as_ptr(),
                ffi::TRUE,
                ffi::INFINITE,
            )
        };
        if result == ffi::WAIT_FAILED {
            return Err(last_os_error());
        }
        Ok(())
    }
}

/// Creates the standard pipe set for `pipe_name` and serves it until
/// stopped. Returns the stop handle through `on_listening` before blocking.
pub fn run_server(
    pipe_name: &str,
    delegate: &dyn RegistrationDelegate,
    timeout: Option<Duration>,
    on_listening: impl FnOnce(StopEvents),
) -> Result<ServerExit, ServerError> {
    let mut instances = Vec::with_capacity(PIPE_INSTANCES);
    for index in 0..PIPE_INSTANCES {
        match WindowsPipeInstance::create(pipe_name, index == 0) {
            Ok(instance) => instances.push(instance),
            Err(err) => log::error!("CreateNamedPipe: {err}"),
        }
    }

    let events = instances
        .iter()
        .map(|instance| instance.completion_event())
        .collect();
    let (waiter, stopper) = WindowsWaitSet::new(events).map_err(ServerError::Wait)?;

    let pipes = instances
        .into_iter()
        .map(|instance| RegistrationPipeState::new(instance, delegate))
        .collect();

    on_listening(stopper);

    let server = match timeout {
        Some(timeout) => RegistrationServer::with_timeout(waiter, timeout),
        None => RegistrationServer::new(waiter),
    };
    server.run(pipes, delegate)
}

/// Client side of the handshake: registers this process with the handler
/// listening on `pipe_name` and returns the two event handle values.
pub fn register_with_handler(
    pipe_name: &str,
    client_process_id: u32,
    info_address: u64,
) -> io::Result<RegistrationResponse> {
    let name = wide(pipe_name);
    // SAFETY: name is NUL-terminated and outlives the call
    let pipe = OwnedHandle(unsafe {
        ffi::CreateFileW(
            name.as_ptr(),
            ffi::GENERIC_READ | ffi::GENERIC_WRITE,
            0,
            std::ptr::null(),
            ffi::OPEN_EXISTING,
            0,
            0,
        )
    });
    if !pipe.is_valid() {
        return Err(last_os_error());
    }

    // The server talks message mode; switch our end to match
    let mut mode = ffi::PIPE_READMODE_MESSAGE;
    // SAFETY: pipe is owned above
    if unsafe {
        ffi::SetNamedPipeHandleState(
            pipe.0,
            &mut mode,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    } == ffi::FALSE
    {
        return Err(last_os_error());
    }

    let request = RegistrationRequest {
        client_process_id,
        info_address,
    }
    .to_bytes();
    let mut written = 0;
    // SAFETY: synchronous write, buffers outlive the call
    if unsafe {
        ffi::WriteFile(
            pipe.0,
            request.as_ptr(),
            request.len() as u32,
            &mut written,
            std::ptr::null_mut(),
        )
    } == ffi::FALSE
    {
        return Err(last_os_error());
    }

    let mut response = [0u8; RegistrationResponse::WIRE_SIZE];
    let mut read = 0;
    // SAFETY: synchronous read, buffers outlive the call
    if unsafe {
        ffi::ReadFile(
            pipe.0,
            response.as_mut_ptr(),
            response.len() as u32,
            &mut read,
            std::ptr::null_mut(),
        )
    } == ffi::FALSE
    {
        return Err(last_os_error());
    }

    RegistrationResponse::read_from(&response[..read as usize])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed response"))
}

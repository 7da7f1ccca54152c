//! Per-pipe state machine of the registration server.
//!
//! One instance serves one pipe handle and one client connection at a time:
//!
//! ```text
//! Listening --[client connect]--> Reading
//! Reading  --[full request received]--> Writing
//! Reading  --[bad size / bad client]--> Listening (reset)
//! Writing  --[response sent]--> WaitingForClose
//! WaitingForClose --[client closes]--> Listening (reset)
//! WaitingForClose --[extra data]--> Listening (reset)
//! ```
//!
//! Any I/O failure resets the connection; only a failure to get back to the
//! listening state retires the pipe. All I/O is asynchronous: each `issue_*`
//! either completes immediately or leaves a completion handler armed, and
//! the dispatcher calls [`on_completion`](RegistrationPipeState::on_completion)
//! when the transport signals.

use std::io;

use super::protocol::{RegistrationRequest, RegistrationResponse};
use super::RegistrationError;

/// Result of issuing an asynchronous pipe operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOutcome {
    /// Finished synchronously, transferring this many bytes.
    Done(usize),
    /// In flight; completion will be signaled.
    Pending,
}

/// An owned handle to a client process, released on drop.
#[derive(Debug)]
pub struct OwnedProcess {
    raw: isize,
}

impl OwnedProcess {
    /// Takes ownership of `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a process handle the caller owns and nothing else
    /// closes.
    pub unsafe fn from_raw(raw: isize) -> Self {
        Self { raw }
    }

    pub fn as_raw(&self) -> isize {
        self.raw
    }

    /// Releases ownership without closing.
    pub fn into_raw(self) -> isize {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

#[cfg(windows)]
impl Drop for OwnedProcess {
    fn drop(&mut self) {
        // SAFETY: from_raw's contract makes this the sole owner
        unsafe {
            super::ffi::CloseHandle(self.raw);
        }
    }
}

#[cfg(not(windows))]
impl Drop for OwnedProcess {
    fn drop(&mut self) {
        // Nothing to release on hosts without kernel handles; the type only
        // models ownership there
    }
}

/// One asynchronous pipe instance, as the state machine sees it.
///
/// Transports own their buffers: a read completes into an internal buffer
/// exposed through [`read_buffer`](PipeInstance::read_buffer), so an
/// overlapped operation never borrows from the state machine.
pub trait PipeInstance {
    /// Starts listening for a client connection.
    fn connect(&mut self) -> io::Result<IoOutcome>;

    /// Starts reading up to `max` bytes into the transport's buffer.
    fn read(&mut self, max: usize) -> io::Result<IoOutcome>;

    /// The bytes of the most recently completed read.
    fn read_buffer(&self) -> &[u8];

    /// Starts writing `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<IoOutcome>;

    /// Collects the result of the pending operation without blocking.
    /// Called exactly once per completion signal.
    fn complete(&mut self) -> io::Result<usize>;

    /// Drops the current client connection.
    fn disconnect(&mut self) -> io::Result<()>;

    /// Cancels outstanding I/O. The cancelled operation still delivers one
    /// final completion signal.
    fn cancel(&mut self);

    /// The peer's process id, where the OS can report it.
    fn peer_process_id(&mut self) -> Option<u32>;

    /// Opens the peer process, falling back to impersonating the pipe
    /// client when a direct open is denied.
    fn open_peer_process(&mut self, pid: u32) -> io::Result<OwnedProcess>;
}

/// The events a successful registration hands back to the client.
///
/// The values are handles valid in the *client* process. They are truncated
/// to 32 bits on the wire; `-1` (`INVALID_HANDLE_VALUE`) truncates to
/// `0xffffffff` and survives the client's sign-extension.
#[derive(Clone, Copy, Debug)]
pub struct RegisteredEvents {
    pub request_report_event: isize,
    pub report_complete_event: isize,
}

/// Handles registration requests on behalf of the server.
pub trait RegistrationDelegate {
    /// Called once the server is ready for clients to connect.
    fn on_started(&self);

    /// Registers a client: records the process handle and info-block
    /// address, and returns the two events the client will use.
    fn register_client(
        &self,
        client_process: OwnedProcess,
        info_address: u64,
    ) -> Result<RegisteredEvents, RegistrationError>;
}

#[derive(Clone, Copy, Debug)]
enum CompletionHandler {
    Connect,
    Read,
    Write,
    WaitForClose,
}

pub struct RegistrationPipeState<'d, P: PipeInstance> {
    pipe: P,
    delegate: &'d dyn RegistrationDelegate,
    handler: Option<CompletionHandler>,
    waiting_for_close: bool,
}

impl<'d, P: PipeInstance> RegistrationPipeState<'d, P> {
    pub fn new(pipe: P, delegate: &'d dyn RegistrationDelegate) -> Self {
        Self {
            pipe,
            delegate,
            handler: None,
            waiting_for_close: false,
        }
    }

    /// Starts listening. Returns false if the pipe could not even begin,
    /// in which case the instance is dead.
    pub fn initialize(&mut self) -> bool {
        self.issue_connect()
    }

    /// Cancels whatever is in flight. One final completion will still be
    /// signaled for the cancelled operation.
    pub fn stop(&mut self) {
        self.pipe.cancel();
    }

    /// Dispatches one completion signal. Returns false once the pipe has
    /// permanently failed and should be dropped from the wait set.
    pub fn on_completion(&mut self) -> bool {
        let handler = self.handler.take();
        let result = self.pipe.complete();

        match (handler, result) {
            (None, _) => {
                debug_assert!(false, "completion signaled with nothing in flight");
                self.reset_connection()
            }
            (Some(_), Err(err)) => {
                // A broken pipe is the expected way for the client to
                // acknowledge the response; anything else is noise worth a
                // log line. Either way the pipe goes back to listening.
                if !(self.waiting_for_close && err.kind() == io::ErrorKind::BrokenPipe) {
                    log::error!("pipe operation failed: {err}");
                }
                self.reset_connection()
            }
            (Some(CompletionHandler::Connect), Ok(_)) => self.on_connect_complete(),
            (Some(CompletionHandler::Read), Ok(transferred)) => self.on_read_complete(transferred),
            (Some(CompletionHandler::Write), Ok(transferred)) => {
                self.on_write_complete(transferred)
            }
            (Some(CompletionHandler::WaitForClose), Ok(transferred)) => {
                self.on_wait_for_close_complete(transferred)
            }
        }
    }

    fn on_connect_complete(&mut self) -> bool {
        self.issue_read()
    }

    fn on_read_complete(&mut self, transferred: usize) -> bool {
        match RegistrationRequest::read_from(&self.pipe.read_buffer()[..transferred]) {
            Ok(request) => self.handle_request(&request),
            Err(_) => {
                log::error!("invalid registration message size: {transferred}");
                self.reset_connection()
            }
        }
    }

    fn on_write_complete(&mut self, transferred: usize) -> bool {
        if transferred != RegistrationResponse::WIRE_SIZE {
            log::error!("incomplete response write, bytes written: {transferred}");
        }
        self.issue_wait_for_close()
    }

    fn on_wait_for_close_complete(&mut self, transferred: usize) -> bool {
        log::error!("unexpected extra data ({transferred} bytes) received from client");
        self.reset_connection()
    }

    fn issue_connect(&mut self) -> bool {
        match self.pipe.connect() {
            Ok(IoOutcome::Done(_)) => self.on_connect_complete(),
            Ok(IoOutcome::Pending) => {
                self.handler = Some(CompletionHandler::Connect);
                true
            }
            Err(err) => {
                log::error!("failed to listen on pipe: {err}");
                false
            }
        }
    }

    fn issue_read(&mut self) -> bool {
        match self.pipe.read(RegistrationRequest::WIRE_SIZE) {
            Ok(IoOutcome::Done(transferred)) => self.on_read_complete(transferred),
            Ok(IoOutcome::Pending) => {
                self.handler = Some(CompletionHandler::Read);
                true
            }
            Err(err) => {
                log::error!("failed to read request: {err}");
                self.reset_connection()
            }
        }
    }

    fn handle_request(&mut self, request: &RegistrationRequest) -> bool {
        // Verify the client is who it claims to be, where the OS exposes
        // the peer; otherwise an arbitrary process could have us mint
        // events into some other process.
        if let Some(actual_pid) = self.pipe.peer_process_id() {
            if actual_pid != request.client_process_id {
                log::error!(
                    "client process id from request ({}) does not match pipe client process id ({actual_pid})",
                    request.client_process_id
                );
                return self.reset_connection();
            }
        }

        let client_process = match self.pipe.open_peer_process(request.client_process_id) {
            Ok(process) => process,
            Err(err) => {
                log::error!("failed to open client process: {err}");
                return self.reset_connection();
            }
        };

        let events = match self
            .delegate
            .register_client(client_process, request.info_address)
        {
            Ok(events) => events,
            Err(err) => {
                log::error!("delegate rejected client: {err}");
                return self.reset_connection();
            }
        };

        // Handles carry at most 32 significant bits; truncation here pairs
        // with sign-extension in 64-bit clients
        let response = RegistrationResponse {
            request_report_event: events.request_report_event as u32,
            report_complete_event: events.report_complete_event as u32,
        };
        self.issue_write(&response)
    }

    fn issue_write(&mut self, response: &RegistrationResponse) -> bool {
        match self.pipe.write(&response.to_bytes()) {
            Ok(IoOutcome::Done(transferred)) => self.on_write_complete(transferred),
            Ok(IoOutcome::Pending) => {
                self.handler = Some(CompletionHandler::Write);
                true
            }
            Err(err) => {
                log::error!("failed to write response: {err}");
                self.reset_connection()
            }
        }
    }

    /// Disconnecting before the client has read the response would drop it,
    /// so issue one more read instead: no data is expected, and the
    /// operation completes with a broken pipe when the client closes its
    /// end.
    fn issue_wait_for_close(&mut self) -> bool {
        self.waiting_for_close = true;
        match self.pipe.read(RegistrationRequest::WIRE_SIZE) {
            Ok(IoOutcome::Done(transferred)) => self.on_wait_for_close_complete(transferred),
            Ok(IoOutcome::Pending) => {
                self.handler = Some(CompletionHandler::WaitForClose);
                true
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    log::error!("failed to wait for client close: {err}");
                }
                self.reset_connection()
            }
        }
    }

    fn reset_connection(&mut self) -> bool {
        self.waiting_for_close = false;
        self.handler = None;

        match self.pipe.disconnect() {
            Ok(()) => self.issue_connect(),
            Err(err) => {
                log::error!("failed to disconnect pipe: {err}");
                false
            }
        }
    }
}

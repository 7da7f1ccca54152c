//! The named-pipe handshake between a client process and its crash-handler
//! daemon.
//!
//! A client connects, sends one request naming itself and the address of its
//! published [`client info block`](crate::client_info), and reads back the
//! two event handles it will use to request dumps and learn of their
//! completion. The server side is a per-pipe state machine
//! ([`RegistrationPipeState`]) multiplexed behind one wait loop
//! ([`RegistrationServer`]); all transport I/O is asynchronous and dispatched
//! serially.
//!
//! The state machine and server loop are written against small transport
//! traits so that every transition is testable on any OS; the real
//! named-pipe transport lives in the `windows` submodule.

mod pipe_state;
mod protocol;
mod server;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod ffi;
        mod windows;

        pub use windows::{
            StopEvents, WindowsPipeInstance, WindowsWaitSet, register_with_handler, run_server,
        };
    }
}

pub use pipe_state::{
    IoOutcome, OwnedProcess, PipeInstance, RegisteredEvents, RegistrationDelegate,
    RegistrationPipeState,
};
pub use protocol::{RegistrationRequest, RegistrationResponse};
pub use server::{RegistrationServer, ServerError, ServerExit, WaitOutcome, WaitSet};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The delegate declined to register the client.
    #[error("client registration rejected")]
    Rejected,
}

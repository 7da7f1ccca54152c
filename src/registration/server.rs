//! The server loop: several pipe instances multiplexed behind one
//! wait-multiple call, plus a stop signal and an optional timeout.
//!
//! Completions are dispatched serially on the calling thread; only the stop
//! signal may arrive from elsewhere, through whatever mechanism the
//! [`WaitSet`] implementation provides.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::pipe_state::{PipeInstance, RegistrationDelegate, RegistrationPipeState};

/// What a wait call observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The pipe at this index has a completion to dispatch.
    Completion(usize),
    /// The stop signal fired.
    Stop,
    /// The per-wait timeout elapsed.
    TimedOut,
}

/// Multiplexes the pipes' completion signals and the stop signal.
///
/// Indices refer to the pipe list handed to [`RegistrationServer::run`];
/// [`remove`](WaitSet::remove) keeps them in step when a pipe dies.
pub trait WaitSet {
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<WaitOutcome>;

    /// Forgets the slot of a retired pipe.
    fn remove(&mut self, index: usize);

    /// Waits until every outstanding (typically cancelled) operation has
    /// delivered its final completion, without dispatching them.
    fn drain(&mut self) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerExit {
    /// The stop signal fired; all pipes were cancelled and drained.
    Stopped,
    /// The configured timeout elapsed with no activity.
    TimedOut,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no pipe instance could start listening")]
    NoPipes,
    #[error("every pipe instance failed")]
    AllPipesFailed,
    #[error("wait failed")]
    Wait(#[from] io::Error),
}

/// Runs registration pipes to completion.
pub struct RegistrationServer<W: WaitSet> {
    waiter: W,
    timeout: Option<Duration>,
}

impl<W: WaitSet> RegistrationServer<W> {
    pub fn new(waiter: W) -> Self {
        Self {
            waiter,
            timeout: None,
        }
    }

    /// Makes every wait bounded; an idle server then returns
    /// [`ServerExit::TimedOut`] instead of blocking forever.
    pub fn with_timeout(waiter: W, timeout: Duration) -> Self {
        Self {
            waiter,
            timeout: Some(timeout),
        }
    }

    /// Serves until the stop signal fires, the timeout elapses, or every
    /// pipe has permanently failed. Blocks the calling thread; the stop
    /// signal is safe to fire from any other thread, once.
    pub fn run<P: PipeInstance>(
        mut self,
        mut pipes: Vec<RegistrationPipeState<'_, P>>,
        delegate: &dyn RegistrationDelegate,
    ) -> Result<ServerExit, ServerError> {
        let mut index = 0;
        while index < pipes.len() {
            if pipes[index].initialize() {
                index += 1;
            } else {
                pipes.remove(index);
                self.waiter.remove(index);
            }
        }

        if pipes.is_empty() {
            return Err(ServerError::NoPipes);
        }

        delegate.on_started();

        let exit = loop {
            match self.waiter.wait(self.timeout)? {
                WaitOutcome::Completion(index) => {
                    if !pipes[index].on_completion() {
                        pipes.remove(index);
                        self.waiter.remove(index);
                        if pipes.is_empty() {
                            return Err(ServerError::AllPipesFailed);
                        }
                    }
                }
                WaitOutcome::Stop => break ServerExit::Stopped,
                WaitOutcome::TimedOut => break ServerExit::TimedOut,
            }
        };

        // Cancel whatever is in flight, then wait for the transports to
        // deliver the final completions before the pipes are dropped
        for pipe in &mut pipes {
            pipe.stop();
        }
        self.waiter.drain()?;

        Ok(exit)
    }
}

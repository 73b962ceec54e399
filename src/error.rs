//! Error types for the scheduler, timers, worker offload, buffered I/O and
//! sockets. Mirrors the three-tier split the design draws: ordinary I/O
//! failures are `Error::Io`, the fatal iterate-step condition is
//! `Error::Deadlock`, and everything else (closed handles, double-close,
//! reserving past capacity with no grow path) is a programmer error and
//! panics rather than returning an `Err`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] fibrio_core::Error),

    #[error("the reactor reported no active watchers while fibers were still suspended")]
    Deadlock,

    #[error("operation timed out")]
    Elapsed,
}

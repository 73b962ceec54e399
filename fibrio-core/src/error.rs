//! Error types for the low-level reactor, descriptor watcher and Bip-buffer.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable error conditions surfaced by `fibrio-core`.
///
/// Programmer errors (operating on a closed handle, reserving past
/// capacity with no grow path, double-watching a pid) are not represented
/// here: they panic at the call site, matching the "fatal, non-recoverable"
/// tier the runtime draws between bugs and ordinary failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reactor reported no active watchers while fills were still pending")]
    Deadlock,

    #[error("a watcher for pid {0} is already registered")]
    DuplicateChildWatch(i32),
}

//! Child-process reaping: `Child::watch(pid)` is a one-shot awaitable,
//! exactly the same shape as [`crate::timer::sleep`] -- register a
//! one-shot watcher whose callback fills an ivar, await the ivar. The
//! reactor owns the `SIGCHLD`/`waitpid` plumbing; nothing here calls
//! `waitpid` directly.

pub use fibrio_core::ExitStatus;

use crate::scheduler::Scheduler;
use crate::task::Ivar;

/// Resolves once `pid` exits. Registering a second watch for a pid
/// already being watched is a programmer error (mirrors the "operating on
/// a closed handle" family: the reactor panics via
/// [`fibrio_core::Error::DuplicateChildWatch`] surfacing as an
/// unrecoverable condition here too).
pub async fn watch(scheduler: &Scheduler, pid: i32) -> ExitStatus {
    let done: Ivar<ExitStatus> = Ivar::new();
    let fill = done.clone();
    scheduler
        .reactor()
        .borrow_mut()
        .watch_child(pid, Box::new(move |status| fill.fill(status)))
        .expect("duplicate watch for the same pid");
    done.read().await
}

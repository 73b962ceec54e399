//! Child-process reaping via a `SIGCHLD` self-pipe, registered as an
//! ordinary readiness source on the reactor's `mio::Poll`.

use std::collections::HashMap;

use mio::{Registry, Token};
use signal_hook::consts::SIGCHLD;
use signal_hook_mio::v0_8::Signals;

use crate::error::{Error, Result};

/// The exit status reported to a child watcher's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

pub(crate) struct ChildTable {
    signals: Signals,
    watchers: HashMap<i32, Box<dyn FnOnce(ExitStatus)>>,
}

impl ChildTable {
    pub(crate) fn new(registry: &Registry, token: Token) -> Result<Self> {
        let mut signals = Signals::new([SIGCHLD])?;
        registry.register(&mut signals, token, mio::Interest::READABLE)?;
        Ok(ChildTable { signals, watchers: HashMap::new() })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub(crate) fn watch(&mut self, pid: i32, callback: Box<dyn FnOnce(ExitStatus)>) -> Result<()> {
        if self.watchers.contains_key(&pid) {
            return Err(Error::DuplicateChildWatch(pid));
        }
        self.watchers.insert(pid, callback);
        Ok(())
    }

    /// Drains pending `SIGCHLD` notifications and reaps every watched pid
    /// that has exited, non-blocking (`WNOHANG`), firing each callback at
    /// most once.
    pub(crate) fn reap(&mut self) {
        // Drain the self-pipe; the actual exit codes come from `waitpid`,
        // the signal only tells us "go check".
        for _ in self.signals.pending() {}

        let exited: Vec<(i32, ExitStatus)> = self
            .watchers
            .keys()
            .copied()
            .filter_map(|pid| try_wait(pid).map(|status| (pid, status)))
            .collect();

        for (pid, status) in exited {
            if let Some(cb) = self.watchers.remove(&pid) {
                cb(status);
            }
        }
    }
}

fn try_wait(pid: i32) -> Option<ExitStatus> {
    let mut wstatus: libc::c_int = 0;
    // SAFETY: waitpid with WNOHANG is non-blocking and only inspects a
    // pid we ourselves registered a watcher for.
    let ret = unsafe { libc::waitpid(pid, &mut wstatus, libc::WNOHANG) };
    if ret != pid {
        return None;
    }
    unsafe {
        if libc::WIFEXITED(wstatus) {
            Some(ExitStatus::Exited(libc::WEXITSTATUS(wstatus)))
        } else if libc::WIFSIGNALED(wstatus) {
            Some(ExitStatus::Signaled(libc::WTERMSIG(wstatus)))
        } else {
            None
        }
    }
}

//! The descriptor watcher: wraps a reactor readiness registration with
//! per-direction FIFO waiter queues, and owns the descriptor through a
//! reference-counted [`fibrio_core::Handle`] so the OS fd is closed and
//! the watcher torn down exactly once, on last release.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use fibrio_core::{Handle, Interest, IoToken, Readiness};

use crate::scheduler::Scheduler;
use crate::task::Ivar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

struct State {
    token: Option<IoToken>,
    interest: Interest,
    read_waiters: VecDeque<Ivar<()>>,
    write_waiters: VecDeque<Ivar<()>>,
}

struct Owned {
    fd: RawFd,
    scheduler: Scheduler,
    state: Rc<RefCell<State>>,
}

/// A shared, ref-counted watcher over one descriptor. Clone to share
/// ownership (e.g. a duplex stream's reader and writer halves); the last
/// clone released stops the reactor registration and closes the fd.
#[derive(Clone)]
pub struct Descriptor {
    handle: Handle<Owned>,
    state: Rc<RefCell<State>>,
}

impl Descriptor {
    /// Registers `fd` with the reactor for `interest`. `fd` is closed and
    /// the registration torn down when the last clone is released.
    pub fn new(scheduler: Scheduler, fd: RawFd, interest: Interest) -> std::io::Result<Self> {
        let state = Rc::new(RefCell::new(State {
            token: None,
            interest,
            read_waiters: VecDeque::new(),
            write_waiters: VecDeque::new(),
        }));
        let cb_state = state.clone();
        let token = scheduler.reactor().borrow_mut().register_io(
            fd,
            interest,
            Box::new(move |readiness: Readiness| {
                let mut st = cb_state.borrow_mut();
                if readiness.contains(Readiness::READABLE) {
                    if let Some(w) = st.read_waiters.pop_front() {
                        w.fill(());
                    }
                }
                if readiness.contains(Readiness::WRITABLE) {
                    if let Some(w) = st.write_waiters.pop_front() {
                        w.fill(());
                    }
                }
            }),
        )?;
        state.borrow_mut().token = Some(token);

        let owned = Owned { fd, scheduler: scheduler.clone(), state: state.clone() };
        let handle = Handle::new(owned, |owned: &Owned| {
            if let Some(token) = owned.state.borrow().token {
                let _ = owned.scheduler.reactor().borrow_mut().deregister_io(token);
            }
            let _ = fibrio_core::os::close(owned.fd);
        });
        Ok(Descriptor { handle, state })
    }

    pub fn fd(&self) -> RawFd {
        self.handle.with(|owned| owned.fd)
    }

    /// Suspends the calling fiber until `direction` becomes ready.
    /// Expands the reactor registration to include `direction` the first
    /// time it's awaited in that direction (a freshly accepted or
    /// connected descriptor is typically registered for only one
    /// direction up front).
    pub async fn ready(&self, direction: Direction) {
        let needed = match direction {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        };
        let ivar: Ivar<()> = Ivar::new();
        {
            let mut st = self.state.borrow_mut();
            if !st.interest.contains(needed) {
                let new_interest = st.interest | needed;
                if let Some(token) = st.token {
                    if self.handle.with(|owned| owned.scheduler.reactor().borrow_mut().set_interest(token, new_interest)).is_ok() {
                        st.interest = new_interest;
                    }
                }
            }
            match direction {
                Direction::Read => st.read_waiters.push_back(ivar.clone()),
                Direction::Write => st.write_waiters.push_back(ivar.clone()),
            }
        }
        ivar.read().await;
    }

    /// An additional owning reference to the same descriptor (e.g. for a
    /// duplex stream's independent reader/writer halves).
    pub fn retain(&self) -> Self {
        Descriptor { handle: self.handle.retain(), state: self.state.clone() }
    }

    /// Resolves every currently-queued waiter on both directions, as if a
    /// spurious readiness edge had fired on each. Used by shutdown paths
    /// (e.g. [`crate::socket::Server::close`]) to wake a fiber parked in
    /// [`Descriptor::ready`] so it can observe a closed flag and return,
    /// rather than suspend forever once the descriptor itself is torn
    /// down.
    pub fn wake_all(&self) {
        let mut st = self.state.borrow_mut();
        for w in st.read_waiters.drain(..) {
            w.fill(());
        }
        for w in st.write_waiters.drain(..) {
            w.fill(());
        }
    }

    pub fn release(&self) {
        self.handle.release();
    }
}

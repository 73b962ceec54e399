//! The event loop: descriptor readiness, one-shot timers, child-exit
//! watchers and a thread-safe async wake-up, all driven by a single
//! `mio::Poll` instance and consumed one pass at a time through
//! [`Reactor::turn`].
//!
//! This is the "external event-loop library" the runtime is built on top
//! of (see the crate-level docs); callers above this layer never touch
//! `mio` directly.

mod child;

pub use child::ExitStatus;

use std::collections::BinaryHeap;
use std::cmp::{Ordering, Reverse};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest as MioInterest, Poll, Token};
use mio::unix::SourceFd;
use slab::Slab;
use tracing::trace;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Which direction(s) of readiness a watcher cares about.
    pub struct Interest: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

bitflags::bitflags! {
    /// Which direction(s) fired on a given pass.
    pub struct Readiness: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

fn to_mio_interest(i: Interest) -> MioInterest {
    match (i.contains(Interest::READABLE), i.contains(Interest::WRITABLE)) {
        (true, true) => MioInterest::READABLE | MioInterest::WRITABLE,
        (true, false) => MioInterest::READABLE,
        (false, true) => MioInterest::WRITABLE,
        (false, false) => MioInterest::READABLE, // a watcher always wants at least one direction
    }
}

/// Opaque key identifying a registered descriptor watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoToken(usize);

/// Opaque key identifying a pending one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(usize);

struct IoEntry {
    fd: RawFd,
    interest: Interest,
    callback: Box<dyn FnMut(Readiness)>,
}

struct TimerEntry {
    id: usize,
    deadline: Instant,
    callback: Option<Box<dyn FnOnce()>>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool { self.deadline == other.deadline }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline on top.
        other.deadline.cmp(&self.deadline)
    }
}

const ASYNC_TOKEN: Token = Token(usize::MAX);
const SIGCHLD_TOKEN: Token = Token(usize::MAX - 1);
const IO_TOKEN_BASE: usize = 0;

/// What a single [`Reactor::turn`] pass accomplished.
#[derive(Debug, PartialEq, Eq)]
pub enum Turn {
    /// At least one callback ran, or the pass simply timed out waiting.
    Progressed,
    /// No descriptor watchers, timers or child watchers are registered, so
    /// there is nothing left that could ever wake this loop up again.
    NoMoreActiveWatchers,
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    io: Slab<IoEntry>,
    timers: BinaryHeap<TimerEntry>,
    next_timer_id: usize,
    children: child::ChildTable,
    waker: Arc<mio::Waker>,
    async_pending: Arc<std::sync::atomic::AtomicBool>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), ASYNC_TOKEN)?);
        let children = child::ChildTable::new(poll.registry(), SIGCHLD_TOKEN)?;
        Ok(Reactor {
            poll,
            events: Events::with_capacity(256),
            io: Slab::new(),
            timers: BinaryHeap::new(),
            next_timer_id: 0,
            children,
            waker,
            async_pending: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    /// A thread-safe handle that, when woken, causes the next [`Reactor::turn`]
    /// call (on whatever thread owns this reactor) to return promptly and
    /// invoke `on_wake` once.
    pub fn async_waker(&self) -> AsyncWaker {
        AsyncWaker { waker: self.waker.clone(), pending: self.async_pending.clone() }
    }

    pub fn register_io(&mut self, fd: RawFd, interest: Interest, callback: Box<dyn FnMut(Readiness)>) -> Result<IoToken> {
        let entry = IoEntry { fd, interest, callback };
        let key = self.io.insert(entry);
        let token = Token(IO_TOKEN_BASE + key);
        self.poll.registry().register(&mut SourceFd(&fd), token, to_mio_interest(interest))?;
        Ok(IoToken(key))
    }

    pub fn set_interest(&mut self, tok: IoToken, interest: Interest) -> Result<()> {
        let entry = &mut self.io[tok.0];
        entry.interest = interest;
        let fd = entry.fd;
        self.poll.registry().reregister(&mut SourceFd(&fd), Token(IO_TOKEN_BASE + tok.0), to_mio_interest(interest))?;
        Ok(())
    }

    pub fn deregister_io(&mut self, tok: IoToken) -> Result<()> {
        let entry = self.io.remove(tok.0);
        let fd = entry.fd;
        self.poll.registry().deregister(&mut SourceFd(&fd)).or_else(|e| {
            // the fd may already be closed by the time we deregister; mio
            // surfaces that as an error but there's nothing left to clean up.
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        Ok(())
    }

    /// Schedules `callback` to run once, no sooner than `after` from now.
    pub fn create_timer(&mut self, after: Duration, callback: Box<dyn FnOnce()>) -> TimerToken {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(TimerEntry { id, deadline: Instant::now() + after, callback: Some(callback) });
        TimerToken(id)
    }

    /// Cancels a pending timer. No-op if it already fired.
    pub fn cancel_timer(&mut self, tok: TimerToken) {
        // BinaryHeap has no O(1) removal by key; mark-and-skip on pop is
        // the standard trick and keeps `create_timer`/`cancel_timer` cheap
        // at the cost of a tombstone check when the entry is eventually
        // popped.
        let mut rebuilt: Vec<TimerEntry> = self.timers.drain().collect();
        if let Some(entry) = rebuilt.iter_mut().find(|e| e.id == tok.0) {
            entry.callback = None;
        }
        self.timers = rebuilt.into_iter().collect();
    }

    pub fn watch_child(&mut self, pid: i32, callback: Box<dyn FnOnce(ExitStatus)>) -> Result<()> {
        self.children.watch(pid, callback)
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|e| e.deadline)
    }

    /// Runs exactly one pass: waits for readiness or the next timer
    /// deadline (whichever is sooner), fires every callback whose
    /// condition is now satisfied, then returns. Pass `block = false` to
    /// poll without waiting when the fill queue might already be
    /// non-empty (the scheduler's iterate step only blocks once it knows
    /// there is truly nothing left to do without waiting).
    pub fn turn(&mut self, block: bool) -> Result<Turn> {
        if self.io.is_empty() && self.timers.is_empty() && self.children.is_empty() {
            return Ok(Turn::NoMoreActiveWatchers);
        }

        let timeout = match (block, self.next_timer_deadline()) {
            (false, _) => Some(Duration::from_secs(0)),
            (true, Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
            (true, None) => None,
        };

        self.poll.poll(&mut self.events, timeout)?;

        for event in self.events.iter() {
            let token = event.token();
            if token == ASYNC_TOKEN {
                self.async_pending.store(false, std::sync::atomic::Ordering::SeqCst);
                trace!("async watcher fired");
                continue;
            }
            if token == SIGCHLD_TOKEN {
                self.children.reap();
                continue;
            }
            let key = token.0 - IO_TOKEN_BASE;
            if let Some(entry) = self.io.get_mut(key) {
                let mut readiness = Readiness::empty();
                if event.is_readable() { readiness |= Readiness::READABLE; }
                if event.is_writable() { readiness |= Readiness::WRITABLE; }
                (entry.callback)(readiness);
            }
        }

        let now = Instant::now();
        while matches!(self.timers.peek(), Some(e) if e.deadline <= now) {
            let mut entry = self.timers.pop().unwrap();
            if let Some(cb) = entry.callback.take() {
                cb();
            }
        }

        Ok(Turn::Progressed)
    }
}

/// A clonable, thread-safe handle that wakes a [`Reactor`] from any
/// thread. Mirrors the event loop's "async watcher" primitive: `send` is
/// safe to call concurrently and causes the loop thread's next `turn` to
/// return promptly.
#[derive(Clone)]
pub struct AsyncWaker {
    waker: Arc<mio::Waker>,
    pending: Arc<std::sync::atomic::AtomicBool>,
}

impl AsyncWaker {
    pub fn send(&self) {
        if !self.pending.swap(true, std::sync::atomic::Ordering::SeqCst) {
            // best-effort: if wake() fails the loop is shutting down.
            let _ = self.waker.wake();
        }
    }
}

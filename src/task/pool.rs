//! A pool of cooperatively-scheduled tasks sharing one [`crate::Scheduler`].
//! Used by [`crate::socket::Server`] to run one session task per accepted
//! connection without the caller having to track join handles by hand.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::task::ivar::Ivar;

struct Inner {
    scheduler: Scheduler,
    outstanding: Cell<usize>,
    stopped: Cell<bool>,
    idle: RefCell<Option<Ivar<()>>>,
}

/// Tracks how many tasks spawned through it are still running, so
/// [`Pool::run`] can suspend until the pool drains.
#[derive(Clone)]
pub struct Pool {
    inner: Rc<Inner>,
}

impl Pool {
    pub fn new(scheduler: Scheduler) -> Self {
        Pool { inner: Rc::new(Inner {
            scheduler,
            outstanding: Cell::new(0),
            stopped: Cell::new(false),
            idle: RefCell::new(None),
        }) }
    }

    /// Spawns `body` onto the pool's scheduler. Ignored (not spawned) once
    /// the pool has been `stop`ped.
    pub fn task(&self, body: impl Future<Output = ()> + 'static) {
        if self.inner.stopped.get() {
            return;
        }
        self.inner.outstanding.set(self.inner.outstanding.get() + 1);
        let inner = self.inner.clone();
        self.inner.scheduler.spawn(async move {
            body.await;
            let remaining = inner.outstanding.get() - 1;
            inner.outstanding.set(remaining);
            if remaining == 0 {
                if let Some(idle) = inner.idle.borrow_mut().take() {
                    idle.fill(());
                }
            }
        });
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.get()
    }

    /// Suspends until every task spawned so far has completed. Tasks
    /// spawned after `run` is called but before it resolves are also
    /// waited on, since `outstanding` only reaches zero once they finish
    /// too.
    pub async fn run(&self) {
        if self.inner.outstanding.get() == 0 {
            return;
        }
        let idle: Ivar<()> = Ivar::new();
        *self.inner.idle.borrow_mut() = Some(idle.clone());
        idle.read().await;
    }

    /// Marks the pool closed: subsequent `task` calls are no-ops. Does not
    /// cancel tasks already running.
    pub fn stop(&self) {
        self.inner.stopped.set(true);
    }
}

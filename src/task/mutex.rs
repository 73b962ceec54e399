//! A cooperative mutex: `with_lock` suspends the calling fiber until the
//! lock is free, runs the given body while held, then releases. Grounded
//! in the acquire/use/release-on-drop shape of `order_lock.rs`'s
//! `ReadGuard`/`WriteGuard`, minus the OpenCL release-event plumbing that
//! pattern is built around -- there is no GPU event to chain here, so
//! release is plain and synchronous.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::task::Waker;

struct Inner {
    locked: Cell<bool>,
    waiters: RefCell<VecDeque<Waker>>,
}

/// A single-threaded mutual-exclusion lock for fibers sharing a
/// scheduler. Not `Send`/`Sync`: like every cooperative-layer type in
/// this crate, it only makes sense on the loop thread.
#[derive(Clone)]
pub struct Mutex {
    inner: Rc<Inner>,
}

impl Mutex {
    pub fn new() -> Self {
        Mutex { inner: Rc::new(Inner { locked: Cell::new(false), waiters: RefCell::new(VecDeque::new()) }) }
    }

    fn acquire(&self) -> Acquire {
        Acquire { mutex: self.clone() }
    }

    fn release(&self) {
        self.inner.locked.set(false);
        if let Some(waker) = self.inner.waiters.borrow_mut().pop_front() {
            waker.wake();
        }
    }

    /// Acquires the lock, runs `f`, releases the lock, and returns `f`'s
    /// result -- even if `f` itself suspends partway through.
    pub async fn with_lock<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.acquire().await;
        let result = f().await;
        self.release();
        result
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

struct Acquire {
    mutex: Mutex,
}

impl Future for Acquire {
    type Output = ();

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<()> {
        let inner = &self.mutex.inner;
        if !inner.locked.get() {
            inner.locked.set(true);
            std::task::Poll::Ready(())
        } else {
            inner.waiters.borrow_mut().push_back(cx.waker().clone());
            std::task::Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn serializes_critical_sections() {
        let order = Rc::new(RefCell::new(Vec::new()));
        scheduler::run(Default::default(), move |sched| {
            let order = order.clone();
            async move {
                let mutex = Mutex::new();
                let m1 = mutex.clone();
                let o1 = order.clone();
                sched.spawn(async move {
                    m1.with_lock(|| async {
                        o1.borrow_mut().push(1);
                    }).await;
                });
                mutex.with_lock(|| async {
                    order.borrow_mut().push(2);
                }).await;
            }
        }).unwrap();
    }
}

//! A timer wheel: a fixed-delay FIFO queue of cancellable, resettable
//! timeouts, driven by a single long-lived consumer ([`Wheel::run`]).
//! Every entry fires `delay` after it was last (re)scheduled, in
//! insertion order -- the classic "batch timeouts with a shared delay"
//! structure used for things like idle-connection reaping.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use slab::Slab;
use tracing::trace;

use crate::scheduler::Scheduler;
use crate::task::Ivar;
use crate::timer::sleep;

/// The outcome of awaiting a wheel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    Ready,
    Cancelled,
}

struct Entry {
    scheduled_at: Instant,
    epoch: u64,
    filled: bool,
    ivar: Ivar<Fired>,
}

enum RunState {
    Running,
    Stopped,
}

struct Inner {
    scheduler: Scheduler,
    delay: Duration,
    entries: RefCell<Slab<Entry>>,
    queue: RefCell<VecDeque<(usize, u64)>>,
    state: RefCell<RunState>,
    waiting: RefCell<Option<Ivar<()>>>,
}

/// A handle to a task pushed onto a [`Wheel`]. Opaque; pass it back to
/// [`Wheel::reset`] or [`Wheel::cancel`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WheelTask(usize);

#[derive(Clone)]
pub struct Wheel {
    inner: Rc<Inner>,
}

impl Wheel {
    /// A wheel using the scheduler's configured `default_wheel_delay`.
    pub fn with_default_delay(scheduler: Scheduler) -> Self {
        let delay = scheduler.config().default_wheel_delay;
        Wheel::new(scheduler, delay)
    }

    pub fn new(scheduler: Scheduler, delay: Duration) -> Self {
        Wheel {
            inner: Rc::new(Inner {
                scheduler,
                delay,
                entries: RefCell::new(Slab::new()),
                queue: RefCell::new(VecDeque::new()),
                state: RefCell::new(RunState::Running),
                waiting: RefCell::new(None),
            }),
        }
    }

    /// Pushes a new task scheduled to fire `delay` from now. Wakes a
    /// parked `run` if the wheel was empty.
    pub fn task(&self) -> WheelTask {
        let ivar = Ivar::new();
        let key = self.inner.entries.borrow_mut().insert(Entry {
            scheduled_at: Instant::now(),
            epoch: 0,
            filled: false,
            ivar,
        });
        self.inner.queue.borrow_mut().push_back((key, 0));
        self.wake_parked_run();
        WheelTask(key)
    }

    /// Suspends until `task` fires or is cancelled.
    pub async fn wait(&self, task: WheelTask) -> Fired {
        let ivar = self.inner.entries.borrow()[task.0].ivar.clone();
        ivar.read().await
    }

    /// Re-schedules `task` for `delay` from now, as if newly pushed.
    /// No-op if the task already fired or was cancelled.
    pub fn reset(&self, task: WheelTask) {
        let mut entries = self.inner.entries.borrow_mut();
        if let Some(entry) = entries.get_mut(task.0) {
            if entry.filled {
                return;
            }
            entry.scheduled_at = Instant::now();
            entry.epoch += 1;
            let epoch = entry.epoch;
            drop(entries);
            self.inner.queue.borrow_mut().push_back((task.0, epoch));
        }
    }

    /// Cancels `task` immediately, resolving its `wait` with `Cancelled`.
    /// No-op if it already fired.
    pub fn cancel(&self, task: WheelTask) {
        let mut entries = self.inner.entries.borrow_mut();
        if let Some(entry) = entries.get_mut(task.0) {
            if !entry.filled {
                entry.filled = true;
                entry.ivar.fill(Fired::Cancelled);
            }
        }
    }

    /// The single long-lived consumer: fires entries in order as their
    /// delay elapses, parking on an empty queue. Runs until [`Wheel::stop`]
    /// is called.
    pub async fn run(&self) {
        loop {
            if matches!(*self.inner.state.borrow(), RunState::Stopped) {
                return;
            }
            let next = self.inner.queue.borrow_mut().pop_front();
            let (key, epoch) = match next {
                Some(v) => v,
                None => {
                    let idle: Ivar<()> = Ivar::new();
                    *self.inner.waiting.borrow_mut() = Some(idle.clone());
                    idle.read().await;
                    continue;
                }
            };

            let target = {
                let entries = self.inner.entries.borrow();
                match entries.get(key) {
                    Some(e) if e.epoch == epoch && !e.filled => Some(e.scheduled_at + self.inner.delay),
                    _ => None, // stale tombstone from a reset/cancel
                }
            };
            let target = match target {
                Some(t) => t,
                None => continue,
            };

            let now = Instant::now();
            if target > now {
                sleep(&self.inner.scheduler, target - now).await;
            }

            let mut entries = self.inner.entries.borrow_mut();
            if let Some(entry) = entries.get_mut(key) {
                if entry.epoch == epoch && !entry.filled {
                    entry.filled = true;
                    entry.ivar.fill(Fired::Ready);
                }
            }
            trace!(wheel_key = key, "wheel entry fired");
        }
    }

    /// Stops the wheel: cancels every remaining entry in FIFO order, then
    /// wakes a parked `run` so it can observe the stop and return.
    pub fn stop(&self) {
        *self.inner.state.borrow_mut() = RunState::Stopped;
        let pending: Vec<(usize, u64)> = self.inner.queue.borrow_mut().drain(..).collect();
        for (key, epoch) in pending {
            let mut entries = self.inner.entries.borrow_mut();
            if let Some(entry) = entries.get_mut(key) {
                if entry.epoch == epoch && !entry.filled {
                    entry.filled = true;
                    entry.ivar.fill(Fired::Cancelled);
                }
            }
        }
        self.wake_parked_run();
    }

    fn wake_parked_run(&self) {
        if let Some(idle) = self.inner.waiting.borrow_mut().take() {
            idle.fill(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn cancel_before_fire_yields_cancelled_in_insertion_order() {
        scheduler::run(Default::default(), |sched| async move {
            let wheel = Wheel::new(sched.clone(), Duration::from_millis(20));
            let w = wheel.clone();
            sched.spawn(async move { w.run().await });

            let t1 = wheel.task();
            let t2 = wheel.task();
            wheel.cancel(t1);

            let r1 = wheel.wait(t1).await;
            let r2 = wheel.wait(t2).await;
            assert_eq!(r1, Fired::Cancelled);
            assert_eq!(r2, Fired::Ready);
            wheel.stop();
        }).unwrap();
    }
}

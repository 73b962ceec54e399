//! The scheduler: owns the reactor, the fill queue that the cooperative
//! task library drains on every `iterate` call, and the cross-thread
//! queue worker threads post completions into.
//!
//! Exactly one [`Scheduler`] exists per call to [`run`]; it never crosses
//! threads itself (it is `Rc`-based, like every other cooperative-layer
//! type in this crate) but vends an [`fibrio_core::AsyncWaker`]-backed
//! [`CrossThreadSender`] that worker threads use to post completions
//! safely.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use slab::Slab;
use tracing::trace;

use fibrio_core::Reactor;

use crate::config::ReactorConfig;
use crate::error::{Error, Result};

type TaskKey = usize;
type CrossThreadJob = Box<dyn FnOnce() + Send>;

struct TaskSlot {
    future: Pin<Box<dyn Future<Output = ()>>>,
}

struct Inner {
    reactor: RefCell<Reactor>,
    tasks: RefCell<Slab<TaskSlot>>,
    fill_queue: RefCell<VecDeque<TaskKey>>,
    cross_thread: Arc<Mutex<VecDeque<CrossThreadJob>>>,
    config: ReactorConfig,
}

/// A handle to the running scheduler, cloned into every task spawned onto
/// it. Not `Send`: all cooperative-layer state lives on the loop thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

/// A thread-safe sender worker threads use to post a completion back onto
/// the scheduler's loop thread. Obtained via [`Scheduler::cross_thread_sender`].
#[derive(Clone)]
pub struct CrossThreadSender {
    cross_thread: Arc<Mutex<VecDeque<CrossThreadJob>>>,
    waker: fibrio_core::AsyncWaker,
}

impl CrossThreadSender {
    /// Posts `job` to run on the scheduler's loop thread and wakes the
    /// loop so it is picked up promptly. Safe to call from any thread.
    pub fn send(&self, job: impl FnOnce() + Send + 'static) {
        self.cross_thread.lock().expect("cross-thread queue poisoned").push_back(Box::new(job));
        self.waker.send();
    }
}

impl Scheduler {
    fn new(config: ReactorConfig) -> Result<Self> {
        let reactor = Reactor::new()?;
        Ok(Scheduler {
            inner: Rc::new(Inner {
                reactor: RefCell::new(reactor),
                tasks: RefCell::new(Slab::new()),
                fill_queue: RefCell::new(VecDeque::new()),
                cross_thread: Arc::new(Mutex::new(VecDeque::new())),
                config,
            }),
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.inner.config
    }

    pub(crate) fn reactor(&self) -> &RefCell<Reactor> {
        &self.inner.reactor
    }

    pub fn cross_thread_sender(&self) -> CrossThreadSender {
        CrossThreadSender {
            cross_thread: self.inner.cross_thread.clone(),
            waker: self.inner.reactor.borrow().async_waker(),
        }
    }

    /// Spawns a fiber onto this scheduler. The task is polled for the
    /// first time on the next `iterate` pass.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let key = self.inner.tasks.borrow_mut().insert(TaskSlot { future: Box::pin(future) });
        self.inner.fill_queue.borrow_mut().push_back(key);
    }

    fn waker_for(&self, key: TaskKey) -> Waker {
        // Single-threaded: waking just re-enqueues the task key on the
        // fill queue. The Rc is leaked into the raw pointer and restored
        // (and dropped, to balance the refcount) by `drop_raw`; `clone_raw`
        // bumps it again so the Waker can be cloned and dropped freely.
        let data = Rc::new((self.inner.clone(), key));
        let ptr = Rc::into_raw(data) as *const ();
        unsafe { Waker::from_raw(RawWaker::new(ptr, &VTABLE)) }
    }

    fn poll_task(&self, key: TaskKey) {
        let waker = self.waker_for(key);
        let mut cx = Context::from_waker(&waker);
        let done = {
            let mut tasks = self.inner.tasks.borrow_mut();
            match tasks.get_mut(key) {
                Some(slot) => matches!(slot.future.as_mut().poll(&mut cx), Poll::Ready(())),
                None => return, // woken after completion; ignore
            }
        };
        if done {
            self.inner.tasks.borrow_mut().remove(key);
        }
    }

    /// Drains the cross-thread queue (under the lock, released before any
    /// of the jobs run) and invokes each job inline, on the loop thread.
    fn drain_cross_thread(&self) {
        let jobs: Vec<CrossThreadJob> = {
            let mut q = self.inner.cross_thread.lock().expect("cross-thread queue poisoned");
            q.drain(..).collect()
        };
        for job in jobs {
            job();
        }
    }

    /// The iterate step: returns once the fill queue is non-empty,
    /// draining the cross-thread queue and advancing the reactor by
    /// exactly one non-blocking-then-blocking pass as needed. Fatal
    /// deadlock if the reactor reports no active watchers and nothing is
    /// pending.
    fn iterate(&self) -> Result<Vec<TaskKey>> {
        loop {
            self.drain_cross_thread();
            {
                let mut q = self.inner.fill_queue.borrow_mut();
                if !q.is_empty() {
                    return Ok(q.drain(..).collect());
                }
            }
            let turn = self.inner.reactor.borrow_mut().turn(true)?;
            if matches!(turn, fibrio_core::Turn::NoMoreActiveWatchers) {
                let mut q = self.inner.fill_queue.borrow_mut();
                if q.is_empty() {
                    return Err(Error::Deadlock);
                }
                return Ok(q.drain(..).collect());
            }
            #[cfg(feature = "iterate_debug_print")]
            trace!("iterate: reactor turn progressed, rechecking fill queue");
        }
    }

    fn run_to_completion(&self, root: TaskKey) -> Result<()> {
        loop {
            if !self.inner.tasks.borrow().contains(root) {
                return Ok(());
            }
            let ready = self.iterate()?;
            for key in ready {
                self.poll_task(key);
            }
        }
    }
}

unsafe fn clone_raw(ptr: *const ()) -> RawWaker {
    let data = ptr as *const (Rc<Inner>, TaskKey);
    Rc::increment_strong_count(data);
    RawWaker::new(ptr, &VTABLE)
}

unsafe fn wake_raw(ptr: *const ()) {
    wake_by_ref_raw(ptr);
    drop_raw(ptr);
}

unsafe fn wake_by_ref_raw(ptr: *const ()) {
    let data = &*(ptr as *const (Rc<Inner>, TaskKey));
    data.0.fill_queue.borrow_mut().push_back(data.1);
}

unsafe fn drop_raw(ptr: *const ()) {
    drop(Rc::from_raw(ptr as *const (Rc<Inner>, TaskKey)));
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// Creates a scheduler, spawns `body` as the root fiber, and drives it to
/// completion via the iterate step, matching the "run(body, iterate)"
/// contract the cooperative task library exposes to the loop. This is the
/// single entry point callers use to start the runtime.
pub fn run<F>(config: ReactorConfig, body: impl FnOnce(Scheduler) -> F) -> Result<()>
where
    F: Future<Output = ()> + 'static,
{
    let scheduler = Scheduler::new(config)?;
    let sched_for_body = scheduler.clone();
    let key = scheduler.inner.tasks.borrow_mut().insert(TaskSlot {
        future: Box::pin(body(sched_for_body)),
    });
    scheduler.inner.fill_queue.borrow_mut().push_back(key);
    scheduler.run_to_completion(key)
}

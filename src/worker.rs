//! A single OS thread draining a FIFO job queue, whose completions are
//! forwarded back onto the scheduler's loop thread through the
//! cross-thread queue and an async wake-up -- never by moving a fiber's
//! `Waker` or `Ivar` across the thread boundary, which would be unsound
//! (both are `Rc`-based). Only plain, `Send` data crosses threads; the
//! loop-thread side of a submitted job is looked up through a
//! thread-local registry keyed by a plain integer id.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Once;

use crossbeam_channel::{unbounded, Sender};
use slab::Slab;
use tracing::warn;

use crate::scheduler::Scheduler;
use crate::task::Ivar;

thread_local! {
    static COMPLETIONS: RefCell<Slab<Box<dyn FnOnce(Box<dyn Any + Send>)>>> = RefCell::new(Slab::new());
    static LAST_PANIC_BACKTRACE: RefCell<Option<String>> = RefCell::new(None);
}

static INSTALL_PANIC_HOOK: Once = Once::new();

/// Installs a panic hook that stashes a captured backtrace in
/// `LAST_PANIC_BACKTRACE` before delegating to whatever hook was already
/// in place. `catch_unwind` cannot itself recover a backtrace once the
/// stack has unwound, so this is the only point one can be captured.
fn install_panic_hook() {
    INSTALL_PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = std::backtrace::Backtrace::force_capture().to_string();
            LAST_PANIC_BACKTRACE.with(|cell| *cell.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

/// Why a worker task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The thunk panicked. `backtrace` is captured at the point of the
    /// panic via a process-wide panic hook (`Backtrace` itself doesn't
    /// survive `catch_unwind`, so it can't be taken afterward).
    Panicked { message: String, backtrace: String },
    /// `cancel` was called before (or during) execution.
    Cancelled,
}

type JobOutcome<T> = Result<T, JobError>;

/// Carries a panic's message and backtrace across the `Any + Send`
/// boundary `catch_unwind`'s payload crosses.
struct WorkerPanic {
    message: String,
    backtrace: String,
}

enum Job {
    Run(usize, Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>),
    Shutdown,
}

struct Inner {
    sender: Sender<Job>,
    handle: RefCell<Option<std::thread::JoinHandle<()>>>,
    next_id: Cell<usize>,
}

/// A handle to one background OS thread. Cloning shares the same thread
/// and queue.
#[derive(Clone)]
pub struct Worker {
    inner: Rc<Inner>,
}

impl Worker {
    /// Spawns the backing OS thread.
    pub fn create(scheduler: &Scheduler) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let cross_thread = scheduler.cross_thread_sender();
        let handle = std::thread::spawn(move || {
            install_panic_hook();
            for job in receiver {
                match job {
                    Job::Shutdown => break,
                    Job::Run(task_id, thunk) => {
                        LAST_PANIC_BACKTRACE.with(|cell| *cell.borrow_mut() = None);
                        let outcome: Box<dyn Any + Send> =
                            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(thunk)) {
                                Ok(boxed) => boxed,
                                Err(payload) => {
                                    let message = panic_message(payload);
                                    let backtrace = LAST_PANIC_BACKTRACE
                                        .with(|cell| cell.borrow_mut().take())
                                        .unwrap_or_else(|| "<backtrace unavailable>".to_string());
                                    Box::new(WorkerPanic { message, backtrace })
                                }
                            };
                        let cross_thread = cross_thread.clone();
                        cross_thread.send(move || {
                            COMPLETIONS.with(|slots| {
                                if let Some(cb) = slots.borrow_mut().try_remove(task_id) {
                                    cb(outcome);
                                }
                            });
                        });
                    }
                }
            }
        });
        Worker { inner: Rc::new(Inner { sender, handle: RefCell::new(Some(handle)), next_id: Cell::new(0) }) }
    }

    /// Submits `thunk` to run on the worker thread. Returns a handle whose
    /// `wait` future resolves with the thunk's result (or a
    /// [`JobError`]).
    pub fn task<T>(&self, thunk: impl FnOnce() -> T + Send + 'static) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
    {
        let ivar: Ivar<JobOutcome<T>> = Ivar::new();
        let fill = ivar.clone();
        let task_id = COMPLETIONS.with(|slots| {
            slots.borrow_mut().insert(Box::new(move |boxed: Box<dyn Any + Send>| {
                if fill.is_filled() {
                    // a `cancel` already resolved this handle; the real
                    // result arrived too late and is simply dropped.
                    return;
                }
                let outcome = match boxed.downcast::<T>() {
                    Ok(value) => Ok(*value),
                    Err(boxed) => match boxed.downcast::<WorkerPanic>() {
                        Ok(panic) => Err(JobError::Panicked { message: panic.message, backtrace: panic.backtrace }),
                        Err(_) => Err(JobError::Panicked {
                            message: "worker job produced an unexpected type".into(),
                            backtrace: String::new(),
                        }),
                    },
                };
                fill.fill(outcome);
            }) as Box<dyn FnOnce(Box<dyn Any + Send>)>)
        });

        let runner: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send> =
            Box::new(move || Box::new(thunk()) as Box<dyn Any + Send>);
        if self.inner.sender.send(Job::Run(task_id, runner)).is_err() {
            warn!("worker thread gone, job submitted after close");
        }

        TaskHandle { ivar }
    }

    /// Waits for pending tasks to drain, then stops the worker thread.
    /// This is the only supported shutdown path: there is no way to
    /// abandon a worker with tasks still in flight.
    pub fn close(&self) {
        let _ = self.inner.sender.send(Job::Shutdown);
        if let Some(handle) = self.inner.handle.borrow_mut().take() {
            let _ = handle.join();
        }
    }
}

/// A handle to one submitted job.
pub struct TaskHandle<T: Clone> {
    ivar: Ivar<JobOutcome<T>>,
}

impl<T: Clone> TaskHandle<T> {
    pub async fn wait(&self) -> JobOutcome<T> {
        self.ivar.read().await
    }

    /// Resolves this handle to `Cancelled` immediately, unless it has
    /// already resolved. Does not interrupt a job already running on the
    /// worker thread; if that job later completes, its result is
    /// discarded.
    pub fn cancel(&self) {
        if !self.ivar.is_filled() {
            self.ivar.fill(Err(JobError::Cancelled));
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker job panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn worker_exception_is_reported_without_crashing_the_scheduler() {
        scheduler::run(Default::default(), |sched| async move {
            let worker = Worker::create(&sched);
            let handle = worker.task(|| -> u32 { panic!("boom") });
            let result = handle.wait().await;
            match result {
                Err(JobError::Panicked { message, backtrace }) => {
                    assert!(message.contains("boom"));
                    assert!(!backtrace.is_empty());
                }
                other => panic!("expected Panicked, got {other:?}"),
            }
            worker.close();
        }).unwrap();
    }

    #[test]
    fn successful_job_returns_its_value() {
        scheduler::run(Default::default(), |sched| async move {
            let worker = Worker::create(&sched);
            let handle = worker.task(|| 6 * 7);
            assert_eq!(handle.wait().await, Ok(42));
            worker.close();
        }).unwrap();
    }
}

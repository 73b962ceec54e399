//! A generic timeout combinator: race any awaitable this crate exposes
//! (descriptor I/O, wheel tasks, worker tasks, child watches) against a
//! sleep, without every suspension point having to know about timeouts
//! itself. Implemented once over `futures::future::select`, composed from
//! the outside exactly as the design calls for.
//!
//! The loser is never interrupted: a timed-out descriptor `await` leaves
//! its waiter queued (the next readiness edge resolves it harmlessly
//! against a fiber that already moved on); callers racing a
//! [`crate::wheel::Wheel`] or [`crate::worker::Worker`] task should also
//! call that operation's own `cancel` so its slot is freed immediately
//! rather than left to resolve into the void.

use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};

use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::timer::sleep;

/// Races `fut` against a `Duration::from(after)` sleep. `Ok` if `fut` won,
/// `Err(Error::Elapsed)` if the sleep won first.
pub async fn timeout<F: Future>(scheduler: &Scheduler, after: Duration, fut: F) -> Result<F::Output, Error> {
    let sleeper = Box::pin(sleep(scheduler, after));
    let fut = Box::pin(fut);
    match select(fut, sleeper).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right((_, _)) => Err(Error::Elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use crate::task::Ivar;

    #[test]
    fn elapses_when_the_awaitable_never_resolves() {
        scheduler::run(Default::default(), |sched| async move {
            let never: Ivar<()> = Ivar::new();
            let result = timeout(&sched, Duration::from_millis(5), never.read()).await;
            assert!(matches!(result, Err(Error::Elapsed)));
        }).unwrap();
    }

    #[test]
    fn returns_the_value_when_it_wins() {
        scheduler::run(Default::default(), |sched| async move {
            let ready: Ivar<u32> = Ivar::new();
            ready.fill(9);
            let result = timeout(&sched, Duration::from_secs(1), ready.read()).await;
            assert_eq!(result.unwrap(), 9);
        }).unwrap();
    }
}

//! One-shot sleeps, built directly on the reactor's one-shot timer
//! primitive: register a timer whose callback fills an ivar, await the
//! ivar.

use std::time::Duration;

use crate::scheduler::Scheduler;
use crate::task::Ivar;

/// Suspends the calling fiber for `after`.
pub async fn sleep(scheduler: &Scheduler, after: Duration) {
    let done: Ivar<()> = Ivar::new();
    let fill = done.clone();
    scheduler.reactor().borrow_mut().create_timer(after, Box::new(move || fill.fill(())));
    done.read().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn sleeps_at_least_the_requested_duration() {
        scheduler::run(Default::default(), |sched| async move {
            let start = std::time::Instant::now();
            sleep(&sched, Duration::from_millis(5)).await;
            assert!(start.elapsed() >= Duration::from_millis(5));
        }).unwrap();
    }
}

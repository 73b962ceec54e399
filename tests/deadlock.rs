//! Awaiting an ivar nothing will ever fill, with no timer, descriptor or
//! child watcher registered to eventually wake the loop, is a fatal
//! deadlock: the reactor reports no active watchers while a fiber is
//! still suspended.

use fibrio::task::Ivar;
use fibrio::{Error, ReactorConfig};

#[test]
fn awaiting_an_unfillable_ivar_is_a_fatal_deadlock() {
    let result = fibrio::run(ReactorConfig::default(), |_sched| async move {
        let never: Ivar<()> = Ivar::new();
        never.read().await;
    });
    assert!(matches!(result, Err(Error::Deadlock)));
}

#[test]
fn a_sleep_keeps_the_loop_alive_past_an_otherwise_stuck_fiber() {
    let result = fibrio::run(ReactorConfig::default(), |sched| async move {
        fibrio::timer::sleep(&sched, std::time::Duration::from_millis(1)).await;
    });
    assert!(result.is_ok());
}

//! Integration tests driving a real [`Reactor`] against real OS
//! resources: a pipe for readiness, `Instant`s for timer ordering, and an
//! actual forked child for SIGCHLD reaping. No mocking -- the reactor's
//! whole job is to talk to the kernel.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use fibrio_core::{ExitStatus, Interest, Readiness, Reactor, Turn};

#[test]
fn turn_reports_no_active_watchers_when_empty() {
    let mut reactor = Reactor::new().unwrap();
    assert_eq!(reactor.turn(false).unwrap(), Turn::NoMoreActiveWatchers);
}

#[test]
fn registered_pipe_fires_readable_once_written() {
    let (read_fd, write_fd) = fibrio_core::os::pipe().unwrap();
    let mut reactor = Reactor::new().unwrap();

    let fired = Rc::new(RefCell::new(Readiness::empty()));
    let fired_cb = fired.clone();
    reactor
        .register_io(read_fd, Interest::READABLE, Box::new(move |r| *fired_cb.borrow_mut() |= r))
        .unwrap();

    fibrio_core::os::write(write_fd, b"x").unwrap();

    // Keep turning (non-blocking passes would spin before the kernel has
    // actually delivered the event; block with a safety-net deadline).
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while fired.borrow().is_empty() && std::time::Instant::now() < deadline {
        reactor.turn(true).unwrap();
    }
    assert!(fired.borrow().contains(Readiness::READABLE));

    let _ = fibrio_core::os::close(read_fd);
    let _ = fibrio_core::os::close(write_fd);
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut reactor = Reactor::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o1 = order.clone();
    reactor.create_timer(Duration::from_millis(30), Box::new(move || o1.borrow_mut().push(2)));
    let o2 = order.clone();
    reactor.create_timer(Duration::from_millis(5), Box::new(move || o2.borrow_mut().push(1)));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while order.borrow().len() < 2 && std::time::Instant::now() < deadline {
        reactor.turn(true).unwrap();
    }
    assert_eq!(*order.borrow(), vec![1, 2]);
}

#[test]
fn cancelled_timer_never_fires() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(false));
    let f = fired.clone();
    let tok = reactor.create_timer(Duration::from_millis(10), Box::new(move || *f.borrow_mut() = true));
    reactor.cancel_timer(tok);

    // Register a second timer just so `turn` has something to wait on;
    // once it fires we know the cancelled one's deadline has long passed.
    let done = Rc::new(RefCell::new(false));
    let d = done.clone();
    reactor.create_timer(Duration::from_millis(20), Box::new(move || *d.borrow_mut() = true));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !*done.borrow() && std::time::Instant::now() < deadline {
        reactor.turn(true).unwrap();
    }
    assert!(!*fired.borrow());
}

#[test]
fn watched_child_reports_its_exit_status() {
    let mut reactor = Reactor::new().unwrap();

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        unsafe { libc::_exit(7) };
    }

    let status = Rc::new(RefCell::new(None));
    let s = status.clone();
    reactor.watch_child(pid, Box::new(move |exit| *s.borrow_mut() = Some(exit))).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while status.borrow().is_none() && std::time::Instant::now() < deadline {
        reactor.turn(true).unwrap();
    }
    assert_eq!(*status.borrow(), Some(ExitStatus::Exited(7)));
}

//! `child::watch` against a real forked-and-exited process.

use fibrio::ReactorConfig;

#[test]
fn watch_resolves_with_the_exit_code_of_a_real_child() {
    let result = fibrio::run(ReactorConfig::default(), |sched| async move {
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            unsafe { libc::_exit(3) };
        }
        let status = fibrio::child::watch(&sched, pid).await;
        assert_eq!(status, fibrio::child::ExitStatus::Exited(3));
    });
    result.unwrap();
}

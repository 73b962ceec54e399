//! Wraps a plain synchronous closure as a future that resolves to its
//! result the first time it's polled, without ever suspending.

use std::future::Future;

pub fn of_thunk<T>(f: impl FnOnce() -> T) -> impl Future<Output = T> {
    futures::future::lazy(|_cx| f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn resolves_to_the_closures_result() {
        scheduler::run(Default::default(), |_sched| async {
            let v = of_thunk(|| 2 + 2).await;
            assert_eq!(v, 4);
        }).unwrap();
    }
}

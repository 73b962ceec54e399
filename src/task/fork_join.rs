//! Runs two bodies concurrently on the same scheduler and returns both
//! results once both have completed. A thin wrapper over `futures`'
//! `join`, which already does exactly this for any pair of futures.

use std::future::Future;

pub async fn fork_join<A, B>(a: A, b: B) -> (A::Output, B::Output)
where
    A: Future,
    B: Future,
{
    futures::future::join(a, b).await
}

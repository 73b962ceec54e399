//! The cooperative task library: promises (ivars), a dynamically-scoped
//! context variable, a cooperative mutex, a task pool, fork-join, and a
//! thunk wrapper. Everything here is single-threaded (`Rc`-based); the
//! only thread-safe surface in the whole runtime is
//! [`crate::scheduler::CrossThreadSender`], used exclusively by
//! [`crate::worker`].

pub mod context_var;
pub mod fork_join;
pub mod ivar;
pub mod mutex;
pub mod pool;
pub mod thunk;

pub use context_var::ContextVar;
pub use fork_join::fork_join;
pub use ivar::Ivar;
pub use mutex::Mutex;
pub use pool::Pool;
pub use thunk::of_thunk;

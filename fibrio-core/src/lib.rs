//! Low-level building blocks for the `fibrio` runtime: the event loop
//! (readiness, one-shot timers, child-exit watchers, a thread-safe async
//! wake-up), raw OS syscall wrappers, a bipartite byte buffer, and a
//! reference-counted handle with an explicit finalizer.
//!
//! Nothing in this crate knows about fibers, promises or the cooperative
//! scheduler above it; it only implements the "external" event-loop and
//! operating-system interfaces the higher layer relies on.

pub mod bip_buffer;
pub mod error;
pub mod handle;
pub mod os;
pub mod reactor;

pub use bip_buffer::{BipBuffer, Reservation};
pub use error::{Error, Result};
pub use handle::Handle;
pub use reactor::{AsyncWaker, ExitStatus, Interest, IoToken, Readiness, Reactor, TimerToken, Turn};

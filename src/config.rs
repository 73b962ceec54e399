//! Ambient configuration, expressed the way the rest of this family of
//! crates expresses optional construction parameters: a builder-style
//! struct with `Default`, not a long constructor argument list.

use std::time::Duration;

/// Tunables for [`crate::Scheduler::run`].
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Default delay bucket for a freshly created [`crate::wheel::Wheel`]
    /// when the caller doesn't specify one explicitly.
    pub default_wheel_delay: Duration,
    /// Starting capacity for a new buffered `Reader`/`Writer`'s staging
    /// buffer. Grows on demand; this only tunes the first allocation.
    pub initial_io_buffer_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig {
            default_wheel_delay: Duration::from_secs(30),
            initial_io_buffer_capacity: 4096,
        }
    }
}

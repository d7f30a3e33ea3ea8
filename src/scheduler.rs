//! Timer scheduling capability.
//!
//! The monitor never calls into a clock directly; it arms and cancels
//! one-shot timers through a [`Scheduler`]. Production code uses the tokio
//! timer wheel, tests use a manually advanced virtual clock.

mod tokio_timer;
mod virtual_clock;

use std::time::Duration;

use thiserror::Error;
pub use tokio_timer::TokioScheduler;
pub use virtual_clock::VirtualClock;

/// Work run once when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Create a handle from a scheduler-assigned id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// One-shot timer scheduling.
pub trait Scheduler: Send + Sync {
    /// Arm a timer that runs `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancel a timer before it fires.
    ///
    /// Cancelling a handle that already fired or was already cancelled is a
    /// no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Errors that can occur when constructing a scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

//! Scheduler backed by the tokio timer.
//!
//! Each armed timer is a spawned task sleeping for the delay; cancelling
//! aborts the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

use super::Scheduler;
use super::SchedulerError;
use super::TimerHandle;
use super::TimerTask;

/// Tokio-backed scheduler.
#[derive(Debug)]
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioScheduler {
    /// Create a scheduler on the current tokio runtime.
    pub fn new() -> Result<Self, SchedulerError> {
        let runtime =
            Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Ok(Self::with_handle(runtime))
    }

    /// Create a scheduler that spawns its timers on `runtime`.
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pending = self.pending.clone();

        // Hold the map lock across spawn so the task cannot finish and try to
        // remove its entry before it is inserted.
        let mut map = self.pending.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if pending.lock().remove(&handle).is_some() {
                trace!("Timer {:?} fired", handle);
                task();
            }
        });
        map.insert(handle, join.abort_handle());

        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self.pending.lock().remove(&handle) {
            trace!("Timer {:?} cancelled", handle);
            abort.abort();
        }
    }
}

//! Deterministic scheduler driven by hand.
//!
//! Time only moves when [`VirtualClock::advance`] is called. Due timers fire
//! in deadline order, ties broken by arming order, and may arm or cancel
//! other timers while the advance is in progress.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::Scheduler;
use super::TimerHandle;
use super::TimerTask;

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_id: u64,
    /// Keyed by (deadline, handle) so iteration order is firing order.
    timers: BTreeMap<(Duration, TimerHandle), TimerTask>,
}

/// Virtual clock implementing [`Scheduler`].
#[derive(Default)]
pub struct VirtualClock {
    state: Mutex<ClockState>,
}

impl VirtualClock {
    /// Create a clock at time zero with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Move time forward, firing every timer that comes due.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;

        loop {
            // Release the lock before running the task; tasks re-enter the
            // scheduler.
            let task = {
                let mut state = self.state.lock();
                let due = state
                    .timers
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(deadline, _)| *deadline <= target);
                let Some(key) = due else {
                    state.now = target;
                    break;
                };
                state.now = key.0;
                state.timers.remove(&key)
            };

            if let Some(task) = task {
                task();
            }
        }
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending", &state.timers.len())
            .finish()
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = TimerHandle::new(state.next_id);
        let deadline = state.now + delay;
        state.timers.insert((deadline, handle), task);
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state.lock().timers.retain(|(_, h), _| *h != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> TimerTask {
        let log = log.clone();
        Box::new(move || log.lock().push(name))
    }

    #[test]
    fn test_fires_only_when_due() {
        let clock = VirtualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        clock.schedule(Duration::from_millis(1000), recorder(&log, "a"));
        clock.advance(Duration::from_millis(999));
        assert!(log.lock().is_empty());
        assert_eq!(clock.now(), Duration::from_millis(999));

        clock.advance(Duration::from_millis(1));
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_fires_in_deadline_then_arming_order() {
        let clock = VirtualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        clock.schedule(Duration::from_millis(20), recorder(&log, "late"));
        clock.schedule(Duration::from_millis(10), recorder(&log, "first"));
        clock.schedule(Duration::from_millis(10), recorder(&log, "second"));

        clock.advance(Duration::from_millis(50));
        assert_eq!(*log.lock(), vec!["first", "second", "late"]);
    }

    #[test]
    fn test_cancel_and_double_cancel() {
        let clock = VirtualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = clock.schedule(Duration::from_millis(10), recorder(&log, "a"));
        clock.cancel(handle);
        clock.cancel(handle);
        clock.advance(Duration::from_secs(1));

        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_task_can_rearm_during_advance() {
        let clock = Arc::new(VirtualClock::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_clock = clock.clone();
        let inner_log = log.clone();
        clock.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                inner_log.lock().push("outer");
                let log = inner_log.clone();
                inner_clock.schedule(
                    Duration::from_millis(10),
                    Box::new(move || log.lock().push("inner")),
                );
            }),
        );

        clock.advance(Duration::from_millis(20));
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
        assert_eq!(clock.now(), Duration::from_millis(20));
    }
}

//! Idle detection state machine.
//!
//! While running, the monitor is either active or idle. Every activity signal
//! restarts the countdown; when the countdown elapses the monitor turns idle
//! and publishes [`IdleEvent::Idle`]. The next activity signal turns it active
//! again, publishes [`IdleEvent::Active`] and starts a fresh countdown.
//!
//! Locking: the state lock is never held while subscribers run, so a
//! subscriber may call any monitor method, including [`IdleMonitor::stop`].
//! Scheduler and activity source calls are made with the state lock held;
//! implementations must not invoke monitor callbacks synchronously from
//! `schedule`, `cancel`, `attach` or `detach`.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::activity::ActivitySource;
use crate::activity::ListenerId;
use crate::domain::ActivityKind;
use crate::domain::IdleEvent;
use crate::emitter::Callback;
use crate::emitter::EventEmitter;
use crate::emitter::dispatch;
use crate::scheduler::Scheduler;
use crate::scheduler::TimerHandle;

/// Inactivity period used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction-time settings for an [`IdleMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Inactivity period before the user is considered idle.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MonitorConfig {
    /// Config with the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Errors that can occur when constructing a monitor.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Idle timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug)]
struct MonitorState {
    enabled: bool,
    idle: bool,
    /// Timeout of the current (or last) session.
    timeout: Duration,
    /// Set while enabled. After the idle transition this is the handle of the
    /// timer that already fired.
    pending_timer: Option<TimerHandle>,
    /// Bumped on every arm and on stop; a firing timer whose generation is
    /// stale does nothing.
    generation: u64,
    listeners: Vec<ListenerId>,
}

struct Inner {
    default_timeout: Duration,
    scheduler: Arc<dyn Scheduler>,
    source: Arc<dyn ActivitySource>,
    state: Mutex<MonitorState>,
    emitter: Mutex<EventEmitter<IdleEvent>>,
}

/// Idle/active state machine with subscriber notifications.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct IdleMonitor {
    inner: Arc<Inner>,
}

impl IdleMonitor {
    /// Create a stopped monitor.
    pub fn new(
        config: MonitorConfig,
        scheduler: Arc<dyn Scheduler>,
        source: Arc<dyn ActivitySource>,
    ) -> Result<Self, MonitorError> {
        if config.timeout.is_zero() {
            return Err(MonitorError::ZeroTimeout);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                default_timeout: config.timeout,
                scheduler,
                source,
                state: Mutex::new(MonitorState {
                    enabled: false,
                    idle: false,
                    timeout: config.timeout,
                    pending_timer: None,
                    generation: 0,
                    listeners: Vec::new(),
                }),
                emitter: Mutex::new(EventEmitter::new()),
            }),
        })
    }

    /// Whether the monitor is running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Whether the user is currently idle.
    ///
    /// Only meaningful while [`is_running`](Self::is_running) is true; after
    /// `stop` this keeps whatever value the last session left behind.
    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().idle
    }

    /// Timeout of the current session, or of the last one if stopped.
    pub fn timeout(&self) -> Duration {
        self.inner.state.lock().timeout
    }

    /// Start monitoring in the active state.
    ///
    /// `timeout` overrides the configured timeout for this session only. A
    /// zero override is ignored. Calling `start` while running restarts the
    /// session.
    pub fn start(&self, timeout: Option<Duration>) {
        let timeout = match timeout {
            Some(t) if !t.is_zero() => t,
            Some(_) => {
                debug!("Ignoring zero timeout override");
                self.inner.default_timeout
            }
            None => self.inner.default_timeout,
        };

        let mut state = self.inner.state.lock();
        if state.enabled {
            debug!("Monitor already running; restarting");
            self.inner.quiesce(&mut state);
        }

        state.enabled = true;
        state.idle = false;
        state.timeout = timeout;

        for kind in ActivityKind::ALL {
            let weak = Arc::downgrade(&self.inner);
            let id = self.inner.source.attach(
                kind,
                Arc::new(move |kind: ActivityKind| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_activity(kind);
                    }
                }),
            );
            state.listeners.push(id);
        }

        self.inner.arm_timer(&mut state);
        info!("Idle monitor started (timeout {:?})", timeout);
    }

    /// Stop monitoring.
    ///
    /// Cancels the countdown and detaches from the activity source. No event
    /// is published. Stopping a stopped monitor does nothing.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if !state.enabled {
            trace!("Monitor already stopped");
            return;
        }

        self.inner.quiesce(&mut state);
        state.enabled = false;
        info!("Idle monitor stopped");
    }

    /// Register `callback` for `kind`.
    ///
    /// Registering the same callback twice makes it run twice per event.
    /// Subscriptions survive stop/start cycles.
    ///
    /// The monitor owns its callbacks, so a callback that needs the monitor
    /// must capture a [`WeakIdleMonitor`] from [`downgrade`](Self::downgrade).
    /// Capturing an `IdleMonitor` clone keeps the monitor alive forever and
    /// leaves its listeners attached to the activity source.
    pub fn subscribe(&self, kind: IdleEvent, callback: Callback) {
        self.inner.emitter.lock().subscribe(kind, callback);
    }

    /// Remove subscriptions for `kind`.
    ///
    /// Without a callback every subscriber of the kind is removed. With one,
    /// only its first registration is removed. Unknown kinds or callbacks are
    /// ignored.
    pub fn unsubscribe(&self, kind: IdleEvent, callback: Option<&Callback>) {
        if !self.inner.emitter.lock().unsubscribe(kind, callback) {
            trace!("Nothing to unsubscribe for {}", kind);
        }
    }

    /// Number of subscribers registered for `kind`.
    pub fn subscriber_count(&self, kind: IdleEvent) -> usize {
        self.inner.emitter.lock().subscriber_count(kind)
    }

    /// Feed one activity signal directly, as an attached listener would.
    pub fn record_activity(&self, kind: ActivityKind) {
        self.inner.handle_activity(kind);
    }

    /// Handle that does not keep the monitor alive.
    pub fn downgrade(&self) -> WeakIdleMonitor {
        WeakIdleMonitor {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to an [`IdleMonitor`], for use inside its subscribers.
#[derive(Clone, Debug)]
pub struct WeakIdleMonitor {
    inner: Weak<Inner>,
}

impl WeakIdleMonitor {
    /// The monitor, unless every [`IdleMonitor`] handle has been dropped.
    pub fn upgrade(&self) -> Option<IdleMonitor> {
        self.inner.upgrade().map(|inner| IdleMonitor { inner })
    }
}

impl fmt::Debug for IdleMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("IdleMonitor")
            .field("enabled", &state.enabled)
            .field("idle", &state.idle)
            .field("timeout", &state.timeout)
            .field("subscribers", &*self.inner.emitter.lock())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Arm a fresh countdown, cancelling any previous one first.
    fn arm_timer(self: &Arc<Self>, state: &mut MonitorState) {
        if let Some(handle) = state.pending_timer.take() {
            self.scheduler.cancel(handle);
        }

        state.generation += 1;
        let generation = state.generation;
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = self.scheduler.schedule(
            state.timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_timeout(generation);
                }
            }),
        );

        trace!("Armed idle timer {:?} for {:?}", handle, state.timeout);
        state.pending_timer = Some(handle);
    }

    /// Cancel the countdown and detach listeners, leaving `enabled` alone.
    fn quiesce(&self, state: &mut MonitorState) {
        state.generation += 1;
        if let Some(handle) = state.pending_timer.take() {
            self.scheduler.cancel(handle);
        }
        for id in state.listeners.drain(..) {
            self.source.detach(id);
        }
    }

    fn handle_activity(self: &Arc<Self>, kind: ActivityKind) {
        let event = {
            let mut state = self.state.lock();
            if !state.enabled {
                trace!("Ignoring {} activity: monitor stopped", kind);
                return;
            }

            let event = if state.idle {
                state.idle = false;
                Some(IdleEvent::Active)
            } else {
                None
            };

            // The new window starts now, before subscribers run, so a
            // subscriber calling stop() also cancels it.
            self.arm_timer(&mut state);
            event
        };

        if let Some(event) = event {
            debug!("Activity ({}) while idle; user is active", kind);
            self.publish(event);
        }
    }

    fn handle_timeout(&self, generation: u64) {
        let timeout = {
            let mut state = self.state.lock();
            if !state.enabled || state.generation != generation {
                trace!("Ignoring stale idle timer (generation {})", generation);
                return;
            }
            if state.idle {
                return;
            }
            state.idle = true;
            state.timeout
        };

        debug!("No activity for {:?}; user is idle", timeout);
        self.publish(IdleEvent::Idle);
    }

    fn publish(&self, event: IdleEvent) {
        let subscribers = self.emitter.lock().snapshot(event);
        trace!("Publishing {} to {} subscribers", event, subscribers.len());
        dispatch(event, &subscribers);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(handle) = state.pending_timer.take() {
            self.scheduler.cancel(handle);
        }
        for id in state.listeners.drain(..) {
            self.source.detach(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityHub;
    use crate::emitter::callback;
    use crate::scheduler::VirtualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    const SECOND: Duration = Duration::from_secs(1);

    fn setup() -> (IdleMonitor, Arc<VirtualClock>, Arc<ActivityHub>) {
        let clock = Arc::new(VirtualClock::new());
        let hub = Arc::new(ActivityHub::new());
        let monitor = IdleMonitor::new(
            MonitorConfig::with_timeout(SECOND),
            clock.clone(),
            hub.clone(),
        )
        .unwrap();
        (monitor, clock, hub)
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = IdleMonitor::new(
            MonitorConfig::with_timeout(Duration::ZERO),
            Arc::new(VirtualClock::new()),
            Arc::new(ActivityHub::new()),
        );
        assert_eq!(result.unwrap_err(), MonitorError::ZeroTimeout);
    }

    #[test]
    fn test_default_config() {
        assert_eq!(MonitorConfig::default().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_new_monitor_is_stopped() {
        let (monitor, clock, hub) = setup();
        assert!(!monitor.is_running());
        assert!(!monitor.is_idle());
        assert_eq!(clock.pending(), 0);
        assert_eq!(hub.listener_count(ActivityKind::Pointer), 0);
    }

    #[test]
    fn test_start_attaches_and_arms() {
        let (monitor, clock, hub) = setup();
        monitor.start(None);

        assert!(monitor.is_running());
        assert_eq!(clock.pending(), 1);
        assert_eq!(hub.listener_count(ActivityKind::Pointer), 1);
        assert_eq!(hub.listener_count(ActivityKind::Keyboard), 1);
    }

    #[test]
    fn test_restart_does_not_duplicate() {
        let (monitor, clock, hub) = setup();
        monitor.start(None);
        monitor.start(None);

        assert_eq!(clock.pending(), 1);
        assert_eq!(hub.listener_count(ActivityKind::Pointer), 1);
        assert_eq!(hub.listener_count(ActivityKind::Keyboard), 1);
    }

    #[test]
    fn test_stop_detaches_and_cancels() {
        let (monitor, clock, hub) = setup();
        monitor.start(None);
        monitor.stop();
        monitor.stop();

        assert!(!monitor.is_running());
        assert_eq!(clock.pending(), 0);
        assert_eq!(hub.listener_count(ActivityKind::Pointer), 0);
        assert_eq!(hub.listener_count(ActivityKind::Keyboard), 0);
    }

    #[test]
    fn test_timeout_override_is_per_session() {
        let (monitor, _clock, _hub) = setup();

        monitor.start(Some(Duration::from_millis(250)));
        assert_eq!(monitor.timeout(), Duration::from_millis(250));

        monitor.start(None);
        assert_eq!(monitor.timeout(), SECOND);
    }

    #[test]
    fn test_zero_override_ignored() {
        let (monitor, clock, _hub) = setup();
        let idle = Arc::new(AtomicUsize::new(0));
        let i = idle.clone();
        monitor.subscribe(
            IdleEvent::Idle,
            callback(move || {
                i.fetch_add(1, Ordering::SeqCst);
            }),
        );

        monitor.start(Some(Duration::ZERO));
        assert_eq!(monitor.timeout(), SECOND);

        clock.advance(Duration::from_millis(999));
        assert_eq!(idle.load(Ordering::SeqCst), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(idle.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_record_activity_ignored_when_stopped() {
        let (monitor, clock, _hub) = setup();
        monitor.record_activity(ActivityKind::Keyboard);

        assert!(!monitor.is_running());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_drop_releases_source_and_timer() {
        let (monitor, clock, hub) = setup();
        monitor.start(None);
        drop(monitor);

        assert_eq!(clock.pending(), 0);
        assert_eq!(hub.listener_count(ActivityKind::Pointer), 0);
        // Nothing left to fire
        clock.advance(SECOND * 5);
    }
}

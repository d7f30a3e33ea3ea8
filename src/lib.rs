//! idle-timer - idle detection state machine.
//!
//! [`IdleMonitor`] watches activity signals and publishes [`IdleEvent::Idle`]
//! after a period without activity, and [`IdleEvent::Active`] when activity
//! resumes. Timing and signal delivery are injected through [`Scheduler`] and
//! [`ActivitySource`], so monitors can run on tokio or on a [`VirtualClock`].

pub mod activity;
pub mod config;
pub mod domain;
pub mod emitter;
pub mod hooks;
pub mod idle;
pub mod scheduler;

pub use activity::ActivityHub;
pub use activity::ActivityListener;
pub use activity::ActivitySource;
pub use activity::ListenerId;
pub use domain::ActivityKind;
pub use domain::IdleEvent;
pub use emitter::Callback;
pub use emitter::callback;
pub use idle::IdleMonitor;
pub use idle::MonitorConfig;
pub use idle::MonitorError;
pub use idle::WeakIdleMonitor;
pub use scheduler::Scheduler;
pub use scheduler::TimerHandle;
pub use scheduler::TokioScheduler;
pub use scheduler::VirtualClock;

//! Activity signal sources.
//!
//! The monitor only needs to attach and detach listeners; how signals are
//! produced is up to the host. [`ActivityHub`] is the in-process source the
//! daemon feeds from its line readers (see [`stream`]).

pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::domain::ActivityKind;

/// Listener invoked for every activity signal of the kind it was attached to.
pub type ActivityListener = Arc<dyn Fn(ActivityKind) + Send + Sync>;

/// Identifies an attached listener for later detachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Create an id from a source-assigned number.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Capability to attach/detach activity listeners.
pub trait ActivitySource: Send + Sync {
    /// Attach `listener` for signals of `kind`.
    fn attach(&self, kind: ActivityKind, listener: ActivityListener) -> ListenerId;

    /// Detach a previously attached listener. Unknown ids are ignored.
    fn detach(&self, id: ListenerId);
}

/// Errors that can occur while reading activity signals.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to bind activity socket {path}: {reason}")]
    BindFailed { path: String, reason: String },

    #[error("Failed to read activity signal: {0}")]
    ReadError(String),
}

/// In-process activity source.
#[derive(Default)]
pub struct ActivityHub {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ActivityKind, Vec<(ListenerId, ActivityListener)>>>,
}

impl ActivityHub {
    /// Create a hub with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one activity signal to every listener attached for `kind`.
    ///
    /// Listeners run without the hub lock held, so they may attach or detach.
    pub fn notify(&self, kind: ActivityKind) {
        let listeners: Vec<ActivityListener> = self
            .listeners
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        trace!("Activity signal: {} ({} listeners)", kind, listeners.len());

        for listener in listeners {
            listener(kind);
        }
    }

    /// Number of listeners attached for `kind`.
    pub fn listener_count(&self, kind: ActivityKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ActivityHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityHub")
            .field("pointer", &self.listener_count(ActivityKind::Pointer))
            .field("keyboard", &self.listener_count(ActivityKind::Keyboard))
            .finish()
    }
}

impl ActivitySource for ActivityHub {
    fn attach(&self, kind: ActivityKind, listener: ActivityListener) -> ListenerId {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    fn detach(&self, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        for list in listeners.values_mut() {
            list.retain(|(lid, _)| *lid != id);
        }
        listeners.retain(|_, list| !list.is_empty());
    }
}

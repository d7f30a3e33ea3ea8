//! Typed publish/subscribe registry.
//!
//! Subscribers are kept per event kind in registration order. Dispatch runs
//! over a snapshot taken by the caller, so a subscriber may add or remove
//! subscribers (including itself) without affecting the dispatch in progress.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use tracing::warn;

/// Zero-argument subscriber callback.
///
/// The closure's captures are its invocation context. Identity for
/// unsubscription is the identity of the `Arc` allocation.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback(f: impl Fn() + Send + Sync + 'static) -> Callback {
    Arc::new(f)
}

/// Compare two callbacks by allocation, ignoring vtable pointers.
fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Per-kind subscriber registry.
pub struct EventEmitter<K> {
    subscribers: HashMap<K, Vec<Callback>>,
}

impl<K> EventEmitter<K>
where
    K: Copy + Eq + Hash,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    /// Append a subscriber for `kind`. Duplicates are allowed.
    pub fn subscribe(&mut self, kind: K, callback: Callback) {
        self.subscribers.entry(kind).or_default().push(callback);
    }

    /// Remove subscribers for `kind`.
    ///
    /// With `None`, every subscriber for the kind is dropped. With a callback,
    /// only the first registration of that callback is removed; later
    /// duplicates stay subscribed. Returns whether anything was removed.
    pub fn unsubscribe(&mut self, kind: K, callback: Option<&Callback>) -> bool {
        let Some(callback) = callback else {
            return self.subscribers.remove(&kind).is_some();
        };

        let Some(list) = self.subscribers.get_mut(&kind) else {
            return false;
        };

        match list.iter().position(|cb| same_callback(cb, callback)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of subscribers currently registered for `kind`.
    pub fn subscriber_count(&self, kind: K) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    /// Copy of the subscriber list for `kind`, in registration order.
    pub fn snapshot(&self, kind: K) -> Vec<Callback> {
        self.subscribers.get(&kind).cloned().unwrap_or_default()
    }
}

impl<K> Default for EventEmitter<K>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug> fmt::Debug for EventEmitter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, list) in &self.subscribers {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

/// Invoke every callback in order.
///
/// A panicking callback is logged and skipped; the rest still run. Returns
/// the number of callbacks that panicked.
pub fn dispatch<K: fmt::Debug>(kind: K, callbacks: &[Callback]) -> usize {
    let mut failures = 0;

    for (index, cb) in callbacks.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
            failures += 1;
            warn!("Subscriber #{} for {:?} panicked; continuing dispatch", index, kind);
        }
    }

    failures
}

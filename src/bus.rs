//! Event bus for terminal monitor events.
//!
//! Publishing is synchronous on the caller's thread (the scheduler thread in
//! practice). The registry lock is released before any listener runs, so a
//! listener may register or unregister listeners from inside its callback.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::status::MonitorEvent;

/// Receives terminal monitor events.
///
/// Callbacks run on the scheduler thread and must not block for long.
pub trait MonitorListener<T>: Send + Sync {
    /// Called once per published event.
    fn on_event(&self, event: &MonitorEvent<T>);
}

impl<T, F> MonitorListener<T> for F
where
    F: Fn(&MonitorEvent<T>) + Send + Sync,
{
    fn on_event(&self, event: &MonitorEvent<T>) {
        self(event);
    }
}

/// Registry key: the address of the shared listener.
type ListenerKey = usize;

fn key_of<L: ?Sized>(listener: &Arc<L>) -> ListenerKey {
    Arc::as_ptr(listener).cast::<()>() as usize
}

/// Fan-out of monitor events to registered listeners.
pub struct EventBus<T> {
    listeners: RwLock<HashMap<ListenerKey, Arc<dyn MonitorListener<T>>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: 'static> EventBus<T> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Returns false if it was already registered.
    pub fn register<L>(&self, listener: &Arc<L>) -> bool
    where
        L: MonitorListener<T> + 'static,
    {
        let key = key_of(listener);
        let shared: Arc<dyn MonitorListener<T>> = Arc::<L>::clone(listener);
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.contains_key(&key) {
            return false;
        }
        guard.insert(key, shared);
        tracing::debug!(listeners = guard.len(), "listener registered");
        true
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unregister<L>(&self, listener: &Arc<L>) -> bool
    where
        L: MonitorListener<T> + 'static,
    {
        let key = key_of(listener);
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = guard.remove(&key).is_some();
        if removed {
            tracing::debug!(listeners = guard.len(), "listener unregistered");
        }
        removed
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true if nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener registered right now.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn publish(&self, event: &MonitorEvent<T>) {
        let snapshot: Vec<Arc<dyn MonitorListener<T>>> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                tracing::error!(
                    subject = %event.subject_id(),
                    kind = %event.kind,
                    "monitor listener panicked while handling event"
                );
            }
        }
    }
}

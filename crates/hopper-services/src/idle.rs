//! Cooperative idle notification.
//!
//! Background work never calls back into a component directly. It registers a
//! callback here keyed by the component's id, and the host fires all pending
//! callbacks from its own loop with [`IdleHook::tick`]. A later registration
//! for the same component replaces the earlier one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Identity of one component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ComponentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type IdleCallback = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct IdleHook {
    callbacks: Arc<Mutex<HashMap<ComponentId, IdleCallback>>>,
    notify: Arc<Notify>,
}

impl IdleHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `callback` for the next tick, replacing any callback the
    /// component already had queued.
    pub fn register<F>(&self, component: ComponentId, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let replaced = self
            .callbacks
            .lock()
            .insert(component, Box::new(callback))
            .is_some();
        tracing::trace!(%component, replaced, "idle callback registered");
        self.notify.notify_one();
    }

    pub fn unregister(&self, component: ComponentId) -> bool {
        self.callbacks.lock().remove(&component).is_some()
    }

    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Fire and clear every queued callback. Returns how many ran.
    ///
    /// Callbacks run outside the lock, so they may register again; those
    /// registrations wait for the next tick.
    pub fn tick(&self) -> usize {
        let drained: Vec<(ComponentId, IdleCallback)> = self.callbacks.lock().drain().collect();
        let fired = drained.len();
        for (_, callback) in drained {
            callback();
        }
        fired
    }

    /// Resolve once something has been registered since the last wait.
    pub async fn wait(&self) {
        if self.pending() > 0 {
            return;
        }
        self.notify.notified().await;
    }
}

//! Event routing
//!
//! Fans classified events out to registered observers. Dispatch walks a
//! snapshot of the registry, so observers may subscribe or unsubscribe
//! (themselves included) from inside a callback.

use crate::protocol::InboundEvent;
use parking_lot::{Mutex, ReentrantMutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Observer callback
pub type Observer = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

struct Registry {
    observers: Mutex<Vec<(u64, Observer)>>,
    next_id: AtomicU64,
    /// Held for a whole dispatch so events never interleave across tasks.
    /// Reentrant: an observer may dispatch from inside its callback.
    dispatch: ReentrantMutex<()>,
}

/// Ordered observer registry. Cheap to clone; clones share observers.
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<Registry>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Register an observer. Notification order is registration order.
    ///
    /// The observer stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped, or forever after [`Subscription::detach`].
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.observers.lock().push((id, Arc::new(observer)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: true,
        }
    }

    /// Deliver one event to every observer registered when dispatch starts
    pub fn dispatch(&self, event: &InboundEvent) {
        let _serial = self.registry.dispatch.lock();
        let snapshot: Vec<Observer> = self
            .registry
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        tracing::debug!(
            observers = snapshot.len(),
            kind = ?event.kind,
            "Dispatching event"
        );

        for observer in snapshot {
            // A panicking observer must not take the dispatching task down
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                tracing::error!(kind = ?event.kind, "Observer panicked, event skipped for it");
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry.observers.lock().len()
    }
}

/// Handle to a registered observer
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
    active: bool,
}

impl Subscription {
    /// Remove the observer. Safe at any time, including mid-dispatch.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the observer registered for the router's lifetime
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.observers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

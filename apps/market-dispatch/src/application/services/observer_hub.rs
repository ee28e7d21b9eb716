//! Observer Hub
//!
//! Ordered, synchronous fan-out of notifications to registered observers.
//! Every [`ObserverHub::notify`] works on a snapshot of the observer list,
//! so an observer may register or unregister observers (itself included)
//! while it is being called without affecting the current delivery.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::Observer;
use crate::domain::notification::Notification;

/// Shared, cloneable observer registry.
#[derive(Clone, Default)]
pub struct ObserverHub {
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field("observers", &self.len())
            .finish()
    }
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl ObserverHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Returns `false` if it was already registered.
    pub fn register(&self, observer: Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    /// Unregister every observer.
    pub fn unregister_all(&self) {
        self.observers.write().clear();
    }

    /// Deliver a notification to every observer, in registration order.
    pub fn notify(&self, notification: &Notification) {
        let snapshot: Vec<Arc<dyn Observer>> = self.observers.read().clone();
        for observer in snapshot {
            observer.update(notification);
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

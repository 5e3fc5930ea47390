//! Subscription registry and fan-out.
//!
//! Subscribers register an [`EventFilter`] plus a callback; each incoming
//! event is matched against every registered filter and matching callbacks
//! run synchronously, in registration order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;
use waybill_types::{EventFilter, StreamEvent};

/// Callback invoked for each event matching a subscription's filter.
pub type EventCallback = Box<dyn Fn(&StreamEvent) + Send + Sync>;

/// Identifier for a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct RegisteredSubscription {
    id: SubscriptionId,
    filter: EventFilter,
    callback: EventCallback,
}

/// Registry of live subscriptions, shared between the client handle and
/// its connection-loop task.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subscriptions: RwLock<Vec<RegisteredSubscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, filter: EventFilter, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_write().push(RegisteredSubscription {
            id,
            filter,
            callback,
        });
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.lock_write().retain(|s| s.id != id);
    }

    /// Relays one event to every matching subscription, in registration
    /// order. Returns how many subscriptions matched.
    ///
    /// Callbacks run under the read lock; re-entrant registry mutation
    /// (subscribing or unsubscribing from inside a callback) would
    /// deadlock against it.
    pub(crate) fn dispatch(&self, event: &StreamEvent) -> usize {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let mut matched = 0;
        for sub in subscriptions.iter() {
            if sub.filter.matches(event) {
                (sub.callback)(event);
                matched += 1;
            }
        }
        debug!(
            event_type = %event.event_type,
            source = %event.source,
            matched,
            "dispatched stream event"
        );
        matched
    }

    pub(crate) fn clear(&self) {
        self.lock_write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    // A panicking subscriber callback must not poison the registry for
    // everyone else.
    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<RegisteredSubscription>> {
        self.subscriptions.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a registered subscription.
///
/// The subscription stays live until this handle is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
pub struct Subscription {
    id: SubscriptionId,
    registry: Arc<SubscriptionRegistry>,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            id,
            registry,
            active: true,
        }
    }

    /// This subscription's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the subscription from the registry.
    pub fn unsubscribe(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if self.active {
            self.registry.remove(self.id);
            self.active = false;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove_inner();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

//! Scope-aware fan-out of committed events to registered observers.
//!
//! Delivery is synchronous and ordering-preserving: observers see events in
//! commit order, in subscription order within one event. A failing observer
//! is isolated — its error is logged and later observers still run.

use std::fmt;

use contracts::{Event, Scope};
use tracing::warn;

#[derive(Debug)]
pub struct ObserverError {
    pub message: String,
}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ObserverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ObserverError {}

/// Anything that wants to see committed events. Observers receive events
/// only — never intentions.
pub trait Observer {
    fn name(&self) -> &str;

    fn on_event(&mut self, event: &Event) -> Result<(), ObserverError>;
}

/// Handle returned by `subscribe`; unsubscribing is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    handle: SubscriptionHandle,
    filter: Scope,
    observer: Box<dyn Observer>,
}

/// Ordered observer registry. Notification order is subscription order.
#[derive(Default)]
pub struct ObserverHub {
    subscriptions: Vec<Subscription>,
    next_handle: u64,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_handle: 1,
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn Observer>, filter: Scope) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        self.subscriptions.push(Subscription {
            handle,
            filter,
            observer,
        });
        handle
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.subscriptions
            .retain(|subscription| subscription.handle != handle);
    }

    pub fn observer_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver one committed event to every observer whose filter
    /// intersects the event's scope.
    pub fn publish(&mut self, event: &Event) {
        for subscription in &mut self.subscriptions {
            if !event.scope.visible_to(&subscription.filter) {
                continue;
            }
            if let Err(error) = subscription.observer.on_event(event) {
                warn!(
                    observer = subscription.observer.name(),
                    event_id = event.event_id.value(),
                    %error,
                    "observer failed; delivery continues"
                );
            }
        }
    }
}

impl fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHub")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

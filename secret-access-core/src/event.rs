//! Event types and the event bus.
//!
//! Dispatch uses a closed tag-to-handlers map: the event hierarchy here is
//! exactly three leaf types plus an "all events" supertype, so there's no
//! need for open-ended capability-set machinery. A handler failing
//! (returning `Err`) is logged and does not stop later handlers.

use crate::model::SecretReference;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::sync::Arc;
use std::time::SystemTime;

/// A unique, opaque event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(uuid::Uuid);

impl EventId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// A cache read observed a stale or missing entry.
    CacheMiss,
    /// A background policy tick decided a refresh was due.
    PolicyTick,
    /// The refresh coordinator's periodic sweep.
    CoordinatorSweep,
    /// An external notification (webhook, change-stream) triggered it.
    ExternalNotification,
    /// A caller explicitly asked for a refresh.
    Manual,
}

/// Emitted before a refresh attempt.
#[derive(Debug, Clone)]
pub struct SecretRefreshRequested {
    /// Opaque unique event id.
    pub id: EventId,
    /// When this event was constructed.
    pub created_at: SystemTime,
    /// The reference about to be refreshed.
    pub reference: SecretReference,
    /// Why the refresh was requested.
    pub reason: RefreshReason,
}

impl SecretRefreshRequested {
    /// Construct a new event, stamping id and timestamp.
    pub fn new(reference: SecretReference, reason: RefreshReason) -> Self {
        Self {
            id: EventId::new(),
            created_at: SystemTime::now(),
            reference,
            reason,
        }
    }
}

/// Emitted after a successful refresh that updated the cache.
#[derive(Debug, Clone)]
pub struct SecretRefreshed {
    /// Opaque unique event id.
    pub id: EventId,
    /// When this event was constructed.
    pub created_at: SystemTime,
    /// The reference that was refreshed.
    pub reference: SecretReference,
    /// The newly fetched version identifier.
    pub version: String,
    /// Whether the secret's bytes differed from the previously held value.
    pub value_changed: bool,
}

impl SecretRefreshed {
    /// Construct a new event, stamping id and timestamp.
    pub fn new(reference: SecretReference, version: impl Into<String>, value_changed: bool) -> Self {
        Self {
            id: EventId::new(),
            created_at: SystemTime::now(),
            reference,
            version: version.into(),
            value_changed,
        }
    }
}

/// Emitted when an `"active"`-hint secret's version changed while an
/// `"inactive"`-hint counterpart is cached.
#[derive(Debug, Clone)]
pub struct SecretRolloverDetected {
    /// Opaque unique event id.
    pub id: EventId,
    /// When this event was constructed.
    pub created_at: SystemTime,
    /// The `"active"`-hint reference that changed version.
    pub active_reference: SecretReference,
    /// The paired `"inactive"`-hint reference found in the cache.
    pub inactive_reference: SecretReference,
    /// The newly observed active version.
    pub new_active_version: String,
}

impl SecretRolloverDetected {
    /// Construct a new event, stamping id and timestamp.
    pub fn new(
        active_reference: SecretReference,
        inactive_reference: SecretReference,
        new_active_version: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            created_at: SystemTime::now(),
            active_reference,
            inactive_reference,
            new_active_version: new_active_version.into(),
        }
    }
}

/// The union of event types the core publishes.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SecretAccessEvent {
    /// See [`SecretRefreshRequested`].
    RefreshRequested(SecretRefreshRequested),
    /// See [`SecretRefreshed`].
    Refreshed(SecretRefreshed),
    /// See [`SecretRolloverDetected`].
    RolloverDetected(SecretRolloverDetected),
}

impl SecretAccessEvent {
    /// The topic this event belongs to, for subscription dispatch.
    pub fn topic(&self) -> EventTopic {
        match self {
            SecretAccessEvent::RefreshRequested(_) => EventTopic::RefreshRequested,
            SecretAccessEvent::Refreshed(_) => EventTopic::Refreshed,
            SecretAccessEvent::RolloverDetected(_) => EventTopic::RolloverDetected,
        }
    }

    /// This event's opaque id.
    pub fn id(&self) -> EventId {
        match self {
            SecretAccessEvent::RefreshRequested(e) => e.id,
            SecretAccessEvent::Refreshed(e) => e.id,
            SecretAccessEvent::RolloverDetected(e) => e.id,
        }
    }
}

/// A subscription key: either a specific event type, or `All` (every event,
/// regardless of concrete type — the one "supertype" in this closed
/// hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// Every published event.
    All,
    /// See [`SecretRefreshRequested`].
    RefreshRequested,
    /// See [`SecretRefreshed`].
    Refreshed,
    /// See [`SecretRolloverDetected`].
    RolloverDetected,
}

/// A subscriber to the event bus.
pub trait EventHandler: Send + Sync {
    /// Handle a published event. An `Err` is logged and does not prevent
    /// later handlers in the same `publish` call from running.
    fn handle(
        &self,
        event: &SecretAccessEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Fan-out of typed lifecycle events to any number of subscribers.
///
/// Delivery is synchronous on the publishing thread for deterministic
/// ordering; async delivery is a subscriber's own concern if it wants one.
pub struct EventBus {
    handlers: RwLock<HashMap<EventTopic, Vec<Arc<dyn EventHandler>>>>,
    history: Mutex<Vec<SecretAccessEvent>>,
}

impl EventBus {
    /// An empty bus with no subscribers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Register `handler` for `topic`. Multiple handlers may share a topic;
    /// they are all invoked, in an unspecified order.
    pub fn subscribe(&self, topic: EventTopic, handler: Arc<dyn EventHandler>) {
        self.handlers.write().unwrap().entry(topic).or_default().push(handler);
    }

    /// Remove every handler registered for `topic`.
    pub fn unsubscribe_all(&self, topic: EventTopic) {
        self.handlers.write().unwrap().remove(&topic);
    }

    /// Publish `event`. Every handler registered for its specific topic and
    /// every handler registered for [`EventTopic::All`] is invoked exactly
    /// once.
    pub fn publish(&self, event: SecretAccessEvent) {
        self.history.lock().unwrap().push(event.clone());
        let topic = event.topic();
        let handlers = self.handlers.read().unwrap();
        for t in [EventTopic::All, topic] {
            let Some(subscribers) = handlers.get(&t) else {
                continue;
            };
            for handler in subscribers {
                if let Err(error) = handler.handle(&event) {
                    tracing::warn!(?t, %error, "event handler returned an error; continuing");
                }
            }
        }
    }

    /// A snapshot of every event published so far, oldest first.
    pub fn published_history(&self) -> Vec<SecretAccessEvent> {
        self.history.lock().unwrap().clone()
    }

    /// Discard the published-event history.
    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoreType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);
    impl EventHandler for CountingHandler {
        fn handle(
            &self,
            _event: &SecretAccessEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;
    impl EventHandler for FailingHandler {
        fn handle(
            &self,
            _event: &SecretAccessEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("handler exploded".into())
        }
    }

    fn refreshed_event() -> SecretAccessEvent {
        let reference = SecretReference::new(StoreType::AwsSecretsManager, "db").unwrap();
        SecretAccessEvent::Refreshed(SecretRefreshed::new(reference, "v1", true))
    }

    #[test]
    fn subscribe_then_publish_invokes_handler_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventTopic::Refreshed, Arc::new(CountingHandler(count.clone())));
        bus.publish(refreshed_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_registered_for_all_sees_every_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventTopic::All, Arc::new(CountingHandler(count.clone())));
        bus.publish(refreshed_event());
        let reference = SecretReference::new(StoreType::AwsSecretsManager, "db").unwrap();
        bus.publish(SecretAccessEvent::RefreshRequested(
            SecretRefreshRequested::new(reference, RefreshReason::Manual),
        ));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_for_one_topic_does_not_see_another() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventTopic::RolloverDetected, Arc::new(CountingHandler(count.clone())));
        bus.publish(refreshed_event());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_handler_does_not_block_later_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventTopic::Refreshed, Arc::new(FailingHandler));
        bus.subscribe(EventTopic::Refreshed, Arc::new(CountingHandler(count.clone())));
        bus.publish(refreshed_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_all_removes_every_handler_for_the_topic() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventTopic::Refreshed, Arc::new(CountingHandler(count.clone())));
        bus.unsubscribe_all(EventTopic::Refreshed);
        bus.publish(refreshed_event());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn published_history_accumulates_and_clears() {
        let bus = EventBus::new();
        bus.publish(refreshed_event());
        bus.publish(refreshed_event());
        assert_eq!(bus.published_history().len(), 2);
        bus.clear_history();
        assert!(bus.published_history().is_empty());
    }
}

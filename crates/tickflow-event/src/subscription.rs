//! Event subscriptions and the handler contract.
//!
//! A subscription binds a system to a set of event types. Delivery
//! goes through an [`EventHandler`]; an optional filter predicate
//! narrows matching beyond the type set.
//!
//! # Delivery Contract
//!
//! - A handler is invoked at most `1 + max_retries` times per event.
//! - Handler failures for one subscription never affect delivery to
//!   other subscriptions of the same event.
//! - Counters (`processed_count`, `error_count`) are updated by the
//!   bus, not by handlers.

use crate::event::{EventType, GameEvent};
use crate::EventError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tickflow_types::{Priority, SubscriptionId, SystemId};

/// Handles events delivered to one subscription.
///
/// Handlers run on the bus's dispatch task. Returning an error
/// triggers the subscription's retry policy; exhausting retries
/// dead-letters the event for this subscription only.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one delivered event.
    async fn handle(&self, event: &GameEvent) -> Result<(), EventError>;
}

/// A filter predicate applied after type matching.
///
/// Must be cheap and side-effect free; it runs inline during
/// dispatch for every candidate event.
pub type EventFilter = dyn Fn(&GameEvent) -> bool + Send + Sync;

/// One system's registration of interest in a set of event types.
pub struct EventSubscription {
    /// Subscription id, minted by the bus at subscribe time.
    pub id: SubscriptionId,
    /// The system that owns this subscription.
    pub subscriber: SystemId,
    /// Event types this subscription matches. A set containing
    /// [`EventType::Any`] matches everything.
    pub event_types: Vec<EventType>,
    /// Optional predicate narrowing matches beyond the type set.
    pub filter: Option<Arc<EventFilter>>,
    /// Delivery target.
    pub handler: Arc<dyn EventHandler>,
    /// Delivery order among subscriptions matching the same event:
    /// higher-priority subscriptions are served first.
    pub priority: Priority,
    /// Retries after the first failed delivery attempt.
    pub max_retries: u32,
    /// Events successfully handled.
    processed_count: AtomicU64,
    /// Events that exhausted retries.
    error_count: AtomicU64,
}

impl EventSubscription {
    /// Creates a subscription matching the given event types.
    #[must_use]
    pub fn new(
        subscriber: SystemId,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            subscriber,
            event_types,
            filter: None,
            handler,
            priority: Priority::Medium,
            max_retries: 3,
            processed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Sets the filter predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<EventFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the delivery priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns `true` if this subscription should receive the event:
    /// the type set matches and the filter (if any) accepts it.
    #[must_use]
    pub fn matches(&self, event: &GameEvent) -> bool {
        let type_match = self
            .event_types
            .iter()
            .any(|t| t.matches(&event.event_type));
        if !type_match {
            return false;
        }
        match &self.filter {
            Some(f) => f(event),
            None => true,
        }
    }

    /// Records a successful delivery.
    pub fn record_processed(&self) {
        self.processed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a delivery that exhausted its retries.
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Events successfully handled so far.
    #[must_use]
    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Relaxed)
    }

    /// Events dead-lettered for this subscription so far.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("event_types", &self.event_types)
            .field("has_filter", &self.filter.is_some())
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _event: &GameEvent) -> Result<(), EventError> {
            Ok(())
        }
    }

    fn subscription(types: Vec<EventType>) -> EventSubscription {
        EventSubscription::new(SystemId::named("military"), types, Arc::new(NoopHandler))
    }

    #[test]
    fn matches_named_type() {
        let sub = subscription(vec![EventType::named("war-declared")]);
        let hit = GameEvent::new("war-declared", SystemId::named("diplomacy"), Value::Null);
        let miss = GameEvent::new("peace-signed", SystemId::named("diplomacy"), Value::Null);
        assert!(sub.matches(&hit));
        assert!(!sub.matches(&miss));
    }

    #[test]
    fn wildcard_matches_all_types() {
        let sub = subscription(vec![EventType::Any]);
        let e = GameEvent::new("anything", SystemId::named("diplomacy"), Value::Null);
        assert!(sub.matches(&e));
    }

    #[test]
    fn filter_narrows_matches() {
        let sub = subscription(vec![EventType::Any])
            .with_filter(Arc::new(|e| e.payload.get("severe").is_some()));
        let severe = GameEvent::new("quake", SystemId::named("nature"), json!({"severe": true}));
        let mild = GameEvent::new("quake", SystemId::named("nature"), json!({}));
        assert!(sub.matches(&severe));
        assert!(!sub.matches(&mild));
    }

    #[test]
    fn counters_start_at_zero() {
        let sub = subscription(vec![EventType::Any]);
        assert_eq!(sub.processed_count(), 0);
        assert_eq!(sub.error_count(), 0);
        sub.record_processed();
        sub.record_error();
        assert_eq!(sub.processed_count(), 1);
        assert_eq!(sub.error_count(), 1);
    }

    #[test]
    fn default_retry_budget() {
        let sub = subscription(vec![EventType::Any]);
        assert_eq!(sub.max_retries, 3);
        let sub = sub.with_max_retries(0);
        assert_eq!(sub.max_retries, 0);
    }

    #[test]
    fn default_priority_is_medium() {
        let sub = subscription(vec![EventType::Any]);
        assert_eq!(sub.priority, Priority::Medium);
        let sub = sub.with_priority(Priority::Critical);
        assert_eq!(sub.priority, Priority::Critical);
    }
}

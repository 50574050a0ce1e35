//! Game events published on the bus.
//!
//! A [`GameEvent`] is an asynchronous cross-system notification,
//! decoupled from the tick loop. Events are immutable after publish;
//! the bus stamps `processed` on its own copy during dispatch
//! bookkeeping, never on the publisher's.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐  publish   ┌──────────────┐  deliver  ┌──────────────┐
//! │    System    │ ─────────► │   EventBus   │ ────────► │ Subscription │
//! │   (source)   │            │ (priority Q) │           │   handler    │
//! └──────────────┘            └──────────────┘           └──────────────┘
//! ```
//!
//! # Type Matching
//!
//! Subscriptions match on an [`EventType`] set. `EventType::Any` is
//! the wildcard: a subscription carrying it receives every event
//! that passes its filter predicate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::SystemTime;
use tickflow_types::{EntityId, EventId, Priority, SystemId};

/// The type tag of an event, with wildcard support.
///
/// # Example
///
/// ```
/// use tickflow_event::EventType;
///
/// let war = EventType::named("war-declared");
/// assert!(war.matches("war-declared"));
/// assert!(!war.matches("peace-signed"));
/// assert!(EventType::Any.matches("anything"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Matches exactly one event type name.
    Named(String),
    /// Wildcard: matches every event type.
    Any,
}

impl EventType {
    /// Creates a named event type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Returns `true` if this type tag matches the given name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Named(n) => n == name,
            Self::Any => true,
        }
    }

    /// Returns `true` if this is the wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(n) => write!(f, "{}", n),
            Self::Any => write!(f, "*"),
        }
    }
}

/// A cross-system notification.
///
/// Immutable after publish. The `processed` flag is owned by the
/// bus's dispatch bookkeeping.
///
/// # Required Fields
///
/// `publish` validates that id, type and source are present and
/// non-empty; events failing validation are rejected before they
/// reach the queue.
///
/// # Example
///
/// ```
/// use tickflow_event::GameEvent;
/// use tickflow_types::{Priority, SystemId};
/// use serde_json::json;
///
/// let event = GameEvent::new(
///     "trade-pact-signed",
///     SystemId::named("diplomacy"),
///     json!({"parties": 2}),
/// )
/// .with_priority(Priority::High);
///
/// assert_eq!(event.event_type, "trade-pact-signed");
/// assert!(!event.processed);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    /// Unique event id, minted at construction.
    pub id: EventId,
    /// Event type name, matched against subscription type sets.
    pub event_type: String,
    /// The system that published this event.
    pub source: SystemId,
    /// Optional target entity the event concerns.
    pub target: Option<EntityId>,
    /// Opaque payload.
    pub payload: Value,
    /// Publish timestamp.
    pub timestamp: SystemTime,
    /// Delivery priority within a dispatch batch.
    pub priority: Priority,
    /// Set by the bus once every matching subscription has been
    /// settled (delivered or dead-lettered).
    pub processed: bool,
}

impl GameEvent {
    /// Creates a new event with medium priority and no target.
    #[must_use]
    pub fn new(event_type: impl Into<String>, source: SystemId, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            source,
            target: None,
            payload,
            timestamp: SystemTime::now(),
            priority: Priority::Medium,
            processed: false,
        }
    }

    /// Sets the delivery priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the target entity.
    #[must_use]
    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = Some(target);
        self
    }

    /// Returns `true` if the event carries everything `publish`
    /// requires: a non-empty type name. (Id and source are always
    /// present by construction; deserialized events may not be.)
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.event_type.is_empty() && !self.source.name().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SystemId {
        SystemId::named("diplomacy")
    }

    #[test]
    fn event_type_matching() {
        let t = EventType::named("war-declared");
        assert!(t.matches("war-declared"));
        assert!(!t.matches("war"));
        assert!(!t.is_wildcard());
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(EventType::Any.matches("a"));
        assert!(EventType::Any.matches(""));
        assert!(EventType::Any.is_wildcard());
    }

    #[test]
    fn event_construction() {
        let e = GameEvent::new("pact", source(), json!({"k": 1}));
        assert_eq!(e.event_type, "pact");
        assert_eq!(e.priority, Priority::Medium);
        assert!(e.target.is_none());
        assert!(!e.processed);
        assert!(e.is_valid());
    }

    #[test]
    fn event_builders() {
        let target = EntityId::new();
        let e = GameEvent::new("pact", source(), Value::Null)
            .with_priority(Priority::Critical)
            .with_target(target);
        assert_eq!(e.priority, Priority::Critical);
        assert_eq!(e.target, Some(target));
    }

    #[test]
    fn empty_type_invalid() {
        let e = GameEvent::new("", source(), Value::Null);
        assert!(!e.is_valid());
    }

    #[test]
    fn event_ids_unique() {
        let a = GameEvent::new("x", source(), Value::Null);
        let b = GameEvent::new("x", source(), Value::Null);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serde_round_trip() {
        let e = GameEvent::new("pact", source(), json!({"v": true}));
        let json = serde_json::to_string(&e).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, e.id);
        assert_eq!(back.event_type, "pact");
    }

    #[test]
    fn display() {
        assert_eq!(EventType::named("x").to_string(), "x");
        assert_eq!(EventType::Any.to_string(), "*");
    }
}

//! Dead letters: events that exhausted a subscription's retries.
//!
//! A dead letter is scoped to one (event, subscription) pair. The
//! same event can be delivered successfully to one subscriber and
//! dead-lettered for another.

use crate::event::GameEvent;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tickflow_types::SubscriptionId;

/// A failed delivery, preserved for inspection and requeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// The event that could not be delivered.
    pub event: GameEvent,
    /// The subscription whose handler kept failing.
    pub subscription: SubscriptionId,
    /// Message of the final handler error.
    pub reason: String,
    /// Total failed attempts (first try plus retries).
    pub failure_count: u32,
    /// When the first attempt failed.
    pub first_failure: SystemTime,
    /// When the final attempt failed.
    pub last_failure: SystemTime,
}

impl DeadLetterEvent {
    /// Creates a dead letter for a delivery that just exhausted its
    /// retries.
    #[must_use]
    pub fn new(
        event: GameEvent,
        subscription: SubscriptionId,
        reason: impl Into<String>,
        failure_count: u32,
        first_failure: SystemTime,
    ) -> Self {
        Self {
            event,
            subscription,
            reason: reason.into(),
            failure_count,
            first_failure,
            last_failure: SystemTime::now(),
        }
    }
}

impl std::fmt::Display for DeadLetterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dead letter: event {} ({}) for {} after {} attempts: {}",
            self.event.id, self.event.event_type, self.subscription, self.failure_count, self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tickflow_types::SystemId;

    #[test]
    fn construction_and_display() {
        let event = GameEvent::new("pact", SystemId::named("diplomacy"), Value::Null);
        let sub = SubscriptionId::new();
        let dl = DeadLetterEvent::new(event, sub, "handler panicked", 3, SystemTime::now());
        assert_eq!(dl.failure_count, 3);
        let s = dl.to_string();
        assert!(s.contains("pact"));
        assert!(s.contains("3 attempts"));
        assert!(s.contains("handler panicked"));
    }

    #[test]
    fn serde_round_trip() {
        let event = GameEvent::new("pact", SystemId::named("diplomacy"), Value::Null);
        let dl = DeadLetterEvent::new(
            event,
            SubscriptionId::new(),
            "timeout",
            2,
            SystemTime::now(),
        );
        let json = serde_json::to_string(&dl).unwrap();
        let back: DeadLetterEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.failure_count, 2);
        assert_eq!(back.reason, "timeout");
    }
}

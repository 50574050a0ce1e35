//! Execution results.

use crate::state::StateDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickflow_event::GameEvent;

/// What one system invocation produced.
///
/// Failed invocations still report a duration; their delta is empty
/// and never merged into the tick's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the invocation completed normally.
    pub success: bool,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// State changes to merge, empty on failure.
    pub delta: StateDelta,
    /// Events to publish after the delta is accepted.
    pub events: Vec<GameEvent>,
    /// Failure message, when `success` is false.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A successful result carrying a delta.
    #[must_use]
    pub fn success(delta: StateDelta, duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            delta,
            events: Vec::new(),
            error: None,
        }
    }

    /// A failed result. The delta is discarded by construction.
    #[must_use]
    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            duration,
            delta: StateDelta::new(),
            events: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Attaches events to publish on success.
    #[must_use]
    pub fn with_events(mut self, events: Vec<GameEvent>) -> Self {
        self.events = events;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tickflow_types::SystemId;

    #[test]
    fn success_carries_delta() {
        let delta = StateDelta::new().with("gold", json!(5));
        let r = ExecutionResult::success(delta.clone(), Duration::from_millis(10));
        assert!(r.success);
        assert_eq!(r.delta, delta);
        assert!(r.error.is_none());
    }

    #[test]
    fn failure_has_empty_delta() {
        let r = ExecutionResult::failure("boom", Duration::from_millis(3));
        assert!(!r.success);
        assert!(r.delta.is_empty());
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn events_attach() {
        let event = GameEvent::new("pact", SystemId::named("diplomacy"), Value::Null);
        let r = ExecutionResult::success(StateDelta::new(), Duration::ZERO)
            .with_events(vec![event]);
        assert_eq!(r.events.len(), 1);
    }
}

//! Event layer errors.

use tickflow_types::ErrorCode;

/// Errors raised while publishing or delivering events.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `InvalidEvent` | `EVENT_INVALID` | No |
/// | `HandlerFailed` | `EVENT_HANDLER_FAILED` | Yes |
/// | `SubscriptionNotFound` | `EVENT_SUBSCRIPTION_NOT_FOUND` | No |
/// | `DeadLetterNotFound` | `EVENT_DEAD_LETTER_NOT_FOUND` | No |
/// | `QueueClosed` | `EVENT_QUEUE_CLOSED` | No |
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event failed publish validation (empty type or source).
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// What the validation rejected.
        reason: String,
    },

    /// A handler returned an error during delivery.
    #[error("handler failed: {reason}")]
    HandlerFailed {
        /// Message of the handler's error.
        reason: String,
    },

    /// No subscription with the given id is registered.
    #[error("subscription not found: {id}")]
    SubscriptionNotFound {
        /// The missing subscription id.
        id: String,
    },

    /// No dead letter with the given event id exists.
    #[error("dead letter not found for event: {id}")]
    DeadLetterNotFound {
        /// The missing event id.
        id: String,
    },

    /// The bus's dispatch queue has shut down.
    #[error("event queue closed")]
    QueueClosed,
}

impl EventError {
    /// Convenience constructor for handler failures.
    #[must_use]
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for EventError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidEvent { .. } => "EVENT_INVALID",
            Self::HandlerFailed { .. } => "EVENT_HANDLER_FAILED",
            Self::SubscriptionNotFound { .. } => "EVENT_SUBSCRIPTION_NOT_FOUND",
            Self::DeadLetterNotFound { .. } => "EVENT_DEAD_LETTER_NOT_FOUND",
            Self::QueueClosed => "EVENT_QUEUE_CLOSED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::HandlerFailed { .. })
    }
}

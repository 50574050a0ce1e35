//! System layer errors.

use tickflow_types::ErrorCode;

/// Errors a system or state store can raise.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `ExecutionFailed` | `SYSTEM_EXECUTION_FAILED` | Yes |
/// | `Cancelled` | `SYSTEM_CANCELLED` | No |
/// | `StoreFailure` | `SYSTEM_STORE_FAILURE` | Yes |
/// | `EntityNotFound` | `SYSTEM_ENTITY_NOT_FOUND` | No |
/// | `InvalidDefinition` | `SYSTEM_INVALID_DEFINITION` | No |
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// The system's own logic failed.
    #[error("execution failed: {reason}")]
    ExecutionFailed {
        /// What went wrong.
        reason: String,
    },

    /// The controller cancelled the invocation.
    #[error("execution cancelled")]
    Cancelled,

    /// The state store could not snapshot or apply.
    #[error("state store failure: {reason}")]
    StoreFailure {
        /// The store's error message.
        reason: String,
    },

    /// A Tier-1 invocation referenced an entity the snapshot lacks.
    #[error("entity not found: {id}")]
    EntityNotFound {
        /// The missing entity id.
        id: String,
    },

    /// The definition fails its own field constraints.
    #[error("invalid definition: {reason}")]
    InvalidDefinition {
        /// Which constraint failed.
        reason: String,
    },
}

impl SystemError {
    /// Convenience constructor for execution failures.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for store failures.
    #[must_use]
    pub fn store(reason: impl Into<String>) -> Self {
        Self::StoreFailure {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for SystemError {
    fn code(&self) -> &'static str {
        match self {
            Self::ExecutionFailed { .. } => "SYSTEM_EXECUTION_FAILED",
            Self::Cancelled => "SYSTEM_CANCELLED",
            Self::StoreFailure { .. } => "SYSTEM_STORE_FAILURE",
            Self::EntityNotFound { .. } => "SYSTEM_ENTITY_NOT_FOUND",
            Self::InvalidDefinition { .. } => "SYSTEM_INVALID_DEFINITION",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed { .. } | Self::StoreFailure { .. }
        )
    }
}

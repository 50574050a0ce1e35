//! Per-invocation execution context.

use crate::state::{EntityContext, StateSnapshot};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tickflow_types::{ExecutionId, TickId};
use tokio_util::sync::CancellationToken;

/// Everything a system receives for one invocation.
///
/// Immutable for the duration of the call. Tier-1 systems get one
/// context per entity (with `entity` set); Tier-2/3 systems get one
/// per tick (with `entity` unset). The cancellation token is a child
/// of the controller's timer: when the timeout fires or the tick is
/// cancelled, the token trips and the system should return early.
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResult, SystemError> {
///     for chunk in work {
///         if ctx.is_cancelled() {
///             return Err(SystemError::Cancelled);
///         }
///         process(chunk, &ctx.snapshot);
///     }
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique id for this invocation.
    pub execution_id: ExecutionId,
    /// The tick this invocation belongs to.
    pub tick: TickId,
    /// When the invocation was dispatched.
    pub started_at: SystemTime,
    /// Immutable world snapshot for the tick.
    pub snapshot: Arc<StateSnapshot>,
    /// The entity scope, for Tier-1 invocations.
    pub entity: Option<EntityContext>,
    /// Wall-clock budget for this invocation.
    pub timeout: Duration,
    /// Retries remaining if this invocation fails recoverably.
    pub retry_budget: u32,
    /// Trips when the controller times out or cancels the tick.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Creates a context for a tick-scoped (Tier-2/3) invocation.
    #[must_use]
    pub fn new(
        tick: TickId,
        snapshot: Arc<StateSnapshot>,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            tick,
            started_at: SystemTime::now(),
            snapshot,
            entity: None,
            timeout,
            retry_budget: 0,
            cancellation,
        }
    }

    /// Scopes the context to one entity for a Tier-1 invocation.
    #[must_use]
    pub fn for_entity(mut self, entity: EntityContext) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Returns `true` once the controller has cancelled this
    /// invocation. Long-running systems should poll this between
    /// units of work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tickflow_types::EntityId;

    fn snapshot() -> Arc<StateSnapshot> {
        Arc::new(StateSnapshot::new(TickId(1), json!({}), Vec::new()))
    }

    #[test]
    fn tick_scoped_context() {
        let ctx = ExecutionContext::new(
            TickId(1),
            snapshot(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        assert!(ctx.entity.is_none());
        assert_eq!(ctx.retry_budget, 0);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn entity_scoped_context() {
        let entity = EntityContext::new(EntityId::new(), "rome", 1000, 50.0);
        let ctx = ExecutionContext::new(
            TickId(1),
            snapshot(),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .for_entity(entity.clone());
        assert_eq!(ctx.entity.unwrap().id, entity.id);
    }

    #[test]
    fn cancellation_observed() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new(
            TickId(1),
            snapshot(),
            Duration::from_secs(5),
            token.child_token(),
        );
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn execution_ids_unique_per_context() {
        let a = ExecutionContext::new(
            TickId(1),
            snapshot(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let b = ExecutionContext::new(
            TickId(1),
            snapshot(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        assert_ne!(a.execution_id, b.execution_id);
    }
}

//! The system plugin contract.

use crate::context::ExecutionContext;
use crate::definition::SystemDefinition;
use crate::error::SystemError;
use crate::result::ExecutionResult;
use async_trait::async_trait;

/// A unit of simulation logic driven by the orchestrator.
///
/// Implementations are registered once and invoked per tick
/// according to their definition's tier and cadence. Invocations
/// must be read-only against the snapshot; all mutation goes through
/// the returned delta.
///
/// # Contract
///
/// - `execute` must respect `ctx.timeout` and poll
///   `ctx.is_cancelled()` between units of work.
/// - Returning `Err` and returning `Ok` with `success: false` are
///   equivalent for tick accounting; prefer `Err` for infrastructure
///   failures and an unsuccessful result for domain-level ones.
///
/// # Example
///
/// ```ignore
/// struct PopulationGrowth {
///     definition: SystemDefinition,
/// }
///
/// #[async_trait]
/// impl System for PopulationGrowth {
///     fn definition(&self) -> &SystemDefinition {
///         &self.definition
///     }
///
///     async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResult, SystemError> {
///         let entity = ctx.entity.as_ref().ok_or_else(|| {
///             SystemError::execution("tier-1 system invoked without entity scope")
///         })?;
///         let growth = (entity.population as f64 * 0.02) as u64;
///         let delta = StateDelta::new().with("population", json!(entity.population + growth));
///         Ok(ExecutionResult::success(delta, ctx.started_at.elapsed().unwrap_or_default()))
///     }
/// }
/// ```
#[async_trait]
pub trait System: Send + Sync {
    /// The static registration contract.
    fn definition(&self) -> &SystemDefinition;

    /// Runs one invocation against the snapshot in `ctx`.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResult, SystemError>;
}

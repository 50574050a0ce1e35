//! Per-tick outcome reporting.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickflow_types::{EntityId, SystemId, TickId};

/// One failed system invocation.
///
/// Entity-scoped failures carry the entity id; tick-scoped failures
/// don't. Failures are collected, never thrown into the tick loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemFailure {
    /// The system that failed.
    pub system: SystemId,
    /// The entity scope, for Tier-1 invocations.
    pub entity: Option<EntityId>,
    /// Stable error code of the underlying error.
    pub code: String,
    /// Human-readable failure message.
    pub message: String,
    /// Whether a retry on a later tick could succeed.
    pub recoverable: bool,
}

/// Wall-clock time spent in each phase of one tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    /// Snapshot, validation and wave planning.
    pub planning: Duration,
    /// Parallel per-entity fan-out.
    pub tier1: Duration,
    /// Sequential cross-entity execution.
    pub tier2: Duration,
    /// Sequential global execution.
    pub tier3: Duration,
    /// Delta merge, persist, publish, invalidate.
    pub finalization: Duration,
    /// Whole tick.
    pub total: Duration,
}

/// The outcome of one tick.
///
/// `success` is `true` only when no invocation failed. A partially
/// failed tick still merges and persists the successful deltas; the
/// failures are listed here rather than aborting the tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    /// The tick this result describes.
    pub tick: TickId,
    /// `true` when `failures` is empty.
    pub success: bool,
    /// Systems that ran at least once this tick.
    pub executed: Vec<SystemId>,
    /// Systems skipped because their cadence was not due.
    pub skipped: Vec<SystemId>,
    /// Every failed invocation.
    pub failures: Vec<SystemFailure>,
    /// Validation warnings surfaced during planning.
    pub warnings: Vec<String>,
    /// Events published during finalization.
    pub events_published: usize,
    /// Per-phase timing.
    pub timings: PhaseTimings,
}

impl TickResult {
    /// Failures for one system, across all entities.
    #[must_use]
    pub fn failures_for(&self, system: &SystemId) -> Vec<&SystemFailure> {
        self.failures.iter().filter(|f| &f.system == system).collect()
    }
}

//! System definitions: the static contract a system registers with.
//!
//! A [`SystemDefinition`] is everything the registry and orchestrator
//! need to schedule a system: its tier, dependencies, priority,
//! cadence and time budget. Definitions are immutable once
//! registered.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickflow_types::{ExecutionGroup, Priority, SystemId, Tier, TickId};

/// How often a system runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TickFrequency {
    /// Runs on every tick.
    EveryTick,
    /// Runs on ticks where `tick % n == 0`. `Every(1)` is equivalent
    /// to `EveryTick`.
    Every(u64),
}

impl TickFrequency {
    /// Returns `true` if a system with this cadence runs on `tick`.
    #[must_use]
    pub fn is_due(self, tick: TickId) -> bool {
        match self {
            Self::EveryTick => true,
            Self::Every(n) => n <= 1 || tick.value() % n == 0,
        }
    }
}

impl Default for TickFrequency {
    fn default() -> Self {
        Self::EveryTick
    }
}

/// Registration contract for one system.
///
/// Built with [`SystemDefinition::new`] plus builder methods; the
/// registry validates it at registration (tier/group consistency,
/// self-dependency, dependency count).
///
/// # Example
///
/// ```
/// use tickflow_system::SystemDefinition;
/// use tickflow_types::{Priority, SystemId, Tier};
///
/// let def = SystemDefinition::new("economy", Tier::CrossEntity)
///     .with_dependency(SystemId::named("population"))
///     .with_priority(Priority::High);
///
/// assert_eq!(def.id.name(), "economy");
/// assert_eq!(def.dependencies.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDefinition {
    /// Stable id derived from the registration name.
    pub id: SystemId,
    /// The tick phase this system executes in.
    pub tier: Tier,
    /// How the system is dispatched. Must equal
    /// `tier.execution_group()`; the registry rejects mismatches.
    pub execution_group: ExecutionGroup,
    /// Systems that must complete earlier in the same tick.
    pub dependencies: Vec<SystemId>,
    /// Scheduling priority within a wave.
    pub priority: Priority,
    /// Execution cadence.
    pub frequency: TickFrequency,
    /// Per-invocation wall-clock budget.
    pub timeout: Duration,
    /// Expected execution time, used for load estimation.
    pub estimated_execution: Duration,
    /// Depth ceiling this system tolerates in the dependency graph.
    pub max_dependency_depth: usize,
    /// Placed in the final wave of its tier, after every unflagged
    /// system, without naming them as dependencies.
    pub runs_last_in_tier: bool,
}

impl SystemDefinition {
    /// Default per-invocation timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default dependency-depth ceiling.
    pub const DEFAULT_MAX_DEPTH: usize = 10;

    /// Creates a definition with defaults: no dependencies, medium
    /// priority, every tick, 5s timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: SystemId::named(name),
            tier,
            execution_group: tier.execution_group(),
            dependencies: Vec::new(),
            priority: Priority::Medium,
            frequency: TickFrequency::EveryTick,
            timeout: Self::DEFAULT_TIMEOUT,
            estimated_execution: Duration::from_millis(100),
            max_dependency_depth: Self::DEFAULT_MAX_DEPTH,
            runs_last_in_tier: false,
        }
    }

    /// Adds a dependency on another system.
    #[must_use]
    pub fn with_dependency(mut self, dep: SystemId) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the execution cadence.
    #[must_use]
    pub fn with_frequency(mut self, frequency: TickFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the expected execution time.
    #[must_use]
    pub fn with_estimated_execution(mut self, estimate: Duration) -> Self {
        self.estimated_execution = estimate;
        self
    }

    /// Flags the system to run in the final wave of its tier.
    #[must_use]
    pub fn runs_last(mut self) -> Self {
        self.runs_last_in_tier = true;
        self
    }

    /// Returns `true` if the declared group matches the tier's
    /// mandated group.
    #[must_use]
    pub fn group_consistent(&self) -> bool {
        self.execution_group == self.tier.execution_group()
    }

    /// Returns `true` if the system depends on itself.
    #[must_use]
    pub fn self_dependent(&self) -> bool {
        self.dependencies.contains(&self.id)
    }
}

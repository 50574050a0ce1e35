//! Execution tiers and their execution groups.
//!
//! Every tick runs three phases in fixed order:
//!
//! ```text
//! Tier 1 (per-entity)   — fan out: (system × entity), parallel
//! Tier 2 (cross-entity) — sequential, dependency order
//! Tier 3 (global)       — sequential, dependency order
//! ```
//!
//! # Invariant
//!
//! The tier strictly determines the execution group. A
//! `SystemDefinition` declaring a mismatching pair is rejected at
//! registration, so downstream code may rely on
//! `tier.execution_group()` without re-checking.

use serde::{Deserialize, Serialize};

/// One of the three tick phases a system executes in.
///
/// # Example
///
/// ```
/// use tickflow_types::{ExecutionGroup, Tier};
///
/// assert_eq!(Tier::PerEntity.number(), 1);
/// assert_eq!(Tier::Global.execution_group(), ExecutionGroup::Global);
/// assert!(Tier::CrossEntity.runs_after(Tier::PerEntity));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Tier 1: runs once per (system, entity) pair, concurrently.
    PerEntity,
    /// Tier 2: runs once per system, sequentially, after Tier 1.
    CrossEntity,
    /// Tier 3: runs once per system, sequentially, after Tier 2.
    Global,
}

impl Tier {
    /// Returns the 1-based tier number.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::PerEntity => 1,
            Self::CrossEntity => 2,
            Self::Global => 3,
        }
    }

    /// Returns the tier for a 1-based number, if valid.
    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::PerEntity),
            2 => Some(Self::CrossEntity),
            3 => Some(Self::Global),
            _ => None,
        }
    }

    /// Returns the execution group this tier mandates.
    #[must_use]
    pub fn execution_group(self) -> ExecutionGroup {
        match self {
            Self::PerEntity => ExecutionGroup::PerEntity,
            Self::CrossEntity => ExecutionGroup::CrossEntity,
            Self::Global => ExecutionGroup::Global,
        }
    }

    /// Returns `true` if this tier executes after `other` in the tick.
    #[must_use]
    pub fn runs_after(self, other: Tier) -> bool {
        self.number() > other.number()
    }

    /// All tiers in execution order.
    #[must_use]
    pub fn all() -> [Tier; 3] {
        [Self::PerEntity, Self::CrossEntity, Self::Global]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier-{}", self.number())
    }
}

/// How systems in a tier are dispatched.
///
/// Kept as a separate declared field on `SystemDefinition` (with the
/// tier→group invariant enforced at registration) so definitions
/// serialized by external tooling stay self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionGroup {
    /// One invocation per active entity, run concurrently.
    PerEntity,
    /// One invocation spanning all entities, run sequentially.
    CrossEntity,
    /// One invocation for the whole world, run sequentially.
    Global,
}

impl std::fmt::Display for ExecutionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PerEntity => "per-entity",
            Self::CrossEntity => "cross-entity",
            Self::Global => "global",
        };
        write!(f, "{}", name)
    }
}

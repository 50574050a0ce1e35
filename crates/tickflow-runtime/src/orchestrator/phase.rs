//! The tick phase state machine.

use serde::{Deserialize, Serialize};
use tickflow_types::Tier;

/// Phases of one tick, in order. No phase is skipped and a tick
/// never re-enters an earlier phase.
///
/// ```text
/// planning → tier1 → tier2 → tier3 → finalization → completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TickPhase {
    /// Snapshot taken, graph validated, waves planned.
    Planning,
    /// Per-entity systems fan out in parallel.
    Tier1,
    /// Cross-entity systems run sequentially in dependency order.
    Tier2,
    /// Global systems run sequentially in dependency order.
    Tier3,
    /// Deltas merge, state persists, events publish, caches
    /// invalidate.
    Finalization,
    /// The tick is done; the orchestrator is idle.
    Completed,
}

impl TickPhase {
    /// The phase that follows this one. `Completed` is terminal and
    /// returns itself.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Planning => Self::Tier1,
            Self::Tier1 => Self::Tier2,
            Self::Tier2 => Self::Tier3,
            Self::Tier3 => Self::Finalization,
            Self::Finalization | Self::Completed => Self::Completed,
        }
    }

    /// The tier executing during this phase, if any.
    #[must_use]
    pub fn tier(self) -> Option<Tier> {
        match self {
            Self::Tier1 => Some(Tier::PerEntity),
            Self::Tier2 => Some(Tier::CrossEntity),
            Self::Tier3 => Some(Tier::Global),
            _ => None,
        }
    }
}

impl std::fmt::Display for TickPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Finalization => "finalization",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = TickPhase::Planning;
        let expected = [
            TickPhase::Tier1,
            TickPhase::Tier2,
            TickPhase::Tier3,
            TickPhase::Finalization,
            TickPhase::Completed,
        ];
        for want in expected {
            phase = phase.next();
            assert_eq!(phase, want);
        }
        // terminal
        assert_eq!(phase.next(), TickPhase::Completed);
    }

    #[test]
    fn tier_phases_map_to_tiers() {
        assert_eq!(TickPhase::Tier1.tier(), Some(Tier::PerEntity));
        assert_eq!(TickPhase::Tier2.tier(), Some(Tier::CrossEntity));
        assert_eq!(TickPhase::Tier3.tier(), Some(Tier::Global));
        assert_eq!(TickPhase::Planning.tier(), None);
        assert_eq!(TickPhase::Completed.tier(), None);
    }
}

//! Priority levels shared by systems, inference requests and events.
//!
//! Priorities appear in three places with one meaning:
//!
//! | Where | Effect |
//! |-------|--------|
//! | `SystemDefinition` | Base weight for scheduler priority computation |
//! | Inference requests | Queue ordering and degradation de-prioritization |
//! | Events | Dispatch order within a delivery batch |

use serde::{Deserialize, Serialize};

/// Four-level priority ladder.
///
/// Ordered so that `Critical > High > Medium > Low`, which lets
/// priority be used directly as a sort key.
///
/// # Example
///
/// ```
/// use tickflow_types::Priority;
///
/// assert!(Priority::Critical > Priority::Low);
/// assert_eq!(Priority::High.weight(), 75);
/// assert_eq!(Priority::default(), Priority::Medium);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Deferrable work; first to be shed under degradation.
    Low,
    /// Normal work.
    #[default]
    Medium,
    /// Time-sensitive work.
    High,
    /// Must-run work; never de-prioritized.
    Critical,
}

impl Priority {
    /// Returns the numeric weight on the scheduler's 0–100 scale.
    #[must_use]
    pub fn weight(self) -> u8 {
        match self {
            Self::Low => 25,
            Self::Medium => 50,
            Self::High => 75,
            Self::Critical => 100,
        }
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn weights_monotonic() {
        let ws: Vec<u8> = [
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Critical,
        ]
        .iter()
        .map(|p| p.weight())
        .collect();
        assert!(ws.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ws.last(), Some(&100));
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let back: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, Priority::Low);
    }

    #[test]
    fn display() {
        assert_eq!(Priority::High.to_string(), "high");
    }
}

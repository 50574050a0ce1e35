//! World state model: snapshots, deltas and the store seam.
//!
//! Systems never mutate world state directly. Each tick the
//! orchestrator takes one immutable [`StateSnapshot`], hands it to
//! every system, collects [`StateDelta`]s from the successful ones,
//! merges them in completion order and applies the merged delta
//! through the [`StateStore`] during finalization.
//!
//! ```text
//! StateStore ──snapshot()──► StateSnapshot ──► systems (read only)
//!     ▲                                            │
//!     └───────── apply(merged delta) ◄── deltas ◄──┘
//! ```

use crate::SystemError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tickflow_types::{EntityId, TickId};

/// Per-entity context handed to Tier-1 systems.
///
/// The numeric fields double as the entity fingerprint in inference
/// cache keys, so two entities in materially different situations
/// never share a cached result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityContext {
    /// The entity this invocation is scoped to.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Current population.
    pub population: u64,
    /// Aggregate economic power.
    pub economic_power: f64,
    /// Remaining entity attributes.
    pub attributes: Value,
}

impl EntityContext {
    /// Creates a context with empty attributes.
    #[must_use]
    pub fn new(id: EntityId, name: impl Into<String>, population: u64, economic_power: f64) -> Self {
        Self {
            id,
            name: name.into(),
            population,
            economic_power,
            attributes: Value::Null,
        }
    }
}

/// Immutable read view of the world, taken once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The tick this snapshot was taken for.
    pub tick: TickId,
    /// World-level state.
    pub world: Value,
    /// Active entities, in the order Tier-1 fans out over them.
    pub entities: Vec<EntityContext>,
}

impl StateSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(tick: TickId, world: Value, entities: Vec<EntityContext>) -> Self {
        Self {
            tick,
            world,
            entities,
        }
    }

    /// Looks up an entity context by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntityContext> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// A set of state changes produced by one execution.
///
/// Deltas are JSON-merge patches: object values merge recursively,
/// everything else replaces. Later deltas win on conflicting keys,
/// so the orchestrator merges them in completion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// The patch, keyed by top-level state path.
    pub changes: Map<String, Value>,
}

impl StateDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one top-level change.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.changes.insert(key.into(), value);
        self
    }

    /// Returns `true` if the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Merges `other` into `self`. Object values merge recursively;
    /// scalars and arrays from `other` replace.
    pub fn merge(&mut self, other: StateDelta) {
        for (key, value) in other.changes {
            match (self.changes.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    merge_objects(existing, incoming);
                }
                (_, value) => {
                    self.changes.insert(key, value);
                }
            }
        }
    }
}

fn merge_objects(existing: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (existing.get_mut(&key), value) {
            (Some(Value::Object(e)), Value::Object(i)) => merge_objects(e, i),
            (_, value) => {
                existing.insert(key, value);
            }
        }
    }
}

/// Persistence seam between the orchestrator and world state.
///
/// Implementations own entity enumeration and durable storage; the
/// orchestrator only snapshots and applies.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Takes an immutable snapshot of the world for the given tick.
    async fn snapshot(&self, tick: TickId) -> Result<StateSnapshot, SystemError>;

    /// Applies a merged delta produced by a completed tick.
    async fn apply(&self, tick: TickId, delta: &StateDelta) -> Result<(), SystemError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_merge_scalar_replaces() {
        let mut a = StateDelta::new().with("gold", json!(10));
        a.merge(StateDelta::new().with("gold", json!(25)));
        assert_eq!(a.changes["gold"], json!(25));
    }

    #[test]
    fn delta_merge_objects_recursively() {
        let mut a = StateDelta::new().with("economy", json!({"gold": 10, "trade": {"open": true}}));
        a.merge(StateDelta::new().with("economy", json!({"trade": {"routes": 3}})));
        assert_eq!(
            a.changes["economy"],
            json!({"gold": 10, "trade": {"open": true, "routes": 3}})
        );
    }

    #[test]
    fn delta_merge_disjoint_keys() {
        let mut a = StateDelta::new().with("gold", json!(1));
        a.merge(StateDelta::new().with("food", json!(2)));
        assert_eq!(a.changes.len(), 2);
    }

    #[test]
    fn delta_merge_array_replaces() {
        let mut a = StateDelta::new().with("routes", json!([1, 2]));
        a.merge(StateDelta::new().with("routes", json!([3])));
        assert_eq!(a.changes["routes"], json!([3]));
    }

    #[test]
    fn empty_delta() {
        let mut a = StateDelta::new();
        assert!(a.is_empty());
        a.merge(StateDelta::new());
        assert!(a.is_empty());
    }

    #[test]
    fn snapshot_entity_lookup() {
        let e1 = EntityContext::new(EntityId::new(), "rome", 1000, 50.0);
        let e2 = EntityContext::new(EntityId::new(), "carthage", 800, 45.0);
        let id1 = e1.id;
        let snap = StateSnapshot::new(TickId(1), json!({}), vec![e1, e2]);
        assert_eq!(snap.entity(id1).unwrap().name, "rome");
        assert!(snap.entity(EntityId::new()).is_none());
    }
}

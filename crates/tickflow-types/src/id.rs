//! Identifier types for Tickflow.
//!
//! All identifiers are UUID-based for persistence and network
//! compatibility, except [`TickId`] which is a monotonic sequence
//! number owned by the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

/// Tickflow namespace UUID for deterministic UUID v5 generation.
///
/// Used as the namespace when deriving stable UUIDs for named
/// systems and task templates via UUID v5 (SHA-1 based).
const TICKFLOW_NAMESPACE: Uuid = uuid!("7c1f4e92-30ab-4d5e-9f3c-8a62d14be0a7");

/// Identifier for a simulation system.
///
/// A system is an independently-owned unit of simulation logic
/// (population, economy, military, ...) driven by the orchestrator
/// once per tick. Systems are registered under a stable name, so
/// the UUID is derived deterministically:
///
/// - Same name always produces the same UUID
/// - UUIDs are consistent across processes and machines
/// - Dependency lists can be compared structurally
///
/// # Example
///
/// ```
/// use tickflow_types::SystemId;
///
/// let a = SystemId::named("population");
/// let b = SystemId::named("population");
/// let c = SystemId::named("economy");
///
/// assert_eq!(a, b);          // Same name = same id
/// assert_ne!(a, c);
/// assert_eq!(a.name(), "population");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemId {
    /// Deterministic identifier derived from the name.
    pub uuid: Uuid,
    /// Registration name, unique across the registry.
    name: String,
}

impl SystemId {
    /// Creates a system id from its registration name.
    ///
    /// The UUID is derived via UUID v5 from the Tickflow namespace,
    /// so the mapping `name -> id` is stable everywhere.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uuid: Uuid::new_v5(&TICKFLOW_NAMESPACE, name.as_bytes()),
            name,
        }
    }

    /// Returns the registration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sys:{}", self.name)
    }
}

/// Identifier for a simulated entity.
///
/// An entity is the unit Tier-1 systems execute once for each tick
/// (e.g., a civilization). Entities are owned by the state store;
/// the orchestrator only enumerates them.
///
/// # Example
///
/// ```
/// use tickflow_types::EntityId;
///
/// let e1 = EntityId::new();
/// let e2 = EntityId::new();
/// assert_ne!(e1, e2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new [`EntityId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Identifier for an inference task template.
///
/// Task templates are registered under a stable name, so like
/// [`SystemId`] the UUID is derived deterministically (v5).
///
/// # Example
///
/// ```
/// use tickflow_types::TaskId;
///
/// let t1 = TaskId::named("population-growth");
/// let t2 = TaskId::named("population-growth");
/// assert_eq!(t1, t2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    /// Deterministic identifier derived from the name.
    pub uuid: Uuid,
    /// Template name, unique across the engine's registry.
    name: String,
}

impl TaskId {
    /// Creates a task id from its template name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uuid: Uuid::new_v5(&TICKFLOW_NAMESPACE, format!("task:{}", name).as_bytes()),
            name,
        }
    }

    /// Returns the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task:{}", self.name)
    }
}

/// Monotonic tick sequence number.
///
/// Assigned by the orchestrator when a tick begins. Unlike the other
/// ids this is not a UUID: ticks are strictly ordered and the number
/// doubles as the cache-epoch component of inference cache keys.
///
/// # Example
///
/// ```
/// use tickflow_types::TickId;
///
/// let t = TickId(41).next();
/// assert_eq!(t, TickId(42));
/// assert_eq!(t.to_string(), "tick:42");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TickId(pub u64);

impl TickId {
    /// Returns the next tick in sequence.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

/// Identifier for one system invocation.
///
/// Created per (system, entity) pair per tick, carried in the
/// execution context and every failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

#[allow(clippy::new_without_default)] // ids are minted by the controller, not defaulted
impl ExecutionId {
    /// Creates a new [`ExecutionId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec:{}", self.0)
    }
}

/// Identifier for a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new [`EventId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

/// Identifier for an event-bus subscription.
///
/// Minted when a system subscribes; used to address retries,
/// dead letters and unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

#[allow(clippy::new_without_default)] // minted by EventBus::subscribe only
impl SubscriptionId {
    /// Creates a new [`SubscriptionId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_id_deterministic() {
        let a = SystemId::named("economy");
        let b = SystemId::named("economy");
        assert_eq!(a, b);
        assert_eq!(a.uuid, b.uuid);
    }

    #[test]
    fn system_id_distinct_names() {
        assert_ne!(SystemId::named("economy"), SystemId::named("military"));
    }

    #[test]
    fn task_id_namespaced_apart_from_system_id() {
        // A task and a system sharing a name must not collide.
        let task = TaskId::named("economy");
        let system = SystemId::named("economy");
        assert_ne!(task.uuid, system.uuid);
    }

    #[test]
    fn tick_id_ordering() {
        assert!(TickId(1) < TickId(2));
        assert_eq!(TickId(7).next(), TickId(8));
        assert_eq!(TickId::default(), TickId(0));
    }

    #[test]
    fn random_ids_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
        assert_ne!(ExecutionId::new(), ExecutionId::new());
        assert_ne!(EventId::new(), EventId::new());
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[test]
    fn display_formats() {
        let sys = SystemId::named("trade");
        assert_eq!(sys.to_string(), "sys:trade");
        assert_eq!(TickId(3).to_string(), "tick:3");
        assert!(EntityId::new().to_string().starts_with("entity:"));
        assert!(SubscriptionId::new().to_string().starts_with("sub:"));
    }

    #[test]
    fn serde_round_trip() {
        let sys = SystemId::named("science");
        let json = serde_json::to_string(&sys).unwrap();
        let back: SystemId = serde_json::from_str(&json).unwrap();
        assert_eq!(sys, back);

        let tick = TickId(12);
        let json = serde_json::to_string(&tick).unwrap();
        let back: TickId = serde_json::from_str(&json).unwrap();
        assert_eq!(tick, back);
    }
}

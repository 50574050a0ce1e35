//! System registry and dependency graph.
//!
//! The [`DependencyRegistry`] owns every registered
//! [`SystemDefinition`] and derives the execution plan from it:
//!
//! - [`execution_order`](DependencyRegistry::execution_order) — a
//!   full topological order (DFS with cycle detection)
//! - [`tiered_parallel_groups`](DependencyRegistry::tiered_parallel_groups)
//!   — per-tier wave partition for parallel dispatch
//! - [`validate`](DependencyRegistry::validate) — a
//!   [`ValidationReport`] of errors, warnings and info findings
//!
//! # Registration Rules
//!
//! | Check | Outcome |
//! |-------|---------|
//! | empty name | error |
//! | duplicate registration | error |
//! | tier / execution-group mismatch | error |
//! | self-dependency | error |
//! | more than 8 dependencies | warning (logged, reported) |
//! | dependency on a higher tier | warning (logged, reported) |
//!
//! Dependencies on a *lower* tier are legal and carry no ordering
//! burden: tier phasing already guarantees them.

mod graph;
mod validation;

pub use graph::GraphNode;
pub use validation::{ValidationIssue, ValidationReport};

use std::collections::HashMap;
use tickflow_system::SystemDefinition;
use tickflow_types::{ErrorCode, SystemId, Tier};
use tracing::{debug, warn};

/// Dependency count above which registration logs a warning.
pub const MAX_RECOMMENDED_DEPENDENCIES: usize = 8;

/// Errors raised by registration and plan derivation.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `EmptyName` | `GRAPH_EMPTY_NAME` | No |
/// | `AlreadyRegistered` | `GRAPH_ALREADY_REGISTERED` | No |
/// | `NotRegistered` | `GRAPH_NOT_REGISTERED` | No |
/// | `TierMismatch` | `GRAPH_TIER_MISMATCH` | No |
/// | `SelfDependency` | `GRAPH_SELF_DEPENDENCY` | No |
/// | `HasDependents` | `GRAPH_HAS_DEPENDENTS` | No |
/// | `MissingDependency` | `GRAPH_MISSING_DEPENDENCY` | No |
/// | `CycleDetected` | `GRAPH_CYCLE` | No |
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The definition's name is empty.
    #[error("system name must not be empty")]
    EmptyName,

    /// A system with this id is already registered.
    #[error("system already registered: {id}")]
    AlreadyRegistered {
        /// The duplicate id.
        id: String,
    },

    /// No system with this id is registered.
    #[error("system not registered: {id}")]
    NotRegistered {
        /// The unknown id.
        id: String,
    },

    /// The declared execution group does not match the tier.
    #[error("system {id}: execution group {group} does not match {tier}")]
    TierMismatch {
        /// The offending system.
        id: String,
        /// The declared group.
        group: String,
        /// The declared tier.
        tier: String,
    },

    /// The system lists itself as a dependency.
    #[error("system {id} depends on itself")]
    SelfDependency {
        /// The offending system.
        id: String,
    },

    /// Unregistration was refused because dependents remain.
    #[error("system {id} still has dependents: {dependents}")]
    HasDependents {
        /// The system being removed.
        id: String,
        /// Names of the remaining dependents.
        dependents: String,
    },

    /// An ordering pass hit a dependency that is not registered.
    #[error("system {id} depends on unregistered system {dependency}")]
    MissingDependency {
        /// The depending system.
        id: String,
        /// The missing target.
        dependency: String,
    },

    /// The graph contains a dependency cycle.
    #[error("dependency cycle: {path}")]
    CycleDetected {
        /// The cycle as `a -> b -> ... -> a`.
        path: String,
    },
}

impl ErrorCode for GraphError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyName => "GRAPH_EMPTY_NAME",
            Self::AlreadyRegistered { .. } => "GRAPH_ALREADY_REGISTERED",
            Self::NotRegistered { .. } => "GRAPH_NOT_REGISTERED",
            Self::TierMismatch { .. } => "GRAPH_TIER_MISMATCH",
            Self::SelfDependency { .. } => "GRAPH_SELF_DEPENDENCY",
            Self::HasDependents { .. } => "GRAPH_HAS_DEPENDENTS",
            Self::MissingDependency { .. } => "GRAPH_MISSING_DEPENDENCY",
            Self::CycleDetected { .. } => "GRAPH_CYCLE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Owns the registered system definitions and their dependency
/// graph.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    nodes: HashMap<SystemId, GraphNode>,
}

impl DependencyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system definition.
    ///
    /// Rejects duplicates, tier/group mismatches and
    /// self-dependencies. Dependencies may reference systems not yet
    /// registered; [`validate`](Self::validate) reports targets still
    /// missing at plan time.
    pub fn register(&mut self, definition: SystemDefinition) -> Result<(), GraphError> {
        if definition.id.name().is_empty() {
            return Err(GraphError::EmptyName);
        }
        if self.nodes.contains_key(&definition.id) {
            return Err(GraphError::AlreadyRegistered {
                id: definition.id.to_string(),
            });
        }
        if !definition.group_consistent() {
            return Err(GraphError::TierMismatch {
                id: definition.id.to_string(),
                group: definition.execution_group.to_string(),
                tier: definition.tier.to_string(),
            });
        }
        if definition.self_dependent() {
            return Err(GraphError::SelfDependency {
                id: definition.id.to_string(),
            });
        }

        if definition.dependencies.len() > MAX_RECOMMENDED_DEPENDENCIES {
            warn!(
                system = %definition.id,
                count = definition.dependencies.len(),
                "system declares an unusually large dependency list"
            );
        }
        for dep in &definition.dependencies {
            if let Some(dep_node) = self.nodes.get(dep) {
                if dep_node.definition.tier.runs_after(definition.tier) {
                    warn!(
                        system = %definition.id,
                        dependency = %dep,
                        "dependency on a higher tier cannot be satisfied within a tick"
                    );
                }
            }
        }

        let id = definition.id.clone();
        for dep in definition.dependencies.clone() {
            if let Some(node) = self.nodes.get_mut(&dep) {
                node.dependents.push(id.clone());
            }
        }
        // dependents registered later link back here
        let mut dependents = Vec::new();
        for (other_id, node) in &self.nodes {
            if node.definition.dependencies.contains(&id) {
                dependents.push(other_id.clone());
            }
        }

        debug!(system = %id, tier = %definition.tier, "system registered");
        self.nodes.insert(
            id,
            GraphNode {
                definition,
                dependents,
                depth: 0,
            },
        );
        Ok(())
    }

    /// Removes a system. Fails while other systems depend on it.
    pub fn unregister(&mut self, id: &SystemId) -> Result<SystemDefinition, GraphError> {
        let node = self.nodes.get(id).ok_or_else(|| GraphError::NotRegistered {
            id: id.to_string(),
        })?;

        let dependents: Vec<&str> = node
            .dependents
            .iter()
            .filter(|d| self.nodes.contains_key(*d))
            .map(|d| d.name())
            .collect();
        if !dependents.is_empty() {
            return Err(GraphError::HasDependents {
                id: id.to_string(),
                dependents: dependents.join(", "),
            });
        }

        let node = self.nodes.remove(id).expect("checked above");
        for other in self.nodes.values_mut() {
            other.dependents.retain(|d| d != id);
        }
        debug!(system = %id, "system unregistered");
        Ok(node.definition)
    }

    /// Looks up a registered definition.
    #[must_use]
    pub fn get(&self, id: &SystemId) -> Option<&SystemDefinition> {
        self.nodes.get(id).map(|n| &n.definition)
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no systems are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All registered definitions, unordered.
    pub fn definitions(&self) -> impl Iterator<Item = &SystemDefinition> {
        self.nodes.values().map(|n| &n.definition)
    }

    /// Full topological execution order across all tiers.
    ///
    /// Deterministic: ties break by tier, then descending priority,
    /// then name. Fails on cycles (naming the offending path) and on
    /// dependencies whose target is not registered.
    pub fn execution_order(&self) -> Result<Vec<SystemId>, GraphError> {
        graph::execution_order(&self.nodes)
    }

    /// Wave partition for one tier.
    ///
    /// Systems in the same wave have no same-tier dependencies on
    /// each other and may run concurrently. Systems flagged
    /// `runs_last_in_tier` form the final wave.
    pub fn tiered_parallel_groups(&self, tier: Tier) -> Result<Vec<Vec<SystemId>>, GraphError> {
        graph::tier_waves(&self.nodes, tier)
    }

    /// Validates the whole graph, memoizing node depths.
    pub fn validate(&mut self) -> ValidationReport {
        validation::validate(&mut self.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_types::{assert_error_codes, ExecutionGroup, Priority};

    fn def(name: &str, tier: Tier) -> SystemDefinition {
        SystemDefinition::new(name, tier)
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = DependencyRegistry::new();
        reg.register(def("population", Tier::PerEntity)).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&SystemId::named("population")).is_some());
        assert!(reg.get(&SystemId::named("missing")).is_none());
    }

    #[test]
    fn duplicate_rejected() {
        let mut reg = DependencyRegistry::new();
        reg.register(def("economy", Tier::CrossEntity)).unwrap();
        let err = reg.register(def("economy", Tier::CrossEntity)).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyRegistered { .. }));
    }

    #[test]
    fn tier_mismatch_rejected() {
        let mut reg = DependencyRegistry::new();
        let mut bad = def("economy", Tier::CrossEntity);
        bad.execution_group = ExecutionGroup::Global;
        let err = reg.register(bad).unwrap_err();
        assert!(matches!(err, GraphError::TierMismatch { .. }));
    }

    #[test]
    fn self_dependency_rejected() {
        let mut reg = DependencyRegistry::new();
        let bad = def("economy", Tier::CrossEntity).with_dependency(SystemId::named("economy"));
        let err = reg.register(bad).unwrap_err();
        assert!(matches!(err, GraphError::SelfDependency { .. }));
    }

    #[test]
    fn unregister_refused_while_dependents_remain() {
        let mut reg = DependencyRegistry::new();
        reg.register(def("economy", Tier::CrossEntity)).unwrap();
        reg.register(
            def("trade", Tier::CrossEntity).with_dependency(SystemId::named("economy")),
        )
        .unwrap();

        let err = reg.unregister(&SystemId::named("economy")).unwrap_err();
        assert!(matches!(err, GraphError::HasDependents { .. }));

        reg.unregister(&SystemId::named("trade")).unwrap();
        reg.unregister(&SystemId::named("economy")).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn dependents_linked_regardless_of_registration_order() {
        let mut reg = DependencyRegistry::new();
        // dependent first, dependency second
        reg.register(
            def("trade", Tier::CrossEntity).with_dependency(SystemId::named("economy")),
        )
        .unwrap();
        reg.register(def("economy", Tier::CrossEntity)).unwrap();

        let err = reg.unregister(&SystemId::named("economy")).unwrap_err();
        assert!(matches!(err, GraphError::HasDependents { .. }));
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let mut reg = DependencyRegistry::new();
        reg.register(
            def("trade", Tier::CrossEntity).with_dependency(SystemId::named("economy")),
        )
        .unwrap();
        reg.register(def("economy", Tier::CrossEntity)).unwrap();
        reg.register(def("population", Tier::PerEntity)).unwrap();

        let order = reg.execution_order().unwrap();
        let pos = |name: &str| {
            order
                .iter()
                .position(|s| s.name() == name)
                .unwrap_or_else(|| panic!("{name} missing from order"))
        };
        assert!(pos("economy") < pos("trade"));
        assert!(pos("population") < pos("economy"));
    }

    #[test]
    fn cycle_error_names_path() {
        let mut reg = DependencyRegistry::new();
        reg.register(def("a", Tier::CrossEntity).with_dependency(SystemId::named("b")))
            .unwrap();
        reg.register(def("b", Tier::CrossEntity).with_dependency(SystemId::named("c")))
            .unwrap();
        reg.register(def("c", Tier::CrossEntity).with_dependency(SystemId::named("a")))
            .unwrap();

        let err = reg.execution_order().unwrap_err();
        match err {
            GraphError::CycleDetected { path } => {
                assert!(path.contains("a"), "path was: {path}");
                assert!(path.contains("->"), "path was: {path}");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_fails_ordering() {
        let mut reg = DependencyRegistry::new();
        reg.register(
            def("trade", Tier::CrossEntity).with_dependency(SystemId::named("ghost")),
        )
        .unwrap();
        let err = reg.execution_order().unwrap_err();
        assert!(matches!(err, GraphError::MissingDependency { .. }));
    }

    #[test]
    fn priority_breaks_ties() {
        let mut reg = DependencyRegistry::new();
        reg.register(def("low", Tier::CrossEntity).with_priority(Priority::Low))
            .unwrap();
        reg.register(def("high", Tier::CrossEntity).with_priority(Priority::High))
            .unwrap();

        let order = reg.execution_order().unwrap();
        assert_eq!(order[0].name(), "high");
        assert_eq!(order[1].name(), "low");
    }

    #[test]
    fn error_codes_follow_convention() {
        let variants = vec![
            GraphError::EmptyName,
            GraphError::AlreadyRegistered { id: "x".into() },
            GraphError::NotRegistered { id: "x".into() },
            GraphError::TierMismatch {
                id: "x".into(),
                group: "global".into(),
                tier: "tier-2".into(),
            },
            GraphError::SelfDependency { id: "x".into() },
            GraphError::HasDependents {
                id: "x".into(),
                dependents: "y".into(),
            },
            GraphError::MissingDependency {
                id: "x".into(),
                dependency: "y".into(),
            },
            GraphError::CycleDetected { path: "a -> a".into() },
        ];
        assert_error_codes(&variants, "GRAPH_");
    }
}

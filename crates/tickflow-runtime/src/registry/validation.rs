//! Whole-graph validation.
//!
//! Run before each tick's planning phase. Errors make the tick
//! refuse to start; warnings and info are carried into the tick
//! result for operators.

use super::{GraphError, GraphNode, MAX_RECOMMENDED_DEPENDENCIES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tickflow_types::SystemId;

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// The system the finding concerns, if any.
    pub system: Option<SystemId>,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn on(system: &SystemId, message: impl Into<String>) -> Self {
        Self {
            system: Some(system.clone()),
            message: message.into(),
        }
    }

    fn global(message: impl Into<String>) -> Self {
        Self {
            system: None,
            message: message.into(),
        }
    }
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Findings that make the plan unexecutable.
    pub errors: Vec<ValidationIssue>,
    /// Findings an operator should look at.
    pub warnings: Vec<ValidationIssue>,
    /// Informational findings.
    pub info: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns `true` if the graph can be planned.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub(super) fn validate(nodes: &mut HashMap<SystemId, GraphNode>) -> ValidationReport {
    let mut report = ValidationReport::default();

    // missing dependency targets
    for node in nodes.values() {
        for dep in &node.definition.dependencies {
            if !nodes.contains_key(dep) {
                report.errors.push(ValidationIssue::on(
                    &node.definition.id,
                    format!("dependency {} is not registered", dep),
                ));
            }
        }
    }

    // cycles (reuses the ordering pass so the path is named)
    if let Err(GraphError::CycleDetected { path }) = super::graph::execution_order(nodes) {
        report
            .errors
            .push(ValidationIssue::global(format!("dependency cycle: {path}")));
    }

    // depths, memoized onto the nodes
    let depths = compute_depths(nodes);
    for (id, depth) in &depths {
        if let Some(node) = nodes.get_mut(id) {
            node.depth = *depth;
        }
    }

    for node in nodes.values() {
        let def = &node.definition;

        if node.depth > def.max_dependency_depth {
            report.warnings.push(ValidationIssue::on(
                &def.id,
                format!(
                    "dependency depth {} exceeds declared maximum {}",
                    node.depth, def.max_dependency_depth
                ),
            ));
        }

        if def.dependencies.len() > MAX_RECOMMENDED_DEPENDENCIES {
            report.warnings.push(ValidationIssue::on(
                &def.id,
                format!(
                    "{} dependencies exceed the recommended maximum of {}",
                    def.dependencies.len(),
                    MAX_RECOMMENDED_DEPENDENCIES
                ),
            ));
        }

        for dep in &def.dependencies {
            if let Some(dep_node) = nodes.get(dep) {
                if dep_node.definition.tier.runs_after(def.tier) {
                    report.warnings.push(ValidationIssue::on(
                        &def.id,
                        format!(
                            "depends on {} in a higher tier; only last tick's output is visible",
                            dep
                        ),
                    ));
                }
            }
        }

        if def.dependencies.is_empty() && node.dependents.is_empty() {
            report.info.push(ValidationIssue::on(
                &def.id,
                "isolated: no dependencies and no dependents",
            ));
        }
    }

    report
}

/// Longest-chain depth per node. Cycle participants get depth 0; the
/// cycle itself is reported separately.
fn compute_depths(nodes: &HashMap<SystemId, GraphNode>) -> HashMap<SystemId, usize> {
    fn depth_of(
        id: &SystemId,
        nodes: &HashMap<SystemId, GraphNode>,
        memo: &mut HashMap<SystemId, usize>,
        in_progress: &mut Vec<SystemId>,
    ) -> usize {
        if let Some(d) = memo.get(id) {
            return *d;
        }
        if in_progress.contains(id) {
            return 0;
        }
        let Some(node) = nodes.get(id) else {
            return 0;
        };
        in_progress.push(id.clone());
        let d = node
            .definition
            .dependencies
            .iter()
            .filter(|dep| nodes.contains_key(*dep))
            .map(|dep| depth_of(dep, nodes, memo, in_progress) + 1)
            .max()
            .unwrap_or(0);
        in_progress.pop();
        memo.insert(id.clone(), d);
        d
    }

    let mut memo = HashMap::new();
    let mut in_progress = Vec::new();
    for id in nodes.keys() {
        depth_of(id, nodes, &mut memo, &mut in_progress);
    }
    memo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DependencyRegistry;
    use tickflow_system::SystemDefinition;
    use tickflow_types::Tier;

    #[test]
    fn clean_graph_is_valid() {
        let mut reg = DependencyRegistry::new();
        reg.register(SystemDefinition::new("economy", Tier::CrossEntity))
            .unwrap();
        reg.register(
            SystemDefinition::new("trade", Tier::CrossEntity)
                .with_dependency(SystemId::named("economy")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let mut reg = DependencyRegistry::new();
        reg.register(
            SystemDefinition::new("trade", Tier::CrossEntity)
                .with_dependency(SystemId::named("ghost")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(!report.is_valid());
        assert!(report.errors[0].message.contains("ghost"));
    }

    #[test]
    fn cycle_is_an_error_with_path() {
        let mut reg = DependencyRegistry::new();
        reg.register(
            SystemDefinition::new("a", Tier::Global).with_dependency(SystemId::named("b")),
        )
        .unwrap();
        reg.register(
            SystemDefinition::new("b", Tier::Global).with_dependency(SystemId::named("a")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(!report.is_valid());
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("cycle") && e.message.contains("->")));
    }

    #[test]
    fn excessive_depth_is_a_warning() {
        let mut reg = DependencyRegistry::new();
        let mut prev: Option<SystemId> = None;
        for i in 0..4 {
            let mut def = SystemDefinition::new(format!("s{i}"), Tier::Global);
            def.max_dependency_depth = 2;
            if let Some(p) = &prev {
                def = def.with_dependency(p.clone());
            }
            prev = Some(def.id.clone());
            reg.register(def).unwrap();
        }
        let report = reg.validate();
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.message.contains("depth")));
    }

    #[test]
    fn higher_tier_dependency_is_a_warning() {
        let mut reg = DependencyRegistry::new();
        reg.register(SystemDefinition::new("summary", Tier::Global))
            .unwrap();
        reg.register(
            SystemDefinition::new("economy", Tier::CrossEntity)
                .with_dependency(SystemId::named("summary")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.message.contains("higher tier")));
    }

    #[test]
    fn lower_tier_dependency_is_clean() {
        let mut reg = DependencyRegistry::new();
        reg.register(SystemDefinition::new("population", Tier::PerEntity))
            .unwrap();
        reg.register(
            SystemDefinition::new("economy", Tier::CrossEntity)
                .with_dependency(SystemId::named("population")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn isolated_system_is_info() {
        let mut reg = DependencyRegistry::new();
        reg.register(SystemDefinition::new("weather", Tier::Global))
            .unwrap();
        let report = reg.validate();
        assert!(report
            .info
            .iter()
            .any(|i| i.message.contains("isolated")));
    }

    #[test]
    fn depth_within_declared_maximum_is_clean() {
        let mut reg = DependencyRegistry::new();
        reg.register(SystemDefinition::new("a", Tier::Global)).unwrap();
        reg.register(
            SystemDefinition::new("b", Tier::Global).with_dependency(SystemId::named("a")),
        )
        .unwrap();
        let report = reg.validate();
        assert!(!report.warnings.iter().any(|w| w.message.contains("depth")));
    }
}

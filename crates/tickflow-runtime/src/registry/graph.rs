//! Topological ordering and wave partitioning.

use super::GraphError;
use std::collections::{HashMap, HashSet};
use tickflow_system::SystemDefinition;
use tickflow_types::{SystemId, Tier};

/// One system's node in the dependency graph.
#[derive(Debug)]
pub struct GraphNode {
    /// The registered definition.
    pub definition: SystemDefinition,
    /// Systems that list this one as a dependency.
    pub dependents: Vec<SystemId>,
    /// Longest dependency chain below this node, memoized by the
    /// last validation pass.
    pub depth: usize,
}

/// Deterministic seed order: tier, then descending priority, then
/// name. The DFS emits dependencies first, so the final order is
/// topological with these ties.
fn seed_order(nodes: &HashMap<SystemId, GraphNode>) -> Vec<SystemId> {
    let mut seeds: Vec<SystemId> = nodes.keys().cloned().collect();
    seeds.sort_by(|a, b| {
        let da = &nodes[a].definition;
        let db = &nodes[b].definition;
        da.tier
            .cmp(&db.tier)
            .then(db.priority.cmp(&da.priority))
            .then(a.name().cmp(b.name()))
    });
    seeds
}

pub(super) fn execution_order(
    nodes: &HashMap<SystemId, GraphNode>,
) -> Result<Vec<SystemId>, GraphError> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();

    for id in seed_order(nodes) {
        visit(&id, nodes, &mut visited, &mut visiting, &mut order)?;
    }
    Ok(order)
}

fn visit(
    id: &SystemId,
    nodes: &HashMap<SystemId, GraphNode>,
    visited: &mut HashSet<SystemId>,
    visiting: &mut Vec<SystemId>,
    order: &mut Vec<SystemId>,
) -> Result<(), GraphError> {
    if visited.contains(id) {
        return Ok(());
    }
    if let Some(pos) = visiting.iter().position(|s| s == id) {
        let mut path: Vec<&str> = visiting[pos..].iter().map(SystemId::name).collect();
        path.push(id.name());
        return Err(GraphError::CycleDetected {
            path: path.join(" -> "),
        });
    }

    visiting.push(id.clone());
    let node = nodes.get(id).expect("visit called with registered id");
    let mut deps = node.definition.dependencies.clone();
    deps.sort_by(|a, b| a.name().cmp(b.name()));
    for dep in &deps {
        if !nodes.contains_key(dep) {
            return Err(GraphError::MissingDependency {
                id: id.to_string(),
                dependency: dep.to_string(),
            });
        }
        visit(dep, nodes, visited, visiting, order)?;
    }
    visiting.pop();
    visited.insert(id.clone());
    order.push(id.clone());
    Ok(())
}

/// Partitions one tier into waves of mutually independent systems.
///
/// Only same-tier dependencies constrain waves; cross-tier ones are
/// satisfied by tick phasing. Flagged `runs_last_in_tier` systems
/// form the final wave regardless of dependencies.
pub(super) fn tier_waves(
    nodes: &HashMap<SystemId, GraphNode>,
    tier: Tier,
) -> Result<Vec<Vec<SystemId>>, GraphError> {
    let mut pending: Vec<SystemId> = Vec::new();
    let mut last_wave: Vec<SystemId> = Vec::new();
    for id in seed_order(nodes) {
        let def = &nodes[&id].definition;
        if def.tier != tier {
            continue;
        }
        if def.runs_last_in_tier {
            last_wave.push(id);
        } else {
            pending.push(id);
        }
    }

    let mut waves: Vec<Vec<SystemId>> = Vec::new();
    let mut placed: HashSet<SystemId> = HashSet::new();
    while !pending.is_empty() {
        let ready: Vec<SystemId> = pending
            .iter()
            .filter(|id| {
                nodes[*id].definition.dependencies.iter().all(|dep| {
                    match nodes.get(dep) {
                        // same-tier deps must already be placed
                        Some(n) if n.definition.tier == tier => placed.contains(dep),
                        // cross-tier or unregistered: no wave constraint
                        _ => true,
                    }
                })
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            let path: Vec<&str> = pending.iter().map(SystemId::name).collect();
            return Err(GraphError::CycleDetected {
                path: path.join(" -> "),
            });
        }

        pending.retain(|id| !ready.contains(id));
        for id in &ready {
            placed.insert(id.clone());
        }
        waves.push(ready);
    }

    if !last_wave.is_empty() {
        waves.push(last_wave);
    }
    Ok(waves)
}

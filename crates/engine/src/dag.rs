//! Stage graph validation, run once when an instance is created.
//!
//! Rules enforced:
//! 1. Every dependency must name a stage of the same workflow.
//! 2. The dependency graph must be acyclic (topological sort must succeed).
//!
//! Returns the stage names in execution order.  Stages whose dependencies
//! are satisfied at the same time run in name order, so the result is
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::{models::WorkflowDefinition, EngineError};

/// Validate the stage dependency graph and return stages in topological
/// execution order.
///
/// # Errors
/// - [`EngineError::UnknownDependency`] if a dependency names a missing stage.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn stage_order(definition: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Validate dependency endpoints
    // -----------------------------------------------------------------------
    for (name, stage) in &definition.stages {
        for dependency in &stage.dependencies {
            if !definition.stages.contains_key(dependency) {
                return Err(EngineError::UnknownDependency {
                    stage: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 2. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    // Edges run dependency → dependent.
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

    for (name, stage) in &definition.stages {
        dependents.entry(name.as_str()).or_default();
        let unique: BTreeSet<&str> = stage.dependencies.iter().map(String::as_str).collect();
        in_degree.insert(name.as_str(), unique.len());
        for dependency in unique {
            dependents.entry(dependency).or_default().push(name.as_str());
        }
    }

    // Ready set ordered by name.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(definition.stages.len());

    while let Some(name) = ready.pop_first() {
        sorted.push(name.to_owned());

        if let Some(next) = dependents.get(name) {
            for &dependent in next {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    // If we didn't visit every stage the graph contains a cycle.
    if sorted.len() != definition.stages.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

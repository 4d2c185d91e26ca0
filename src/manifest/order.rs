//! Dependency ordering
//!
//! Topological sort over the manifest's dependency graph. Among modules that
//! are ready at the same time, the one declared first wins, so the order is
//! deterministic for a given manifest.

use crate::error::{ShiploadError, ShiploadResult};
use crate::manifest::model::Manifest;
use std::collections::BTreeSet;

/// Compute the order in which modules must be delivered.
///
/// Every module appears after all of its dependencies. Fails with
/// `UnknownDependency` when a module names an id missing from the manifest
/// and with `CyclicDependency` when the graph has a cycle (including a module
/// that depends on itself).
pub fn resolve_load_order(manifest: &Manifest) -> ShiploadResult<Vec<String>> {
    let count = manifest.len();
    let mut remaining = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (index, (id, module)) in manifest.modules().enumerate() {
        let mut seen = BTreeSet::new();
        for dependency in &module.depends_on_ids {
            let dep_index =
                manifest
                    .index_of(dependency)
                    .ok_or_else(|| ShiploadError::UnknownDependency {
                        id: id.to_string(),
                        dependency: dependency.clone(),
                    })?;
            if seen.insert(dep_index) {
                remaining[index] += 1;
                dependents[dep_index].push(index);
            }
        }
    }

    // Ready set keyed by declaration index: the smallest index goes first.
    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
    let ids: Vec<&str> = manifest.modules().map(|(id, _)| id).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(next) = ready.pop_first() {
        order.push(ids[next].to_string());
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < count {
        let stuck = (0..count)
            .find(|&i| remaining[i] > 0)
            .map(|i| ids[i].to_string())
            .unwrap_or_default();
        return Err(ShiploadError::CyclicDependency { id: stuck });
    }

    Ok(order)
}

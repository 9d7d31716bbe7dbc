//! Dependency collection and topological resolution (spec §4.4 steps 6-7),
//! grounded in the teacher's `sprint_parser::dependency_graph` Kahn's-algorithm
//! sort, generalized to a deterministic min-heap frontier and explicit
//! required/optional edges.

use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One declared dependency edge (spec §3 "DependencyInfo").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub module_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Resolve a topological order over `known_ids` given `edges` (module_id ->
/// its declared dependencies), per spec §4.4 step 7:
/// - An unknown required dependency is a load error.
/// - An unknown optional dependency is skipped (the edge is dropped).
/// - Ties among ready nodes are broken by id, for determinism.
/// - If not every node is emitted, extract and report a cycle.
pub fn topological_order(known_ids: &[String], edges: &HashMap<String, Vec<DependencyInfo>>) -> Result<Vec<String>> {
    let known: HashSet<&str> = known_ids.iter().map(String::as_str).collect();

    // dependents[d] = ids that depend on d; in_degree[id] = number of its
    // still-unresolved (dependency, must-register-before-me) edges.
    let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut in_degree: BTreeMap<String, usize> = known_ids.iter().map(|id| (id.clone(), 0)).collect();

    for id in known_ids {
        let Some(deps) = edges.get(id) else { continue };
        for dep in deps {
            if !known.contains(dep.module_id.as_str()) {
                if dep.optional {
                    continue;
                }
                return Err(Error::ModuleLoadError {
                    message: format!("module '{}' declares unknown required dependency '{}'", id, dep.module_id),
                    timestamp: chrono::Utc::now(),
                });
            }
            dependents.entry(dep.module_id.clone()).or_default().push(id.clone());
            *in_degree.get_mut(id).unwrap() += 1;
        }
    }

    let mut heap: BinaryHeap<Reverse<String>> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| Reverse(id.clone()))
        .collect();

    let mut order = Vec::with_capacity(known_ids.len());
    while let Some(Reverse(id)) = heap.pop() {
        order.push(id.clone());
        if let Some(deps) = dependents.get(&id) {
            let mut ready: Vec<String> = Vec::new();
            for dependent in deps {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent.clone());
                }
            }
            ready.sort();
            for id in ready {
                heap.push(Reverse(id));
            }
        }
    }

    if order.len() != known_ids.len() {
        let remaining: Vec<String> = known_ids
            .iter()
            .filter(|id| !order.contains(id))
            .cloned()
            .collect();
        let path = extract_cycle(&remaining, edges);
        return Err(Error::CircularDependency { path, timestamp: chrono::Utc::now() });
    }

    Ok(order)
}

/// Walk forward from an arbitrary remaining node following dependency edges
/// until a repeat is found, returning the cycle as an id sequence.
fn extract_cycle(remaining: &[String], edges: &HashMap<String, Vec<DependencyInfo>>) -> Vec<String> {
    let remaining_set: HashSet<&str> = remaining.iter().map(String::as_str).collect();
    let Some(start) = remaining.first() else { return Vec::new() };

    let mut path = vec![start.clone()];
    let mut seen: HashSet<String> = [start.clone()].into_iter().collect();
    let mut current = start.clone();

    loop {
        let next = edges
            .get(&current)
            .into_iter()
            .flatten()
            .map(|d| d.module_id.clone())
            .find(|id| remaining_set.contains(id.as_str()));
        let Some(next) = next else { break };
        if seen.contains(&next) {
            path.push(next);
            break;
        }
        seen.insert(next.clone());
        path.push(next.clone());
        current = next;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(id: &str) -> DependencyInfo {
        DependencyInfo { module_id: id.to_string(), version: None, optional: false }
    }

    #[test]
    fn p7_dependencies_registered_before_dependents() {
        let ids = vec!["api".to_string(), "db".to_string(), "ui".to_string()];
        let mut edges = HashMap::new();
        edges.insert("api".to_string(), vec![dep("db")]);
        let order = topological_order(&ids, &edges).unwrap();
        let db_pos = order.iter().position(|x| x == "db").unwrap();
        let api_pos = order.iter().position(|x| x == "api").unwrap();
        assert!(db_pos < api_pos);
    }

    #[test]
    fn deterministic_tie_break_by_id() {
        let ids = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let order = topological_order(&ids, &HashMap::new()).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn s6_cycle_is_reported() {
        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let mut edges = HashMap::new();
        edges.insert("x".to_string(), vec![dep("y")]);
        edges.insert("y".to_string(), vec![dep("z")]);
        edges.insert("z".to_string(), vec![dep("x")]);
        let err = topological_order(&ids, &edges).unwrap_err();
        assert_eq!(err.code(), "CIRCULAR_DEPENDENCY");
        if let Error::CircularDependency { path, .. } = err {
            let set: HashSet<_> = path.iter().collect();
            assert!(set.contains(&"x".to_string()));
            assert!(set.contains(&"y".to_string()));
            assert!(set.contains(&"z".to_string()));
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn unknown_optional_dependency_is_skipped() {
        let ids = vec!["a".to_string()];
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec![DependencyInfo { module_id: "missing".into(), version: None, optional: true }]);
        let order = topological_order(&ids, &edges).unwrap();
        assert_eq!(order, vec!["a"]);
    }

    #[test]
    fn unknown_required_dependency_fails() {
        let ids = vec!["a".to_string()];
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec![dep("missing")]);
        let err = topological_order(&ids, &edges).unwrap_err();
        assert_eq!(err.code(), "MODULE_LOAD_ERROR");
    }
}

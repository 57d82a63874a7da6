//! # Dependency Graph
//!
//! Bidirectional adjacency between object ids.
//!
//! ```text
//! dependencies[A] = [B, C]   A needs B and C synced first
//! dependants[B]   = [A]      B must be synced before A
//! dependants[C]   = [A]
//! ```
//!
//! The two maps are always mutually consistent and never hold empty lists.

use std::collections::{HashMap, HashSet};

use crate::object::CoreObjectId;

/// Id-keyed dependency adjacency.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Sorted, deduplicated dependency list per object.
    dependencies: HashMap<CoreObjectId, Vec<CoreObjectId>>,
    /// Dependant list per object, in insertion order.
    dependants: HashMap<CoreObjectId, Vec<CoreObjectId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns what `object` depends on, sorted.
    #[must_use]
    pub fn dependencies(&self, object: CoreObjectId) -> &[CoreObjectId] {
        self.dependencies.get(&object).map_or(&[], Vec::as_slice)
    }

    /// Returns what depends on `object`.
    #[must_use]
    pub fn dependants(&self, object: CoreObjectId) -> &[CoreObjectId] {
        self.dependants.get(&object).map_or(&[], Vec::as_slice)
    }

    /// Checks if the graph holds no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Replaces the dependency list of `object`.
    ///
    /// `None` removes every dependency. The new list is sorted and
    /// deduplicated, self-references are dropped, and only the difference
    /// against the stored list is applied to the dependant lists.
    pub fn update(&mut self, object: CoreObjectId, new_dependencies: Option<&[CoreObjectId]>) {
        let mut new_list: Vec<CoreObjectId> = new_dependencies.map(<[_]>::to_vec).unwrap_or_default();
        new_list.sort_unstable();
        new_list.dedup();
        new_list.retain(|&dep| dep != object);

        let old_list = self.dependencies(object);
        let to_add = sorted_difference(&new_list, old_list);
        let to_remove = sorted_difference(old_list, &new_list);

        for dep in to_remove {
            self.unlink_dependant(dep, object);
        }
        for dep in to_add {
            self.dependants.entry(dep).or_default().push(object);
        }

        if new_list.is_empty() {
            self.dependencies.remove(&object);
        } else {
            self.dependencies.insert(object, new_list);
        }
    }

    /// Removes every edge pointing at or from `object`.
    ///
    /// Returns the objects that depended on it.
    pub fn remove_object(&mut self, object: CoreObjectId) -> Vec<CoreObjectId> {
        self.update(object, None);

        let dependants = self.dependants.remove(&object).unwrap_or_default();
        for &dependant in &dependants {
            if let Some(list) = self.dependencies.get_mut(&dependant) {
                list.retain(|&dep| dep != object);
                if list.is_empty() {
                    self.dependencies.remove(&dependant);
                }
            }
        }
        dependants
    }

    /// Checks whether making `object` depend on `new_dependencies` closes a cycle.
    ///
    /// Returns the cycle as a path starting and ending at `object`.
    #[must_use]
    pub fn find_cycle(
        &self,
        object: CoreObjectId,
        new_dependencies: &[CoreObjectId],
    ) -> Option<Vec<CoreObjectId>> {
        let mut visited = HashSet::new();
        let mut path = vec![object];

        for &dep in new_dependencies {
            if self.dfs_reaches(dep, object, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    /// DFS helper for cycle detection. Leaves the found path in `path`.
    fn dfs_reaches(
        &self,
        current: CoreObjectId,
        target: CoreObjectId,
        visited: &mut HashSet<CoreObjectId>,
        path: &mut Vec<CoreObjectId>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if visited.insert(current) {
            for &next in self.dependencies(current) {
                if self.dfs_reaches(next, target, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    /// Checks that every edge is recorded in both directions.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward = self.dependencies.iter().all(|(&object, deps)| {
            !deps.is_empty()
                && deps.windows(2).all(|w| w[0] < w[1])
                && deps.iter().all(|&dep| self.dependants(dep).contains(&object))
        });
        let backward = self.dependants.iter().all(|(&dep, dependants)| {
            !dependants.is_empty()
                && dependants
                    .iter()
                    .all(|&object| self.dependencies(object).binary_search(&dep).is_ok())
        });
        forward && backward
    }

    fn unlink_dependant(&mut self, dependency: CoreObjectId, dependant: CoreObjectId) {
        if let Some(list) = self.dependants.get_mut(&dependency) {
            list.retain(|&d| d != dependant);
            if list.is_empty() {
                self.dependants.remove(&dependency);
            }
        }
    }
}

/// Elements of sorted `a` missing from sorted `b`.
fn sorted_difference(a: &[CoreObjectId], b: &[CoreObjectId]) -> Vec<CoreObjectId> {
    let mut out = Vec::new();
    let mut j = 0;
    for &item in a {
        while j < b.len() && b[j] < item {
            j += 1;
        }
        if j >= b.len() || b[j] != item {
            out.push(item);
        }
    }
    out
}

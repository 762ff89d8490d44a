//! Dependency graph for cascading invalidation
//!
//! Maps a dependency key to the cache keys that declared it. Removing a
//! dependency key removes its direct dependents only; dependents of those
//! dependents are left alone. A dependent that goes away on its own is
//! pruned from every set it was registered in.

use crate::cache::types::CacheKey;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    dependents: HashMap<CacheKey, HashSet<CacheKey>>,

    /// Dependent key -> dependency keys it declared
    declared: HashMap<CacheKey, HashSet<CacheKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dependent` under `dependency`
    pub fn add(&mut self, dependency: &str, dependent: &str) {
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.declared
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    /// Remove and return the dependents registered under `dependency`
    pub fn take_dependents(&mut self, dependency: &str) -> Option<HashSet<CacheKey>> {
        let dependents = self.dependents.remove(dependency)?;
        for dependent in &dependents {
            if let Some(declared) = self.declared.get_mut(dependent) {
                declared.remove(dependency);
                if declared.is_empty() {
                    self.declared.remove(dependent);
                }
            }
        }
        Some(dependents)
    }

    /// Drop `dependent` from every dependency it registered under. Dependency
    /// keys left with no dependents are removed.
    pub fn forget_dependent(&mut self, dependent: &str) {
        let Some(declared) = self.declared.remove(dependent) else {
            return;
        };
        for dependency in declared {
            if let Some(dependents) = self.dependents.get_mut(&dependency) {
                dependents.remove(dependent);
                if dependents.is_empty() {
                    self.dependents.remove(&dependency);
                }
            }
        }
    }

    pub fn dependents_of(&self, dependency: &str) -> Option<&HashSet<CacheKey>> {
        self.dependents.get(dependency)
    }

    pub fn is_root(&self, key: &str) -> bool {
        self.dependents.contains_key(key)
    }

    /// All dependency keys currently registered
    pub fn roots(&self) -> impl Iterator<Item = &CacheKey> {
        self.dependents.keys()
    }

    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    pub fn clear(&mut self) {
        self.dependents.clear();
        self.declared.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_take() {
        let mut graph = DependencyGraph::new();
        graph.add("workouts", "workouts:list");
        graph.add("workouts", "workouts:stats");
        graph.add("profile", "workouts:stats");

        assert!(graph.is_root("workouts"));
        assert_eq!(graph.dependents_of("workouts").map(|d| d.len()), Some(2));
        assert_eq!(graph.len(), 2);

        let taken = graph.take_dependents("workouts").unwrap();
        assert!(taken.contains("workouts:list"));
        assert!(taken.contains("workouts:stats"));
        assert!(!graph.is_root("workouts"));
        assert!(graph.is_root("profile"));
    }

    #[test]
    fn test_duplicate_registration_is_deduplicated() {
        let mut graph = DependencyGraph::new();
        graph.add("a", "b");
        graph.add("a", "b");
        assert_eq!(graph.dependents_of("a").map(|d| d.len()), Some(1));
    }

    #[test]
    fn test_forget_dependent_prunes_sets() {
        let mut graph = DependencyGraph::new();
        graph.add("workouts", "log:2024-01-01");
        graph.add("workouts", "log:2024-01-02");
        graph.add("profile", "log:2024-01-01");

        graph.forget_dependent("log:2024-01-01");
        assert_eq!(graph.dependents_of("workouts").map(|d| d.len()), Some(1));
        assert!(!graph.is_root("profile"));

        graph.forget_dependent("log:2024-01-02");
        assert!(graph.is_empty());

        // Unknown keys are ignored
        graph.forget_dependent("log:2024-01-03");
        assert!(graph.is_empty());
    }

    #[test]
    fn test_take_updates_reverse_index() {
        let mut graph = DependencyGraph::new();
        graph.add("workouts", "summary");
        graph.add("profile", "summary");

        graph.take_dependents("workouts");
        graph.forget_dependent("summary");
        assert!(graph.is_empty());
    }

    #[test]
    fn test_take_missing() {
        let mut graph = DependencyGraph::new();
        assert!(graph.take_dependents("nothing").is_none());
        graph.clear();
        assert!(graph.is_empty());
    }
}

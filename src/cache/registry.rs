//! Namespace registry - TTL policies and derived-namespace dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::NamespacePolicy;

/// Central registry of cache namespaces.
///
/// Each namespace may carry a [`NamespacePolicy`], and may be declared as
/// derived from other namespaces. Invalidating a source namespace must also
/// invalidate everything derived from it, transitively.
///
/// ## Example
///
/// ```rust
/// let registry = NamespaceRegistry::new();
/// registry.register("employees:getAll", NamespacePolicy::standard());
/// registry.register("dashboard:stats", NamespacePolicy::aggregate());
/// registry.add_dependency("employees:getAll", "dashboard:stats");
///
/// assert_eq!(registry.dependents_of("employees:getAll"), vec!["dashboard:stats"]);
/// ```
#[derive(Clone, Default)]
pub struct NamespaceRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    policies: HashMap<String, NamespacePolicy>,
    /// source namespace -> namespaces derived from it
    dependents: HashMap<String, HashSet<String>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the policy for a namespace.
    pub fn register(&self, namespace: &str, policy: NamespacePolicy) {
        debug!("Registering namespace {} (ttl {:?})", namespace, policy.ttl);
        self.inner
            .write()
            .policies
            .insert(namespace.to_string(), policy);
    }

    /// Policy for `namespace`, if one was registered.
    pub fn policy(&self, namespace: &str) -> Option<NamespacePolicy> {
        self.inner.read().policies.get(namespace).cloned()
    }

    /// Declare that `derived` is computed from `source`.
    pub fn add_dependency(&self, source: &str, derived: &str) {
        self.inner
            .write()
            .dependents
            .entry(source.to_string())
            .or_default()
            .insert(derived.to_string());
    }

    /// All namespaces derived from `source`, directly or transitively, sorted.
    pub fn dependents_of(&self, source: &str) -> Vec<String> {
        let state = self.inner.read();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending = vec![source.to_string()];

        while let Some(current) = pending.pop() {
            if let Some(derived) = state.dependents.get(&current) {
                for namespace in derived {
                    if namespace != source && seen.insert(namespace.clone()) {
                        pending.push(namespace.clone());
                    }
                }
            }
        }

        let mut result: Vec<String> = seen.into_iter().collect();
        result.sort();
        result
    }

    /// Get a list of all registered namespaces.
    #[allow(dead_code)]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().policies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("NamespaceRegistry")
            .field("namespaces", &state.policies.keys().collect::<Vec<_>>())
            .field("dependency_edges", &state.dependents.values().map(HashSet::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_policy_lookup() {
        let registry = NamespaceRegistry::new();
        registry.register("clients:getAll", NamespacePolicy::reference());

        assert_eq!(
            registry.policy("clients:getAll").map(|p| p.ttl),
            Some(Duration::from_secs(3600))
        );
        assert!(registry.policy("tasks:getAll").is_none());
    }

    #[test]
    fn test_dependents_are_transitive() {
        let registry = NamespaceRegistry::new();
        registry.add_dependency("attendance:getAll", "dashboard:stats");
        registry.add_dependency("dashboard:stats", "reports:weekly");
        registry.add_dependency("employees:getAll", "dashboard:stats");

        assert_eq!(
            registry.dependents_of("attendance:getAll"),
            vec!["dashboard:stats".to_string(), "reports:weekly".to_string()]
        );
        assert!(registry.dependents_of("clients:getAll").is_empty());
    }

    #[test]
    fn test_dependency_cycles_terminate() {
        let registry = NamespaceRegistry::new();
        registry.add_dependency("a", "b");
        registry.add_dependency("b", "a");

        assert_eq!(registry.dependents_of("a"), vec!["b".to_string()]);
    }
}

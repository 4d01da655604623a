//! Shared application state.

use std::sync::Arc;

use crate::cache::{CacheService, ServiceMetrics};
use crate::database::{Database, Repositories};
use crate::listeners::ListenerManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection.
    pub db: Database,

    /// The single cache service, shared by every repository.
    pub cache: Arc<CacheService>,

    /// Registry of live subscriptions.
    pub listeners: ListenerManager,

    /// Cached collection services and the dashboard.
    pub repos: Repositories,
}

/// Snapshot of the cache and listener layers, used for leak detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStats {
    pub memory_entry_count: u64,
    pub active_listener_count: usize,
    pub listener_ids: Vec<String>,
    pub in_flight_fetches: usize,
    pub cache: ServiceMetrics,
}

impl LayerStats {
    pub fn collect(cache: &CacheService, listeners: &ListenerManager) -> Self {
        let listener_stats = listeners.stats();
        Self {
            memory_entry_count: cache.store().memory_entry_count(),
            active_listener_count: listener_stats.active_count,
            listener_ids: listener_stats.ids,
            in_flight_fetches: cache.in_flight_count(),
            cache: cache.metrics(),
        }
    }
}

impl AppState {
    pub fn new(db: Database, cache: Arc<CacheService>) -> Self {
        let repos = Repositories::new(&db, Arc::clone(&cache));
        Self {
            db,
            cache,
            listeners: ListenerManager::new(),
            repos,
        }
    }

    pub fn stats(&self) -> LayerStats {
        LayerStats::collect(&self.cache, &self.listeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheStore, FetchOptions, ManualClock, NamespaceRegistry};
    use crate::listeners::unsubscribe_fn;

    #[tokio::test]
    async fn test_collect_layer_stats() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let store = CacheStore::memory_only(CacheConfig::default(), clock);
        let cache = CacheService::new(Arc::new(store), NamespaceRegistry::new());
        let listeners = ListenerManager::new();

        let _: Vec<String> = cache
            .get_or_fetch("teams:getAll", &(), || async { Ok(vec!["core".to_string()]) }, FetchOptions::default())
            .await
            .unwrap();
        let _handle = listeners
            .register("tasks-feed", || Ok(unsubscribe_fn(|| {})))
            .unwrap();

        let stats = LayerStats::collect(&cache, &listeners);
        assert_eq!(stats.memory_entry_count, 1);
        assert_eq!(stats.active_listener_count, 1);
        assert_eq!(stats.listener_ids, vec!["tasks-feed"]);
        assert_eq!(stats.in_flight_fetches, 0);
        assert_eq!(stats.cache.fetches, 1);
    }
}

//! Optimized data service - cached reads and invalidating writes for one
//! remote collection.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{CacheService, FetchOptions, NamespacePolicy};

use super::source::{Filter, Record, RemoteCollection};

/// Options for [`OptimizedDataService::get_all`].
#[derive(Debug, Clone, Copy)]
pub struct GetAllOptions {
    /// Read through the cache. When `false` the remote source is queried
    /// directly and nothing is stored.
    pub use_cache: bool,
    /// Overrides the namespace policy TTL.
    pub cache_ttl: Option<Duration>,
}

impl Default for GetAllOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_ttl: None,
        }
    }
}

impl GetAllOptions {
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            cache_ttl: None,
        }
    }
}

/// Cached access to one remote collection.
///
/// Reads go through [`CacheService::get_or_fetch`] under `<collection>:getAll`
/// and `<collection>:getById`. Every successful write invalidates both
/// namespaces and every namespace derived from the list before returning.
pub struct OptimizedDataService<T: Record> {
    source: Arc<dyn RemoteCollection<T>>,
    cache: Arc<CacheService>,
    list_namespace: Arc<str>,
    by_id_namespace: Arc<str>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for OptimizedDataService<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            list_namespace: Arc::clone(&self.list_namespace),
            by_id_namespace: Arc::clone(&self.by_id_namespace),
            _record: PhantomData,
        }
    }
}

/// `<collection>:getAll`
pub fn list_namespace(collection: &str) -> String {
    format!("{collection}:getAll")
}

/// `<collection>:getById`
pub fn by_id_namespace(collection: &str) -> String {
    format!("{collection}:getById")
}

impl<T: Record> OptimizedDataService<T> {
    /// Wrap `source`, registering its namespaces with `policy`.
    pub fn new(
        source: Arc<dyn RemoteCollection<T>>,
        cache: Arc<CacheService>,
        policy: NamespacePolicy,
    ) -> Self {
        let list = list_namespace(source.name());
        let by_id = by_id_namespace(source.name());
        cache.namespaces().register(&list, policy.clone());
        cache.namespaces().register(&by_id, policy);

        Self {
            source,
            cache,
            list_namespace: Arc::from(list),
            by_id_namespace: Arc::from(by_id),
            _record: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        self.source.name()
    }

    pub fn list_namespace(&self) -> &str {
        &self.list_namespace
    }

    /// All records matching `filter`.
    pub async fn get_all(&self, filter: &Filter, options: GetAllOptions) -> Result<Vec<T>> {
        if !options.use_cache {
            debug!("Uncached read of {}", self.list_namespace);
            return self.source.fetch_all(filter).await;
        }

        let fetch = FetchOptions::default().with_ttl(options.cache_ttl);
        self.fetch_list(filter, fetch).await
    }

    /// Stale-while-revalidate read.
    ///
    /// Returns the cached list immediately when present and refreshes it in
    /// the background. Falls back to [`get_all`](Self::get_all) on a miss.
    pub async fn get_all_fresh(&self, filter: &Filter) -> Result<Vec<T>> {
        match self.cache.peek::<Vec<T>, _>(&self.list_namespace, filter).await? {
            Some(records) => {
                self.spawn_refresh(filter.clone());
                Ok(records)
            }
            None => self.get_all(filter, GetAllOptions::default()).await,
        }
    }

    /// Cached single-record read. A missing record is cached as `None`.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        let source = Arc::clone(&self.source);
        let owned_id = id.to_string();

        let record = self
            .cache
            .get_or_fetch(
                &self.by_id_namespace,
                &json!({ "id": id }),
                move || async move { source.fetch_one(&owned_id).await },
                FetchOptions::default(),
            )
            .await?;
        Ok(record)
    }

    pub async fn create(&self, record: T) -> Result<T> {
        self.source.insert(&record).await?;
        debug!("Created {} in {}", record.id(), self.collection());
        self.invalidate_all().await;
        Ok(record)
    }

    /// Replace the record with `id`. Returns `false` if it did not exist.
    pub async fn update(&self, id: &str, record: &T) -> Result<bool> {
        let replaced = self.source.replace(id, record).await?;
        debug!("Updated {} in {}: {}", id, self.collection(), replaced);
        self.invalidate_all().await;
        Ok(replaced)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.source.delete(id).await?;
        debug!("Deleted {} from {}: {}", id, self.collection(), deleted);
        self.invalidate_all().await;
        Ok(deleted)
    }

    /// Drop every cached read of this collection and everything derived
    /// from it. Returns the number of removed entries.
    pub async fn invalidate_all(&self) -> usize {
        let mut removed = self.cache.invalidate_pattern(&self.list_namespace).await;
        removed += self.cache.invalidate_pattern(&self.by_id_namespace).await;

        for derived in self.cache.namespaces().dependents_of(&self.list_namespace) {
            removed += self.cache.invalidate_pattern(&derived).await;
        }
        removed
    }

    async fn fetch_list(&self, filter: &Filter, options: FetchOptions) -> Result<Vec<T>> {
        let source = Arc::clone(&self.source);
        let owned = filter.clone();

        let records = self
            .cache
            .get_or_fetch(
                &self.list_namespace,
                filter,
                move || async move { source.fetch_all(&owned).await },
                options,
            )
            .await?;
        Ok(records)
    }

    fn spawn_refresh(&self, filter: Filter) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.fetch_list(&filter, FetchOptions::refresh()).await {
                warn!("Background refresh of {} failed: {:#}", service.list_namespace, e);
            }
        });
    }
}

impl<T: Record> std::fmt::Debug for OptimizedDataService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedDataService")
            .field("collection", &self.source.name())
            .finish()
    }
}

//! Cache service - canonical keys, TTL policy, get-or-fetch and coalescing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::entry::{CachePayload, Tier};
use super::key::derive_key;
use super::store::{CacheStore, SetOptions};
use super::{CacheError, NamespaceRegistry};

/// Serialized result shared by every waiter of one in-flight fetch.
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<str>, CacheError>>>;

struct InFlight {
    id: u64,
    future: SharedFetch,
}

/// Options for [`CacheService::get_or_fetch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Overrides the namespace policy and the store default.
    pub ttl: Option<Duration>,
    /// Overrides tier selection by payload kind.
    pub tier: Option<Tier>,
    /// Skip the cache read and fetch, still coalescing with other callers.
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Default)]
struct ServiceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
}

/// Snapshot of service counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Fetcher invocations.
    pub fetches: u64,
    /// Callers that joined an in-flight fetch instead of starting one.
    pub coalesced: u64,
    pub invalidations: u64,
}

/// Get-or-fetch caching over a [`CacheStore`].
///
/// One instance is built at startup and shared by `Arc` with every consumer.
pub struct CacheService {
    store: Arc<CacheStore>,
    namespaces: NamespaceRegistry,
    in_flight: Arc<DashMap<String, InFlight>>,
    next_flight: AtomicU64,
    counters: ServiceCounters,
}

impl CacheService {
    pub fn new(store: Arc<CacheStore>, namespaces: NamespaceRegistry) -> Self {
        Self {
            store,
            namespaces,
            in_flight: Arc::new(DashMap::new()),
            next_flight: AtomicU64::new(0),
            counters: ServiceCounters::default(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    /// Return the cached value for `namespace` + `params`, or run `fetcher`.
    ///
    /// Concurrent callers for the same key share a single fetch. The fetch
    /// runs in its own task and completes even if every caller goes away.
    /// Failures are not cached; all waiters receive the same error.
    pub async fn get_or_fetch<T, P, F, Fut>(
        &self,
        namespace: &str,
        params: &P,
        fetcher: F,
        options: FetchOptions,
    ) -> Result<T, CacheError>
    where
        T: CachePayload + Serialize + DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = derive_key(namespace, params)?;

        if !options.force_refresh
            && let Some(entry) = self.store.get(&key).await
        {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return decode(&key, &entry.value);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let shared = self.join_or_start(&key, namespace, fetcher, options);
        let raw = shared.await?;
        decode(&key, &raw)
    }

    fn join_or_start<T, F, Fut>(
        &self,
        key: &str,
        namespace: &str,
        fetcher: F,
        options: FetchOptions,
    ) -> SharedFetch
    where
        T: CachePayload + Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight fetch for {}", key);
                existing.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let set_options = SetOptions {
                    tier: options.tier,
                    ttl: options.ttl.or_else(|| self.namespaces.policy(namespace).map(|p| p.ttl)),
                    kind: T::KIND,
                };

                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}, fetching", key);

                // Deletes after this point discard the fetched value.
                let since = self.store.fence_epoch();
                let fetch = fetcher();
                let store = Arc::clone(&self.store);
                let in_flight = Arc::clone(&self.in_flight);
                let task_key = key.to_string();

                let handle = tokio::spawn(async move {
                    let outcome = match fetch.await {
                        Ok(value) => serde_json::to_string(&value)
                            .map(Arc::<str>::from)
                            .map_err(CacheError::encode),
                        Err(e) => Err(CacheError::Fetch(Arc::new(e))),
                    };

                    if let Ok(raw) = &outcome {
                        store
                            .set_since(&task_key, Arc::clone(raw), set_options, since)
                            .await;
                    }

                    in_flight.remove_if(&task_key, |_, f| f.id == id);
                    outcome
                });

                let aborted_key = key.to_string();
                let future = async move {
                    handle.await.unwrap_or_else(|e| {
                        warn!("Fetch task for {} did not complete: {}", aborted_key, e);
                        Err(CacheError::FetchAborted { key: aborted_key })
                    })
                }
                .boxed()
                .shared();

                slot.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }

    /// Non-fetching read of a live entry.
    pub async fn peek<T, P>(&self, namespace: &str, params: &P) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let key = derive_key(namespace, params)?;
        match self.store.get(&key).await {
            Some(entry) => decode(&key, &entry.value).map(Some),
            None => Ok(None),
        }
    }

    /// Invalidate one derived key, or the whole namespace when `params` is `None`.
    pub async fn invalidate<P>(&self, namespace: &str, params: Option<&P>) -> Result<(), CacheError>
    where
        P: Serialize + ?Sized,
    {
        match params {
            Some(params) => {
                let key = derive_key(namespace, params)?;
                self.in_flight.remove(&key);
                self.store.delete(&key).await;
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                debug!("Invalidated {}", key);
            }
            None => {
                self.invalidate_pattern(namespace).await;
            }
        }
        Ok(())
    }

    /// Invalidate every key in `namespace`.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        self.invalidate_pattern(namespace).await;
    }

    /// Invalidate every key starting with `prefix`. Returns removed entries.
    pub async fn invalidate_pattern(&self, prefix: &str) -> usize {
        self.in_flight.retain(|key, _| !key.starts_with(prefix));
        let removed = self.store.delete_pattern(prefix).await;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("Invalidated pattern {}* ({} entries)", prefix, removed);
        removed
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("store", &self.store)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|e| CacheError::decode(key, e))
}

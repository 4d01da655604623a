//! Tiered cache store.
//!
//! Reads probe memory, then the structured tier, then the scalar tier. The
//! first live hit is promoted into every faster tier. Writes always land in
//! memory and in one durable tier chosen from the payload kind.
//!
//! Durable tiers are best effort: every call runs on the blocking pool under
//! a timeout, and any failure is logged and treated as a miss, so callers
//! never see a storage error.
//!
//! Deletes are fenced: a write or promotion that began before a delete of
//! its key is dropped, even when its durable write is still running when the
//! delete arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::durable::{DurableTier, ScalarTier, StructuredTier};
use super::entry::{CacheEntry, PayloadKind, Tier};
use super::fence::Fence;
use super::memory::MemoryTier;
use super::{CacheConfig, StorageError};

/// Options for [`CacheStore::set`].
#[derive(Debug, Clone, Copy)]
pub struct SetOptions {
    /// Explicit durable tier. Defaults to [`Tier::for_payload`].
    pub tier: Option<Tier>,
    /// Defaults to the store's configured TTL.
    pub ttl: Option<Duration>,
    /// Declared payload kind, used for tier selection.
    pub kind: PayloadKind,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            tier: None,
            ttl: None,
            kind: PayloadKind::Record,
        }
    }
}

impl SetOptions {
    pub fn kind(kind: PayloadKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

#[derive(Debug, Default)]
struct StoreCounters {
    durable_failures: AtomicU64,
    promotions: AtomicU64,
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMetrics {
    pub durable_failures: u64,
    pub promotions: u64,
}

/// Memory tier plus zero or more durable tiers, fastest first.
pub struct CacheStore {
    memory: MemoryTier,
    durable: Vec<Arc<dyn DurableTier>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: StoreCounters,
    fence: Arc<Fence>,
}

impl CacheStore {
    /// Build a store from `config`.
    ///
    /// Durable tiers that fail to open are skipped with a warning and the
    /// store runs without them.
    pub fn open(config: CacheConfig) -> Self {
        let mut tiers: Vec<Arc<dyn DurableTier>> = Vec::new();

        if let Some(dir) = &config.durable_dir {
            match StructuredTier::open(&dir.join("structured")) {
                Ok(tier) => tiers.push(Arc::new(tier)),
                Err(e) => warn!("Structured cache tier unavailable, skipping: {}", e),
            }
            match ScalarTier::open(dir.join("scalar.json"), config.scalar_quota_bytes) {
                Ok(tier) => tiers.push(Arc::new(tier)),
                Err(e) => warn!("Scalar cache tier unavailable, skipping: {}", e),
            }
        }

        info!("Cache store opened with {} durable tier(s)", tiers.len());
        Self::with_tiers(config, tiers, Arc::new(SystemClock))
    }

    /// Build a store over explicit durable tiers and clock.
    pub fn with_tiers(
        config: CacheConfig,
        mut durable: Vec<Arc<dyn DurableTier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        durable.retain(|tier| tier.tier() != Tier::Memory);
        durable.sort_by_key(|tier| tier.tier() as u8);

        Self {
            memory: MemoryTier::new(config.max_capacity),
            durable,
            clock,
            config,
            counters: StoreCounters::default(),
            fence: Arc::new(Fence::new()),
        }
    }

    /// A store without durable tiers.
    #[allow(dead_code)]
    pub fn memory_only(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_tiers(config, Vec::new(), clock)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Get the live entry for `key` from the fastest tier holding one.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.now_ms();
        let since = self.fence.epoch();

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired(now) {
                debug!("Cache hit for {} in memory", key);
                return Some(entry);
            }
            self.memory.invalidate(key);
        }

        for (index, tier) in self.durable.iter().enumerate() {
            let lookup = key.to_string();
            let Some(found) = self
                .durable_call(tier, "read", move |t| t.read(&lookup))
                .await
                .flatten()
            else {
                continue;
            };

            if found.is_expired(now) {
                let doomed = key.to_string();
                self.durable_call(tier, "remove", move |t| t.remove(&doomed))
                    .await;
                continue;
            }

            let entry = found.into_entry(tier.tier());
            debug!("Cache hit for {} in {} tier", key, entry.tier);
            self.promote(&entry, &self.durable[..index], since).await;
            return Some(entry);
        }

        None
    }

    /// Write `value` under `key` into memory and the selected durable tier.
    pub async fn set(&self, key: &str, value: impl Into<Arc<str>>, options: SetOptions) {
        let since = self.fence_epoch();
        self.set_since(key, value, options, since).await;
    }

    /// Invalidation epoch to pass to [`CacheStore::set_since`].
    pub fn fence_epoch(&self) -> u64 {
        self.fence.epoch()
    }

    /// Like [`CacheStore::set`] for a value produced since epoch `since`.
    ///
    /// Nothing is written if `key` was deleted after `since`.
    pub async fn set_since(&self, key: &str, value: impl Into<Arc<str>>, options: SetOptions, since: u64) {
        let value: Arc<str> = value.into();
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let now = self.now_ms();
        let target = options
            .tier
            .unwrap_or_else(|| Tier::for_payload(options.kind, value.len()));

        let entry = CacheEntry {
            key: key.into(),
            value,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
            tier: Tier::Memory,
        };
        if !self.insert_memory(entry.clone(), since) {
            debug!("Dropping write to {}: deleted while the value was produced", key);
            return;
        }

        if target == Tier::Memory {
            return;
        }

        let mut written = false;
        for tier in &self.durable {
            if tier.tier() == target {
                written = self.fenced_write(tier, "write", &entry, since).await;
            } else {
                // Drop copies in other tiers so a slower tier cannot shadow this write.
                let stale = key.to_string();
                self.durable_call(tier, "remove", move |t| t.remove(&stale))
                    .await;
            }
        }

        if !written {
            debug!("{} cached in memory only (target tier: {})", key, target);
        }
    }

    /// Remove `key` from every tier.
    pub async fn delete(&self, key: &str) {
        self.record_invalidation(key).await;
        self.memory.invalidate(key);
        for tier in &self.durable {
            let doomed = key.to_string();
            self.durable_call(tier, "remove", move |t| t.remove(&doomed))
                .await;
        }
    }

    /// Remove every key starting with `prefix` from every tier.
    pub async fn delete_pattern(&self, prefix: &str) -> usize {
        self.record_invalidation(prefix).await;
        let mut removed = self.memory.invalidate_prefix(prefix);
        for tier in &self.durable {
            let pattern = prefix.to_string();
            removed += self
                .durable_call(tier, "remove_prefix", move |t| t.remove_prefix(&pattern))
                .await
                .unwrap_or(0);
        }
        debug!("Deleted {} entries matching {}*", removed, prefix);
        removed
    }

    /// Physically remove expired entries from every tier.
    pub async fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        let mut removed = self.memory.purge_expired(now);
        for tier in &self.durable {
            removed += self
                .durable_call(tier, "purge_expired", move |t| t.purge_expired(now))
                .await
                .unwrap_or(0);
        }
        removed
    }

    /// Flush buffered durable writes.
    pub async fn flush(&self) {
        for tier in &self.durable {
            self.durable_call(tier, "flush", |t| t.flush()).await;
        }
    }

    pub fn memory_entry_count(&self) -> u64 {
        self.memory.entry_count()
    }

    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            durable_failures: self.counters.durable_failures.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
        }
    }

    async fn promote(&self, entry: &CacheEntry, faster: &[Arc<dyn DurableTier>], since: u64) {
        let promoted = CacheEntry {
            tier: Tier::Memory,
            ..entry.clone()
        };
        if !self.insert_memory(promoted, since) {
            return;
        }
        for tier in faster {
            self.fenced_write(tier, "promote", entry, since).await;
        }
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert into memory unless the key was deleted after `since`. Returns
    /// `false` only for a stale write.
    fn insert_memory(&self, entry: CacheEntry, since: u64) -> bool {
        match self.fence.try_read() {
            Some(fence) => {
                if fence.is_stale(since, &entry.key) {
                    return false;
                }
                self.memory.insert(entry);
                true
            }
            // A delete is being recorded; leave memory to the durable path.
            None => true,
        }
    }

    /// Durable write that rechecks the fence on the blocking thread, holding
    /// it until the write lands. Returns `true` if the entry was written.
    async fn fenced_write(&self, tier: &Arc<dyn DurableTier>, op: &'static str, entry: &CacheEntry, since: u64) -> bool {
        let stored = entry.to_stored();
        let fence = Arc::clone(&self.fence);
        let written = self
            .durable_call(tier, op, move |t| {
                let guard = fence.read();
                if guard.is_stale(since, &stored.key) {
                    return Ok(false);
                }
                t.write(&stored).map(|()| true)
            })
            .await;
        written == Some(true)
    }

    /// Fence `prefix` against writes that started before this call.
    ///
    /// With durable tiers this waits, off the runtime, for durable writes in
    /// progress so the removal that follows sees them.
    async fn record_invalidation(&self, prefix: &str) {
        if self.durable.is_empty() {
            self.fence.record(prefix);
            return;
        }

        let fence = Arc::clone(&self.fence);
        let prefix = prefix.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || fence.record(&prefix)).await {
            warn!("Recording invalidation failed: {}", e);
        }
    }

    /// Run one durable-tier call on the blocking pool under the configured
    /// timeout. Any failure is logged and reported as `None`.
    async fn durable_call<R, F>(&self, tier: &Arc<dyn DurableTier>, op: &'static str, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn DurableTier) -> Result<R, StorageError> + Send + 'static,
    {
        let backend = Arc::clone(tier);
        let name = backend.tier();
        let task = tokio::task::spawn_blocking(move || f(backend.as_ref()));

        let failure = match tokio::time::timeout(self.config.durable_timeout, task).await {
            Ok(Ok(Ok(value))) => return Some(value),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(e)) => format!("task failed: {e}"),
            Err(_) => format!("timed out after {:?}", self.config.durable_timeout),
        };

        self.counters.durable_failures.fetch_add(1, Ordering::Relaxed);
        warn!("{} tier {} failed, continuing memory-only: {}", name, op, failure);
        None
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("memory", &self.memory)
            .field(
                "durable",
                &self.durable.iter().map(|t| t.tier()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

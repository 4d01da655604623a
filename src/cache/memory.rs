//! Memory tier built on Moka.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;

use super::entry::CacheEntry;

/// Expires each entry after its own TTL so physical eviction follows
/// the logical expiry recorded in the entry.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_millis(value.ttl_ms()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Duration::from_millis(value.ttl_ms()))
    }
}

/// The fastest tier: a bounded in-process cache.
///
/// Cloning is cheap and shares the same underlying cache.
#[derive(Clone)]
pub struct MemoryTier {
    inner: Arc<Cache<String, CacheEntry>>,
}

impl MemoryTier {
    /// Create a memory tier holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self {
            inner: Arc::new(cache),
        }
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.inner.insert(entry.key.to_string(), entry);
    }

    /// Get an entry. Expiry against the logical clock is left to the caller.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key)
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_where(|key, _| key.starts_with(prefix))
    }

    /// Remove entries that are logically expired at `now_ms`.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        self.invalidate_where(|_, entry| entry.is_expired(now_ms))
    }

    fn invalidate_where(&self, predicate: impl Fn(&str, &CacheEntry) -> bool) -> usize {
        let doomed: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(key, entry)| predicate(key.as_str(), entry))
            .map(|(key, _)| key)
            .collect();

        for key in &doomed {
            self.inner.invalidate(key.as_str());
        }
        doomed.len()
    }

    /// Number of entries after applying pending evictions.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Tier;

    fn entry(key: &str, expires_at: u64) -> CacheEntry {
        CacheEntry {
            key: key.into(),
            value: "[]".into(),
            created_at: 0,
            expires_at,
            tier: Tier::Memory,
        }
    }

    #[test]
    fn test_invalidate_prefix_keeps_other_keys() {
        let tier = MemoryTier::new(100);
        tier.insert(entry("employees:getAll", 60_000));
        tier.insert(entry(r#"employees:getAll?{"team":"a"}"#, 60_000));
        tier.insert(entry("clients:getAll", 60_000));

        assert_eq!(tier.invalidate_prefix("employees:"), 2);
        assert!(tier.get("employees:getAll").is_none());
        assert!(tier.get("clients:getAll").is_some());
    }

    #[test]
    fn test_purge_expired() {
        let tier = MemoryTier::new(100);
        tier.insert(entry("a", 1_000));
        tier.insert(entry("b", 60_000));

        assert_eq!(tier.purge_expired(5_000), 1);
        assert!(tier.get("a").is_none());
        assert_eq!(tier.entry_count(), 1);
    }
}

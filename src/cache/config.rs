//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live for cache entries (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Configuration for a [`CacheStore`](super::CacheStore) instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held by the memory tier.
    pub max_capacity: u64,

    /// Time-to-live used when neither the caller nor the namespace policy
    /// provides one.
    pub default_ttl: Duration,

    /// Upper bound for a single durable-tier call.
    /// On timeout the call degrades to memory-only.
    pub durable_timeout: Duration,

    /// Root directory of the durable tiers. `None` runs memory-only.
    pub durable_dir: Option<PathBuf>,

    /// Byte quota of the scalar tier.
    pub scalar_quota_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            default_ttl: DEFAULT_TTL,
            durable_timeout: Duration::from_millis(250),
            durable_dir: None,
            scalar_quota_bytes: 5 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Create a memory-only config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set max capacity of the memory tier (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set the default time-to-live.
    #[must_use]
    pub fn default_ttl(mut self, duration: Duration) -> Self {
        self.default_ttl = duration;
        self
    }

    /// Set the per-call durable tier timeout.
    #[must_use]
    pub fn durable_timeout(mut self, duration: Duration) -> Self {
        self.durable_timeout = duration;
        self
    }

    /// Enable the durable tiers under `dir`.
    #[must_use]
    pub fn durable_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.durable_dir = Some(dir.into());
        self
    }

    /// Set the scalar tier quota.
    #[must_use]
    pub fn scalar_quota(mut self, bytes: usize) -> Self {
        self.scalar_quota_bytes = bytes;
        self
    }
}

/// Freshness policy attached to a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePolicy {
    /// Time-to-live for entries in the namespace.
    pub ttl: Duration,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl NamespacePolicy {
    /// Policy with an explicit TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Data that changes constantly during the day (attendance status).
    pub fn realtime() -> Self {
        Self::with_ttl(Duration::from_secs(30))
    }

    /// Regular working data (tasks, employees).
    pub fn standard() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Rarely changing reference data (clients, teams).
    pub fn reference() -> Self {
        Self::with_ttl(Duration::from_secs(3600))
    }

    /// Aggregates derived from other namespaces.
    /// Short TTL because dependents are also invalidated on writes.
    pub fn aggregate() -> Self {
        Self::with_ttl(Duration::from_secs(120))
    }
}

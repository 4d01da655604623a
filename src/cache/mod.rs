//! Cache module - tiered storage and get-or-fetch caching.
//!
//! ## Architecture
//!
//! - `CacheStore` - memory, structured (sled) and scalar (JSON file) tiers
//!   with fallback on miss and promotion on hit
//! - `CacheService` - canonical keys, TTL policy, request coalescing,
//!   pattern invalidation
//! - `NamespaceRegistry` - per-namespace TTL policy and derived namespaces
//!
//! ## Usage
//!
//! ```rust
//! let store = Arc::new(CacheStore::open(CacheConfig::default()));
//! let cache = CacheService::new(store, NamespaceRegistry::new());
//!
//! let open: Vec<Task> = cache
//!     .get_or_fetch("tasks:getAll", &filter, || fetch_tasks(filter.clone()), FetchOptions::default())
//!     .await?;
//! ```

mod clock;
mod config;
mod durable;
mod entry;
mod error;
mod fence;
mod key;
mod memory;
mod registry;
mod service;
mod store;

#[allow(unused_imports)]
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, NamespacePolicy};
#[allow(unused_imports)]
pub use durable::{DurableTier, ScalarTier, StructuredTier};
#[allow(unused_imports)]
pub use entry::{CacheEntry, CachePayload, PayloadKind, StoredEntry, Tier};
pub use error::{CacheError, StorageError};
#[allow(unused_imports)]
pub use key::derive_key;
pub use registry::NamespaceRegistry;
pub use service::{CacheService, FetchOptions, ServiceMetrics};
#[allow(unused_imports)]
pub use store::{CacheStore, SetOptions, StoreMetrics};

//! Durable cache tiers.
//!
//! Both tiers implement [`DurableTier`] with blocking calls. The store runs
//! them on the blocking pool under a timeout, so an implementation may do
//! plain file or embedded-database I/O.

mod scalar;
mod structured;

pub use scalar::ScalarTier;
pub use structured::StructuredTier;

use super::StorageError;
use super::entry::{StoredEntry, Tier};

/// A persistent key/value tier holding [`StoredEntry`] values.
pub trait DurableTier: Send + Sync + 'static {
    /// Which tier this backend implements.
    fn tier(&self) -> Tier;

    fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;

    fn write(&self, entry: &StoredEntry) -> Result<(), StorageError>;

    /// Returns `true` if an entry was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Remove every entry whose key starts with `prefix`.
    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Remove entries expired at `now_ms`, plus any that fail to decode.
    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError>;

    fn len(&self) -> Result<usize, StorageError>;

    /// Make buffered writes durable.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

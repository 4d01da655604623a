//! Cache entries and tier selection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scalar payloads up to this size go to the scalar tier.
pub const SCALAR_TIER_MAX_BYTES: usize = 4 * 1024;

/// Storage tier of an entry, ordered fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Structured,
    Scalar,
}

/// Declared shape of a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A list of records.
    Collection,
    /// A single structured record.
    Record,
    /// A string, number or boolean.
    Scalar,
}

impl Tier {
    /// Default durable tier for a payload of the given kind and encoded size.
    pub fn for_payload(kind: PayloadKind, encoded_len: usize) -> Self {
        match kind {
            PayloadKind::Collection | PayloadKind::Record => Tier::Structured,
            PayloadKind::Scalar if encoded_len <= SCALAR_TIER_MAX_BYTES => Tier::Scalar,
            PayloadKind::Scalar => Tier::Structured,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Structured => "structured",
            Tier::Scalar => "scalar",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types that can be cached, with their declared payload kind.
pub trait CachePayload {
    const KIND: PayloadKind;
}

impl<T> CachePayload for Vec<T> {
    const KIND: PayloadKind = PayloadKind::Collection;
}

impl<T> CachePayload for Option<T> {
    const KIND: PayloadKind = PayloadKind::Record;
}

impl<K, V> CachePayload for HashMap<K, V> {
    const KIND: PayloadKind = PayloadKind::Record;
}

impl<K, V> CachePayload for BTreeMap<K, V> {
    const KIND: PayloadKind = PayloadKind::Record;
}

impl CachePayload for serde_json::Value {
    const KIND: PayloadKind = PayloadKind::Record;
}

macro_rules! scalar_payload {
    ($($ty:ty),*) => {
        $(impl CachePayload for $ty {
            const KIND: PayloadKind = PayloadKind::Scalar;
        })*
    };
}

scalar_payload!(String, bool, i32, i64, u32, u64, usize, f64);

/// A logically live cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Arc<str>,
    /// Serialized payload (JSON text).
    pub value: Arc<str>,
    pub created_at: u64,
    pub expires_at: u64,
    /// Tier the entry was read from.
    pub tier: Tier,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn ttl_ms(&self) -> u64 {
        self.expires_at.saturating_sub(self.created_at)
    }

    pub(crate) fn to_stored(&self) -> StoredEntry {
        StoredEntry {
            key: self.key.to_string(),
            value: self.value.to_string(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Persisted layout of an entry in the durable tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl StoredEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub(crate) fn into_entry(self, tier: Tier) -> CacheEntry {
        CacheEntry {
            key: self.key.into(),
            value: self.value.into(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            tier,
        }
    }
}

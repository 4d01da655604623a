//! Remote collection seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A business record stored in a remote collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    /// Remote collection name, also the cache namespace prefix.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Equality filter over top-level record fields.
///
/// Serializes as a plain JSON object with sorted fields, so an empty filter
/// maps to the bare list namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value` (builder pattern).
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Whether a serialized record satisfies every condition.
    pub fn matches(&self, record: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

/// The remote source behind an [`OptimizedDataService`](super::OptimizedDataService).
#[async_trait]
pub trait RemoteCollection<T: Record>: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_all(&self, filter: &Filter) -> anyhow::Result<Vec<T>>;

    async fn fetch_one(&self, id: &str) -> anyhow::Result<Option<T>>;

    async fn insert(&self, record: &T) -> anyhow::Result<()>;

    /// Replace the record with `id`. Returns `false` if it did not exist.
    async fn replace(&self, id: &str, record: &T) -> anyhow::Result<bool>;

    /// Returns `false` if nothing was deleted.
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
}

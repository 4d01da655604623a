//! Cache error types.

use std::sync::Arc;

use thiserror::Error;

/// Failure of a durable tier. Never surfaced past [`CacheStore`](super::CacheStore).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("durable tier unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedded store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned to callers of the cache service.
///
/// Cloning is cheap; coalesced waiters all receive the same underlying error.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),

    #[error("fetch for {key} was aborted before completing")]
    FetchAborted { key: String },

    #[error("failed to encode payload: {0}")]
    Encode(Arc<serde_json::Error>),

    #[error("failed to decode cached payload for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl CacheError {
    pub(crate) fn encode(err: serde_json::Error) -> Self {
        Self::Encode(Arc::new(err))
    }

    pub(crate) fn decode(key: &str, err: serde_json::Error) -> Self {
        Self::Decode {
            key: key.to_string(),
            source: Arc::new(err),
        }
    }

    /// The shared fetch error, if this is a fetch failure.
    #[allow(dead_code)]
    pub fn fetch_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

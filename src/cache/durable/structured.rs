//! Structured tier: an embedded sled database, one tree per namespace.

use std::path::Path;

use tracing::debug;

use super::DurableTier;
use crate::cache::StorageError;
use crate::cache::entry::{StoredEntry, Tier};
use crate::cache::key::namespace_of;

/// Name sled gives its default tree. Entries never live there.
const DEFAULT_TREE: &[u8] = b"__sled__default";

/// Large-object tier for collections and records.
#[derive(Debug, Clone)]
pub struct StructuredTier {
    db: sled::Db,
}

impl StructuredTier {
    /// Open (or create) the database under `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::Config::default().path(path).open()?;
        debug!("Opened structured cache tier at {}", path.display());
        Ok(Self { db })
    }

    /// Open a database that is deleted when dropped.
    #[allow(dead_code)]
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree_for(&self, key: &str) -> Result<sled::Tree, StorageError> {
        Ok(self.db.open_tree(namespace_of(key))?)
    }

    fn trees(&self) -> Result<Vec<sled::Tree>, StorageError> {
        self.db
            .tree_names()
            .into_iter()
            .filter(|name| &name[..] != DEFAULT_TREE)
            .map(|name| self.db.open_tree(name).map_err(StorageError::from))
            .collect()
    }
}

impl DurableTier for StructuredTier {
    fn tier(&self) -> Tier {
        Tier::Structured
    }

    fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let tree = self.tree_for(key)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, entry: &StoredEntry) -> Result<(), StorageError> {
        let tree = self.tree_for(&entry.key)?;
        let bytes = serde_json::to_vec(entry)?;
        tree.insert(entry.key.as_bytes(), bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let tree = self.tree_for(key)?;
        Ok(tree.remove(key.as_bytes())?.is_some())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        for tree in self.trees()? {
            let keys: Vec<sled::IVec> = tree
                .scan_prefix(prefix.as_bytes())
                .keys()
                .collect::<Result<_, _>>()?;
            for key in keys {
                if tree.remove(key)?.is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let mut removed = 0;
        for tree in self.trees()? {
            let mut doomed = Vec::new();
            for item in tree.iter() {
                let (key, value) = item?;
                match serde_json::from_slice::<StoredEntry>(&value) {
                    Ok(entry) if !entry.is_expired(now_ms) => {}
                    _ => doomed.push(key),
                }
            }
            for key in doomed {
                if tree.remove(key)?.is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.trees()?.iter().map(sled::Tree::len).sum())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

//! Scalar tier: flat `key -> serialized entry` pairs in a single JSON file.
//!
//! The whole map is kept in memory and rewritten on every change
//! (temp file + rename). Total key and value bytes are capped by a quota.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::DurableTier;
use crate::cache::StorageError;
use crate::cache::entry::{StoredEntry, Tier};

/// Small-value tier for strings, numbers and flags.
#[derive(Debug)]
pub struct ScalarTier {
    path: PathBuf,
    quota_bytes: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ScalarTier {
    /// Open the tier backed by the file at `path`.
    ///
    /// A missing file starts empty. An unreadable file is discarded with a
    /// warning; it only ever holds cached data.
    pub fn open(path: impl Into<PathBuf>, quota_bytes: usize) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt scalar cache file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened scalar cache tier at {} ({} entries)", path.display(), entries.len());

        Ok(Self {
            path,
            quota_bytes,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Bytes currently charged against the quota.
    pub fn used_bytes(&self) -> usize {
        used_bytes(&self.entries.lock())
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

fn drop_expired(entries: &mut BTreeMap<String, String>, now_ms: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, raw| {
        serde_json::from_str::<StoredEntry>(raw).is_ok_and(|entry| !entry.is_expired(now_ms))
    });
    before - entries.len()
}

impl DurableTier for ScalarTier {
    fn tier(&self) -> Tier {
        Tier::Scalar
    }

    fn read(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn write(&self, entry: &StoredEntry) -> Result<(), StorageError> {
        let raw = serde_json::to_string(entry)?;
        let mut entries = self.entries.lock();

        let current = used_bytes(&entries)
            - entries.get(&entry.key).map_or(0, |old| entry.key.len() + old.len());
        let needed = entry.key.len() + raw.len();

        if current + needed > self.quota_bytes {
            // Reclaim space held by expired entries before giving up.
            let reclaimed = drop_expired(&mut entries, entry.created_at);
            let current = used_bytes(&entries)
                - entries.get(&entry.key).map_or(0, |old| entry.key.len() + old.len());
            if current + needed > self.quota_bytes {
                if reclaimed > 0 {
                    self.persist(&entries)?;
                }
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: self.quota_bytes.saturating_sub(current),
                });
            }
        }

        let previous = entries.insert(entry.key.clone(), raw);
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(entry.key.clone(), old),
                None => entries.remove(&entry.key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock();
        let removed = drop_expired(&mut entries, now_ms);
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().len())
    }
}

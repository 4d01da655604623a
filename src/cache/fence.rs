//! Invalidation fence.
//!
//! Every delete records the invalidated prefix under a new epoch. A writer
//! snapshots the epoch before it starts producing a value and checks the
//! fence, under the read lock, right before each tier write. A delete takes
//! the write lock to record itself, so it waits for writes already in
//! progress, and writes that start later see it and are skipped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Invalidations kept for checking stale writers. Writers older than the
/// oldest retained record are treated as stale.
const HISTORY: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct Fence {
    epoch: AtomicU64,
    records: RwLock<VecDeque<(u64, Box<str>)>>,
}

/// Read guard over the fence records.
pub(crate) struct FenceGuard<'a> {
    records: parking_lot::RwLockReadGuard<'a, VecDeque<(u64, Box<str>)>>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch, the snapshot a writer passes back to [`FenceGuard::is_stale`].
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Record that every key starting with `prefix` was invalidated.
    ///
    /// Blocks until writes holding a [`FenceGuard`] have finished.
    pub fn record(&self, prefix: &str) {
        let mut records = self.records.write();
        let epoch = self.epoch.load(Ordering::Acquire) + 1;
        if records.len() == HISTORY {
            records.pop_front();
        }
        records.push_back((epoch, prefix.into()));
        self.epoch.store(epoch, Ordering::Release);
    }

    pub fn read(&self) -> FenceGuard<'_> {
        FenceGuard {
            records: self.records.read(),
        }
    }

    /// Like [`Fence::read`], but `None` while a delete is waiting to record.
    pub fn try_read(&self) -> Option<FenceGuard<'_>> {
        self.records.try_read().map(|records| FenceGuard { records })
    }
}

impl FenceGuard<'_> {
    /// Whether `key` was invalidated after epoch `since`.
    pub fn is_stale(&self, since: u64, key: &str) -> bool {
        let Some(&(newest, _)) = self.records.back() else {
            return false;
        };
        if newest <= since {
            return false;
        }
        if self.records.front().is_some_and(|&(oldest, _)| oldest > since + 1) {
            return true;
        }
        self.records
            .iter()
            .rev()
            .take_while(|(epoch, _)| *epoch > since)
            .any(|(_, prefix)| key.starts_with(&**prefix))
    }
}

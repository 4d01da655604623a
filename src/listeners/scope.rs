//! Disposable listener scopes.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::manager::{CleanupHandle, ListenerManager, SubscriptionError, Unsubscribe};

/// Groups registrations that share a lifetime, such as one dashboard view.
///
/// Disposing the scope, explicitly or by dropping it, cleans up every
/// registration made through it.
pub struct ListenerScope {
    name: String,
    manager: ListenerManager,
    handles: Mutex<Vec<CleanupHandle>>,
    disposed: AtomicBool,
}

impl ListenerScope {
    pub(super) fn new(name: &str, manager: ListenerManager) -> Self {
        Self {
            name: name.to_string(),
            manager,
            handles: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Register through the manager and tie the registration to this scope.
    pub fn register<F>(&self, id: &str, subscribe: F) -> Result<CleanupHandle, SubscriptionError>
    where
        F: FnOnce() -> anyhow::Result<Unsubscribe>,
    {
        if self.is_disposed() {
            return Err(SubscriptionError::ScopeDisposed {
                scope: self.name.clone(),
                id: id.to_string(),
            });
        }

        let handle = self.manager.register(id, subscribe)?;
        let mut handles = self.handles.lock();
        handles.retain(CleanupHandle::is_live);
        handles.push(handle.clone());
        Ok(handle)
    }

    /// Clean up every registration made in this scope.
    /// Returns how many subscriptions were torn down by this call.
    pub fn dispose(&self) -> usize {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let handles: Vec<CleanupHandle> = self.handles.lock().drain(..).collect();
        let torn_down = handles.iter().filter(|handle| handle.cleanup()).count();

        debug!("Disposed listener scope '{}' ({} torn down)", self.name, torn_down);
        torn_down
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ListenerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerScope")
            .field("name", &self.name)
            .field("registrations", &self.handles.lock().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

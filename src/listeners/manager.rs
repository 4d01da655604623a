//! Listener manager - single registration point for live subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::scope::ListenerScope;
use super::throttle::{ThrottleMark, ThrottledCallback};

/// Tears down one underlying subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Box a closure as an [`Unsubscribe`].
pub fn unsubscribe_fn(f: impl FnOnce() + Send + 'static) -> Unsubscribe {
    Box::new(f)
}

/// Errors raised while registering a listener.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscribe for listener '{id}' failed: {reason:#}")]
    Failed { id: String, reason: anyhow::Error },

    #[error("scope '{scope}' is disposed; listener '{id}' was not registered")]
    ScopeDisposed { scope: String, id: String },
}

struct Registration {
    token: u64,
    unsubscribe: Unsubscribe,
    registered_at: Instant,
}

pub(super) struct ManagerState {
    registrations: Mutex<HashMap<String, Registration>>,
    next_token: AtomicU64,
    /// Last invocation per throttled callback id, while a wrapper for it lives.
    pub(super) throttle_marks: Arc<DashMap<String, ThrottleMark>>,
}

/// Active listener statistics, used for leak detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub active_count: usize,
    /// Sorted ids of active registrations.
    pub ids: Vec<String>,
}

/// Registry of live subscriptions.
///
/// Guarantees at most one live subscription per id, and cleanup handles that
/// are safe to call any number of times.
#[derive(Clone)]
pub struct ListenerManager {
    inner: Arc<ManagerState>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerState {
                registrations: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
                throttle_marks: Arc::new(DashMap::new()),
            }),
        }
    }

    /// Register a subscription under `id`.
    ///
    /// An existing registration for `id` is torn down before `subscribe`
    /// runs. If `subscribe` fails nothing is stored and the error is returned.
    pub fn register<F>(&self, id: &str, subscribe: F) -> Result<CleanupHandle, SubscriptionError>
    where
        F: FnOnce() -> anyhow::Result<Unsubscribe>,
    {
        if let Some(previous) = self.take(id, None) {
            debug!("Replacing listener '{}'", id);
            (previous.unsubscribe)();
        }

        let unsubscribe = subscribe().map_err(|reason| SubscriptionError::Failed {
            id: id.to_string(),
            reason,
        })?;

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let displaced = self.inner.registrations.lock().insert(
            id.to_string(),
            Registration {
                token,
                unsubscribe,
                registered_at: Instant::now(),
            },
        );

        if let Some(displaced) = displaced {
            warn!("Listener '{}' was registered concurrently, tearing down the older one", id);
            (displaced.unsubscribe)();
        }

        debug!("Registered listener '{}'", id);

        Ok(CleanupHandle {
            id: Arc::from(id),
            token,
            manager: Arc::downgrade(&self.inner),
            done: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Tear down the registration for `id`, whoever registered it.
    #[allow(dead_code)]
    pub fn unregister(&self, id: &str) -> bool {
        match self.take(id, None) {
            Some(registration) => {
                (registration.unsubscribe)();
                debug!("Unregistered listener '{}'", id);
                true
            }
            None => false,
        }
    }

    /// Tear down every registration. Returns how many were active.
    pub fn cleanup_all(&self) -> usize {
        let drained: Vec<(String, Registration)> =
            self.inner.registrations.lock().drain().collect();
        let count = drained.len();

        for (id, registration) in drained {
            debug!("Cleaning up listener '{}' (active {:?})", id, registration.registered_at.elapsed());
            (registration.unsubscribe)();
        }
        for mut mark in self.inner.throttle_marks.iter_mut() {
            mark.reset();
        }

        if count > 0 {
            info!("Cleaned up {} active listener(s)", count);
        }
        count
    }

    /// Wrap `callback` so it runs at most once per `min_interval` for `id`.
    ///
    /// The first call in a quiet period runs immediately. Calls inside the
    /// window replace a single buffered argument, which is delivered once
    /// when the window reopens. Must be called from within a Tokio runtime.
    pub fn create_throttled_callback<T, F>(
        &self,
        id: &str,
        callback: F,
        min_interval: Duration,
    ) -> ThrottledCallback<T>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        ThrottledCallback::new(
            id,
            Box::new(callback),
            min_interval,
            Arc::clone(&self.inner.throttle_marks),
        )
    }

    /// A disposable scope whose registrations are torn down together.
    pub fn scope(&self, name: &str) -> ListenerScope {
        ListenerScope::new(name, self.clone())
    }

    /// Ids with a live throttled callback.
    #[cfg(test)]
    pub(super) fn throttled_ids(&self) -> usize {
        self.inner.throttle_marks.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.registrations.lock().contains_key(id)
    }

    pub fn stats(&self) -> ListenerStats {
        let registrations = self.inner.registrations.lock();
        let mut ids: Vec<String> = registrations.keys().cloned().collect();
        ids.sort();
        ListenerStats {
            active_count: ids.len(),
            ids,
        }
    }

    /// Remove the registration for `id`, only if it carries `token` when given.
    fn take(&self, id: &str, token: Option<u64>) -> Option<Registration> {
        take_registration(&self.inner, id, token)
    }
}

fn take_registration(state: &ManagerState, id: &str, token: Option<u64>) -> Option<Registration> {
    let mut registrations = state.registrations.lock();
    let matches = registrations
        .get(id)
        .is_some_and(|current| token.is_none_or(|token| token == current.token));
    if matches { registrations.remove(id) } else { None }
}

impl Drop for ManagerState {
    fn drop(&mut self) {
        for (id, registration) in self.registrations.get_mut().drain() {
            debug!("Tearing down listener '{}' with its manager", id);
            (registration.unsubscribe)();
        }
    }
}

impl Default for ListenerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ListenerManager")
            .field("active_count", &stats.active_count)
            .field("ids", &stats.ids)
            .finish()
    }
}

/// Idempotent teardown for one registration.
///
/// Clones share the same state; only the first `cleanup` across all clones
/// does anything. A handle whose registration was already replaced under the
/// same id leaves the newer registration alone.
#[derive(Clone)]
pub struct CleanupHandle {
    id: Arc<str>,
    token: u64,
    manager: Weak<ManagerState>,
    done: Arc<AtomicBool>,
}

impl CleanupHandle {
    /// Tear down the subscription. Returns `true` if this call unsubscribed.
    pub fn cleanup(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(state) = self.manager.upgrade() else {
            return false;
        };

        match take_registration(&state, &self.id, Some(self.token)) {
            Some(registration) => {
                (registration.unsubscribe)();
                debug!(
                    "Cleaned up listener '{}' after {:?}",
                    self.id,
                    registration.registered_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Whether the registration this handle was issued for is still active.
    /// `false` once cleaned up, replaced under the same id, or removed.
    pub fn is_live(&self) -> bool {
        if self.is_cleaned_up() {
            return false;
        }
        self.manager.upgrade().is_some_and(|state| {
            state
                .registrations
                .lock()
                .get(&*self.id)
                .is_some_and(|current| current.token == self.token)
        })
    }
}

impl std::fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("id", &self.id)
            .field("cleaned_up", &self.is_cleaned_up())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn tracked(log: &EventLog, name: &'static str) -> impl FnOnce() -> anyhow::Result<Unsubscribe> + use<> {
        let log = Arc::clone(log);
        move || {
            log.lock().push(format!("subscribe {name}"));
            let log = Arc::clone(&log);
            Ok(unsubscribe_fn(move || log.lock().push(format!("unsubscribe {name}"))))
        }
    }

    #[test]
    fn test_reregister_tears_down_previous_first() {
        let manager = ListenerManager::new();
        let log: EventLog = Arc::default();

        manager.register("attendance-status", tracked(&log, "A")).unwrap();
        manager.register("attendance-status", tracked(&log, "B")).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["subscribe A", "unsubscribe A", "subscribe B"]
        );
        assert_eq!(manager.stats().active_count, 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let manager = ListenerManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = manager
            .register("tasks-feed", move || {
                Ok(unsubscribe_fn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            })
            .unwrap();

        assert!(handle.cleanup());
        assert!(!handle.cleanup());
        assert!(!handle.clone().cleanup());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_active("tasks-feed"));
    }

    #[test]
    fn test_stale_handle_leaves_newer_registration() {
        let manager = ListenerManager::new();
        let log: EventLog = Arc::default();

        let first = manager.register("team-feed", tracked(&log, "A")).unwrap();
        let _second = manager.register("team-feed", tracked(&log, "B")).unwrap();

        assert!(!first.is_live());
        assert!(!first.cleanup());
        assert!(manager.is_active("team-feed"));
        assert_eq!(log.lock().iter().filter(|e| *e == "unsubscribe B").count(), 0);
    }

    #[test]
    fn test_failed_subscribe_leaves_no_registration() {
        let manager = ListenerManager::new();

        let err = manager
            .register("clients-feed", || Err(anyhow::anyhow!("permission denied")))
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Failed { ref id, .. } if id == "clients-feed"));
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(manager.stats().active_count, 0);
    }

    #[test]
    fn test_stats_and_cleanup_all() {
        let manager = ListenerManager::new();
        let log: EventLog = Arc::default();

        manager.register("tasks-feed", tracked(&log, "T")).unwrap();
        manager.register("attendance-status", tracked(&log, "A")).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.ids, vec!["attendance-status", "tasks-feed"]);

        assert_eq!(manager.cleanup_all(), 2);
        assert_eq!(manager.stats().active_count, 0);
        assert_eq!(log.lock().iter().filter(|e| e.starts_with("unsubscribe")).count(), 2);
    }

    #[test]
    fn test_handle_outliving_manager_is_harmless() {
        let manager = ListenerManager::new();
        let handle = manager
            .register("orphan", || Ok(unsubscribe_fn(|| {})))
            .unwrap();
        drop(manager);

        // The manager tore the subscription down when it was dropped.
        assert!(!handle.cleanup());
        assert!(handle.is_cleaned_up());
    }
}

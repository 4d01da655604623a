//! Trailing-edge throttle for listener callbacks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Shared window state for one throttled id.
#[derive(Debug, Default)]
pub(super) struct ThrottleMark {
    last: Option<Instant>,
    /// Live wrappers for the id; the mark is dropped with the last one.
    wrappers: usize,
}

impl ThrottleMark {
    /// Forget the last invocation, opening the window.
    pub(super) fn reset(&mut self) {
        self.last = None;
    }
}

struct Pending<T> {
    value: Option<T>,
    timer_armed: bool,
}

struct ThrottleInner<T> {
    id: String,
    min_interval: Duration,
    callback: Callback<T>,
    /// Last invocation per id, shared by every wrapper created for the same id.
    marks: Arc<DashMap<String, ThrottleMark>>,
    pending: Mutex<Pending<T>>,
}

impl<T> ThrottleInner<T> {
    fn next_allowed(&self) -> Option<Instant> {
        self.marks
            .get(&self.id)
            .and_then(|mark| mark.last)
            .map(|last| last + self.min_interval)
    }

    fn mark(&self, now: Instant) {
        self.marks.entry(self.id.clone()).or_default().last = Some(now);
    }

    /// Deliver the buffered value if the window is open, otherwise report
    /// when to try again.
    fn fire_or_reschedule(&self) -> Option<Instant> {
        let mut pending = self.pending.lock();
        let now = Instant::now();

        if let Some(at) = self.next_allowed()
            && now < at
        {
            return Some(at);
        }

        pending.timer_armed = false;
        let value = pending.value.take()?;
        self.mark(now);
        drop(pending);

        debug!("Throttled callback '{}' fired (trailing)", self.id);
        (self.callback)(value);
        None
    }
}

/// A callback wrapper that runs at most once per window.
///
/// Dropping every clone discards a buffered value that has not fired yet.
pub struct ThrottledCallback<T> {
    inner: Arc<ThrottleInner<T>>,
}

impl<T> Clone for ThrottledCallback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ThrottledCallback<T> {
    pub(super) fn new(
        id: &str,
        callback: Callback<T>,
        min_interval: Duration,
        marks: Arc<DashMap<String, ThrottleMark>>,
    ) -> Self {
        marks.entry(id.to_string()).or_default().wrappers += 1;
        Self {
            inner: Arc::new(ThrottleInner {
                id: id.to_string(),
                min_interval,
                callback,
                marks,
                pending: Mutex::new(Pending {
                    value: None,
                    timer_armed: false,
                }),
            }),
        }
    }

    /// Invoke now if the window is open, otherwise buffer `value` for the
    /// trailing call, replacing anything buffered before it.
    pub fn call(&self, value: T) {
        let mut pending = self.inner.pending.lock();
        let now = Instant::now();

        match self.inner.next_allowed() {
            Some(at) if now < at => {
                pending.value = Some(value);
                if !pending.timer_armed {
                    pending.timer_armed = true;
                    self.arm(at);
                }
            }
            _ => {
                // A newer value supersedes anything still buffered.
                pending.value = None;
                self.inner.mark(now);
                drop(pending);
                (self.inner.callback)(value);
            }
        }
    }

    /// Drop any buffered value without invoking the callback.
    #[allow(dead_code)]
    pub fn cancel(&self) {
        self.inner.pending.lock().value = None;
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    fn arm(&self, at: Instant) {
        let weak: Weak<ThrottleInner<T>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut deadline = at;
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match inner.fire_or_reschedule() {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        });
    }
}

impl<T> Drop for ThrottleInner<T> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut mark) = self.marks.entry(self.id.clone()) {
            let remaining = mark.get().wrappers.saturating_sub(1);
            if remaining == 0 {
                mark.remove();
            } else {
                mark.get_mut().wrappers = remaining;
            }
        }
    }
}

impl<T> std::fmt::Debug for ThrottledCallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledCallback")
            .field("id", &self.inner.id)
            .field("min_interval", &self.inner.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::listeners::ListenerManager;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v| sink.lock().push(v))
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_call_uses_most_recent_value() {
        let manager = ListenerManager::new();
        let (seen, callback) = recorder();
        let throttled =
            manager.create_throttled_callback("attendance-status", callback, Duration::from_millis(1_000));

        throttled.call(0);
        throttled.call(1);
        throttled.call(2);
        throttled.call(3);
        assert_eq!(*seen.lock(), vec![0]);

        sleep(Duration::from_millis(999)).await;
        assert_eq!(*seen.lock(), vec![0]);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(*seen.lock(), vec![0, 3]);

        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_fires_immediately() {
        let manager = ListenerManager::new();
        let (seen, callback) = recorder();
        let throttled = manager.create_throttled_callback("tasks-feed", callback, Duration::from_millis(100));

        throttled.call(1);
        sleep(Duration::from_millis(150)).await;
        throttled.call(2);

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_per_window() {
        let manager = ListenerManager::new();
        let (seen, callback) = recorder();
        let throttled = manager.create_throttled_callback("tasks-feed", callback, Duration::from_millis(100));

        for i in 0..50 {
            throttled.call(i);
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(200)).await;

        let seen = seen.lock();
        // 500ms of calls at 10ms spacing: one leading call plus one per window.
        assert!(seen.len() <= 6, "fired {} times", seen.len());
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&49));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wrapper_discards_pending_value() {
        let manager = ListenerManager::new();
        let (seen, callback) = recorder();
        let throttled = manager.create_throttled_callback("team-feed", callback, Duration::from_millis(100));

        throttled.call(1);
        throttled.call(2);
        drop(throttled);
        sleep(Duration::from_millis(300)).await;

        assert_eq!(*seen.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_shared_per_id() {
        let manager = ListenerManager::new();
        let (seen_a, callback_a) = recorder();
        let (seen_b, callback_b) = recorder();
        let a = manager.create_throttled_callback("clients-feed", callback_a, Duration::from_millis(100));
        let b = manager.create_throttled_callback("clients-feed", callback_b, Duration::from_millis(100));

        a.call(1);
        b.call(2);
        assert_eq!(*seen_a.lock(), vec![1]);
        assert!(seen_b.lock().is_empty());

        sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen_b.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_dropped_with_last_wrapper() {
        let manager = ListenerManager::new();
        let (_, callback_a) = recorder();
        let (_, callback_b) = recorder();
        let a = manager.create_throttled_callback("tasks-feed", callback_a, Duration::from_millis(100));
        let b = manager.create_throttled_callback("tasks-feed", callback_b, Duration::from_millis(100));
        a.call(1);
        assert_eq!(manager.throttled_ids(), 1);

        drop(a);
        assert_eq!(manager.throttled_ids(), 1);
        drop(b);
        assert_eq!(manager.throttled_ids(), 0);
    }
}


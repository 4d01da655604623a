//! Change feed - MongoDB change streams as listener subscriptions.

use std::future::Future;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use mongodb::bson::{Bson, Document};
use mongodb::change_stream::event::ChangeStreamEvent;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::listeners::{CleanupHandle, ListenerScope, SubscriptionError, ThrottledCallback, unsubscribe_fn};

use super::{Database, Repositories};

/// A change pushed by the server for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    /// Lowercase operation name (`insert`, `update`, `replace`, `delete`, ...)
    pub operation: String,
    pub document_id: Option<String>,
}

impl ChangeEvent {
    fn from_stream(collection: &str, event: &ChangeStreamEvent<Document>) -> Self {
        Self {
            collection: collection.to_string(),
            operation: format!("{:?}", event.operation_type).to_lowercase(),
            document_id: event
                .document_key
                .as_ref()
                .and_then(|key| key.get("_id"))
                .map(id_to_string),
        }
    }
}

fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Events of one open change stream.
pub type ChangeStream = BoxStream<'static, anyhow::Result<ChangeEvent>>;

/// Open a change stream on `collection`.
///
/// Change streams need a replica set, so this fails on a standalone server.
pub async fn open_change_stream(db: &Database, collection: &str) -> anyhow::Result<ChangeStream> {
    let stream = db
        .collection::<Document>(collection)
        .watch()
        .await
        .with_context(|| format!("could not open change stream for {collection}"))?;

    let name = collection.to_string();
    Ok(stream
        .map(move |event| {
            event
                .map(|event| ChangeEvent::from_stream(&name, &event))
                .map_err(anyhow::Error::from)
        })
        .boxed())
}

/// Register the feed `opened` under `id` in `scope`, running `on_change` for
/// every event in order.
///
/// A failed open is returned as [`SubscriptionError::Failed`] and nothing is
/// registered. When the stream ends or fails the registration removes itself.
pub fn subscribe_feed<F, Fut>(
    scope: &ListenerScope,
    id: &str,
    opened: anyhow::Result<ChangeStream>,
    on_change: F,
) -> Result<CleanupHandle, SubscriptionError>
where
    F: Fn(ChangeEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (registered_tx, registered_rx) = oneshot::channel::<CleanupHandle>();
    let feed_id = id.to_string();

    let handle = scope.register(id, move || {
        let mut stream = opened?;
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => on_change(event).await,
                    Err(e) => {
                        warn!("Change feed '{}' failed: {:#}", feed_id, e);
                        break;
                    }
                }
            }
            debug!("Change feed '{}' closed", feed_id);

            if let Ok(registration) = registered_rx.await {
                registration.cleanup();
            }
        });
        Ok(unsubscribe_fn(move || task.abort()))
    })?;

    // Fails only if the feed task is already gone.
    registered_tx.send(handle.clone()).ok();
    Ok(handle)
}

/// Change handler that drops the changed collection's cached reads, then
/// hands the event to `notify`.
pub fn invalidate_then_notify(
    repos: Repositories,
    notify: ThrottledCallback<ChangeEvent>,
) -> impl Fn(ChangeEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    move |event| {
        let repos = repos.clone();
        let notify = notify.clone();
        async move {
            match repos.invalidate_collection(&event.collection).await {
                Some(removed) => debug!("{} changed, dropped {} cached read(s)", event.collection, removed),
                None => warn!("Change event for unknown collection {}", event.collection),
            }
            notify.call(event);
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mongodb::bson::oid::ObjectId;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    use crate::cache::{CacheConfig, CacheService, CacheStore, ManualClock, NamespaceRegistry};
    use crate::data::fake::MemoryCollection;
    use crate::data::{Filter, GetAllOptions};
    use crate::database::models::{AttendanceRecord, Client, Employee, Task, Team};
    use crate::listeners::ListenerManager;

    fn event(collection: &str) -> ChangeEvent {
        ChangeEvent {
            collection: collection.to_string(),
            operation: "update".to_string(),
            document_id: None,
        }
    }

    fn counting(calls: &Arc<AtomicUsize>) -> impl Fn(ChangeEvent) -> BoxFuture<'static, ()> + use<> {
        let calls = Arc::clone(calls);
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        }
    }

    #[test]
    fn test_id_to_string() {
        let oid = ObjectId::new();
        assert_eq!(id_to_string(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(id_to_string(&Bson::String("abc".into())), "abc");
        assert_eq!(id_to_string(&Bson::Int32(7)), "7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_registers_nothing() {
        let manager = ListenerManager::new();
        let scope = manager.scope("change-feeds");
        let calls = Arc::new(AtomicUsize::new(0));

        let err = subscribe_feed(
            &scope,
            "tasks-feed",
            Err(anyhow::anyhow!("change streams require a replica set")),
            counting(&calls),
        )
        .unwrap_err();

        assert!(matches!(err, SubscriptionError::Failed { ref id, .. } if id == "tasks-feed"));
        assert!(err.to_string().contains("replica set"));
        assert_eq!(manager.stats().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stream_removes_registration() {
        let manager = ListenerManager::new();
        let scope = manager.scope("change-feeds");
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = futures::stream::iter(vec![Ok(event("tasks")), Err(anyhow::anyhow!("cursor killed"))]).boxed();

        let handle = subscribe_feed(&scope, "tasks-feed", Ok(stream), counting(&calls)).unwrap();
        assert!(manager.is_active("tasks-feed"));

        sleep(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_active("tasks-feed"));
        assert!(handle.is_cleaned_up());
        assert!(manager.stats().ids.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_feed_stays_until_disposed() {
        let manager = ListenerManager::new();
        let scope = manager.scope("change-feeds");
        let calls = Arc::new(AtomicUsize::new(0));

        subscribe_feed(&scope, "clients-feed", Ok(futures::stream::pending().boxed()), counting(&calls)).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(manager.is_active("clients-feed"));

        assert_eq!(scope.dispose(), 1);
        assert!(!manager.is_active("clients-feed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_is_invalidated_before_notification() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let store = CacheStore::memory_only(CacheConfig::default(), clock);
        let cache = Arc::new(CacheService::new(Arc::new(store), NamespaceRegistry::new()));
        let repos = Repositories::from_sources(
            Arc::clone(&cache),
            Arc::new(MemoryCollection::<Employee>::with(vec![Employee::new("Ada", "ada@example.com")])),
            Arc::new(MemoryCollection::<Team>::with(vec![])),
            Arc::new(MemoryCollection::<Client>::with(vec![])),
            Arc::new(MemoryCollection::<Task>::with(vec![])),
            Arc::new(MemoryCollection::<AttendanceRecord>::with(vec![])),
        );
        repos.employees.get_all(&Filter::new(), GetAllOptions::default()).await.unwrap();

        let manager = ListenerManager::new();
        let scope = manager.scope("change-feeds");
        let invalidations_at_notify = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&invalidations_at_notify);
        let observed = Arc::clone(&cache);
        let notify = manager.create_throttled_callback(
            "employees-feed",
            move |_: ChangeEvent| seen.lock().push(observed.metrics().invalidations),
            Duration::from_secs(1),
        );

        let stream = futures::stream::iter(vec![Ok(event("employees"))]).boxed();
        subscribe_feed(&scope, "employees-feed", Ok(stream), invalidate_then_notify(repos.clone(), notify)).unwrap();
        sleep(Duration::from_millis(10)).await;

        let seen = invalidations_at_notify.lock().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0] > 0, "notified before the cache was invalidated");
        assert!(
            cache
                .peek::<Vec<Employee>, _>("employees:getAll", &Filter::new())
                .await
                .unwrap()
                .is_none()
        );
    }
}

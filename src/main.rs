//! Workboard - data layer for a task and attendance dashboard.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `cache` - Tiered cache store and get-or-fetch service
//! - `data` - Cached collection services and the dashboard aggregate
//! - `database` - MongoDB collections, change feeds, repositories
//! - `listeners` - Real-time subscription lifecycle and throttling

mod cache;
mod config;
mod data;
mod database;
mod listeners;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cache::{CacheService, CacheStore, NamespaceRegistry};
use config::Config;
use data::{Filter, GetAllOptions, Record};
use database::models::{AttendanceRecord, Client, Employee, Task, TaskStatus, Team};
use database::{ChangeEvent, Database};
use listeners::ListenerScope;
use state::AppState;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Collections whose change streams drive UI notifications.
const WATCHED_COLLECTIONS: [&str; 5] = [
    AttendanceRecord::COLLECTION,
    Task::COLLECTION,
    Employee::COLLECTION,
    Client::COLLECTION,
    Team::COLLECTION,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("workboard=info,mongodb=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Workboard...");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    info!("Connecting to MongoDB...");
    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    info!("Database connected");

    let store = Arc::new(CacheStore::open(config.cache_config()));
    let cache = Arc::new(CacheService::new(Arc::clone(&store), NamespaceRegistry::new()));
    info!(
        "Cache initialized ({} durable)",
        if config.cache_durable { "with" } else { "without" }
    );

    let state = AppState::new(db, cache);

    // Warm the dashboard so the first view is served from cache
    match state.repos.dashboard.stats().await {
        Ok(stats) => info!(
            "Dashboard: {} active employees, {} open tasks, {} present today",
            stats.active_employees, stats.open_tasks, stats.present_today
        ),
        Err(e) => warn!("Could not warm dashboard: {:#}", e),
    }
    let open_tasks = Filter::new().eq("status", TaskStatus::Open.as_str());
    if let Err(e) = state.repos.tasks.get_all(&open_tasks, GetAllOptions::default()).await {
        warn!("Could not warm open tasks: {:#}", e);
    }

    let feeds = state.listeners.scope("change-feeds");
    watch_collections(&state, &feeds, config.listener_throttle).await;

    let sweeper = spawn_sweeper(state.clone(), config.cache_sweep_interval);

    info!("Workboard is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    sweeper.abort();
    let disposed = feeds.dispose();
    let leftover = state.listeners.cleanup_all();
    info!("Listeners stopped ({} in scope, {} left over)", disposed, leftover);

    store.flush().await;
    state.db.shutdown().await;
    info!("Goodbye");

    Ok(())
}

/// Subscribe to every watched collection.
///
/// Each change invalidates the collection's cached reads before the
/// throttled UI notification goes out.
async fn watch_collections(state: &AppState, scope: &ListenerScope, throttle: Duration) {
    for collection in WATCHED_COLLECTIONS {
        let id = format!("{collection}-feed");
        let notify = state.listeners.create_throttled_callback(&id, notify_ui, throttle);
        let handler = database::invalidate_then_notify(state.repos.clone(), notify);
        let opened = database::open_change_stream(&state.db, collection).await;

        match database::subscribe_feed(scope, &id, opened, handler) {
            Ok(_) => info!("Watching {} for changes", collection),
            Err(e) => warn!("Could not watch {}: {}", collection, e),
        }
    }
}

fn notify_ui(event: ChangeEvent) {
    info!(
        "Notify UI: {} changed ({}{})",
        event.collection,
        event.operation,
        event
            .document_id
            .map(|id| format!(" {id}"))
            .unwrap_or_default()
    );
}

/// Periodically purge expired entries and log layer stats.
fn spawn_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = state.cache.store().purge_expired().await;
            let stats = state.stats();
            info!(
                "Sweep: purged {} expired, {} in memory, {} hit(s) / {} miss(es), {} listener(s) active, {} fetch(es) in flight",
                purged,
                stats.memory_entry_count,
                stats.cache.hits,
                stats.cache.misses,
                stats.active_listener_count,
                stats.in_flight_fetches
            );
            debug!("Active listeners: {:?}", stats.listener_ids);
        }
    })
}

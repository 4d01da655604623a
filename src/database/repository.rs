//! Repositories - one cached data service per collection.

use std::sync::Arc;

use crate::cache::{CacheService, NamespacePolicy};
use crate::data::{Dashboard, OptimizedDataService, Record, RemoteCollection};

use super::Database;
use super::collection::MongoCollection;
use super::models::{AttendanceRecord, Client, Employee, Task, Team};

/// Every cached collection of the application plus the dashboard.
///
/// Freshness per collection:
/// - attendance: realtime (30s)
/// - employees, tasks: standard (5min)
/// - clients, teams: reference (1h)
#[derive(Debug, Clone)]
pub struct Repositories {
    pub employees: OptimizedDataService<Employee>,
    pub teams: OptimizedDataService<Team>,
    pub clients: OptimizedDataService<Client>,
    pub tasks: OptimizedDataService<Task>,
    pub attendance: OptimizedDataService<AttendanceRecord>,
    pub dashboard: Dashboard,
}

impl Repositories {
    /// Repositories backed by MongoDB.
    pub fn new(db: &Database, cache: Arc<CacheService>) -> Self {
        Self::from_sources(
            cache,
            Arc::new(MongoCollection::<Employee>::new(db)),
            Arc::new(MongoCollection::<Team>::new(db)),
            Arc::new(MongoCollection::<Client>::new(db)),
            Arc::new(MongoCollection::<Task>::new(db)),
            Arc::new(MongoCollection::<AttendanceRecord>::new(db)),
        )
    }

    pub fn from_sources(
        cache: Arc<CacheService>,
        employees: Arc<dyn RemoteCollection<Employee>>,
        teams: Arc<dyn RemoteCollection<Team>>,
        clients: Arc<dyn RemoteCollection<Client>>,
        tasks: Arc<dyn RemoteCollection<Task>>,
        attendance: Arc<dyn RemoteCollection<AttendanceRecord>>,
    ) -> Self {
        let employees =
            OptimizedDataService::new(employees, Arc::clone(&cache), NamespacePolicy::standard());
        let teams = OptimizedDataService::new(teams, Arc::clone(&cache), NamespacePolicy::reference());
        let clients =
            OptimizedDataService::new(clients, Arc::clone(&cache), NamespacePolicy::reference());
        let tasks = OptimizedDataService::new(tasks, Arc::clone(&cache), NamespacePolicy::standard());
        let attendance =
            OptimizedDataService::new(attendance, Arc::clone(&cache), NamespacePolicy::realtime());

        let dashboard = Dashboard::new(
            cache,
            employees.clone(),
            teams.clone(),
            clients.clone(),
            tasks.clone(),
            attendance.clone(),
        );

        Self {
            employees,
            teams,
            clients,
            tasks,
            attendance,
            dashboard,
        }
    }

    /// Drop every cached read of `collection`, as after a pushed remote change.
    /// Returns `None` for an unknown collection.
    pub async fn invalidate_collection(&self, collection: &str) -> Option<usize> {
        let removed = if collection == Employee::COLLECTION {
            self.employees.invalidate_all().await
        } else if collection == Team::COLLECTION {
            self.teams.invalidate_all().await
        } else if collection == Client::COLLECTION {
            self.clients.invalidate_all().await
        } else if collection == Task::COLLECTION {
            self.tasks.invalidate_all().await
        } else if collection == AttendanceRecord::COLLECTION {
            self.attendance.invalidate_all().await
        } else {
            return None;
        };
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheStore, ManualClock, NamespaceRegistry};
    use crate::data::{DASHBOARD_NAMESPACE, Filter, GetAllOptions};
    use crate::data::fake::MemoryCollection;
    use std::time::Duration;

    fn repositories() -> (Repositories, Arc<CacheService>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(0));
        let store = CacheStore::memory_only(CacheConfig::default(), clock.clone());
        let cache = Arc::new(CacheService::new(Arc::new(store), NamespaceRegistry::new()));

        let repos = Repositories::from_sources(
            Arc::clone(&cache),
            Arc::new(MemoryCollection::<Employee>::with(vec![])),
            Arc::new(MemoryCollection::<Team>::with(vec![])),
            Arc::new(MemoryCollection::<Client>::with(vec![Client::new("Acme")])),
            Arc::new(MemoryCollection::<Task>::with(vec![])),
            Arc::new(MemoryCollection::<AttendanceRecord>::with(vec![])),
        );
        (repos, cache, clock)
    }

    #[test]
    fn test_policies_and_dependencies() {
        let (_, cache, _) = repositories();
        let namespaces = cache.namespaces();

        assert_eq!(
            namespaces.policy("attendance:getAll").map(|p| p.ttl),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            namespaces.policy("clients:getById").map(|p| p.ttl),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(namespaces.dependents_of("tasks:getAll"), vec![DASHBOARD_NAMESPACE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attendance_expires_before_clients() {
        let (repos, cache, clock) = repositories();
        repos.attendance.get_all(&Filter::new(), GetAllOptions::default()).await.unwrap();
        repos.clients.get_all(&Filter::new(), GetAllOptions::default()).await.unwrap();

        clock.advance(Duration::from_secs(31));

        let attendance = cache
            .peek::<Vec<AttendanceRecord>, _>("attendance:getAll", &Filter::new())
            .await
            .unwrap();
        let clients = cache
            .peek::<Vec<Client>, _>("clients:getAll", &Filter::new())
            .await
            .unwrap();
        assert!(attendance.is_none());
        assert!(clients.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_collection() {
        let (repos, cache, _) = repositories();
        repos.clients.get_all(&Filter::new(), GetAllOptions::default()).await.unwrap();

        assert_eq!(repos.invalidate_collection("clients").await, Some(1));
        assert_eq!(repos.invalidate_collection("invoices").await, None);
        assert!(
            cache
                .peek::<Vec<Client>, _>("clients:getAll", &Filter::new())
                .await
                .unwrap()
                .is_none()
        );
    }
}

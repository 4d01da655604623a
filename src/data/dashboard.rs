//! Dashboard aggregate - derived from the cached collections.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheService, CachePayload, FetchOptions, NamespacePolicy, PayloadKind};
use crate::database::models::{
    AttendanceRecord, AttendanceStatus, Client, Employee, Task, TaskStatus, Team,
};

use super::service::{GetAllOptions, OptimizedDataService};
use super::source::Filter;

/// Namespace of the cached dashboard aggregate.
pub const DASHBOARD_NAMESPACE: &str = "dashboard:stats";

/// Headline numbers shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_employees: usize,
    pub teams: usize,
    pub active_clients: usize,
    pub open_tasks: usize,
    pub in_progress_tasks: usize,
    pub done_tasks: usize,
    pub overdue_tasks: usize,
    pub present_today: usize,
    pub late_today: usize,
    pub absent_today: usize,
    pub on_leave_today: usize,
    pub generated_at: DateTime<Utc>,
}

impl CachePayload for DashboardStats {
    const KIND: PayloadKind = PayloadKind::Record;
}

impl DashboardStats {
    /// Compute the aggregate from full collection snapshots.
    pub fn compute(
        employees: &[Employee],
        teams: &[Team],
        clients: &[Client],
        tasks: &[Task],
        attendance: &[AttendanceRecord],
        now: DateTime<Utc>,
    ) -> Self {
        let today: NaiveDate = now.date_naive();
        let count_tasks = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let count_today = |status: AttendanceStatus| {
            attendance
                .iter()
                .filter(|r| r.date == today && r.status == status)
                .count()
        };

        Self {
            active_employees: employees.iter().filter(|e| e.active).count(),
            teams: teams.len(),
            active_clients: clients.iter().filter(|c| c.active).count(),
            open_tasks: count_tasks(TaskStatus::Open),
            in_progress_tasks: count_tasks(TaskStatus::InProgress),
            done_tasks: count_tasks(TaskStatus::Done),
            overdue_tasks: tasks.iter().filter(|t| t.is_overdue(now)).count(),
            present_today: count_today(AttendanceStatus::Present),
            late_today: count_today(AttendanceStatus::Late),
            absent_today: count_today(AttendanceStatus::Absent),
            on_leave_today: count_today(AttendanceStatus::Leave),
            generated_at: now,
        }
    }
}

/// Cached dashboard over the five collection services.
///
/// Registers `dashboard:stats` as derived from every source list, so any
/// write to a source collection drops the aggregate.
#[derive(Clone)]
pub struct Dashboard {
    cache: Arc<CacheService>,
    employees: OptimizedDataService<Employee>,
    teams: OptimizedDataService<Team>,
    clients: OptimizedDataService<Client>,
    tasks: OptimizedDataService<Task>,
    attendance: OptimizedDataService<AttendanceRecord>,
}

impl Dashboard {
    pub fn new(
        cache: Arc<CacheService>,
        employees: OptimizedDataService<Employee>,
        teams: OptimizedDataService<Team>,
        clients: OptimizedDataService<Client>,
        tasks: OptimizedDataService<Task>,
        attendance: OptimizedDataService<AttendanceRecord>,
    ) -> Self {
        let namespaces = cache.namespaces();
        namespaces.register(DASHBOARD_NAMESPACE, NamespacePolicy::aggregate());
        for source in [
            employees.list_namespace(),
            teams.list_namespace(),
            clients.list_namespace(),
            tasks.list_namespace(),
            attendance.list_namespace(),
        ] {
            namespaces.add_dependency(source, DASHBOARD_NAMESPACE);
        }

        Self {
            cache,
            employees,
            teams,
            clients,
            tasks,
            attendance,
        }
    }

    /// Current dashboard numbers, computed at most once per aggregate TTL.
    pub async fn stats(&self) -> Result<DashboardStats> {
        let this = self.clone();
        let stats = self
            .cache
            .get_or_fetch(
                DASHBOARD_NAMESPACE,
                &(),
                move || async move { this.compute().await },
                FetchOptions::default(),
            )
            .await?;
        Ok(stats)
    }

    async fn compute(&self) -> Result<DashboardStats> {
        let all = Filter::new();
        let options = GetAllOptions::default();

        let (employees, teams, clients, tasks, attendance) = tokio::try_join!(
            self.employees.get_all(&all, options),
            self.teams.get_all(&all, options),
            self.clients.get_all(&all, options),
            self.tasks.get_all(&all, options),
            self.attendance.get_all(&all, options),
        )?;

        Ok(DashboardStats::compute(
            &employees,
            &teams,
            &clients,
            &tasks,
            &attendance,
            Utc::now(),
        ))
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheStore, ManualClock, NamespaceRegistry};
    use crate::data::RemoteCollection;
    use crate::data::source::fake::MemoryCollection;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        cache: Arc<CacheService>,
        dashboard: Dashboard,
        employees: OptimizedDataService<Employee>,
        clients: OptimizedDataService<Client>,
        client_source: Arc<MemoryCollection<Client>>,
        task_source: Arc<MemoryCollection<Task>>,
    }

    fn service<T: crate::data::Record>(
        cache: &Arc<CacheService>,
        source: Arc<MemoryCollection<T>>,
    ) -> OptimizedDataService<T> {
        OptimizedDataService::new(source, Arc::clone(cache), NamespacePolicy::standard())
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_at(0));
        let store = CacheStore::memory_only(CacheConfig::default(), clock);
        let cache = Arc::new(CacheService::new(Arc::new(store), NamespaceRegistry::new()));

        let ana = Employee::new("Ana", "ana@example.com");
        let today = Utc::now().date_naive();
        let attendance = vec![
            AttendanceRecord::new(&ana.id, today, AttendanceStatus::Present),
            AttendanceRecord::new("someone", today, AttendanceStatus::Late),
        ];

        let client_source = Arc::new(MemoryCollection::with(vec![Client::new("Acme")]));
        let task_source = Arc::new(MemoryCollection::with(vec![
            Task::new("draft"),
            Task::new("ship").with_status(TaskStatus::Done),
        ]));

        let employees = service(&cache, Arc::new(MemoryCollection::with(vec![ana])));
        let teams = service(&cache, Arc::new(MemoryCollection::with(vec![Team::new("Core")])));
        let clients = service(&cache, Arc::clone(&client_source));
        let tasks = service(&cache, Arc::clone(&task_source));
        let attendance = service(&cache, Arc::new(MemoryCollection::with(attendance)));

        let dashboard = Dashboard::new(
            Arc::clone(&cache),
            employees.clone(),
            teams,
            clients.clone(),
            tasks,
            attendance,
        );

        Fixture {
            cache,
            dashboard,
            employees,
            clients,
            client_source,
            task_source,
        }
    }

    #[test]
    fn test_compute_counts() {
        let now = Utc::now();
        let mut late = Task::new("late");
        late.due_at = Some(now - ChronoDuration::days(1));
        let mut done_late = Task::new("done late").with_status(TaskStatus::Done);
        done_late.due_at = Some(now - ChronoDuration::days(1));
        let mut inactive = Employee::new("Old", "old@example.com");
        inactive.active = false;
        let yesterday = now.date_naive() - ChronoDuration::days(1);

        let stats = DashboardStats::compute(
            &[Employee::new("Ana", "ana@example.com"), inactive],
            &[Team::new("Core")],
            &[],
            &[late, done_late, Task::new("x").with_status(TaskStatus::InProgress)],
            &[
                AttendanceRecord::new("e1", now.date_naive(), AttendanceStatus::Leave),
                AttendanceRecord::new("e1", yesterday, AttendanceStatus::Present),
            ],
            now,
        );

        assert_eq!(stats.active_employees, 1);
        assert_eq!(stats.teams, 1);
        assert_eq!(stats.open_tasks, 1);
        assert_eq!(stats.in_progress_tasks, 1);
        assert_eq!(stats.done_tasks, 1);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(stats.on_leave_today, 1);
        assert_eq!(stats.present_today, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_cached() {
        let fx = fixture();

        let first = fx.dashboard.stats().await.unwrap();
        let second = fx.dashboard.stats().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.present_today, 1);
        assert_eq!(first.late_today, 1);
        assert_eq!(first.open_tasks, 1);
        assert_eq!(fx.task_source.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_employee_write_invalidates_dashboard_only_where_derived() {
        let fx = fixture();
        fx.dashboard.stats().await.unwrap();
        fx.clients.get_all(&Filter::new(), GetAllOptions::default()).await.unwrap();

        fx.employees
            .create(Employee::new("Ben", "ben@example.com"))
            .await
            .unwrap();

        let employees_cached = fx
            .cache
            .peek::<Vec<Employee>, _>("employees:getAll", &Filter::new())
            .await
            .unwrap();
        let stats_cached = fx
            .cache
            .peek::<DashboardStats, _>(DASHBOARD_NAMESPACE, &())
            .await
            .unwrap();
        let clients_cached = fx
            .cache
            .peek::<Vec<Client>, _>("clients:getAll", &Filter::new())
            .await
            .unwrap();

        assert!(employees_cached.is_none());
        assert!(stats_cached.is_none());
        assert_eq!(clients_cached.map(|c| c.len()), Some(1));

        let stats = fx.dashboard.stats().await.unwrap();
        assert_eq!(stats.active_employees, 2);
        assert_eq!(fx.client_source.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_then_invalidate_all() {
        let fx = fixture();
        fx.dashboard.stats().await.unwrap();

        fx.client_source.insert(&Client::new("Globex")).await.unwrap();
        assert_eq!(fx.dashboard.stats().await.unwrap().active_clients, 1);

        fx.clients.invalidate_all().await;
        assert_eq!(fx.dashboard.stats().await.unwrap().active_clients, 2);
    }
}

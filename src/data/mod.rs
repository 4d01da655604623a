//! Data module - cached access to the remote collections.
//!
//! - `RemoteCollection` - the fetch/write seam, implemented over MongoDB
//! - `OptimizedDataService` - cached reads, invalidating writes
//! - `Dashboard` - the derived `dashboard:stats` aggregate

mod dashboard;
mod service;
mod source;

#[allow(unused_imports)]
pub use dashboard::{DASHBOARD_NAMESPACE, Dashboard, DashboardStats};
#[allow(unused_imports)]
pub use service::{GetAllOptions, OptimizedDataService, by_id_namespace, list_namespace};
pub use source::{Filter, Record, RemoteCollection};

#[cfg(test)]
pub(crate) use source::fake;

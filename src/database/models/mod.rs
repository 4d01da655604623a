//! Business record models.

pub mod attendance;
pub mod client;
pub mod employee;
pub mod task;
pub mod team;

pub use attendance::{AttendanceRecord, AttendanceStatus};
pub use client::Client;
pub use employee::Employee;
pub use task::{Task, TaskStatus};
pub use team::Team;

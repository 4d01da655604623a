//! Attendance model.

use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::data::Record;

/// Attendance state of an employee for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Leave => "leave",
        }
    }
}

/// One attendance record (employee + day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "_id")]
    pub id: String,

    pub employee_id: String,

    /// Calendar day, serialized as `YYYY-MM-DD`
    pub date: NaiveDate,

    pub status: AttendanceStatus,

    #[serde(default)]
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    pub fn new(employee_id: impl Into<String>, date: NaiveDate, status: AttendanceStatus) -> Self {
        Self {
            id: ObjectId::new().to_hex(),
            employee_id: employee_id.into(),
            date,
            status,
            checked_in_at: None,
        }
    }
}

impl Record for AttendanceRecord {
    const COLLECTION: &'static str = "attendance";

    fn id(&self) -> &str {
        &self.id
    }
}

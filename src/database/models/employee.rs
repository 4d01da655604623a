//! Employee model.

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::data::Record;

/// An employee document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    /// Hex ObjectId, stored as `_id`
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    pub email: String,

    /// Team the employee belongs to
    #[serde(default)]
    pub team_id: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    /// Inactive employees are kept for history but excluded from headcounts
    #[serde(default = "default_active")]
    pub active: bool,

    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Employee {
    /// Create a new active employee with a fresh id.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new().to_hex(),
            name: name.into(),
            email: email.into(),
            team_id: None,
            role: None,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Record for Employee {
    const COLLECTION: &'static str = "employees";

    fn id(&self) -> &str {
        &self.id
    }
}

//! Task model.

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::data::Record;

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

/// A task document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    /// Employee the task is assigned to
    #[serde(default)]
    pub assignee_id: Option<String>,

    /// Client the work is billed to
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new open task with a fresh id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new().to_hex(),
            title: title.into(),
            description: None,
            status: TaskStatus::Open,
            assignee_id: None,
            client_id: None,
            due_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the task is past its due date and not done.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Done && self.due_at.is_some_and(|due| due < now)
    }
}

impl Record for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }
}

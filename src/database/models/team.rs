//! Team model.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::data::Record;

/// A team document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    /// Team lead (employee id)
    #[serde(default)]
    pub lead_id: Option<String>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new().to_hex(),
            name: name.into(),
            lead_id: None,
        }
    }
}

impl Record for Team {
    const COLLECTION: &'static str = "teams";

    fn id(&self) -> &str {
        &self.id
    }
}

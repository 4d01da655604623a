//! Client model.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::data::Record;

/// A client (customer) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub contact_email: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Client {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new().to_hex(),
            name: name.into(),
            contact_email: None,
            active: true,
        }
    }
}

impl Record for Client {
    const COLLECTION: &'static str = "clients";

    fn id(&self) -> &str {
        &self.id
    }
}

//! MongoDB-backed remote collection.

use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use mongodb::Collection;
use mongodb::bson::{Document, doc, to_document};
use tracing::debug;

use crate::data::{Filter, Record, RemoteCollection};

use super::Database;

/// A [`RemoteCollection`] over the MongoDB collection named `T::COLLECTION`.
pub struct MongoCollection<T: Record> {
    collection: Collection<T>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> MongoCollection<T> {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(T::COLLECTION),
            _record: PhantomData,
        }
    }
}

/// Equality filter as a query document.
pub fn filter_document(filter: &Filter) -> Result<Document> {
    Ok(to_document(filter)?)
}

#[async_trait]
impl<T: Record> RemoteCollection<T> for MongoCollection<T> {
    fn name(&self) -> &str {
        T::COLLECTION
    }

    async fn fetch_all(&self, filter: &Filter) -> Result<Vec<T>> {
        let query = filter_document(filter)?;
        let mut cursor = self.collection.find(query).await?;
        let mut records = Vec::new();

        while let Some(result) = cursor.next().await {
            records.push(result?);
        }

        debug!("DB fetched {} record(s) from {}", records.len(), T::COLLECTION);
        Ok(records)
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<T>> {
        let result = self.collection.find_one(doc! { "_id": id }).await?;
        debug!("DB get {} {}: {:?}", T::COLLECTION, id, result.is_some());
        Ok(result)
    }

    async fn insert(&self, record: &T) -> Result<()> {
        self.collection.insert_one(record).await?;
        debug!("DB inserted {} into {}", record.id(), T::COLLECTION);
        Ok(())
    }

    async fn replace(&self, id: &str, record: &T) -> Result<bool> {
        let result = self
            .collection
            .replace_one(doc! { "_id": id }, record)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::Bson;

    #[test]
    fn test_filter_document() {
        let filter = Filter::new().eq("status", "open").eq("archived", false);
        let query = filter_document(&filter).unwrap();

        assert_eq!(query.get_str("status").unwrap(), "open");
        assert_eq!(query.get("archived"), Some(&Bson::Boolean(false)));
        assert!(filter_document(&Filter::new()).unwrap().is_empty());
    }
}

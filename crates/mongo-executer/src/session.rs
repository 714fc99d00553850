//! The driver surface operations run against
//!
//! A [`Session`] is a database-scoped handle. It is implemented for
//! [`mongodb::Database`] and for the in-memory store in [`crate::memory`].

use crate::outcome::{delete_summary, insert_summary, update_summary, RawOutcome};
use async_trait::async_trait;
use bson::Document;
use futures::{StreamExt, TryStreamExt};
use mongo_executer_common::{ExecuterError, Result};
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::Database;

/// Projection and pagination for a find call. Pagination applies after projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindParams {
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

#[async_trait]
pub trait Session: Send + Sync {
    fn database_name(&self) -> &str;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        params: FindParams,
    ) -> Result<RawOutcome>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<RawOutcome>;

    /// Ordered insert; stops at the first failing document.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>)
        -> Result<RawOutcome>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome>;

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<RawOutcome>;

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<RawOutcome>;
}

fn update_options(upsert: bool) -> UpdateOptions {
    let mut options = UpdateOptions::default();
    options.upsert = Some(upsert);
    options
}

#[async_trait]
impl Session for Database {
    fn database_name(&self) -> &str {
        self.name()
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        params: FindParams,
    ) -> Result<RawOutcome> {
        let collection = self.collection::<Document>(collection);

        let mut find_options = FindOptions::default();
        if let Some(projection) = params.projection {
            find_options.projection = Some(projection);
        }
        if let Some(skip) = params.skip {
            find_options.skip = Some(skip);
        }
        if let Some(limit) = params.limit {
            find_options.limit = Some(limit);
        }

        let cursor = collection.find(filter).with_options(find_options).await?;
        Ok(RawOutcome::Cursor(
            cursor.map_err(ExecuterError::from).boxed(),
        ))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<RawOutcome> {
        let result = self
            .collection::<Document>(collection)
            .insert_one(document)
            .await?;
        Ok(RawOutcome::Direct(insert_summary(vec![result.inserted_id])))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<RawOutcome> {
        let result = self
            .collection::<Document>(collection)
            .insert_many(documents)
            .await?;

        let mut indexed: Vec<_> = result.inserted_ids.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(RawOutcome::Direct(insert_summary(
            indexed.into_iter().map(|(_, id)| id).collect(),
        )))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome> {
        let result = self
            .collection::<Document>(collection)
            .update_one(filter, update)
            .with_options(update_options(upsert))
            .await?;
        Ok(RawOutcome::Direct(update_summary(
            result.matched_count,
            result.modified_count,
            result.upserted_id,
        )))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome> {
        let result = self
            .collection::<Document>(collection)
            .update_many(filter, update)
            .with_options(update_options(upsert))
            .await?;
        Ok(RawOutcome::Direct(update_summary(
            result.matched_count,
            result.modified_count,
            result.upserted_id,
        )))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<RawOutcome> {
        let result = self
            .collection::<Document>(collection)
            .delete_one(filter)
            .await?;
        Ok(RawOutcome::Direct(delete_summary(result.deleted_count)))
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<RawOutcome> {
        let cursor = self
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .await?;
        Ok(RawOutcome::Cursor(
            cursor.map_err(ExecuterError::from).boxed(),
        ))
    }
}

//! In-memory document store
//!
//! A small stand-in for a MongoDB server, used by tests and local tooling. It
//! understands the subset of queries, projections, update modifiers and pipeline
//! stages the executer emits, enforces `_id` uniqueness (plus any unique index
//! created with [`MemoryDatabase::create_unique_index`]), and rejects
//! modifier-less updates the way current servers do.
//!
//! Outcomes are reported as final values, except aggregation which hands back a
//! cursor, so both normalization paths are exercised.

mod filter;
mod pipeline;
mod update;

use crate::connection::Connection;
use crate::outcome::{delete_summary, insert_summary, update_summary, RawOutcome};
use crate::session::{FindParams, Session};
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use filter::{bson_eq, equality_seed, get_path, matches};
use futures::{stream, StreamExt};
use mongo_executer_common::{ExecuterError, Result};
use parking_lot::RwLock;
use pipeline::{project, run_pipeline};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use update::{apply_update, check_update};

#[derive(Debug, Default, Clone)]
struct CollectionData {
    documents: Vec<Document>,
    unique_fields: Vec<String>,
}

impl CollectionData {
    /// `skip` is the position of the document being replaced, if any.
    fn check_unique(&self, candidate: &Document, skip: Option<usize>, namespace: &str) -> Result<()> {
        let fields = std::iter::once("_id").chain(self.unique_fields.iter().map(String::as_str));
        for field in fields {
            let Some(value) = get_path(candidate, field) else {
                continue;
            };
            let clash = self.documents.iter().enumerate().any(|(index, existing)| {
                Some(index) != skip
                    && get_path(existing, field).is_some_and(|other| bson_eq(other, value))
            });
            if clash {
                let index = if field == "_id" {
                    "_id_".to_string()
                } else {
                    format!("{}_1", field)
                };
                return Err(ExecuterError::Conflict(format!(
                    "E11000 duplicate key error collection: {} index: {} dup key: {{ {}: {} }}",
                    namespace, index, field, value
                )));
            }
        }
        Ok(())
    }
}

type Collections = HashMap<String, CollectionData>;

#[derive(Debug, Default)]
struct Store {
    databases: RwLock<HashMap<String, Collections>>,
}

/// Client-like handle: selects databases by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    store: Arc<Store>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(&self, name: &str) -> MemoryDatabase {
        MemoryDatabase {
            name: name.to_string(),
            store: self.store.clone(),
        }
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.databases.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Database-scoped handle sharing storage with the client it came from.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    store: Arc<Store>,
}

impl MemoryDatabase {
    /// A database with its own private storage
    pub fn new(name: &str) -> Self {
        MemoryClient::new().database(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_unique_index(&self, collection: &str, field: &str) {
        self.write(collection, |data| {
            if !data.unique_fields.iter().any(|existing| existing == field) {
                data.unique_fields.push(field.to_string());
            }
        });
    }

    /// Snapshot of a collection in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.read(collection, |data| {
            data.map(|data| data.documents.clone()).unwrap_or_default()
        })
    }

    pub fn drop_collection(&self, collection: &str) {
        if let Some(collections) = self.store.databases.write().get_mut(&self.name) {
            collections.remove(collection);
        }
    }

    fn namespace(&self, collection: &str) -> String {
        format!("{}.{}", self.name, collection)
    }

    fn read<R>(&self, collection: &str, f: impl FnOnce(Option<&CollectionData>) -> R) -> R {
        let databases = self.store.databases.read();
        f(databases
            .get(&self.name)
            .and_then(|collections| collections.get(collection)))
    }

    fn write<R>(&self, collection: &str, f: impl FnOnce(&mut CollectionData) -> R) -> R {
        let mut databases = self.store.databases.write();
        let data = databases
            .entry(self.name.clone())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        f(data)
    }

    fn find_documents(&self, collection: &str, filter: &Document, params: &FindParams) -> Result<Vec<Document>> {
        let found = self.read(collection, |data| -> Result<Vec<Document>> {
            let Some(data) = data else {
                return Ok(Vec::new());
            };
            let mut found = Vec::new();
            for document in &data.documents {
                if !matches(document, filter)? {
                    continue;
                }
                found.push(match &params.projection {
                    Some(projection) => project(document, projection)?,
                    None => document.clone(),
                });
            }
            Ok(found)
        })?;

        let skip = params.skip.unwrap_or(0) as usize;
        let limit = params
            .limit
            .map(|limit| limit.unsigned_abs() as usize)
            .filter(|limit| *limit > 0)
            .unwrap_or(usize::MAX);
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    fn insert_documents(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>> {
        let namespace = self.namespace(collection);
        self.write(collection, |data| -> Result<Vec<Bson>> {
            let mut inserted = Vec::with_capacity(documents.len());
            for document in documents {
                let (document, id) = with_id(document);
                data.check_unique(&document, None, &namespace)?;
                data.documents.push(document);
                inserted.push(id);
            }
            Ok(inserted)
        })
    }

    fn update_documents(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        many: bool,
        upsert: bool,
    ) -> Result<Document> {
        check_update(update)?;
        let namespace = self.namespace(collection);

        self.write(collection, |data| -> Result<Document> {
            let mut matched = 0_u64;
            let mut changes = Vec::new();
            for (index, document) in data.documents.iter().enumerate() {
                if !matches(document, filter)? {
                    continue;
                }
                matched += 1;
                let updated = apply_update(document, update)?;
                if updated != *document {
                    changes.push((index, updated));
                }
                if !many {
                    break;
                }
            }

            let modified = changes.len() as u64;
            if !changes.is_empty() {
                // Checked against the collection with every change applied.
                let mut staged = CollectionData {
                    documents: data.documents.clone(),
                    unique_fields: data.unique_fields.clone(),
                };
                for (index, updated) in &changes {
                    staged.documents[*index] = updated.clone();
                }
                for (index, updated) in &changes {
                    staged.check_unique(updated, Some(*index), &namespace)?;
                }
                data.documents = staged.documents;
            }

            let mut upserted_id = None;
            if matched == 0 && upsert {
                let (document, id) = with_id(apply_update(&equality_seed(filter)?, update)?);
                data.check_unique(&document, None, &namespace)?;
                data.documents.push(document);
                upserted_id = Some(id);
            }

            Ok(update_summary(matched, modified, upserted_id))
        })
    }

    fn aggregate_documents(&self, collection: &str, pipeline: &[Document]) -> Result<Vec<Document>> {
        let databases = self.store.databases.read();
        let collections = databases.get(&self.name);
        let contents = |name: &str| {
            collections
                .and_then(|collections| collections.get(name))
                .map(|data| data.documents.clone())
                .unwrap_or_default()
        };
        run_pipeline(contents(collection), pipeline, contents)
    }
}

/// Gives the document an `_id` (first field) when it has none.
fn with_id(document: Document) -> (Document, Bson) {
    if let Some(id) = document.get("_id").cloned() {
        return (document, id);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut stored = doc! { "_id": id.clone() };
    for (key, value) in document {
        stored.insert(key, value);
    }
    (stored, id)
}

#[async_trait]
impl Session for MemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        params: FindParams,
    ) -> Result<RawOutcome> {
        let found = self.find_documents(collection, &filter, &params)?;
        debug!(collection, count = found.len(), "Memory find");
        Ok(RawOutcome::Bare(Bson::Array(
            found.into_iter().map(Bson::Document).collect(),
        )))
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<RawOutcome> {
        let ids = self.insert_documents(collection, vec![document])?;
        Ok(RawOutcome::Bare(Bson::Document(insert_summary(ids))))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<RawOutcome> {
        if documents.is_empty() {
            return Err(ExecuterError::Database(
                "documents must be a non-empty list".to_string(),
            ));
        }
        let ids = self.insert_documents(collection, documents)?;
        Ok(RawOutcome::Bare(Bson::Document(insert_summary(ids))))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome> {
        let summary = self.update_documents(collection, &filter, &update, false, upsert)?;
        Ok(RawOutcome::Bare(Bson::Document(summary)))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<RawOutcome> {
        let summary = self.update_documents(collection, &filter, &update, true, upsert)?;
        Ok(RawOutcome::Bare(Bson::Document(summary)))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<RawOutcome> {
        let deleted = self.write(collection, |data| -> Result<u64> {
            let mut position = None;
            for (index, document) in data.documents.iter().enumerate() {
                if matches(document, &filter)? {
                    position = Some(index);
                    break;
                }
            }
            Ok(match position {
                Some(index) => {
                    data.documents.remove(index);
                    1
                }
                None => 0,
            })
        })?;
        Ok(RawOutcome::Bare(Bson::Document(delete_summary(deleted))))
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<RawOutcome> {
        let documents = self.aggregate_documents(collection, &pipeline)?;
        Ok(RawOutcome::Cursor(
            stream::iter(documents.into_iter().map(Ok::<_, ExecuterError>)).boxed(),
        ))
    }
}

impl Connection for MemoryClient {
    fn select_database(&self, name: &str) -> Option<Arc<dyn Session>> {
        Some(Arc::new(self.database(name)))
    }

    fn as_session(&self) -> Option<Arc<dyn Session>> {
        None
    }
}

impl Connection for MemoryDatabase {
    fn select_database(&self, _name: &str) -> Option<Arc<dyn Session>> {
        None
    }

    fn as_session(&self) -> Option<Arc<dyn Session>> {
        Some(Arc::new(self.clone()))
    }
}

//! Operation builders
//!
//! Each `build_*` function fixes every parameter of one database call except the
//! session, and returns an [`Operation`] value. Nothing runs until the operation
//! is handed to an [`Executer`](crate::Executer). Operations are plain data: they
//! can be cloned, compared and executed any number of times.

use crate::change::normalize_change;
use crate::descriptor::{ErrorDescriptor, OperationContext};
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::session::{FindParams, Session};
use crate::validation::ValidatedCollectionName;
use bson::{doc, Bson, Document};
use mongo_executer_common::Result;
use tracing::debug;

/// Documents to insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertPayload {
    One(Document),
    /// Ordered bulk insert
    Many(Vec<Document>),
}

impl From<Document> for InsertPayload {
    fn from(document: Document) -> Self {
        InsertPayload::One(document)
    }
}

impl From<Vec<Document>> for InsertPayload {
    fn from(documents: Vec<Document>) -> Self {
        InsertPayload::Many(documents)
    }
}

impl InsertPayload {
    fn to_bson(&self) -> Bson {
        match self {
            InsertPayload::One(document) => Bson::Document(document.clone()),
            InsertPayload::Many(documents) => {
                Bson::Array(documents.iter().cloned().map(Bson::Document).collect())
            }
        }
    }
}

/// How many matching documents an update may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScope {
    One,
    Many,
}

/// Arguments of the fixed `$match`, `$lookup`, `$sort`, `$project` pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStages {
    pub match_query: Document,
    pub lookup: Document,
    pub sort: Document,
    pub projection: Document,
}

impl AggregateStages {
    /// All four stages, always in this order.
    pub fn pipeline(&self) -> Vec<Document> {
        vec![
            doc! { "$match": self.match_query.clone() },
            doc! { "$lookup": self.lookup.clone() },
            doc! { "$sort": self.sort.clone() },
            doc! { "$project": self.projection.clone() },
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find {
        collection: String,
        query: Document,
        params: FindParams,
    },
    Insert {
        collection: String,
        payload: InsertPayload,
    },
    Update {
        collection: String,
        query: Document,
        /// Change as given; normalized when the operation runs
        change: Document,
        scope: UpdateScope,
        upsert: bool,
    },
    DeleteOne {
        collection: String,
        matcher: Document,
    },
    Push {
        collection: String,
        query: Document,
        value: Document,
    },
    Aggregate {
        collection: String,
        stages: AggregateStages,
    },
}

/// Finds documents matching `query`. A `skip` or `limit` of zero counts as unset.
pub fn build_find(
    collection: impl Into<String>,
    query: Document,
    projection: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
) -> Operation {
    Operation::Find {
        collection: collection.into(),
        query,
        params: FindParams {
            projection,
            skip: skip.filter(|n| *n != 0),
            limit: limit.filter(|n| *n != 0),
        },
    }
}

/// Inserts one document or, given a list, all of them in order.
pub fn build_insert(collection: impl Into<String>, payload: impl Into<InsertPayload>) -> Operation {
    Operation::Insert {
        collection: collection.into(),
        payload: payload.into(),
    }
}

fn build_update_with(
    collection: impl Into<String>,
    query: Document,
    change: Document,
    scope: UpdateScope,
    upsert: bool,
) -> Operation {
    Operation::Update {
        collection: collection.into(),
        query,
        change,
        scope,
        upsert,
    }
}

/// Updates every document matching `query`.
pub fn build_update(collection: impl Into<String>, query: Document, change: Document) -> Operation {
    build_update_with(collection, query, change, UpdateScope::Many, false)
}

/// Updates at most one document matching `query`.
pub fn build_update_one(
    collection: impl Into<String>,
    query: Document,
    change: Document,
) -> Operation {
    build_update_with(collection, query, change, UpdateScope::One, false)
}

pub fn build_update_many(
    collection: impl Into<String>,
    query: Document,
    change: Document,
) -> Operation {
    build_update_with(collection, query, change, UpdateScope::Many, false)
}

/// Like [`build_update`], inserting a document when nothing matches.
pub fn build_upsert(collection: impl Into<String>, query: Document, change: Document) -> Operation {
    build_update_with(collection, query, change, UpdateScope::Many, true)
}

pub fn build_delete_one(collection: impl Into<String>, matcher: Document) -> Operation {
    Operation::DeleteOne {
        collection: collection.into(),
        matcher,
    }
}

/// Appends to array fields of every matching document: `{ $push: value }`.
pub fn build_push(collection: impl Into<String>, query: Document, value: Document) -> Operation {
    Operation::Push {
        collection: collection.into(),
        query,
        value,
    }
}

pub fn build_aggregate(
    collection: impl Into<String>,
    match_query: Document,
    lookup: Document,
    sort: Document,
    projection: Document,
) -> Operation {
    Operation::Aggregate {
        collection: collection.into(),
        stages: AggregateStages {
            match_query,
            lookup,
            sort,
            projection,
        },
    }
}

impl Operation {
    pub fn collection(&self) -> &str {
        match self {
            Operation::Find { collection, .. }
            | Operation::Insert { collection, .. }
            | Operation::Update { collection, .. }
            | Operation::DeleteOne { collection, .. }
            | Operation::Push { collection, .. }
            | Operation::Aggregate { collection, .. } => collection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Find { .. } => "find",
            Operation::Insert { .. } => "insert",
            Operation::Update {
                scope: UpdateScope::One,
                ..
            } => "update_one",
            Operation::Update { .. } => "update_many",
            Operation::DeleteOne { .. } => "delete_one",
            Operation::Push { .. } => "push",
            Operation::Aggregate { .. } => "aggregate",
        }
    }

    /// What an error descriptor for this operation carries.
    ///
    /// Aggregations report the match stage as the query, the projection stage as
    /// the projection and the lookup stage as the object. This order is deliberate:
    /// do not move the lookup into the projection slot.
    pub fn context(&self) -> OperationContext {
        let collection = self.collection().to_string();
        match self {
            Operation::Find { query, params, .. } => OperationContext {
                collection,
                query: Some(query.clone()),
                projection: params.projection.clone(),
                object: None,
            },
            Operation::Insert { payload, .. } => OperationContext {
                collection,
                object: Some(payload.to_bson()),
                ..Default::default()
            },
            Operation::Update { query, change, .. } => OperationContext {
                collection,
                query: Some(query.clone()),
                projection: None,
                object: Some(Bson::Document(normalize_change(change).into_update())),
            },
            Operation::DeleteOne { matcher, .. } => OperationContext {
                collection,
                object: Some(Bson::Document(matcher.clone())),
                ..Default::default()
            },
            Operation::Push { query, value, .. } => OperationContext {
                collection,
                query: Some(query.clone()),
                projection: None,
                object: Some(Bson::Document(value.clone())),
            },
            Operation::Aggregate { stages, .. } => OperationContext {
                collection,
                query: Some(stages.match_query.clone()),
                projection: Some(stages.projection.clone()),
                object: Some(Bson::Document(stages.lookup.clone())),
            },
        }
    }

    /// Runs the operation and turns a failure into an [`ErrorDescriptor`], which is
    /// reported to `diagnostics` before it is returned.
    pub(crate) async fn dispatch(
        &self,
        session: &dyn Session,
        diagnostics: &dyn DiagnosticsSink,
    ) -> std::result::Result<Bson, ErrorDescriptor> {
        match self.run(session, diagnostics).await {
            Ok(value) => Ok(value),
            Err(error) => {
                let descriptor = ErrorDescriptor::new(&error, self.context());
                diagnostics.emit(&Diagnostic::OperationFailed(descriptor.clone()));
                Err(descriptor)
            }
        }
    }

    async fn run(&self, session: &dyn Session, diagnostics: &dyn DiagnosticsSink) -> Result<Bson> {
        let collection = ValidatedCollectionName::new(self.collection())?;
        let name = collection.as_str();

        let outcome = match self {
            Operation::Find { query, params, .. } => {
                session.find(name, query.clone(), params.clone()).await?
            }
            Operation::Insert {
                payload: InsertPayload::One(document),
                ..
            } => session.insert_one(name, document.clone()).await?,
            Operation::Insert {
                payload: InsertPayload::Many(documents),
                ..
            } => session.insert_many(name, documents.clone()).await?,
            Operation::Update {
                query,
                change,
                scope,
                upsert,
                ..
            } => {
                let normalized = normalize_change(change);
                if normalized.was_wrapped() {
                    diagnostics.emit(&Diagnostic::ModifierWrapped {
                        collection: name.to_string(),
                        original: change.clone(),
                    });
                }
                let update = normalized.into_update();
                match scope {
                    UpdateScope::One => {
                        session.update_one(name, query.clone(), update, *upsert).await?
                    }
                    UpdateScope::Many => {
                        session.update_many(name, query.clone(), update, *upsert).await?
                    }
                }
            }
            Operation::DeleteOne { matcher, .. } => session.delete_one(name, matcher.clone()).await?,
            Operation::Push { query, value, .. } => {
                session
                    .update_many(name, query.clone(), doc! { "$push": value.clone() }, false)
                    .await?
            }
            Operation::Aggregate { stages, .. } => session.aggregate(name, stages.pipeline()).await?,
        };

        debug!(
            collection = name,
            kind = self.kind(),
            shape = outcome.shape(),
            "Normalizing outcome"
        );
        outcome.normalize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingDiagnostics;
    use crate::memory::MemoryDatabase;

    #[test]
    fn test_build_find_zero_means_unset() {
        let op = build_find("users", doc! { "a": 1 }, None, Some(0), Some(0));
        let Operation::Find { params, .. } = &op else {
            panic!("expected a find operation");
        };
        assert_eq!(params, &FindParams::default());

        let op = build_find("users", doc! {}, Some(doc! { "name": 1 }), Some(5), Some(10));
        let Operation::Find { params, .. } = &op else {
            panic!("expected a find operation");
        };
        assert_eq!(params.skip, Some(5));
        assert_eq!(params.limit, Some(10));
        assert_eq!(params.projection, Some(doc! { "name": 1 }));
    }

    #[test]
    fn test_update_builders() {
        let change = doc! { "name": "Y" };
        assert_eq!(
            build_update("users", doc! {}, change.clone()),
            build_update_many("users", doc! {}, change.clone())
        );
        assert_eq!(build_update_one("users", doc! {}, change.clone()).kind(), "update_one");
        let Operation::Update { upsert, scope, .. } = build_upsert("users", doc! {}, change) else {
            panic!("expected an update operation");
        };
        assert!(upsert);
        assert_eq!(scope, UpdateScope::Many);
    }

    #[test]
    fn test_aggregate_pipeline_order() {
        let op = build_aggregate(
            "orders",
            doc! { "status": "open" },
            doc! { "from": "users", "localField": "user", "foreignField": "_id", "as": "buyer" },
            doc! { "total": -1 },
            doc! { "total": 1 },
        );
        let Operation::Aggregate { stages, .. } = &op else {
            panic!("expected an aggregate operation");
        };
        let pipeline = stages.pipeline();
        let names: Vec<&str> = pipeline
            .iter()
            .filter_map(|stage| stage.keys().next().map(String::as_str))
            .collect();
        assert_eq!(names, vec!["$match", "$lookup", "$sort", "$project"]);
    }

    #[test]
    fn test_context_per_operation() {
        let aggregate = build_aggregate(
            "orders",
            doc! { "a": 1 },
            doc! { "from": "users" },
            doc! { "b": 1 },
            doc! { "c": 1 },
        )
        .context();
        assert_eq!(aggregate.query, Some(doc! { "a": 1 }));
        assert_eq!(aggregate.projection, Some(doc! { "c": 1 }));
        assert_eq!(aggregate.object, Some(Bson::Document(doc! { "from": "users" })));

        let delete = build_delete_one("users", doc! { "_id": 1 }).context();
        assert!(delete.query.is_none());
        assert_eq!(delete.object, Some(Bson::Document(doc! { "_id": 1 })));

        let update = build_update("users", doc! { "_id": 1 }, doc! { "name": "Y" }).context();
        assert_eq!(
            update.object,
            Some(Bson::Document(doc! { "$set": { "name": "Y" } }))
        );

        let insert = build_insert("users", vec![doc! { "_id": 1 }]).context();
        assert_eq!(insert.object, Some(Bson::Array(vec![Bson::Document(doc! { "_id": 1 })])));
    }

    #[tokio::test]
    async fn test_dispatch_wraps_bare_change() {
        let db = MemoryDatabase::new("app");
        let sink = RecordingDiagnostics::new();
        build_insert("users", doc! { "_id": 1, "name": "X", "age": 3 })
            .dispatch(&db, &sink)
            .await
            .unwrap();

        build_update("users", doc! { "_id": 1 }, doc! { "name": "Y" })
            .dispatch(&db, &sink)
            .await
            .unwrap();

        assert_eq!(sink.wrapped_modifiers(), 1);
        assert_eq!(db.documents("users"), vec![doc! { "_id": 1, "name": "Y", "age": 3 }]);
    }

    #[tokio::test]
    async fn test_dispatch_reports_invalid_collection() {
        let db = MemoryDatabase::new("app");
        let sink = RecordingDiagnostics::new();
        let err = build_find("system.users", doc! {}, None, None, None)
            .dispatch(&db, &sink)
            .await
            .unwrap_err();

        assert_eq!(err.collection(), "system.users");
        assert!(err.message().contains("system."));
        assert_eq!(sink.failures(), vec![err]);
    }

    #[tokio::test]
    async fn test_push_appends_to_all_matches() {
        let db = MemoryDatabase::new("app");
        let sink = RecordingDiagnostics::new();
        build_insert(
            "threads",
            vec![doc! { "_id": 1, "open": true, "tags": [] }, doc! { "_id": 2, "open": true }],
        )
        .dispatch(&db, &sink)
        .await
        .unwrap();

        let summary = build_push("threads", doc! { "open": true }, doc! { "tags": "new" })
            .dispatch(&db, &sink)
            .await
            .unwrap();
        assert_eq!(summary.as_document().unwrap().get_i64("nModified").unwrap(), 2);
        for document in db.documents("threads") {
            assert_eq!(document.get_array("tags").unwrap(), &vec![Bson::from("new")]);
        }
    }
}

//! Raw driver outcomes and their normalization
//!
//! Backends report results in different shapes: a result sub-object, a cursor
//! that still has to be drained, or a value that is already final. Every
//! operation goes through [`RawOutcome::normalize`] so callers see one shape per
//! operation kind regardless of the backend.

use bson::{doc, Bson, Document};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use mongo_executer_common::{ExecuterError, Result};
use std::fmt;

pub enum RawOutcome {
    /// Result sub-object reported by the server
    Direct(Document),
    /// Cursor whose documents still have to be fetched
    Cursor(BoxStream<'static, Result<Document>>),
    /// Already final
    Bare(Bson),
}

impl RawOutcome {
    pub fn shape(&self) -> &'static str {
        match self {
            RawOutcome::Direct(_) => "direct",
            RawOutcome::Cursor(_) => "cursor",
            RawOutcome::Bare(_) => "bare",
        }
    }

    pub async fn normalize(self) -> Result<Bson> {
        match self {
            RawOutcome::Direct(result) => Ok(Bson::Document(result)),
            RawOutcome::Cursor(cursor) => {
                let documents: Vec<Document> = cursor.try_collect().await?;
                Ok(Bson::Array(
                    documents.into_iter().map(Bson::Document).collect(),
                ))
            }
            RawOutcome::Bare(value) => Ok(value),
        }
    }
}

impl fmt::Debug for RawOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawOutcome::Direct(result) => f.debug_tuple("Direct").field(result).finish(),
            RawOutcome::Cursor(_) => f.write_str("Cursor(..)"),
            RawOutcome::Bare(value) => f.debug_tuple("Bare").field(value).finish(),
        }
    }
}

fn count(n: u64) -> Bson {
    Bson::Int64(n as i64)
}

/// `{ n, ok, insertedIds }`
pub fn insert_summary(inserted_ids: Vec<Bson>) -> Document {
    doc! {
        "n": count(inserted_ids.len() as u64),
        "ok": 1,
        "insertedIds": inserted_ids,
    }
}

/// `{ n, nModified, ok, upserted? }`, where `n` counts matched plus upserted documents
pub fn update_summary(matched: u64, modified: u64, upserted_id: Option<Bson>) -> Document {
    let upserted = u64::from(upserted_id.is_some());
    let mut summary = doc! {
        "n": count(matched + upserted),
        "nModified": count(modified),
        "ok": 1,
    };
    if let Some(id) = upserted_id {
        summary.insert("upserted", id);
    }
    summary
}

/// `{ n, ok }`
pub fn delete_summary(deleted: u64) -> Document {
    doc! {
        "n": count(deleted),
        "ok": 1,
    }
}

/// Unwraps the document list produced by find and aggregate operations.
pub fn into_documents(value: Bson) -> Result<Vec<Document>> {
    match value {
        Bson::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(document) => Ok(document),
                other => Err(ExecuterError::Deserialization(format!(
                    "expected a document, found {:?}",
                    other.element_type()
                ))),
            })
            .collect(),
        other => Err(ExecuterError::Deserialization(format!(
            "expected an array of documents, found {:?}",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};

    #[tokio::test]
    async fn test_direct_outcome_is_used_as_is() {
        let value = RawOutcome::Direct(delete_summary(1)).normalize().await.unwrap();
        assert_eq!(value, Bson::Document(doc! { "n": 1_i64, "ok": 1 }));
    }

    #[tokio::test]
    async fn test_cursor_outcome_is_drained() {
        let cursor = stream::iter(vec![Ok(doc! { "a": 1 }), Ok(doc! { "a": 2 })]).boxed();
        let outcome = RawOutcome::Cursor(cursor);
        assert_eq!(outcome.shape(), "cursor");

        let documents = into_documents(outcome.normalize().await.unwrap()).unwrap();
        assert_eq!(documents, vec![doc! { "a": 1 }, doc! { "a": 2 }]);
    }

    #[tokio::test]
    async fn test_cursor_error_propagates() {
        let cursor = stream::iter(vec![
            Ok(doc! { "a": 1 }),
            Err(ExecuterError::from_driver(Some(43), "cursor killed")),
        ])
        .boxed();
        let err = RawOutcome::Cursor(cursor).normalize().await.unwrap_err();
        assert_eq!(err.code(), Some(43));
        assert!(err.to_string().contains("cursor killed"));
    }

    #[tokio::test]
    async fn test_bare_outcome_is_final() {
        let value = RawOutcome::Bare(Bson::Array(vec![])).normalize().await.unwrap();
        assert!(into_documents(value).unwrap().is_empty());
    }

    #[test]
    fn test_update_summary_counts_upsert() {
        let summary = update_summary(0, 0, Some(Bson::String("a1".to_string())));
        assert_eq!(summary.get_i64("n").unwrap(), 1);
        assert_eq!(summary.get_i64("nModified").unwrap(), 0);
        assert_eq!(summary.get_str("upserted").unwrap(), "a1");
    }

    #[test]
    fn test_into_documents_rejects_scalars() {
        assert!(into_documents(Bson::Int32(3)).is_err());
        assert!(into_documents(Bson::Array(vec![Bson::Int32(3)])).is_err());
    }
}

//! Failure values surfaced by executed operations

use bson::{Bson, Document};
use mongo_executer_common::{ExecuterError, DUPLICATE_KEY_CODE};
use serde::Serialize;
use thiserror::Error;

/// What an operation was about to do when it failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationContext {
    pub collection: String,
    pub query: Option<Document>,
    pub projection: Option<Document>,
    pub object: Option<Bson>,
}

/// A failed operation, with enough context to diagnose it without re-running.
///
/// Built once where the driver call fails; there are no setters.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct ErrorDescriptor {
    message: String,
    stack: String,
    collection: String,
    query: Option<Document>,
    projection: Option<Document>,
    object: Option<Bson>,
    code: Option<i32>,
}

impl ErrorDescriptor {
    pub fn new(error: &ExecuterError, context: OperationContext) -> Self {
        let message = match error {
            ExecuterError::MongoDB { message: msg, .. }
            | ExecuterError::Database(msg)
            | ExecuterError::Conflict(msg)
            | ExecuterError::Query(msg) => msg.clone(),
            other => other.to_string(),
        };

        Self {
            message,
            stack: format!("{:?}", error),
            collection: context.collection,
            query: context.query,
            projection: context.projection,
            object: context.object,
            code: error.code(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Debug rendering of the underlying error
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn query(&self) -> Option<&Document> {
        self.query.as_ref()
    }

    pub fn projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    /// Payload the operation carried (inserted documents, change spec, matcher...)
    pub fn object(&self) -> Option<&Bson> {
        self.object.as_ref()
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.code == Some(DUPLICATE_KEY_CODE)
    }

    /// JSON rendering used for log lines.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_descriptor_from_conflict() {
        let error = ExecuterError::Conflict(
            "E11000 duplicate key error collection: app.users index: _id_".to_string(),
        );
        let descriptor = ErrorDescriptor::new(
            &error,
            OperationContext {
                collection: "users".to_string(),
                object: Some(Bson::Document(doc! { "_id": "a1" })),
                ..Default::default()
            },
        );

        assert!(descriptor.is_duplicate_key());
        assert_eq!(descriptor.collection(), "users");
        assert!(descriptor.to_string().contains("duplicate key error"));
        assert!(descriptor.stack().contains("Conflict"));
        assert_eq!(descriptor.object(), Some(&Bson::Document(doc! { "_id": "a1" })));
        assert!(descriptor.query().is_none());
    }

    #[test]
    fn test_descriptor_carries_server_code() {
        let error = ExecuterError::from_driver(Some(291), "No indexed plans available");
        let descriptor = ErrorDescriptor::new(
            &error,
            OperationContext {
                collection: "conversations".to_string(),
                query: Some(doc! { "name": "X" }),
                ..Default::default()
            },
        );

        assert_eq!(descriptor.code(), Some(291));
        assert_eq!(descriptor.message(), "No indexed plans available");
        assert!(!descriptor.is_duplicate_key());
    }

    #[test]
    fn test_descriptor_keeps_prefix_for_other_variants() {
        let error = ExecuterError::Validation("Collection name cannot be empty".to_string());
        let descriptor = ErrorDescriptor::new(&error, OperationContext::default());

        assert_eq!(descriptor.message(), "Validation error: Collection name cannot be empty");
        assert!(!descriptor.is_duplicate_key());
        assert_eq!(descriptor.code(), None);
    }

    #[test]
    fn test_descriptor_to_json() {
        let descriptor = ErrorDescriptor::new(
            &ExecuterError::Query("bad operator".to_string()),
            OperationContext {
                collection: "orders".to_string(),
                query: Some(doc! { "status": "open" }),
                ..Default::default()
            },
        );

        let json: serde_json::Value = serde_json::from_str(&descriptor.to_json()).unwrap();
        assert_eq!(json["collection"], "orders");
        assert_eq!(json["message"], "bad operator");
        assert_eq!(json["query"]["status"], "open");
    }
}

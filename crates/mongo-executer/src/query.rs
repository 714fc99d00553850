//! Incremental construction of find operations

use crate::operation::{build_find, Operation};
use bson::Document;

/// Builder for find operations
///
/// ```
/// use bson::doc;
/// use mongo_executer::FindBuilder;
///
/// let find = FindBuilder::new("users")
///     .query(doc! { "active": true })
///     .projection(doc! { "name": 1 })
///     .limit(10)
///     .build();
/// assert_eq!(find.collection(), "users");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FindBuilder {
    collection_name: String,
    query: Document,
    projection: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
}

impl FindBuilder {
    /// Create a new find builder matching every document
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            query: Document::new(),
            projection: None,
            skip: None,
            limit: None,
        }
    }

    /// Set the query document
    pub fn query(mut self, query: Document) -> Self {
        self.query = query;
        self
    }

    /// Set the projection
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn get_query(&self) -> &Document {
        &self.query
    }

    pub fn get_projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.limit
    }

    /// Same as calling [`build_find`] with the collected parameters.
    pub fn build(self) -> Operation {
        build_find(
            self.collection_name,
            self.query,
            self.projection,
            self.skip,
            self.limit,
        )
    }
}

//! Document store abstraction
//!
//! This module defines the boundary between the exchange core and whatever
//! persists its records. The store is document oriented: every record lives in
//! a named collection under a string id and is stored as a JSON value.
//!
//! # Guarantees
//!
//! - Single-document operations are atomic, including [`DocumentStore::insert`]
//!   (which refuses to overwrite an existing id) and
//!   [`DocumentStore::replace_if`] (a conditional replace).
//! - Multi-document queries are available through [`Filter`] predicates.
//! - There are no cross-document transactions.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storage::{Collection, Document, DocumentStore, Filter, MemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Note {
//!     id: String,
//!     owner: String,
//! }
//!
//! impl Document for Note {
//!     const COLLECTION: &'static str = "notes";
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
//!     let notes: Collection<Note> = Collection::new(store);
//!
//!     notes.insert(&Note { id: "n1".into(), owner: "alice".into() }).await?;
//!     let mine = notes.find(&Filter::new().eq("owner", "alice")).await?;
//!     assert_eq!(mine.len(), 1);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Document store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Sled database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A document with the same id already exists in the collection
    #[error("Duplicate key in {collection}: {id}")]
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Conflicting document id
        id: String,
    },

    /// Stored bytes were not a JSON document
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A blocking store task panicked or was cancelled
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Check whether this error reports an id collision
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

/// Result type for document store operations
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, Value),
    AnyOf(String, Vec<Value>),
    Contains(String, Value),
}

impl Clause {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Clause::Eq(field, expected) => doc.get(field) == Some(expected),
            Clause::AnyOf(field, options) => {
                doc.get(field).map(|v| options.contains(v)).unwrap_or(false)
            }
            Clause::Contains(field, member) => doc
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(member))
                .unwrap_or(false),
        }
    }
}

/// Conjunctive predicate over top-level document fields
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Create a filter that matches everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.into(), value.into()));
        self
    }

    /// Require `field` to equal one of `values`
    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push(Clause::AnyOf(field.into(), values));
        self
    }

    /// Require the array in `field` to contain `value`
    pub fn contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Contains(field.into(), value.into()));
        self
    }

    /// Check whether a document satisfies every clause
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(doc))
    }

    /// Check if the filter has no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Document store abstraction trait
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document, failing with [`StoreError::DuplicateKey`] if the id is taken
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    /// Fetch a document by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Replace an existing document; returns false if it does not exist
    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool>;

    /// Replace a document only if its current state matches `expected`
    ///
    /// Returns false when the document is missing or no longer matches.
    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        doc: Value,
    ) -> Result<bool>;

    /// Delete a document by id; returns whether it existed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Find every document matching the filter
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>>;

    /// Delete every document matching the filter; returns the number removed
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Count documents matching the filter
    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        Ok(self.find(collection, filter).await?.len())
    }
}

// ============================================================================
// Typed collections
// ============================================================================

/// A record type stored in its own collection
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection name
    const COLLECTION: &'static str;

    /// Document id within the collection
    fn id(&self) -> &str;
}

/// Typed view over one collection of a [`DocumentStore`]
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), _marker: PhantomData }
    }
}

impl<T: Document> Collection<T> {
    /// Create a typed collection over a shared store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, _marker: PhantomData }
    }

    /// Collection name
    pub fn name(&self) -> &'static str {
        T::COLLECTION
    }

    /// Insert a new document
    pub async fn insert(&self, doc: &T) -> Result<()> {
        let value = serde_json::to_value(doc)?;
        self.store.insert(T::COLLECTION, doc.id(), value).await
    }

    /// Fetch a document by id
    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Replace an existing document
    pub async fn replace(&self, doc: &T) -> Result<bool> {
        let value = serde_json::to_value(doc)?;
        self.store.replace(T::COLLECTION, doc.id(), value).await
    }

    /// Replace a document only if its stored state matches `expected`
    pub async fn replace_if(&self, expected: &Filter, doc: &T) -> Result<bool> {
        let value = serde_json::to_value(doc)?;
        self.store
            .replace_if(T::COLLECTION, doc.id(), expected, value)
            .await
    }

    /// Delete a document by id
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(T::COLLECTION, id).await
    }

    /// Find all matching documents
    pub async fn find(&self, filter: &Filter) -> Result<Vec<T>> {
        self.store
            .find(T::COLLECTION, filter)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    /// Find the first matching document
    pub async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Delete all matching documents
    pub async fn delete_many(&self, filter: &Filter) -> Result<usize> {
        self.store.delete_many(T::COLLECTION, filter).await
    }

    /// Count matching documents
    pub async fn count(&self, filter: &Filter) -> Result<usize> {
        self.store.count(T::COLLECTION, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&json!({"id": "a"})));
        assert!(filter.matches(&json!({})));
    }

    #[test]
    fn test_eq_filter() {
        let filter = Filter::new().eq("owner", "alice");
        assert!(filter.matches(&json!({"owner": "alice"})));
        assert!(!filter.matches(&json!({"owner": "bob"})));
        assert!(!filter.matches(&json!({"other": "alice"})));
    }

    #[test]
    fn test_any_of_filter() {
        let filter = Filter::new().any_of("status", ["active", "pending_approval"]);
        assert!(filter.matches(&json!({"status": "active"})));
        assert!(filter.matches(&json!({"status": "pending_approval"})));
        assert!(!filter.matches(&json!({"status": "withdrawn"})));
    }

    #[test]
    fn test_contains_filter() {
        let filter = Filter::new().contains("participants", "bob");
        assert!(filter.matches(&json!({"participants": ["alice", "bob"]})));
        assert!(!filter.matches(&json!({"participants": ["alice", "carol"]})));
        assert!(!filter.matches(&json!({"participants": "bob"})));
    }

    #[test]
    fn test_clauses_are_conjunctive() {
        let filter = Filter::new().eq("sender_id", "s1").eq("listing_id", "l1");
        assert!(filter.matches(&json!({"sender_id": "s1", "listing_id": "l1"})));
        assert!(!filter.matches(&json!({"sender_id": "s1", "listing_id": "l2"})));
    }

    #[test]
    fn test_filter_matches_booleans() {
        let filter = Filter::new().eq("read", false);
        assert!(filter.matches(&json!({"read": false})));
        assert!(!filter.matches(&json!({"read": true})));
    }

    #[test]
    fn test_duplicate_key_error_display() {
        let err = StoreError::DuplicateKey { collection: "blocks".into(), id: "a:b".into() };
        assert!(err.is_duplicate_key());
        assert!(err.to_string().contains("blocks"));
        assert!(err.to_string().contains("a:b"));
    }
}

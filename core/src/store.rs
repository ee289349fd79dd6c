/// Remote document store contract.
///
/// The engine never talks to a concrete backend directly; everything goes
/// through [`DocumentStore`], a surface of named collections holding JSON
/// documents. Collection paths are flat strings; subcollections use the
/// `parent/{id}/child` form (e.g. `chats/a_b/messages`).
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// A document read from the store: its id plus a JSON field tree. Typed
/// validation happens at the read boundary (`types::*::from_doc`).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// Reference to a single document, used for batch deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field is an array containing value
    ArrayContains { field: String, value: Value },
}

/// A query against one collection: conjunctive filters plus at most one
/// ordering, which is all the engine's access patterns need.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }
}

/// One push from a live query: the full current result set, or the error the
/// backend reported for it.
pub type Snapshot = std::result::Result<Vec<Document>, ChatError>;

/// A live, cancellable query handle. Owns exactly one cancel function; the
/// holder must release it (explicitly or by drop) before attaching a
/// replacement for the same purpose. Dropping cancels, so a subscription can
/// never outlive its owner by accident.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Release the subscription now. Idempotent with drop.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// The store surface the engine is written against.
///
/// Write semantics mirror the remote store contract: `set_merge` deep-merges
/// nested objects into an existing document (creating it if absent), while
/// `update` replaces the given top-level fields on an existing document and
/// fails with `NotFound` otherwise. `delete_batch` removes all listed
/// documents as one atomic unit.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn set_merge(&self, collection: &str, id: &str, fields: Value) -> Result<()>;

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()>;

    /// Insert with a store-assigned id; returns the new id.
    async fn add(&self, collection: &str, fields: Value) -> Result<String>;

    async fn delete_batch(&self, refs: &[DocRef]) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Attach a live query. The store pushes an initial snapshot immediately
    /// and a fresh one after every relevant change, until the returned handle
    /// is cancelled.
    fn subscribe(&self, query: Query, tx: mpsc::UnboundedSender<Snapshot>) -> Subscription;
}

/// Local document store: in-memory collections with an optional sled mirror.
///
/// Implements the [`DocumentStore`] contract for single-process use; the
/// demo binary and the test suite run against it. Live queries are
/// re-evaluated after every mutation and pushed to their subscribers when the
/// result set actually changed.
use crate::error::{ChatError, Result};
use crate::store::{
    Direction, DocRef, Document, DocumentStore, Filter, Query, Snapshot, Subscription,
};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_SEPARATOR: char = '\u{1f}';

struct Watcher {
    id: u64,
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
    /// Fingerprint of the last pushed snapshot, for change suppression
    last: String,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    watchers: Vec<Watcher>,
    next_watcher_id: u64,
    next_doc_seq: u64,
    /// Collections whose reads fail with PermissionDenied (fault injection)
    denied_reads: HashSet<String>,
    /// Collections whose writes fail (fault injection)
    failing_writes: HashSet<String>,
    db: Option<sled::Db>,
}

pub struct LocalStore {
    inner: Arc<Mutex<Inner>>,
}

impl LocalStore {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Create a store persisted under `data_dir`
    pub fn with_storage(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("documents.db"))
            .map_err(|e| ChatError::Storage(format!("documents DB: {}", e)))?;

        let mut collections: HashMap<String, BTreeMap<String, Value>> = HashMap::new();

        // Load existing documents
        for entry in db.iter().flatten() {
            let (key, value) = entry;
            let key = String::from_utf8_lossy(&key).to_string();
            let Some((collection, id)) = key.split_once(KEY_SEPARATOR) else {
                warn!(key, "skipping malformed document key");
                continue;
            };
            match serde_json::from_slice::<Value>(&value) {
                Ok(fields) => {
                    collections
                        .entry(collection.to_string())
                        .or_default()
                        .insert(id.to_string(), fields);
                }
                Err(e) => warn!(key, error = %e, "skipping unreadable document"),
            }
        }

        let loaded: usize = collections.values().map(BTreeMap::len).sum();
        debug!(documents = loaded, "local store loaded");

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                collections,
                db: Some(db),
                ..Default::default()
            })),
        })
    }

    /// Fail reads (get/query/subscribe) on `collection` with PermissionDenied
    pub fn deny_reads(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.denied_reads.insert(collection.to_string());
        notify_watchers(&mut inner);
    }

    pub fn allow_reads(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.denied_reads.remove(collection);
        notify_watchers(&mut inner);
    }

    /// Fail writes (set/update/add/delete) on `collection`
    pub fn fail_writes(&self, collection: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_writes
            .insert(collection.to_string());
    }

    pub fn allow_writes(&self, collection: &str) {
        self.inner.lock().unwrap().failing_writes.remove(collection);
    }

    /// Number of live subscriptions
    pub fn active_watchers(&self) -> usize {
        self.inner.lock().unwrap().watchers.len()
    }

    /// Number of documents currently in `collection`
    pub fn collection_len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for LocalStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn check_read(inner: &Inner, collection: &str) -> Result<()> {
    if inner.denied_reads.contains(collection) {
        return Err(ChatError::PermissionDenied(format!(
            "reads denied on {}",
            collection
        )));
    }
    Ok(())
}

fn check_write(inner: &Inner, collection: &str) -> Result<()> {
    if inner.failing_writes.contains(collection) {
        return Err(ChatError::Storage(format!(
            "write unavailable: {}",
            collection
        )));
    }
    Ok(())
}

/// Deep merge: objects merge recursively, everything else is replaced.
fn merge_into(dest: &mut Value, src: &Value) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dest_map.get_mut(key) {
                    Some(dest_value) => merge_into(dest_value, src_value),
                    None => {
                        dest_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
        }
        (dest, src) => *dest = src.clone(),
    }
}

fn matches_filter(fields: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => fields.get(field) == Some(value),
        Filter::ArrayContains { field, value } => fields
            .get(field)
            .and_then(Value::as_array)
            .map(|items| items.contains(value))
            .unwrap_or(false),
    }
}

fn cmp_order_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

fn eval_query(inner: &Inner, query: &Query) -> Snapshot {
    eval_query_view(&inner.collections, &inner.denied_reads, query)
}

fn fingerprint(snapshot: &Snapshot) -> String {
    match snapshot {
        Ok(docs) => {
            let mut out = String::from("ok:");
            for doc in docs {
                out.push_str(&doc.id);
                out.push('=');
                out.push_str(&doc.fields.to_string());
                out.push(';');
            }
            out
        }
        Err(e) => format!("err:{}", e),
    }
}

fn notify_watchers(inner: &mut Inner) {
    // Split borrow: evaluate against an immutable view, then mutate watchers
    let results: Vec<(usize, Snapshot, String)> = inner
        .watchers
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let snapshot = eval_query_view(
                &inner.collections,
                &inner.denied_reads,
                &w.query,
            );
            let print = fingerprint(&snapshot);
            (i, snapshot, print)
        })
        .collect();

    let mut closed: Vec<u64> = Vec::new();
    for (i, snapshot, print) in results {
        let watcher = &mut inner.watchers[i];
        if watcher.last == print {
            continue;
        }
        watcher.last = print;
        if watcher.tx.send(snapshot).is_err() {
            closed.push(watcher.id);
        }
    }
    inner.watchers.retain(|w| !closed.contains(&w.id));
}

/// Same as [`eval_query`] but borrowing the pieces rather than all of
/// `Inner`, so `notify_watchers` can evaluate while holding watcher state.
fn eval_query_view(
    collections: &HashMap<String, BTreeMap<String, Value>>,
    denied_reads: &HashSet<String>,
    query: &Query,
) -> Snapshot {
    if denied_reads.contains(&query.collection) {
        return Err(ChatError::PermissionDenied(format!(
            "reads denied on {}",
            query.collection
        )));
    }

    let mut docs: Vec<Document> = collections
        .get(&query.collection)
        .map(|docs| {
            docs.iter()
                .filter(|(_, fields)| query.filters.iter().all(|f| matches_filter(fields, f)))
                .map(|(id, fields)| Document {
                    id: id.clone(),
                    fields: fields.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some((field, direction)) = &query.order_by {
        // Stable sort: documents that compare equal keep insertion order
        docs.sort_by(|a, b| {
            let ordering = cmp_order_values(
                a.fields.get(field).unwrap_or(&Value::Null),
                b.fields.get(field).unwrap_or(&Value::Null),
            );
            match direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
    }

    Ok(docs)
}

fn persist(inner: &Inner, collection: &str, id: &str, fields: Option<&Value>) -> Result<()> {
    let Some(db) = &inner.db else {
        return Ok(());
    };
    let key = format!("{}{}{}", collection, KEY_SEPARATOR, id);
    match fields {
        Some(fields) => {
            let value = serde_json::to_vec(fields)?;
            db.insert(key.as_bytes(), value)
                .map_err(|e| ChatError::Storage(format!("persist document: {}", e)))?;
        }
        None => {
            db.remove(key.as_bytes())
                .map_err(|e| ChatError::Storage(format!("remove document: {}", e)))?;
        }
    }
    db.flush()
        .map_err(|e| ChatError::Storage(format!("flush documents DB: {}", e)))?;
    Ok(())
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.lock().unwrap();
        check_read(&inner, collection)?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn set_merge(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        check_write(&inner, collection)?;
        let doc = inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        merge_into(doc, &fields);
        let merged = doc.clone();
        persist(&inner, collection, id, Some(&merged))?;
        notify_watchers(&mut inner);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        check_write(&inner, collection)?;
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| ChatError::NotFound(format!("{}/{}", collection, id)))?;

        // Top-level field replacement, unlike the deep merge of set_merge
        if let (Value::Object(doc_map), Value::Object(src_map)) = (doc, &fields) {
            for (key, value) in src_map {
                doc_map.insert(key.clone(), value.clone());
            }
        } else {
            return Err(ChatError::InvalidInput(
                "update requires an object of fields".to_string(),
            ));
        }
        let updated = inner.collections[collection][id].clone();
        persist(&inner, collection, id, Some(&updated))?;
        notify_watchers(&mut inner);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Value) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        check_write(&inner, collection)?;
        inner.next_doc_seq += 1;
        // Sequence prefix keeps iteration in insertion order
        let id = format!("{:010}-{}", inner.next_doc_seq, Uuid::new_v4());
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields.clone());
        persist(&inner, collection, &id, Some(&fields))?;
        notify_watchers(&mut inner);
        Ok(id)
    }

    async fn delete_batch(&self, refs: &[DocRef]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        // All-or-nothing: reject the whole batch before touching anything
        for doc_ref in refs {
            check_write(&inner, &doc_ref.collection)?;
        }
        for doc_ref in refs {
            if let Some(docs) = inner.collections.get_mut(&doc_ref.collection) {
                docs.remove(&doc_ref.id);
            }
            persist(&inner, &doc_ref.collection, &doc_ref.id, None)?;
        }
        notify_watchers(&mut inner);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let inner = self.inner.lock().unwrap();
        eval_query(&inner, query)
    }

    fn subscribe(&self, query: Query, tx: mpsc::UnboundedSender<Snapshot>) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_watcher_id;
        inner.next_watcher_id += 1;

        let initial = eval_query(&inner, &query);
        let last = fingerprint(&initial);
        let _ = tx.send(initial);

        inner.watchers.push(Watcher {
            id,
            query,
            tx,
            last,
        });
        drop(inner);

        let store = self.inner.clone();
        Subscription::new(move || {
            let mut inner = store.lock().unwrap();
            inner.watchers.retain(|w| w.id != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_merge_deep_merges_nested_maps() {
        let store = LocalStore::new();
        store
            .set_merge("users", "u1", json!({ "connections": { "a": { "shortId": "AAAAAA" } } }))
            .await
            .unwrap();
        store
            .set_merge("users", "u1", json!({ "connections": { "b": { "shortId": "BBBBBB" } } }))
            .await
            .unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        let connections = doc.fields.get("connections").unwrap();
        assert!(connections.get("a").is_some());
        assert!(connections.get("b").is_some());
    }

    #[tokio::test]
    async fn test_update_replaces_top_level_fields() {
        let store = LocalStore::new();
        store
            .set_merge("users", "u1", json!({ "groups": { "g1": {}, "g2": {} } }))
            .await
            .unwrap();
        store
            .update("users", "u1", json!({ "groups": { "g1": {} } }))
            .await
            .unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        let groups = doc.fields.get("groups").unwrap();
        assert!(groups.get("g1").is_some());
        assert!(groups.get("g2").is_none());
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = LocalStore::new();
        let err = store
            .update("users", "nobody", json!({ "online": true }))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_filters_and_ordering() {
        let store = LocalStore::new();
        store
            .set_merge("chats", "a_b", json!({ "participants": ["a", "b"], "lastMessageTime": "2" }))
            .await
            .unwrap();
        store
            .set_merge("chats", "a_c", json!({ "participants": ["a", "c"], "lastMessageTime": "5" }))
            .await
            .unwrap();
        store
            .set_merge("chats", "b_c", json!({ "participants": ["b", "c"], "lastMessageTime": "9" }))
            .await
            .unwrap();

        let query = Query::collection("chats")
            .where_array_contains("participants", "a")
            .order_by("lastMessageTime", Direction::Descending);
        let docs = store.query(&query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a_c", "a_b"]);
    }

    #[tokio::test]
    async fn test_subscribe_pushes_initial_and_changed_snapshots() {
        let store = LocalStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = store.subscribe(
            Query::collection("users").where_eq("shortId", "ABC123"),
            tx,
        );

        let initial = rx.recv().await.unwrap().unwrap();
        assert!(initial.is_empty());

        store
            .set_merge("users", "u1", json!({ "shortId": "ABC123" }))
            .await
            .unwrap();
        let updated = rx.recv().await.unwrap().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "u1");

        // Unrelated change: no push
        store
            .set_merge("users", "u2", json!({ "shortId": "XYZ789" }))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        sub.cancel();
        assert_eq!(store.active_watchers(), 0);
    }

    #[tokio::test]
    async fn test_delete_batch_removes_all_or_nothing() {
        let store = LocalStore::new();
        store
            .set_merge("chats", "a_b", json!({ "participants": ["a", "b"] }))
            .await
            .unwrap();
        store
            .set_merge("chats/a_b/messages", "m1", json!({ "text": "hi" }))
            .await
            .unwrap();

        store.fail_writes("chats");
        let refs = vec![
            DocRef::new("chats/a_b/messages", "m1"),
            DocRef::new("chats", "a_b"),
        ];
        assert!(store.delete_batch(&refs).await.is_err());
        assert_eq!(store.collection_len("chats/a_b/messages"), 1);

        store.allow_writes("chats");
        store.delete_batch(&refs).await.unwrap();
        assert_eq!(store.collection_len("chats/a_b/messages"), 0);
        assert_eq!(store.collection_len("chats"), 0);
    }

    #[tokio::test]
    async fn test_denied_reads_surface_permission_errors() {
        let store = LocalStore::new();
        store.deny_reads("groups");
        let err = store
            .query(&Query::collection("groups"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = LocalStore::with_storage(dir.path()).unwrap();
            store
                .set_merge("users", "u1", json!({ "shortId": "ABC123" }))
                .await
                .unwrap();
        }

        let store = LocalStore::with_storage(dir.path()).unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields.get("shortId"), Some(&json!("ABC123")));
    }
}

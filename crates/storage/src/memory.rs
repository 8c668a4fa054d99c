//! In-memory document store
//!
//! Keeps every collection in a map guarded by a single async lock. Used for
//! tests and for running the server without a data directory.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::document::{DocumentStore, Filter, Result, StoreError};

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-memory [`DocumentStore`] implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held in a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
            Some(slot) => {
                *slot = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        doc: Value,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
            Some(slot) if expected.matches(slot) => {
                *slot = doc;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        Ok(before - docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStore::new();
        store
            .insert("listings", "l1", json!({"id": "l1", "owner_id": "alice"}))
            .await
            .unwrap();

        let doc = store.get("listings", "l1").await.unwrap().unwrap();
        assert_eq!(doc["owner_id"], "alice");
        assert!(store.get("listings", "missing").await.unwrap().is_none());
        assert!(store.get("unknown", "l1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_rejected() {
        let store = MemoryStore::new();
        store.insert("blocks", "a:b", json!({"id": "a:b"})).await.unwrap();

        let err = store.insert("blocks", "a:b", json!({"id": "a:b"})).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(store.len("blocks").await, 1);
    }

    #[tokio::test]
    async fn test_replace_requires_existing() {
        let store = MemoryStore::new();
        assert!(!store.replace("c", "x", json!({"v": 1})).await.unwrap());

        store.insert("c", "x", json!({"v": 1})).await.unwrap();
        assert!(store.replace("c", "x", json!({"v": 2})).await.unwrap());
        assert_eq!(store.get("c", "x").await.unwrap().unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_replace_if_checks_current_state() {
        let store = MemoryStore::new();
        store
            .insert("invitations", "i1", json!({"status": "pending"}))
            .await
            .unwrap();

        let pending = Filter::new().eq("status", "pending");
        let first = store
            .replace_if("invitations", "i1", &pending, json!({"status": "accepted"}))
            .await
            .unwrap();
        let second = store
            .replace_if("invitations", "i1", &pending, json!({"status": "rejected"}))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.get("invitations", "i1").await.unwrap().unwrap()["status"], "accepted");
    }

    #[tokio::test]
    async fn test_find_and_delete_many() {
        let store = MemoryStore::new();
        for (id, conv) in [("m1", "c1"), ("m2", "c1"), ("m3", "c2")] {
            store
                .insert("messages", id, json!({"id": id, "conversation_id": conv}))
                .await
                .unwrap();
        }

        let filter = Filter::new().eq("conversation_id", "c1");
        assert_eq!(store.find("messages", &filter).await.unwrap().len(), 2);
        assert_eq!(store.count("messages", &filter).await.unwrap(), 2);

        assert_eq!(store.delete_many("messages", &filter).await.unwrap(), 2);
        assert_eq!(store.count("messages", &filter).await.unwrap(), 0);
        assert_eq!(store.len("messages").await, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.insert("c", "x", json!({})).await.unwrap();
        assert!(store.delete("c", "x").await.unwrap());
        assert!(!store.delete("c", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert("conversation_keys", "inv-1", json!({"n": 1})).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

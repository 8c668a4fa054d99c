//! Sled-backed document store
//!
//! Each collection maps to its own sled tree; documents are stored as JSON
//! bytes under their id. Conditional writes use sled's compare-and-swap so the
//! single-document atomicity guarantees of [`DocumentStore`] hold across
//! concurrent tasks. Every tree access runs under `spawn_blocking`.

use async_trait::async_trait;
use serde_json::Value;
use sled::{Db, IVec, Tree};
use std::sync::Arc;

use crate::document::{DocumentStore, Filter, Result, StoreError};

/// Sled store configuration
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Database path
    pub path: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for immediate flush)
    pub flush_every_ms: Option<u64>,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            path: "becayis.db".to_string(),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            use_compression: true,
            flush_every_ms: Some(500),
        }
    }
}

impl KvConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

/// Persistent [`DocumentStore`] backed by sled
pub struct KvStore {
    db: Arc<Db>,
}

impl KvStore {
    /// Open (or create) a store with configuration
    pub fn new(config: KvConfig) -> Result<Self> {
        let mut db_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression);

        if let Some(ms) = config.flush_every_ms {
            db_config = db_config.flush_every_ms(Some(ms));
        }

        let db = db_config.open()?;
        tracing::info!(path = %config.path, "Opened document store");

        Ok(Self { db: Arc::new(db) })
    }

    /// Create a temporary store that is removed on drop (for testing)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Run `op` against the collection's tree on the blocking thread pool
    ///
    /// sled does synchronous disk I/O, so no tree access happens on an async
    /// worker thread.
    async fn blocking<T, F>(&self, collection: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Tree) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || op(db.open_tree(collection)?)).await?
    }

    fn decode(bytes: &IVec) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::InvalidDocument(e.to_string()))
    }

    /// Swap `id` to `doc` if it exists and `expected` accepts its current value
    fn swap_existing(tree: &Tree, id: &str, expected: &Filter, doc: &Value) -> Result<bool> {
        let new_bytes = serde_json::to_vec(doc)?;
        loop {
            let Some(current) = tree.get(id.as_bytes())? else {
                return Ok(false);
            };
            if !expected.matches(&Self::decode(&current)?) {
                return Ok(false);
            }
            match tree.compare_and_swap(id.as_bytes(), Some(current), Some(new_bytes.clone()))? {
                Ok(()) => return Ok(true),
                // Lost a race with another writer; re-read and re-check
                Err(_) => continue,
            }
        }
    }
}

#[async_trait]
impl DocumentStore for KvStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&doc)?;
        let (name, id) = (collection.to_string(), id.to_string());
        self.blocking(collection, move |tree| {
            match tree.compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(bytes))? {
                Ok(()) => Ok(()),
                Err(_) => Err(StoreError::DuplicateKey { collection: name, id }),
            }
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let id = id.to_string();
        self.blocking(collection, move |tree| match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        })
        .await
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool> {
        let id = id.to_string();
        self.blocking(collection, move |tree| {
            Self::swap_existing(&tree, &id, &Filter::new(), &doc)
        })
        .await
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        doc: Value,
    ) -> Result<bool> {
        let (id, expected) = (id.to_string(), expected.clone());
        self.blocking(collection, move |tree| Self::swap_existing(&tree, &id, &expected, &doc))
            .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(collection, move |tree| Ok(tree.remove(id.as_bytes())?.is_some()))
            .await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let filter = filter.clone();
        self.blocking(collection, move |tree| {
            let mut docs = Vec::new();
            for item in tree.iter() {
                let (_, bytes) = item?;
                let doc = Self::decode(&bytes)?;
                if filter.matches(&doc) {
                    docs.push(doc);
                }
            }
            Ok(docs)
        })
        .await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let filter = filter.clone();
        self.blocking(collection, move |tree| {
            let mut removed = 0;
            for item in tree.iter() {
                let (key, bytes) = item?;
                if filter.matches(&Self::decode(&bytes)?) && tree.remove(key)?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }
}

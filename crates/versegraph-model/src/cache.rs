//! Local cache over an external key-value primitive.
//!
//! Collections are stored as JSON arrays under their name. Entries that no
//! longer decode are skipped with a warning instead of failing the read, so one
//! corrupt record never hides the rest of a collection. Read-modify-write
//! updates are stricter and never overwrite data they could not decode.

use crate::error::{GraphError, Result};
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Well-known collection names.
pub mod collections {
    pub const NOTES: &str = "notes";
    pub const EDGES: &str = "edges";
    pub const LAST_SYNC: &str = "last_sync_timestamp";
}

/// The async get/set/remove primitive the cache is built on.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Typed view of named collections plus the last-sync watermark.
///
/// Clones share the store and the write lock, so read-modify-write cycles
/// through [`LocalCache::update_collection`] never interleave.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    /// Unreadable collections and entries are logged and skipped.
    pub async fn get_collection<E: DeserializeOwned>(&self, name: &str) -> Result<Vec<E>> {
        self.read_collection(name, false).await
    }

    /// With `strict`, anything unreadable is an error instead of being skipped.
    async fn read_collection<E: DeserializeOwned>(&self, name: &str, strict: bool) -> Result<Vec<E>> {
        let Some(raw) = self.store.get(name).await? else {
            return Ok(Vec::new());
        };
        let values: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(err) if strict => {
                return Err(GraphError::Cache(format!("collection {name} is unreadable: {err}")));
            }
            Err(err) => {
                warn!(collection = name, error = %err, "Cached collection is unreadable; treating as empty");
                return Ok(Vec::new());
            }
        };

        let total = values.len();
        let mut entities: Vec<E> = Vec::with_capacity(total);
        for value in values {
            match serde_json::from_value(value) {
                Ok(entity) => entities.push(entity),
                Err(err) if strict => {
                    return Err(GraphError::Cache(format!(
                        "collection {name} has an undecodable entry: {err}"
                    )));
                }
                Err(err) => warn!(collection = name, error = %err, "Skipping undecodable cache entry"),
            }
        }
        debug!(collection = name, loaded = entities.len(), total, "Loaded cached collection");
        Ok(entities)
    }

    pub async fn set_collection<E: Serialize + Sync>(&self, name: &str, entities: &[E]) -> Result<()> {
        let raw = serde_json::to_string(entities)?;
        self.store.set(name, raw).await
    }

    /// Read a collection, let `update` edit it, and write it back under the cache write lock.
    ///
    /// Fails with [`GraphError::Cache`] rather than overwrite a collection
    /// that cannot be fully decoded.
    pub async fn update_collection<E, T, F>(&self, name: &str, update: F) -> Result<T>
    where
        E: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&mut Vec<E>) -> Result<T> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut entities: Vec<E> = self.read_collection(name, true).await?;
        let outcome = update(&mut entities)?;
        self.set_collection(name, &entities).await?;
        Ok(outcome)
    }

    pub async fn last_sync_timestamp(&self) -> Result<Option<Timestamp>> {
        let Some(raw) = self.store.get(collections::LAST_SYNC).await? else {
            return Ok(None);
        };
        let ts = Timestamp::parse_lenient(raw.trim().trim_matches('"'));
        if ts.is_epoch() {
            warn!(raw = %raw, "Ignoring malformed last-sync timestamp");
            return Ok(None);
        }
        Ok(Some(ts))
    }

    pub async fn set_last_sync_timestamp(&self, ts: Timestamp) -> Result<()> {
        self.store
            .set(collections::LAST_SYNC, ts.to_string())
            .await
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache").finish_non_exhaustive()
    }
}

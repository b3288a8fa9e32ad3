//! In-process key/value store
//!
//! Keeps every entity as an opaque blob in an ordered map so prefix scans come
//! back sorted and deterministic.

use async_trait::async_trait;
use ocs_core::{traits::KvStore, AppResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Ordered in-memory implementation of [`KvStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> AppResult<()> {
        debug!(key = %key, bytes = value.len(), "store set");
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        debug!(key = %key, "store remove");
        Ok(self.data.write().remove(key).is_some())
    }

    #[instrument(skip(self))]
    async fn keys_for_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let data = self.data.read();
        let keys: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        debug!("Found {} keys for prefix {}", keys.len(), prefix);
        Ok(keys)
    }
}

//! Repository implementations
//!
//! [`DataManager`] is the typed facade over a [`KvStore`]. Each submodule adds
//! the accessors for one family of entities; values are stored as JSON blobs
//! under the keys built by `ocs_core::keys`.

pub mod account_repo;
pub mod action_plan_repo;
pub mod actions_repo;
pub mod rating_repo;

use ocs_core::{traits::KvStore, AppError, AppResult};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::error;

/// Typed access to every persisted entity
#[derive(Clone)]
pub struct DataManager {
    store: Arc<dyn KvStore>,
}

impl DataManager {
    /// Create a data manager over a store
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Read and decode a value, `None` when the key is absent
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let raw = self.store.get(key).await.map_err(|e| {
            error!("Storage error reading {}: {}", key, e);
            e
        })?;
        match raw {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                error!("Failed to decode {}: {}", key, e);
                AppError::Serialization(format!("Failed to decode {}: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// Read a value that must exist
    async fn get_required<T: DeserializeOwned>(&self, key: &str) -> AppResult<T> {
        self.get_json(key)
            .await?
            .ok_or_else(|| AppError::NotFound(key.to_string()))
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> AppResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            error!("Failed to encode {}: {}", key, e);
            AppError::Serialization(format!("Failed to encode {}: {}", key, e))
        })?;
        self.store.set(key, bytes).await.map_err(|e| {
            error!("Storage error writing {}: {}", key, e);
            e
        })
    }

    async fn remove_key(&self, key: &str) -> AppResult<bool> {
        self.store.remove(key).await.map_err(|e| {
            error!("Storage error removing {}: {}", key, e);
            e
        })
    }

    /// IDs (key suffixes) of every entity stored under `prefix`
    async fn ids_for_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let keys = self.store.keys_for_prefix(prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|k| ocs_core::keys::strip_prefix(k, prefix))
            .map(str::to_string)
            .collect())
    }
}

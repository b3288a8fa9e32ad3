//! In-process TTL cache

use async_trait::async_trait;
use ocs_core::error::AppError;
use ocs_core::traits::CacheService;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error};

struct Entry {
    json: String,
    expires_at: Instant,
}

/// Process-local cache with per-entry TTL
///
/// Values are stored serialized so the cache behaves like the Redis-backed
/// one: callers get owned copies back and type mismatches surface as
/// serialization errors. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl CacheService for LocalCache {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let json = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => Some(entry.json.clone()),
                _ => None,
            }
        };

        match json {
            Some(json) => {
                let value = serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })?;
                debug!("Cache HIT: {}", key);
                Ok(Some(value))
            }
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError> {
        debug!("SET {} (TTL: {}s)", key, ttl_secs);
        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for key {}: {}", key, e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        self.entries.write().insert(
            key.to_string(),
            Entry {
                json,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        debug!("DEL {}", key);
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self
            .entries
            .read()
            .get(key)
            .map_or(false, |e| e.expires_at > Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        id: i32,
        name: String,
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = LocalCache::new();
        let data = TestData {
            id: 1,
            name: "Test".to_string(),
        };

        cache.set("test_key", &data, 60).await.unwrap();
        let result: Option<TestData> = cache.get("test_key").await.unwrap();
        assert_eq!(result, Some(data));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = LocalCache::new();
        cache.set("test_key", &"value", 60).await.unwrap();
        assert!(cache.exists("test_key").await.unwrap());

        assert!(cache.delete("test_key").await.unwrap());
        assert!(!cache.exists("test_key").await.unwrap());
        assert!(!cache.delete("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let cache = LocalCache::new();
        cache.set("test_key", &"value", 0).await.unwrap();

        let result: Option<String> = cache.get("test_key").await.unwrap();
        assert_eq!(result, None);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let cache = LocalCache::new();
        cache.set("test_key", &"not a struct", 60).await.unwrap();
        let result = cache.get::<TestData>("test_key").await;
        assert!(matches!(result, Err(AppError::Serialization(_))));
    }
}

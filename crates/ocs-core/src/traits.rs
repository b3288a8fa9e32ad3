//! Common traits for storage and collaborators
//!
//! Defines the seams between the engine and the outside world: the key/value
//! store, the task queue, the cache, cache invalidation, event publication and
//! call costing.

use crate::error::AppError;
use crate::models::{Account, ActionCdr, CallDescriptor, EventCost, Task};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;

/// Key/value store holding every persisted entity as an opaque blob
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError>;

    /// Delete a key, returns whether it existed
    async fn remove(&self, key: &str) -> Result<bool, AppError>;

    /// All keys starting with `prefix`, in ascending order
    async fn keys_for_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError>;
}

/// FIFO queue of pending immediate executions
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push_task(&self, task: Task) -> Result<(), AppError>;

    async fn pop_task(&self) -> Result<Option<Task>, AppError>;

    async fn len(&self) -> Result<usize, AppError>;
}

/// Cache service trait
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Get value from cache
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;

    /// Set value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
}

/// Entities an external cache should reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReloadRequest {
    #[serde(default)]
    pub action_plan_ids: BTreeSet<String>,
    #[serde(default)]
    pub account_action_plan_ids: BTreeSet<String>,
    #[serde(default)]
    pub account_ids: BTreeSet<String>,
}

impl CacheReloadRequest {
    pub fn is_empty(&self) -> bool {
        self.action_plan_ids.is_empty()
            && self.account_action_plan_ids.is_empty()
            && self.account_ids.is_empty()
    }

    pub fn merge(&mut self, other: CacheReloadRequest) {
        self.action_plan_ids.extend(other.action_plan_ids);
        self.account_action_plan_ids
            .extend(other.account_action_plan_ids);
        self.account_ids.extend(other.account_ids);
    }
}

/// Publishes cache reload requests
///
/// Delivery is best effort: callers log failures and carry on.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn reload(&self, request: CacheReloadRequest) -> Result<(), AppError>;
}

/// Notification emitted by action execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    AccountPublished { account: Account },
    CdrLogged { cdr: ActionCdr },
    ActionLogged { account_id: String, message: String },
}

/// Receives engine events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: EngineEvent);
}

/// Standard call-costing path
#[async_trait]
pub trait CostEngine: Send + Sync {
    async fn get_cost(&self, cd: &CallDescriptor) -> Result<EventCost, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_request_merge() {
        let mut request = CacheReloadRequest::default();
        assert!(request.is_empty());

        request.merge(CacheReloadRequest {
            action_plan_ids: ["PACKAGE_10".to_string()].into(),
            ..Default::default()
        });
        request.merge(CacheReloadRequest {
            action_plan_ids: ["PACKAGE_10".to_string()].into(),
            account_action_plan_ids: ["cgrates.org:1001".to_string()].into(),
            ..Default::default()
        });

        assert!(!request.is_empty());
        assert_eq!(request.action_plan_ids.len(), 1);
        assert_eq!(request.account_action_plan_ids.len(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::ActionLogged {
            account_id: "cgrates.org:1001".to_string(),
            message: "hello".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "action_logged");
    }
}

//! Cache invalidation publishers
//!
//! After a write the services tell the external cache which entities to
//! reload. Two transports are provided: an in-process broadcast channel and
//! Redis pub/sub.

use async_trait::async_trait;
use ocs_core::error::AppError;
use ocs_core::traits::{CacheInvalidator, CacheReloadRequest};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Default capacity of the in-process reload channel
const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts reload requests to in-process subscribers
#[derive(Clone)]
pub struct ChannelInvalidator {
    sender: broadcast::Sender<CacheReloadRequest>,
}

impl ChannelInvalidator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheReloadRequest> {
        self.sender.subscribe()
    }
}

impl Default for ChannelInvalidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for ChannelInvalidator {
    async fn reload(&self, request: CacheReloadRequest) -> Result<(), AppError> {
        if request.is_empty() {
            return Ok(());
        }
        match self.sender.send(request) {
            Ok(receivers) => debug!("Reload request delivered to {} subscribers", receivers),
            // Nobody listening is not an error for a fire-and-forget signal
            Err(_) => debug!("Reload request dropped, no subscribers"),
        }
        Ok(())
    }
}

/// Publishes reload requests as JSON on a Redis channel
#[derive(Clone)]
pub struct RedisInvalidator {
    manager: ConnectionManager,
    channel: String,
}

impl RedisInvalidator {
    /// Connect to Redis
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `channel` - Pub/sub channel reload requests are published on
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the connection fails
    pub async fn new(url: &str, channel: impl Into<String>) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::Cache(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::Cache(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self {
            manager,
            channel: channel.into(),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::Cache(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}

#[async_trait]
impl CacheInvalidator for RedisInvalidator {
    async fn reload(&self, request: CacheReloadRequest) -> Result<(), AppError> {
        if request.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_string(&request).map_err(|e| {
            error!("Failed to serialize reload request: {}", e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        debug!("PUBLISH {} {}", self.channel, payload);
        let mut conn = self.manager.clone();
        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(Self::map_redis_error)?;
        debug!("Reload request reached {} subscribers", receivers);
        Ok(())
    }
}

//! Caching layer for the OCS charging engine
//!
//! Provides the cache collaborators the services talk to:
//!
//! - [`LocalCache`], an in-process TTL cache implementing `CacheService`. It
//!   hosts the transient rating-profile slots staged by the rating-plan cost
//!   resolver and the destination lookups of the cost engine.
//! - [`ChannelInvalidator`] and [`RedisInvalidator`], fire-and-forget
//!   publishers of cache reload requests (in-process broadcast or Redis
//!   pub/sub).
//!
//! # Example
//!
//! ```
//! use ocs_cache::LocalCache;
//! use ocs_core::traits::CacheService;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = LocalCache::new();
//!
//!     // Set a value with 60 second TTL
//!     cache.set("my_key", &"my_value", 60).await?;
//!
//!     // Get the value back
//!     let value: Option<String> = cache.get("my_key").await?;
//!     assert_eq!(value, Some("my_value".to_string()));
//!
//!     Ok(())
//! }
//! ```

pub mod keys;

mod invalidator;
mod local;

pub use invalidator::{ChannelInvalidator, RedisInvalidator};
pub use local::LocalCache;

//! Cache key constants and builders
//!
//! Provides standardized key naming patterns for cached entities, keeping
//! cache keys apart from storage keys.
//!
//! # Key Patterns
//!
//! - `rating_profile_tmp:{correlation_id}` - Transient rating profile staged for one cost request
//! - `destination:{destination_id}` - Cached destination prefix groups
//!
//! # Example
//!
//! ```
//! use ocs_cache::keys;
//!
//! let slot = keys::transient_rating_profile_key("3f1c");
//! assert_eq!(slot, "rating_profile_tmp:3f1c");
//! ```

/// Prefix for transient rating profiles
///
/// Format: `rating_profile_tmp:{correlation_id}`
pub const TRANSIENT_RATING_PROFILE_PREFIX: &str = "rating_profile_tmp";

/// Prefix for cached destinations
///
/// Format: `destination:{destination_id}`
pub const DESTINATION_PREFIX: &str = "destination";

/// Default TTL for cached destinations (1 hour)
pub const DESTINATION_TTL_SECS: u64 = 3600;

/// Build the transient rating profile slot for one in-flight request
///
/// # Example
///
/// ```
/// use ocs_cache::keys::transient_rating_profile_key;
///
/// let key = transient_rating_profile_key("abc-123");
/// assert_eq!(key, "rating_profile_tmp:abc-123");
/// ```
pub fn transient_rating_profile_key(correlation_id: &str) -> String {
    format!("{}:{}", TRANSIENT_RATING_PROFILE_PREFIX, correlation_id)
}

/// Build a cache key for a destination
///
/// # Example
///
/// ```
/// use ocs_cache::keys::destination_key;
///
/// let key = destination_key("PE_MOBILE");
/// assert_eq!(key, "destination:PE_MOBILE");
/// ```
pub fn destination_key(destination_id: &str) -> String {
    format!("{}:{}", DESTINATION_PREFIX, destination_id)
}

//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine-wide defaults
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Tenant used when a request does not name one
    #[serde(default = "default_tenant")]
    pub default_tenant: String,

    /// Category used when a request does not name one
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Maximum wait for a Guardian lock in milliseconds
    #[serde(default = "default_locking_timeout")]
    pub locking_timeout_ms: u64,

    /// Decimal places kept on monetary results
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,
}

fn default_tenant() -> String {
    "cgrates.org".to_string()
}

fn default_category() -> String {
    "call".to_string()
}

fn default_locking_timeout() -> u64 {
    5000
}

fn default_rounding_decimals() -> u32 {
    4
}

impl GeneralConfig {
    /// Guardian acquisition timeout as a `Duration`
    pub fn locking_timeout(&self) -> Duration {
        Duration::from_millis(self.locking_timeout_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            default_category: default_category(),
            locking_timeout_ms: default_locking_timeout(),
            rounding_decimals: default_rounding_decimals(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Run the background scheduling loop
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Longest time the loop sleeps before re-checking its queue
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_max_idle() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            max_idle_secs: default_max_idle(),
        }
    }
}

/// Cache collaborator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Redis URL for publishing invalidation requests (in-process channel when absent)
    pub redis_url: Option<String>,

    /// Pub/sub channel carrying invalidation requests
    #[serde(default = "default_invalidation_channel")]
    pub invalidation_channel: String,

    /// TTL for transient rating-profile slots in seconds
    #[serde(default = "default_transient_ttl")]
    pub transient_ttl_secs: u64,
}

fn default_invalidation_channel() -> String {
    "ocs:cache:reload".to_string()
}

fn default_transient_ttl() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            invalidation_channel: default_invalidation_channel(),
            transient_ttl_secs: default_transient_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("general.default_tenant", default_tenant())?
            .set_default("general.default_category", default_category())?
            .set_default("general.locking_timeout_ms", default_locking_timeout() as i64)?
            .set_default("general.rounding_decimals", default_rounding_decimals() as i64)?
            .set_default("scheduler.enabled", default_scheduler_enabled())?
            .set_default("scheduler.max_idle_secs", default_max_idle() as i64)?
            .set_default("cache.invalidation_channel", default_invalidation_channel())?
            .set_default("cache.transient_ttl_secs", default_transient_ttl() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with OCS_ prefix
            .add_source(
                Environment::with_prefix("OCS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("OCS").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

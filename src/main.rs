//! OCS charging engine
//!
//! Starts the balance and action-scheduling engine: loads configuration,
//! wires the services over in-process storage and runs the scheduler loop
//! until Ctrl-C.

use anyhow::Context;
use ocs_cache::{ChannelInvalidator, LocalCache, RedisInvalidator};
use ocs_core::{traits::CacheInvalidator, AppConfig};
use ocs_db::{MemoryStore, MemoryTaskQueue};
use ocs_services::{BroadcastEventSink, Engine};
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing(config: &AppConfig) {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| config.logging.level.clone());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ocs_engine={level},ocs_services={level},ocs_db={level},ocs_cache={level}",
            level = log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

async fn build_invalidator(config: &AppConfig) -> Arc<dyn CacheInvalidator> {
    match &config.cache.redis_url {
        Some(url) => match RedisInvalidator::new(url, config.cache.invalidation_channel.clone()).await {
            Ok(invalidator) => {
                info!("Publishing cache reloads on Redis channel {}", config.cache.invalidation_channel);
                Arc::new(invalidator)
            }
            Err(e) => {
                warn!("Redis unavailable ({}), using in-process reload channel", e);
                Arc::new(ChannelInvalidator::new())
            }
        },
        None => Arc::new(ChannelInvalidator::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Starting OCS engine v{}", env!("CARGO_PKG_VERSION"));

    let invalidator = build_invalidator(&config).await;
    let engine = Engine::new(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryTaskQueue::new()),
        Arc::new(LocalCache::new()),
        invalidator,
        Arc::new(BroadcastEventSink::new()),
    );

    let shutdown = CancellationToken::new();
    let scheduler_handle = if config.scheduler.enabled {
        Some(tokio::spawn(engine.scheduler.clone().run(shutdown.clone())))
    } else {
        info!("Scheduler disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    info!("OCS engine stopped");
    Ok(())
}

//! OCS Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the charging engine. It includes:
//!
//! - Domain models (Account, Balance, Action, ActionPlan, rating entities)
//! - Timing rules and next-start-time computation
//! - Storage key layout shared by the data and cache layers
//! - Common traits for storage, task queues, caches and event sinks
//! - Unified error handling
//! - Application configuration

pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

//! OCS Storage Layer
//!
//! This crate provides the persisted-state access for the charging engine.
//! It includes:
//!
//! - An in-process key/value store honoring get/set/remove/prefix-scan
//! - `DataManager`, typed repositories for every entity over any `KvStore`
//! - An in-process FIFO task queue

pub mod repositories;
pub mod store;
pub mod task_queue;

pub use repositories::DataManager;
pub use store::MemoryStore;
pub use task_queue::MemoryTaskQueue;

// Re-export commonly used types
pub use ocs_core::{AppError, AppResult};

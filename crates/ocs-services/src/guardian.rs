//! Guardian: named advisory locks
//!
//! Serializes read-modify-write sequences on accounts and action plans. A
//! caller names the keys it needs, the Guardian acquires all of them in sorted
//! order within one deadline, runs the critical section and releases the keys
//! on every exit path, including unwinding.
//!
//! Nested calls on *different* keys are the normal way of composing critical
//! sections (an account lock inside an action-plan lock). Re-acquiring a key
//! already held by the same task waits for itself and ends in
//! [`AppError::LockTimeout`].

use ocs_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

type KeyLock = Arc<AsyncMutex<()>>;

/// Lock table shared by every mutating service
#[derive(Default)]
pub struct Guardian {
    locks: Mutex<HashMap<String, KeyLock>>,
}

/// Keys held by one critical section
///
/// Dropping it releases the keys and forgets lock entries nobody else is
/// waiting on, so the table only holds keys currently in use.
struct HeldKeys<'a> {
    guardian: &'a Guardian,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for HeldKeys<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        self.guardian.forget_idle(&self.keys);
    }
}

impl Guardian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding every key in `keys`
    ///
    /// Keys are deduplicated and acquired in ascending order so two callers
    /// naming overlapping key sets cannot deadlock. If all keys are not held
    /// within `timeout`, the keys acquired so far are released and
    /// `LockTimeout` is returned without running `f`. The result of `f` is
    /// returned unchanged; it is never retried.
    pub async fn guard<T, F, Fut>(&self, keys: &[String], timeout: Duration, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let held = self.acquire(keys, timeout).await?;
        let result = f().await;
        drop(held);
        result
    }

    /// Number of keys currently locked or waited on
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }

    async fn acquire(&self, keys: &[String], timeout: Duration) -> AppResult<HeldKeys<'_>> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let deadline = Instant::now() + timeout;
        let mut held = HeldKeys {
            guardian: self,
            keys: Vec::with_capacity(sorted.len()),
            guards: Vec::with_capacity(sorted.len()),
        };

        for key in sorted {
            let lock = self.lock_for(&key);
            // Registered before waiting so a timeout still cleans the entry up
            held.keys.push(key.clone());
            match timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => {
                    debug!("Guardian acquired {}", key);
                    held.guards.push(guard);
                }
                Err(_) => {
                    warn!(
                        "Guardian timed out after {}ms waiting for {}",
                        timeout.as_millis(),
                        key
                    );
                    return Err(AppError::lock_timeout(keys, timeout));
                }
            }
        }

        Ok(held)
    }

    fn lock_for(&self, key: &str) -> KeyLock {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop table entries only the table still references
    fn forget_idle(&self, keys: &[String]) {
        let mut locks = self.locks.lock();
        for key in keys {
            if locks.get(key).map_or(false, |l| Arc::strong_count(l) == 1) {
                locks.remove(key);
            }
        }
    }
}

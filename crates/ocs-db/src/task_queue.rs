//! In-process FIFO task queue

use async_trait::async_trait;
use ocs_core::{models::Task, traits::TaskQueue, AppResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Unbounded FIFO implementation of [`TaskQueue`]
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn push_task(&self, task: Task) -> AppResult<()> {
        debug!(
            task = %task.uuid,
            account = %task.account_id,
            actions = %task.actions_id,
            "Queued task"
        );
        self.tasks.lock().push_back(task);
        Ok(())
    }

    async fn pop_task(&self) -> AppResult<Option<Task>> {
        Ok(self.tasks.lock().pop_front())
    }

    async fn len(&self) -> AppResult<usize> {
        Ok(self.tasks.lock().len())
    }
}

//! Action plan scheduler
//!
//! Turns the stored action plans into a queue of timings ordered by their
//! next start time and executes them when due. Besides the live loop it
//! offers:
//!
//! - forced execution of whole plans, ignoring their timings
//! - deterministic replay of every timing due inside a past or future window
//! - draining of the task queue filled by plan rebinds
//!
//! The scheduler takes no locks of its own. Mutual exclusion with concurrent
//! callers comes from the per-account Guardian keys taken during execution.

use chrono::{DateTime, Duration, Utc};
use ocs_core::{
    config::SchedulerConfig,
    models::{ActionPlan, ActionTiming},
    traits::TaskQueue,
    AppError, AppResult,
};
use ocs_db::DataManager;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::constants::REPLAY_TICK_SECS;
use crate::dto::{ExecuteActionPlansArgs, ExecuteActionsArgs};
use crate::executor::ActionExecutor;

/// Non-blocking "rebuild your queue" signal for the scheduling loop
///
/// A signal raised while the loop is busy is kept and consumed on its next
/// wait, so reloads are never lost.
#[derive(Clone, Default)]
pub struct ReloadSignal {
    notify: Arc<Notify>,
}

impl ReloadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No queue built yet
    Idle,
    /// Queue built, loop not consuming it
    Loaded,
    /// Live loop executing due timings
    Running,
    /// Replaying a time window
    Replaying,
}

/// One execution performed by a replay or a forced run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub action_plan_id: String,
    pub timing_uuid: String,
    pub actions_id: String,
    pub executed_at: DateTime<Utc>,
}

/// Queue entry as seen from outside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTiming {
    pub action_plan_id: String,
    pub timing_uuid: String,
    pub actions_id: String,
    pub next_start: DateTime<Utc>,
}

struct QueueItem {
    next: DateTime<Utc>,
    timing: ActionTiming,
}

/// Earliest first, then heavier, then by plan ID and timing UUID
fn queue_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.next
        .cmp(&b.next)
        .then_with(|| {
            b.timing
                .weight
                .partial_cmp(&a.timing.weight)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.timing.action_plan_id().cmp(b.timing.action_plan_id()))
        .then_with(|| a.timing.uuid.cmp(&b.timing.uuid))
}

fn insert_sorted(queue: &mut Vec<QueueItem>, item: QueueItem) {
    let pos = queue.partition_point(|x| queue_order(x, &item) != Ordering::Greater);
    queue.insert(pos, item);
}

/// Non-ASAP timings of `plans` due at or after `from`, in queue order
fn build_queue(plans: &[ActionPlan], from: DateTime<Utc>) -> Vec<QueueItem> {
    let mut queue = Vec::new();
    for plan in plans {
        for mut timing in plan.bound_timings() {
            if timing.is_asap() {
                continue;
            }
            timing.reset_start_time_cache();
            match timing.next_start_time(from) {
                Some(next) if next >= from => queue.push(QueueItem { next, timing }),
                _ => debug!(
                    "Dropping timing {} of plan {}: no occurrence after {}",
                    timing.uuid, plan.id, from
                ),
            }
        }
    }
    queue.sort_by(queue_order);
    queue
}

fn tick() -> Duration {
    Duration::seconds(REPLAY_TICK_SECS)
}

/// Schedules and executes action plan timings
pub struct Scheduler {
    dm: DataManager,
    executor: Arc<ActionExecutor>,
    tasks: Arc<dyn TaskQueue>,
    config: SchedulerConfig,
    queue: Mutex<Vec<QueueItem>>,
    state: Mutex<SchedulerState>,
    reload: ReloadSignal,
}

impl Scheduler {
    pub fn new(
        dm: DataManager,
        executor: Arc<ActionExecutor>,
        tasks: Arc<dyn TaskQueue>,
        reload: ReloadSignal,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            dm,
            executor,
            tasks,
            config,
            queue: Mutex::new(Vec::new()),
            state: Mutex::new(SchedulerState::Idle),
            reload,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn set_state(&self, state: SchedulerState) -> SchedulerState {
        std::mem::replace(&mut *self.state.lock(), state)
    }

    /// Ask the live loop to rebuild its queue; returns immediately
    pub fn reload(&self) {
        info!("Scheduler reload requested");
        self.reload.notify();
    }

    pub fn reload_signal(&self) -> ReloadSignal {
        self.reload.clone()
    }

    /// Current queue in execution order
    pub fn queue_snapshot(&self) -> Vec<QueuedTiming> {
        self.queue
            .lock()
            .iter()
            .map(|item| QueuedTiming {
                action_plan_id: item.timing.action_plan_id().to_string(),
                timing_uuid: item.timing.uuid.clone(),
                actions_id: item.timing.actions_id.clone(),
                next_start: item.next,
            })
            .collect()
    }

    /// Drain pending tasks, then rebuild the queue from stored plans
    ///
    /// Returns the queue length.
    #[instrument(skip(self))]
    pub async fn load(&self, now: DateTime<Utc>) -> AppResult<usize> {
        self.process_tasks(now).await?;

        let plans = self.dm.get_all_action_plans().await.map_err(|e| {
            error!("Failed to load action plans: {}", e);
            e
        })?;
        let queue = build_queue(&plans, now);
        let len = queue.len();
        *self.queue.lock() = queue;

        let mut state = self.state.lock();
        if *state == SchedulerState::Idle {
            *state = SchedulerState::Loaded;
        }
        info!("Scheduler queue loaded: {} timings from {} plans", len, plans.len());
        Ok(len)
    }

    /// Execute every queued task, returns how many ran
    ///
    /// A failing task is logged and dropped; the rest still run.
    pub async fn process_tasks(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut executed = 0;
        while let Some(task) = self.tasks.pop_task().await? {
            match self.executor.execute_task(&task, now).await {
                Ok(()) => executed += 1,
                Err(e) => error!(
                    "Task {} ({} on {}) failed: {}",
                    task.uuid, task.actions_id, task.account_id, e
                ),
            }
        }
        if executed > 0 {
            debug!("Executed {} queued tasks", executed);
        }
        Ok(executed)
    }

    /// Execute every queued timing due at or before `now`
    ///
    /// Failures are logged; the timing is rescheduled either way.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let mut executed = 0;
        loop {
            let item = {
                let mut queue = self.queue.lock();
                match queue.first() {
                    Some(head) if head.next <= now => queue.remove(0),
                    _ => break,
                }
            };

            match self.executor.execute_timing(&item.timing, now).await {
                Ok(()) => executed += 1,
                Err(e) => error!(
                    "Timing {} of plan {} failed: {}",
                    item.timing.uuid,
                    item.timing.action_plan_id(),
                    e
                ),
            }

            let from = item.next.max(now) + tick();
            let mut timing = item.timing;
            timing.reset_start_time_cache();
            match timing.next_start_time(from) {
                Some(next) if next >= from => {
                    insert_sorted(&mut self.queue.lock(), QueueItem { next, timing })
                }
                _ => debug!("Timing {} has no further occurrence", timing.uuid),
            }
        }
        executed
    }

    /// Time until the head of the queue is due, capped by the idle limit
    fn next_wakeup(&self, now: DateTime<Utc>) -> std::time::Duration {
        let max_idle = std::time::Duration::from_secs(self.config.max_idle_secs);
        self.queue
            .lock()
            .first()
            .and_then(|head| (head.next - now).to_std().ok())
            .map_or(max_idle, |wait| wait.min(max_idle))
    }

    /// Live loop: run due timings, sleep until the next one, rebuild on reload
    ///
    /// Returns when `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Scheduler loop started");
        loop {
            if let Err(e) = self.load(Utc::now()).await {
                error!("Scheduler reload failed: {}", e);
            }
            self.set_state(SchedulerState::Running);

            loop {
                let now = Utc::now();
                self.run_due(now).await;
                let wait = self.next_wakeup(Utc::now());

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.set_state(SchedulerState::Loaded);
                        info!("Scheduler loop stopped");
                        return;
                    }
                    _ = self.reload.notified() => {
                        debug!("Scheduler woken by reload");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    /// Forced run of one plan, or replay of a window
    ///
    /// With a window, timings due inside it are replayed (only the named
    /// plan's when one is given). Without a window the named plan's timings
    /// all run now, heaviest first.
    #[instrument(skip(self, args))]
    pub async fn execute_actions(&self, args: ExecuteActionsArgs) -> AppResult<Vec<ExecutionRecord>> {
        args.validate()?;
        let plan_id = args.action_plan_id.as_deref().filter(|p| !p.is_empty());

        match (args.time_start, args.time_end, plan_id) {
            (Some(start), Some(end), plan_id) => self.replay(start, end, plan_id).await,
            (None, None, Some(plan_id)) => {
                let plan = self.dm.get_action_plan(plan_id).await?;
                self.force_plan(plan, None).await
            }
            _ => Err(AppError::Validation(
                "either an action plan ID or a time window is required".to_string(),
            )),
        }
    }

    /// Forced run of several plans for one account, in the given order
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn execute_action_plans(
        &self,
        args: ExecuteActionPlansArgs,
    ) -> AppResult<Vec<ExecutionRecord>> {
        args.validate()?;
        let account_id = args.account_id(&self.executor.config().default_tenant);

        let mut records = Vec::new();
        for plan_id in &args.action_plan_ids {
            let plan = self.dm.get_action_plan(plan_id).await?;
            records.extend(self.force_plan(plan, Some(&account_id)).await?);
        }
        Ok(records)
    }

    async fn force_plan(
        &self,
        mut plan: ActionPlan,
        account_id: Option<&str>,
    ) -> AppResult<Vec<ExecutionRecord>> {
        plan.sort_timings_by_weight();
        info!("Forcing action plan {}", plan.id);

        let mut records = Vec::new();
        for mut timing in plan.bound_timings() {
            if let Some(account_id) = account_id {
                timing.set_account_ids(BTreeSet::from([account_id.to_string()]));
            }
            let now = Utc::now();
            self.executor.execute_timing(&timing, now).await?;
            records.push(record(&timing, now));
        }
        Ok(records)
    }

    /// Deterministically execute every timing due in `[start, end]`
    ///
    /// Occurrences are processed in queue order. After each execution the
    /// simulated clock moves one tick past it and the timing is rescheduled
    /// from there. The first execution error aborts the replay; executions
    /// before it are kept.
    #[instrument(skip(self))]
    pub async fn replay(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        plan_id: Option<&str>,
    ) -> AppResult<Vec<ExecutionRecord>> {
        let plans = match plan_id {
            Some(id) => vec![self.dm.get_action_plan(id).await?],
            None => self.dm.get_all_action_plans().await?,
        };

        let previous = self.set_state(SchedulerState::Replaying);
        let result = self.replay_plans(&plans, start, end).await;
        self.set_state(previous);

        match &result {
            Ok(records) => info!(
                "Replayed {} executions between {} and {}",
                records.len(),
                start,
                end
            ),
            Err(e) => warn!("Replay between {} and {} aborted: {}", start, end, e),
        }
        result
    }

    async fn replay_plans(
        &self,
        plans: &[ActionPlan],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<ExecutionRecord>> {
        let mut queue = build_queue(plans, start);
        let mut records = Vec::new();
        let mut current = start;

        while let Some(due) = queue.first().map(|head| head.next) {
            if due > end {
                break;
            }
            let mut item = queue.remove(0);
            current = current.max(due);

            self.executor.execute_timing(&item.timing, current).await?;
            records.push(record(&item.timing, current));

            current += tick();
            item.timing.reset_start_time_cache();
            match item.timing.next_start_time(current) {
                Some(next) if next >= current && next <= end => {
                    item.next = next;
                    insert_sorted(&mut queue, item);
                }
                _ => {}
            }
        }
        Ok(records)
    }
}

fn record(timing: &ActionTiming, at: DateTime<Utc>) -> ExecutionRecord {
    ExecutionRecord {
        action_plan_id: timing.action_plan_id().to_string(),
        timing_uuid: timing.uuid.clone(),
        actions_id: timing.actions_id.clone(),
        executed_at: at,
    }
}

//! Business logic services for the OCS charging engine
//!
//! This crate contains the services that mutate accounts, manage action
//! plans, drive the scheduler and price calls.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies (data manager, cache, queues)
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - Mutations of shared state run under Guardian locks
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `Guardian` - Named-key mutual exclusion with acquisition timeout
//! - `ActionExecutor` - Applies action lists to accounts, copy then persist
//! - `AccountService` - Account lifecycle and balance operations
//! - `ActionPlanService` - Action plans, action lists and account bindings
//! - `Scheduler` - Live execution loop and deterministic replay
//! - `RatingEngine` - Cost of a call from rating profiles and plans
//! - `RatingPlansCostResolver` - First-match pricing over candidate plans
//! - `Engine` - Wires all of the above over shared collaborators

pub mod account_service;
pub mod action_plan_service;
pub mod dto;
pub mod engine;
pub mod events;
pub mod executor;
pub mod guardian;
pub mod rals;
pub mod rating;
pub mod scheduler;

pub use account_service::AccountService;
pub use action_plan_service::ActionPlanService;
pub use engine::Engine;
pub use events::BroadcastEventSink;
pub use executor::ActionExecutor;
pub use guardian::Guardian;
pub use rals::{RatingPlanCost, RatingPlansCostResolver};
pub use rating::RatingEngine;
pub use scheduler::{ReloadSignal, Scheduler, SchedulerState};

/// Business logic constants
pub mod constants {
    use ocs_core::keys::ACTION_PLAN_PREFIX;

    /// Step the replay clock advances after each execution, in seconds
    pub const REPLAY_TICK_SECS: i64 = 1;

    /// Guardian key serializing action plan membership changes
    ///
    /// Always taken after the account key when both are needed.
    pub fn action_plans_lock_key() -> String {
        ACTION_PLAN_PREFIX.to_string()
    }
}

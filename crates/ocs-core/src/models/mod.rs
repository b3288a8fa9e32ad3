//! Domain models for the charging engine
//!
//! This module contains all the core domain models used throughout the application.

pub mod account;
pub mod action;
pub mod action_plan;
pub mod balance;
pub mod rating;
pub mod timing;

pub use account::{Account, ActionTrigger, ThresholdType};
pub use action::{sort_actions, Action, ActionCdr, ActionEffect, ActionType};
pub use action_plan::{ActionPlan, ActionTiming, Task};
pub use balance::{Balance, BalanceFilter, BalanceType, ValueFormula};
pub use rating::{
    CallDescriptor, ChargeIncrement, Destination, DestinationRate, EventCost, RateSlot,
    RatingPlan, RatingPlanActivation, RatingProfile,
};
pub use timing::{RITiming, StartTime};

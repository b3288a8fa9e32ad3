//! Action plans
//!
//! An [`ActionPlan`] is a named set of [`ActionTiming`]s plus the accounts
//! subscribed to it. Each timing binds a recurrence rule to an action list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::timing::RITiming;

/// Recurrence rule + action list + target accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTiming {
    pub uuid: String,
    pub timing: RITiming,
    pub actions_id: String,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    #[serde(default)]
    pub weight: f64,
    /// Filled from the owning plan when the timing is queued
    #[serde(skip)]
    account_ids: BTreeSet<String>,
    #[serde(skip)]
    action_plan_id: String,
    #[serde(skip)]
    st_cache: Option<DateTime<Utc>>,
}

impl ActionTiming {
    pub fn new(actions_id: impl Into<String>, timing: RITiming, weight: f64) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            timing,
            actions_id: actions_id.into(),
            extra_data: None,
            weight,
            account_ids: BTreeSet::new(),
            action_plan_id: String::new(),
            st_cache: None,
        }
    }

    pub fn is_asap(&self) -> bool {
        self.timing.is_asap()
    }

    /// Next instant this timing is due at or after `from`
    ///
    /// ASAP timings are always due at `from`. Other results are cached until
    /// [`reset_start_time_cache`](Self::reset_start_time_cache) is called.
    pub fn next_start_time(&mut self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_asap() {
            return Some(from);
        }
        if self.st_cache.is_none() {
            self.st_cache = self.timing.next_occurrence(from);
        }
        self.st_cache
    }

    /// Forget the cached start time; one-shot timings keep theirs
    pub fn reset_start_time_cache(&mut self) {
        if !self.timing.is_one_shot() {
            self.st_cache = None;
        }
    }

    pub fn account_ids(&self) -> &BTreeSet<String> {
        &self.account_ids
    }

    pub fn set_account_ids(&mut self, account_ids: BTreeSet<String>) {
        self.account_ids = account_ids;
    }

    pub fn action_plan_id(&self) -> &str {
        &self.action_plan_id
    }

    pub fn set_action_plan_id(&mut self, plan_id: impl Into<String>) {
        self.action_plan_id = plan_id.into();
    }

    /// One task per target account
    pub fn tasks(&self) -> Vec<Task> {
        self.account_ids
            .iter()
            .map(|account_id| Task::new(account_id.clone(), self.actions_id.clone()))
            .collect()
    }
}

/// Named collection of timings and subscribed accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: String,
    #[serde(default)]
    pub account_ids: BTreeSet<String>,
    #[serde(default)]
    pub action_timings: Vec<ActionTiming>,
}

impl ActionPlan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_ids: BTreeSet::new(),
            action_timings: Vec::new(),
        }
    }

    /// Plans without timings are deleted instead of stored
    pub fn is_empty(&self) -> bool {
        self.action_timings.is_empty()
    }

    /// Highest weight first, ties keep their position
    pub fn sort_timings_by_weight(&mut self) {
        self.action_timings
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    }

    pub fn asap_timings(&self) -> impl Iterator<Item = &ActionTiming> {
        self.action_timings.iter().filter(|at| at.is_asap())
    }

    /// Remove a timing by UUID, returns whether it existed
    pub fn remove_timing(&mut self, uuid: &str) -> bool {
        let before = self.action_timings.len();
        self.action_timings.retain(|at| at.uuid != uuid);
        before != self.action_timings.len()
    }

    /// Copies of the timings with the plan's accounts and ID attached
    pub fn bound_timings(&self) -> Vec<ActionTiming> {
        self.action_timings
            .iter()
            .cloned()
            .map(|mut at| {
                at.set_account_ids(self.account_ids.clone());
                at.set_action_plan_id(self.id.clone());
                at
            })
            .collect()
    }
}

/// Pending immediate execution of an action list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub uuid: String,
    /// Empty for account-less action lists
    #[serde(default)]
    pub account_id: String,
    pub actions_id: String,
}

impl Task {
    pub fn new(account_id: impl Into<String>, actions_id: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            actions_id: actions_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timing::StartTime;
    use chrono::{Duration, TimeZone};

    fn daily(weight: f64) -> ActionTiming {
        let timing = RITiming {
            start_time: StartTime::at(10, 0, 0),
            ..RITiming::asap()
        };
        ActionTiming::new("TOPUP_10", timing, weight)
    }

    #[test]
    fn test_start_time_is_cached_until_reset() {
        let mut at = daily(0.0);
        let day1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = at.next_start_time(day1).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());

        let later = first + Duration::days(3);
        assert_eq!(at.next_start_time(later), Some(first));

        at.reset_start_time_cache();
        assert_eq!(
            at.next_start_time(later),
            Some(Utc.with_ymd_and_hms(2024, 1, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_asap_always_now() {
        let mut at = ActionTiming::new("DEBIT_3", RITiming::asap(), 0.0);
        let now = Utc::now();
        assert_eq!(at.next_start_time(now), Some(now));
        let later = now + Duration::hours(1);
        assert_eq!(at.next_start_time(later), Some(later));
    }

    #[test]
    fn test_one_shot_keeps_cache() {
        let timing = RITiming {
            start_time: "+5m".parse().unwrap(),
            ..RITiming::asap()
        };
        let mut at = ActionTiming::new("ONCE", timing, 0.0);
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let due = at.next_start_time(from).unwrap();
        at.reset_start_time_cache();
        assert_eq!(at.next_start_time(from + Duration::hours(1)), Some(due));
    }

    #[test]
    fn test_plan_helpers() {
        let mut plan = ActionPlan::new("PACKAGE_10");
        plan.account_ids.insert("cgrates.org:1001".to_string());
        plan.action_timings.push(daily(10.0));
        plan.action_timings
            .push(ActionTiming::new("DEBIT_3", RITiming::asap(), 20.0));

        plan.sort_timings_by_weight();
        assert_eq!(plan.action_timings[0].actions_id, "DEBIT_3");
        assert_eq!(plan.asap_timings().count(), 1);

        let bound = plan.bound_timings();
        assert_eq!(bound[0].action_plan_id(), "PACKAGE_10");
        assert_eq!(bound[0].tasks().len(), 1);

        let uuid = plan.action_timings[0].uuid.clone();
        assert!(plan.remove_timing(&uuid));
        assert!(!plan.remove_timing(&uuid));
    }

    #[test]
    fn test_runtime_fields_not_serialized() {
        let mut at = daily(0.0);
        at.set_action_plan_id("P");
        let json = serde_json::to_string(&at).unwrap();
        assert!(!json.contains("action_plan_id"));
        let back: ActionTiming = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action_plan_id(), "");
    }
}

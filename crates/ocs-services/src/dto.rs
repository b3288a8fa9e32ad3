//! Request arguments for the service operations
//!
//! Every operation takes one of these structs. They are validated before any
//! lock is taken, so malformed requests never reach the store.

use chrono::{DateTime, Utc, Weekday};
use ocs_core::{
    keys,
    models::{BalanceFilter, BalanceType, RITiming, StartTime},
    AppError, AppResult,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Tenant-qualified account ID, falling back to the default tenant
fn qualified(tenant: &Option<String>, account: &str, default_tenant: &str) -> String {
    let tenant = tenant
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(default_tenant);
    keys::tenant_id(tenant, account)
}

/// Identifies one account
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AccountArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,
}

impl AccountArgs {
    pub fn new(tenant: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            account: account.into(),
        }
    }

    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// Create or update an account
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SetAccountArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    /// Plan the account is rebound to; other plans drop the account
    pub action_plan_id: Option<String>,

    pub allow_negative: Option<bool>,

    pub disabled: Option<bool>,

    /// Balances applied with `*set_balance` semantics
    #[serde(default)]
    #[validate(nested)]
    pub balances: Vec<BalanceSpec>,

    /// Wake the scheduler when plan membership changed
    #[serde(default)]
    pub reload_scheduler: bool,
}

impl SetAccountArgs {
    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// One balance of a given class
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_balance_spec"))]
pub struct BalanceSpec {
    pub balance_type: BalanceType,

    #[serde(default)]
    pub balance: BalanceFilter,
}

fn validate_balance_spec(spec: &BalanceSpec) -> Result<(), validator::ValidationError> {
    if !spec.balance.has_identity() {
        return Err(validator::ValidationError::new("balance_identity_required"));
    }
    match &spec.balance.value {
        Some(formula) if formula.validate().is_err() => {
            Err(validator::ValidationError::new("invalid_value_formula"))
        }
        _ => Ok(()),
    }
}

/// Add to or debit from a balance class
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BalanceArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    pub balance_type: BalanceType,

    pub value: Decimal,

    /// Replace the balance value instead of accumulating
    #[serde(default)]
    pub overwrite: bool,

    /// Narrows the balance touched (ID, weight, destinations, ...)
    #[serde(default)]
    pub balance: BalanceFilter,

    /// Emit a CDR for the operation
    #[serde(default)]
    pub cdrlog: bool,

    pub action_extra_data: Option<serde_json::Value>,
}

impl BalanceArgs {
    pub fn new(
        tenant: impl Into<String>,
        account: impl Into<String>,
        balance_type: BalanceType,
        value: Decimal,
    ) -> Self {
        Self {
            tenant: Some(tenant.into()),
            account: account.into(),
            balance_type,
            value,
            ..Default::default()
        }
    }

    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// Patch one balance
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetBalanceArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    #[validate(nested)]
    pub spec: BalanceSpec,

    #[serde(default)]
    pub cdrlog: bool,

    pub action_extra_data: Option<serde_json::Value>,
}

impl SetBalanceArgs {
    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// Patch several balances of one account in a single action list
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetBalancesArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    #[validate(length(min = 1, message = "At least one balance is required"), nested)]
    pub balances: Vec<BalanceSpec>,
}

impl SetBalancesArgs {
    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// Remove every balance of a class matching a filter
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RemoveBalancesArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    pub balance_type: BalanceType,

    #[serde(default)]
    pub balance: BalanceFilter,
}

impl RemoveBalancesArgs {
    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// One timing of an action plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TimingArgs {
    #[validate(length(min = 1, message = "Actions ID is required"))]
    pub actions_id: String,

    /// Shortcut name (`*asap`, `*daily`, `*monthly`, ...) or free ID
    pub timing_id: Option<String>,

    #[serde(default)]
    pub years: Vec<i32>,

    #[serde(default)]
    pub months: Vec<u32>,

    #[serde(default)]
    pub month_days: Vec<i32>,

    #[serde(default)]
    pub week_days: Vec<Weekday>,

    /// `*asap`, `hh:mm:ss` (with `*` wildcards) or `+<duration>`
    pub time: Option<String>,

    #[serde(default)]
    pub weight: f64,
}

impl TimingArgs {
    pub fn new(actions_id: impl Into<String>, time: &str, weight: f64) -> Self {
        Self {
            actions_id: actions_id.into(),
            time: Some(time.to_string()),
            weight,
            ..Default::default()
        }
    }

    /// Build the recurrence rule, expanding shortcut timings relative to `now`
    pub fn to_timing(&self, now: DateTime<Utc>) -> AppResult<RITiming> {
        if let Some(shortcut) = self
            .timing_id
            .as_deref()
            .and_then(|id| RITiming::from_shortcut(id, now))
        {
            return Ok(shortcut);
        }

        let start_time: StartTime = match &self.time {
            Some(time) => time.parse()?,
            None => {
                return Err(AppError::MissingField(format!(
                    "timing for {}: Time",
                    self.actions_id
                )))
            }
        };
        let timing = RITiming {
            id: self.timing_id.clone().unwrap_or_default(),
            years: self.years.clone(),
            months: self.months.clone(),
            month_days: self.month_days.clone(),
            week_days: self.week_days.clone(),
            start_time,
        };
        timing.validate()?;
        Ok(timing)
    }
}

/// Create or replace an action plan
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SetActionPlanArgs {
    #[validate(length(min = 1, message = "Action plan ID is required"))]
    pub id: String,

    #[validate(length(min = 1, message = "At least one timing is required"), nested)]
    pub timings: Vec<TimingArgs>,

    /// Replace an existing plan instead of failing
    #[serde(default)]
    pub overwrite: bool,

    #[serde(default)]
    pub reload_scheduler: bool,
}

/// Detach a timing, an account, or a whole plan
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RemoveActionTimingArgs {
    #[validate(length(min = 1, message = "Action plan ID is required"))]
    pub action_plan_id: String,

    /// Remove only this timing
    pub action_timing_id: Option<String>,

    pub tenant: Option<String>,

    /// Detach only this account
    pub account: Option<String>,

    #[serde(default)]
    pub reload_scheduler: bool,
}

impl RemoveActionTimingArgs {
    pub fn account_id(&self, default_tenant: &str) -> Option<String> {
        self.account
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(|a| qualified(&self.tenant, a, default_tenant))
    }
}

/// Forced run of one plan, or replay of a time window
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_execute_actions"))]
pub struct ExecuteActionsArgs {
    pub action_plan_id: Option<String>,

    pub time_start: Option<DateTime<Utc>>,

    pub time_end: Option<DateTime<Utc>>,
}

fn validate_execute_actions(args: &ExecuteActionsArgs) -> Result<(), validator::ValidationError> {
    match (args.time_start, args.time_end) {
        (Some(start), Some(end)) if start > end => {
            Err(validator::ValidationError::new("time_start_after_time_end"))
        }
        (Some(_), None) | (None, Some(_)) => {
            Err(validator::ValidationError::new("time_window_incomplete"))
        }
        _ => Ok(()),
    }
}

/// Forced run of several plans for one account
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ExecuteActionPlansArgs {
    pub tenant: Option<String>,

    #[validate(length(min = 1, message = "Account is required"))]
    pub account: String,

    #[validate(length(min = 1, message = "At least one action plan is required"))]
    pub action_plan_ids: Vec<String>,
}

impl ExecuteActionPlansArgs {
    pub fn account_id(&self, default_tenant: &str) -> String {
        qualified(&self.tenant, &self.account, default_tenant)
    }
}

/// Price a call against candidate rating plans in order
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RatingPlanCostArgs {
    pub tenant: Option<String>,

    pub category: Option<String>,

    pub subject: Option<String>,

    #[validate(length(min = 1, message = "Destination is required"))]
    pub destination: String,

    #[validate(length(min = 1, message = "At least one rating plan is required"))]
    pub rating_plan_ids: Vec<String>,

    pub setup_time: Option<DateTime<Utc>>,

    pub usage_secs: u64,
}

/// One scheduled occurrence of a plan timing for an account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountActionTiming {
    pub action_plan_id: String,
    pub uuid: String,
    pub actions_id: String,
    pub next_exec_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ocs_core::models::ValueFormula;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_tenant() {
        let args = AccountArgs {
            tenant: None,
            account: "1001".to_string(),
        };
        assert_eq!(args.account_id("cgrates.org"), "cgrates.org:1001");
        assert_eq!(
            AccountArgs::new("itsyscom.com", "1001").account_id("cgrates.org"),
            "itsyscom.com:1001"
        );
    }

    #[test]
    fn test_account_required() {
        let args = BalanceArgs::new("cgrates.org", "", BalanceType::Monetary, dec!(10));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_balance_spec_needs_identity() {
        let args = SetBalancesArgs {
            tenant: None,
            account: "1001".to_string(),
            balances: vec![BalanceSpec {
                balance_type: BalanceType::Monetary,
                balance: BalanceFilter::default().with_value(dec!(5)),
            }],
        };
        assert!(args.validate().is_err());

        let args = SetBalancesArgs {
            balances: vec![BalanceSpec {
                balance_type: BalanceType::Monetary,
                balance: BalanceFilter::with_id("main"),
            }],
            ..args
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_balance_spec_rejects_unknown_formula() {
        let incremental = |interval: &str| BalanceSpec {
            balance_type: BalanceType::Monetary,
            balance: BalanceFilter {
                value: Some(ValueFormula::Incremental {
                    units: dec!(30),
                    interval: interval.to_string(),
                    increment: "day".to_string(),
                }),
                ..BalanceFilter::with_id("main")
            },
        };
        let args = SetAccountArgs {
            account: "1001".to_string(),
            balances: vec![incremental("fortnight")],
            ..Default::default()
        };
        let err = AppError::from(args.validate().unwrap_err());
        assert!(err.is_validation());

        let args = SetAccountArgs {
            balances: vec![incremental("month")],
            ..args
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_nested_args_serialize() {
        let spec = BalanceSpec {
            balance_type: BalanceType::Monetary,
            balance: BalanceFilter::with_id("main").with_value(dec!(5)),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["balance"]["id"], "main");

        let timing = TimingArgs {
            week_days: vec![Weekday::Mon],
            ..TimingArgs::new("TOPUP_10", "10:00:00", 10.0)
        };
        let json = serde_json::to_value(&timing).unwrap();
        assert_eq!(json["actions_id"], "TOPUP_10");
        assert_eq!(json["week_days"][0], "Mon");
    }

    #[test]
    fn test_execute_actions_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ok = ExecuteActionsArgs {
            action_plan_id: None,
            time_start: Some(t0),
            time_end: Some(t0),
        };
        assert!(ok.validate().is_ok());

        let reversed = ExecuteActionsArgs {
            time_end: Some(t0 - chrono::Duration::seconds(1)),
            ..ok.clone()
        };
        assert!(reversed.validate().is_err());

        let open = ExecuteActionsArgs {
            time_end: None,
            ..ok
        };
        assert!(open.validate().is_err());
    }

    #[test]
    fn test_timing_from_shortcut_and_fields() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 0).unwrap();
        let monthly = TimingArgs {
            timing_id: Some("*monthly".to_string()),
            ..TimingArgs::new("TOPUP_10", "", 10.0)
        };
        assert_eq!(monthly.to_timing(now).unwrap().month_days, vec![15]);

        let clock = TimingArgs::new("TOPUP_10", "10:00:00", 10.0);
        let timing = clock.to_timing(now).unwrap();
        assert_eq!(timing.start_time, StartTime::at(10, 0, 0));

        let bad = TimingArgs {
            months: vec![13],
            ..clock
        };
        assert!(bad.to_timing(now).is_err());

        let missing = TimingArgs {
            actions_id: "X".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            missing.to_timing(now),
            Err(AppError::MissingField(_))
        ));
    }
}

//! Balance model
//!
//! A balance is one bucket of value inside an account (monetary, voice seconds,
//! SMS units, ...). Balances are addressed either explicitly by ID/UUID or by a
//! [`BalanceFilter`] whose unset fields match anything.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::timing::days_in_month;
use crate::AppResult;

/// Unit a balance is denominated in
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BalanceType {
    #[default]
    #[serde(rename = "*monetary")]
    Monetary,
    #[serde(rename = "*voice")]
    Voice,
    #[serde(rename = "*sms")]
    Sms,
    #[serde(rename = "*data")]
    Data,
    #[serde(rename = "*generic")]
    Generic,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::Monetary => "*monetary",
            BalanceType::Voice => "*voice",
            BalanceType::Sms => "*sms",
            BalanceType::Data => "*data",
            BalanceType::Generic => "*generic",
        }
    }
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*monetary" => Ok(BalanceType::Monetary),
            "*voice" => Ok(BalanceType::Voice),
            "*sms" => Ok(BalanceType::Sms),
            "*data" => Ok(BalanceType::Data),
            "*generic" => Ok(BalanceType::Generic),
            other => Err(AppError::InvalidInput(format!(
                "unknown balance type: {}",
                other
            ))),
        }
    }
}

/// One bucket of value inside an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub uuid: String,
    #[serde(default)]
    pub id: String,
    pub value: Decimal,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub destination_ids: BTreeSet<String>,
    #[serde(default)]
    pub rating_subject: String,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub shared_groups: BTreeSet<String>,
    #[serde(default)]
    pub timing_ids: BTreeSet<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Stops debit spill-over to lower-weight balances
    #[serde(default)]
    pub blocker: bool,
}

impl Balance {
    /// Create an empty balance with a fresh UUID
    pub fn new(id: impl Into<String>, value: Decimal) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            id: id.into(),
            value,
            weight: 0.0,
            expiration_date: None,
            destination_ids: BTreeSet::new(),
            rating_subject: String::new(),
            categories: BTreeSet::new(),
            shared_groups: BTreeSet::new(),
            timing_ids: BTreeSet::new(),
            disabled: false,
            blocker: false,
        }
    }

    /// Expired balances are invisible to selection and get purged on write
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.map_or(false, |exp| exp <= now)
    }

    /// Whether this balance is the one a filter addresses by ID or UUID
    pub fn matches_identity(&self, filter: &BalanceFilter) -> bool {
        if let Some(uuid) = &filter.uuid {
            return &self.uuid == uuid;
        }
        if let Some(id) = &filter.id {
            return &self.id == id;
        }
        false
    }

    /// Predicate match: every set filter field must agree with this balance
    pub fn matches(&self, filter: &BalanceFilter) -> bool {
        if filter.has_identity() {
            return self.matches_identity(filter);
        }
        if let Some(exp) = filter.expiration_date {
            if self.expiration_date != Some(exp) {
                return false;
            }
        }
        if let Some(weight) = filter.weight {
            if self.weight != weight {
                return false;
            }
        }
        if let Some(subject) = &filter.rating_subject {
            if &self.rating_subject != subject {
                return false;
            }
        }
        if let Some(disabled) = filter.disabled {
            if self.disabled != disabled {
                return false;
            }
        }
        if let Some(blocker) = filter.blocker {
            if self.blocker != blocker {
                return false;
            }
        }
        includes(&self.destination_ids, &filter.destination_ids)
            && includes(&self.categories, &filter.categories)
            && includes(&self.shared_groups, &filter.shared_groups)
            && includes(&self.timing_ids, &filter.timing_ids)
    }
}

fn includes(have: &BTreeSet<String>, want: &Option<BTreeSet<String>>) -> bool {
    match want {
        Some(want) => want.is_subset(have),
        None => true,
    }
}

/// How an action computes the amount it applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormula {
    /// Fixed amount
    Static(Decimal),
    /// `units` spread evenly over the `increment` slots of one `interval`
    ///
    /// `interval` is one of `day`, `week`, `month`, `year`; `increment` is
    /// `hour` or `day`.
    Incremental {
        units: Decimal,
        interval: String,
        increment: String,
    },
}

impl ValueFormula {
    /// Evaluate the formula at `now`
    pub fn evaluate(&self, now: DateTime<Utc>) -> AppResult<Decimal> {
        match self {
            ValueFormula::Static(value) => Ok(*value),
            ValueFormula::Incremental {
                units,
                interval,
                increment,
            } => {
                let days_in_year: u32 = if is_leap_year(now.year()) { 366 } else { 365 };
                let days = match interval.as_str() {
                    "day" => 1,
                    "week" => 7,
                    "month" => days_in_month(now.year(), now.month()),
                    "year" => days_in_year,
                    other => {
                        return Err(AppError::InvalidValueFormula(format!(
                            "unknown interval: {}",
                            other
                        )))
                    }
                };
                let slots = match increment.as_str() {
                    "hour" => days * 24,
                    "day" if interval != "day" => days,
                    other => {
                        return Err(AppError::InvalidValueFormula(format!(
                            "unsupported increment {} for interval {}",
                            other, interval
                        )))
                    }
                };
                Ok(*units / Decimal::from(slots))
            }
        }
    }

    /// Reject unknown intervals and increments without a clock
    pub fn validate(&self) -> AppResult<()> {
        // Names are checked the same way on every date
        self.evaluate(DateTime::<Utc>::UNIX_EPOCH).map(|_| ())
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Partial balance description used to select, create or patch balances
///
/// Unset fields match anything when selecting and are left untouched when
/// patching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceFilter {
    pub uuid: Option<String>,
    pub id: Option<String>,
    pub value: Option<ValueFormula>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub weight: Option<f64>,
    pub destination_ids: Option<BTreeSet<String>>,
    pub rating_subject: Option<String>,
    pub categories: Option<BTreeSet<String>>,
    pub shared_groups: Option<BTreeSet<String>>,
    pub timing_ids: Option<BTreeSet<String>>,
    pub disabled: Option<bool>,
    pub blocker: Option<bool>,
}

impl BalanceFilter {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: Decimal) -> Self {
        self.value = Some(ValueFormula::Static(value));
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Whether the filter addresses a single balance by ID or UUID
    pub fn has_identity(&self) -> bool {
        self.uuid.as_deref().map_or(false, |s| !s.is_empty())
            || self.id.as_deref().map_or(false, |s| !s.is_empty())
    }

    /// Amount carried by the filter, rounded to `decimals`
    pub fn amount(&self, now: DateTime<Utc>, decimals: u32) -> AppResult<Decimal> {
        let formula = self
            .value
            .as_ref()
            .ok_or_else(|| AppError::MissingField("Balance.Value".to_string()))?;
        Ok(formula.evaluate(now)?.round_dp(decimals))
    }

    /// Build a new balance from the filter's set fields
    pub fn create_balance(&self, value: Decimal) -> Balance {
        let mut balance = Balance::new(self.id.clone().unwrap_or_default(), value);
        if let Some(uuid) = self.uuid.as_ref().filter(|u| !u.is_empty()) {
            balance.uuid = uuid.clone();
        }
        self.patch(&mut balance);
        balance
    }

    /// Overwrite the balance attributes the filter sets (everything but identity and value)
    pub fn patch(&self, balance: &mut Balance) {
        if let Some(exp) = self.expiration_date {
            balance.expiration_date = Some(exp);
        }
        if let Some(weight) = self.weight {
            balance.weight = weight;
        }
        if let Some(dst) = &self.destination_ids {
            balance.destination_ids = dst.clone();
        }
        if let Some(subject) = &self.rating_subject {
            balance.rating_subject = subject.clone();
        }
        if let Some(categories) = &self.categories {
            balance.categories = categories.clone();
        }
        if let Some(groups) = &self.shared_groups {
            balance.shared_groups = groups.clone();
        }
        if let Some(timings) = &self.timing_ids {
            balance.timing_ids = timings.clone();
        }
        if let Some(disabled) = self.disabled {
            balance.disabled = disabled;
        }
        if let Some(blocker) = self.blocker {
            balance.blocker = blocker;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_type_serde() {
        let json = serde_json::to_string(&BalanceType::Monetary).unwrap();
        assert_eq!(json, "\"*monetary\"");
        assert_eq!("*voice".parse::<BalanceType>().unwrap(), BalanceType::Voice);
        assert!("*bogus".parse::<BalanceType>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let mut balance = Balance::new("main", dec!(10));
        balance.destination_ids = ["NAT".to_string(), "INT".to_string()].into();
        balance.weight = 10.0;

        assert!(balance.matches(&BalanceFilter::default()));

        let by_dst = BalanceFilter {
            destination_ids: Some(["NAT".to_string()].into()),
            ..Default::default()
        };
        assert!(balance.matches(&by_dst));

        let other_dst = BalanceFilter {
            destination_ids: Some(["MOBILE".to_string()].into()),
            ..Default::default()
        };
        assert!(!balance.matches(&other_dst));

        assert!(balance.matches(&BalanceFilter::default().with_weight(10.0)));
        assert!(!balance.matches(&BalanceFilter::default().with_weight(20.0)));

        assert!(balance.matches(&BalanceFilter::with_id("main")));
        assert!(!balance.matches(&BalanceFilter::with_id("bonus")));
    }

    #[test]
    fn test_expiration() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut balance = Balance::new("b", dec!(1));
        assert!(!balance.is_expired(now));
        balance.expiration_date = Some(now);
        assert!(balance.is_expired(now));
    }

    #[test]
    fn test_create_balance_from_filter() {
        let filter = BalanceFilter {
            id: Some("bonus".to_string()),
            weight: Some(20.0),
            blocker: Some(true),
            ..Default::default()
        };
        let balance = filter.create_balance(dec!(5));
        assert_eq!(balance.id, "bonus");
        assert_eq!(balance.value, dec!(5));
        assert_eq!(balance.weight, 20.0);
        assert!(balance.blocker);
        assert!(!balance.uuid.is_empty());
    }

    #[test]
    fn test_incremental_formula() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let daily = ValueFormula::Incremental {
            units: dec!(24),
            interval: "day".to_string(),
            increment: "hour".to_string(),
        };
        assert_eq!(daily.evaluate(now).unwrap(), dec!(1));

        // February 2024 has 29 days
        let monthly = ValueFormula::Incremental {
            units: dec!(29),
            interval: "month".to_string(),
            increment: "day".to_string(),
        };
        assert_eq!(monthly.evaluate(now).unwrap(), dec!(1));

        let bad = ValueFormula::Incremental {
            units: dec!(1),
            interval: "fortnight".to_string(),
            increment: "day".to_string(),
        };
        assert!(matches!(
            bad.evaluate(now),
            Err(AppError::InvalidValueFormula(_))
        ));
        assert!(matches!(bad.validate(), Err(AppError::InvalidValueFormula(_))));

        let day_in_day = ValueFormula::Incremental {
            units: dec!(1),
            interval: "day".to_string(),
            increment: "day".to_string(),
        };
        assert!(day_in_day.validate().is_err());
        assert!(daily.validate().is_ok());
        assert!(monthly.validate().is_ok());
        assert!(ValueFormula::Static(dec!(-3)).validate().is_ok());
    }

    #[test]
    fn test_filter_amount_requires_value() {
        let now = Utc::now();
        assert!(matches!(
            BalanceFilter::default().amount(now, 4),
            Err(AppError::MissingField(_))
        ));
        let filter = BalanceFilter::default().with_value(dec!(1.123456));
        assert_eq!(filter.amount(now, 4).unwrap(), dec!(1.1235));
    }
}

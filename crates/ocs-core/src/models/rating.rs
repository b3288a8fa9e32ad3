//! Rating entities
//!
//! Destinations group dialed-number prefixes, rating plans attach rates to
//! destinations, and rating profiles activate plans for a
//! (tenant, category, subject) triple from a point in time on.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::keys;

/// Named group of number prefixes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub prefixes: Vec<String>,
}

impl Destination {
    /// Length of the longest prefix matching `number`
    pub fn longest_match(&self, number: &str) -> Option<usize> {
        self.prefixes
            .iter()
            .filter(|p| number.starts_with(p.as_str()))
            .map(|p| p.len())
            .max()
    }
}

/// One rate band, applying from `group_interval_start` seconds into the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSlot {
    /// Offset into the call this slot starts at, in seconds
    #[serde(default)]
    pub group_interval_start: i64,

    /// Price per `rate_unit` seconds
    pub value: Decimal,

    /// Billing increment in seconds (e.g., 60 for per-minute billing)
    pub rate_increment: i64,

    /// Seconds `value` is priced for
    pub rate_unit: i64,
}

/// Rates for one destination inside a rating plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRate {
    pub destination_id: String,
    #[serde(default)]
    pub connect_fee: Decimal,
    pub rates: Vec<RateSlot>,
    /// Overrides the engine-wide rounding when set
    #[serde(default)]
    pub rounding_decimals: Option<u32>,
}

/// Charges accrued in one rate slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeIncrement {
    pub group_interval_start: i64,
    pub rate: Decimal,
    pub increment: i64,
    pub units: i64,
    pub cost: Decimal,
}

impl DestinationRate {
    /// Price `usage_secs` seconds of traffic
    ///
    /// Usage is billed in whole increments of the slot active at each point of
    /// the call, so a 61 second call on 60/60 billing pays for two minutes.
    pub fn compute_cost(&self, usage_secs: i64, default_decimals: u32) -> (Decimal, Vec<ChargeIncrement>) {
        let decimals = self.rounding_decimals.unwrap_or(default_decimals);
        let mut slots: Vec<&RateSlot> = self.rates.iter().collect();
        slots.sort_by_key(|s| s.group_interval_start);

        let mut charges = Vec::new();
        let mut elapsed = 0i64;
        let mut total = self.connect_fee;

        while elapsed < usage_secs {
            let current = slots
                .iter()
                .rposition(|s| s.group_interval_start <= elapsed)
                .unwrap_or(0);
            let Some(slot) = slots.get(current) else {
                break;
            };
            let increment = slot.rate_increment.max(1);
            let unit = slot.rate_unit.max(1);
            let slot_end = slots
                .get(current + 1)
                .map_or(usage_secs, |next| next.group_interval_start.min(usage_secs));
            let span = (slot_end - elapsed).max(1);
            let units = (span + increment - 1) / increment;
            let billed = units * increment;
            let cost = slot.value * Decimal::from(billed) / Decimal::from(unit);

            charges.push(ChargeIncrement {
                group_interval_start: slot.group_interval_start,
                rate: slot.value,
                increment,
                units,
                cost: cost.round_dp(decimals),
            });
            total += cost;
            elapsed += billed;
        }

        (total.round_dp(decimals), charges)
    }
}

/// Collection of destination rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPlan {
    pub id: String,
    pub destination_rates: Vec<DestinationRate>,
}

/// Rating plan in effect from `activation_time` on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPlanActivation {
    pub activation_time: DateTime<Utc>,
    pub rating_plan_id: String,
}

/// Rating plan activations for a (tenant, category, subject) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingProfile {
    pub tenant: String,
    pub category: String,
    pub subject: String,
    pub activations: Vec<RatingPlanActivation>,
}

impl RatingProfile {
    pub fn key(&self) -> String {
        keys::rating_profile_key(&self.tenant, &self.category, &self.subject)
    }

    /// Latest activation at or before `at`
    pub fn active_plan(&self, at: DateTime<Utc>) -> Option<&RatingPlanActivation> {
        self.activations
            .iter()
            .filter(|a| a.activation_time <= at)
            .max_by_key(|a| a.activation_time)
    }
}

/// Everything the cost engine needs to price one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub tenant: String,
    pub category: String,
    pub subject: String,
    #[serde(default)]
    pub account: String,
    pub destination: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    /// Transient cache slot holding a rating profile that overrides storage
    #[serde(default)]
    pub profile_slot: Option<String>,
}

impl CallDescriptor {
    pub fn usage(&self) -> Duration {
        self.time_end - self.time_start
    }
}

/// Priced call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCost {
    pub tenant: String,
    pub subject: String,
    pub destination: String,
    pub rating_plan_id: String,
    pub destination_id: String,
    pub matched_prefix: String,
    pub setup_time: DateTime<Utc>,
    pub usage_secs: i64,
    pub connect_fee: Decimal,
    pub cost: Decimal,
    pub charges: Vec<ChargeIncrement>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn per_minute(value: Decimal) -> RateSlot {
        RateSlot {
            group_interval_start: 0,
            value,
            rate_increment: 60,
            rate_unit: 60,
        }
    }

    #[test]
    fn test_longest_prefix() {
        let dst = Destination {
            id: "PE".to_string(),
            prefixes: vec!["51".to_string(), "519".to_string()],
        };
        assert_eq!(dst.longest_match("51987654321"), Some(3));
        assert_eq!(dst.longest_match("5112345"), Some(2));
        assert_eq!(dst.longest_match("4412345"), None);
    }

    #[test]
    fn test_cost_rounds_up_to_increment() {
        let rate = DestinationRate {
            destination_id: "PE".to_string(),
            connect_fee: dec!(0.1),
            rates: vec![per_minute(dec!(0.5))],
            rounding_decimals: None,
        };
        let (cost, charges) = rate.compute_cost(61, 4);
        assert_eq!(cost, dec!(1.1));
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].units, 2);

        let (zero, none) = rate.compute_cost(0, 4);
        assert_eq!(zero, dec!(0.1));
        assert!(none.is_empty());
    }

    #[test]
    fn test_cost_switches_slots() {
        let rate = DestinationRate {
            destination_id: "PE".to_string(),
            connect_fee: Decimal::ZERO,
            rates: vec![
                per_minute(dec!(1)),
                RateSlot {
                    group_interval_start: 60,
                    value: dec!(0.6),
                    rate_increment: 1,
                    rate_unit: 60,
                },
            ],
            rounding_decimals: Some(2),
        };
        // first minute at 1/min, then 30s at 0.6/min
        let (cost, charges) = rate.compute_cost(90, 4);
        assert_eq!(cost, dec!(1.3));
        assert_eq!(charges.len(), 2);
    }

    #[test]
    fn test_active_plan() {
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let profile = RatingProfile {
            tenant: "cgrates.org".to_string(),
            category: "call".to_string(),
            subject: "*any".to_string(),
            activations: vec![
                RatingPlanActivation {
                    activation_time: t(1),
                    rating_plan_id: "OLD".to_string(),
                },
                RatingPlanActivation {
                    activation_time: t(10),
                    rating_plan_id: "NEW".to_string(),
                },
            ],
        };
        assert_eq!(profile.active_plan(t(5)).unwrap().rating_plan_id, "OLD");
        assert_eq!(profile.active_plan(t(10)).unwrap().rating_plan_id, "NEW");
        assert_eq!(profile.key(), "rpf_cgrates.org:call:*any");
    }
}

//! Account model
//!
//! An account groups balances by [`BalanceType`] and carries the flags and
//! thresholds that govern how actions may change them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::keys;
use crate::models::balance::{Balance, BalanceType};

/// Direction a trigger threshold is crossed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdType {
    /// Fires when the class total drops below the threshold
    #[serde(rename = "*min_balance")]
    MinBalance,
    /// Fires when the class total rises above the threshold
    #[serde(rename = "*max_balance")]
    MaxBalance,
}

/// Threshold watch on one balance class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrigger {
    pub id: String,
    pub threshold_type: ThresholdType,
    pub threshold_value: Decimal,
    pub balance_type: BalanceType,
    pub actions_id: String,
    /// Re-arm once the total moves back across the threshold
    #[serde(default)]
    pub recurrent: bool,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub weight: f64,
}

impl ActionTrigger {
    fn crossed(&self, total: Decimal) -> bool {
        match self.threshold_type {
            ThresholdType::MinBalance => total < self.threshold_value,
            ThresholdType::MaxBalance => total > self.threshold_value,
        }
    }
}

/// Charging account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Tenant-qualified ID (`tenant:account`)
    pub id: String,
    #[serde(default)]
    pub balance_map: BTreeMap<BalanceType, Vec<Balance>>,
    #[serde(default)]
    pub action_triggers: Vec<ActionTrigger>,
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            balance_map: BTreeMap::new(),
            action_triggers: Vec::new(),
            allow_negative: false,
            disabled: false,
            updated_at: None,
        }
    }

    pub fn tenant(&self) -> &str {
        keys::split_tenant_id(&self.id).0
    }

    pub fn balances(&self, balance_type: BalanceType) -> &[Balance] {
        self.balance_map
            .get(&balance_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sum of the usable (enabled, not expired) balances of a class
    pub fn balance_total(&self, balance_type: BalanceType, now: DateTime<Utc>) -> Decimal {
        self.balances(balance_type)
            .iter()
            .filter(|b| !b.disabled && !b.is_expired(now))
            .map(|b| b.value)
            .sum()
    }

    pub fn find_balance(&self, balance_type: BalanceType, id: &str) -> Option<&Balance> {
        self.balances(balance_type)
            .iter()
            .find(|b| b.id == id || b.uuid == id)
    }

    /// Drop expired balances, returns how many were removed
    pub fn clean_expired_balances(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for balances in self.balance_map.values_mut() {
            let before = balances.len();
            balances.retain(|b| !b.is_expired(now));
            removed += before - balances.len();
        }
        self.balance_map.retain(|_, balances| !balances.is_empty());
        removed
    }

    /// Evaluate armed triggers, highest weight first
    ///
    /// Returns the action IDs of the triggers that fired. Fired non-recurrent
    /// triggers stay executed; recurrent ones re-arm once their threshold is no
    /// longer crossed.
    pub fn fire_triggers(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut order: Vec<usize> = (0..self.action_triggers.len()).collect();
        order.sort_by(|a, b| {
            self.action_triggers[*b]
                .weight
                .partial_cmp(&self.action_triggers[*a].weight)
                .unwrap_or(Ordering::Equal)
        });

        let mut fired = Vec::new();
        for i in order {
            let total = self.balance_total(self.action_triggers[i].balance_type, now);
            let trigger = &mut self.action_triggers[i];
            let crossed = trigger.crossed(total);
            if crossed && !trigger.executed {
                trigger.executed = true;
                fired.push(trigger.actions_id.clone());
            } else if !crossed && trigger.executed && trigger.recurrent {
                trigger.executed = false;
            }
        }
        fired
    }
}

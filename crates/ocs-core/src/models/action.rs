//! Actions and their effect on accounts
//!
//! An [`Action`] is one step of a compiled action list. Applying a list to an
//! [`Account`] mutates it in place and returns the side effects (log lines,
//! account publications, synthetic CDRs) for the caller to emit once the
//! account has been persisted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::AppError;
use crate::models::account::Account;
use crate::models::balance::{Balance, BalanceFilter, BalanceType};
use crate::AppResult;

/// Kind of mutation or side effect an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "*log")]
    Log,
    #[serde(rename = "*topup")]
    TopUp,
    #[serde(rename = "*topup_reset")]
    TopUpReset,
    #[serde(rename = "*debit")]
    Debit,
    #[serde(rename = "*debit_reset")]
    DebitReset,
    #[serde(rename = "*set_balance")]
    SetBalance,
    #[serde(rename = "*remove_balance")]
    RemoveBalance,
    #[serde(rename = "*publish_account")]
    PublishAccount,
    #[serde(rename = "*cdrlog")]
    CdrLog,
    #[serde(rename = "*enable_account")]
    EnableAccount,
    #[serde(rename = "*disable_account")]
    DisableAccount,
    #[serde(rename = "*allow_negative")]
    AllowNegative,
    #[serde(rename = "*deny_negative")]
    DenyNegative,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Log => "*log",
            ActionType::TopUp => "*topup",
            ActionType::TopUpReset => "*topup_reset",
            ActionType::Debit => "*debit",
            ActionType::DebitReset => "*debit_reset",
            ActionType::SetBalance => "*set_balance",
            ActionType::RemoveBalance => "*remove_balance",
            ActionType::PublishAccount => "*publish_account",
            ActionType::CdrLog => "*cdrlog",
            ActionType::EnableAccount => "*enable_account",
            ActionType::DisableAccount => "*disable_account",
            ActionType::AllowNegative => "*allow_negative",
            ActionType::DenyNegative => "*deny_negative",
        }
    }

    /// Actions that read or write a balance class
    pub fn touches_balance(&self) -> bool {
        matches!(
            self,
            ActionType::TopUp
                | ActionType::TopUpReset
                | ActionType::Debit
                | ActionType::DebitReset
                | ActionType::SetBalance
                | ActionType::RemoveBalance
        )
    }

    /// Actions that can run without a target account
    pub fn is_accountless(&self) -> bool {
        matches!(self, ActionType::Log | ActionType::CdrLog)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| AppError::UnsupportedAction(s.to_string()))
    }
}

/// One step of a compiled action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// ID of the action list this step belongs to
    pub id: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub balance_type: Option<BalanceType>,
    #[serde(default)]
    pub balance: BalanceFilter,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    #[serde(default)]
    pub weight: f64,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id: id.into(),
            action_type,
            balance_type: None,
            balance: BalanceFilter::default(),
            extra_data: None,
            weight: 0.0,
        }
    }

    pub fn on_balance(mut self, balance_type: BalanceType, balance: BalanceFilter) -> Self {
        self.balance_type = Some(balance_type);
        self.balance = balance;
        self
    }

    /// Check the fields each action type requires
    pub fn validate(&self) -> AppResult<()> {
        if !self.action_type.touches_balance() {
            return Ok(());
        }
        if self.balance_type.is_none() {
            return Err(AppError::MissingField(format!(
                "{}: Balance.Type",
                self.action_type
            )));
        }
        match self.action_type {
            ActionType::TopUp
            | ActionType::TopUpReset
            | ActionType::Debit
            | ActionType::DebitReset
                if self.balance.value.is_none() =>
            {
                Err(AppError::MissingField(format!(
                    "{}: Balance.Value",
                    self.action_type
                )))
            }
            ActionType::SetBalance if !self.balance.has_identity() => Err(AppError::MissingField(
                format!("{}: Balance.ID", self.action_type),
            )),
            _ => Ok(()),
        }
    }
}

/// Sort an action list by descending weight, keeping list order for ties
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
}

/// Synthetic CDR describing one balance action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCdr {
    pub account_id: String,
    pub action_id: String,
    pub action_type: ActionType,
    pub balance_type: BalanceType,
    pub balance_id: String,
    pub amount: Decimal,
    pub balance_value: Decimal,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Side effect produced by applying an action list
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEffect {
    Log { account_id: String, message: String },
    PublishAccount,
    CdrLog(Vec<ActionCdr>),
}

/// Balance touched by one applied action
struct AppliedAction {
    action_id: String,
    action_type: ActionType,
    balance_type: BalanceType,
    balance_id: String,
    amount: Decimal,
    balance_value: Decimal,
}

/// Indices of usable balances matching `filter`, highest weight first, cut after the first blocker
fn candidates(balances: &[Balance], filter: &BalanceFilter, now: DateTime<Utc>) -> Vec<usize> {
    let mut idx: Vec<usize> = balances
        .iter()
        .enumerate()
        .filter(|(_, b)| {
            !b.is_expired(now) && (!b.disabled || filter.disabled == Some(true)) && b.matches(filter)
        })
        .map(|(i, _)| i)
        .collect();
    idx.sort_by(|a, b| {
        balances[*b]
            .weight
            .partial_cmp(&balances[*a].weight)
            .unwrap_or(Ordering::Equal)
    });
    if let Some(pos) = idx.iter().position(|i| balances[*i].blocker) {
        idx.truncate(pos + 1);
    }
    idx
}

/// Index of the balance addressed by ID/UUID, creating a zero balance when absent
/// Result of a checked balance operation, overflow becomes `InvalidInput`
fn checked(value: Option<Decimal>, operation: &str, balance_id: &str) -> AppResult<Decimal> {
    value.ok_or_else(|| {
        AppError::InvalidInput(format!("{} overflows balance {}", operation, balance_id))
    })
}

fn identity_target(balances: &mut Vec<Balance>, filter: &BalanceFilter) -> usize {
    match balances.iter().position(|b| b.matches_identity(filter)) {
        Some(i) => i,
        None => {
            balances.push(filter.create_balance(Decimal::ZERO));
            balances.len() - 1
        }
    }
}

impl Account {
    /// Apply an action list in order, stopping at the first error
    ///
    /// Callers apply the list to a copy of the stored account and persist it
    /// only when this returns `Ok`, so a failing list never leaves a partial
    /// mutation behind.
    pub fn apply_actions(
        &mut self,
        actions: &[Action],
        now: DateTime<Utc>,
        decimals: u32,
    ) -> AppResult<Vec<ActionEffect>> {
        let mut effects = Vec::new();
        let mut applied: Vec<AppliedAction> = Vec::new();

        for action in actions {
            action.validate()?;
            match action.action_type {
                ActionType::Log => effects.push(ActionEffect::Log {
                    account_id: self.id.clone(),
                    message: format!(
                        "action {} on account {}: {}",
                        action.id,
                        self.id,
                        action
                            .extra_data
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    ),
                }),
                ActionType::PublishAccount => effects.push(ActionEffect::PublishAccount),
                ActionType::CdrLog => {
                    let cdrs = applied
                        .iter()
                        .map(|a| ActionCdr {
                            account_id: self.id.clone(),
                            action_id: a.action_id.clone(),
                            action_type: a.action_type,
                            balance_type: a.balance_type,
                            balance_id: a.balance_id.clone(),
                            amount: a.amount,
                            balance_value: a.balance_value,
                            extra_data: action.extra_data.clone(),
                            created_at: now,
                        })
                        .collect();
                    effects.push(ActionEffect::CdrLog(cdrs));
                }
                ActionType::EnableAccount => self.disabled = false,
                ActionType::DisableAccount => self.disabled = true,
                ActionType::AllowNegative => self.allow_negative = true,
                ActionType::DenyNegative => self.allow_negative = false,
                ActionType::TopUp
                | ActionType::TopUpReset
                | ActionType::Debit
                | ActionType::DebitReset
                | ActionType::SetBalance
                | ActionType::RemoveBalance => {
                    if let Some(record) = self.apply_balance_action(action, now, decimals)? {
                        applied.push(record);
                    }
                }
            }
        }

        Ok(effects)
    }

    fn apply_balance_action(
        &mut self,
        action: &Action,
        now: DateTime<Utc>,
        decimals: u32,
    ) -> AppResult<Option<AppliedAction>> {
        let balance_type = action
            .balance_type
            .ok_or_else(|| AppError::MissingField("Balance.Type".to_string()))?;
        let filter = &action.balance;

        let (index, amount) = match action.action_type {
            ActionType::TopUp | ActionType::TopUpReset => {
                let amount = filter.amount(now, decimals)?;
                let reset = action.action_type == ActionType::TopUpReset;
                (self.topup(balance_type, filter, amount, reset, now)?, amount)
            }
            ActionType::Debit | ActionType::DebitReset => {
                if self.disabled {
                    return Err(AppError::AccountDisabled(self.id.clone()));
                }
                let amount = filter.amount(now, decimals)?;
                let reset = action.action_type == ActionType::DebitReset;
                (self.debit(balance_type, filter, amount, reset, now)?, amount)
            }
            ActionType::SetBalance => self.set_balance(balance_type, filter, now, decimals)?,
            ActionType::RemoveBalance => {
                self.remove_balance(balance_type, filter)?;
                return Ok(None);
            }
            other => return Err(AppError::UnsupportedAction(other.to_string())),
        };

        let balance = &self.balances(balance_type)[index];
        Ok(Some(AppliedAction {
            action_id: action.id.clone(),
            action_type: action.action_type,
            balance_type,
            balance_id: if balance.id.is_empty() {
                balance.uuid.clone()
            } else {
                balance.id.clone()
            },
            amount,
            balance_value: balance.value,
        }))
    }

    /// Add to the selected balance, returns the index of the balance touched
    fn topup(
        &mut self,
        balance_type: BalanceType,
        filter: &BalanceFilter,
        amount: Decimal,
        reset: bool,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        let balances = self.balance_map.entry(balance_type).or_default();
        let target = if filter.has_identity() {
            Some(identity_target(balances, filter))
        } else {
            candidates(balances, filter, now).first().copied()
        };
        match target {
            Some(i) => {
                let balance = &mut balances[i];
                balance.value = if reset {
                    amount
                } else {
                    checked(balance.value.checked_add(amount), "topup", &balance.id)?
                };
                Ok(i)
            }
            None => {
                balances.push(filter.create_balance(amount));
                Ok(balances.len() - 1)
            }
        }
    }

    /// Subtract across the selected balances, returns the index of the last balance touched
    ///
    /// Without an explicit ID the amount spills over matching balances by
    /// descending weight; the last candidate (the blocker, when there is one)
    /// absorbs whatever is left and may go negative.
    fn debit(
        &mut self,
        balance_type: BalanceType,
        filter: &BalanceFilter,
        amount: Decimal,
        reset: bool,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        let account_id = self.id.clone();
        let allow_negative = self.allow_negative;
        let balances = self.balance_map.entry(balance_type).or_default();

        let touched = if filter.has_identity() {
            let i = identity_target(balances, filter);
            let balance = &mut balances[i];
            balance.value = if reset {
                -amount
            } else {
                checked(balance.value.checked_sub(amount), "debit", &balance.id)?
            };
            i
        } else {
            let idx = candidates(balances, filter, now);
            match idx.first() {
                None => {
                    balances.push(filter.create_balance(-amount));
                    balances.len() - 1
                }
                Some(&first) if reset => {
                    balances[first].value = -amount;
                    first
                }
                Some(_) => {
                    let mut remaining = amount;
                    let mut last_touched = idx[0];
                    for (n, &i) in idx.iter().enumerate() {
                        let balance = &mut balances[i];
                        last_touched = i;
                        if n + 1 == idx.len() {
                            balance.value =
                                checked(balance.value.checked_sub(remaining), "debit", &balance.id)?;
                            break;
                        }
                        let take = balance.value.max(Decimal::ZERO).min(remaining);
                        balance.value -= take;
                        remaining -= take;
                        if remaining.is_zero() {
                            break;
                        }
                    }
                    last_touched
                }
            }
        };

        if !allow_negative && balances[touched].value < Decimal::ZERO {
            warn!(
                account_id = %account_id,
                balance_type = %balance_type,
                value = %balances[touched].value,
                "Debit took balance below zero on account without allow_negative"
            );
        }
        Ok(touched)
    }

    fn set_balance(
        &mut self,
        balance_type: BalanceType,
        filter: &BalanceFilter,
        now: DateTime<Utc>,
        decimals: u32,
    ) -> AppResult<(usize, Decimal)> {
        let value = match &filter.value {
            Some(formula) => Some(formula.evaluate(now)?.round_dp(decimals)),
            None => None,
        };
        let balances = self.balance_map.entry(balance_type).or_default();
        let i = identity_target(balances, filter);
        let balance = &mut balances[i];
        filter.patch(balance);
        if let (Some(_), Some(id)) = (&filter.uuid, &filter.id) {
            balance.id = id.clone();
        }
        if let Some(value) = value {
            balance.value = value;
        }
        Ok((i, value.unwrap_or(balance.value)))
    }

    fn remove_balance(&mut self, balance_type: BalanceType, filter: &BalanceFilter) -> AppResult<()> {
        let account_id = self.id.clone();
        let not_found = || {
            AppError::NotFound(format!(
                "no {} balance matching filter on {}",
                balance_type, account_id
            ))
        };
        let balances = self
            .balance_map
            .get_mut(&balance_type)
            .ok_or_else(not_found)?;
        let before = balances.len();
        balances.retain(|b| !b.matches(filter));
        let removed = before - balances.len();
        if balances.is_empty() {
            self.balance_map.remove(&balance_type);
        }
        if removed == 0 {
            return Err(not_found());
        }
        Ok(())
    }
}

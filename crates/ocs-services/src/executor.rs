//! Action execution
//!
//! Runs compiled action lists against accounts. Every account mutation goes
//! through [`ActionExecutor::apply_to_account`]: the stored account is loaded
//! (or created), the list is applied to that in-memory copy, triggers fire,
//! expired balances are purged and the result is persisted once. A failing
//! list therefore never leaves a partially mutated account in the store.

use chrono::{DateTime, Utc};
use ocs_core::{
    config::GeneralConfig,
    keys,
    models::{Account, Action, ActionEffect, ActionTiming, Task},
    traits::{EngineEvent, EventSink},
    AppResult,
};
use ocs_db::DataManager;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::guardian::Guardian;

/// Applies action lists to accounts under their Guardian lock
pub struct ActionExecutor {
    dm: DataManager,
    guardian: Arc<Guardian>,
    sink: Arc<dyn EventSink>,
    config: GeneralConfig,
}

impl ActionExecutor {
    pub fn new(
        dm: DataManager,
        guardian: Arc<Guardian>,
        sink: Arc<dyn EventSink>,
        config: GeneralConfig,
    ) -> Self {
        Self {
            dm,
            guardian,
            sink,
            config,
        }
    }

    pub fn guardian(&self) -> &Arc<Guardian> {
        &self.guardian
    }

    pub fn config(&self) -> &GeneralConfig {
        &self.config
    }

    /// Execute a timing's action list for each of its accounts
    ///
    /// Accounts are processed in ascending ID order, each under its own lock.
    /// The first failure stops the run; accounts already processed keep
    /// their changes. Timings without accounts only run account-less actions.
    #[instrument(skip(self, timing), fields(plan = %timing.action_plan_id(), timing = %timing.uuid))]
    pub async fn execute_timing(&self, timing: &ActionTiming, now: DateTime<Utc>) -> AppResult<()> {
        let actions = self.dm.get_actions(&timing.actions_id).await.map_err(|e| {
            error!("Failed to load actions {}: {}", timing.actions_id, e);
            e
        })?;

        if timing.account_ids().is_empty() {
            return self.execute_accountless(&actions, now).await;
        }

        for account_id in timing.account_ids() {
            self.execute_on_account(account_id, &actions, now).await?;
        }
        Ok(())
    }

    /// Execute a queued task
    #[instrument(skip(self, task), fields(task = %task.uuid, account = %task.account_id))]
    pub async fn execute_task(&self, task: &Task, now: DateTime<Utc>) -> AppResult<()> {
        let actions = self.dm.get_actions(&task.actions_id).await?;
        if task.account_id.is_empty() {
            self.execute_accountless(&actions, now).await
        } else {
            self.execute_on_account(&task.account_id, &actions, now)
                .await
                .map(|_| ())
        }
    }

    /// Lock the account and apply `actions` to it
    pub async fn execute_on_account(
        &self,
        account_id: &str,
        actions: &[Action],
        now: DateTime<Utc>,
    ) -> AppResult<Account> {
        self.guardian
            .guard(
                &[keys::account_key(account_id)],
                self.config.locking_timeout(),
                || self.apply_to_account(account_id, actions, now),
            )
            .await
    }

    /// Apply `actions` to the stored account and persist the result
    ///
    /// The caller must already hold the account's Guardian key. Missing
    /// accounts are created. Triggers crossed by the list run their own
    /// actions on the same copy; those trigger actions do not re-evaluate
    /// triggers.
    pub async fn apply_to_account(
        &self,
        account_id: &str,
        actions: &[Action],
        now: DateTime<Utc>,
    ) -> AppResult<Account> {
        let (account, effects) = self.prepare_account(account_id, actions, now).await?;
        self.commit_account(account, effects).await
    }

    /// Compute the account `actions` would produce without storing it
    ///
    /// Same contract as [`apply_to_account`](Self::apply_to_account); nothing
    /// is written until the result goes through
    /// [`commit_account`](Self::commit_account).
    pub async fn prepare_account(
        &self,
        account_id: &str,
        actions: &[Action],
        now: DateTime<Utc>,
    ) -> AppResult<(Account, Vec<ActionEffect>)> {
        let mut account = match self.dm.find_account(account_id).await? {
            Some(account) => account,
            None => {
                debug!("Creating account {} on first use", account_id);
                Account::new(account_id)
            }
        };
        let decimals = self.config.rounding_decimals;

        let mut effects = account.apply_actions(actions, now, decimals)?;

        for actions_id in account.fire_triggers(now) {
            info!("Trigger fired on {}: executing {}", account_id, actions_id);
            let trigger_actions = self.dm.get_actions(&actions_id).await?;
            effects.extend(account.apply_actions(&trigger_actions, now, decimals)?);
        }

        let purged = account.clean_expired_balances(now);
        if purged > 0 {
            debug!("Purged {} expired balances from {}", purged, account_id);
        }
        Ok((account, effects))
    }

    /// Persist a prepared account and publish its effects
    pub async fn commit_account(
        &self,
        mut account: Account,
        effects: Vec<ActionEffect>,
    ) -> AppResult<Account> {
        self.dm.set_account(&mut account).await?;
        self.emit(&account, effects).await;
        Ok(account)
    }

    /// Run the account-less steps of a list (`*log`, `*cdrlog`)
    async fn execute_accountless(&self, actions: &[Action], now: DateTime<Utc>) -> AppResult<()> {
        let runnable: Vec<Action> = actions
            .iter()
            .filter(|a| a.action_type.is_accountless())
            .cloned()
            .collect();
        if runnable.len() < actions.len() {
            debug!(
                "Skipping {} account-bound actions without a target account",
                actions.len() - runnable.len()
            );
        }
        if runnable.is_empty() {
            return Ok(());
        }

        let mut scratch = Account::new("");
        let effects = scratch.apply_actions(&runnable, now, self.config.rounding_decimals)?;
        self.emit(&scratch, effects).await;
        Ok(())
    }

    async fn emit(&self, account: &Account, effects: Vec<ActionEffect>) {
        for effect in effects {
            match effect {
                ActionEffect::Log {
                    account_id,
                    message,
                } => {
                    self.sink
                        .publish(EngineEvent::ActionLogged {
                            account_id,
                            message,
                        })
                        .await
                }
                ActionEffect::PublishAccount => {
                    self.sink
                        .publish(EngineEvent::AccountPublished {
                            account: account.clone(),
                        })
                        .await
                }
                ActionEffect::CdrLog(cdrs) => {
                    for cdr in cdrs {
                        self.sink.publish(EngineEvent::CdrLogged { cdr }).await;
                    }
                }
            }
        }
    }
}

//! Action plan service
//!
//! Owns the two directions of plan membership: `ActionPlan.account_ids`
//! (plan to accounts) and the account action plans index (account to plans).
//! Every change to either side happens here, inside the Guardian key that
//! covers the whole action plan namespace, and updates both sides before the
//! key is released.

use chrono::{DateTime, Utc};
use ocs_core::{
    config::GeneralConfig,
    keys,
    models::{sort_actions, Action, ActionPlan, ActionTiming, Task},
    traits::{CacheInvalidator, CacheReloadRequest, TaskQueue},
    AppError, AppResult,
};
use ocs_db::DataManager;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::constants::action_plans_lock_key;
use crate::dto::{AccountActionTiming, AccountArgs, RemoveActionTimingArgs, SetActionPlanArgs};
use crate::guardian::Guardian;
use crate::scheduler::ReloadSignal;

/// What a removal changed in a plan
#[derive(Debug, Clone, PartialEq)]
enum PlanEdit {
    /// The plan is gone; every listed account loses its index entry
    PlanRemoved {
        plan_id: String,
        account_ids: BTreeSet<String>,
    },
    /// One account left the plan
    AccountDetached { plan_id: String, account_id: String },
    /// One timing left the plan, which still has others
    TimingRemoved { plan_id: String },
}

impl PlanEdit {
    fn plan_id(&self) -> &str {
        match self {
            PlanEdit::PlanRemoved { plan_id, .. }
            | PlanEdit::AccountDetached { plan_id, .. }
            | PlanEdit::TimingRemoved { plan_id } => plan_id,
        }
    }

    /// Accounts whose index must drop the plan
    fn detached_accounts(&self) -> BTreeSet<String> {
        match self {
            PlanEdit::PlanRemoved { account_ids, .. } => account_ids.clone(),
            PlanEdit::AccountDetached { account_id, .. } => BTreeSet::from([account_id.clone()]),
            PlanEdit::TimingRemoved { .. } => BTreeSet::new(),
        }
    }
}

/// Action plan and action list management
pub struct ActionPlanService {
    dm: DataManager,
    guardian: Arc<Guardian>,
    tasks: Arc<dyn TaskQueue>,
    invalidator: Arc<dyn CacheInvalidator>,
    reload: ReloadSignal,
    config: GeneralConfig,
}

impl ActionPlanService {
    pub fn new(
        dm: DataManager,
        guardian: Arc<Guardian>,
        tasks: Arc<dyn TaskQueue>,
        invalidator: Arc<dyn CacheInvalidator>,
        reload: ReloadSignal,
        config: GeneralConfig,
    ) -> Self {
        Self {
            dm,
            guardian,
            tasks,
            invalidator,
            reload,
            config,
        }
    }

    /// Create a plan, or replace one when `overwrite` is set
    ///
    /// Replacing keeps the subscribed accounts and queues the new ASAP
    /// timings for them.
    #[instrument(skip(self, args), fields(plan = %args.id))]
    pub async fn set_action_plan(&self, args: SetActionPlanArgs) -> AppResult<()> {
        args.validate()?;
        let now = Utc::now();

        let mut timings = Vec::with_capacity(args.timings.len());
        for spec in &args.timings {
            let timing = spec.to_timing(now)?;
            // Referenced action lists must exist before the plan does
            self.dm.get_actions(&spec.actions_id).await.map_err(|e| {
                error!("Plan {} references unknown actions {}", args.id, spec.actions_id);
                e
            })?;
            let mut at = ActionTiming::new(spec.actions_id.clone(), timing, spec.weight);
            at.set_action_plan_id(args.id.clone());
            timings.push(at);
        }

        let plan_id = args.id.clone();
        let overwrite = args.overwrite;
        self.guardian
            .guard(&[action_plans_lock_key()], self.config.locking_timeout(), || async {
                let mut plan = match self.dm.find_action_plan(&plan_id).await? {
                    Some(_) if !overwrite => {
                        warn!("Action plan {} already exists", plan_id);
                        return Err(AppError::AlreadyExists(format!("action plan {}", plan_id)));
                    }
                    Some(existing) => {
                        info!(
                            "Replacing action plan {} ({} accounts kept)",
                            plan_id,
                            existing.account_ids.len()
                        );
                        ActionPlan {
                            action_timings: Vec::new(),
                            ..existing
                        }
                    }
                    None => ActionPlan::new(plan_id.clone()),
                };
                plan.action_timings = timings;
                self.dm.set_action_plan(&plan).await?;

                for account_id in &plan.account_ids {
                    self.enqueue_asap(&plan, account_id).await?;
                }

                self.invalidate(CacheReloadRequest {
                    action_plan_ids: BTreeSet::from([plan_id.clone()]),
                    ..Default::default()
                })
                .await;
                Ok(())
            })
            .await?;

        if args.reload_scheduler {
            self.reload.notify();
        }
        Ok(())
    }

    pub async fn get_action_plan(&self, plan_id: &str) -> AppResult<ActionPlan> {
        self.dm.get_action_plan(plan_id).await
    }

    pub async fn get_action_plans(&self) -> AppResult<Vec<ActionPlan>> {
        self.dm.get_all_action_plans().await
    }

    /// Delete a plan and every index entry pointing at it
    pub async fn remove_action_plan(&self, plan_id: &str, reload_scheduler: bool) -> AppResult<()> {
        self.remove_action_timing(RemoveActionTimingArgs {
            action_plan_id: plan_id.to_string(),
            reload_scheduler,
            ..Default::default()
        })
        .await
    }

    /// Store an action list, sorted by descending weight
    #[instrument(skip(self, actions))]
    pub async fn set_actions(
        &self,
        actions_id: &str,
        mut actions: Vec<Action>,
        overwrite: bool,
    ) -> AppResult<()> {
        if actions_id.is_empty() {
            return Err(AppError::MissingField("ActionsId".to_string()));
        }
        if actions.is_empty() {
            return Err(AppError::Validation(format!(
                "action list {} has no actions",
                actions_id
            )));
        }
        for action in &mut actions {
            action.validate()?;
            action.id = actions_id.to_string();
        }
        if !overwrite && self.dm.actions_ids().await?.iter().any(|id| id == actions_id) {
            return Err(AppError::AlreadyExists(format!("actions {}", actions_id)));
        }

        sort_actions(&mut actions);
        self.dm.set_actions(actions_id, &actions).await?;
        debug!("Stored {} actions under {}", actions.len(), actions_id);
        Ok(())
    }

    pub async fn get_actions(&self, actions_id: &str) -> AppResult<Vec<Action>> {
        self.dm.get_actions(actions_id).await
    }

    /// Delete an action list no plan refers to
    pub async fn remove_actions(&self, actions_id: &str) -> AppResult<()> {
        for plan in self.dm.get_all_action_plans().await? {
            if plan.action_timings.iter().any(|at| at.actions_id == actions_id) {
                return Err(AppError::Validation(format!(
                    "actions {} are used by action plan {}",
                    actions_id, plan.id
                )));
            }
        }
        if !self.dm.remove_actions(actions_id).await? {
            return Err(AppError::NotFound(keys::actions_key(actions_id)));
        }
        Ok(())
    }

    /// Make `plan_id` the only plan `account_id` belongs to
    ///
    /// Returns whether membership changed. When the account joins the plan,
    /// one task per ASAP timing is queued for it. Safe to repeat: membership
    /// is recomputed from stored state every time.
    #[instrument(skip(self))]
    pub async fn rebind_account(&self, account_id: &str, plan_id: &str) -> AppResult<bool> {
        self.guardian
            .guard(&[action_plans_lock_key()], self.config.locking_timeout(), || async {
                let mut target = self.dm.get_action_plan(plan_id).await?;
                let mut account_plans = self.dm.get_account_action_plans(account_id).await?;
                let mut dirty: BTreeMap<String, ActionPlan> = BTreeMap::new();

                for other_id in account_plans.clone() {
                    if other_id == plan_id {
                        continue;
                    }
                    account_plans.remove(&other_id);
                    match self.dm.find_action_plan(&other_id).await? {
                        Some(mut other) => {
                            if other.account_ids.remove(account_id) {
                                dirty.insert(other_id, other);
                            }
                        }
                        None => warn!(
                            "Account {} indexed under missing action plan {}",
                            account_id, other_id
                        ),
                    }
                }

                let joined = target.account_ids.insert(account_id.to_string());
                if joined {
                    dirty.insert(target.id.clone(), target.clone());
                }
                account_plans.insert(plan_id.to_string());

                let mut reload = CacheReloadRequest::default();
                for plan in dirty.values() {
                    self.dm.set_action_plan(plan).await?;
                    reload.action_plan_ids.insert(plan.id.clone());
                }
                self.dm
                    .set_account_action_plans(account_id, &account_plans)
                    .await?;
                // Tasks are only queued for membership that is already stored
                if joined {
                    self.enqueue_asap(&target, account_id).await?;
                }
                reload
                    .account_action_plan_ids
                    .insert(account_id.to_string());

                let changed = !dirty.is_empty();
                if changed {
                    info!("Account {} bound to action plan {}", account_id, plan_id);
                }
                self.invalidate(reload).await;
                Ok(changed)
            })
            .await
    }

    /// Remove an account from every plan it belongs to
    #[instrument(skip(self))]
    pub async fn detach_account(&self, account_id: &str) -> AppResult<()> {
        self.guardian
            .guard(&[action_plans_lock_key()], self.config.locking_timeout(), || async {
                let plan_ids = self.dm.get_account_action_plans(account_id).await?;
                let mut reload = CacheReloadRequest::default();
                for plan_id in &plan_ids {
                    if let Some(mut plan) = self.dm.find_action_plan(plan_id).await? {
                        if plan.account_ids.remove(account_id) {
                            self.dm.set_action_plan(&plan).await?;
                            reload.action_plan_ids.insert(plan_id.clone());
                        }
                    }
                }
                self.dm
                    .set_account_action_plans(account_id, &BTreeSet::new())
                    .await?;
                reload
                    .account_action_plan_ids
                    .insert(account_id.to_string());
                self.invalidate(reload).await;
                Ok(())
            })
            .await
    }

    /// Remove a timing, detach an account, or delete a whole plan
    ///
    /// A timing ID takes precedence over account scoping. Removing the last
    /// timing deletes the plan.
    #[instrument(skip(self, args), fields(plan = %args.action_plan_id))]
    pub async fn remove_action_timing(&self, args: RemoveActionTimingArgs) -> AppResult<()> {
        args.validate()?;
        let account_id = args.account_id(&self.config.default_tenant);
        let timing_id = args
            .action_timing_id
            .clone()
            .filter(|t| !t.is_empty());

        self.guardian
            .guard(&[action_plans_lock_key()], self.config.locking_timeout(), || async {
                let mut plan = self.dm.get_action_plan(&args.action_plan_id).await?;

                let edit = if let Some(uuid) = &timing_id {
                    if !plan.remove_timing(uuid) {
                        return Err(AppError::NotFound(format!(
                            "timing {} in action plan {}",
                            uuid, plan.id
                        )));
                    }
                    if plan.is_empty() {
                        self.dm.remove_action_plan(&plan.id).await?;
                        PlanEdit::PlanRemoved {
                            plan_id: plan.id.clone(),
                            account_ids: plan.account_ids.clone(),
                        }
                    } else {
                        self.dm.set_action_plan(&plan).await?;
                        PlanEdit::TimingRemoved {
                            plan_id: plan.id.clone(),
                        }
                    }
                } else if let Some(account_id) = &account_id {
                    if !plan.account_ids.remove(account_id) {
                        return Err(AppError::NotFound(format!(
                            "account {} in action plan {}",
                            account_id, plan.id
                        )));
                    }
                    self.dm.set_action_plan(&plan).await?;
                    PlanEdit::AccountDetached {
                        plan_id: plan.id.clone(),
                        account_id: account_id.clone(),
                    }
                } else {
                    self.dm.remove_action_plan(&plan.id).await?;
                    PlanEdit::PlanRemoved {
                        plan_id: plan.id.clone(),
                        account_ids: plan.account_ids.clone(),
                    }
                };

                self.apply_plan_edit(edit).await
            })
            .await?;

        if args.reload_scheduler {
            self.reload.notify();
        }
        Ok(())
    }

    /// Scheduled timings of every plan the account belongs to
    ///
    /// Returns `NotFound` when the account has no plan.
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn get_account_action_plan(
        &self,
        args: AccountArgs,
    ) -> AppResult<Vec<AccountActionTiming>> {
        args.validate()?;
        let account_id = args.account_id(&self.config.default_tenant);
        let now = Utc::now();

        let mut timings = Vec::new();
        for plan_id in self.dm.get_account_action_plans(&account_id).await? {
            let Some(plan) = self.dm.find_action_plan(&plan_id).await? else {
                warn!("Account {} indexed under missing action plan {}", account_id, plan_id);
                continue;
            };
            timings.extend(plan_timings(&plan, now));
        }

        if timings.is_empty() {
            return Err(AppError::NotFound(format!(
                "action plans for account {}",
                account_id
            )));
        }
        Ok(timings)
    }

    /// Drop the edited plan from the affected account indexes and publish one reload
    async fn apply_plan_edit(&self, edit: PlanEdit) -> AppResult<()> {
        let plan_id = edit.plan_id().to_string();
        let mut reload = CacheReloadRequest {
            action_plan_ids: BTreeSet::from([plan_id.clone()]),
            ..Default::default()
        };

        for account_id in edit.detached_accounts() {
            let mut plans = self.dm.get_account_action_plans(&account_id).await?;
            if plans.remove(&plan_id) {
                self.dm.set_account_action_plans(&account_id, &plans).await?;
            }
            reload.account_action_plan_ids.insert(account_id);
        }

        debug!("Applied plan edit {:?}", edit);
        self.invalidate(reload).await;
        Ok(())
    }

    async fn enqueue_asap(&self, plan: &ActionPlan, account_id: &str) -> AppResult<()> {
        for at in plan.asap_timings() {
            self.tasks
                .push_task(Task::new(account_id, at.actions_id.clone()))
                .await?;
        }
        Ok(())
    }

    async fn invalidate(&self, request: CacheReloadRequest) {
        if let Err(e) = self.invalidator.reload(request).await {
            warn!("Cache reload request failed: {}", e);
        }
    }
}

fn plan_timings(plan: &ActionPlan, now: DateTime<Utc>) -> Vec<AccountActionTiming> {
    plan.action_timings
        .iter()
        .map(|at| {
            let mut at = at.clone();
            AccountActionTiming {
                action_plan_id: plan.id.clone(),
                uuid: at.uuid.clone(),
                actions_id: at.actions_id.clone(),
                next_exec_time: at.next_start_time(now),
            }
        })
        .collect()
}

//! Account service
//!
//! Account lifecycle and the balance operations exposed to callers. Balance
//! operations are expressed as one-off action lists and go through the same
//! executor as scheduled actions, so they share its copy-then-persist
//! guarantee.

use chrono::Utc;
use ocs_core::{
    config::GeneralConfig,
    keys,
    models::{Account, Action, ActionType, BalanceFilter, ValueFormula},
    traits::{CacheInvalidator, CacheReloadRequest},
    AppError, AppResult,
};
use ocs_db::DataManager;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::action_plan_service::ActionPlanService;
use crate::dto::{
    AccountArgs, BalanceArgs, BalanceSpec, RemoveBalancesArgs, SetAccountArgs, SetBalanceArgs,
    SetBalancesArgs,
};
use crate::executor::ActionExecutor;
use crate::scheduler::ReloadSignal;

/// Account and balance operations
pub struct AccountService {
    dm: DataManager,
    executor: Arc<ActionExecutor>,
    plans: Arc<ActionPlanService>,
    invalidator: Arc<dyn CacheInvalidator>,
    reload: ReloadSignal,
}

impl AccountService {
    pub fn new(
        dm: DataManager,
        executor: Arc<ActionExecutor>,
        plans: Arc<ActionPlanService>,
        invalidator: Arc<dyn CacheInvalidator>,
        reload: ReloadSignal,
    ) -> Self {
        Self {
            dm,
            executor,
            plans,
            invalidator,
            reload,
        }
    }

    fn config(&self) -> &GeneralConfig {
        self.executor.config()
    }

    /// Create or update an account, optionally rebinding it to a plan
    ///
    /// The account lock is taken first, then the action plan namespace
    /// inside the rebind. Flag changes and balance overrides are applied as
    /// one action list, computed before the rebind and stored after it.
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn set_account(&self, args: SetAccountArgs) -> AppResult<Account> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);
        let plan_id = args.action_plan_id.clone().filter(|p| !p.is_empty());

        let mut actions = Vec::new();
        if let Some(allow) = args.allow_negative {
            let action_type = if allow {
                ActionType::AllowNegative
            } else {
                ActionType::DenyNegative
            };
            actions.push(Action::new("SET_ACCOUNT", action_type));
        }
        if let Some(disabled) = args.disabled {
            let action_type = if disabled {
                ActionType::DisableAccount
            } else {
                ActionType::EnableAccount
            };
            actions.push(Action::new("SET_ACCOUNT", action_type));
        }
        actions.extend(set_balance_actions("SET_ACCOUNT", &args.balances));

        let (account, rebound) = self
            .executor
            .guardian()
            .guard(
                &[keys::account_key(&account_id)],
                self.config().locking_timeout(),
                || async {
                    // A list that fails to apply must leave plan membership untouched
                    let (account, effects) = self
                        .executor
                        .prepare_account(&account_id, &actions, Utc::now())
                        .await?;
                    let rebound = match &plan_id {
                        Some(plan_id) => self.plans.rebind_account(&account_id, plan_id).await?,
                        None => false,
                    };
                    let account = self.executor.commit_account(account, effects).await?;
                    Ok((account, rebound))
                },
            )
            .await?;

        info!("Account {} set", account_id);
        self.invalidate_account(&account_id).await;
        if rebound && args.reload_scheduler {
            self.reload.notify();
        }
        Ok(account)
    }

    /// Delete an account and its plan memberships
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn remove_account(&self, args: AccountArgs) -> AppResult<()> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);

        self.executor
            .guardian()
            .guard(
                &[keys::account_key(&account_id)],
                self.config().locking_timeout(),
                || async {
                    if self.dm.find_account(&account_id).await?.is_none() {
                        return Err(AppError::AccountNotFound(account_id.clone()));
                    }
                    self.plans.detach_account(&account_id).await?;
                    self.dm.remove_account(&account_id).await?;
                    Ok(())
                },
            )
            .await?;

        info!("Account {} removed", account_id);
        self.invalidate_account(&account_id).await;
        Ok(())
    }

    pub async fn get_account(&self, args: AccountArgs) -> AppResult<Account> {
        args.validate()?;
        self.dm
            .get_account(&args.account_id(&self.config().default_tenant))
            .await
    }

    /// Top up a balance class (`*topup`, or `*topup_reset` with overwrite)
    #[instrument(skip(self, args), fields(account = %args.account, value = %args.value))]
    pub async fn add_balance(&self, args: BalanceArgs) -> AppResult<Account> {
        let action_type = if args.overwrite {
            ActionType::TopUpReset
        } else {
            ActionType::TopUp
        };
        self.balance_operation(args, action_type).await
    }

    /// Debit a balance class (`*debit`, or `*debit_reset` with overwrite)
    #[instrument(skip(self, args), fields(account = %args.account, value = %args.value))]
    pub async fn debit_balance(&self, args: BalanceArgs) -> AppResult<Account> {
        let action_type = if args.overwrite {
            ActionType::DebitReset
        } else {
            ActionType::Debit
        };
        self.balance_operation(args, action_type).await
    }

    async fn balance_operation(&self, args: BalanceArgs, action_type: ActionType) -> AppResult<Account> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);

        let filter = BalanceFilter {
            value: Some(ValueFormula::Static(args.value)),
            ..args.balance.clone()
        };
        let mut action =
            Action::new(action_type.as_str(), action_type).on_balance(args.balance_type, filter);
        action.extra_data = args.action_extra_data.clone();

        let mut actions = vec![action];
        if args.cdrlog {
            actions.push(cdrlog_action(args.action_extra_data));
        }
        self.execute(&account_id, &actions).await
    }

    /// Patch one balance (`*set_balance`)
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn set_balance(&self, args: SetBalanceArgs) -> AppResult<Account> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);

        let mut actions = set_balance_actions("SET_BALANCE", std::slice::from_ref(&args.spec));
        for action in &mut actions {
            action.extra_data = args.action_extra_data.clone();
        }
        if args.cdrlog {
            actions.push(cdrlog_action(args.action_extra_data));
        }
        self.execute(&account_id, &actions).await
    }

    /// Patch several balances in one action list
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn set_balances(&self, args: SetBalancesArgs) -> AppResult<Account> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);
        let actions = set_balance_actions("SET_BALANCES", &args.balances);
        self.execute(&account_id, &actions).await
    }

    /// Remove the balances of a class matching a filter
    ///
    /// Unlike the other balance operations this never creates the account.
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn remove_balances(&self, args: RemoveBalancesArgs) -> AppResult<Account> {
        args.validate()?;
        let account_id = args.account_id(&self.config().default_tenant);
        let action = Action::new("REMOVE_BALANCES", ActionType::RemoveBalance)
            .on_balance(args.balance_type, args.balance.clone());

        let account = self
            .executor
            .guardian()
            .guard(
                &[keys::account_key(&account_id)],
                self.config().locking_timeout(),
                || async {
                    if self.dm.find_account(&account_id).await?.is_none() {
                        return Err(AppError::AccountNotFound(account_id.clone()));
                    }
                    self.executor
                        .apply_to_account(&account_id, std::slice::from_ref(&action), Utc::now())
                        .await
                },
            )
            .await?;

        self.invalidate_account(&account_id).await;
        Ok(account)
    }

    async fn execute(&self, account_id: &str, actions: &[Action]) -> AppResult<Account> {
        let account = self
            .executor
            .execute_on_account(account_id, actions, Utc::now())
            .await?;
        self.invalidate_account(account_id).await;
        Ok(account)
    }

    async fn invalidate_account(&self, account_id: &str) {
        let request = CacheReloadRequest {
            account_ids: BTreeSet::from([account_id.to_string()]),
            ..Default::default()
        };
        if let Err(e) = self.invalidator.reload(request).await {
            warn!("Cache reload request for {} failed: {}", account_id, e);
        }
    }
}

fn set_balance_actions(id: &str, specs: &[BalanceSpec]) -> Vec<Action> {
    specs
        .iter()
        .map(|spec| {
            Action::new(id, ActionType::SetBalance).on_balance(spec.balance_type, spec.balance.clone())
        })
        .collect()
}

fn cdrlog_action(extra_data: Option<serde_json::Value>) -> Action {
    Action {
        extra_data,
        ..Action::new(ActionType::CdrLog.as_str(), ActionType::CdrLog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{SetActionPlanArgs, TimingArgs};
    use crate::events::BroadcastEventSink;
    use crate::guardian::Guardian;
    use ocs_cache::ChannelInvalidator;
    use ocs_core::models::{ActionTrigger, BalanceType, ThresholdType};
    use ocs_core::traits::{EngineEvent, TaskQueue};
    use ocs_db::{MemoryStore, MemoryTaskQueue};
    use rust_decimal_macros::dec;

    struct Fixture {
        accounts: AccountService,
        plans: Arc<ActionPlanService>,
        dm: DataManager,
        sink: BroadcastEventSink,
        tasks: Arc<MemoryTaskQueue>,
    }

    fn fixture() -> Fixture {
        let dm = DataManager::new(Arc::new(MemoryStore::new()));
        let guardian = Arc::new(Guardian::new());
        let sink = BroadcastEventSink::new();
        let invalidator: Arc<dyn CacheInvalidator> = Arc::new(ChannelInvalidator::new());
        let reload = ReloadSignal::new();
        let config = GeneralConfig::default();
        let tasks = Arc::new(MemoryTaskQueue::new());
        let executor = Arc::new(ActionExecutor::new(
            dm.clone(),
            guardian.clone(),
            Arc::new(sink.clone()),
            config.clone(),
        ));
        let plans = Arc::new(ActionPlanService::new(
            dm.clone(),
            guardian,
            tasks.clone(),
            invalidator.clone(),
            reload.clone(),
            config,
        ));
        let accounts = AccountService::new(dm.clone(), executor, plans.clone(), invalidator, reload);
        Fixture {
            accounts,
            plans,
            dm,
            sink,
            tasks,
        }
    }

    fn monetary(value: rust_decimal::Decimal) -> BalanceArgs {
        BalanceArgs::new("cgrates.org", "1001", BalanceType::Monetary, value)
    }

    fn total(account: &Account) -> rust_decimal::Decimal {
        account.balance_total(BalanceType::Monetary, Utc::now())
    }

    #[tokio::test]
    async fn test_add_then_debit() {
        let f = fixture();
        let account = f.accounts.add_balance(monetary(dec!(10))).await.unwrap();
        assert_eq!(total(&account), dec!(10));

        let account = f.accounts.debit_balance(monetary(dec!(4))).await.unwrap();
        assert_eq!(total(&account), dec!(6));
    }

    #[tokio::test]
    async fn test_overwrite_resets() {
        let f = fixture();
        f.accounts.add_balance(monetary(dec!(10))).await.unwrap();

        let account = f
            .accounts
            .add_balance(BalanceArgs {
                overwrite: true,
                ..monetary(dec!(3))
            })
            .await
            .unwrap();
        assert_eq!(total(&account), dec!(3));

        let account = f
            .accounts
            .debit_balance(BalanceArgs {
                overwrite: true,
                ..monetary(dec!(2))
            })
            .await
            .unwrap();
        assert_eq!(total(&account), dec!(-2));
    }

    #[tokio::test]
    async fn test_cdrlog_flag_emits_cdr() {
        let f = fixture();
        let mut rx = f.sink.subscribe();
        f.accounts
            .add_balance(BalanceArgs {
                cdrlog: true,
                ..monetary(dec!(5))
            })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            EngineEvent::CdrLogged { cdr } => {
                assert_eq!(cdr.action_type, ActionType::TopUp);
                assert_eq!(cdr.amount, dec!(5));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_account_refuses_debit() {
        let f = fixture();
        f.accounts
            .set_account(SetAccountArgs {
                account: "1001".to_string(),
                disabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = f.accounts.debit_balance(monetary(dec!(1))).await.unwrap_err();
        assert!(matches!(err, AppError::AccountDisabled(_)));
    }

    #[tokio::test]
    async fn test_set_account_with_balances_and_plan() {
        let f = fixture();
        f.plans
            .set_actions(
                "LOG",
                vec![Action::new("LOG", ActionType::Log)],
                false,
            )
            .await
            .unwrap();
        f.plans
            .set_action_plan(SetActionPlanArgs {
                id: "PKG".to_string(),
                timings: vec![TimingArgs::new("LOG", "00:00:00", 0.0)],
                ..Default::default()
            })
            .await
            .unwrap();

        let args = SetAccountArgs {
            account: "1001".to_string(),
            action_plan_id: Some("PKG".to_string()),
            allow_negative: Some(true),
            balances: vec![BalanceSpec {
                balance_type: BalanceType::Monetary,
                balance: BalanceFilter::with_id("main").with_value(dec!(20)),
            }],
            ..Default::default()
        };
        let account = f.accounts.set_account(args.clone()).await.unwrap();
        assert!(account.allow_negative);
        assert_eq!(total(&account), dec!(20));

        // Repeating the call changes nothing
        f.accounts.set_account(args).await.unwrap();
        let plan = f.dm.get_action_plan("PKG").await.unwrap();
        assert_eq!(plan.account_ids.len(), 1);
        assert_eq!(
            f.dm.get_account_action_plans("cgrates.org:1001")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    /// Plan `PKG` debiting 3 as soon as an account joins it
    async fn asap_debit_plan(f: &Fixture) {
        let debit = Action::new("DEBIT_3", ActionType::Debit).on_balance(
            BalanceType::Monetary,
            BalanceFilter::with_id("main").with_value(dec!(3)),
        );
        f.plans.set_actions("DEBIT_3", vec![debit], false).await.unwrap();
        f.plans
            .set_action_plan(SetActionPlanArgs {
                id: "PKG".to_string(),
                timings: vec![TimingArgs::new("DEBIT_3", "*asap", 0.0)],
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn assert_unbound(f: &Fixture) {
        let plan = f.dm.get_action_plan("PKG").await.unwrap();
        assert!(plan.account_ids.is_empty());
        assert!(f
            .dm
            .get_account_action_plans("cgrates.org:1001")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(f.tasks.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_account_bad_formula_leaves_plans_untouched() {
        let f = fixture();
        asap_debit_plan(&f).await;

        let err = f
            .accounts
            .set_account(SetAccountArgs {
                account: "1001".to_string(),
                action_plan_id: Some("PKG".to_string()),
                balances: vec![BalanceSpec {
                    balance_type: BalanceType::Monetary,
                    balance: BalanceFilter {
                        value: Some(ValueFormula::Incremental {
                            units: dec!(10),
                            interval: "fortnight".to_string(),
                            increment: "day".to_string(),
                        }),
                        ..BalanceFilter::with_id("main")
                    },
                }],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert_unbound(&f).await;
        assert!(f.dm.find_account("cgrates.org:1001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_account_failed_apply_leaves_plans_untouched() {
        let f = fixture();
        asap_debit_plan(&f).await;

        // Crossing this trigger runs a list that does not exist
        let mut stored = Account::new("cgrates.org:1001");
        stored.action_triggers.push(ActionTrigger {
            id: "HIGH".to_string(),
            threshold_type: ThresholdType::MaxBalance,
            threshold_value: dec!(10),
            balance_type: BalanceType::Monetary,
            actions_id: "GONE".to_string(),
            recurrent: false,
            executed: false,
            weight: 0.0,
        });
        f.dm.set_account(&mut stored).await.unwrap();

        let err = f
            .accounts
            .set_account(SetAccountArgs {
                account: "1001".to_string(),
                action_plan_id: Some("PKG".to_string()),
                balances: vec![BalanceSpec {
                    balance_type: BalanceType::Monetary,
                    balance: BalanceFilter::with_id("main").with_value(dec!(20)),
                }],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_unbound(&f).await;
        let account = f.dm.get_account("cgrates.org:1001").await.unwrap();
        assert_eq!(total(&account), dec!(0));
        assert!(!account.action_triggers[0].executed);
    }

    #[tokio::test]
    async fn test_remove_balances_requires_account() {
        let f = fixture();
        let args = RemoveBalancesArgs {
            tenant: None,
            account: "1001".to_string(),
            balance_type: BalanceType::Monetary,
            balance: BalanceFilter::default(),
        };
        let err = f.accounts.remove_balances(args.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::AccountNotFound(_)));
        assert!(f.dm.find_account("cgrates.org:1001").await.unwrap().is_none());

        f.accounts.add_balance(monetary(dec!(10))).await.unwrap();
        let account = f.accounts.remove_balances(args).await.unwrap();
        assert!(account.balances(BalanceType::Monetary).is_empty());
    }

    #[tokio::test]
    async fn test_set_balances_patch() {
        let f = fixture();
        f.accounts
            .set_balances(SetBalancesArgs {
                tenant: None,
                account: "1001".to_string(),
                balances: vec![
                    BalanceSpec {
                        balance_type: BalanceType::Monetary,
                        balance: BalanceFilter::with_id("main").with_value(dec!(7)),
                    },
                    BalanceSpec {
                        balance_type: BalanceType::Monetary,
                        balance: BalanceFilter::with_id("main").with_weight(30.0),
                    },
                ],
            })
            .await
            .unwrap();

        let account = f
            .accounts
            .get_account(AccountArgs::new("cgrates.org", "1001"))
            .await
            .unwrap();
        let main = account.find_balance(BalanceType::Monetary, "main").unwrap();
        assert_eq!(main.value, dec!(7));
        assert_eq!(main.weight, 30.0);
    }

    #[tokio::test]
    async fn test_remove_account() {
        let f = fixture();
        let args = AccountArgs::new("cgrates.org", "1001");
        assert!(f.accounts.remove_account(args.clone()).await.unwrap_err().is_not_found());

        f.accounts.add_balance(monetary(dec!(1))).await.unwrap();
        f.accounts.remove_account(args.clone()).await.unwrap();
        assert!(f.accounts.get_account(args).await.unwrap_err().is_not_found());
    }
}

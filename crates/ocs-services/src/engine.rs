//! Engine wiring
//!
//! Builds every service over shared collaborators. All services see the
//! same Guardian, so account locks taken by API calls exclude the scheduler
//! and vice versa.

use ocs_core::{
    traits::{CacheInvalidator, CacheService, CostEngine, EventSink, KvStore, TaskQueue},
    AppConfig,
};
use ocs_db::DataManager;
use std::sync::Arc;
use tracing::info;

use crate::account_service::AccountService;
use crate::action_plan_service::ActionPlanService;
use crate::executor::ActionExecutor;
use crate::guardian::Guardian;
use crate::rals::RatingPlansCostResolver;
use crate::rating::RatingEngine;
use crate::scheduler::{ReloadSignal, Scheduler};

/// The charging engine's service graph
pub struct Engine<C: CacheService + 'static> {
    pub dm: DataManager,
    pub guardian: Arc<Guardian>,
    pub executor: Arc<ActionExecutor>,
    pub accounts: Arc<AccountService>,
    pub action_plans: Arc<ActionPlanService>,
    pub scheduler: Arc<Scheduler>,
    pub rating: Arc<RatingEngine<C>>,
    pub rals: Arc<RatingPlansCostResolver<C>>,
}

impl<C: CacheService + 'static> Engine<C> {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn KvStore>,
        tasks: Arc<dyn TaskQueue>,
        cache: Arc<C>,
        invalidator: Arc<dyn CacheInvalidator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let dm = DataManager::new(store);
        let guardian = Arc::new(Guardian::new());
        let reload = ReloadSignal::new();

        let executor = Arc::new(ActionExecutor::new(
            dm.clone(),
            guardian.clone(),
            sink,
            config.general.clone(),
        ));
        let action_plans = Arc::new(ActionPlanService::new(
            dm.clone(),
            guardian.clone(),
            tasks.clone(),
            invalidator.clone(),
            reload.clone(),
            config.general.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            dm.clone(),
            executor.clone(),
            action_plans.clone(),
            invalidator,
            reload.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            dm.clone(),
            executor.clone(),
            tasks,
            reload,
            config.scheduler.clone(),
        ));

        let rating = Arc::new(RatingEngine::new(
            dm.clone(),
            cache.clone(),
            config.general.rounding_decimals,
        ));
        let cost_engine: Arc<dyn CostEngine> = rating.clone();
        let rals = Arc::new(RatingPlansCostResolver::new(cost_engine, cache, config));

        info!(
            "Engine ready (tenant {}, locking timeout {}ms)",
            config.general.default_tenant, config.general.locking_timeout_ms
        );

        Self {
            dm,
            guardian,
            executor,
            accounts,
            action_plans,
            scheduler,
            rating,
            rals,
        }
    }
}

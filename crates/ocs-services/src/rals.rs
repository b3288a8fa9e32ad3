//! Rating plan cost resolver
//!
//! Prices a call against an ordered list of candidate rating plans and
//! returns the cost from the first plan able to price it. This is a fallback
//! search, not a price comparison: a cheaper plan later in the list is never
//! consulted once an earlier one succeeds.

use chrono::{Duration, Utc};
use ocs_cache::keys::transient_rating_profile_key;
use ocs_core::{
    config::AppConfig,
    keys::ANY_SUBJECT,
    models::{CallDescriptor, EventCost, RatingPlanActivation, RatingProfile},
    traits::{CacheService, CostEngine},
    AppError, AppResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::dto::RatingPlanCostArgs;

/// Cost of a call and the rating plan that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingPlanCost {
    pub rating_plan_id: String,
    pub event_cost: EventCost,
}

/// Linear fallback search over candidate rating plans
pub struct RatingPlansCostResolver<C: CacheService> {
    engine: Arc<dyn CostEngine>,
    cache: Arc<C>,
    default_tenant: String,
    default_category: String,
    slot_ttl_secs: u64,
}

impl<C: CacheService> RatingPlansCostResolver<C> {
    pub fn new(engine: Arc<dyn CostEngine>, cache: Arc<C>, config: &AppConfig) -> Self {
        Self {
            engine,
            cache,
            default_tenant: config.general.default_tenant.clone(),
            default_category: config.general.default_category.clone(),
            slot_ttl_secs: config.cache.transient_ttl_secs,
        }
    }

    /// Price the call with the first candidate plan that can
    ///
    /// Each candidate is staged as a one-activation rating profile in a cache
    /// slot private to this request, so concurrent requests never see each
    /// other's candidates. `UnauthorizedDestination` and not-found move on to
    /// the next candidate; any other error stops the search.
    #[instrument(skip(self, args), fields(destination = %args.destination))]
    pub async fn get_rating_plans_cost(&self, args: RatingPlanCostArgs) -> AppResult<RatingPlanCost> {
        args.validate()?;

        let tenant = non_empty(args.tenant).unwrap_or_else(|| self.default_tenant.clone());
        let category = non_empty(args.category).unwrap_or_else(|| self.default_category.clone());
        let subject = non_empty(args.subject).unwrap_or_else(|| ANY_SUBJECT.to_string());
        let setup_time = args.setup_time.unwrap_or_else(Utc::now);
        let out_of_range =
            || AppError::InvalidInput(format!("usage of {}s is out of range", args.usage_secs));
        let time_end = i64::try_from(args.usage_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|usage| setup_time.checked_add_signed(usage))
            .ok_or_else(out_of_range)?;

        let slot = transient_rating_profile_key(&Uuid::new_v4().to_string());
        let cd = CallDescriptor {
            tenant: tenant.clone(),
            category: category.clone(),
            subject: subject.clone(),
            account: String::new(),
            destination: args.destination.clone(),
            time_start: setup_time,
            time_end,
            profile_slot: Some(slot.clone()),
        };

        for rating_plan_id in &args.rating_plan_ids {
            let profile = RatingProfile {
                tenant: tenant.clone(),
                category: category.clone(),
                subject: subject.clone(),
                activations: vec![RatingPlanActivation {
                    activation_time: setup_time,
                    rating_plan_id: rating_plan_id.clone(),
                }],
            };
            self.cache.set(&slot, &profile, self.slot_ttl_secs).await?;

            let result = self.engine.get_cost(&cd).await;

            if let Err(e) = self.cache.delete(&slot).await {
                warn!("Failed to clear rating profile slot {}: {}", slot, e);
            }

            match result {
                Ok(event_cost) => {
                    info!(
                        "Rating plan {} priced {} at {}",
                        rating_plan_id, args.destination, event_cost.cost
                    );
                    return Ok(RatingPlanCost {
                        rating_plan_id: rating_plan_id.clone(),
                        event_cost,
                    });
                }
                Err(e) if is_skippable(&e) => {
                    debug!("Rating plan {} skipped: {}", rating_plan_id, e);
                }
                Err(e) => {
                    warn!("Rating plan {} failed: {}", rating_plan_id, e);
                    return Err(e);
                }
            }
        }

        Err(AppError::NotFound(format!(
            "no rating plan among {:?} prices {}",
            args.rating_plan_ids, args.destination
        )))
    }
}

fn is_skippable(err: &AppError) -> bool {
    matches!(err, AppError::UnauthorizedDestination(_)) || err.is_not_found()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocs_cache::LocalCache;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    /// Engine that answers from a script keyed by the staged plan ID
    struct ScriptedEngine {
        cache: Arc<LocalCache>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CostEngine for ScriptedEngine {
        async fn get_cost(&self, cd: &CallDescriptor) -> AppResult<EventCost> {
            let slot = cd.profile_slot.as_deref().unwrap_or_default();
            let profile: RatingProfile = self
                .cache
                .get(slot)
                .await?
                .ok_or_else(|| AppError::Internal("slot not staged".to_string()))?;
            let plan_id = profile.activations[0].rating_plan_id.clone();
            self.seen.lock().push(plan_id.clone());

            match plan_id.as_str() {
                "UNAUTH" => Err(AppError::UnauthorizedDestination(cd.destination.clone())),
                "MISSING" => Err(AppError::NotFound(plan_id)),
                "BROKEN" => Err(AppError::Storage("disk on fire".to_string())),
                _ => Ok(EventCost {
                    tenant: cd.tenant.clone(),
                    subject: cd.subject.clone(),
                    destination: cd.destination.clone(),
                    rating_plan_id: plan_id,
                    destination_id: "ANY".to_string(),
                    matched_prefix: String::new(),
                    setup_time: cd.time_start,
                    usage_secs: cd.usage().num_seconds(),
                    connect_fee: Decimal::ZERO,
                    cost: Decimal::ONE,
                    charges: vec![],
                }),
            }
        }
    }

    fn resolver() -> (RatingPlansCostResolver<LocalCache>, Arc<ScriptedEngine>, Arc<LocalCache>) {
        let cache = Arc::new(LocalCache::new());
        let engine = Arc::new(ScriptedEngine {
            cache: cache.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let resolver =
            RatingPlansCostResolver::new(engine.clone(), cache.clone(), &AppConfig::default());
        (resolver, engine, cache)
    }

    fn args(plans: &[&str]) -> RatingPlanCostArgs {
        RatingPlanCostArgs {
            destination: "1002".to_string(),
            rating_plan_ids: plans.iter().map(|p| p.to_string()).collect(),
            usage_secs: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_plan_that_prices_wins() {
        let (resolver, engine, cache) = resolver();
        let cost = resolver
            .get_rating_plans_cost(args(&["UNAUTH", "MISSING", "B", "C"]))
            .await
            .unwrap();
        assert_eq!(cost.rating_plan_id, "B");
        assert_eq!(*engine.seen.lock(), vec!["UNAUTH", "MISSING", "B"]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_abort() {
        let (resolver, engine, cache) = resolver();
        let err = resolver
            .get_rating_plans_cost(args(&["BROKEN", "B"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(engine.seen.lock().len(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_prices_is_not_found() {
        let (resolver, _, _) = resolver();
        let err = resolver
            .get_rating_plans_cost(args(&["UNAUTH", "MISSING"]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let (resolver, _, _) = resolver();
        let cost = resolver.get_rating_plans_cost(args(&["A"])).await.unwrap();
        assert_eq!(cost.event_cost.tenant, "cgrates.org");
        assert_eq!(cost.event_cost.subject, ANY_SUBJECT);
        assert_eq!(cost.event_cost.usage_secs, 60);
    }

    #[tokio::test]
    async fn test_usage_out_of_range_rejected() {
        let (resolver, engine, cache) = resolver();
        for usage_secs in [u64::MAX, u64::MAX / 2, i64::MAX as u64 / 1000] {
            let err = resolver
                .get_rating_plans_cost(RatingPlanCostArgs {
                    usage_secs,
                    ..args(&["A"])
                })
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{}", usage_secs);
        }
        assert!(engine.seen.lock().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_empty_candidate_list_rejected() {
        let (resolver, _, _) = resolver();
        let err = resolver.get_rating_plans_cost(args(&[])).await.unwrap_err();
        assert!(err.is_validation());
    }
}

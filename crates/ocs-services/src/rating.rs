//! Rating service implementation
//!
//! Prices calls against rating plans: the rating profile for the call picks
//! the active plan, the destination with the longest matching prefix picks
//! the rates, and the usage is billed in whole increments. Destinations are
//! cached to keep prefix lookups off the store.

use async_trait::async_trait;
use ocs_cache::keys::{destination_key, DESTINATION_TTL_SECS};
use ocs_core::{
    keys::ANY_SUBJECT,
    models::{CallDescriptor, Destination, DestinationRate, EventCost, RatingProfile},
    traits::{CacheService, CostEngine},
    AppError, AppResult,
};
use ocs_db::DataManager;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Cost engine over stored rating data
///
/// A call descriptor carrying a `profile_slot` is rated with the profile
/// staged in that cache slot instead of the stored one.
pub struct RatingEngine<C: CacheService> {
    dm: DataManager,
    cache: Arc<C>,
    rounding_decimals: u32,
}

impl<C: CacheService> RatingEngine<C> {
    /// Create a new rating engine
    pub fn new(dm: DataManager, cache: Arc<C>, rounding_decimals: u32) -> Self {
        Self {
            dm,
            cache,
            rounding_decimals,
        }
    }

    /// Rating profile for the call, falling back to the `*any` subject
    async fn rating_profile(&self, cd: &CallDescriptor) -> AppResult<RatingProfile> {
        if let Some(slot) = &cd.profile_slot {
            return self
                .cache
                .get::<RatingProfile>(slot)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("rating profile slot {}", slot)));
        }

        if let Some(profile) = self
            .dm
            .find_rating_profile(&cd.tenant, &cd.category, &cd.subject)
            .await?
        {
            return Ok(profile);
        }
        debug!(
            "No rating profile for subject {}, trying {}",
            cd.subject, ANY_SUBJECT
        );
        self.dm
            .find_rating_profile(&cd.tenant, &cd.category, ANY_SUBJECT)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "rating profile {}:{}:{}",
                    cd.tenant, cd.category, cd.subject
                ))
            })
    }

    /// Try to get a destination from cache, then from the store
    async fn destination(&self, destination_id: &str) -> AppResult<Option<Destination>> {
        let key = destination_key(destination_id);
        match self.cache.get::<Destination>(&key).await {
            Ok(Some(destination)) => return Ok(Some(destination)),
            Ok(None) => {}
            Err(e) => {
                // Don't fail on cache errors, just continue without cache
                warn!("Cache error for destination {}: {}", destination_id, e);
            }
        }

        let destination = match self.dm.get_destination(destination_id).await {
            Ok(destination) => destination,
            Err(e) if e.is_not_found() => {
                warn!("Rating plan references unknown destination {}", destination_id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .cache
            .set(&key, &destination, DESTINATION_TTL_SECS)
            .await
        {
            warn!("Failed to cache destination {}: {}", destination_id, e);
        }
        Ok(Some(destination))
    }

    /// Destination rate whose destination has the longest prefix matching `number`
    async fn match_destination<'a>(
        &self,
        rates: &'a [DestinationRate],
        number: &str,
    ) -> AppResult<Option<(&'a DestinationRate, String)>> {
        let mut best: Option<(&DestinationRate, usize)> = None;
        for rate in rates {
            let Some(destination) = self.destination(&rate.destination_id).await? else {
                continue;
            };
            if let Some(len) = destination.longest_match(number) {
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((rate, len));
                }
            }
        }
        Ok(best.map(|(rate, len)| (rate, number[..len].to_string())))
    }
}

#[async_trait]
impl<C: CacheService> CostEngine for RatingEngine<C> {
    #[instrument(skip(self, cd), fields(destination = %cd.destination, subject = %cd.subject))]
    async fn get_cost(&self, cd: &CallDescriptor) -> AppResult<EventCost> {
        let profile = self.rating_profile(cd).await?;
        let activation = profile.active_plan(cd.time_start).ok_or_else(|| {
            AppError::NotFound(format!(
                "no rating plan active at {} for {}",
                cd.time_start,
                profile.key()
            ))
        })?;
        let plan = self.dm.get_rating_plan(&activation.rating_plan_id).await?;

        let (rate, prefix) = self
            .match_destination(&plan.destination_rates, &cd.destination)
            .await?
            .ok_or_else(|| {
                debug!(
                    "Rating plan {} has no rate for {}",
                    plan.id, cd.destination
                );
                AppError::UnauthorizedDestination(cd.destination.clone())
            })?;

        let usage_secs = cd.usage().num_seconds();
        if usage_secs < 0 {
            error!("Call ends before it starts: {} > {}", cd.time_start, cd.time_end);
            return Err(AppError::InvalidInput("negative usage".to_string()));
        }
        let (cost, charges) = rate.compute_cost(usage_secs, self.rounding_decimals);

        debug!(
            "Calculated cost: {} for {}s on {} via {}",
            cost, usage_secs, cd.destination, plan.id
        );

        Ok(EventCost {
            tenant: cd.tenant.clone(),
            subject: cd.subject.clone(),
            destination: cd.destination.clone(),
            rating_plan_id: plan.id.clone(),
            destination_id: rate.destination_id.clone(),
            matched_prefix: prefix,
            setup_time: cd.time_start,
            usage_secs,
            connect_fee: rate.connect_fee,
            cost,
            charges,
        })
    }
}

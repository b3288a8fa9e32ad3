//! Destinations, rating plans and rating profiles

use ocs_core::{
    keys,
    models::{Destination, RatingPlan, RatingProfile},
    AppResult,
};
use tracing::{debug, instrument};

use super::DataManager;

impl DataManager {
    #[instrument(skip(self))]
    pub async fn get_destination(&self, destination_id: &str) -> AppResult<Destination> {
        self.get_required(&keys::destination_key(destination_id))
            .await
    }

    pub async fn set_destination(&self, destination: &Destination) -> AppResult<()> {
        self.set_json(&keys::destination_key(&destination.id), destination)
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_rating_plan(&self, plan_id: &str) -> AppResult<RatingPlan> {
        self.get_required(&keys::rating_plan_key(plan_id)).await
    }

    pub async fn set_rating_plan(&self, plan: &RatingPlan) -> AppResult<()> {
        self.set_json(&keys::rating_plan_key(&plan.id), plan).await
    }

    /// Rating profile for the exact triple, `None` when absent
    #[instrument(skip(self))]
    pub async fn find_rating_profile(
        &self,
        tenant: &str,
        category: &str,
        subject: &str,
    ) -> AppResult<Option<RatingProfile>> {
        let key = keys::rating_profile_key(tenant, category, subject);
        debug!("Looking up rating profile {}", key);
        self.get_json(&key).await
    }

    pub async fn set_rating_profile(&self, profile: &RatingProfile) -> AppResult<()> {
        self.set_json(&profile.key(), profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::Utc;
    use ocs_core::models::RatingPlanActivation;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rating_entities() {
        let dm = DataManager::new(Arc::new(MemoryStore::new()));

        let destination = Destination {
            id: "PE_MOBILE".to_string(),
            prefixes: vec!["519".to_string()],
        };
        dm.set_destination(&destination).await.unwrap();
        assert_eq!(dm.get_destination("PE_MOBILE").await.unwrap(), destination);

        let profile = RatingProfile {
            tenant: "cgrates.org".to_string(),
            category: "call".to_string(),
            subject: "*any".to_string(),
            activations: vec![RatingPlanActivation {
                activation_time: Utc::now(),
                rating_plan_id: "RP_1".to_string(),
            }],
        };
        dm.set_rating_profile(&profile).await.unwrap();
        assert_eq!(
            dm.find_rating_profile("cgrates.org", "call", "*any")
                .await
                .unwrap(),
            Some(profile)
        );
        assert!(dm.get_rating_plan("RP_1").await.unwrap_err().is_not_found());
    }
}

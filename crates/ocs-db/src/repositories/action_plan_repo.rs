//! Action plan storage and the account → plans reverse index

use ocs_core::{keys, models::ActionPlan, AppResult};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use super::DataManager;

impl DataManager {
    #[instrument(skip(self))]
    pub async fn get_action_plan(&self, plan_id: &str) -> AppResult<ActionPlan> {
        self.get_required(&keys::action_plan_key(plan_id)).await
    }

    pub async fn find_action_plan(&self, plan_id: &str) -> AppResult<Option<ActionPlan>> {
        self.get_json(&keys::action_plan_key(plan_id)).await
    }

    /// Persist a plan; a plan without timings is deleted instead
    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn set_action_plan(&self, plan: &ActionPlan) -> AppResult<()> {
        if plan.is_empty() {
            debug!("Action plan {} has no timings, removing", plan.id);
            self.remove_key(&keys::action_plan_key(&plan.id)).await?;
            return Ok(());
        }
        self.set_json(&keys::action_plan_key(&plan.id), plan).await
    }

    #[instrument(skip(self))]
    pub async fn remove_action_plan(&self, plan_id: &str) -> AppResult<bool> {
        self.remove_key(&keys::action_plan_key(plan_id)).await
    }

    pub async fn action_plan_ids(&self) -> AppResult<Vec<String>> {
        self.ids_for_prefix(keys::ACTION_PLAN_PREFIX).await
    }

    /// Every stored plan, ordered by ID
    pub async fn get_all_action_plans(&self) -> AppResult<Vec<ActionPlan>> {
        let mut plans = Vec::new();
        for id in self.action_plan_ids().await? {
            if let Some(plan) = self.find_action_plan(&id).await? {
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    /// Plan IDs the account is subscribed to, empty when there is no entry
    pub async fn get_account_action_plans(&self, account_id: &str) -> AppResult<BTreeSet<String>> {
        Ok(self
            .get_json(&keys::account_action_plans_key(account_id))
            .await?
            .unwrap_or_default())
    }

    /// Replace the account's reverse-index entry; an empty set removes it
    #[instrument(skip(self, plan_ids))]
    pub async fn set_account_action_plans(
        &self,
        account_id: &str,
        plan_ids: &BTreeSet<String>,
    ) -> AppResult<()> {
        let key = keys::account_action_plans_key(account_id);
        if plan_ids.is_empty() {
            self.remove_key(&key).await?;
            return Ok(());
        }
        self.set_json(&key, plan_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use ocs_core::models::{ActionTiming, RITiming};
    use ocs_core::traits::KvStore;
    use std::sync::Arc;

    fn plan(id: &str) -> ActionPlan {
        let mut plan = ActionPlan::new(id);
        plan.action_timings
            .push(ActionTiming::new("DEBIT_3", RITiming::asap(), 10.0));
        plan
    }

    #[tokio::test]
    async fn test_plan_roundtrip_and_listing() {
        let dm = DataManager::new(Arc::new(MemoryStore::new()));
        dm.set_action_plan(&plan("B")).await.unwrap();
        dm.set_action_plan(&plan("A")).await.unwrap();

        assert_eq!(dm.action_plan_ids().await.unwrap(), vec!["A", "B"]);
        let all = dm.get_all_action_plans().await.unwrap();
        assert_eq!(all[0].id, "A");
        assert_eq!(dm.get_action_plan("A").await.unwrap(), all[0]);
    }

    #[tokio::test]
    async fn test_empty_plan_is_deleted() {
        let dm = DataManager::new(Arc::new(MemoryStore::new()));
        let mut p = plan("P");
        dm.set_action_plan(&p).await.unwrap();
        p.action_timings.clear();
        dm.set_action_plan(&p).await.unwrap();
        assert!(dm.get_action_plan("P").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reverse_index() {
        let dm = DataManager::new(Arc::new(MemoryStore::new()));
        let acc = "cgrates.org:1001";
        assert!(dm.get_account_action_plans(acc).await.unwrap().is_empty());

        let ids: BTreeSet<String> = ["P".to_string()].into();
        dm.set_account_action_plans(acc, &ids).await.unwrap();
        assert_eq!(dm.get_account_action_plans(acc).await.unwrap(), ids);

        dm.set_account_action_plans(acc, &BTreeSet::new())
            .await
            .unwrap();
        assert!(dm.store().get("aap_cgrates.org:1001").await.unwrap().is_none());
    }
}

//! Compiled action lists

use ocs_core::{keys, models::Action, AppResult};
use tracing::instrument;

use super::DataManager;

impl DataManager {
    /// Fetch the action list stored under `actions_id`
    #[instrument(skip(self))]
    pub async fn get_actions(&self, actions_id: &str) -> AppResult<Vec<Action>> {
        self.get_required(&keys::actions_key(actions_id)).await
    }

    #[instrument(skip(self, actions))]
    pub async fn set_actions(&self, actions_id: &str, actions: &[Action]) -> AppResult<()> {
        self.set_json(&keys::actions_key(actions_id), &actions).await
    }

    #[instrument(skip(self))]
    pub async fn remove_actions(&self, actions_id: &str) -> AppResult<bool> {
        self.remove_key(&keys::actions_key(actions_id)).await
    }

    pub async fn actions_ids(&self) -> AppResult<Vec<String>> {
        self.ids_for_prefix(keys::ACTIONS_PREFIX).await
    }
}

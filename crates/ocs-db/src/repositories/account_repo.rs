//! Account storage

use chrono::Utc;
use ocs_core::{keys, models::Account, AppError, AppResult};
use tracing::{debug, instrument};

use super::DataManager;

impl DataManager {
    /// Fetch an account, failing with `AccountNotFound` when absent
    #[instrument(skip(self))]
    pub async fn get_account(&self, account_id: &str) -> AppResult<Account> {
        debug!("Loading account {}", account_id);
        self.get_json(&keys::account_key(account_id))
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }

    /// Fetch an account, `None` when absent
    pub async fn find_account(&self, account_id: &str) -> AppResult<Option<Account>> {
        self.get_json(&keys::account_key(account_id)).await
    }

    /// Persist an account, stamping `updated_at`
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn set_account(&self, account: &mut Account) -> AppResult<()> {
        account.updated_at = Some(Utc::now());
        self.set_json(&keys::account_key(&account.id), &*account).await
    }

    /// Delete an account, returns whether it existed
    #[instrument(skip(self))]
    pub async fn remove_account(&self, account_id: &str) -> AppResult<bool> {
        self.remove_key(&keys::account_key(account_id)).await
    }

    /// Tenant-qualified IDs of all stored accounts
    pub async fn account_ids(&self) -> AppResult<Vec<String>> {
        self.ids_for_prefix(keys::ACCOUNT_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use ocs_core::models::{Balance, BalanceType};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn dm() -> DataManager {
        DataManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_account_roundtrip() {
        let dm = dm();
        let mut account = Account::new("cgrates.org:1001");
        account
            .balance_map
            .insert(BalanceType::Monetary, vec![Balance::new("main", dec!(10))]);

        dm.set_account(&mut account).await.unwrap();
        assert!(account.updated_at.is_some());

        let loaded = dm.get_account("cgrates.org:1001").await.unwrap();
        assert_eq!(loaded, account);
        assert_eq!(dm.account_ids().await.unwrap(), vec!["cgrates.org:1001"]);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let dm = dm();
        let err = dm.get_account("cgrates.org:404").await.unwrap_err();
        assert_eq!(err, AppError::AccountNotFound("cgrates.org:404".to_string()));
        assert!(dm.find_account("cgrates.org:404").await.unwrap().is_none());
        assert!(!dm.remove_account("cgrates.org:404").await.unwrap());
    }
}

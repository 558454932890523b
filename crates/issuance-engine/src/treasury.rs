//! Treasury collection provisioning

use crate::error::{EngineError, EngineResult};
use crate::ledger::{CollectionSpec, LedgerClient};
use crate::storage::Store;
use issuance_types::{CollectionBinding, TreasuryAccount};
use std::sync::Arc;

/// Royalty applied to new collections unless overridden, in basis points
pub const DEFAULT_ROYALTY_BPS: u16 = 0;

/// Creates token collections on the ledger and binds them to treasury
/// accounts by project category.
pub struct TreasuryProvisioner {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
}

impl TreasuryProvisioner {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    /// Register an account, or update its threshold and collections
    pub async fn register(&self, account: TreasuryAccount) -> EngineResult<()> {
        tracing::info!(
            account_id = %account.account_id,
            collections = account.collections.len(),
            "Registering treasury account"
        );
        Ok(self.store.upsert_treasury(account).await?)
    }

    /// Ensure `account_id` has a collection for `category`, creating one on
    /// the ledger if needed. Returns the binding.
    pub async fn ensure_collection(
        &self,
        account_id: &str,
        category: &str,
        name: &str,
        symbol: &str,
        royalty_bps: u16,
    ) -> EngineResult<CollectionBinding> {
        let account = self
            .store
            .get_treasury(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("treasury account {}", account_id)))?;

        if let Some(existing) = account.collection_for(category) {
            return Ok(existing.clone());
        }

        let spec = CollectionSpec {
            name: name.to_string(),
            symbol: symbol.to_string(),
            treasury_account: account.account_id.clone(),
            royalty_bps,
        };
        let token_id = self
            .ledger
            .create_collection(&spec, &account.signing_key)
            .await?;

        let binding = CollectionBinding {
            token_id,
            symbol: symbol.to_string(),
            minted_count: 0,
        };
        self.store
            .bind_collection(account_id, category, binding.clone())
            .await?;
        tracing::info!(
            account_id,
            category,
            token_id = %binding.token_id,
            "Created token collection"
        );
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;
    use crate::storage::{InMemoryStore, TreasuryStore};
    use issuance_types::SigningKey;

    #[tokio::test]
    async fn creates_collection_once() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(SimulatedLedger::new(0));
        let provisioner = TreasuryProvisioner::new(store.clone(), ledger.clone());

        provisioner
            .register(TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 0))
            .await
            .unwrap();

        let first = provisioner
            .ensure_collection("0.0.1001", "soil", "Soil Carbon", "SOIL", 100)
            .await
            .unwrap();
        let second = provisioner
            .ensure_collection("0.0.1001", "soil", "Soil Carbon", "SOIL", 100)
            .await
            .unwrap();
        assert_eq!(first.token_id, second.token_id);

        let account = store.find_treasury_for_category("soil").await.unwrap().unwrap();
        assert_eq!(account.account_id, "0.0.1001");
    }

    #[tokio::test]
    async fn reregistering_keeps_collection_and_count() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(SimulatedLedger::new(0));
        let provisioner = TreasuryProvisioner::new(store.clone(), ledger.clone());

        provisioner
            .register(TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 0))
            .await
            .unwrap();
        let first = provisioner
            .ensure_collection("0.0.1001", "soil", "Soil Carbon", "SOIL", 0)
            .await
            .unwrap();
        store.increment_mint_count("0.0.1001", "soil").await.unwrap();
        store.increment_mint_count("0.0.1001", "soil").await.unwrap();

        // Startup provisioning runs again with a fresh account
        provisioner
            .register(TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 5))
            .await
            .unwrap();
        let second = provisioner
            .ensure_collection("0.0.1001", "soil", "Soil Carbon", "SOIL", 0)
            .await
            .unwrap();

        assert_eq!(first.token_id, second.token_id);
        let account = store.get_treasury("0.0.1001").await.unwrap().unwrap();
        assert_eq!(account.collection_for("soil").unwrap().minted_count, 2);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let provisioner = TreasuryProvisioner::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedLedger::new(0)),
        );
        let err = provisioner
            .ensure_collection("0.0.9", "soil", "Soil", "SOIL", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}

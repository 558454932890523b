//! Treasury accounts: the ledger accounts that pay for and own new units

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signing credential for a treasury account.
///
/// Never serialized and never printed; `Debug` is redacted.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret to the ledger client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(***)")
    }
}

/// A token collection an account mints into for one project category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionBinding {
    pub token_id: String,
    #[serde(default)]
    pub symbol: String,
    /// Units minted into this collection by the pipeline
    #[serde(default)]
    pub minted_count: u64,
}

/// Most recent balance observed by the balance guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Balance in the ledger's smallest unit
    pub amount: u64,
    pub checked_at: DateTime<Utc>,
}

/// Ledger account the pipeline signs and pays with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryAccount {
    pub account_id: String,
    #[serde(skip_serializing, default)]
    pub signing_key: SigningKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceSnapshot>,
    /// Balance below which the guard raises an alert
    pub alert_threshold: u64,
    /// Collections keyed by project category
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionBinding>,
}

impl TreasuryAccount {
    pub fn new(
        account_id: impl Into<String>,
        signing_key: SigningKey,
        alert_threshold: u64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            signing_key,
            balance: None,
            alert_threshold,
            collections: BTreeMap::new(),
        }
    }

    pub fn with_collection(
        mut self,
        category: impl Into<String>,
        token_id: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        self.collections.insert(
            category.into(),
            CollectionBinding {
                token_id: token_id.into(),
                symbol: symbol.into(),
                minted_count: 0,
            },
        );
        self
    }

    pub fn collection_for(&self, category: &str) -> Option<&CollectionBinding> {
        self.collections.get(category)
    }

    /// True when the last snapshot is under the alert threshold.
    pub fn is_below_threshold(&self) -> bool {
        self.balance
            .map(|snapshot| snapshot.amount < self.alert_threshold)
            .unwrap_or(false)
    }

    pub fn total_minted(&self) -> u64 {
        self.collections.values().map(|c| c.minted_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_is_redacted() {
        let account = TreasuryAccount::new("0.0.1001", SigningKey::new("302e0201..."), 10);
        let debug = format!("{:?}", account);
        assert!(!debug.contains("302e0201"));
        assert!(debug.contains("SigningKey(***)"));

        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("302e0201"));
        assert!(!json.contains("signing_key"));
    }

    #[test]
    fn threshold_check_uses_latest_snapshot() {
        let mut account = TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 500);
        assert!(!account.is_below_threshold());

        account.balance = Some(BalanceSnapshot {
            amount: 499,
            checked_at: Utc::now(),
        });
        assert!(account.is_below_threshold());

        account.balance = Some(BalanceSnapshot {
            amount: 500,
            checked_at: Utc::now(),
        });
        assert!(!account.is_below_threshold());
    }

    #[test]
    fn collections_resolve_by_category() {
        let account = TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 0)
            .with_collection("reforestation", "0.0.5005", "RFC");
        assert_eq!(
            account.collection_for("reforestation").map(|c| c.token_id.as_str()),
            Some("0.0.5005")
        );
        assert!(account.collection_for("soil").is_none());
    }
}

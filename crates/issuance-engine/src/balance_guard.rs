//! Treasury balance guard
//!
//! Snapshots every treasury account's ledger balance and raises an alert when
//! one drops under its threshold. Alerts are advisory: the pipeline is never
//! blocked by them.

use crate::error::{EngineError, EngineResult};
use crate::ledger::LedgerClient;
use crate::notify::NotificationHub;
use crate::scheduler::{JobError, PeriodicJob};
use crate::storage::Store;
use async_trait::async_trait;
use chrono::Utc;
use issuance_types::{BalanceSnapshot, EngineEvent, TreasuryAccount};
use std::sync::Arc;
use std::time::Duration;

/// Default balance check interval
pub const DEFAULT_BALANCE_INTERVAL_SECS: u64 = 3600;

/// Result of checking one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCheck {
    pub account_id: String,
    pub balance: u64,
    pub threshold: u64,
    pub below_threshold: bool,
}

/// Periodically records treasury balances.
pub struct BalanceGuard {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    hub: NotificationHub,
    call_timeout: Duration,
}

impl BalanceGuard {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        hub: NotificationHub,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            hub,
            call_timeout,
        }
    }

    /// Check every account. One account failing does not stop the others.
    pub async fn check_all(&self) -> EngineResult<Vec<BalanceCheck>> {
        let accounts = self.store.list_treasuries().await?;
        let mut checks = Vec::with_capacity(accounts.len());

        for account in accounts {
            match self.check(&account).await {
                Ok(check) => checks.push(check),
                Err(e) => {
                    tracing::warn!(
                        account_id = %account.account_id,
                        error = %e,
                        "Balance check failed"
                    );
                }
            }
        }
        Ok(checks)
    }

    async fn check(&self, account: &TreasuryAccount) -> EngineResult<BalanceCheck> {
        let balance = tokio::time::timeout(
            self.call_timeout,
            self.ledger.account_balance(&account.account_id),
        )
        .await
        .map_err(|_| EngineError::Ledger(crate::error::LedgerError::Timeout))??;

        let snapshot = BalanceSnapshot {
            amount: balance,
            checked_at: Utc::now(),
        };
        self.store
            .record_balance(&account.account_id, snapshot)
            .await?;

        let below_threshold = balance < account.alert_threshold;
        if below_threshold {
            tracing::warn!(
                account_id = %account.account_id,
                balance,
                threshold = account.alert_threshold,
                "Treasury balance below alert threshold"
            );
            self.hub.dispatch(EngineEvent::BalanceLow {
                account_id: account.account_id.clone(),
                balance,
                threshold: account.alert_threshold,
                at: snapshot.checked_at,
            });
        } else {
            tracing::debug!(account_id = %account.account_id, balance, "Treasury balance ok");
        }

        Ok(BalanceCheck {
            account_id: account.account_id.clone(),
            balance,
            threshold: account.alert_threshold,
            below_threshold,
        })
    }
}

#[async_trait]
impl PeriodicJob for BalanceGuard {
    fn name(&self) -> &'static str {
        "balance-guard"
    }

    async fn tick(&self) -> Result<(), JobError> {
        self.check_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;
    use crate::storage::{InMemoryStore, TreasuryStore};
    use issuance_types::SigningKey;

    #[tokio::test]
    async fn records_snapshots_and_alerts_below_threshold() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_treasury(TreasuryAccount::new("0.0.1", SigningKey::new("k"), 100))
            .await
            .unwrap();
        store
            .upsert_treasury(TreasuryAccount::new("0.0.2", SigningKey::new("k"), 100))
            .await
            .unwrap();

        let ledger = Arc::new(SimulatedLedger::new(0));
        ledger.set_balance("0.0.1", 99).await;
        ledger.set_balance("0.0.2", 100).await;

        let hub = NotificationHub::new(8);
        let mut events = hub.subscribe();
        let guard = BalanceGuard::new(store.clone(), ledger, hub, Duration::from_secs(1));

        let checks = guard.check_all().await.unwrap();
        assert_eq!(checks.len(), 2);
        assert!(checks[0].below_threshold);
        assert!(!checks[1].below_threshold);

        let stored = store.get_treasury("0.0.1").await.unwrap().unwrap();
        assert_eq!(stored.balance.map(|b| b.amount), Some(99));
        assert!(stored.is_below_threshold());

        match events.try_recv().unwrap() {
            EngineEvent::BalanceLow { account_id, .. } => assert_eq!(account_id, "0.0.1"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }
}

//! In-memory storage implementation

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use issuance_types::{
    BalanceSnapshot, CollectionBinding, ErrorEntry, IssuanceProgress, IssuedCredit, ProjectRef,
    StateEntry, TreasuryAccount, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: Arc<RwLock<HashMap<WorkflowId, WorkflowRecord>>>,
    credits: Arc<RwLock<HashMap<ProjectRef, IssuedCredit>>>,
    treasuries: Arc<RwLock<BTreeMap<String, TreasuryAccount>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(id: &WorkflowId) -> StorageError {
        StorageError::NotFound(format!("workflow {}", id))
    }

    fn missing_account(account_id: &str) -> StorageError {
        StorageError::NotFound(format!("treasury account {}", account_id))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_workflow(&self, record: WorkflowRecord) -> StorageResult<WorkflowRecord> {
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&record.id) {
            return Err(StorageError::Duplicate(format!("workflow {}", record.id)));
        }
        if let Some(active) = workflows
            .values()
            .find(|w| w.project_ref == record.project_ref && !w.is_terminal())
        {
            return Err(StorageError::Conflict(format!(
                "project {} already has active workflow {}",
                record.project_ref, active.id
            )));
        }
        workflows.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowRecord>> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(id).cloned())
    }

    async fn find_workflow_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<WorkflowRecord>> {
        let workflows = self.workflows.read().await;
        let mut matching: Vec<&WorkflowRecord> = workflows
            .values()
            .filter(|w| &w.project_ref == project_ref)
            .collect();
        if let Some(active) = matching.iter().find(|w| !w.is_terminal()) {
            return Ok(Some((*active).clone()));
        }
        matching.sort_by_key(|w| w.created_at);
        Ok(matching.last().map(|w| (*w).clone()))
    }

    async fn find_workflow_by_verifier_id(
        &self,
        verifier_project_id: &str,
    ) -> StorageResult<Option<WorkflowRecord>> {
        let workflows = self.workflows.read().await;
        let mut matching: Vec<&WorkflowRecord> = workflows
            .values()
            .filter(|w| w.verifier_project_id.as_deref() == Some(verifier_project_id))
            .collect();
        matching.sort_by_key(|w| (!w.is_terminal(), w.created_at));
        Ok(matching.last().map(|w| (*w).clone()))
    }

    async fn list_workflows_by_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> StorageResult<Vec<WorkflowRecord>> {
        let workflows = self.workflows.read().await;
        let mut selected: Vec<WorkflowRecord> = workflows
            .values()
            .filter(|w| statuses.contains(&w.current_status))
            .cloned()
            .collect();
        // Never-synced records sort first
        selected.sort_by_key(|w| (w.last_synced_at, w.created_at));
        selected.truncate(limit);
        Ok(selected)
    }

    async fn compare_and_set(
        &self,
        id: &WorkflowId,
        expected: WorkflowStatus,
        entry: StateEntry,
    ) -> StorageResult<CasOutcome> {
        let mut workflows = self.workflows.write().await;
        let record = workflows.get_mut(id).ok_or_else(|| Self::missing(id))?;
        if record.current_status != expected {
            return Ok(CasOutcome::Conflict(record.clone()));
        }
        record.commit(entry);
        Ok(CasOutcome::Applied(record.clone()))
    }

    async fn append_error(
        &self,
        id: &WorkflowId,
        entry: ErrorEntry,
    ) -> StorageResult<WorkflowRecord> {
        let mut workflows = self.workflows.write().await;
        let record = workflows.get_mut(id).ok_or_else(|| Self::missing(id))?;
        record.record_error(entry);
        Ok(record.clone())
    }

    async fn touch_synced(&self, id: &WorkflowId, at: DateTime<Utc>) -> StorageResult<()> {
        let mut workflows = self.workflows.write().await;
        let record = workflows.get_mut(id).ok_or_else(|| Self::missing(id))?;
        record.touch_synced(at);
        Ok(())
    }

    async fn set_verifier_project_id(
        &self,
        id: &WorkflowId,
        verifier_project_id: &str,
    ) -> StorageResult<WorkflowRecord> {
        let mut workflows = self.workflows.write().await;
        let record = workflows.get_mut(id).ok_or_else(|| Self::missing(id))?;
        record.verifier_project_id = Some(verifier_project_id.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn record_progress(
        &self,
        id: &WorkflowId,
        progress: IssuanceProgress,
    ) -> StorageResult<()> {
        let mut workflows = self.workflows.write().await;
        let record = workflows.get_mut(id).ok_or_else(|| Self::missing(id))?;
        record.issuance_progress = progress;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CreditStore for InMemoryStore {
    async fn insert_credit(&self, credit: IssuedCredit) -> StorageResult<()> {
        let mut credits = self.credits.write().await;
        if credits.contains_key(&credit.project_ref) {
            return Err(StorageError::Duplicate(format!(
                "credit already issued for project {}",
                credit.project_ref
            )));
        }
        credits.insert(credit.project_ref.clone(), credit);
        Ok(())
    }

    async fn find_credit_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<IssuedCredit>> {
        let credits = self.credits.read().await;
        Ok(credits.get(project_ref).cloned())
    }

    async fn list_credits(&self) -> StorageResult<Vec<IssuedCredit>> {
        let credits = self.credits.read().await;
        let mut list: Vec<IssuedCredit> = credits.values().cloned().collect();
        list.sort_by_key(|c| c.created_at);
        Ok(list)
    }
}

#[async_trait]
impl TreasuryStore for InMemoryStore {
    async fn upsert_treasury(&self, mut account: TreasuryAccount) -> StorageResult<()> {
        let mut treasuries = self.treasuries.write().await;
        if let Some(existing) = treasuries.get(&account.account_id) {
            carry_over(existing, &mut account);
        }
        treasuries.insert(account.account_id.clone(), account);
        Ok(())
    }

    async fn get_treasury(&self, account_id: &str) -> StorageResult<Option<TreasuryAccount>> {
        let treasuries = self.treasuries.read().await;
        Ok(treasuries.get(account_id).cloned())
    }

    async fn list_treasuries(&self) -> StorageResult<Vec<TreasuryAccount>> {
        let treasuries = self.treasuries.read().await;
        Ok(treasuries.values().cloned().collect())
    }

    async fn find_treasury_for_category(
        &self,
        category: &str,
    ) -> StorageResult<Option<TreasuryAccount>> {
        let treasuries = self.treasuries.read().await;
        Ok(treasuries
            .values()
            .find(|a| a.collections.contains_key(category))
            .cloned())
    }

    async fn record_balance(
        &self,
        account_id: &str,
        snapshot: BalanceSnapshot,
    ) -> StorageResult<()> {
        let mut treasuries = self.treasuries.write().await;
        let account = treasuries
            .get_mut(account_id)
            .ok_or_else(|| Self::missing_account(account_id))?;
        account.balance = Some(snapshot);
        Ok(())
    }

    async fn bind_collection(
        &self,
        account_id: &str,
        category: &str,
        binding: CollectionBinding,
    ) -> StorageResult<()> {
        let mut treasuries = self.treasuries.write().await;
        let account = treasuries
            .get_mut(account_id)
            .ok_or_else(|| Self::missing_account(account_id))?;
        account.collections.insert(category.to_string(), binding);
        Ok(())
    }

    async fn increment_mint_count(&self, account_id: &str, category: &str) -> StorageResult<u64> {
        let mut treasuries = self.treasuries.write().await;
        let account = treasuries
            .get_mut(account_id)
            .ok_or_else(|| Self::missing_account(account_id))?;
        let binding = account.collections.get_mut(category).ok_or_else(|| {
            StorageError::NotFound(format!(
                "collection for category {} on account {}",
                category, account_id
            ))
        })?;
        binding.minted_count += 1;
        Ok(binding.minted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuance_types::{CreditStatus, ProjectProfile, SigningKey};

    fn record(project: &str) -> WorkflowRecord {
        WorkflowRecord::new(
            ProjectRef::new(project),
            "policy-1",
            "tag-1",
            ProjectProfile {
                name: "Peatland Rewetting".into(),
                category: "peatland".into(),
                quantity: 40,
                vintage: "2024".into(),
                location: "Drenthe".into(),
            },
        )
    }

    fn credit(project: &str) -> IssuedCredit {
        IssuedCredit {
            project_ref: ProjectRef::new(project),
            workflow_id: WorkflowId::generate(),
            token_id: "0.0.500".into(),
            serial: 1,
            owner_account: "0.0.1001".into(),
            certificate_ref: "cert".into(),
            metadata_ref: "meta".into(),
            mint_operation_id: "op-1".into(),
            status: CreditStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rejects_second_active_workflow_for_project() {
        let store = InMemoryStore::new();
        store.create_workflow(record("p-1")).await.unwrap();
        let err = store.create_workflow(record("p-1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn allows_new_workflow_after_terminal() {
        let store = InMemoryStore::new();
        let first = store.create_workflow(record("p-1")).await.unwrap();
        store
            .compare_and_set(
                &first.id,
                WorkflowStatus::Submitted,
                StateEntry::new(WorkflowStatus::Rejected),
            )
            .await
            .unwrap();

        let second = store.create_workflow(record("p-1")).await.unwrap();
        let found = store
            .find_workflow_by_project(&ProjectRef::new("p-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn compare_and_set_reports_conflict() {
        let store = InMemoryStore::new();
        let created = store.create_workflow(record("p-1")).await.unwrap();

        let applied = store
            .compare_and_set(
                &created.id,
                WorkflowStatus::Submitted,
                StateEntry::new(WorkflowStatus::Validating),
            )
            .await
            .unwrap();
        assert!(matches!(applied, CasOutcome::Applied(ref r) if r.current_status == WorkflowStatus::Validating));

        let stale = store
            .compare_and_set(
                &created.id,
                WorkflowStatus::Submitted,
                StateEntry::new(WorkflowStatus::PendingReviewer),
            )
            .await
            .unwrap();
        match stale {
            CasOutcome::Conflict(current) => {
                assert_eq!(current.current_status, WorkflowStatus::Validating);
                assert_eq!(current.state_history.len(), 2);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lists_least_recently_synced_first() {
        let store = InMemoryStore::new();
        let a = store.create_workflow(record("p-a")).await.unwrap();
        let b = store.create_workflow(record("p-b")).await.unwrap();
        store.touch_synced(&a.id, Utc::now()).await.unwrap();

        let listed = store
            .list_workflows_by_status(&[WorkflowStatus::Submitted], 10)
            .await
            .unwrap();
        assert_eq!(listed[0].id, b.id);

        let limited = store
            .list_workflows_by_status(&[WorkflowStatus::Submitted], 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn credit_is_unique_per_project() {
        let store = InMemoryStore::new();
        store.insert_credit(credit("p-1")).await.unwrap();
        let err = store.insert_credit(credit("p-1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
        assert_eq!(store.list_credits().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_mint_counters() {
        let store = InMemoryStore::new();
        let account = TreasuryAccount::new("0.0.1001", SigningKey::new("k"), 10)
            .with_collection("peatland", "0.0.500", "PEAT");
        store.upsert_treasury(account.clone()).await.unwrap();
        assert_eq!(store.increment_mint_count("0.0.1001", "peatland").await.unwrap(), 1);
        assert_eq!(store.increment_mint_count("0.0.1001", "peatland").await.unwrap(), 2);

        store.upsert_treasury(account).await.unwrap();
        let stored = store.get_treasury("0.0.1001").await.unwrap().unwrap();
        assert_eq!(stored.collection_for("peatland").unwrap().minted_count, 2);

        let err = store
            .increment_mint_count("0.0.1001", "soil")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}

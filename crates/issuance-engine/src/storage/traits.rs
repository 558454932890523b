//! Storage trait definitions

pub use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use issuance_types::{
    BalanceSnapshot, CollectionBinding, ErrorEntry, IssuanceProgress, IssuedCredit, ProjectRef,
    StateEntry, TreasuryAccount, WorkflowId, WorkflowRecord, WorkflowStatus,
};

/// Combined storage trait
pub trait Store: WorkflowStore + CreditStore + TreasuryStore + Send + Sync {}

impl<T> Store for T where T: WorkflowStore + CreditStore + TreasuryStore + Send + Sync {}

/// Result of a compare-and-set status write.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The stored status matched; the entry was appended. Carries the updated record.
    Applied(WorkflowRecord),
    /// Another writer moved the record first. Carries the record as currently stored.
    Conflict(WorkflowRecord),
}

/// Storage for workflow records
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` while the project still has a
    /// non-terminal record.
    async fn create_workflow(&self, record: WorkflowRecord) -> StorageResult<WorkflowRecord>;

    /// Get a record by ID
    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowRecord>>;

    /// The project's non-terminal record if there is one, otherwise its most
    /// recently created record.
    async fn find_workflow_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<WorkflowRecord>>;

    /// Look up a record by the verifier's project id
    async fn find_workflow_by_verifier_id(
        &self,
        verifier_project_id: &str,
    ) -> StorageResult<Option<WorkflowRecord>>;

    /// Records in any of `statuses`, least recently synced first, at most `limit`.
    async fn list_workflows_by_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> StorageResult<Vec<WorkflowRecord>>;

    /// Append `entry` and move the status only if the stored status still
    /// equals `expected`.
    async fn compare_and_set(
        &self,
        id: &WorkflowId,
        expected: WorkflowStatus,
        entry: StateEntry,
    ) -> StorageResult<CasOutcome>;

    /// Append to the error log and bump the retry counter
    async fn append_error(&self, id: &WorkflowId, entry: ErrorEntry)
        -> StorageResult<WorkflowRecord>;

    /// Record a reconciliation that observed no status change
    async fn touch_synced(&self, id: &WorkflowId, at: DateTime<Utc>) -> StorageResult<()>;

    /// Store the id the verifier assigned on submission
    async fn set_verifier_project_id(
        &self,
        id: &WorkflowId,
        verifier_project_id: &str,
    ) -> StorageResult<WorkflowRecord>;

    /// Persist content references produced by an issuance run
    async fn record_progress(
        &self,
        id: &WorkflowId,
        progress: IssuanceProgress,
    ) -> StorageResult<()>;
}

/// Storage for issued credits
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Insert a credit. Fails with `Duplicate` if the project already has one.
    async fn insert_credit(&self, credit: IssuedCredit) -> StorageResult<()>;

    /// Get the credit issued for a project
    async fn find_credit_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<IssuedCredit>>;

    /// List all credits
    async fn list_credits(&self) -> StorageResult<Vec<IssuedCredit>>;
}

/// Storage for treasury accounts
#[async_trait]
pub trait TreasuryStore: Send + Sync {
    /// Create or replace an account, keeping existing mint counters for
    /// collections whose token id is unchanged.
    async fn upsert_treasury(&self, account: TreasuryAccount) -> StorageResult<()>;

    /// Get an account by ID
    async fn get_treasury(&self, account_id: &str) -> StorageResult<Option<TreasuryAccount>>;

    /// List all accounts
    async fn list_treasuries(&self) -> StorageResult<Vec<TreasuryAccount>>;

    /// First account (by account id) with a collection bound for `category`
    async fn find_treasury_for_category(
        &self,
        category: &str,
    ) -> StorageResult<Option<TreasuryAccount>>;

    /// Store a balance snapshot
    async fn record_balance(&self, account_id: &str, snapshot: BalanceSnapshot)
        -> StorageResult<()>;

    /// Bind (or rebind) a collection to a category
    async fn bind_collection(
        &self,
        account_id: &str,
        category: &str,
        binding: CollectionBinding,
    ) -> StorageResult<()>;

    /// Increment a collection's mint counter, returning the new count
    async fn increment_mint_count(&self, account_id: &str, category: &str) -> StorageResult<u64>;
}

/// Carry collection bindings, mint counters and the last balance snapshot
/// from the stored account into an incoming replacement. Bindings the
/// incoming account does not name are kept.
pub(crate) fn carry_over(existing: &TreasuryAccount, incoming: &mut TreasuryAccount) {
    for (category, previous) in &existing.collections {
        match incoming.collections.get_mut(category) {
            Some(binding) if binding.token_id == previous.token_id => {
                binding.minted_count = binding.minted_count.max(previous.minted_count);
            }
            Some(_) => {}
            None => {
                incoming
                    .collections
                    .insert(category.clone(), previous.clone());
            }
        }
    }
    if incoming.balance.is_none() {
        incoming.balance = existing.balance;
    }
}

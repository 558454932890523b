//! PostgreSQL storage implementation
//!
//! Records are stored as JSONB documents next to the columns the engine
//! filters on. Status writes lock the row (`SELECT ... FOR UPDATE`) inside a
//! transaction so compare-and-set is atomic across processes.

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use issuance_types::{
    BalanceSnapshot, CollectionBinding, ErrorEntry, IssuanceProgress, IssuedCredit, ProjectRef,
    SigningKey, StateEntry, TreasuryAccount, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflow_records (
                id TEXT PRIMARY KEY,
                project_ref TEXT NOT NULL,
                verifier_project_id TEXT,
                status TEXT NOT NULL,
                terminal BOOLEAN NOT NULL,
                last_synced_at TIMESTAMPTZ,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS workflow_records_active_project ON workflow_records(project_ref) WHERE NOT terminal;"#,
            r#"CREATE INDEX IF NOT EXISTS workflow_records_verifier_id ON workflow_records(verifier_project_id);"#,
            r#"CREATE INDEX IF NOT EXISTS workflow_records_status ON workflow_records(status, last_synced_at);"#,
            r#"
            CREATE TABLE IF NOT EXISTS issued_credits (
                project_ref TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                token_id TEXT NOT NULL,
                serial BIGINT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS treasury_accounts (
                account_id TEXT PRIMARY KEY,
                signing_key TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StorageError> {
        serde_json::to_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StorageError> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn query_error(e: sqlx::Error) -> StorageError {
        StorageError::Query(e.to_string())
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
    }

    fn workflow_from_row(row: &sqlx::postgres::PgRow) -> StorageResult<WorkflowRecord> {
        let data: Value = row.try_get("data").map_err(Self::query_error)?;
        Self::from_json(data)
    }

    fn treasury_from_row(row: &sqlx::postgres::PgRow) -> StorageResult<TreasuryAccount> {
        let data: Value = row.try_get("data").map_err(Self::query_error)?;
        let key: String = row.try_get("signing_key").map_err(Self::query_error)?;
        let mut account: TreasuryAccount = Self::from_json(data)?;
        account.signing_key = SigningKey::new(key);
        Ok(account)
    }

    async fn begin(&self) -> StorageResult<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(Self::query_error)
    }

    async fn lock_workflow(
        tx: &mut Transaction<'_, Postgres>,
        id: &WorkflowId,
    ) -> StorageResult<WorkflowRecord> {
        let row = sqlx::query("SELECT data FROM workflow_records WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(Self::query_error)?
            .ok_or_else(|| StorageError::NotFound(format!("workflow {}", id)))?;
        Self::workflow_from_row(&row)
    }

    async fn write_workflow(
        tx: &mut Transaction<'_, Postgres>,
        record: &WorkflowRecord,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE workflow_records SET
                verifier_project_id = $2,
                status = $3,
                terminal = $4,
                last_synced_at = $5,
                data = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.verifier_project_id.as_deref())
        .bind(record.current_status.as_str())
        .bind(record.is_terminal())
        .bind(record.last_synced_at)
        .bind(Self::to_json(record)?)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    /// Lock a record, apply `change`, write it back and commit.
    async fn update_workflow<F>(&self, id: &WorkflowId, change: F) -> StorageResult<WorkflowRecord>
    where
        F: FnOnce(&mut WorkflowRecord) + Send,
    {
        let mut tx = self.begin().await?;
        let mut record = Self::lock_workflow(&mut tx, id).await?;
        change(&mut record);
        Self::write_workflow(&mut tx, &record).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(record)
    }

    async fn lock_treasury(
        tx: &mut Transaction<'_, Postgres>,
        account_id: &str,
    ) -> StorageResult<Option<TreasuryAccount>> {
        let row = sqlx::query(
            "SELECT signing_key, data FROM treasury_accounts WHERE account_id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Self::query_error)?;
        row.as_ref().map(Self::treasury_from_row).transpose()
    }

    async fn write_treasury(
        tx: &mut Transaction<'_, Postgres>,
        account: &TreasuryAccount,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO treasury_accounts (account_id, signing_key, data, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id)
            DO UPDATE SET
                signing_key = EXCLUDED.signing_key,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&account.account_id)
        .bind(account.signing_key.expose())
        .bind(Self::to_json(account)?)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(Self::query_error)?;
        Ok(())
    }

    async fn update_treasury<F, T>(&self, account_id: &str, change: F) -> StorageResult<T>
    where
        F: FnOnce(&mut TreasuryAccount) -> StorageResult<T> + Send,
        T: Send,
    {
        let mut tx = self.begin().await?;
        let mut account = Self::lock_treasury(&mut tx, account_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("treasury account {}", account_id)))?;
        let result = change(&mut account)?;
        Self::write_treasury(&mut tx, &account).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(result)
    }
}

#[async_trait]
impl WorkflowStore for PostgresStore {
    async fn create_workflow(&self, record: WorkflowRecord) -> StorageResult<WorkflowRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_records
                (id, project_ref, verifier_project_id, status, terminal, last_synced_at, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.project_ref.as_str())
        .bind(record.verifier_project_id.as_deref())
        .bind(record.current_status.as_str())
        .bind(record.is_terminal())
        .bind(record.last_synced_at)
        .bind(Self::to_json(&record)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(e) if Self::is_unique_violation(&e) => Err(StorageError::Conflict(format!(
                "project {} already has an active workflow",
                record.project_ref
            ))),
            Err(e) => Err(Self::query_error(e)),
        }
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<WorkflowRecord>> {
        let row = sqlx::query("SELECT data FROM workflow_records WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::query_error)?;
        row.as_ref().map(Self::workflow_from_row).transpose()
    }

    async fn find_workflow_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<WorkflowRecord>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM workflow_records
            WHERE project_ref = $1
            ORDER BY terminal ASC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(project_ref.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_error)?;
        row.as_ref().map(Self::workflow_from_row).transpose()
    }

    async fn find_workflow_by_verifier_id(
        &self,
        verifier_project_id: &str,
    ) -> StorageResult<Option<WorkflowRecord>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM workflow_records
            WHERE verifier_project_id = $1
            ORDER BY terminal ASC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(verifier_project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_error)?;
        row.as_ref().map(Self::workflow_from_row).transpose()
    }

    async fn list_workflows_by_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
    ) -> StorageResult<Vec<WorkflowRecord>> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT data FROM workflow_records
            WHERE status = ANY($1)
            ORDER BY last_synced_at ASC NULLS FIRST, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(names)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_error)?;

        rows.iter().map(Self::workflow_from_row).collect()
    }

    async fn compare_and_set(
        &self,
        id: &WorkflowId,
        expected: WorkflowStatus,
        entry: StateEntry,
    ) -> StorageResult<CasOutcome> {
        let mut tx = self.begin().await?;
        let mut record = Self::lock_workflow(&mut tx, id).await?;
        if record.current_status != expected {
            tx.rollback().await.map_err(Self::query_error)?;
            return Ok(CasOutcome::Conflict(record));
        }
        record.commit(entry);
        Self::write_workflow(&mut tx, &record).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(CasOutcome::Applied(record))
    }

    async fn append_error(
        &self,
        id: &WorkflowId,
        entry: ErrorEntry,
    ) -> StorageResult<WorkflowRecord> {
        self.update_workflow(id, move |record| record.record_error(entry))
            .await
    }

    async fn touch_synced(&self, id: &WorkflowId, at: DateTime<Utc>) -> StorageResult<()> {
        self.update_workflow(id, move |record| record.touch_synced(at))
            .await
            .map(|_| ())
    }

    async fn set_verifier_project_id(
        &self,
        id: &WorkflowId,
        verifier_project_id: &str,
    ) -> StorageResult<WorkflowRecord> {
        let verifier_project_id = verifier_project_id.to_string();
        self.update_workflow(id, move |record| {
            record.verifier_project_id = Some(verifier_project_id);
            record.updated_at = Utc::now();
        })
        .await
    }

    async fn record_progress(
        &self,
        id: &WorkflowId,
        progress: IssuanceProgress,
    ) -> StorageResult<()> {
        self.update_workflow(id, move |record| {
            record.issuance_progress = progress;
            record.updated_at = Utc::now();
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl CreditStore for PostgresStore {
    async fn insert_credit(&self, credit: IssuedCredit) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO issued_credits (project_ref, workflow_id, token_id, serial, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (project_ref) DO NOTHING
            "#,
        )
        .bind(credit.project_ref.as_str())
        .bind(credit.workflow_id.as_str())
        .bind(&credit.token_id)
        .bind(i64::try_from(credit.serial).unwrap_or(i64::MAX))
        .bind(Self::to_json(&credit)?)
        .bind(credit.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::query_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Duplicate(format!(
                "credit already issued for project {}",
                credit.project_ref
            )));
        }
        Ok(())
    }

    async fn find_credit_by_project(
        &self,
        project_ref: &ProjectRef,
    ) -> StorageResult<Option<IssuedCredit>> {
        let row = sqlx::query("SELECT data FROM issued_credits WHERE project_ref = $1")
            .bind(project_ref.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::query_error)?;

        match row {
            Some(record) => {
                let data: Value = record.try_get("data").map_err(Self::query_error)?;
                Ok(Some(Self::from_json(data)?))
            }
            None => Ok(None),
        }
    }

    async fn list_credits(&self) -> StorageResult<Vec<IssuedCredit>> {
        let rows = sqlx::query("SELECT data FROM issued_credits ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(Self::query_error)?;

        rows.into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(Self::query_error)?;
                Self::from_json(data)
            })
            .collect()
    }
}

#[async_trait]
impl TreasuryStore for PostgresStore {
    async fn upsert_treasury(&self, mut account: TreasuryAccount) -> StorageResult<()> {
        let mut tx = self.begin().await?;
        if let Some(existing) = Self::lock_treasury(&mut tx, &account.account_id).await? {
            carry_over(&existing, &mut account);
        }
        Self::write_treasury(&mut tx, &account).await?;
        tx.commit().await.map_err(Self::query_error)?;
        Ok(())
    }

    async fn get_treasury(&self, account_id: &str) -> StorageResult<Option<TreasuryAccount>> {
        let row = sqlx::query(
            "SELECT signing_key, data FROM treasury_accounts WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_error)?;
        row.as_ref().map(Self::treasury_from_row).transpose()
    }

    async fn list_treasuries(&self) -> StorageResult<Vec<TreasuryAccount>> {
        let rows = sqlx::query("SELECT signing_key, data FROM treasury_accounts ORDER BY account_id")
            .fetch_all(&self.pool)
            .await
            .map_err(Self::query_error)?;
        rows.iter().map(Self::treasury_from_row).collect()
    }

    async fn find_treasury_for_category(
        &self,
        category: &str,
    ) -> StorageResult<Option<TreasuryAccount>> {
        let row = sqlx::query(
            r#"
            SELECT signing_key, data FROM treasury_accounts
            WHERE data->'collections'->$1 IS NOT NULL
            ORDER BY account_id
            LIMIT 1
            "#,
        )
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_error)?;
        row.as_ref().map(Self::treasury_from_row).transpose()
    }

    async fn record_balance(
        &self,
        account_id: &str,
        snapshot: BalanceSnapshot,
    ) -> StorageResult<()> {
        self.update_treasury(account_id, move |account| {
            account.balance = Some(snapshot);
            Ok(())
        })
        .await
    }

    async fn bind_collection(
        &self,
        account_id: &str,
        category: &str,
        binding: CollectionBinding,
    ) -> StorageResult<()> {
        let category = category.to_string();
        self.update_treasury(account_id, move |account| {
            account.collections.insert(category, binding);
            Ok(())
        })
        .await
    }

    async fn increment_mint_count(&self, account_id: &str, category: &str) -> StorageResult<u64> {
        let owner = account_id.to_string();
        let category = category.to_string();
        self.update_treasury(account_id, move |account| {
            let binding = account.collections.get_mut(&category).ok_or_else(|| {
                StorageError::NotFound(format!(
                    "collection for category {} on account {}",
                    category, owner
                ))
            })?;
            binding.minted_count += 1;
            Ok(binding.minted_count)
        })
        .await
    }
}

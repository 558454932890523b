//! Issuance pipeline
//!
//! Turns an approved workflow into exactly one minted credit. Runs are
//! serialized per project and every side effect is preceded by an existence
//! check, so a re-run after any failure resumes instead of repeating work:
//!
//! - an existing [`IssuedCredit`] skips straight to finalization;
//! - persisted content references skip rendering and publishing;
//! - a recorded [`MintedUnit`] skips the mint.
//!
//! Webhooks and the poller do not take the per-project lock, so the status is
//! read again right before minting.

use crate::certificate::{CertificateRenderer, RenderedArtifact, TokenMetadata};
use crate::content::ContentStore;
use crate::engine::{TransitionResult, WorkflowEngine};
use crate::error::{EngineResult, IssuanceStep, LedgerError, PipelineError, StorageError};
use crate::ledger::LedgerClient;
use crate::locks::KeyedLocks;
use crate::scheduler::{JobError, PeriodicJob};
use async_trait::async_trait;
use chrono::Utc;
use issuance_types::{
    CreditStatus, EngineEvent, IssuanceProgress, IssuedCredit, Metadata, MintedUnit,
    TreasuryAccount, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Statuses the scanner picks up. `MINTING` resumes a run interrupted
/// between the two finalization transitions.
pub const ELIGIBLE_STATUSES: [WorkflowStatus; 2] =
    [WorkflowStatus::ReviewerApproved, WorkflowStatus::Minting];

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub batch_size: usize,
    /// Bound on each ledger and content storage call
    pub call_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of processing one workflow
#[derive(Debug, Clone)]
pub enum IssuanceOutcome {
    /// Credit minted (or found from an earlier run) and workflow finalized
    Issued(IssuedCredit),
    /// Workflow was no longer eligible when its turn came
    Skipped,
    /// No treasury collection for the project category; workflow moved to `FAILED`
    Unconfigured,
    /// Run stopped at a step; workflow left resumable
    Stopped(PipelineError),
    /// A credit exists but the workflow reached another terminal status
    /// while the run was in flight. Needs operator review.
    Superseded {
        credit: IssuedCredit,
        status: WorkflowStatus,
    },
}

/// Counts for one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: usize,
    pub issued: usize,
    pub skipped: usize,
    pub unconfigured: usize,
    pub stopped: usize,
    pub superseded: usize,
}

/// Mints credits for approved workflows.
pub struct IssuancePipeline {
    engine: Arc<WorkflowEngine>,
    ledger: Arc<dyn LedgerClient>,
    content: Arc<dyn ContentStore>,
    renderer: Arc<dyn CertificateRenderer>,
    locks: KeyedLocks,
    settings: PipelineSettings,
}

impl IssuancePipeline {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        ledger: Arc<dyn LedgerClient>,
        content: Arc<dyn ContentStore>,
        renderer: Arc<dyn CertificateRenderer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            ledger,
            content,
            renderer,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    /// Process every eligible workflow, up to the batch size
    pub async fn scan_once(&self) -> EngineResult<ScanReport> {
        let records = self
            .engine
            .store()
            .list_workflows_by_status(&ELIGIBLE_STATUSES, self.settings.batch_size)
            .await?;

        let mut report = ScanReport::default();
        for record in records {
            report.examined += 1;
            match self.process(&record.id).await {
                Ok(IssuanceOutcome::Issued(_)) => report.issued += 1,
                Ok(IssuanceOutcome::Skipped) => report.skipped += 1,
                Ok(IssuanceOutcome::Unconfigured) => report.unconfigured += 1,
                Ok(IssuanceOutcome::Stopped(_)) => report.stopped += 1,
                Ok(IssuanceOutcome::Superseded { .. }) => report.superseded += 1,
                Err(e) => {
                    report.stopped += 1;
                    tracing::error!(workflow_id = %record.id, error = %e, "Issuance run aborted");
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(?report, "Issuance scan complete");
        }
        Ok(report)
    }

    /// Run the pipeline for one workflow.
    ///
    /// Only storage failures while recording a step failure are returned as
    /// errors; step failures themselves come back as `Stopped`.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn process(&self, workflow_id: &WorkflowId) -> EngineResult<IssuanceOutcome> {
        let Some(snapshot) = self.engine.store().get_workflow(workflow_id).await? else {
            return Ok(IssuanceOutcome::Skipped);
        };
        let _guard = self.locks.lock(snapshot.project_ref.as_str()).await;

        // Re-read under the lock; a concurrent run may have finished it
        let Some(record) = self.engine.store().get_workflow(workflow_id).await? else {
            return Ok(IssuanceOutcome::Skipped);
        };
        if !ELIGIBLE_STATUSES.contains(&record.current_status) {
            return Ok(IssuanceOutcome::Skipped);
        }

        match self.issue(&record).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(step = %err.step, error = %err.message, "Issuance stopped");
                self.engine
                    .record_error(&record.id, err.to_string(), None)
                    .await?;
                Ok(IssuanceOutcome::Stopped(err))
            }
        }
    }

    async fn issue(&self, record: &WorkflowRecord) -> Result<IssuanceOutcome, PipelineError> {
        let store = self.engine.store();

        if let Some(credit) = store
            .find_credit_by_project(&record.project_ref)
            .await
            .map_err(step_error(IssuanceStep::PersistCredit))?
        {
            tracing::info!(serial = credit.serial, "Credit already issued; finalizing");
            return self.finalize(record, credit).await;
        }

        // Step 1
        let Some((treasury, token_id)) = self.resolve_treasury(record).await? else {
            let message = format!(
                "no treasury collection configured for category '{}'",
                record.project.category
            );
            tracing::error!(category = %record.project.category, "Issuance unconfigured");
            self.engine
                .record_error(&record.id, message.clone(), None)
                .await
                .map_err(step_error(IssuanceStep::ResolveTreasury))?;
            self.engine
                .transition(&record.id, WorkflowStatus::Failed, Some(message), Metadata::new())
                .await
                .map_err(step_error(IssuanceStep::ResolveTreasury))?;
            return Ok(IssuanceOutcome::Unconfigured);
        };
        self.progress(record, IssuanceStep::ResolveTreasury);

        // Steps 2-4
        let mut progress = self.publish_artifacts(record).await?;
        let (Some(certificate_ref), Some(metadata_ref)) =
            (progress.certificate_ref.clone(), progress.metadata_ref.clone())
        else {
            return Err(PipelineError::new(
                IssuanceStep::PublishMetadata,
                "content references missing after publish",
            ));
        };

        // Step 5
        let minted = match progress.minted.clone() {
            Some(minted) => {
                tracing::info!(serial = minted.serial, "Mint already confirmed; persisting credit");
                minted
            }
            None => {
                // Nothing on the ledger has happened yet; re-check before minting
                if let Some(credit) = store
                    .find_credit_by_project(&record.project_ref)
                    .await
                    .map_err(step_error(IssuanceStep::Mint))?
                {
                    return self.finalize(record, credit).await;
                }
                if let Some(status) = self.left_eligibility(record).await? {
                    tracing::info!(%status, "Workflow left issuance before mint");
                    return Ok(IssuanceOutcome::Skipped);
                }

                let receipt = self
                    .bounded(
                        self.ledger
                            .mint(&token_id, &treasury.signing_key, metadata_ref.as_bytes()),
                        || LedgerError::Timeout,
                    )
                    .await
                    .map_err(step_error(IssuanceStep::Mint))?;
                tracing::info!(
                    token_id = %token_id,
                    serial = receipt.serial,
                    operation_id = %receipt.operation_id,
                    "Minted credit"
                );
                let minted = MintedUnit {
                    token_id: token_id.clone(),
                    serial: receipt.serial,
                    operation_id: receipt.operation_id,
                };
                progress.minted = Some(minted.clone());
                if let Err(e) = self.save_progress(record, &progress, IssuanceStep::Mint).await {
                    tracing::error!(error = %e, "Mint receipt not recorded; persisting credit directly");
                }
                self.progress(record, IssuanceStep::Mint);
                minted
            }
        };

        // Step 6
        let credit = IssuedCredit {
            project_ref: record.project_ref.clone(),
            workflow_id: record.id.clone(),
            token_id: minted.token_id,
            serial: minted.serial,
            owner_account: treasury.account_id.clone(),
            certificate_ref,
            metadata_ref,
            mint_operation_id: minted.operation_id,
            status: CreditStatus::Active,
            created_at: Utc::now(),
        };
        let credit = match store.insert_credit(credit.clone()).await {
            Ok(()) => credit,
            Err(StorageError::Duplicate(_)) => {
                tracing::warn!("Credit persisted by a concurrent run; using stored credit");
                store
                    .find_credit_by_project(&record.project_ref)
                    .await
                    .map_err(step_error(IssuanceStep::PersistCredit))?
                    .ok_or_else(|| {
                        PipelineError::new(IssuanceStep::PersistCredit, "duplicate credit vanished")
                    })?
            }
            Err(e) => return Err(PipelineError::new(IssuanceStep::PersistCredit, e)),
        };

        // Step 7
        let count = store
            .increment_mint_count(&treasury.account_id, &record.project.category)
            .await
            .map_err(step_error(IssuanceStep::CountMint))?;
        tracing::debug!(minted_count = count, "Mint counter updated");

        self.finalize(record, credit).await
    }

    /// Current status when the workflow is no longer eligible for issuance
    async fn left_eligibility(
        &self,
        record: &WorkflowRecord,
    ) -> Result<Option<WorkflowStatus>, PipelineError> {
        let current = self
            .engine
            .store()
            .get_workflow(&record.id)
            .await
            .map_err(step_error(IssuanceStep::Mint))?
            .ok_or_else(|| PipelineError::new(IssuanceStep::Mint, "workflow vanished"))?;
        Ok(Some(current.current_status).filter(|s| !ELIGIBLE_STATUSES.contains(s)))
    }

    /// Step 1: first account with a collection for the category and a usable key
    async fn resolve_treasury(
        &self,
        record: &WorkflowRecord,
    ) -> Result<Option<(TreasuryAccount, String)>, PipelineError> {
        let account = self
            .engine
            .store()
            .find_treasury_for_category(&record.project.category)
            .await
            .map_err(step_error(IssuanceStep::ResolveTreasury))?;

        Ok(account.and_then(|account| {
            if account.signing_key.is_empty() {
                return None;
            }
            let token_id = account
                .collection_for(&record.project.category)?
                .token_id
                .clone();
            Some((account, token_id))
        }))
    }

    /// Steps 2-4, skipping whatever an earlier run already published
    async fn publish_artifacts(
        &self,
        record: &WorkflowRecord,
    ) -> Result<IssuanceProgress, PipelineError> {
        let mut progress = record.issuance_progress.clone();

        if progress.certificate_ref.is_none() {
            let certificate = self
                .renderer
                .render(record)
                .map_err(step_error(IssuanceStep::RenderCertificate))?;
            self.progress(record, IssuanceStep::RenderCertificate);

            let certificate_ref = self
                .publish(certificate)
                .await
                .map_err(step_error(IssuanceStep::PublishCertificate))?;
            progress.certificate_ref = Some(certificate_ref);
            self.save_progress(record, &progress, IssuanceStep::PublishCertificate)
                .await?;
            self.progress(record, IssuanceStep::PublishCertificate);
        }

        if progress.metadata_ref.is_none() {
            let certificate_ref = progress.certificate_ref.as_deref().unwrap_or_default();
            let metadata = TokenMetadata::for_record(record, certificate_ref)
                .to_artifact(record)
                .map_err(step_error(IssuanceStep::PublishMetadata))?;
            let metadata_ref = self
                .publish(metadata)
                .await
                .map_err(step_error(IssuanceStep::PublishMetadata))?;
            progress.metadata_ref = Some(metadata_ref);
            self.save_progress(record, &progress, IssuanceStep::PublishMetadata)
                .await?;
            self.progress(record, IssuanceStep::PublishMetadata);
        }

        Ok(progress)
    }

    async fn publish(&self, artifact: RenderedArtifact) -> Result<String, crate::error::ContentError> {
        self.bounded(
            self.content
                .publish(&artifact.name, &artifact.content_type, artifact.bytes),
            || crate::error::ContentError::Unavailable("publish timed out".into()),
        )
        .await
    }

    async fn save_progress(
        &self,
        record: &WorkflowRecord,
        progress: &IssuanceProgress,
        step: IssuanceStep,
    ) -> Result<(), PipelineError> {
        self.engine
            .store()
            .record_progress(&record.id, progress.clone())
            .await
            .map_err(step_error(step))
    }

    /// Step 8 and 9
    async fn finalize(
        &self,
        record: &WorkflowRecord,
        credit: IssuedCredit,
    ) -> Result<IssuanceOutcome, PipelineError> {
        let mut metadata = Metadata::new();
        metadata.insert(
            "operationId".into(),
            Value::String(credit.mint_operation_id.clone()),
        );

        self.engine
            .transition(
                &record.id,
                WorkflowStatus::Minting,
                Some("Mint submitted".into()),
                metadata.clone(),
            )
            .await
            .map_err(step_error(IssuanceStep::Finalize))?;

        metadata.insert("tokenId".into(), Value::String(credit.token_id.clone()));
        metadata.insert("serial".into(), json!(credit.serial));
        let result = self
            .engine
            .transition(
                &record.id,
                WorkflowStatus::Complete,
                Some("Credit issued".into()),
                metadata,
            )
            .await
            .map_err(step_error(IssuanceStep::Finalize))?;

        if let TransitionResult::Anomaly { record: current, anomaly } = result {
            let status = current.current_status;
            let message = format!(
                "credit {}#{} exists but workflow is {}",
                credit.token_id, credit.serial, status
            );
            tracing::error!(%anomaly, %status, "Credit issued for a workflow that left issuance");
            self.engine
                .record_error(&record.id, message, None)
                .await
                .map_err(step_error(IssuanceStep::Finalize))?;
            return Ok(IssuanceOutcome::Superseded { credit, status });
        }

        let hub = self.engine.hub();
        hub.dispatch(EngineEvent::IssuanceCompleted {
            workflow_id: record.id.clone(),
            project_ref: record.project_ref.clone(),
            token_id: credit.token_id.clone(),
            serial: credit.serial,
            operation_id: credit.mint_operation_id.clone(),
            at: Utc::now(),
        });
        self.progress(record, IssuanceStep::Finalize);

        Ok(IssuanceOutcome::Issued(credit))
    }

    fn progress(&self, record: &WorkflowRecord, step: IssuanceStep) {
        self.engine.hub().dispatch(EngineEvent::IssuanceProgress {
            workflow_id: record.id.clone(),
            project_ref: record.project_ref.clone(),
            step: step.name().to_string(),
            at: Utc::now(),
        });
    }

    async fn bounded<T, E, F>(&self, call: F, on_timeout: impl FnOnce() -> E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }
}

fn step_error<E: std::fmt::Display>(step: IssuanceStep) -> impl FnOnce(E) -> PipelineError {
    move |e| PipelineError::new(step, e)
}

#[async_trait]
impl PeriodicJob for IssuancePipeline {
    fn name(&self) -> &'static str {
        "issuance-pipeline"
    }

    async fn tick(&self) -> Result<(), JobError> {
        self.scan_once().await?;
        Ok(())
    }
}

//! Workflow engine: the only writer of workflow status
//!
//! Both ingestion paths (webhook push and poller pull) and the issuance
//! pipeline funnel status changes through [`WorkflowEngine::transition`],
//! which evaluates the transition function against the stored record and
//! writes with compare-and-set, re-reading on conflict.

use crate::error::{EngineError, EngineResult, StorageError};
use crate::notify::NotificationHub;
use crate::storage::{CasOutcome, Store};
use crate::verifier::{ProjectSubmission, VerifierApi};
use chrono::Utc;
use issuance_types::{
    EngineEvent, ErrorEntry, Metadata, ProjectProfile, ProjectRef, TransitionAnomaly,
    WorkflowId, WorkflowRecord, WorkflowStatus, WorkflowStatusView,
};
use std::sync::Arc;
use tracing::instrument;

/// Default bound on compare-and-set retries
pub const DEFAULT_CAS_ATTEMPTS: u32 = 5;

/// Outcome of a requested transition
#[derive(Debug, Clone)]
pub enum TransitionResult {
    /// Status changed; a history entry was appended
    Applied {
        record: WorkflowRecord,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    /// Requested status equals the current one
    Unchanged(WorkflowRecord),
    /// Refused by the state machine; logged, nothing written
    Anomaly {
        record: WorkflowRecord,
        anomaly: TransitionAnomaly,
    },
}

impl TransitionResult {
    pub fn record(&self) -> &WorkflowRecord {
        match self {
            Self::Applied { record, .. } | Self::Unchanged(record) | Self::Anomaly { record, .. } => {
                record
            }
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Request to start tracking a project
#[derive(Debug, Clone)]
pub struct SubmitProject {
    pub project_ref: ProjectRef,
    pub policy_id: String,
    pub policy_tag: String,
    pub project: ProjectProfile,
    pub metadata: Metadata,
}

/// Owns workflow records and applies transitions to them.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    verifier: Arc<dyn VerifierApi>,
    hub: NotificationHub,
    max_cas_attempts: u32,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, verifier: Arc<dyn VerifierApi>, hub: NotificationHub) -> Self {
        Self {
            store,
            verifier,
            hub,
            max_cas_attempts: DEFAULT_CAS_ATTEMPTS,
        }
    }

    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn verifier(&self) -> &Arc<dyn VerifierApi> {
        &self.verifier
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Request a status change.
    ///
    /// Replays return `Unchanged`; backward or post-terminal requests return
    /// `Anomaly` after a warning. Neither is an error.
    #[instrument(skip(self, message, metadata), fields(workflow_id = %id, requested = %status))]
    pub async fn transition(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        message: Option<String>,
        metadata: Metadata,
    ) -> EngineResult<TransitionResult> {
        for attempt in 1..=self.max_cas_attempts {
            let record = self.load(id).await?;
            let from = record.current_status;

            let entry = match record.plan(status, message.clone(), metadata.clone()) {
                Err(anomaly) => {
                    tracing::warn!(
                        project_ref = %record.project_ref,
                        anomaly = %anomaly,
                        "Transition anomaly ignored"
                    );
                    return Ok(TransitionResult::Anomaly { record, anomaly });
                }
                Ok(None) => return Ok(TransitionResult::Unchanged(record)),
                Ok(Some(entry)) => entry,
            };

            match self.store.compare_and_set(id, from, entry).await? {
                CasOutcome::Applied(record) => {
                    tracing::info!(
                        project_ref = %record.project_ref,
                        from = %from,
                        to = %status,
                        "Workflow transitioned"
                    );
                    self.hub.dispatch(EngineEvent::StatusChanged {
                        workflow_id: record.id.clone(),
                        project_ref: record.project_ref.clone(),
                        from,
                        to: status,
                        at: record.updated_at,
                    });
                    return Ok(TransitionResult::Applied {
                        record,
                        from,
                        to: status,
                    });
                }
                CasOutcome::Conflict(current) => {
                    tracing::debug!(
                        attempt,
                        expected = %from,
                        found = %current.current_status,
                        "Concurrent update; re-evaluating"
                    );
                }
            }
        }

        Err(EngineError::ContentionExhausted {
            workflow_id: id.to_string(),
            attempts: self.max_cas_attempts,
        })
    }

    /// Append to a record's error log
    pub async fn record_error(
        &self,
        id: &WorkflowId,
        message: impl Into<String>,
        trace: Option<String>,
    ) -> EngineResult<WorkflowRecord> {
        let entry = ErrorEntry::new(message, trace);
        tracing::warn!(workflow_id = %id, error = %entry.message, "Recorded workflow error");
        Ok(self.store.append_error(id, entry).await?)
    }

    /// Mark a reconciliation that found nothing new
    pub async fn touch_synced(&self, id: &WorkflowId) -> EngineResult<()> {
        Ok(self.store.touch_synced(id, Utc::now()).await?)
    }

    /// Create a record and submit the project to the verifier.
    ///
    /// A verifier failure is logged on the record, which stays `SUBMITTED`
    /// without a verifier id.
    #[instrument(skip(self, request), fields(project_ref = %request.project_ref))]
    pub async fn submit_project(&self, request: SubmitProject) -> EngineResult<WorkflowRecord> {
        if request.policy_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("policy_id must not be empty".into()));
        }

        let record = WorkflowRecord::new(
            request.project_ref.clone(),
            request.policy_id.clone(),
            request.policy_tag.clone(),
            request.project.clone(),
        );
        let record = self.store.create_workflow(record).await.map_err(|e| match e {
            StorageError::Conflict(msg) => EngineError::InvalidRequest(msg),
            other => other.into(),
        })?;
        tracing::info!(workflow_id = %record.id, "Workflow created");

        let submission = ProjectSubmission {
            policy_tag: request.policy_tag,
            external_ref: request.project_ref.to_string(),
            project: request.project,
            metadata: request.metadata,
        };

        match self
            .verifier
            .submit_project(&record.policy_id, &submission)
            .await
        {
            Ok(verifier_project_id) => {
                tracing::info!(
                    workflow_id = %record.id,
                    verifier_project_id = %verifier_project_id,
                    "Project accepted by verifier"
                );
                Ok(self
                    .store
                    .set_verifier_project_id(&record.id, &verifier_project_id)
                    .await?)
            }
            Err(e) => {
                self.record_error(&record.id, format!("verifier submission failed: {}", e), None)
                    .await
            }
        }
    }

    /// Status view of a project's current (or latest) workflow
    pub async fn status_view(
        &self,
        project_ref: &ProjectRef,
    ) -> EngineResult<Option<WorkflowStatusView>> {
        let record = self.store.find_workflow_by_project(project_ref).await?;
        Ok(record.as_ref().map(WorkflowStatusView::from))
    }

    async fn load(&self, id: &WorkflowId) -> EngineResult<WorkflowRecord> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish()
    }
}

//! Reconciliation poller (pull path)
//!
//! Periodically asks the verifier for the status of every non-terminal
//! project and feeds differences through the transition function. A failure
//! on one record is logged on that record and the batch continues.

use crate::engine::{TransitionResult, WorkflowEngine};
use crate::error::EngineResult;
use crate::scheduler::{JobError, PeriodicJob};
use async_trait::async_trait;
use issuance_types::{Metadata, WorkflowRecord, WorkflowStatus};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default number of records examined per tick
pub const DEFAULT_POLL_BATCH: usize = 50;

/// Counts for one poll pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub examined: usize,
    pub transitioned: usize,
    pub unchanged: usize,
    pub anomalies: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pulls verifier status for non-terminal workflows.
pub struct ReconciliationPoller {
    engine: Arc<WorkflowEngine>,
    batch_size: usize,
    issuance_trigger: Option<mpsc::Sender<()>>,
}

impl ReconciliationPoller {
    pub fn new(engine: Arc<WorkflowEngine>, batch_size: usize) -> Self {
        Self {
            engine,
            batch_size: batch_size.max(1),
            issuance_trigger: None,
        }
    }

    /// Nudge the issuance scanner when a project reaches approval
    pub fn with_issuance_trigger(mut self, trigger: mpsc::Sender<()>) -> Self {
        self.issuance_trigger = Some(trigger);
        self
    }

    /// Run one reconciliation pass
    pub async fn poll_once(&self) -> EngineResult<PollReport> {
        let statuses: Vec<WorkflowStatus> = WorkflowStatus::non_terminal().collect();
        let records = self
            .engine
            .store()
            .list_workflows_by_status(&statuses, self.batch_size)
            .await?;

        let mut report = PollReport::default();
        for record in records {
            report.examined += 1;
            match self.reconcile(&record).await {
                Ok(Some(TransitionResult::Applied { to, .. })) => {
                    report.transitioned += 1;
                    if to == WorkflowStatus::ReviewerApproved {
                        if let Some(trigger) = &self.issuance_trigger {
                            let _ = trigger.try_send(());
                        }
                    }
                }
                Ok(Some(TransitionResult::Unchanged(_))) => report.unchanged += 1,
                Ok(Some(TransitionResult::Anomaly { .. })) => report.anomalies += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(workflow_id = %record.id, error = %e, "Reconciliation failed");
                }
            }
        }

        if report.examined > 0 {
            tracing::debug!(?report, "Reconciliation pass complete");
        }
        Ok(report)
    }

    /// Reconcile one record. `Ok(None)` means it was skipped.
    async fn reconcile(&self, record: &WorkflowRecord) -> EngineResult<Option<TransitionResult>> {
        let Some(verifier_project_id) = record.verifier_project_id.as_deref() else {
            return Ok(None);
        };

        let status = match self
            .engine
            .verifier()
            .get_project_status(&record.policy_id, verifier_project_id)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                self.engine
                    .record_error(&record.id, format!("status poll failed: {}", e), None)
                    .await?;
                return Err(e.into());
            }
        };

        if status.status == record.current_status {
            self.engine.touch_synced(&record.id).await?;
            return Ok(Some(TransitionResult::Unchanged(record.clone())));
        }

        let result = self
            .engine
            .transition(
                &record.id,
                status.status,
                status.message.or_else(|| Some("Reconciled by poller".into())),
                Metadata::new(),
            )
            .await?;

        // A lost race to the same status still counts as a sync
        if let TransitionResult::Unchanged(_) = result {
            self.engine.touch_synced(&record.id).await?;
        }
        Ok(Some(result))
    }
}

#[async_trait]
impl PeriodicJob for ReconciliationPoller {
    fn name(&self) -> &'static str {
        "reconciliation-poller"
    }

    async fn tick(&self) -> Result<(), JobError> {
        self.poll_once().await?;
        Ok(())
    }
}

//! Workflow records: one verification-and-issuance state machine per project
//!
//! A [`WorkflowRecord`] is the authoritative local view of where a project
//! stands with the verifier and the ledger. Its status only changes through
//! the transition function ([`WorkflowRecord::apply`], or the
//! [`WorkflowRecord::plan`] / [`WorkflowRecord::commit`] pair used by stores
//! that perform compare-and-set writes).

use crate::{ProjectRef, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Opaque key-value metadata passed through unmodified.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ── Project profile ──────────────────────────────────────────────────

/// Snapshot of the project attributes the issuance pipeline needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProfile {
    /// Human-readable project name
    pub name: String,
    /// Credit category (e.g. "reforestation"); selects the token collection
    pub category: String,
    /// Number of credit units claimed
    pub quantity: u64,
    /// Vintage year or period
    pub vintage: String,
    /// Project location
    pub location: String,
}

// ── History and error entries ────────────────────────────────────────

/// One accepted transition. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub status: WorkflowStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl StateEntry {
    pub fn new(status: WorkflowStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            message: None,
            metadata: Metadata::new(),
        }
    }
}

/// A failure observed while reconciling or issuing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>, trace: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            trace,
        }
    }
}

/// Work an earlier, interrupted pipeline run already completed: published
/// content references and a confirmed mint whose credit was not yet stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minted: Option<MintedUnit>,
}

/// A unit the ledger confirmed minting
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintedUnit {
    pub token_id: String,
    pub serial: u64,
    pub operation_id: String,
}

// ── Transition results ───────────────────────────────────────────────

/// Result of a transition the state machine accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status changed and a history entry was appended
    Applied {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    /// Requested status equals the current one; nothing appended
    Unchanged,
}

impl TransitionOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A transition the state machine refuses. Logged as an anomaly, never applied.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransitionAnomaly {
    #[error("backward transition {from} -> {to} rejected")]
    Backward {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("workflow is terminal at {from}; transition to {to} rejected")]
    FromTerminal {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
}

// ── Workflow record ──────────────────────────────────────────────────

/// Per-project verification-and-issuance state machine instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique record identifier
    pub id: WorkflowId,
    /// Local project reference
    pub project_ref: ProjectRef,
    /// Verifier-assigned project id, set once the verifier accepts the submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_project_id: Option<String>,
    /// Verifier policy (methodology) the project is reviewed under
    pub policy_id: String,
    /// Policy tag used by the verifier to route the submission
    pub policy_tag: String,
    /// Attributes captured at submission
    pub project: ProjectProfile,
    /// Authoritative status; equals the status of the last history entry
    pub current_status: WorkflowStatus,
    /// Append-only audit trail of accepted transitions
    pub state_history: Vec<StateEntry>,
    /// Failures observed while reconciling or issuing
    pub error_log: Vec<ErrorEntry>,
    /// Number of error log entries appended so far
    pub retry_count: u32,
    /// Most recent successful reconciliation (push or pull)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Intermediate pipeline artifacts
    #[serde(default)]
    pub issuance_progress: IssuanceProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a record in `SUBMITTED` with its initial history entry.
    pub fn new(
        project_ref: ProjectRef,
        policy_id: impl Into<String>,
        policy_tag: impl Into<String>,
        project: ProjectProfile,
    ) -> Self {
        let now = Utc::now();
        let initial = StateEntry {
            status: WorkflowStatus::Submitted,
            timestamp: now,
            message: Some("Workflow created".to_string()),
            metadata: Metadata::new(),
        };

        Self {
            id: WorkflowId::generate(),
            project_ref,
            verifier_project_id: None,
            policy_id: policy_id.into(),
            policy_tag: policy_tag.into(),
            project,
            current_status: WorkflowStatus::Submitted,
            state_history: vec![initial],
            error_log: Vec::new(),
            retry_count: 0,
            last_synced_at: None,
            issuance_progress: IssuanceProgress::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_verifier_project_id(mut self, id: impl Into<String>) -> Self {
        self.verifier_project_id = Some(id.into());
        self
    }

    /// Decide whether moving `from -> to` is allowed.
    ///
    /// Returns `Ok(false)` for a replay of the same status, `Ok(true)` for an
    /// accepted change.
    pub fn check_transition(
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<bool, TransitionAnomaly> {
        if from == to {
            return Ok(false);
        }
        if from.is_terminal() {
            return Err(TransitionAnomaly::FromTerminal { from, to });
        }
        if to.is_failure_sink() {
            return Ok(true);
        }
        match (from.rank(), to.rank()) {
            (Some(current), Some(next)) if next > current => Ok(true),
            _ => Err(TransitionAnomaly::Backward { from, to }),
        }
    }

    /// Build the history entry a transition to `status` would append.
    ///
    /// `Ok(None)` means the request is a replay and nothing should be written.
    pub fn plan(
        &self,
        status: WorkflowStatus,
        message: Option<String>,
        metadata: Metadata,
    ) -> Result<Option<StateEntry>, TransitionAnomaly> {
        if !Self::check_transition(self.current_status, status)? {
            return Ok(None);
        }
        Ok(Some(StateEntry {
            status,
            timestamp: Utc::now(),
            message,
            metadata,
        }))
    }

    /// Append a planned entry and move `current_status` to it.
    ///
    /// Only entries produced by [`plan`](Self::plan) against the current
    /// status may be committed.
    pub fn commit(&mut self, entry: StateEntry) {
        self.current_status = entry.status;
        self.last_synced_at = Some(entry.timestamp);
        self.updated_at = entry.timestamp;
        self.state_history.push(entry);
    }

    /// The transition function.
    pub fn apply(
        &mut self,
        status: WorkflowStatus,
        message: Option<String>,
        metadata: Metadata,
    ) -> Result<TransitionOutcome, TransitionAnomaly> {
        let from = self.current_status;
        match self.plan(status, message, metadata)? {
            Some(entry) => {
                self.commit(entry);
                Ok(TransitionOutcome::Applied { from, to: status })
            }
            None => Ok(TransitionOutcome::Unchanged),
        }
    }

    /// Append to the error log and bump the retry counter.
    pub fn record_error(&mut self, entry: ErrorEntry) {
        self.updated_at = entry.timestamp;
        self.error_log.push(entry);
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Mark a successful reconciliation that observed no change.
    pub fn touch_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        self.updated_at = at;
    }

    pub fn last_entry(&self) -> Option<&StateEntry> {
        self.state_history.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.current_status.is_terminal()
    }

    /// Check the record-level invariants: non-empty history, current status
    /// matching the last entry, and a monotonic path through the history.
    pub fn is_consistent(&self) -> bool {
        let Some(last) = self.state_history.last() else {
            return false;
        };
        if last.status != self.current_status {
            return false;
        }
        self.state_history
            .windows(2)
            .all(|pair| matches!(Self::check_transition(pair[0].status, pair[1].status), Ok(true)))
    }
}

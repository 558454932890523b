//! Workflow states and their canonical ordering

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// The lifecycle state of a project's verification-and-issuance workflow.
///
/// The happy path is strictly linear. `Rejected` and `Failed` are sinks that
/// can be entered from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Submitted locally, waiting for the verifier to pick it up
    Submitted,
    /// Verifier is validating submitted documents
    Validating,
    /// Waiting for a reviewer to be assigned
    PendingReviewer,
    /// Reviewer is evaluating the project
    ReviewerEvaluating,
    /// Reviewer approved; issuance may proceed
    ReviewerApproved,
    /// Mint submitted to the ledger
    Minting,
    /// Credit issued
    Complete,
    /// Verifier rejected the project
    Rejected,
    /// Unrecoverable failure
    Failed,
}

impl WorkflowStatus {
    /// Every status, in canonical order followed by the sinks.
    pub const ALL: [WorkflowStatus; 9] = [
        Self::Submitted,
        Self::Validating,
        Self::PendingReviewer,
        Self::ReviewerEvaluating,
        Self::ReviewerApproved,
        Self::Minting,
        Self::Complete,
        Self::Rejected,
        Self::Failed,
    ];

    /// Position along the canonical ordering. Sinks have no position.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Submitted => Some(0),
            Self::Validating => Some(1),
            Self::PendingReviewer => Some(2),
            Self::ReviewerEvaluating => Some(3),
            Self::ReviewerApproved => Some(4),
            Self::Minting => Some(5),
            Self::Complete => Some(6),
            Self::Rejected | Self::Failed => None,
        }
    }

    /// Check if this is a terminal (absorbing) state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Failed)
    }

    /// Check if this is one of the failure sinks
    pub fn is_failure_sink(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed)
    }

    /// Statuses the reconciliation poller keeps watching.
    pub fn non_terminal() -> impl Iterator<Item = WorkflowStatus> {
        Self::ALL.into_iter().filter(|s| !s.is_terminal())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Validating => "VALIDATING",
            Self::PendingReviewer => "PENDING_REVIEWER",
            Self::ReviewerEvaluating => "REVIEWER_EVALUATING",
            Self::ReviewerApproved => "REVIEWER_APPROVED",
            Self::Minting => "MINTING",
            Self::Complete => "COMPLETE",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a verifier or database value names no known status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown workflow status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for WorkflowStatus {
    type Err = ParseStatusError;

    /// Accepts the canonical names case-insensitively, with `-`, `_` or
    /// spaces as separators (`pending-reviewer`, `Reviewer Approved`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseStatusError(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(WorkflowStatus::Complete.is_terminal());
        assert!(WorkflowStatus::Rejected.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Minting.is_terminal());
        assert_eq!(WorkflowStatus::non_terminal().count(), 6);
    }

    #[test]
    fn parses_loose_spellings() {
        assert_eq!(
            "pending-reviewer".parse::<WorkflowStatus>().unwrap(),
            WorkflowStatus::PendingReviewer
        );
        assert_eq!(
            "Reviewer Approved".parse::<WorkflowStatus>().unwrap(),
            WorkflowStatus::ReviewerApproved
        );
        assert!("approved-ish".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::ReviewerEvaluating).unwrap();
        assert_eq!(json, "\"REVIEWER_EVALUATING\"");
        for status in WorkflowStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status.as_str());
        }
    }
}

//! Status query surface consumed by the UI/API layer

use crate::{ErrorEntry, StateEntry, WorkflowRecord, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What operators see: the last applied state plus everything that went wrong
/// on the way, so "stuck at X, N consecutive failures" is visible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusView {
    pub workflow_id: String,
    pub project_ref: String,
    pub current_status: WorkflowStatus,
    pub verifier_project_id: Option<String>,
    pub state_history: Vec<StateEntry>,
    pub error_logs: Vec<ErrorEntry>,
    pub retry_count: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<&WorkflowRecord> for WorkflowStatusView {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.id.to_string(),
            project_ref: record.project_ref.to_string(),
            current_status: record.current_status,
            verifier_project_id: record.verifier_project_id.clone(),
            state_history: record.state_history.clone(),
            error_logs: record.error_log.clone(),
            retry_count: record.retry_count,
            last_synced_at: record.last_synced_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProjectProfile, ProjectRef};

    #[test]
    fn view_uses_camel_case_keys() {
        let record = WorkflowRecord::new(
            ProjectRef::new("proj-1"),
            "policy",
            "tag",
            ProjectProfile {
                name: "n".into(),
                category: "c".into(),
                quantity: 1,
                vintage: "2024".into(),
                location: "l".into(),
            },
        );
        let value = serde_json::to_value(WorkflowStatusView::from(&record)).unwrap();
        assert_eq!(value["currentStatus"], "SUBMITTED");
        assert!(value["verifierProjectId"].is_null());
        assert_eq!(value["stateHistory"].as_array().unwrap().len(), 1);
        assert!(value["errorLogs"].as_array().unwrap().is_empty());
        assert!(value.get("lastSyncedAt").is_some());
    }
}

//! Inbound verifier events and outbound engine events

use crate::{Metadata, ProjectRef, WorkflowId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Verifier events ──────────────────────────────────────────────────

/// Event kinds the verifier pushes to the webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifierEventKind {
    StatusChanged,
    Approved,
    Minted,
    Error,
}

impl VerifierEventKind {
    /// Resolve an event name. Returns `None` for kinds this engine ignores.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "status_changed" => Some(Self::StatusChanged),
            "approved" => Some(Self::Approved),
            "minted" => Some(Self::Minted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChanged => "status_changed",
            Self::Approved => "approved",
            Self::Minted => "minted",
            Self::Error => "error",
        }
    }
}

/// Raw `{event, data}` envelope as delivered by the verifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifierEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedData {
    pub project_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedData {
    pub project_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedData {
    pub project_id: String,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub project_id: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A verifier event with its required fields checked.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifierEvent {
    StatusChanged(StatusChangedData),
    Approved(ApprovedData),
    Minted(MintedData),
    Error(ErrorData),
}

impl VerifierEvent {
    /// Decode the `data` object for a known kind.
    pub fn decode(kind: VerifierEventKind, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            VerifierEventKind::StatusChanged => Self::StatusChanged(serde_json::from_value(data)?),
            VerifierEventKind::Approved => Self::Approved(serde_json::from_value(data)?),
            VerifierEventKind::Minted => Self::Minted(serde_json::from_value(data)?),
            VerifierEventKind::Error => Self::Error(serde_json::from_value(data)?),
        })
    }

    pub fn kind(&self) -> VerifierEventKind {
        match self {
            Self::StatusChanged(_) => VerifierEventKind::StatusChanged,
            Self::Approved(_) => VerifierEventKind::Approved,
            Self::Minted(_) => VerifierEventKind::Minted,
            Self::Error(_) => VerifierEventKind::Error,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::StatusChanged(data) => &data.project_id,
            Self::Approved(data) => &data.project_id,
            Self::Minted(data) => &data.project_id,
            Self::Error(data) => &data.project_id,
        }
    }
}

// ── Engine events ────────────────────────────────────────────────────

/// Notifications and UI-facing progress events emitted by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StatusChanged {
        workflow_id: WorkflowId,
        project_ref: ProjectRef,
        from: WorkflowStatus,
        to: WorkflowStatus,
        at: DateTime<Utc>,
    },
    IssuanceProgress {
        workflow_id: WorkflowId,
        project_ref: ProjectRef,
        step: String,
        at: DateTime<Utc>,
    },
    IssuanceCompleted {
        workflow_id: WorkflowId,
        project_ref: ProjectRef,
        token_id: String,
        serial: u64,
        operation_id: String,
        at: DateTime<Utc>,
    },
    BalanceLow {
        account_id: String,
        balance: u64,
        threshold: u64,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::IssuanceProgress { .. } => "issuance_progress",
            Self::IssuanceCompleted { .. } => "issuance_completed",
            Self::BalanceLow { .. } => "balance_low",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_event_names() {
        assert_eq!(
            VerifierEventKind::from_name("status-changed"),
            Some(VerifierEventKind::StatusChanged)
        );
        assert_eq!(
            VerifierEventKind::from_name("MINTED"),
            Some(VerifierEventKind::Minted)
        );
        assert_eq!(VerifierEventKind::from_name("document_uploaded"), None);
    }

    #[test]
    fn decodes_minted_event() {
        let event = VerifierEvent::decode(
            VerifierEventKind::Minted,
            json!({
                "projectId": "vp-9",
                "tokenId": "0.0.777",
                "amount": 250,
                "transactionId": "0.0.1@1700000000.1"
            }),
        )
        .unwrap();

        assert_eq!(event.project_id(), "vp-9");
        match event {
            VerifierEvent::Minted(data) => {
                assert_eq!(data.token_id.as_deref(), Some("0.0.777"));
                assert_eq!(data.amount, Some(json!(250)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn status_changed_requires_status() {
        let result = VerifierEvent::decode(
            VerifierEventKind::StatusChanged,
            json!({ "projectId": "vp-9" }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn engine_events_are_tagged() {
        let event = EngineEvent::BalanceLow {
            account_id: "0.0.1001".into(),
            balance: 5,
            threshold: 10,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "balance_low");
        assert_eq!(event.name(), "balance_low");
    }
}

//! Issued credits: the ledger units produced by the issuance pipeline

use crate::{ProjectRef, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a minted credit. Only `Active` is produced here; later
/// states belong to credit-lifecycle management.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    #[default]
    Active,
    Transferred,
    Retired,
}

impl CreditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Transferred => "transferred",
            Self::Retired => "retired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "transferred" => Some(Self::Transferred),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// A credit minted for an approved project. At most one exists per project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredit {
    pub project_ref: ProjectRef,
    pub workflow_id: WorkflowId,
    /// Token collection the unit was minted into
    pub token_id: String,
    /// Serial number of the minted unit
    pub serial: u64,
    /// Treasury account that owns the unit until transferred
    pub owner_account: String,
    pub certificate_ref: String,
    pub metadata_ref: String,
    /// Ledger operation id of the mint
    pub mint_operation_id: String,
    pub status: CreditStatus,
    pub created_at: DateTime<Utc>,
}

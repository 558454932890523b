//! Certificate and token metadata rendering

use chrono::{DateTime, Utc};
use issuance_types::{WorkflowRecord, WorkflowStatus};
use serde::Serialize;

/// A rendered artifact ready to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Rendering seam for certificates. Implementations may produce PDF or
/// images; the engine only publishes the bytes.
pub trait CertificateRenderer: Send + Sync {
    fn render(&self, record: &WorkflowRecord) -> Result<RenderedArtifact, serde_json::Error>;
}

#[derive(Debug, Serialize)]
struct CertificateDocument<'a> {
    certificate_id: &'a str,
    project_ref: &'a str,
    project_name: &'a str,
    category: &'a str,
    quantity: u64,
    vintage: &'a str,
    location: &'a str,
    policy_id: &'a str,
    verified_at: DateTime<Utc>,
    verification_url: String,
}

/// Renders certificates as JSON documents carrying a verification URL that a
/// printed copy can encode as a scannable code.
#[derive(Debug, Clone)]
pub struct JsonCertificateRenderer {
    verification_base_url: String,
}

impl JsonCertificateRenderer {
    pub fn new(verification_base_url: impl Into<String>) -> Self {
        Self {
            verification_base_url: verification_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn verification_url(&self, record: &WorkflowRecord) -> String {
        format!("{}/verify/{}", self.verification_base_url, record.id)
    }
}

/// Time the reviewer approved the project, falling back to now.
pub fn verification_date(record: &WorkflowRecord) -> DateTime<Utc> {
    record
        .state_history
        .iter()
        .find(|entry| entry.status == WorkflowStatus::ReviewerApproved)
        .map(|entry| entry.timestamp)
        .unwrap_or_else(Utc::now)
}

impl CertificateRenderer for JsonCertificateRenderer {
    fn render(&self, record: &WorkflowRecord) -> Result<RenderedArtifact, serde_json::Error> {
        let document = CertificateDocument {
            certificate_id: record.id.as_str(),
            project_ref: record.project_ref.as_str(),
            project_name: &record.project.name,
            category: &record.project.category,
            quantity: record.project.quantity,
            vintage: &record.project.vintage,
            location: &record.project.location,
            policy_id: &record.policy_id,
            verified_at: verification_date(record),
            verification_url: self.verification_url(record),
        };

        Ok(RenderedArtifact {
            name: format!("certificate-{}.json", record.id.short()),
            content_type: "application/json".to_string(),
            bytes: serde_json::to_vec_pretty(&document)?,
        })
    }
}

/// Canonical token metadata. Field order is fixed so identical inputs
/// serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenMetadata {
    pub category: String,
    pub quantity: u64,
    pub vintage: String,
    pub location: String,
    pub certificate: String,
    pub policy_id: String,
}

impl TokenMetadata {
    pub fn for_record(record: &WorkflowRecord, certificate_ref: &str) -> Self {
        Self {
            category: record.project.category.clone(),
            quantity: record.project.quantity,
            vintage: record.project.vintage.clone(),
            location: record.project.location.clone(),
            certificate: certificate_ref.to_string(),
            policy_id: record.policy_id.clone(),
        }
    }

    pub fn to_artifact(&self, record: &WorkflowRecord) -> Result<RenderedArtifact, serde_json::Error> {
        Ok(RenderedArtifact {
            name: format!("metadata-{}.json", record.id.short()),
            content_type: "application/json".to_string(),
            bytes: serde_json::to_vec(self)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuance_types::{Metadata, ProjectProfile, ProjectRef};

    fn record() -> WorkflowRecord {
        WorkflowRecord::new(
            ProjectRef::new("proj-7"),
            "policy-9",
            "tag",
            ProjectProfile {
                name: "Kelp Forest".into(),
                category: "blue-carbon".into(),
                quantity: 120,
                vintage: "2025".into(),
                location: "Tasmania".into(),
            },
        )
    }

    #[test]
    fn certificate_carries_project_and_verification_url() {
        let mut record = record();
        record
            .apply(WorkflowStatus::ReviewerApproved, None, Metadata::new())
            .unwrap();
        let renderer = JsonCertificateRenderer::new("https://registry.example/");
        let artifact = renderer.render(&record).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&artifact.bytes).unwrap();
        assert_eq!(value["project_name"], "Kelp Forest");
        assert_eq!(value["quantity"], 120);
        assert_eq!(
            value["verification_url"],
            format!("https://registry.example/verify/{}", record.id)
        );
        assert_eq!(
            verification_date(&record),
            record.last_entry().unwrap().timestamp
        );
    }

    #[test]
    fn metadata_serializes_deterministically() {
        let record = record();
        let a = TokenMetadata::for_record(&record, "content://abc")
            .to_artifact(&record)
            .unwrap();
        let b = TokenMetadata::for_record(&record, "content://abc")
            .to_artifact(&record)
            .unwrap();
        assert_eq!(a.bytes, b.bytes);
        let text = String::from_utf8(a.bytes).unwrap();
        assert!(text.starts_with("{\"category\":\"blue-carbon\""));
    }
}

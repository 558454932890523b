//! Webhook ingestion (push path)
//!
//! The verifier signs each delivery with HMAC-SHA256 over the raw body using
//! a shared secret. Authentication happens before the body is parsed; a
//! failed check mutates nothing.

use crate::engine::{TransitionResult, WorkflowEngine};
use crate::error::WebhookError;
use hmac::{Hmac, Mac};
use issuance_types::{
    Metadata, VerifierEnvelope, VerifierEvent, VerifierEventKind, WorkflowId, WorkflowStatus,
};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;

type HmacSha256 = Hmac<Sha256>;

/// Optional prefix on the signature header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Shared webhook secret. `Debug` is redacted.
#[derive(Clone)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self(secret.as_ref().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn mac(&self) -> Result<HmacSha256, WebhookError> {
        // HMAC accepts an empty key; an unset secret must not authenticate anything
        if self.is_empty() {
            return Err(WebhookError::InvalidSecret);
        }
        HmacSha256::new_from_slice(&self.0).map_err(|_| WebhookError::InvalidSecret)
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

/// Hex-encoded HMAC-SHA256 of `body`
pub fn sign_payload(secret: &WebhookSecret, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = secret.mac()?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature header against `body` in constant time
pub fn verify_signature(
    secret: &WebhookSecret,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), WebhookError> {
    let provided = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);
    let expected = hex::decode(provided).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = secret.mac()?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// What an authenticated delivery did. Every variant is acknowledged to the
/// sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied {
        workflow_id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    Unchanged {
        workflow_id: WorkflowId,
    },
    Anomaly {
        workflow_id: WorkflowId,
    },
    /// Event kind this engine does not handle
    UnknownEvent(String),
    /// No local record carries this verifier project id yet
    UnknownProject(String),
    /// A status change naming a status this engine does not know
    UnknownStatus(String),
}

impl From<TransitionResult> for IngestOutcome {
    fn from(result: TransitionResult) -> Self {
        match result {
            TransitionResult::Applied { record, from, to } => Self::Applied {
                workflow_id: record.id,
                from,
                to,
            },
            TransitionResult::Unchanged(record) => Self::Unchanged {
                workflow_id: record.id,
            },
            TransitionResult::Anomaly { record, .. } => Self::Anomaly {
                workflow_id: record.id,
            },
        }
    }
}

/// Authenticates, decodes and applies verifier webhook deliveries.
pub struct WebhookIngestor {
    engine: Arc<WorkflowEngine>,
    secret: WebhookSecret,
    issuance_trigger: Option<mpsc::Sender<()>>,
}

impl WebhookIngestor {
    pub fn new(engine: Arc<WorkflowEngine>, secret: WebhookSecret) -> Self {
        Self {
            engine,
            secret,
            issuance_trigger: None,
        }
    }

    /// Nudge the issuance scanner when a project reaches approval
    pub fn with_issuance_trigger(mut self, trigger: mpsc::Sender<()>) -> Self {
        self.issuance_trigger = Some(trigger);
        self
    }

    /// Handle one delivery: raw body bytes plus the signature header value.
    #[instrument(skip_all)]
    pub async fn ingest(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, WebhookError> {
        if let Err(e) = verify_signature(&self.secret, body, signature) {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            return Err(e);
        }

        let envelope: VerifierEnvelope = serde_json::from_slice(body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let Some(kind) = VerifierEventKind::from_name(&envelope.event) else {
            tracing::info!(event = %envelope.event, "Ignoring unknown webhook event");
            return Ok(IngestOutcome::UnknownEvent(envelope.event));
        };

        let event = VerifierEvent::decode(kind, envelope.data)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let project_id = event.project_id().to_string();
        let Some(record) = self
            .engine
            .store()
            .find_workflow_by_verifier_id(&project_id)
            .await
            .map_err(|e| WebhookError::Engine(e.into()))?
        else {
            tracing::warn!(
                verifier_project_id = %project_id,
                event = kind.as_str(),
                "Webhook for unknown project; poller will converge"
            );
            return Ok(IngestOutcome::UnknownProject(project_id));
        };

        tracing::debug!(
            workflow_id = %record.id,
            event = kind.as_str(),
            "Applying webhook event"
        );

        let result = match event {
            VerifierEvent::StatusChanged(data) => {
                let status = match data.status.parse::<WorkflowStatus>() {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(workflow_id = %record.id, error = %e, "Ignoring status change");
                        return Ok(IngestOutcome::UnknownStatus(data.status));
                    }
                };
                self.engine
                    .transition(&record.id, status, data.message, data.metadata)
                    .await?
            }
            VerifierEvent::Approved(data) => {
                self.engine
                    .transition(
                        &record.id,
                        WorkflowStatus::ReviewerApproved,
                        data.message.or_else(|| Some("Approved by reviewer".into())),
                        data.metadata,
                    )
                    .await?
            }
            VerifierEvent::Minted(data) => {
                let mut metadata = Metadata::new();
                if let Some(token_id) = data.token_id {
                    metadata.insert("tokenId".into(), Value::String(token_id));
                }
                if let Some(amount) = data.amount {
                    metadata.insert("amount".into(), amount);
                }
                if let Some(tx_id) = data.transaction_id {
                    metadata.insert("txId".into(), Value::String(tx_id));
                }
                self.engine
                    .transition(
                        &record.id,
                        WorkflowStatus::Complete,
                        data.message.or_else(|| Some("Minted by verifier".into())),
                        metadata,
                    )
                    .await?
            }
            VerifierEvent::Error(data) => {
                let message = data
                    .error
                    .or(data.message)
                    .unwrap_or_else(|| "verifier reported an error".into());
                self.engine
                    .record_error(&record.id, message.clone(), data.stack_trace)
                    .await?;
                self.engine
                    .transition(&record.id, WorkflowStatus::Failed, Some(message), Metadata::new())
                    .await?
            }
        };

        if let TransitionResult::Applied {
            to: WorkflowStatus::ReviewerApproved,
            ..
        } = &result
        {
            if let Some(trigger) = &self.issuance_trigger {
                let _ = trigger.try_send(());
            }
        }

        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_signature_with_and_without_prefix() {
        let secret = WebhookSecret::new("whsec");
        let body = br#"{"event":"approved","data":{"projectId":"vp-1"}}"#;
        let signature = sign_payload(&secret, body).unwrap();

        assert!(verify_signature(&secret, body, Some(&signature)).is_ok());
        let prefixed = format!("{}{}", SIGNATURE_PREFIX, signature);
        assert!(verify_signature(&secret, body, Some(&prefixed)).is_ok());
    }

    #[test]
    fn rejects_missing_or_mismatched_signature() {
        let secret = WebhookSecret::new("whsec");
        let body = br#"{"event":"approved"}"#;

        assert!(matches!(
            verify_signature(&secret, body, None),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verify_signature(&secret, body, Some("  ")),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verify_signature(&secret, body, Some("not-hex")),
            Err(WebhookError::InvalidSignature)
        ));

        let other = sign_payload(&WebhookSecret::new("other"), body).unwrap();
        assert!(matches!(
            verify_signature(&secret, body, Some(&other)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn any_body_mutation_breaks_signature() {
        let secret = WebhookSecret::new("whsec");
        let body = br#"{"event":"minted","data":{"projectId":"vp-1","amount":10}}"#.to_vec();
        let signature = sign_payload(&secret, &body).unwrap();

        for index in 0..body.len() {
            let mut mutated = body.clone();
            mutated[index] ^= 0x01;
            assert!(verify_signature(&secret, &mutated, Some(&signature)).is_err());
        }
    }

    #[test]
    fn empty_secret_authenticates_nothing() {
        let secret = WebhookSecret::new("");
        assert!(matches!(
            sign_payload(&secret, b"{}"),
            Err(WebhookError::InvalidSecret)
        ));
        assert!(matches!(
            verify_signature(&secret, b"{}", Some("00")),
            Err(WebhookError::InvalidSecret)
        ));
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", WebhookSecret::new("whsec")), "WebhookSecret(***)");
    }
}

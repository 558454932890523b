//! Verifier webhook endpoint

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use issuance_engine::IngestOutcome;
use serde::Serialize;

/// Acknowledgement returned for every authenticated delivery
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receive a signed verifier event.
///
/// The signature covers the raw body, so the body is taken as bytes and only
/// parsed after verification.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(state.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    let outcome = state.ingestor.ingest(&body, signature).await?;
    match &outcome {
        IngestOutcome::Applied { workflow_id, from, to } => {
            tracing::info!(%workflow_id, %from, %to, "Webhook applied");
        }
        other => tracing::debug!(outcome = ?other, "Webhook acknowledged"),
    }

    Ok(Json(WebhookAck { received: true }))
}

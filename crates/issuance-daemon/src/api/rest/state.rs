//! Application state for API handlers

use issuance_engine::{IssuancePipeline, WebhookIngestor, WorkflowEngine};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Workflow engine (store, verifier, notification hub)
    pub engine: Arc<WorkflowEngine>,

    /// Webhook ingestor
    pub ingestor: Arc<WebhookIngestor>,

    /// Issuance pipeline, for manual runs
    pub pipeline: Arc<IssuancePipeline>,

    /// Header carrying the webhook signature
    pub signature_header: String,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        engine: Arc<WorkflowEngine>,
        ingestor: Arc<WebhookIngestor>,
        pipeline: Arc<IssuancePipeline>,
        signature_header: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            ingestor,
            pipeline,
            signature_header: signature_header.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}

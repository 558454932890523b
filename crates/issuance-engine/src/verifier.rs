//! Verifier client
//!
//! Thin HTTP/JSON shim over the external verification service. Every call
//! carries a bounded timeout; transient failures are retried with a linear
//! delay before the error surfaces.

use crate::error::VerifierError;
use async_trait::async_trait;
use issuance_types::{Metadata, ProjectProfile, WorkflowStatus};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Result type for verifier calls
pub type VerifierResult<T> = Result<T, VerifierError>;

/// Retry policy for verifier calls: up to `max_attempts`, sleeping
/// `base_delay * attempt` between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after a failed `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Connection settings for [`HttpVerifierClient`]
#[derive(Clone)]
pub struct VerifierSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for VerifierSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Policy state as reported by the verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub policy_id: String,
    pub status: String,
}

/// Project state as reported by the verifier
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStatus {
    pub project_id: String,
    pub status: WorkflowStatus,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectStatusBody {
    project_id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Project submission payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSubmission {
    pub policy_tag: String,
    pub external_ref: String,
    pub project: ProjectProfile,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionReceipt {
    project_id: String,
}

/// Document attached to a submitted project
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    pub name: String,
    pub content_type: String,
    pub content_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentReceipt {
    document_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintTriggerRequest<'a> {
    token_id: &'a str,
    amount: u64,
}

/// Acknowledgement returned by state-changing verifier calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub accepted: bool,
}

/// Operations the engine needs from the verifier.
#[async_trait]
pub trait VerifierApi: Send + Sync {
    async fn get_policy_status(&self, policy_id: &str) -> VerifierResult<PolicyStatus>;

    async fn get_project_status(
        &self,
        policy_id: &str,
        project_id: &str,
    ) -> VerifierResult<ProjectStatus>;

    /// Returns the verifier-assigned project id
    async fn submit_project(
        &self,
        policy_id: &str,
        submission: &ProjectSubmission,
    ) -> VerifierResult<String>;

    /// Returns the verifier-assigned document id
    async fn upload_document(
        &self,
        project_id: &str,
        document: &DocumentUpload,
    ) -> VerifierResult<String>;

    async fn approve(&self, project_id: &str, comment: Option<&str>) -> VerifierResult<Ack>;

    async fn trigger_mint(&self, project_id: &str, token_id: &str, amount: u64)
        -> VerifierResult<Ack>;
}

/// HTTP client for the verifier
pub struct HttpVerifierClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpVerifierClient {
    /// Create a new verifier client
    pub fn new(settings: VerifierSettings) -> VerifierResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| VerifierError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key,
            retry: settings.retry,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> VerifierResult<T> {
        self.with_retry(path, move || async move {
            let url = format!("{}{}", self.base_url, path);
            let response = self.authorize(self.client.get(&url)).send().await;
            self.handle_response(response).await
        })
        .await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> VerifierResult<T> {
        self.with_retry(path, move || async move {
            let url = format!("{}{}", self.base_url, path);
            let response = self.authorize(self.client.post(&url).json(body)).send().await;
            self.handle_response(response).await
        })
        .await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn with_retry<T, F, Fut>(&self, path: &str, call: F) -> VerifierResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = VerifierResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying verifier call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> VerifierResult<T> {
        let response = response.map_err(Self::transport_error)?;
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| VerifierError::Decode(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(VerifierError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn transport_error(e: reqwest::Error) -> VerifierError {
        if e.is_timeout() {
            VerifierError::Timeout
        } else {
            VerifierError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl VerifierApi for HttpVerifierClient {
    async fn get_policy_status(&self, policy_id: &str) -> VerifierResult<PolicyStatus> {
        self.get(&format!("/policies/{}/status", policy_id)).await
    }

    async fn get_project_status(
        &self,
        policy_id: &str,
        project_id: &str,
    ) -> VerifierResult<ProjectStatus> {
        let body: ProjectStatusBody = self
            .get(&format!("/policies/{}/projects/{}", policy_id, project_id))
            .await?;
        let status = body
            .status
            .parse::<WorkflowStatus>()
            .map_err(|_| VerifierError::UnknownStatus(body.status.clone()))?;
        Ok(ProjectStatus {
            project_id: body.project_id,
            status,
            message: body.message,
        })
    }

    async fn submit_project(
        &self,
        policy_id: &str,
        submission: &ProjectSubmission,
    ) -> VerifierResult<String> {
        let receipt: SubmissionReceipt = self
            .post(&format!("/policies/{}/projects", policy_id), submission)
            .await?;
        Ok(receipt.project_id)
    }

    async fn upload_document(
        &self,
        project_id: &str,
        document: &DocumentUpload,
    ) -> VerifierResult<String> {
        let receipt: DocumentReceipt = self
            .post(&format!("/projects/{}/documents", project_id), document)
            .await?;
        Ok(receipt.document_id)
    }

    async fn approve(&self, project_id: &str, comment: Option<&str>) -> VerifierResult<Ack> {
        self.post(
            &format!("/projects/{}/approve", project_id),
            &ApprovalRequest { comment },
        )
        .await
    }

    async fn trigger_mint(
        &self,
        project_id: &str,
        token_id: &str,
        amount: u64,
    ) -> VerifierResult<Ack> {
        self.post(
            &format!("/projects/{}/mint", project_id),
            &MintTriggerRequest { token_id, amount },
        )
        .await
    }
}

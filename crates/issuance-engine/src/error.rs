//! Error types for the issuance engine

use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g. a non-terminal workflow already exists for the project)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unique record already present (e.g. an issued credit for the project)
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

/// Errors talking to the verification service
#[derive(Debug, Error)]
pub enum VerifierError {
    /// Connection refused, reset, DNS failure
    #[error("verifier network error: {0}")]
    Network(String),

    /// Request exceeded its timeout
    #[error("verifier request timed out")]
    Timeout,

    /// Non-success HTTP status
    #[error("verifier returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("verifier response could not be decoded: {0}")]
    Decode(String),

    /// Verifier reported a status this engine does not know
    #[error("verifier reported unknown status '{0}'")]
    UnknownStatus(String),
}

impl VerifierError {
    /// Transient failures worth retrying: network errors, timeouts, 429 and
    /// 502/503/504. Every other 4xx/5xx surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Decode(_) | Self::UnknownStatus(_) => false,
        }
    }
}

/// Errors returned by the ledger capability
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Ledger refused the signed operation
    #[error("ledger rejected operation: {0}")]
    Rejected(String),

    /// Paying account cannot cover the operation fee
    #[error("insufficient balance on account {account_id}: have {available}, need {required}")]
    InsufficientBalance {
        account_id: String,
        available: u64,
        required: u64,
    },

    /// Token collection does not exist
    #[error("unknown token collection {0}")]
    UnknownToken(String),

    /// Serial does not exist in the collection
    #[error("unknown serial {serial} in token {token_id}")]
    UnknownSerial { token_id: String, serial: u64 },

    /// Submission or receipt retrieval failed in transit
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Receipt did not arrive in time
    #[error("ledger receipt timed out")]
    Timeout,
}

/// Errors publishing to content storage
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content storage unavailable: {0}")]
    Unavailable(String),

    #[error("content storage rejected object '{name}': {reason}")]
    Rejected { name: String, reason: String },
}

/// Errors delivering a notification
#[derive(Debug, Error)]
#[error("notification delivery via {channel} failed: {message}")]
pub struct NotifyError {
    pub channel: &'static str,
    pub message: String,
}

/// Engine-level errors surfaced to callers of the transition and submission APIs
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Verifier error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    /// Compare-and-set kept losing to concurrent writers
    #[error("gave up after {attempts} conflicting updates to workflow {workflow_id}")]
    ContentionExhausted { workflow_id: String, attempts: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Webhook ingestion errors. Only authentication and decoding failures are
/// reported to the sender; anomalies and unknown events are acknowledged.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("webhook signature mismatch")]
    InvalidSignature,

    #[error("webhook secret is unusable")]
    InvalidSecret,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl WebhookError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::MissingSignature | Self::InvalidSignature)
    }
}

/// Issuance pipeline steps, used to tag failures so an operator knows where a
/// run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssuanceStep {
    ResolveTreasury,
    RenderCertificate,
    PublishCertificate,
    PublishMetadata,
    Mint,
    PersistCredit,
    CountMint,
    Finalize,
}

impl IssuanceStep {
    pub fn number(self) -> u8 {
        match self {
            Self::ResolveTreasury => 1,
            Self::RenderCertificate => 2,
            Self::PublishCertificate => 3,
            Self::PublishMetadata => 4,
            Self::Mint => 5,
            Self::PersistCredit => 6,
            Self::CountMint => 7,
            Self::Finalize => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ResolveTreasury => "resolve_treasury",
            Self::RenderCertificate => "render_certificate",
            Self::PublishCertificate => "publish_certificate",
            Self::PublishMetadata => "publish_metadata",
            Self::Mint => "mint",
            Self::PersistCredit => "persist_credit",
            Self::CountMint => "count_mint",
            Self::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for IssuanceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({})", self.number(), self.name())
    }
}

/// A pipeline run that stopped at a specific step.
#[derive(Clone, Debug, Error)]
#[error("issuance {step} failed: {message}")]
pub struct PipelineError {
    pub step: IssuanceStep,
    pub message: String,
}

impl PipelineError {
    pub fn new(step: IssuanceStep, err: impl std::fmt::Display) -> Self {
        Self {
            step,
            message: err.to_string(),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

//! Verification-and-issuance reconciliation engine.
//!
//! Keeps local workflow records consistent with an external verifier
//! (webhook push and polling pull) and mints one ledger credit per approved
//! project.
//!
//! ```text
//! verifier ──webhook──▶ WebhookIngestor ─┐
//!          ◀──poll──── ReconciliationPoller ─┤
//!                                        ▼
//!                              WorkflowEngine::transition ──▶ NotificationHub
//!                                        │
//!                         REVIEWER_APPROVED
//!                                        ▼
//!                              IssuancePipeline ──▶ ContentStore, LedgerClient
//!
//!                              BalanceGuard ──▶ LedgerClient (balances)
//! ```

#![deny(unsafe_code)]

pub mod balance_guard;
pub mod certificate;
pub mod content;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod notify;
pub mod pipeline;
pub mod poller;
pub mod scheduler;
pub mod storage;
pub mod treasury;
pub mod verifier;
pub mod webhook;

pub use balance_guard::{BalanceCheck, BalanceGuard};
pub use certificate::{CertificateRenderer, JsonCertificateRenderer, TokenMetadata};
pub use content::{ContentStore, InMemoryContentStore};
pub use engine::{SubmitProject, TransitionResult, WorkflowEngine};
pub use error::{
    ContentError, EngineError, EngineResult, IssuanceStep, LedgerError, NotifyError,
    PipelineError, StorageError, VerifierError, WebhookError,
};
pub use ledger::{CollectionSpec, LedgerClient, MintReceipt, SimulatedLedger};
pub use notify::{LogNotifier, NotificationHub, Notifier};
pub use pipeline::{IssuanceOutcome, IssuancePipeline, PipelineSettings, ScanReport};
pub use poller::{PollReport, ReconciliationPoller};
pub use scheduler::{spawn_periodic, JobHandle, PeriodicJob};
pub use storage::{InMemoryStore, PostgresStore, Store};
pub use treasury::TreasuryProvisioner;
pub use verifier::{HttpVerifierClient, RetryPolicy, VerifierApi, VerifierSettings};
pub use webhook::{sign_payload, verify_signature, IngestOutcome, WebhookIngestor, WebhookSecret};

//! Domain types for verification-gated credit issuance.
//!
//! A project moves through an external verifier's review stages and, once
//! approved, is tokenized exactly once on an external ledger. This crate holds
//! the records that track that journey:
//!
//! - [`WorkflowRecord`]: one state machine instance per project, with an
//!   append-only history and an error log
//! - [`IssuedCredit`]: the minted unit produced by the issuance pipeline
//! - [`TreasuryAccount`]: the signing/paying ledger account and its collections
//! - [`VerifierEvent`]: inbound verifier notifications as a tagged union
//! - [`EngineEvent`]: outbound notifications and progress events
//!
//! The transition function lives on [`WorkflowRecord`]: it is idempotent under
//! replay of the current status, monotonic along the canonical ordering, and
//! treats `COMPLETE`, `REJECTED` and `FAILED` as absorbing.

#![deny(unsafe_code)]

pub mod credit;
pub mod event;
pub mod ids;
pub mod status;
pub mod treasury;
pub mod view;
pub mod workflow;

pub use credit::{CreditStatus, IssuedCredit};
pub use event::{
    ApprovedData, EngineEvent, ErrorData, MintedData, StatusChangedData, VerifierEnvelope,
    VerifierEvent, VerifierEventKind,
};
pub use ids::{ProjectRef, WorkflowId};
pub use status::{ParseStatusError, WorkflowStatus};
pub use treasury::{BalanceSnapshot, CollectionBinding, SigningKey, TreasuryAccount};
pub use view::WorkflowStatusView;
pub use workflow::{
    ErrorEntry, IssuanceProgress, Metadata, MintedUnit, ProjectProfile, StateEntry,
    TransitionAnomaly, TransitionOutcome, WorkflowRecord,
};

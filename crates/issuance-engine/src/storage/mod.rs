//! Storage layer for the issuance engine
//!
//! Persists workflow records, issued credits and treasury accounts.

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{CasOutcome, CreditStore, Store, StorageResult, TreasuryStore, WorkflowStore};

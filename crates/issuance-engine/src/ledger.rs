//! Ledger client
//!
//! The engine only needs "submit signed operation, get receipt or error".
//! [`LedgerClient`] is that seam; [`SimulatedLedger`] is an in-process
//! ledger with fault injection used by the daemon's local mode and the tests.

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::Utc;
use issuance_types::SigningKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Result type for ledger calls
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Largest metadata payload a mint accepts
pub const MAX_METADATA_BYTES: usize = 100;

/// Parameters for a new token collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub symbol: String,
    /// Account that pays for, signs and initially owns minted units
    pub treasury_account: String,
    /// Royalty on secondary transfers, in basis points
    pub royalty_bps: u16,
}

/// Receipt for a successful mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub serial: u64,
    pub operation_id: String,
}

/// Operations the engine submits to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Create a token collection; returns its token id
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        signing_key: &SigningKey,
    ) -> LedgerResult<String>;

    /// Mint one unit carrying `metadata`
    async fn mint(
        &self,
        token_id: &str,
        signing_key: &SigningKey,
        metadata: &[u8],
    ) -> LedgerResult<MintReceipt>;

    /// Move a unit between accounts; returns the operation id
    async fn transfer(
        &self,
        token_id: &str,
        serial: u64,
        from: &str,
        to: &str,
        signing_key: &SigningKey,
    ) -> LedgerResult<String>;

    /// Destroy a unit; returns the operation id
    async fn burn(&self, token_id: &str, serial: u64, signing_key: &SigningKey)
        -> LedgerResult<String>;

    /// Current balance of an account, in the ledger's smallest unit
    async fn account_balance(&self, account_id: &str) -> LedgerResult<u64>;
}

#[derive(Debug)]
struct SimCollection {
    treasury_account: String,
    next_serial: u64,
    owners: BTreeMap<u64, String>,
    metadata: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Default)]
struct SimState {
    collections: HashMap<String, SimCollection>,
    balances: HashMap<String, u64>,
    next_token: u64,
}

/// In-process ledger.
///
/// Every operation charges `fee` to the paying account. Faults can be queued
/// with [`fail_next_mints`](Self::fail_next_mints) and a fixed latency can be
/// set to exercise timeouts.
#[derive(Debug)]
pub struct SimulatedLedger {
    state: Mutex<SimState>,
    fee: u64,
    latency: Duration,
    pending_mint_failures: AtomicU32,
    mint_calls: AtomicU64,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedLedger {
    /// Create a ledger charging `fee` per operation
    pub fn new(fee: u64) -> Self {
        Self {
            state: Mutex::new(SimState {
                next_token: 1000,
                ..SimState::default()
            }),
            fee,
            latency: Duration::ZERO,
            pending_mint_failures: AtomicU32::new(0),
            mint_calls: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fund an account
    pub async fn set_balance(&self, account_id: &str, amount: u64) {
        let mut state = self.state.lock().await;
        state.balances.insert(account_id.to_string(), amount);
    }

    /// Make the next `count` mints fail with `Unavailable`
    pub fn fail_next_mints(&self, count: u32) {
        self.pending_mint_failures.store(count, Ordering::SeqCst);
    }

    /// Number of mint submissions seen, including failed ones
    pub fn mint_calls(&self) -> u64 {
        self.mint_calls.load(Ordering::SeqCst)
    }

    /// Units minted into a collection so far
    pub async fn minted_units(&self, token_id: &str) -> usize {
        let state = self.state.lock().await;
        state
            .collections
            .get(token_id)
            .map(|c| c.metadata.len())
            .unwrap_or(0)
    }

    /// Metadata recorded for a unit
    pub async fn unit_metadata(&self, token_id: &str, serial: u64) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .collections
            .get(token_id)
            .and_then(|c| c.metadata.get(&serial).cloned())
    }

    /// Owner of a unit
    pub async fn owner_of(&self, token_id: &str, serial: u64) -> Option<String> {
        let state = self.state.lock().await;
        state
            .collections
            .get(token_id)
            .and_then(|c| c.owners.get(&serial).cloned())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn check_key(signing_key: &SigningKey) -> LedgerResult<()> {
        if signing_key.is_empty() {
            return Err(LedgerError::Rejected("INVALID_SIGNATURE".into()));
        }
        Ok(())
    }

    fn charge(&self, state: &mut SimState, account_id: &str) -> LedgerResult<()> {
        let balance = state.balances.entry(account_id.to_string()).or_insert(0);
        if *balance < self.fee {
            return Err(LedgerError::InsufficientBalance {
                account_id: account_id.to_string(),
                available: *balance,
                required: self.fee,
            });
        }
        *balance -= self.fee;
        Ok(())
    }

    fn operation_id(account_id: &str) -> String {
        let now = Utc::now();
        format!(
            "{}@{}.{:09}",
            account_id,
            now.timestamp(),
            now.timestamp_subsec_nanos()
        )
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.simulate_latency().await;
        Self::check_key(signing_key)?;
        if spec.royalty_bps > 10_000 {
            return Err(LedgerError::Rejected("ROYALTY_FRACTION_TOO_LARGE".into()));
        }

        let mut state = self.state.lock().await;
        self.charge(&mut state, &spec.treasury_account)?;
        state.next_token += 1;
        let token_id = format!("0.0.{}", state.next_token);
        state.collections.insert(
            token_id.clone(),
            SimCollection {
                treasury_account: spec.treasury_account.clone(),
                next_serial: 1,
                owners: BTreeMap::new(),
                metadata: BTreeMap::new(),
            },
        );
        Ok(token_id)
    }

    async fn mint(
        &self,
        token_id: &str,
        signing_key: &SigningKey,
        metadata: &[u8],
    ) -> LedgerResult<MintReceipt> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let injected = self
            .pending_mint_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Unavailable("simulated mint failure".into()));
        }

        Self::check_key(signing_key)?;
        if metadata.len() > MAX_METADATA_BYTES {
            return Err(LedgerError::Rejected("METADATA_TOO_LONG".into()));
        }

        let mut state = self.state.lock().await;
        let treasury = state
            .collections
            .get(token_id)
            .map(|c| c.treasury_account.clone())
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))?;
        self.charge(&mut state, &treasury)?;

        let collection = state
            .collections
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))?;
        let serial = collection.next_serial;
        collection.next_serial += 1;
        collection.owners.insert(serial, treasury.clone());
        collection.metadata.insert(serial, metadata.to_vec());

        Ok(MintReceipt {
            serial,
            operation_id: Self::operation_id(&treasury),
        })
    }

    async fn transfer(
        &self,
        token_id: &str,
        serial: u64,
        from: &str,
        to: &str,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.simulate_latency().await;
        Self::check_key(signing_key)?;

        let mut state = self.state.lock().await;
        let owner = state
            .collections
            .get(token_id)
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))?
            .owners
            .get(&serial)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownSerial {
                token_id: token_id.to_string(),
                serial,
            })?;
        if owner != from {
            return Err(LedgerError::Rejected("SENDER_DOES_NOT_OWN_NFT_SERIAL_NO".into()));
        }
        self.charge(&mut state, from)?;

        if let Some(collection) = state.collections.get_mut(token_id) {
            collection.owners.insert(serial, to.to_string());
        }
        Ok(Self::operation_id(from))
    }

    async fn burn(
        &self,
        token_id: &str,
        serial: u64,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.simulate_latency().await;
        Self::check_key(signing_key)?;

        let mut state = self.state.lock().await;
        let treasury = state
            .collections
            .get(token_id)
            .map(|c| c.treasury_account.clone())
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))?;
        self.charge(&mut state, &treasury)?;

        let collection = state
            .collections
            .get_mut(token_id)
            .ok_or_else(|| LedgerError::UnknownToken(token_id.to_string()))?;
        if collection.owners.remove(&serial).is_none() {
            return Err(LedgerError::UnknownSerial {
                token_id: token_id.to_string(),
                serial,
            });
        }
        collection.metadata.remove(&serial);
        Ok(Self::operation_id(&treasury))
    }

    async fn account_balance(&self, account_id: &str) -> LedgerResult<u64> {
        self.simulate_latency().await;
        let state = self.state.lock().await;
        Ok(state.balances.get(account_id).copied().unwrap_or(0))
    }
}

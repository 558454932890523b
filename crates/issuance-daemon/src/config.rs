//! Configuration for issuanced

use issuance_engine::balance_guard::DEFAULT_BALANCE_INTERVAL_SECS;
use issuance_engine::poller::{DEFAULT_POLL_BATCH, DEFAULT_POLL_INTERVAL_SECS};
use issuance_engine::treasury::DEFAULT_ROYALTY_BPS;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Verifier client configuration
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Inbound webhook configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Periodic job configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Certificate rendering
    #[serde(default)]
    pub certificate: CertificateConfig,

    /// Bundled simulated ledger
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Treasury accounts provisioned at startup
    #[serde(default)]
    pub treasury: Vec<TreasuryConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
            max_body_size: default_max_body_size(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Verifier client configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Base URL of the verifier API
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Attempts per call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff step in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api/v1".to_string(),
            api_key: None,
            timeout_secs: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

impl std::fmt::Debug for VerifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .finish()
    }
}

/// Inbound webhook configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Deliveries are refused while it is empty.
    #[serde(default)]
    pub secret: String,

    /// Header carrying the signature
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signature_header: default_signature_header(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"***")
            .field("signature_header", &self.signature_header)
            .finish()
    }
}

/// Periodic job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reconciliation poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Records examined per poll
    #[serde(default = "default_poll_batch")]
    pub poll_batch_size: usize,

    /// Issuance scan interval in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Workflows processed per scan
    #[serde(default = "default_scan_batch")]
    pub scan_batch_size: usize,

    /// Balance check interval in seconds
    #[serde(default = "default_balance_interval")]
    pub balance_interval_secs: u64,

    /// Bound on each ledger and content storage call, in seconds
    #[serde(default = "default_request_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_batch_size: default_poll_batch(),
            scan_interval_secs: default_scan_interval(),
            scan_batch_size: default_scan_batch(),
            balance_interval_secs: default_balance_interval(),
            call_timeout_secs: default_request_timeout(),
        }
    }
}

/// Certificate rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// Base of the public verification URL printed on certificates
    pub verification_base_url: String,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            verification_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Bundled simulated ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Fee charged per operation
    #[serde(default = "default_ledger_fee")]
    pub fee: u64,

    /// Balance credited to each configured treasury account at startup
    #[serde(default = "default_opening_balance")]
    pub opening_balance: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee: default_ledger_fee(),
            opening_balance: default_opening_balance(),
        }
    }
}

/// A treasury account and the categories it mints for
#[derive(Clone, Serialize, Deserialize)]
pub struct TreasuryConfig {
    pub account_id: String,
    pub signing_key: String,
    /// Balance under which an alert is raised
    #[serde(default)]
    pub alert_threshold: u64,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

impl std::fmt::Debug for TreasuryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreasuryConfig")
            .field("account_id", &self.account_id)
            .field("signing_key", &"***")
            .field("alert_threshold", &self.alert_threshold)
            .field("collections", &self.collections)
            .finish()
    }
}

/// Token collection for one project category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub category: String,
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_royalty_bps")]
    pub royalty_bps: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_signature_header() -> String {
    "x-verifier-signature".to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_poll_batch() -> usize {
    DEFAULT_POLL_BATCH
}

fn default_scan_interval() -> u64 {
    60
}

fn default_scan_batch() -> usize {
    10
}

fn default_balance_interval() -> u64 {
    DEFAULT_BALANCE_INTERVAL_SECS
}

fn default_ledger_fee() -> u64 {
    1
}

fn default_opening_balance() -> u64 {
    10_000
}

fn default_royalty_bps() -> u16 {
    DEFAULT_ROYALTY_BPS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `ISSUANCE_`-prefixed environment variables
    /// (`ISSUANCE_WEBHOOK__SECRET`, `ISSUANCE_SCHEDULER__POLL_INTERVAL_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ISSUANCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.webhook.signature_header, "x-verifier-signature");
        assert!(config.treasury.is_empty());
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.balance_interval_secs, 3600);
        assert_eq!(config.scan_batch_size, 10);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = DaemonConfig {
            webhook: WebhookConfig {
                secret: "whsec_live".into(),
                ..WebhookConfig::default()
            },
            treasury: vec![TreasuryConfig {
                account_id: "0.0.1001".into(),
                signing_key: "302e0201".into(),
                alert_threshold: 10,
                collections: Vec::new(),
            }],
            ..DaemonConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("whsec_live"));
        assert!(!debug.contains("302e0201"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.scheduler.scan_interval_secs, 60);
        assert_eq!(config.verifier.retry_attempts, 3);
    }
}

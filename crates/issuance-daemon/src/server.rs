//! Server setup and lifecycle management

use crate::api::{create_router, AppState, RouterOptions};
use crate::config::{DaemonConfig, StorageConfig, TreasuryConfig};
use crate::error::{DaemonError, DaemonResult};
use issuance_engine::{
    spawn_periodic, BalanceGuard, HttpVerifierClient, InMemoryContentStore, InMemoryStore,
    IssuancePipeline, JobHandle, JsonCertificateRenderer, LogNotifier, NotificationHub,
    PipelineSettings, PostgresStore, ReconciliationPoller, RetryPolicy, SimulatedLedger, Store,
    TreasuryProvisioner, VerifierSettings, WebhookIngestor, WebhookSecret, WorkflowEngine,
};
use issuance_types::{SigningKey, TreasuryAccount};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Issuance daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    poller: Arc<ReconciliationPoller>,
    guard: Arc<BalanceGuard>,
    scan_trigger: mpsc::Receiver<()>,
}

impl Server {
    /// Build every component from configuration and provision treasuries
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        if config.webhook.secret.is_empty() {
            tracing::warn!("Webhook secret is empty; all webhook deliveries will be rejected");
        }

        let store = open_store(&config.storage).await?;

        let verifier = Arc::new(HttpVerifierClient::new(VerifierSettings {
            base_url: config.verifier.base_url.clone(),
            api_key: config.verifier.api_key.clone(),
            timeout: Duration::from_secs(config.verifier.timeout_secs),
            retry: RetryPolicy {
                max_attempts: config.verifier.retry_attempts.max(1),
                base_delay: Duration::from_millis(config.verifier.retry_base_delay_ms),
            },
        })?);

        let hub = NotificationHub::default().with_notifier(Arc::new(LogNotifier));
        let engine = Arc::new(WorkflowEngine::new(store.clone(), verifier, hub.clone()));

        let ledger = Arc::new(SimulatedLedger::new(config.ledger.fee));
        provision_treasuries(&config.treasury, config.ledger.opening_balance, &store, &ledger)
            .await?;

        let call_timeout = Duration::from_secs(config.scheduler.call_timeout_secs);
        let pipeline = Arc::new(IssuancePipeline::new(
            engine.clone(),
            ledger.clone(),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(JsonCertificateRenderer::new(
                config.certificate.verification_base_url.clone(),
            )),
            PipelineSettings {
                batch_size: config.scheduler.scan_batch_size,
                call_timeout,
            },
        ));

        // Approvals from either ingestion path nudge the scanner
        let (trigger_tx, scan_trigger) = mpsc::channel(1);
        let ingestor = Arc::new(
            WebhookIngestor::new(engine.clone(), WebhookSecret::new(&config.webhook.secret))
                .with_issuance_trigger(trigger_tx.clone()),
        );
        let poller = Arc::new(
            ReconciliationPoller::new(engine.clone(), config.scheduler.poll_batch_size)
                .with_issuance_trigger(trigger_tx),
        );
        let guard = Arc::new(BalanceGuard::new(store, ledger, hub, call_timeout));

        let state = AppState::new(
            engine,
            ingestor,
            pipeline,
            config.webhook.signature_header.clone(),
        );

        Ok(Self {
            config,
            state,
            poller,
            guard,
            scan_trigger,
        })
    }

    /// Run the server until ctrl-c or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let scheduler = &self.config.scheduler;

        let jobs: Vec<JobHandle> = vec![
            spawn_periodic(
                self.poller.clone(),
                Duration::from_secs(scheduler.poll_interval_secs.max(1)),
                None,
            ),
            spawn_periodic(
                self.state.pipeline.clone(),
                Duration::from_secs(scheduler.scan_interval_secs.max(1)),
                Some(self.scan_trigger),
            ),
            spawn_periodic(
                self.guard.clone(),
                Duration::from_secs(scheduler.balance_interval_secs.max(1)),
                None,
            ),
        ];

        let app = create_router(
            self.state,
            RouterOptions {
                enable_cors: self.config.server.enable_cors,
                max_body_size: self.config.server.max_body_size,
            },
        );

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Issuance daemon listening on {}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("Issuance daemon shutting down");
        for job in jobs {
            job.stop().await;
        }

        served
    }
}

async fn open_store(config: &StorageConfig) -> DaemonResult<Arc<dyn Store>> {
    match config {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            tracing::info!(max_connections, "Using PostgreSQL storage");
            let store = PostgresStore::new(url, *max_connections, *connect_timeout_secs).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Register configured accounts, fund them on the simulated ledger and make
/// sure each declared category has a collection.
async fn provision_treasuries(
    accounts: &[TreasuryConfig],
    opening_balance: u64,
    store: &Arc<dyn Store>,
    ledger: &Arc<SimulatedLedger>,
) -> DaemonResult<()> {
    let provisioner = TreasuryProvisioner::new(store.clone(), ledger.clone());

    for account in accounts {
        if account.signing_key.is_empty() {
            return Err(DaemonError::Config(format!(
                "treasury account {} has no signing key",
                account.account_id
            )));
        }
        ledger.set_balance(&account.account_id, opening_balance).await;
        provisioner
            .register(TreasuryAccount::new(
                account.account_id.clone(),
                SigningKey::new(account.signing_key.clone()),
                account.alert_threshold,
            ))
            .await?;

        for collection in &account.collections {
            provisioner
                .ensure_collection(
                    &account.account_id,
                    &collection.category,
                    &collection.name,
                    &collection.symbol,
                    collection.royalty_bps,
                )
                .await?;
        }
    }

    if accounts.is_empty() {
        tracing::warn!("No treasury accounts configured; approved projects will fail issuance");
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

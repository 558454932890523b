mod common;

use async_trait::async_trait;
use common::{Harness, CATEGORY, TREASURY};
use issuance_engine::content::StoredObject;
use issuance_engine::error::IssuanceStep;
use issuance_engine::ledger::LedgerResult;
use issuance_engine::storage::{CreditStore, WorkflowStore};
use issuance_engine::{
    CollectionSpec, ContentError, ContentStore, InMemoryContentStore, IssuanceOutcome,
    IssuancePipeline, JsonCertificateRenderer, LedgerClient, MintReceipt, PipelineSettings,
    SimulatedLedger, WorkflowEngine,
};
use issuance_types::{
    CreditStatus, EngineEvent, IssuanceProgress, IssuedCredit, Metadata, MintedUnit, SigningKey,
    WorkflowId, WorkflowStatus,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Moves the workflow to `REJECTED` the first time it is called, the way a
/// verifier webhook landing mid-run would.
struct Rejecter {
    engine: Arc<WorkflowEngine>,
    workflow_id: WorkflowId,
    fired: AtomicBool,
}

impl Rejecter {
    fn new(engine: Arc<WorkflowEngine>, workflow_id: WorkflowId) -> Self {
        Self {
            engine,
            workflow_id,
            fired: AtomicBool::new(false),
        }
    }

    async fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.engine
                .transition(
                    &self.workflow_id,
                    WorkflowStatus::Rejected,
                    Some("rejected by reviewer".into()),
                    Metadata::new(),
                )
                .await
                .unwrap();
        }
    }
}

struct RejectingContent {
    inner: InMemoryContentStore,
    rejecter: Rejecter,
}

#[async_trait]
impl ContentStore for RejectingContent {
    async fn publish(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ContentError> {
        self.rejecter.fire().await;
        self.inner.publish(name, content_type, bytes).await
    }

    async fn fetch(&self, content_ref: &str) -> Result<Option<StoredObject>, ContentError> {
        self.inner.fetch(content_ref).await
    }
}

struct RejectingLedger {
    inner: Arc<SimulatedLedger>,
    rejecter: Rejecter,
}

#[async_trait]
impl LedgerClient for RejectingLedger {
    async fn create_collection(
        &self,
        spec: &CollectionSpec,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.inner.create_collection(spec, signing_key).await
    }

    async fn mint(
        &self,
        token_id: &str,
        signing_key: &SigningKey,
        metadata: &[u8],
    ) -> LedgerResult<MintReceipt> {
        self.rejecter.fire().await;
        self.inner.mint(token_id, signing_key, metadata).await
    }

    async fn transfer(
        &self,
        token_id: &str,
        serial: u64,
        from: &str,
        to: &str,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.inner
            .transfer(token_id, serial, from, to, signing_key)
            .await
    }

    async fn burn(
        &self,
        token_id: &str,
        serial: u64,
        signing_key: &SigningKey,
    ) -> LedgerResult<String> {
        self.inner.burn(token_id, serial, signing_key).await
    }

    async fn account_balance(&self, account_id: &str) -> LedgerResult<u64> {
        self.inner.account_balance(account_id).await
    }
}

fn pipeline_with(
    h: &Harness,
    ledger: Arc<dyn LedgerClient>,
    content: Arc<dyn ContentStore>,
) -> IssuancePipeline {
    IssuancePipeline::new(
        h.engine.clone(),
        ledger,
        content,
        Arc::new(JsonCertificateRenderer::new("https://registry.test")),
        PipelineSettings::default(),
    )
}

#[tokio::test]
async fn approved_project_is_issued_once() {
    let h = Harness::new().await;
    let mut events = h.hub.subscribe();
    let record = h.approved("proj-300").await;

    let report = h.pipeline.scan_once().await.unwrap();
    assert_eq!(report.issued, 1);

    let stored = h.reload(&record).await;
    assert_eq!(stored.current_status, WorkflowStatus::Complete);
    let tail: Vec<_> = stored
        .state_history
        .iter()
        .rev()
        .take(2)
        .map(|e| e.status)
        .collect();
    assert_eq!(tail, vec![WorkflowStatus::Complete, WorkflowStatus::Minting]);

    let credit = h
        .store
        .find_credit_by_project(&record.project_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit.token_id, h.token_id);
    assert_eq!(credit.serial, 1);
    assert_eq!(credit.owner_account, TREASURY);
    assert_eq!(credit.status, CreditStatus::Active);
    assert_eq!(
        stored.last_entry().unwrap().metadata["tokenId"],
        json!(h.token_id.clone())
    );
    assert_eq!(
        stored.last_entry().unwrap().metadata["operationId"],
        json!(credit.mint_operation_id.clone())
    );

    // Ledger metadata is the published metadata reference
    let on_ledger = h.ledger.unit_metadata(&h.token_id, credit.serial).await.unwrap();
    assert_eq!(on_ledger, credit.metadata_ref.as_bytes());
    assert_eq!(h.ledger.owner_of(&h.token_id, 1).await.as_deref(), Some(TREASURY));
    assert_eq!(h.minted_count().await, 1);
    assert_eq!(h.content.len().await, 2);

    // Nothing eligible on the next scan
    let report = h.pipeline.scan_once().await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(h.ledger.mint_calls(), 1);

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::IssuanceCompleted { serial, .. } = event {
            assert_eq!(serial, 1);
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn concurrent_scans_mint_exactly_once() {
    let h = Harness::new().await;
    let record = h.approved("proj-301").await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pipeline = h.pipeline.clone();
        tasks.push(tokio::spawn(async move { pipeline.scan_once().await }));
    }
    let mut issued = 0;
    for task in tasks {
        issued += task.await.unwrap().unwrap().issued;
    }

    assert_eq!(issued, 1);
    assert_eq!(h.ledger.mint_calls(), 1);
    assert_eq!(h.ledger.minted_units(&h.token_id).await, 1);
    assert_eq!(h.store.list_credits().await.unwrap().len(), 1);
    assert_eq!(h.minted_count().await, 1);
    assert_eq!(h.reload(&record).await.current_status, WorkflowStatus::Complete);
}

#[tokio::test]
async fn mint_failure_resumes_without_republishing() {
    let h = Harness::new().await;
    let record = h.approved("proj-302").await;
    h.ledger.fail_next_mints(1);

    let outcome = h.pipeline.process(&record.id).await.unwrap();
    match outcome {
        IssuanceOutcome::Stopped(err) => assert_eq!(err.step, IssuanceStep::Mint),
        other => panic!("unexpected outcome {:?}", other),
    }

    let stopped = h.reload(&record).await;
    assert_eq!(stopped.current_status, WorkflowStatus::ReviewerApproved);
    assert_eq!(stopped.retry_count, 1);
    assert!(stopped.error_log[0].message.contains("step 5 (mint)"));
    assert!(stopped.issuance_progress.metadata_ref.is_some());
    let published = h.content.publish_calls();
    assert_eq!(published, 2);

    let outcome = h.pipeline.process(&record.id).await.unwrap();
    assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
    assert_eq!(h.content.publish_calls(), published);
    assert_eq!(h.ledger.mint_calls(), 2);
    assert_eq!(h.ledger.minted_units(&h.token_id).await, 1);
    assert_eq!(h.reload(&record).await.current_status, WorkflowStatus::Complete);
}

#[tokio::test]
async fn content_outage_leaves_workflow_resumable() {
    let h = Harness::new().await;
    let record = h.approved("proj-303").await;
    h.content.fail_next_publishes(1);

    let report = h.pipeline.scan_once().await.unwrap();
    assert_eq!(report.stopped, 1);
    let stored = h.reload(&record).await;
    assert_eq!(stored.current_status, WorkflowStatus::ReviewerApproved);
    assert!(stored.error_log[0].message.contains("publish_certificate"));
    assert_eq!(h.ledger.mint_calls(), 0);

    let report = h.pipeline.scan_once().await.unwrap();
    assert_eq!(report.issued, 1);
}

#[tokio::test]
async fn existing_credit_is_finalized_without_minting() {
    let h = Harness::new().await;
    let record = h.approved("proj-304").await;

    // A prior run minted and persisted, then died after the MINTING transition
    h.store
        .insert_credit(IssuedCredit {
            project_ref: record.project_ref.clone(),
            workflow_id: record.id.clone(),
            token_id: h.token_id.clone(),
            serial: 42,
            owner_account: TREASURY.into(),
            certificate_ref: "content://cert".into(),
            metadata_ref: "content://meta".into(),
            mint_operation_id: "0.0.1001@1700000000.000000042".into(),
            status: CreditStatus::Active,
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    h.store
        .record_progress(
            &record.id,
            IssuanceProgress {
                certificate_ref: Some("content://cert".into()),
                metadata_ref: Some("content://meta".into()),
                minted: None,
            },
        )
        .await
        .unwrap();
    h.engine
        .transition(&record.id, WorkflowStatus::Minting, None, Metadata::new())
        .await
        .unwrap();

    let report = h.pipeline.scan_once().await.unwrap();
    assert_eq!(report.issued, 1);
    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(h.content.publish_calls(), 0);

    let stored = h.reload(&record).await;
    assert_eq!(stored.current_status, WorkflowStatus::Complete);
    assert_eq!(stored.last_entry().unwrap().metadata["serial"], json!(42));
}

#[tokio::test]
async fn missing_treasury_fails_workflow() {
    let h = Harness::new().await;
    let record = h.submit_in("proj-305", "blue-carbon").await;
    h.engine
        .transition(&record.id, WorkflowStatus::ReviewerApproved, None, Metadata::new())
        .await
        .unwrap();

    let outcome = h.pipeline.process(&record.id).await.unwrap();
    assert!(matches!(outcome, IssuanceOutcome::Unconfigured));

    let stored = h.reload(&record).await;
    assert_eq!(stored.current_status, WorkflowStatus::Failed);
    assert!(stored.error_log[0].message.contains("blue-carbon"));
    assert_eq!(h.ledger.mint_calls(), 0);
    assert!(h
        .store
        .find_credit_by_project(&record.project_ref)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn ineligible_workflow_is_skipped() {
    let h = Harness::new().await;
    let record = h.submit("proj-306").await;

    let outcome = h.pipeline.process(&record.id).await.unwrap();
    assert!(matches!(outcome, IssuanceOutcome::Skipped));
    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(
        h.store.get_workflow(&record.id).await.unwrap().unwrap().project.category,
        CATEGORY
    );
}

#[tokio::test]
async fn rejection_during_publish_prevents_mint() {
    let h = Harness::new().await;
    let record = h.approved("proj-307").await;
    let content = Arc::new(RejectingContent {
        inner: InMemoryContentStore::new(),
        rejecter: Rejecter::new(h.engine.clone(), record.id.clone()),
    });
    let pipeline = pipeline_with(&h, h.ledger.clone(), content);

    let outcome = pipeline.process(&record.id).await.unwrap();
    assert!(matches!(outcome, IssuanceOutcome::Skipped));
    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(h.minted_count().await, 0);
    assert!(h
        .store
        .find_credit_by_project(&record.project_ref)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.reload(&record).await.current_status, WorkflowStatus::Rejected);
}

#[tokio::test]
async fn rejection_racing_the_mint_is_not_completed() {
    let h = Harness::new().await;
    let mut events = h.hub.subscribe();
    let record = h.approved("proj-308").await;
    let ledger = Arc::new(RejectingLedger {
        inner: h.ledger.clone(),
        rejecter: Rejecter::new(h.engine.clone(), record.id.clone()),
    });
    let pipeline = pipeline_with(&h, ledger, Arc::new(InMemoryContentStore::new()));

    let report = pipeline.scan_once().await.unwrap();
    assert_eq!(report.issued, 0);
    assert_eq!(report.superseded, 1);

    // The unit exists on the ledger, so the credit is kept for review
    let credit = h
        .store
        .find_credit_by_project(&record.project_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit.serial, 1);

    let stored = h.reload(&record).await;
    assert_eq!(stored.current_status, WorkflowStatus::Rejected);
    assert!(stored
        .error_log
        .last()
        .unwrap()
        .message
        .contains("workflow is REJECTED"));

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, EngineEvent::IssuanceCompleted { .. }));
    }
}

#[tokio::test]
async fn confirmed_mint_is_persisted_without_reminting() {
    let h = Harness::new().await;
    let record = h.approved("proj-309").await;

    // A prior run minted, recorded the receipt, then failed to store the credit
    h.store
        .record_progress(
            &record.id,
            IssuanceProgress {
                certificate_ref: Some("content://cert".into()),
                metadata_ref: Some("content://meta".into()),
                minted: Some(MintedUnit {
                    token_id: h.token_id.clone(),
                    serial: 7,
                    operation_id: "0.0.1001@1700000000.000000007".into(),
                }),
            },
        )
        .await
        .unwrap();

    let credit = match h.pipeline.process(&record.id).await.unwrap() {
        IssuanceOutcome::Issued(credit) => credit,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(credit.serial, 7);
    assert_eq!(credit.mint_operation_id, "0.0.1001@1700000000.000000007");
    assert_eq!(h.ledger.mint_calls(), 0);
    assert_eq!(h.content.publish_calls(), 0);
    assert_eq!(h.minted_count().await, 1);
    assert_eq!(h.reload(&record).await.current_status, WorkflowStatus::Complete);
}

#![allow(dead_code)]

use async_trait::async_trait;
use issuance_engine::error::VerifierError;
use issuance_engine::pipeline::PipelineSettings;
use issuance_engine::storage::{TreasuryStore, WorkflowStore};
use issuance_engine::verifier::{
    Ack, DocumentUpload, PolicyStatus, ProjectStatus, ProjectSubmission, VerifierResult,
};
use issuance_engine::{
    InMemoryContentStore, InMemoryStore, IssuancePipeline, JsonCertificateRenderer,
    NotificationHub, SimulatedLedger, SubmitProject, TreasuryProvisioner, VerifierApi,
    WorkflowEngine,
};
use issuance_types::{
    Metadata, ProjectProfile, ProjectRef, SigningKey, TreasuryAccount, WorkflowRecord,
    WorkflowStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const TREASURY: &str = "0.0.1001";
pub const CATEGORY: &str = "reforestation";

/// Scriptable verifier
#[derive(Default)]
pub struct StubVerifier {
    statuses: Mutex<HashMap<String, WorkflowStatus>>,
    failing: Mutex<HashMap<String, u16>>,
    reject_submissions: AtomicU32,
    next_id: AtomicU32,
    pub status_calls: AtomicU32,
}

impl StubVerifier {
    pub async fn set_status(&self, project_id: &str, status: WorkflowStatus) {
        self.statuses
            .lock()
            .await
            .insert(project_id.to_string(), status);
    }

    /// Status polls for `project_id` fail with HTTP `status` until cleared
    pub async fn fail_project(&self, project_id: &str, status: u16) {
        self.failing.lock().await.insert(project_id.to_string(), status);
    }

    pub async fn clear_failure(&self, project_id: &str) {
        self.failing.lock().await.remove(project_id);
    }

    pub fn reject_next_submission(&self) {
        self.reject_submissions.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VerifierApi for StubVerifier {
    async fn get_policy_status(&self, policy_id: &str) -> VerifierResult<PolicyStatus> {
        Ok(PolicyStatus {
            policy_id: policy_id.to_string(),
            status: "PUBLISH".into(),
        })
    }

    async fn get_project_status(
        &self,
        _policy_id: &str,
        project_id: &str,
    ) -> VerifierResult<ProjectStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.failing.lock().await.get(project_id) {
            return Err(VerifierError::Http {
                status: *status,
                body: "unavailable".into(),
            });
        }
        let status = self
            .statuses
            .lock()
            .await
            .get(project_id)
            .copied()
            .unwrap_or(WorkflowStatus::Submitted);
        Ok(ProjectStatus {
            project_id: project_id.to_string(),
            status,
            message: None,
        })
    }

    async fn submit_project(
        &self,
        _policy_id: &str,
        _submission: &ProjectSubmission,
    ) -> VerifierResult<String> {
        if self
            .reject_submissions
            .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(VerifierError::Http {
                status: 400,
                body: "invalid project".into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("vp-{}", n))
    }

    async fn upload_document(
        &self,
        _project_id: &str,
        document: &DocumentUpload,
    ) -> VerifierResult<String> {
        Ok(format!("doc-{}", document.name))
    }

    async fn approve(&self, _project_id: &str, _comment: Option<&str>) -> VerifierResult<Ack> {
        Ok(Ack { accepted: true })
    }

    async fn trigger_mint(
        &self,
        _project_id: &str,
        _token_id: &str,
        _amount: u64,
    ) -> VerifierResult<Ack> {
        Ok(Ack { accepted: true })
    }
}

pub fn profile(category: &str) -> ProjectProfile {
    ProjectProfile {
        name: "Atlantic Forest Restoration".into(),
        category: category.into(),
        quantity: 500,
        vintage: "2025".into(),
        location: "Bahia, BR".into(),
    }
}

/// Fully wired engine over in-memory collaborators
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub verifier: Arc<StubVerifier>,
    pub ledger: Arc<SimulatedLedger>,
    pub content: Arc<InMemoryContentStore>,
    pub hub: NotificationHub,
    pub engine: Arc<WorkflowEngine>,
    pub pipeline: Arc<IssuancePipeline>,
    pub token_id: String,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let verifier = Arc::new(StubVerifier::default());
        let ledger = Arc::new(SimulatedLedger::new(1));
        let content = Arc::new(InMemoryContentStore::new());
        let hub = NotificationHub::new(256);

        ledger.set_balance(TREASURY, 1_000).await;
        let provisioner = TreasuryProvisioner::new(store.clone(), ledger.clone());
        provisioner
            .register(TreasuryAccount::new(TREASURY, SigningKey::new("treasury-key"), 10))
            .await
            .unwrap();
        let binding = provisioner
            .ensure_collection(TREASURY, CATEGORY, "Reforestation Credits", "RFC", 0)
            .await
            .unwrap();

        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            verifier.clone(),
            hub.clone(),
        ));
        let pipeline = Arc::new(IssuancePipeline::new(
            engine.clone(),
            ledger.clone(),
            content.clone(),
            Arc::new(JsonCertificateRenderer::new("https://registry.test")),
            PipelineSettings {
                batch_size: 10,
                call_timeout: Duration::from_secs(5),
            },
        ));

        Self {
            store,
            verifier,
            ledger,
            content,
            hub,
            engine,
            pipeline,
            token_id: binding.token_id,
        }
    }

    /// Submit a project in the provisioned category
    pub async fn submit(&self, project_ref: &str) -> WorkflowRecord {
        self.submit_in(project_ref, CATEGORY).await
    }

    pub async fn submit_in(&self, project_ref: &str, category: &str) -> WorkflowRecord {
        self.engine
            .submit_project(SubmitProject {
                project_ref: ProjectRef::new(project_ref),
                policy_id: "policy-vm0047".into(),
                policy_tag: "reforestation-v1".into(),
                project: profile(category),
                metadata: Metadata::new(),
            })
            .await
            .unwrap()
    }

    /// Submit and walk the record to `REVIEWER_APPROVED`
    pub async fn approved(&self, project_ref: &str) -> WorkflowRecord {
        let record = self.submit(project_ref).await;
        self.engine
            .transition(
                &record.id,
                WorkflowStatus::ReviewerApproved,
                Some("approved".into()),
                Metadata::new(),
            )
            .await
            .unwrap();
        self.reload(&record).await
    }

    pub async fn reload(&self, record: &WorkflowRecord) -> WorkflowRecord {
        self.store.get_workflow(&record.id).await.unwrap().unwrap()
    }

    pub async fn minted_count(&self) -> u64 {
        self.store
            .get_treasury(TREASURY)
            .await
            .unwrap()
            .unwrap()
            .collection_for(CATEGORY)
            .unwrap()
            .minted_count
    }
}

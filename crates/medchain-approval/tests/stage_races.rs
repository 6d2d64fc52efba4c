//! Approval and rejection interleaving through the persisted stage.

use assert_matches::assert_matches;
use async_trait::async_trait;
use medchain_approval::ApprovalError;
use medchain_core::effects::{BackendEffects, DocumentFilter};
use medchain_core::{
    ApprovalStamp, ApprovalableDocument, BackendError, ContractCoordinates, DocumentId,
    DocumentStatus, NewDocument, PatientId, PatientIdentityBinding, RecordWorkflow, WorkflowStage,
};
use medchain_effects::MemoryBackend;
use medchain_testkit::*;
use parking_lot::Mutex;
use std::sync::Arc;

/// What another process does between a load and the write that follows it.
#[derive(Debug, Clone, Copy)]
enum Interleave {
    /// Another approval moves the document to `Anchoring`
    StartApproval,
    /// Another session rejects the document
    Reject,
}

/// Backend that runs one [`Interleave`] right after the next document load,
/// handing the caller the stale copy.
struct InterleavedBackend {
    inner: MemoryBackend,
    next: Mutex<Option<Interleave>>,
}

impl InterleavedBackend {
    fn new(inner: MemoryBackend, interleave: Interleave) -> Self {
        Self {
            inner,
            next: Mutex::new(Some(interleave)),
        }
    }
}

#[async_trait]
impl BackendEffects for InterleavedBackend {
    async fn contract_coordinates(&self) -> Result<ContractCoordinates, BackendError> {
        self.inner.contract_coordinates().await
    }

    async fn create_document(
        &self,
        document: NewDocument,
    ) -> Result<ApprovalableDocument, BackendError> {
        self.inner.create_document(document).await
    }

    async fn get_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError> {
        let document = self.inner.get_document(id).await?;
        let interleave = self.next.lock().take();
        match interleave {
            Some(Interleave::StartApproval) => {
                self.inner
                    .set_document_stage(
                        id,
                        &WorkflowStage::AwaitingApproval,
                        WorkflowStage::Anchoring,
                    )
                    .await?;
            }
            Some(Interleave::Reject) => {
                self.inner.reject_document(id).await?;
            }
            None => {}
        }
        Ok(document)
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ApprovalableDocument>, BackendError> {
        self.inner.list_documents(filter).await
    }

    async fn set_document_stage(
        &self,
        id: &DocumentId,
        expected: &WorkflowStage,
        stage: WorkflowStage,
    ) -> Result<(), BackendError> {
        self.inner.set_document_stage(id, expected, stage).await
    }

    async fn approve_document(
        &self,
        id: &DocumentId,
        stamp: ApprovalStamp,
    ) -> Result<ApprovalableDocument, BackendError> {
        self.inner.approve_document(id, stamp).await
    }

    async fn reject_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError> {
        self.inner.reject_document(id).await
    }

    async fn patient_binding(
        &self,
        patient_id: &PatientId,
    ) -> Result<Option<PatientIdentityBinding>, BackendError> {
        self.inner.patient_binding(patient_id).await
    }

    async fn save_record_workflow(&self, workflow: &RecordWorkflow) -> Result<(), BackendError> {
        self.inner.save_record_workflow(workflow).await
    }
}

async fn pending_document(harness: &TestHarness) -> DocumentId {
    let coordinator = harness.coordinator().await;
    coordinator.submit_document(xray_upload()).await.unwrap().id
}

#[tokio::test]
async fn reject_cannot_overtake_a_started_approval() {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    harness.bind_patient(&patient_id(), patient_address()).await;
    let document_id = pending_document(&harness).await;
    let coordinator = harness
        .coordinator_over(Arc::new(InterleavedBackend::new(
            harness.backend.clone(),
            Interleave::StartApproval,
        )))
        .await;

    assert_matches!(
        coordinator.reject(&document_id).await,
        Err(ApprovalError::WorkflowInProgress { document_id: id }) if id == document_id
    );

    let current = harness.backend.get_document(&document_id).await.unwrap();
    assert_eq!(current.status, DocumentStatus::Pending);
    assert_eq!(current.stage, WorkflowStage::Anchoring);
}

#[tokio::test]
async fn approval_stops_before_the_ledger_when_rejected_meanwhile() {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    harness.bind_patient(&patient_id(), patient_address()).await;
    let document_id = pending_document(&harness).await;
    let coordinator = harness
        .coordinator_over(Arc::new(InterleavedBackend::new(
            harness.backend.clone(),
            Interleave::Reject,
        )))
        .await;

    assert_matches!(
        coordinator.approve(&document_id).await,
        Err(ApprovalError::NotPending { status: DocumentStatus::Rejected, .. })
    );
    assert_eq!(harness.ledger.estimate_calls(), 0);
    assert_eq!(harness.ledger.submit_calls(), 0);

    let current = harness.backend.get_document(&document_id).await.unwrap();
    assert_eq!(current.status, DocumentStatus::Rejected);
    assert!(current.approval.is_none());
}

//! Medical-record anchoring saga against the sandbox.

use assert_matches::assert_matches;
use async_trait::async_trait;
use medchain_approval::ApprovalError;
use medchain_core::effects::{BackendEffects, DocumentFilter};
use medchain_core::{
    ApprovalStamp, ApprovalableDocument, BackendError, ContractCoordinates, DocumentId,
    ErrorSeverity, NewDocument, PatientId, PatientIdentityBinding, RawProviderError, RecordStage,
    RecordWorkflow, WorkflowStage,
};
use medchain_effects::{LedgerOp, MemoryBackend};
use medchain_ledger::LedgerError;
use medchain_store::StoreError;
use medchain_testkit::*;
use std::sync::Arc;

async fn registered_patient() -> TestHarness {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    harness.ledger.seed_patient(patient_address(), patient_id());
    harness
}

#[tokio::test]
async fn record_is_stored_then_anchored() {
    let harness = registered_patient().await;
    let coordinator = harness.coordinator().await;

    let anchored = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await
        .unwrap();

    assert_eq!(anchored.workflow.stage, RecordStage::Completed);
    assert_eq!(anchored.workflow.content_hash.as_ref(), Some(anchored.content.hash()));
    assert_eq!(
        anchored.workflow.transaction_id.as_ref(),
        Some(&anchored.receipt.transaction_id)
    );
    assert_eq!(
        harness.backend.workflow(&anchored.workflow.id).await,
        Some(anchored.workflow.clone())
    );

    let stored = harness.content.get(anchored.content.hash().as_str()).unwrap();
    assert_eq!(stored.metadata.content_type, "application/json");

    let records = harness.ledger.records_for(&patient_address());
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].content_hash, anchored.content.hash());
    assert_eq!(records[0].record_type, "lab-result");
}

#[tokio::test]
async fn offline_store_stops_before_the_ledger() {
    let harness = registered_patient().await;
    harness.content.set_offline(true);
    let coordinator = harness.coordinator().await;

    let result = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await;
    assert_matches!(result, Err(ApprovalError::Store(StoreError::StoreUnavailable { .. })));
    assert_eq!(harness.ledger.estimate_calls(), 0);
    assert_eq!(harness.ledger.submit_calls(), 0);

    let workflows = harness.backend.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].stage, RecordStage::Started);
    assert!(workflows[0].content_hash.is_none());
}

#[tokio::test]
async fn failed_simulation_leaves_record_stored_only() {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    let coordinator = harness.coordinator().await;

    // The patient never registered on the ledger.
    let result = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await;
    assert_matches!(
        result,
        Err(ApprovalError::Ledger(LedgerError::UnpredictableCost { .. }))
    );
    assert_eq!(harness.ledger.estimate_calls(), 1);
    assert_eq!(harness.ledger.submit_calls(), 0);

    let workflows = harness.backend.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].stage, RecordStage::Stored);
    assert!(workflows[0].content_hash.is_some());
    assert!(workflows[0].transaction_id.is_none());
}

/// Backend that refuses to record the `Anchored` stage of any workflow.
struct AnchoredSaveFails {
    inner: MemoryBackend,
}

#[async_trait]
impl BackendEffects for AnchoredSaveFails {
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
        self.inner.get_document(id).await
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
        if workflow.stage == RecordStage::Anchored {
            return Err(BackendError::unavailable("write timed out"));
        }
        self.inner.save_record_workflow(workflow).await
    }
}

#[tokio::test]
async fn persist_failure_after_anchoring_is_flagged() {
    let harness = registered_patient().await;
    let coordinator = harness
        .coordinator_over(Arc::new(AnchoredSaveFails {
            inner: harness.backend.clone(),
        }))
        .await;

    let err = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await
        .unwrap_err();
    assert_eq!(err.severity(), ErrorSeverity::Critical);
    let transaction_id = err.transaction_id().cloned().unwrap();
    assert_matches!(err, ApprovalError::BackendPersistFailure { .. });
    assert_eq!(harness.ledger.records_for(&patient_address()).len(), 1);

    let workflows = harness.backend.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].stage, RecordStage::NeedsReconciliation);
    assert_eq!(workflows[0].transaction_id, Some(transaction_id));
}

#[tokio::test]
async fn unconfirmed_anchor_is_flagged_with_its_transaction() {
    let harness = registered_patient().await;
    harness.ledger.fail_next(
        LedgerOp::Confirm,
        RawProviderError::message("timeout waiting for receipt"),
    );
    let coordinator = harness.coordinator().await;

    let err = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await
        .unwrap_err();
    assert_eq!(err.severity(), ErrorSeverity::Critical);
    assert!(!err.is_retryable());
    let transaction_id = err.transaction_id().cloned().unwrap();
    assert_matches!(err, ApprovalError::UnsettledTransaction { .. });
    assert_eq!(harness.ledger.submit_calls(), 1);

    let workflows = harness.backend.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].stage, RecordStage::NeedsReconciliation);
    assert!(workflows[0].content_hash.is_some());
    assert_eq!(workflows[0].transaction_id, Some(transaction_id));
}

#[tokio::test]
async fn reverted_anchor_is_flagged_with_its_transaction() {
    let harness = registered_patient().await;
    harness.ledger.revert_next_submit();
    let coordinator = harness.coordinator().await;

    let err = coordinator
        .anchor_medical_record(lab_result_draft(), &lab_result_payload())
        .await
        .unwrap_err();
    assert_eq!(err.severity(), ErrorSeverity::Critical);
    let transaction_id = err.transaction_id().cloned().unwrap();
    assert_matches!(
        err,
        ApprovalError::UnsettledTransaction { ref message, .. } if message.contains("reverted")
    );
    assert!(harness.ledger.records_for(&patient_address()).is_empty());

    let workflows = harness.backend.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].stage, RecordStage::NeedsReconciliation);
    assert_eq!(workflows[0].transaction_id, Some(transaction_id));
}

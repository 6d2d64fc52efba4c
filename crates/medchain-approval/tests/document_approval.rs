//! Document approval saga against the sandbox.

use assert_matches::assert_matches;
use medchain_approval::{ApprovalError, Role};
use medchain_core::{DocumentStatus, ErrorSeverity, RawProviderError, WorkflowStage};
use medchain_effects::{ConsentBehavior, LedgerOp};
use medchain_ledger::LedgerError;
use medchain_testkit::*;

async fn patient_harness() -> TestHarness {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    harness.bind_patient(&patient_id(), patient_address()).await;
    harness
}

#[tokio::test]
async fn xray_is_uploaded_approved_and_anchored() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;

    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    assert_eq!(document.status, DocumentStatus::Pending);
    assert_eq!(document.file.file_name, "xray.png");
    assert_eq!(
        harness.backend.file_bytes(&document.id).await.unwrap(),
        xray_upload().file.bytes
    );

    let feed = coordinator
        .feed_for(&Role::Patient(patient_id()))
        .await
        .unwrap();
    assert_eq!(feed.pending.len(), 1);
    assert!(feed.approved.is_empty());

    let approved = coordinator.approve(&document.id).await.unwrap();
    assert_eq!(approved.status, DocumentStatus::Approved);
    assert_eq!(approved.stage, WorkflowStage::Completed);
    assert_eq!(approved.approver(), Some(&patient_address()));
    assert!(approved.transaction_id().is_some());
    assert!(approved.is_consistent());
    assert_eq!(
        harness.ledger.document_approver(&document.id.to_string()),
        Some(patient_address())
    );

    let feed = coordinator
        .feed_for(&Role::Uploader(doctor_address()))
        .await
        .unwrap();
    assert_eq!(feed.approved.len(), 1);
    assert_eq!(
        feed.approved[0].transaction_id(),
        approved.transaction_id()
    );
}

#[tokio::test]
async fn wrong_wallet_is_refused_before_the_ledger() {
    init_test_tracing();
    let harness = TestHarness::new(&stranger_address()).await;
    harness.bind_patient(&patient_id(), patient_address()).await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();

    let result = coordinator.approve(&document.id).await;
    assert_matches!(
        result,
        Err(ApprovalError::IdentityMismatch { expected, actual })
            if expected == patient_address() && actual == stranger_address()
    );
    assert_eq!(harness.ledger.estimate_calls(), 0);
    assert_eq!(harness.ledger.submit_calls(), 0);

    let stored = harness
        .coordinator()
        .await
        .documents_by_status(DocumentStatus::Pending)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].stage, WorkflowStage::AwaitingApproval);
    assert!(stored[0].approval.is_none());
}

#[tokio::test]
async fn unbound_patient_cannot_approve() {
    init_test_tracing();
    let harness = TestHarness::new(&patient_address()).await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();

    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::PatientNotBound { .. })
    );
    assert_eq!(harness.provider.request_calls(), 0);
    assert_eq!(harness.ledger.submit_calls(), 0);
}

#[tokio::test]
async fn second_approval_makes_no_ledger_calls() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();

    coordinator.approve(&document.id).await.unwrap();
    let submits = harness.ledger.submit_calls();
    let estimates = harness.ledger.estimate_calls();

    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::NotPending { status: DocumentStatus::Approved, .. })
    );
    assert_eq!(harness.ledger.submit_calls(), submits);
    assert_eq!(harness.ledger.estimate_calls(), estimates);
    assert_eq!(harness.ledger.approval_count(), 1);
}

#[tokio::test]
async fn racing_approvals_anchor_once() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();

    let (first, second) = futures::join!(
        coordinator.approve(&document.id),
        coordinator.approve(&document.id)
    );
    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for result in [first, second] {
        if let Err(err) = result {
            assert_matches!(
                err,
                ApprovalError::WorkflowInProgress { .. } | ApprovalError::NotPending { .. }
            );
        }
    }
    assert_eq!(harness.ledger.approval_count(), 1);
    assert_eq!(harness.ledger.submit_calls(), 1);
}

#[tokio::test]
async fn rejection_never_touches_the_ledger() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    let calls_after_connect = harness.ledger.network_calls();

    let rejected = coordinator.reject(&document.id).await.unwrap();
    assert_eq!(rejected.status, DocumentStatus::Rejected);
    assert!(rejected.approval.is_none());
    assert_eq!(harness.ledger.network_calls(), calls_after_connect);
    assert_eq!(harness.provider.request_calls(), 0);

    assert_matches!(
        coordinator.reject(&document.id).await,
        Err(ApprovalError::NotPending { status: DocumentStatus::Rejected, .. })
    );
    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::NotPending { status: DocumentStatus::Rejected, .. })
    );
    assert_eq!(harness.ledger.network_calls(), calls_after_connect);

    let outcome = coordinator.reject_outcome(&document.id).await;
    assert!(!outcome.success);
    assert!(outcome.transaction_id.is_none());
}

#[tokio::test]
async fn ledger_failure_leaves_document_pending() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    harness.ledger.fail_next(
        LedgerOp::Submit,
        RawProviderError::with_code(4001, "User denied transaction signature"),
    );

    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::Ledger(LedgerError::UserRejected { .. }))
    );
    let pending = coordinator
        .pending_for_patient(&patient_id())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].stage, WorkflowStage::AwaitingApproval);
    assert!(pending[0].approval.is_none());
    assert!(coordinator
        .documents_needing_reconciliation()
        .await
        .unwrap()
        .is_empty());

    let outcome = coordinator.approve_outcome(&document.id).await;
    assert!(outcome.success);
    assert!(outcome.transaction_id.is_some());
}

#[tokio::test]
async fn persist_failure_after_ledger_is_flagged() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    harness.backend.fail_approvals(true);

    let err = coordinator.approve(&document.id).await.unwrap_err();
    assert_eq!(err.severity(), ErrorSeverity::Critical);
    assert!(!err.is_retryable());
    let transaction_id = err.transaction_id().cloned().unwrap();
    assert_matches!(err, ApprovalError::BackendPersistFailure { .. });
    assert_eq!(harness.ledger.approval_count(), 1);

    let flagged = coordinator.documents_needing_reconciliation().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].status, DocumentStatus::Pending);
    assert!(flagged[0].approval.is_none());
    assert_matches!(
        &flagged[0].stage,
        WorkflowStage::NeedsReconciliation { transaction_id: tx, .. } if *tx == transaction_id
    );

    harness.backend.fail_approvals(false);
    let submits = harness.ledger.submit_calls();
    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::ReconciliationRequired { transaction_id: Some(tx), .. })
            if tx == transaction_id
    );
    assert_eq!(harness.ledger.submit_calls(), submits);
}

#[tokio::test]
async fn unconfirmed_approval_is_flagged_not_reset() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    harness.ledger.fail_next(
        LedgerOp::Confirm,
        RawProviderError::message("timeout waiting for receipt"),
    );

    let err = coordinator.approve(&document.id).await.unwrap_err();
    assert_eq!(err.severity(), ErrorSeverity::Critical);
    assert!(!err.is_retryable());
    let transaction_id = err.transaction_id().cloned().unwrap();
    assert_matches!(err, ApprovalError::UnsettledTransaction { .. });
    // The approval landed; only its receipt went missing.
    assert_eq!(harness.ledger.approval_count(), 1);

    let flagged = coordinator.documents_needing_reconciliation().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].status, DocumentStatus::Pending);
    assert!(flagged[0].approval.is_none());
    assert_matches!(
        &flagged[0].stage,
        WorkflowStage::NeedsReconciliation { transaction_id: tx, .. } if *tx == transaction_id
    );

    let submits = harness.ledger.submit_calls();
    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::ReconciliationRequired { transaction_id: Some(tx), .. })
            if tx == transaction_id
    );
    assert_matches!(
        coordinator.reject(&document.id).await,
        Err(ApprovalError::ReconciliationRequired { .. })
    );
    assert_eq!(harness.ledger.submit_calls(), submits);
}

#[tokio::test]
async fn reverted_approval_is_flagged_with_its_transaction() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;
    let document = coordinator.submit_document(xray_upload()).await.unwrap();
    harness.ledger.revert_next_submit();

    let outcome = coordinator.approve_outcome(&document.id).await;
    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert_eq!(error.code, "UnsettledTransaction");
    assert_eq!(error.severity, ErrorSeverity::Critical);
    assert!(!error.retryable);
    let transaction_id = outcome.transaction_id.unwrap();
    assert_eq!(harness.ledger.approval_count(), 0);
    assert_eq!(harness.ledger.submit_calls(), 1);

    let flagged = coordinator.documents_needing_reconciliation().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_matches!(
        &flagged[0].stage,
        WorkflowStage::NeedsReconciliation { transaction_id: tx, .. } if *tx == transaction_id
    );
    assert_matches!(
        coordinator.approve(&document.id).await,
        Err(ApprovalError::ReconciliationRequired { .. })
    );
    assert_eq!(harness.ledger.submit_calls(), 1);
}

#[tokio::test]
async fn invalid_uploads_are_refused() {
    let harness = patient_harness().await;
    let coordinator = harness.coordinator().await;

    let mut unnamed = xray_upload();
    unnamed.file.name = "  ".to_string();
    assert_matches!(
        coordinator.submit_document(unnamed).await,
        Err(ApprovalError::InvalidUpload { .. })
    );

    let mut empty = xray_upload();
    empty.file.bytes.clear();
    assert_matches!(
        coordinator.submit_document(empty).await,
        Err(ApprovalError::InvalidUpload { .. })
    );
    assert!(coordinator
        .documents_by_status(DocumentStatus::Pending)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rejected_consent_is_reported_to_the_ui() {
    let harness = patient_harness().await;
    harness.provider.set_consent(ConsentBehavior::Reject);
    let coordinator = harness.coordinator().await;

    let outcome = coordinator.connect().await;
    assert!(outcome.address.is_none());
    let error = outcome.error.unwrap();
    assert_eq!(error.code, "ConnectionRejected");
    assert!(error.retryable);

    harness.provider.set_consent(ConsentBehavior::Approve);
    let outcome = coordinator.connect().await;
    assert_eq!(outcome.address, Some(patient_address()));
    assert!(outcome.error.is_none());

    let outcome = coordinator.disconnect().await;
    assert!(outcome.address.is_none());
    assert!(outcome.error.is_none());
}

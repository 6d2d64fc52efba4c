//! Medical-record anchoring
//!
//! A record is stored in the content store and its hash anchored on the
//! ledger. The workflow is persisted at every stage boundary so a crash
//! leaves evidence of how far it got:
//!
//! `Started` -> `Stored` (hash known) -> `Anchored` (hash and transaction
//! known) -> `Completed`.
//!
//! A failure before the ledger write leaves the workflow at its last stage
//! and nothing on the ledger. Once a transaction has been submitted, a
//! missing or reverted receipt or a failure to persist the result flags the
//! workflow `NeedsReconciliation` with the transaction id and surfaces a
//! critical error.

use crate::coordinator::ApprovalCoordinator;
use crate::errors::ApprovalError;
use medchain_core::{RecordDraft, RecordStage, RecordWorkflow, TransactionId, TxReceipt};
use medchain_store::StoredContent;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// A record that reached the ledger and the backend.
#[derive(Debug, Clone)]
pub struct AnchoredRecord {
    /// Final workflow state
    pub workflow: RecordWorkflow,
    /// Stored payload
    pub content: StoredContent,
    /// Ledger receipt for the anchoring transaction
    pub receipt: TxReceipt,
}

impl ApprovalCoordinator {
    /// Store `payload` and anchor its hash as a new record for
    /// `draft.patient_id`.
    pub async fn anchor_medical_record<T: Serialize + ?Sized>(
        &self,
        draft: RecordDraft,
        payload: &T,
    ) -> Result<AnchoredRecord, ApprovalError> {
        let started_at = self.clock.now_ms().await;
        let mut workflow = RecordWorkflow::start(draft.patient_id.clone(), started_at);
        self.save(&workflow).await?;

        let name = format!("record-{}.json", workflow.id);
        let content = match self.store.upload_json(&name, payload).await {
            Ok(content) => content,
            Err(err) => {
                warn!(workflow = %workflow.id, error = %err, "Record payload was not stored");
                return Err(err.into());
            }
        };
        workflow.stage = RecordStage::Stored;
        workflow.content_hash = Some(content.hash().clone());
        self.save(&workflow).await?;
        debug!(workflow = %workflow.id, hash = %content.hash(), "Record stage: stored");

        let receipt = match self.gateway.add_patient_record(&content, draft).await {
            Ok(receipt) => receipt,
            Err(err) => match err.submitted_transaction().cloned() {
                Some(transaction_id) => {
                    error!(
                        workflow = %workflow.id,
                        transaction = %transaction_id,
                        error = %err,
                        "Record was submitted to the ledger but did not settle"
                    );
                    self.mark_for_reconciliation(&mut workflow, &transaction_id).await;
                    return Err(ApprovalError::UnsettledTransaction {
                        transaction_id,
                        message: err.to_string(),
                    });
                }
                None => {
                    warn!(workflow = %workflow.id, error = %err, "Record was not anchored");
                    return Err(err.into());
                }
            },
        };

        workflow.stage = RecordStage::Anchored;
        workflow.transaction_id = Some(receipt.transaction_id.clone());
        if let Err(err) = self.save(&workflow).await {
            return Err(self
                .flag_record(workflow, receipt.transaction_id.clone(), err)
                .await);
        }

        workflow.stage = RecordStage::Completed;
        if let Err(err) = self.save(&workflow).await {
            return Err(self
                .flag_record(workflow, receipt.transaction_id.clone(), err)
                .await);
        }

        info!(
            workflow = %workflow.id,
            patient = %workflow.patient_id,
            hash = %content.hash(),
            transaction = %receipt.transaction_id,
            "Medical record anchored"
        );
        Ok(AnchoredRecord {
            workflow,
            content,
            receipt,
        })
    }

    async fn save(&self, workflow: &RecordWorkflow) -> Result<(), ApprovalError> {
        self.backend
            .save_record_workflow(workflow)
            .await
            .map_err(ApprovalError::Backend)
    }

    async fn flag_record(
        &self,
        mut workflow: RecordWorkflow,
        transaction_id: TransactionId,
        err: ApprovalError,
    ) -> ApprovalError {
        error!(
            workflow = %workflow.id,
            transaction = %transaction_id,
            error = %err,
            "Record is on the ledger but the backend did not record it"
        );
        self.mark_for_reconciliation(&mut workflow, &transaction_id).await;
        ApprovalError::BackendPersistFailure {
            transaction_id,
            message: err.to_string(),
        }
    }

    async fn mark_for_reconciliation(
        &self,
        workflow: &mut RecordWorkflow,
        transaction_id: &TransactionId,
    ) {
        workflow.stage = RecordStage::NeedsReconciliation;
        workflow.transaction_id = Some(transaction_id.clone());
        if let Err(flag_err) = self.backend.save_record_workflow(workflow).await {
            error!(
                workflow = %workflow.id,
                error = %flag_err,
                "Could not flag record workflow for reconciliation"
            );
        }
    }
}

//! Document approval coordinator
//!
//! Approving a document spans three systems: the wallet, the ledger and the
//! backend. The coordinator runs them as a saga whose stage is persisted on
//! the document itself:
//!
//! 1. `AwaitingApproval`: load, check the patient binding, connect and
//!    compare the signer. Failures here touch nothing.
//! 2. `Anchoring`: persisted before the ledger call with a compare-and-set
//!    from `AwaitingApproval`, so a concurrent reject cannot slip past it.
//!    A ledger failure before submission resets the stage; the document
//!    stays pending with no ledger fields. A failure after submission
//!    (unconfirmed or reverted) flags `NeedsReconciliation` with the
//!    transaction id and returns a critical `UnsettledTransaction`.
//! 3. `Completed`: the backend atomically stores `approved`, the transaction
//!    id, the ledger timestamp and the approver.
//!
//! If the ledger succeeds and step 3 fails, the document is flagged
//! `NeedsReconciliation` (when the backend accepts that write) and the caller
//! gets a critical `BackendPersistFailure` carrying the transaction id.
//! Nothing is resubmitted automatically.
//!
//! # Blocking Lock Usage
//!
//! `parking_lot::Mutex` guards the set of documents with an approval running
//! in this process. The lock is never held across `.await`.

use crate::errors::ApprovalError;
use crate::outcome::{ApprovalOutcome, ConnectOutcome, DocumentFeed, Role};
use medchain_core::effects::{BackendEffects, DocumentFilter, PhysicalTimeEffects};
use medchain_core::{
    Address, ApprovalStamp, ApprovalableDocument, BackendError, DocumentId, DocumentStatus,
    NewDocument, PatientId, WorkflowStage,
};
use medchain_ledger::LedgerGateway;
use medchain_store::StoreClient;
use medchain_wallet::WalletSessionManager;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs document approvals and medical-record anchoring.
#[derive(Clone)]
pub struct ApprovalCoordinator {
    pub(crate) backend: Arc<dyn BackendEffects>,
    pub(crate) wallet: WalletSessionManager,
    pub(crate) gateway: LedgerGateway,
    pub(crate) store: StoreClient,
    pub(crate) clock: Arc<dyn PhysicalTimeEffects>,
    approvals_in_flight: Arc<Mutex<HashSet<DocumentId>>>,
}

impl std::fmt::Debug for ApprovalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalCoordinator")
            .field("gateway", &self.gateway)
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

impl ApprovalCoordinator {
    /// Wire the coordinator to its collaborators.
    pub fn new(
        backend: Arc<dyn BackendEffects>,
        wallet: WalletSessionManager,
        gateway: LedgerGateway,
        store: StoreClient,
        clock: Arc<dyn PhysicalTimeEffects>,
    ) -> Self {
        Self {
            backend,
            wallet,
            gateway,
            store,
            clock,
            approvals_in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Session manager shared with the gateway.
    pub fn wallet(&self) -> &WalletSessionManager {
        &self.wallet
    }

    /// Content store client.
    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// Ledger gateway.
    pub fn gateway(&self) -> &LedgerGateway {
        &self.gateway
    }

    /// Connect a wallet, shaped for the UI.
    pub async fn connect(&self) -> ConnectOutcome {
        ConnectOutcome::from_result(self.wallet.connect_wallet().await.map(Some))
    }

    /// Disconnect the wallet, shaped for the UI.
    pub async fn disconnect(&self) -> ConnectOutcome {
        ConnectOutcome::from_result(self.wallet.disconnect_wallet().await.map(|()| None))
    }

    /// Store an uploaded file as a pending document. No ledger interaction.
    pub async fn submit_document(
        &self,
        upload: NewDocument,
    ) -> Result<ApprovalableDocument, ApprovalError> {
        if upload.file.name.trim().is_empty() {
            return Err(ApprovalError::InvalidUpload {
                reason: "file name is empty".to_string(),
            });
        }
        if upload.file.bytes.is_empty() {
            return Err(ApprovalError::InvalidUpload {
                reason: "file is empty".to_string(),
            });
        }

        let document = self
            .backend
            .create_document(upload)
            .await
            .map_err(ApprovalError::Backend)?;
        info!(
            document = %document.id,
            patient = %document.patient_id,
            uploader = %document.uploader,
            file = %document.file.file_name,
            "Document submitted for approval"
        );
        Ok(document)
    }

    /// Approve a pending document as its patient and anchor the approval.
    pub async fn approve(
        &self,
        document_id: &DocumentId,
    ) -> Result<ApprovalableDocument, ApprovalError> {
        let _claim = ApprovalClaim::acquire(&self.approvals_in_flight, *document_id)?;

        let document = self.load(document_id).await?;
        if document.status != DocumentStatus::Pending {
            return Err(ApprovalError::NotPending {
                document_id: *document_id,
                status: document.status,
            });
        }
        match &document.stage {
            WorkflowStage::AwaitingApproval => {}
            WorkflowStage::Anchoring => {
                return Err(ApprovalError::WorkflowInProgress {
                    document_id: *document_id,
                })
            }
            WorkflowStage::NeedsReconciliation { transaction_id, .. } => {
                return Err(ApprovalError::ReconciliationRequired {
                    document_id: *document_id,
                    transaction_id: Some(transaction_id.clone()),
                })
            }
            WorkflowStage::Completed => {
                return Err(ApprovalError::ReconciliationRequired {
                    document_id: *document_id,
                    transaction_id: None,
                })
            }
        }

        let binding = self
            .backend
            .patient_binding(&document.patient_id)
            .await
            .map_err(ApprovalError::Backend)?
            .ok_or_else(|| ApprovalError::PatientNotBound {
                patient_id: document.patient_id.clone(),
            })?;

        let signer = self.signer().await?;
        if signer != binding.address {
            warn!(
                document = %document_id,
                expected = %binding.address,
                actual = %signer,
                "Approval refused: connected wallet is not the patient's"
            );
            return Err(ApprovalError::IdentityMismatch {
                expected: binding.address,
                actual: signer,
            });
        }

        if let Err(err) = self
            .backend
            .set_document_stage(
                document_id,
                &WorkflowStage::AwaitingApproval,
                WorkflowStage::Anchoring,
            )
            .await
        {
            return Err(self.transition_error(document_id, err).await);
        }
        debug!(document = %document_id, "Approval stage: anchoring");

        let receipt = match self
            .gateway
            .approve_document(document_id, &binding.address)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => match err.submitted_transaction().cloned() {
                Some(transaction_id) => {
                    return Err(self
                        .flag_unsettled(document_id, transaction_id, err.to_string())
                        .await)
                }
                None => {
                    warn!(document = %document_id, error = %err, "Ledger approval failed");
                    self.reset_stage(document_id).await;
                    return Err(err.into());
                }
            },
        };

        let stamp = ApprovalStamp {
            approver: signer,
            transaction_id: receipt.transaction_id.clone(),
            ledger_timestamp: receipt.timestamp,
        };
        match self.backend.approve_document(document_id, stamp).await {
            Ok(approved) => {
                info!(
                    document = %document_id,
                    approver = %signer,
                    transaction = %receipt.transaction_id,
                    "Document approved"
                );
                Ok(approved)
            }
            Err(err) => Err(self
                .flag_for_reconciliation(document_id, receipt.transaction_id, err)
                .await),
        }
    }

    /// Reject a pending document. Never touches the ledger.
    pub async fn reject(
        &self,
        document_id: &DocumentId,
    ) -> Result<ApprovalableDocument, ApprovalError> {
        let document = self.load(document_id).await?;
        if document.status != DocumentStatus::Pending {
            return Err(ApprovalError::NotPending {
                document_id: *document_id,
                status: document.status,
            });
        }
        if !document.stage.accepts_new_attempt() {
            return Err(ApprovalError::ReconciliationRequired {
                document_id: *document_id,
                transaction_id: match document.stage {
                    WorkflowStage::NeedsReconciliation { transaction_id, .. } => {
                        Some(transaction_id)
                    }
                    _ => None,
                },
            });
        }

        let rejected = match self.backend.reject_document(document_id).await {
            Ok(rejected) => rejected,
            Err(err) => return Err(self.transition_error(document_id, err).await),
        };
        info!(document = %document_id, "Document rejected");
        Ok(rejected)
    }

    /// [`approve`](Self::approve), shaped for the UI.
    pub async fn approve_outcome(&self, document_id: &DocumentId) -> ApprovalOutcome {
        ApprovalOutcome::from(self.approve(document_id).await)
    }

    /// [`reject`](Self::reject), shaped for the UI.
    pub async fn reject_outcome(&self, document_id: &DocumentId) -> ApprovalOutcome {
        ApprovalOutcome::from(self.reject(document_id).await)
    }

    // Read side

    /// Documents with `status`.
    pub async fn documents_by_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<ApprovalableDocument>, ApprovalError> {
        self.list(DocumentFilter::all().with_status(status)).await
    }

    /// Documents uploaded by `uploader`.
    pub async fn documents_uploaded_by(
        &self,
        uploader: &Address,
    ) -> Result<Vec<ApprovalableDocument>, ApprovalError> {
        self.list(DocumentFilter::all().with_uploader(*uploader))
            .await
    }

    /// Pending documents concerning `patient_id`.
    pub async fn pending_for_patient(
        &self,
        patient_id: &PatientId,
    ) -> Result<Vec<ApprovalableDocument>, ApprovalError> {
        self.list(
            DocumentFilter::all()
                .with_patient(patient_id.clone())
                .with_status(DocumentStatus::Pending),
        )
        .await
    }

    /// Every document visible to `role`, partitioned by status.
    pub async fn feed_for(&self, role: &Role) -> Result<DocumentFeed, ApprovalError> {
        let filter = match role {
            Role::Patient(patient_id) => DocumentFilter::all().with_patient(patient_id.clone()),
            Role::Uploader(uploader) => DocumentFilter::all().with_uploader(*uploader),
        };
        let mut feed = DocumentFeed::default();
        for document in self.list(filter).await? {
            match document.status {
                DocumentStatus::Pending => feed.pending.push(document),
                DocumentStatus::Approved => feed.approved.push(document),
                DocumentStatus::Rejected => feed.rejected.push(document),
            }
        }
        Ok(feed)
    }

    /// Pending documents whose approval stopped between the ledger and the
    /// backend, or never left the anchoring stage.
    pub async fn documents_needing_reconciliation(
        &self,
    ) -> Result<Vec<ApprovalableDocument>, ApprovalError> {
        let pending = self
            .list(DocumentFilter::all().with_status(DocumentStatus::Pending))
            .await?;
        Ok(pending
            .into_iter()
            .filter(|document| {
                matches!(
                    document.stage,
                    WorkflowStage::Anchoring | WorkflowStage::NeedsReconciliation { .. }
                )
            })
            .collect())
    }

    async fn list(
        &self,
        filter: DocumentFilter,
    ) -> Result<Vec<ApprovalableDocument>, ApprovalError> {
        self.backend
            .list_documents(&filter)
            .await
            .map_err(ApprovalError::Backend)
    }

    async fn load(&self, document_id: &DocumentId) -> Result<ApprovalableDocument, ApprovalError> {
        self.backend
            .get_document(document_id)
            .await
            .map_err(|err| match err {
                BackendError::NotFound { .. } => ApprovalError::DocumentNotFound {
                    document_id: *document_id,
                },
                other => ApprovalError::Backend(other),
            })
    }

    /// Connected signer, prompting once if nothing is connected.
    pub(crate) async fn signer(&self) -> Result<Address, ApprovalError> {
        match self.wallet.guard() {
            Some(guard) => Ok(guard.address()),
            None => Ok(self.wallet.connect_wallet().await?),
        }
    }

    async fn transition_error(&self, document_id: &DocumentId, err: BackendError) -> ApprovalError {
        match err {
            BackendError::InvalidTransition { message } => {
                debug!(document = %document_id, %message, "Status transition refused");
                let current = match self.load(document_id).await {
                    Ok(current) => current,
                    Err(load_err) => return load_err,
                };
                if current.status != DocumentStatus::Pending {
                    return ApprovalError::NotPending {
                        document_id: *document_id,
                        status: current.status,
                    };
                }
                match current.stage {
                    WorkflowStage::Anchoring => ApprovalError::WorkflowInProgress {
                        document_id: *document_id,
                    },
                    WorkflowStage::NeedsReconciliation { transaction_id, .. } => {
                        ApprovalError::ReconciliationRequired {
                            document_id: *document_id,
                            transaction_id: Some(transaction_id),
                        }
                    }
                    WorkflowStage::Completed => ApprovalError::ReconciliationRequired {
                        document_id: *document_id,
                        transaction_id: None,
                    },
                    WorkflowStage::AwaitingApproval => {
                        ApprovalError::Backend(BackendError::InvalidTransition { message })
                    }
                }
            }
            BackendError::NotFound { .. } => ApprovalError::DocumentNotFound {
                document_id: *document_id,
            },
            other => ApprovalError::Backend(other),
        }
    }

    async fn flag_for_reconciliation(
        &self,
        document_id: &DocumentId,
        transaction_id: medchain_core::TransactionId,
        err: BackendError,
    ) -> ApprovalError {
        error!(
            document = %document_id,
            transaction = %transaction_id,
            error = %err,
            "Approval is on the ledger but the backend did not record it"
        );
        let stage = WorkflowStage::NeedsReconciliation {
            transaction_id: transaction_id.clone(),
            reason: err.to_string(),
        };
        self.flag_stage(document_id, &transaction_id, stage).await;
        ApprovalError::BackendPersistFailure {
            transaction_id,
            message: err.to_string(),
        }
    }

    /// A transaction left the wallet but its outcome was not a clean receipt.
    async fn flag_unsettled(
        &self,
        document_id: &DocumentId,
        transaction_id: medchain_core::TransactionId,
        message: String,
    ) -> ApprovalError {
        error!(
            document = %document_id,
            transaction = %transaction_id,
            error = %message,
            "Approval was submitted to the ledger but did not settle"
        );
        let stage = WorkflowStage::NeedsReconciliation {
            transaction_id: transaction_id.clone(),
            reason: message.clone(),
        };
        self.flag_stage(document_id, &transaction_id, stage).await;
        ApprovalError::UnsettledTransaction {
            transaction_id,
            message,
        }
    }

    async fn flag_stage(
        &self,
        document_id: &DocumentId,
        transaction_id: &medchain_core::TransactionId,
        stage: WorkflowStage,
    ) {
        if let Err(flag_err) = self
            .backend
            .set_document_stage(document_id, &WorkflowStage::Anchoring, stage)
            .await
        {
            error!(
                document = %document_id,
                transaction = %transaction_id,
                error = %flag_err,
                "Could not flag document for reconciliation"
            );
        }
    }

    /// Nothing reached the ledger; hand the document back to the patient.
    async fn reset_stage(&self, document_id: &DocumentId) {
        if let Err(reset) = self
            .backend
            .set_document_stage(
                document_id,
                &WorkflowStage::Anchoring,
                WorkflowStage::AwaitingApproval,
            )
            .await
        {
            warn!(
                document = %document_id,
                error = %reset,
                "Could not reset approval stage"
            );
        }
    }
}

/// Claim on one document's approval for this process.
struct ApprovalClaim {
    in_flight: Arc<Mutex<HashSet<DocumentId>>>,
    document_id: DocumentId,
}

impl ApprovalClaim {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<DocumentId>>>,
        document_id: DocumentId,
    ) -> Result<Self, ApprovalError> {
        if !in_flight.lock().insert(document_id) {
            return Err(ApprovalError::WorkflowInProgress { document_id });
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            document_id,
        })
    }
}

impl Drop for ApprovalClaim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.document_id);
    }
}

//! Backend persistence collaborator.

use crate::errors::BackendError;
use crate::types::{
    Address, ApprovalStamp, ApprovalableDocument, ContractCoordinates, DocumentId,
    DocumentStatus, NewDocument, PatientId, PatientIdentityBinding, RecordWorkflow,
    WorkflowStage,
};
use async_trait::async_trait;

/// Filter for document listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Only documents with this status
    pub status: Option<DocumentStatus>,
    /// Only documents uploaded by this address
    pub uploader: Option<Address>,
    /// Only documents concerning this patient
    pub patient_id: Option<PatientId>,
}

impl DocumentFilter {
    /// Match every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a status.
    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to an uploader.
    pub fn with_uploader(mut self, uploader: Address) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Restrict to a patient.
    pub fn with_patient(mut self, patient_id: PatientId) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    /// Whether `document` passes the filter.
    pub fn matches(&self, document: &ApprovalableDocument) -> bool {
        self.status.map_or(true, |s| document.status == s)
            && self.uploader.map_or(true, |u| document.uploader == u)
            && self
                .patient_id
                .as_ref()
                .map_or(true, |p| &document.patient_id == p)
    }
}

/// Application backend (REST API in production).
///
/// `approve_document` and `reject_document` must be atomic and must refuse
/// any document that is not pending; this is what keeps racing callers from
/// approving the same document twice.
///
/// The workflow stage doubles as a lock on a pending document:
///
/// - `set_document_stage` is a compare-and-set. It fails with
///   `InvalidTransition` unless the stored stage equals `expected`.
/// - `reject_document` fails with `InvalidTransition` unless the stage is
///   `AwaitingApproval`, so a document whose approval is on its way to the
///   ledger cannot be rejected underneath it.
#[async_trait]
pub trait BackendEffects: Send + Sync {
    /// Contract address and ABI.
    async fn contract_coordinates(&self) -> Result<ContractCoordinates, BackendError>;

    /// Persist a new pending document.
    async fn create_document(&self, document: NewDocument)
        -> Result<ApprovalableDocument, BackendError>;

    /// Load one document.
    async fn get_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError>;

    /// List documents matching `filter`.
    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ApprovalableDocument>, BackendError>;

    /// Move a pending document from stage `expected` to `stage`.
    async fn set_document_stage(
        &self,
        id: &DocumentId,
        expected: &WorkflowStage,
        stage: WorkflowStage,
    ) -> Result<(), BackendError>;

    /// Atomically set `status = approved`, the ledger stamp, and stage
    /// `Completed`. Fails with `InvalidTransition` unless pending.
    async fn approve_document(
        &self,
        id: &DocumentId,
        stamp: ApprovalStamp,
    ) -> Result<ApprovalableDocument, BackendError>;

    /// Atomically set `status = rejected`. Fails with `InvalidTransition`
    /// unless pending and awaiting approval.
    async fn reject_document(&self, id: &DocumentId) -> Result<ApprovalableDocument, BackendError>;

    /// Signing address bound to a patient.
    async fn patient_binding(
        &self,
        patient_id: &PatientId,
    ) -> Result<Option<PatientIdentityBinding>, BackendError>;

    /// Insert or replace a record workflow.
    async fn save_record_workflow(&self, workflow: &RecordWorkflow) -> Result<(), BackendError>;
}

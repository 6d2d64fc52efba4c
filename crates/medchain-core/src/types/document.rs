//! Approvalable documents, identity bindings and workflow stages.

use super::identifiers::{
    Address, ContentHash, DocumentId, PatientId, RecordWorkflowId, TransactionId,
};
use serde::{Deserialize, Serialize};

/// Approval status of an uploaded document.
///
/// The only valid transitions are `Pending -> Approved` and
/// `Pending -> Rejected`, each taken at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Awaiting the patient's decision
    Pending,
    /// Approved by the patient and anchored on the ledger
    Approved,
    /// Rejected by the patient (never anchored)
    Rejected,
}

impl DocumentStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Approved)
                | (DocumentStatus::Pending, DocumentStatus::Rejected)
        )
    }

    /// Whether the status is final.
    pub fn is_final(self) -> bool {
        !matches!(self, DocumentStatus::Pending)
    }
}

/// Persisted saga stage of a document approval.
///
/// Written by the approval coordinator before and after the irreversible
/// ledger step so a crash between stages can be detected on the next load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WorkflowStage {
    /// No ledger interaction has started
    AwaitingApproval,
    /// A ledger approval is about to be (or has been) submitted
    Anchoring,
    /// Ledger write and backend status change both succeeded
    Completed,
    /// Ledger write succeeded but the backend could not record it
    NeedsReconciliation {
        /// Transaction that is on the ledger but not in the backend
        transaction_id: TransactionId,
        /// Backend failure that caused the split
        reason: String,
    },
}

impl WorkflowStage {
    /// Whether a new approval attempt may start from this stage.
    pub fn accepts_new_attempt(&self) -> bool {
        matches!(self, WorkflowStage::AwaitingApproval)
    }
}

/// A file as handed over by the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    /// Original file name (e.g. `xray.png`)
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// File contents
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Retrievable reference to a file held by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Location the backend serves the file from
    pub uri: String,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
}

/// Ledger evidence written together with `status = approved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStamp {
    /// Address that signed the approval
    pub approver: Address,
    /// Ledger transaction carrying the approval event
    pub transaction_id: TransactionId,
    /// Ledger timestamp (seconds) of the confirming block
    pub ledger_timestamp: u64,
}

/// Request to create a pending document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    /// Patient the document concerns
    pub patient_id: PatientId,
    /// Appointment the document is attached to, if any
    pub appointment_id: Option<String>,
    /// Address of the uploading party
    pub uploader: Address,
    /// Free-text description
    pub description: String,
    /// The uploaded file
    pub file: FileUpload,
}

/// A document awaiting, or having received, patient consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalableDocument {
    /// Backend id
    pub id: DocumentId,
    /// Patient the document concerns
    pub patient_id: PatientId,
    /// Appointment the document is attached to, if any
    pub appointment_id: Option<String>,
    /// Address of the uploading party
    pub uploader: Address,
    /// Free-text description
    pub description: String,
    /// Where the file can be retrieved
    pub file: FileReference,
    /// Approval status
    pub status: DocumentStatus,
    /// Present iff `status == Approved`
    pub approval: Option<ApprovalStamp>,
    /// Persisted saga stage
    pub stage: WorkflowStage,
    /// Creation time (ms since epoch)
    pub created_at_ms: u64,
}

impl ApprovalableDocument {
    /// Transaction id of the approval, if approved.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.approval.as_ref().map(|stamp| &stamp.transaction_id)
    }

    /// Approver address, if approved.
    pub fn approver(&self) -> Option<&Address> {
        self.approval.as_ref().map(|stamp| &stamp.approver)
    }

    /// Whether status and ledger evidence agree.
    pub fn is_consistent(&self) -> bool {
        (self.status == DocumentStatus::Approved) == self.approval.is_some()
    }
}

/// 1:1 mapping between a patient and their signing address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentityBinding {
    /// Backend patient id
    pub patient_id: PatientId,
    /// The only address allowed to approve this patient's documents
    pub address: Address,
}

/// Saga stage of a medical-record anchoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    /// Workflow created, nothing written yet
    Started,
    /// Payload durably stored in the content store
    Stored,
    /// Content hash anchored on the ledger
    Anchored,
    /// Backend holds `{content_hash, transaction_id}`; the record is durable
    Completed,
    /// Anchored on the ledger but the backend could not persist it
    NeedsReconciliation,
}

/// Persisted progress of one medical-record anchoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWorkflow {
    /// Workflow id
    pub id: RecordWorkflowId,
    /// Patient the record belongs to
    pub patient_id: PatientId,
    /// Current stage
    pub stage: RecordStage,
    /// Set once the payload is stored
    pub content_hash: Option<ContentHash>,
    /// Set once the hash is anchored
    pub transaction_id: Option<TransactionId>,
    /// Creation time (ms since epoch)
    pub created_at_ms: u64,
}

impl RecordWorkflow {
    /// Start a new workflow for `patient_id`.
    pub fn start(patient_id: PatientId, created_at_ms: u64) -> Self {
        Self {
            id: RecordWorkflowId::new(),
            patient_id,
            stage: RecordStage::Started,
            content_hash: None,
            transaction_id: None,
            created_at_ms,
        }
    }
}

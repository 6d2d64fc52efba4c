//! Domain types shared by every MedChain crate.

mod document;
mod identifiers;
mod ledger;

pub use document::{
    ApprovalStamp, ApprovalableDocument, DocumentStatus, FileReference, FileUpload, NewDocument,
    PatientIdentityBinding, RecordStage, RecordWorkflow, WorkflowStage,
};
pub use identifiers::{
    Address, AddressError, ChainId, ContentHash, DocumentId, PatientId, RecordWorkflowId,
    TransactionId,
};
pub use ledger::{
    ContractCall, ContractCoordinates, ContractQuery, LedgerRecord, QueryResponse, RecordDraft,
    TxReceipt,
};

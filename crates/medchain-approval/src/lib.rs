//! # MedChain Approval - Document Approval Coordinator
//!
//! Orchestrates the user-facing workflows that span the wallet, the ledger
//! and the backend:
//!
//! - submitting uploaded documents for patient approval
//! - approving a document as its patient, anchored on the ledger
//! - rejecting a document without any ledger interaction
//! - storing and anchoring medical records
//! - per-role document feeds
//!
//! Every step persists its stage before moving on. A document is only ever
//! observed as `approved` together with its transaction id; when the ledger
//! accepted an approval the backend could not record, the document is flagged
//! for reconciliation and the caller receives a critical
//! [`ApprovalError::BackendPersistFailure`].

#![forbid(unsafe_code)]

mod coordinator;
mod errors;
mod outcome;
mod records;

pub use coordinator::ApprovalCoordinator;
pub use errors::ApprovalError;
pub use outcome::{
    ApprovalOutcome, ConnectOutcome, DocumentFeed, OutcomeError, Role, UploadOutcome,
};
pub use records::AnchoredRecord;

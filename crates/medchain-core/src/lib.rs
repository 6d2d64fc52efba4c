//! # MedChain Core - Layer 1: Foundation
//!
//! Shared vocabulary for the verifiable-document subsystem.
//!
//! ## What Belongs Here
//!
//! - Identifier and domain types (addresses, documents, ledger records)
//! - The closed provider error classification
//! - Effect traits for every external collaborator (signing provider, ledger,
//!   content store, backend, client-persisted session state, clock)
//! - Workspace configuration
//!
//! ## What Does NOT Belong Here
//!
//! - Effect handler implementations (belong in `medchain-effects`)
//! - Session, gateway or workflow logic (belong in the feature crates)
//!
//! Everything in this crate is synchronous and free of I/O, except the trait
//! signatures themselves.

#![forbid(unsafe_code)]

/// Workspace configuration loaded from TOML
pub mod config;

/// Effect traits for external collaborators
pub mod effects;

/// Raw provider failures, their classification, and shared error types
pub mod errors;

/// Domain types
pub mod types;

pub use config::{
    ConfigError, LedgerConfig, MedchainConfig, SessionConfig, StoreConfig, WalletConfig,
};
pub use errors::{
    classify, BackendError, ContentStoreError, ErrorSeverity, ProviderCode, ProviderErrorKind,
    RawProviderError, SessionStorageError,
};
pub use types::{
    Address, AddressError, ApprovalStamp, ApprovalableDocument, ChainId, ContentHash, ContractCall,
    ContractCoordinates, ContractQuery, DocumentId, DocumentStatus, FileReference, FileUpload,
    LedgerRecord, NewDocument, PatientId, PatientIdentityBinding, QueryResponse, RecordDraft,
    RecordStage, RecordWorkflow, RecordWorkflowId, TransactionId, TxReceipt, WorkflowStage,
};

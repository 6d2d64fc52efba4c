//! Approval workflow errors

use medchain_core::{
    Address, BackendError, DocumentId, DocumentStatus, ErrorSeverity, PatientId, TransactionId,
};
use medchain_ledger::LedgerError;
use medchain_store::StoreError;
use medchain_wallet::WalletError;
use serde::{Deserialize, Serialize};

/// Approval and anchoring failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApprovalError {
    /// No such document
    #[error("Document {document_id} not found")]
    DocumentNotFound {
        /// Requested document
        document_id: DocumentId,
    },

    /// The document already left `pending`
    #[error("Document {document_id} is {status:?}, not pending")]
    NotPending {
        /// Document
        document_id: DocumentId,
        /// Current status
        status: DocumentStatus,
    },

    /// Another approval of the same document is running
    #[error("Document {document_id} is already being approved")]
    WorkflowInProgress {
        /// Document
        document_id: DocumentId,
    },

    /// A previous approval reached the ledger but was not recorded
    #[error("Document {document_id} needs reconciliation before it can be approved")]
    ReconciliationRequired {
        /// Document
        document_id: DocumentId,
        /// Ledger transaction recorded for the earlier attempt, if any
        transaction_id: Option<TransactionId>,
    },

    /// The patient has no bound signing address
    #[error("Patient {patient_id} has no bound wallet address")]
    PatientNotBound {
        /// Patient
        patient_id: PatientId,
    },

    /// The connected signer is not the patient's bound address
    #[error("Connected wallet {actual} is not the patient's wallet {expected}")]
    IdentityMismatch {
        /// Bound patient address
        expected: Address,
        /// Connected signer
        actual: Address,
    },

    /// The upload is unusable
    #[error("Invalid upload: {reason}")]
    InvalidUpload {
        /// What is wrong
        reason: String,
    },

    /// Acquiring a signer failed
    #[error(transparent)]
    Wallet(WalletError),

    /// The ledger step failed; nothing was anchored
    #[error(transparent)]
    Ledger(LedgerError),

    /// The content store step failed; nothing was anchored
    #[error(transparent)]
    Store(StoreError),

    /// The backend failed before anything reached the ledger
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// The ledger write succeeded but the backend could not record it
    #[error("Ledger transaction {transaction_id} succeeded but could not be recorded: {message}")]
    BackendPersistFailure {
        /// Confirmed ledger transaction
        transaction_id: TransactionId,
        /// Backend failure
        message: String,
    },

    /// A ledger transaction was submitted but did not settle cleanly
    #[error("Ledger transaction {transaction_id} was submitted but did not settle: {message}")]
    UnsettledTransaction {
        /// Submitted ledger transaction
        transaction_id: TransactionId,
        /// Ledger failure
        message: String,
    },
}

impl ApprovalError {
    /// Stable name for UI layers.
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::DocumentNotFound { .. } => "DocumentNotFound",
            ApprovalError::NotPending { .. } => "NotPending",
            ApprovalError::WorkflowInProgress { .. } => "WorkflowInProgress",
            ApprovalError::ReconciliationRequired { .. } => "ReconciliationRequired",
            ApprovalError::PatientNotBound { .. } => "PatientNotBound",
            ApprovalError::IdentityMismatch { .. } => "IdentityMismatch",
            ApprovalError::InvalidUpload { .. } => "InvalidUpload",
            ApprovalError::Wallet(err) => wallet_code(err),
            ApprovalError::Ledger(err) => ledger_code(err),
            ApprovalError::Store(StoreError::StoreUnavailable { .. }) => "StoreUnavailable",
            ApprovalError::Store(StoreError::Serialization { .. }) => "InvalidUpload",
            ApprovalError::Backend(_) => "BackendUnavailable",
            ApprovalError::BackendPersistFailure { .. } => "BackendPersistFailure",
            ApprovalError::UnsettledTransaction { .. } => "UnsettledTransaction",
        }
    }

    /// How loudly the failure must be reported.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ApprovalError::DocumentNotFound { .. }
            | ApprovalError::NotPending { .. }
            | ApprovalError::WorkflowInProgress { .. }
            | ApprovalError::InvalidUpload { .. } => ErrorSeverity::Low,
            ApprovalError::PatientNotBound { .. } | ApprovalError::Backend(_) => {
                ErrorSeverity::Medium
            }
            ApprovalError::IdentityMismatch { .. }
            | ApprovalError::ReconciliationRequired { .. } => ErrorSeverity::High,
            ApprovalError::Wallet(err) => err.severity(),
            ApprovalError::Ledger(err) => err.severity(),
            ApprovalError::Store(err) => err.severity(),
            ApprovalError::BackendPersistFailure { .. }
            | ApprovalError::UnsettledTransaction { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the user may try the same action again. Never true once the
    /// ledger holds a transaction the backend does not know about.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApprovalError::WorkflowInProgress { .. } => true,
            ApprovalError::Backend(BackendError::Unavailable { .. }) => true,
            ApprovalError::Wallet(err) => err.is_retryable(),
            ApprovalError::Ledger(err) => err.is_retryable(),
            ApprovalError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Ledger transaction involved in the failure, if one was submitted.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            ApprovalError::BackendPersistFailure { transaction_id, .. }
            | ApprovalError::UnsettledTransaction { transaction_id, .. } => Some(transaction_id),
            ApprovalError::ReconciliationRequired { transaction_id, .. } => {
                transaction_id.as_ref()
            }
            _ => None,
        }
    }
}

impl From<LedgerError> for ApprovalError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::IdentityMismatch { expected, actual } => {
                ApprovalError::IdentityMismatch { expected, actual }
            }
            LedgerError::Wallet(err) => ApprovalError::Wallet(err),
            other => ApprovalError::Ledger(other),
        }
    }
}

impl From<WalletError> for ApprovalError {
    fn from(err: WalletError) -> Self {
        ApprovalError::Wallet(err)
    }
}

impl From<StoreError> for ApprovalError {
    fn from(err: StoreError) -> Self {
        ApprovalError::Store(err)
    }
}

pub(crate) fn wallet_code(err: &WalletError) -> &'static str {
    match err {
        WalletError::ProviderUnavailable { .. } => "ProviderUnavailable",
        WalletError::ConnectionRejected { .. } => "ConnectionRejected",
        WalletError::ConnectionPending => "ConnectionPending",
        WalletError::NotConnected => "NotConnected",
        WalletError::SessionChanged { .. } => "SessionChanged",
        WalletError::InvalidAccount { .. } => "InvalidAccount",
        WalletError::Storage { .. } => "SessionStorage",
        WalletError::Unknown { .. } => "Unknown",
    }
}

fn ledger_code(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::UserRejected { .. } => "UserRejected",
        LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
        LedgerError::UnpredictableCost { .. } => "UnpredictableCost",
        LedgerError::IdentityMismatch { .. } => "IdentityMismatch",
        LedgerError::NetworkUnavailable { .. } => "NetworkUnavailable",
        LedgerError::ProviderUnavailable { .. } => "ProviderUnavailable",
        LedgerError::WrongChain { .. } => "WrongChain",
        LedgerError::SessionChanged { .. } => "SessionChanged",
        LedgerError::ContractMismatch { .. } => "ContractMismatch",
        LedgerError::ConfirmationFailed { .. } => "ConfirmationFailed",
        LedgerError::TransactionReverted { .. } => "TransactionReverted",
        LedgerError::UnexpectedResponse { .. } => "Unknown",
        LedgerError::Wallet(err) => wallet_code(err),
        LedgerError::Backend(_) => "BackendUnavailable",
        LedgerError::Unknown { .. } => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_failure_is_critical_and_final() {
        let err = ApprovalError::BackendPersistFailure {
            transaction_id: TransactionId::parse("0xfeed").unwrap(),
            message: "backend down".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_retryable());
        assert_eq!(err.transaction_id().map(|tx| tx.as_str()), Some("0xfeed"));
        assert_eq!(err.code(), "BackendPersistFailure");
    }

    #[test]
    fn test_unsettled_transaction_is_critical_and_final() {
        let err = ApprovalError::UnsettledTransaction {
            transaction_id: TransactionId::parse("0xbeef").unwrap(),
            message: "receipt timed out".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_retryable());
        assert_eq!(err.transaction_id().map(|tx| tx.as_str()), Some("0xbeef"));
        assert_eq!(err.code(), "UnsettledTransaction");
    }

    #[test]
    fn test_ledger_identity_mismatch_is_lifted() {
        let a = Address::from_bytes([1; 20]);
        let b = Address::from_bytes([2; 20]);
        let err = ApprovalError::from(LedgerError::IdentityMismatch {
            expected: a,
            actual: b,
        });
        assert_eq!(
            err,
            ApprovalError::IdentityMismatch {
                expected: a,
                actual: b
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fatal_ledger_failures_are_not_retryable() {
        for err in [
            LedgerError::UnpredictableCost {
                message: "revert".to_string(),
            },
            LedgerError::InsufficientFunds {
                message: "poor".to_string(),
            },
        ] {
            assert!(!ApprovalError::from(err).is_retryable());
        }
        assert!(ApprovalError::from(WalletError::ConnectionPending).is_retryable());
    }
}

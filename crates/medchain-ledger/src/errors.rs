//! Ledger gateway errors

use medchain_core::{
    classify, Address, BackendError, ChainId, ErrorSeverity, ProviderErrorKind, RawProviderError,
    TransactionId,
};
use medchain_wallet::WalletError;
use serde::{Deserialize, Serialize};

/// Ledger gateway failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum LedgerError {
    /// The user declined to sign
    #[error("Transaction rejected by user: {message}")]
    UserRejected {
        /// Provider message
        message: String,
    },

    /// The signer cannot pay for the call
    #[error("Insufficient funds: {message}")]
    InsufficientFunds {
        /// Provider message
        message: String,
    },

    /// Simulation failed; the call would most likely revert
    #[error("Cannot predict transaction cost: {message}")]
    UnpredictableCost {
        /// Provider message
        message: String,
    },

    /// The connected signer is not the address the caller expected
    #[error("Connected signer {actual} is not the expected signer {expected}")]
    IdentityMismatch {
        /// Address the caller required
        expected: Address,
        /// Address actually connected
        actual: Address,
    },

    /// The node could not be reached
    #[error("Ledger network unavailable: {message}")]
    NetworkUnavailable {
        /// Provider message
        message: String,
    },

    /// The signing provider is missing or disconnected
    #[error("Signing provider unavailable: {message}")]
    ProviderUnavailable {
        /// Provider message
        message: String,
    },

    /// The signer is on another chain than the configured one
    #[error("Signer is on {actual:?}, expected {expected}")]
    WrongChain {
        /// Configured chain
        expected: ChainId,
        /// Chain the signer reported
        actual: Option<ChainId>,
    },

    /// The session changed between simulation and submission
    #[error("Wallet session changed before submission: {reason}")]
    SessionChanged {
        /// What changed
        reason: String,
    },

    /// The deployed ABI lacks functions the gateway calls
    #[error("Contract ABI is missing functions: {missing:?}")]
    ContractMismatch {
        /// Function names not declared by the ABI
        missing: Vec<String>,
    },

    /// The transaction was submitted but its outcome could not be confirmed
    #[error("Transaction {transaction_id} was submitted but not confirmed: {message}")]
    ConfirmationFailed {
        /// Submitted transaction
        transaction_id: TransactionId,
        /// Provider message
        message: String,
    },

    /// The transaction was mined but reverted
    #[error("Transaction {transaction_id} reverted")]
    TransactionReverted {
        /// Reverted transaction
        transaction_id: TransactionId,
    },

    /// A query returned a value of the wrong shape
    #[error("Unexpected {got} response to {function}")]
    UnexpectedResponse {
        /// Queried function
        function: String,
        /// Variant actually returned
        got: String,
    },

    /// Acquiring a signer failed
    #[error(transparent)]
    Wallet(WalletError),

    /// The backend could not provide the contract coordinates
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Anything else, provider message preserved
    #[error("Ledger error: {message}")]
    Unknown {
        /// Provider message
        message: String,
    },
}

impl LedgerError {
    /// Map a provider failure by its classified kind.
    pub fn from_provider(raw: RawProviderError) -> Self {
        let message = raw.message.clone();
        match classify(&raw) {
            ProviderErrorKind::UserRejected => LedgerError::UserRejected { message },
            ProviderErrorKind::InsufficientFunds => LedgerError::InsufficientFunds { message },
            ProviderErrorKind::UnpredictableCost => LedgerError::UnpredictableCost { message },
            ProviderErrorKind::NetworkUnavailable => LedgerError::NetworkUnavailable { message },
            ProviderErrorKind::ProviderUnavailable => LedgerError::ProviderUnavailable { message },
            ProviderErrorKind::RequestPending => {
                LedgerError::Wallet(WalletError::ConnectionPending)
            }
            ProviderErrorKind::Unauthorized
            | ProviderErrorKind::UnsupportedMethod
            | ProviderErrorKind::ExecutionReverted
            | ProviderErrorKind::Unknown => LedgerError::Unknown { message },
        }
    }

    /// Map a failed cost simulation.
    ///
    /// Anything the classifier cannot pin on funds, connectivity or the user
    /// counts as an unpredictable cost.
    pub fn from_estimate(raw: RawProviderError) -> Self {
        match classify(&raw) {
            ProviderErrorKind::UserRejected
            | ProviderErrorKind::InsufficientFunds
            | ProviderErrorKind::NetworkUnavailable
            | ProviderErrorKind::ProviderUnavailable => Self::from_provider(raw),
            _ => LedgerError::UnpredictableCost {
                message: raw.message,
            },
        }
    }

    /// How loudly the failure must be reported.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LedgerError::UserRejected { .. } | LedgerError::SessionChanged { .. } => {
                ErrorSeverity::Low
            }
            LedgerError::NetworkUnavailable { .. }
            | LedgerError::ProviderUnavailable { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::WrongChain { .. } => ErrorSeverity::Medium,
            LedgerError::UnpredictableCost { .. }
            | LedgerError::IdentityMismatch { .. }
            | LedgerError::TransactionReverted { .. }
            | LedgerError::UnexpectedResponse { .. }
            | LedgerError::Backend(_)
            | LedgerError::Unknown { .. } => ErrorSeverity::High,
            LedgerError::ContractMismatch { .. } | LedgerError::ConfirmationFailed { .. } => {
                ErrorSeverity::Critical
            }
            LedgerError::Wallet(err) => err.severity(),
        }
    }

    /// Whether the same call may reasonably be attempted again. Identity,
    /// cost and funding failures are fatal to the workflow.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::UserRejected { .. }
            | LedgerError::NetworkUnavailable { .. }
            | LedgerError::ProviderUnavailable { .. }
            | LedgerError::SessionChanged { .. }
            | LedgerError::WrongChain { .. } => true,
            LedgerError::Wallet(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Transaction that reached the ledger before the failure, if any.
    ///
    /// When this is `Some` the ledger may already hold the write, so the
    /// caller must not treat the failure as "nothing happened".
    pub fn submitted_transaction(&self) -> Option<&TransactionId> {
        match self {
            LedgerError::ConfirmationFailed { transaction_id, .. }
            | LedgerError::TransactionReverted { transaction_id } => Some(transaction_id),
            _ => None,
        }
    }
}

impl From<WalletError> for LedgerError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::SessionChanged { reason } => LedgerError::SessionChanged { reason },
            other => LedgerError::Wallet(other),
        }
    }
}

//! Wallet session errors

use medchain_core::{
    classify, ErrorSeverity, ProviderErrorKind, RawProviderError, SessionStorageError,
};
use serde::{Deserialize, Serialize};

/// Wallet session failures.
///
/// `Clone` because one in-flight handshake hands the same result to every
/// concurrent `initialize` caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum WalletError {
    /// No signing provider, or the provider is disconnected
    #[error("Wallet provider unavailable: {message}")]
    ProviderUnavailable {
        /// Provider message
        message: String,
    },

    /// The user declined, or granted no accounts
    #[error("Wallet connection rejected: {message}")]
    ConnectionRejected {
        /// Provider message
        message: String,
    },

    /// A consent request is already outstanding
    #[error("A wallet connection request is already pending")]
    ConnectionPending,

    /// No signer is connected
    #[error("No wallet is connected")]
    NotConnected,

    /// The session changed (account, chain or disconnect) since the guard was taken
    #[error("Wallet session changed: {reason}")]
    SessionChanged {
        /// What changed
        reason: String,
    },

    /// The provider returned an account that is not an address
    #[error("Provider returned an invalid account {value:?}: {reason}")]
    InvalidAccount {
        /// Raw account string
        value: String,
        /// Parse failure
        reason: String,
    },

    /// Client-persisted session state could not be read or written
    #[error("Session storage error: {message}")]
    Storage {
        /// Underlying failure
        message: String,
    },

    /// Any other provider failure, message preserved
    #[error("Wallet error: {message}")]
    Unknown {
        /// Provider message
        message: String,
    },
}

impl WalletError {
    /// How loudly the failure must be reported.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WalletError::ConnectionPending | WalletError::ConnectionRejected { .. } => {
                ErrorSeverity::Low
            }
            WalletError::NotConnected
            | WalletError::SessionChanged { .. }
            | WalletError::ProviderUnavailable { .. } => ErrorSeverity::Medium,
            WalletError::InvalidAccount { .. }
            | WalletError::Storage { .. }
            | WalletError::Unknown { .. } => ErrorSeverity::High,
        }
    }

    /// Whether the same request may reasonably be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::ConnectionPending
                | WalletError::ConnectionRejected { .. }
                | WalletError::NotConnected
                | WalletError::SessionChanged { .. }
                | WalletError::ProviderUnavailable { .. }
        )
    }

    /// Whether the user actively declined.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, WalletError::ConnectionRejected { .. })
    }
}

impl From<RawProviderError> for WalletError {
    fn from(raw: RawProviderError) -> Self {
        let message = raw.message.clone();
        match classify(&raw) {
            ProviderErrorKind::UserRejected | ProviderErrorKind::Unauthorized => {
                WalletError::ConnectionRejected { message }
            }
            ProviderErrorKind::RequestPending => WalletError::ConnectionPending,
            ProviderErrorKind::ProviderUnavailable | ProviderErrorKind::NetworkUnavailable => {
                WalletError::ProviderUnavailable { message }
            }
            _ => WalletError::Unknown { message },
        }
    }
}

impl From<SessionStorageError> for WalletError {
    fn from(err: SessionStorageError) -> Self {
        WalletError::Storage {
            message: err.to_string(),
        }
    }
}

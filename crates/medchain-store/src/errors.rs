//! Content store errors.

use medchain_core::ErrorSeverity;
use serde::{Deserialize, Serialize};

/// Content store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    /// The store could not be reached or did not return a usable hash
    #[error("Content store unavailable: {message}")]
    StoreUnavailable {
        /// Underlying failure
        message: String,
    },

    /// The payload could not be serialized
    #[error("Payload serialization failed: {message}")]
    Serialization {
        /// Underlying failure
        message: String,
    },
}

impl StoreError {
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// How loudly the failure must be reported.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StoreError::StoreUnavailable { .. } => ErrorSeverity::Medium,
            StoreError::Serialization { .. } => ErrorSeverity::High,
        }
    }

    /// Whether the caller may try the same upload again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StoreUnavailable { .. })
    }
}

//! Raw collaborator failures and their classification
//!
//! Signing providers and ledger nodes report failures as loosely-shaped
//! objects: sometimes a numeric JSON-RPC code, sometimes a symbolic code
//! string, sometimes only a message. [`RawProviderError`] captures that shape
//! exactly once, at the boundary, and [`classify`] turns it into the closed
//! [`ProviderErrorKind`] enumeration. Nothing downstream inspects raw text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider error code as reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderCode {
    /// JSON-RPC / EIP-1193 numeric code
    Numeric(i64),
    /// Library-level symbolic code (e.g. `ACTION_REJECTED`)
    Symbolic(String),
}

impl fmt::Display for ProviderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCode::Numeric(code) => write!(f, "{code}"),
            ProviderCode::Symbolic(code) => f.write_str(code),
        }
    }
}

/// Failure reported by a signing provider or ledger node, unclassified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RawProviderError {
    /// Optional code
    pub code: Option<ProviderCode>,
    /// Human-readable message, preserved verbatim
    pub message: String,
}

impl RawProviderError {
    /// Error with a numeric code.
    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(ProviderCode::Numeric(code)),
            message: message.into(),
        }
    }

    /// Error with a symbolic code.
    pub fn with_symbol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(ProviderCode::Symbolic(code.into())),
            message: message.into(),
        }
    }

    /// Error with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ProviderErrorKind {
        classify(self)
    }
}

/// Closed set of provider failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    /// The user declined the prompt
    UserRejected,
    /// A consent request is already outstanding in the provider
    RequestPending,
    /// The requested account or method has not been authorised
    Unauthorized,
    /// The provider does not implement the method
    UnsupportedMethod,
    /// No provider, or the provider is disconnected from every chain
    ProviderUnavailable,
    /// Signer cannot pay for the transaction
    InsufficientFunds,
    /// Cost estimation failed (the call would revert or cannot be simulated)
    UnpredictableCost,
    /// The call executed and reverted
    ExecutionReverted,
    /// The RPC endpoint could not be reached
    NetworkUnavailable,
    /// Anything else; the original message is carried separately
    Unknown,
}

/// EIP-1193 / JSON-RPC numeric codes
const CODE_USER_REJECTED: i64 = 4001;
const CODE_UNAUTHORIZED: i64 = 4100;
const CODE_UNSUPPORTED_METHOD: i64 = 4200;
const CODE_DISCONNECTED: i64 = 4900;
const CODE_CHAIN_DISCONNECTED: i64 = 4901;
const CODE_RESOURCE_UNAVAILABLE: i64 = -32002;
const CODE_METHOD_NOT_FOUND: i64 = -32601;
const CODE_EXECUTION_REVERTED: i64 = 3;

/// Classify a raw provider failure.
///
/// Codes win over messages; message matching is a fallback for providers that
/// only report text.
pub fn classify(raw: &RawProviderError) -> ProviderErrorKind {
    match &raw.code {
        Some(ProviderCode::Numeric(code)) => {
            if let Some(kind) = classify_numeric(*code) {
                return kind;
            }
        }
        Some(ProviderCode::Symbolic(code)) => {
            if let Some(kind) = classify_symbol(code) {
                return kind;
            }
        }
        None => {}
    }
    classify_message(&raw.message)
}

fn classify_numeric(code: i64) -> Option<ProviderErrorKind> {
    match code {
        CODE_USER_REJECTED => Some(ProviderErrorKind::UserRejected),
        CODE_UNAUTHORIZED => Some(ProviderErrorKind::Unauthorized),
        CODE_UNSUPPORTED_METHOD | CODE_METHOD_NOT_FOUND => {
            Some(ProviderErrorKind::UnsupportedMethod)
        }
        CODE_DISCONNECTED | CODE_CHAIN_DISCONNECTED => Some(ProviderErrorKind::ProviderUnavailable),
        CODE_RESOURCE_UNAVAILABLE => Some(ProviderErrorKind::RequestPending),
        CODE_EXECUTION_REVERTED => Some(ProviderErrorKind::ExecutionReverted),
        // -32000 and -32603 are catch-alls; only the message can tell them apart
        _ => None,
    }
}

fn classify_symbol(code: &str) -> Option<ProviderErrorKind> {
    match code.to_ascii_uppercase().as_str() {
        "ACTION_REJECTED" => Some(ProviderErrorKind::UserRejected),
        "INSUFFICIENT_FUNDS" => Some(ProviderErrorKind::InsufficientFunds),
        "UNPREDICTABLE_GAS_LIMIT" => Some(ProviderErrorKind::UnpredictableCost),
        "CALL_EXCEPTION" => Some(ProviderErrorKind::ExecutionReverted),
        "NETWORK_ERROR" | "SERVER_ERROR" | "TIMEOUT" => Some(ProviderErrorKind::NetworkUnavailable),
        "UNSUPPORTED_OPERATION" | "NOT_IMPLEMENTED" => Some(ProviderErrorKind::UnsupportedMethod),
        _ => None,
    }
}

fn classify_message(message: &str) -> ProviderErrorKind {
    let text = message.to_ascii_lowercase();
    let has = |needle: &str| text.contains(needle);

    if has("user rejected") || has("user denied") || has("rejected by user") {
        ProviderErrorKind::UserRejected
    } else if has("already pending") || has("request already") {
        ProviderErrorKind::RequestPending
    } else if has("insufficient funds") {
        ProviderErrorKind::InsufficientFunds
    } else if has("cannot estimate gas") || has("unpredictable gas") || has("gas required exceeds")
    {
        ProviderErrorKind::UnpredictableCost
    } else if has("execution reverted") || has("revert") {
        ProviderErrorKind::ExecutionReverted
    } else if has("no provider") || has("provider not found") || has("disconnected") {
        ProviderErrorKind::ProviderUnavailable
    } else if has("could not detect network")
        || has("network error")
        || has("failed to fetch")
        || has("timeout")
        || has("timed out")
    {
        ProviderErrorKind::NetworkUnavailable
    } else if has("method not found") || has("not supported") {
        ProviderErrorKind::UnsupportedMethod
    } else {
        ProviderErrorKind::Unknown
    }
}

/// How loudly a failure must be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Expected, user-recoverable
    Low,
    /// Operation failed cleanly
    Medium,
    /// Operation failed and needs attention
    High,
    /// Cross-system state is inconsistent
    Critical,
}

/// Failure reported by the backend persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum BackendError {
    /// Entity does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// What was missing
        message: String,
    },
    /// The requested status change violates the single-transition rule
    #[error("Invalid transition: {message}")]
    InvalidTransition {
        /// Description of the rejected transition
        message: String,
    },
    /// Backend could not be reached or refused the write
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Transport or server message
        message: String,
    },
}

impl BackendError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Failure reported by the content store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Content store error: {message}")]
pub struct ContentStoreError {
    /// Transport or server message
    pub message: String,
}

impl ContentStoreError {
    /// Create a content store error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reading or writing client-persisted session state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionStorageError {
    /// Underlying storage failed
    #[error("Session storage I/O error: {message}")]
    Io {
        /// I/O message
        message: String,
    },
    /// Stored state could not be decoded
    #[error("Session storage is corrupt: {message}")]
    Corrupt {
        /// Decoder message
        message: String,
    },
}

impl From<std::io::Error> for SessionStorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

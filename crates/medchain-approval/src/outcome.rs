//! Result shapes handed to the UI layer.

use crate::errors::{wallet_code, ApprovalError};
use medchain_core::{
    Address, ApprovalableDocument, ContentHash, ErrorSeverity, PatientId, TransactionId,
};
use medchain_store::StoredContent;
use medchain_wallet::WalletError;
use serde::Serialize;

/// Error summary shown next to a failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeError {
    /// Stable error name (e.g. `IdentityMismatch`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Reporting severity
    pub severity: ErrorSeverity,
    /// Whether offering "try again" makes sense
    pub retryable: bool,
}

impl From<&ApprovalError> for OutcomeError {
    fn from(err: &ApprovalError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            severity: err.severity(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<&WalletError> for OutcomeError {
    fn from(err: &WalletError) -> Self {
        Self {
            code: wallet_code(err).to_string(),
            message: err.to_string(),
            severity: err.severity(),
            retryable: err.is_retryable(),
        }
    }
}

/// Result of connect / disconnect: `{address|null, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    /// Connected address, `null` when not connected
    pub address: Option<Address>,
    /// Failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl ConnectOutcome {
    /// Build from a session result.
    pub fn from_result(result: Result<Option<Address>, WalletError>) -> Self {
        match result {
            Ok(address) => Self {
                address,
                error: None,
            },
            Err(err) => Self {
                address: None,
                error: Some(OutcomeError::from(&err)),
            },
        }
    }
}

/// Result of approve / reject: `{success, transactionId?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    /// Whether the status change happened
    pub success: bool,
    /// Ledger transaction, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    /// Failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl From<Result<ApprovalableDocument, ApprovalError>> for ApprovalOutcome {
    fn from(result: Result<ApprovalableDocument, ApprovalError>) -> Self {
        match result {
            Ok(document) => Self {
                success: true,
                transaction_id: document.transaction_id().cloned(),
                error: None,
            },
            // Failures after submission still report the transaction.
            Err(err) => Self {
                success: false,
                transaction_id: err.transaction_id().cloned(),
                error: Some(OutcomeError::from(&err)),
            },
        }
    }
}

/// Result of a content upload: `{contentHash}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Hash returned by the content store
    pub content_hash: ContentHash,
}

impl From<&StoredContent> for UploadOutcome {
    fn from(content: &StoredContent) -> Self {
        Self {
            content_hash: content.hash().clone(),
        }
    }
}

/// Whose documents a feed shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Documents concerning a patient
    Patient(PatientId),
    /// Documents a doctor or lab uploaded
    Uploader(Address),
}

/// A role's documents partitioned by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentFeed {
    /// Awaiting a decision
    pub pending: Vec<ApprovalableDocument>,
    /// Approved and anchored
    pub approved: Vec<ApprovalableDocument>,
    /// Rejected
    pub rejected: Vec<ApprovalableDocument>,
}

impl DocumentFeed {
    /// Total number of documents in the feed.
    pub fn len(&self) -> usize {
        self.pending.len() + self.approved.len() + self.rejected.len()
    }

    /// Whether the feed is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Contract calls, queries and the records they return.

use super::identifiers::{Address, ContentHash, PatientId, TransactionId};
use serde::{Deserialize, Serialize};

/// A medical record as anchored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Patient the record belongs to
    pub patient_id: PatientId,
    /// Content-store hash of the full payload
    pub content_hash: ContentHash,
    /// Address that anchored the record
    pub creator: Address,
    /// Ledger timestamp (seconds)
    pub timestamp: u64,
    /// Record type (e.g. `lab-result`)
    pub record_type: String,
    /// Diagnosis summary
    pub diagnosis: String,
    /// Free-text notes
    pub notes: String,
    /// Cleared when the record is superseded or invalidated
    pub is_valid: bool,
}

/// Record metadata anchored next to a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Patient the record belongs to
    pub patient_id: PatientId,
    /// Record type (e.g. `lab-result`)
    pub record_type: String,
    /// Diagnosis summary
    pub diagnosis: String,
    /// Free-text notes
    pub notes: String,
}

/// State-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    /// Register the signer as the given patient
    RegisterPatient {
        /// Backend patient id
        patient_id: PatientId,
    },
    /// Grant a doctor access to the signer's records
    AuthorizeDoctor {
        /// Doctor address
        doctor: Address,
    },
    /// Revoke a doctor's access to the signer's records
    RevokeDoctor {
        /// Doctor address
        doctor: Address,
    },
    /// Anchor a new record
    AddPatientRecord {
        /// Hash of the stored payload
        content_hash: ContentHash,
        /// Record metadata
        draft: RecordDraft,
    },
    /// Replace an existing record's hash and metadata
    UpdatePatientRecord {
        /// Index of the record in the patient's list
        record_index: u64,
        /// Hash of the stored payload
        content_hash: ContentHash,
        /// Record metadata
        draft: RecordDraft,
    },
    /// Record a patient's approval of an uploaded document
    ApproveDocument {
        /// Backend document id
        document_id: String,
    },
}

impl ContractCall {
    /// ABI function name invoked by this call.
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::RegisterPatient { .. } => "registerPatient",
            ContractCall::AuthorizeDoctor { .. } => "authorizeDoctor",
            ContractCall::RevokeDoctor { .. } => "revokeDoctor",
            ContractCall::AddPatientRecord { .. } => "addPatientRecord",
            ContractCall::UpdatePatientRecord { .. } => "updatePatientRecord",
            ContractCall::ApproveDocument { .. } => "approveDocument",
        }
    }
}

/// Read-only contract query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum ContractQuery {
    /// One record by index
    PatientRecord {
        /// Patient address
        patient: Address,
        /// Record index
        index: u64,
    },
    /// Validity flag of one record
    VerifyRecord {
        /// Patient address
        patient: Address,
        /// Record index
        index: u64,
    },
    /// Number of records held for a patient
    RecordCount {
        /// Patient address
        patient: Address,
    },
    /// Doctors authorized by a patient
    AuthorizedDoctors {
        /// Patient address
        patient: Address,
    },
    /// Whether a doctor is authorized by a patient
    IsDoctorAuthorized {
        /// Patient address
        patient: Address,
        /// Doctor address
        doctor: Address,
    },
    /// All records held for a patient
    PatientRecords {
        /// Patient address
        patient: Address,
    },
}

impl ContractQuery {
    /// ABI function name invoked by this query.
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractQuery::PatientRecord { .. } => "getPatientRecord",
            ContractQuery::VerifyRecord { .. } => "verifyRecord",
            ContractQuery::RecordCount { .. } => "getRecordCount",
            ContractQuery::AuthorizedDoctors { .. } => "getAuthorizedDoctors",
            ContractQuery::IsDoctorAuthorized { .. } => "isDoctorAuthorized",
            ContractQuery::PatientRecords { .. } => "getPatientRecords",
        }
    }
}

/// Decoded return value of a [`ContractQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    /// Single record
    Record(LedgerRecord),
    /// List of records
    Records(Vec<LedgerRecord>),
    /// Boolean flag
    Flag(bool),
    /// Counter
    Count(u64),
    /// List of addresses
    Addresses(Vec<Address>),
}

impl QueryResponse {
    /// Short variant name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryResponse::Record(_) => "record",
            QueryResponse::Records(_) => "records",
            QueryResponse::Flag(_) => "flag",
            QueryResponse::Count(_) => "count",
            QueryResponse::Addresses(_) => "addresses",
        }
    }
}

/// Confirmation of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction id
    pub transaction_id: TransactionId,
    /// Block that included the transaction
    pub block_number: u64,
    /// Block timestamp (seconds)
    pub timestamp: u64,
    /// `false` if the transaction was mined but reverted
    pub succeeded: bool,
    /// Cost units actually consumed
    pub cost_used: u64,
}

/// Contract address and ABI, fetched from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCoordinates {
    /// Deployed contract address
    pub address: Address,
    /// Contract ABI as JSON
    pub abi: serde_json::Value,
}

impl ContractCoordinates {
    /// Whether the ABI declares a function called `name`.
    pub fn declares_function(&self, name: &str) -> bool {
        self.abi.as_array().is_some_and(|entries| {
            entries.iter().any(|entry| {
                entry.get("type").and_then(|t| t.as_str()) == Some("function")
                    && entry.get("name").and_then(|n| n.as_str()) == Some(name)
            })
        })
    }
}
